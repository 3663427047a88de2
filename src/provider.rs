use crate::error::ProviderError;
use crate::permission::Permission;
use crate::tree::RoleTree;
use crate::types::{RoleName, SubjectId};
use async_trait::async_trait;

/// Source of roles, permissions and attribute names.
///
/// Every method may fail; the checker reports the failure and continues as
/// if the provider had returned nothing for that subject or role.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the role tree of a subject, or an empty tree when it has none.
    async fn roles(&self, subject: &SubjectId) -> std::result::Result<RoleTree, ProviderError>;

    /// Returns the permissions granted by a role. Unknown roles grant none.
    async fn permissions(
        &self,
        role: &RoleName,
    ) -> std::result::Result<Vec<Permission>, ProviderError>;

    /// Returns the attribute names gating a role. Unknown roles have none.
    async fn attributes(&self, role: &RoleName) -> std::result::Result<Vec<String>, ProviderError>;
}
