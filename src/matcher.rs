use crate::error::Error;
use crate::permission::{Permission, PermissionExpr, best_priority};
use crate::provider::Provider;
use crate::report::{FailureStage, Reporter};
use crate::resolver::RolePriorities;
use crate::types::RoleName;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Gathers the permissions of resolved roles and matches them against an
/// expression.
pub(crate) struct PermissionMatcher<'a> {
    providers: &'a [Arc<dyn Provider>],
    reporter: &'a Reporter<'a>,
}

impl<'a> PermissionMatcher<'a> {
    pub(crate) fn new(providers: &'a [Arc<dyn Provider>], reporter: &'a Reporter<'a>) -> Self {
        Self {
            providers,
            reporter,
        }
    }

    /// Returns the best priority at which `expr` is satisfied, if any.
    pub(crate) async fn best_priority(
        &self,
        roles: &RolePriorities,
        expr: &PermissionExpr,
    ) -> Option<u32> {
        let granted = self.granted(roles).await;
        best_priority(expr, &granted)
    }

    /// Builds the permission -> priority table, fetching every
    /// (role, provider) pair in parallel.
    async fn granted(&self, roles: &RolePriorities) -> HashMap<Permission, u32> {
        let fetched = join_all(roles.iter().flat_map(|(role, priority)| {
            self.providers
                .iter()
                .map(move |provider| self.fetch(provider.as_ref(), role, *priority))
        }))
        .await;

        let mut granted = HashMap::new();
        for (permissions, priority) in fetched {
            for permission in permissions {
                granted
                    .entry(permission)
                    .and_modify(|best: &mut u32| *best = (*best).min(priority))
                    .or_insert(priority);
            }
        }
        tracing::trace!(permissions = granted.len(), "gathered role permissions");
        granted
    }

    async fn fetch(
        &self,
        provider: &dyn Provider,
        role: &RoleName,
        priority: u32,
    ) -> (Vec<Permission>, u32) {
        match provider.permissions(role).await {
            Ok(permissions) => (permissions, priority),
            Err(error) => {
                self.reporter
                    .report(Some(role), FailureStage::Permissions, Error::Provider(error));
                (Vec::new(), priority)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::report::ErrorListener;
    use crate::tree::RoleTree;
    use crate::types::SubjectId;
    use async_trait::async_trait;
    use futures::executor::block_on;

    struct PermissionTable {
        permissions: HashMap<&'static str, Vec<&'static str>>,
        failing: bool,
    }

    #[async_trait]
    impl Provider for PermissionTable {
        async fn roles(&self, _subject: &SubjectId) -> std::result::Result<RoleTree, ProviderError> {
            Ok(RoleTree::new())
        }

        async fn permissions(
            &self,
            role: &RoleName,
        ) -> std::result::Result<Vec<Permission>, ProviderError> {
            if self.failing {
                return Err("permission store offline".into());
            }
            Ok(self
                .permissions
                .get(role.as_str())
                .map(|names| {
                    names
                        .iter()
                        .map(|name| Permission::from_string(name.to_string()))
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn attributes(&self, _role: &RoleName) -> std::result::Result<Vec<String>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn priorities(entries: &[(&str, u32)]) -> RolePriorities {
        entries
            .iter()
            .map(|(name, priority)| (RoleName::try_from(*name).unwrap(), *priority))
            .collect()
    }

    fn best(providers: Vec<Arc<dyn Provider>>, roles: &RolePriorities, expr: &str) -> (Option<u32>, usize) {
        let subject = SubjectId::try_from("user_1").unwrap();
        let listeners: Vec<Arc<dyn ErrorListener>> = Vec::new();
        let reporter = Reporter::new(&subject, &listeners);
        let expr = PermissionExpr::parse(expr).unwrap();
        let priority = block_on(PermissionMatcher::new(&providers, &reporter).best_priority(roles, &expr));
        (priority, reporter.into_failures().len())
    }

    #[test]
    fn permission_should_take_best_granting_role() {
        let provider: Arc<dyn Provider> = Arc::new(PermissionTable {
            permissions: HashMap::from([("editor", vec!["read", "write"]), ("viewer", vec!["read"])]),
            failing: false,
        });
        let roles = priorities(&[("editor", 2), ("viewer", 1)]);

        assert_eq!(best(vec![provider.clone()], &roles, "read"), (Some(1), 0));
        assert_eq!(best(vec![provider.clone()], &roles, "write && read"), (Some(2), 0));
        assert_eq!(best(vec![provider], &roles, "delete"), (None, 0));
    }

    #[test]
    fn providers_should_union_permissions() {
        let first: Arc<dyn Provider> = Arc::new(PermissionTable {
            permissions: HashMap::from([("editor", vec!["write"])]),
            failing: false,
        });
        let second: Arc<dyn Provider> = Arc::new(PermissionTable {
            permissions: HashMap::from([("editor", vec!["publish"])]),
            failing: false,
        });
        let roles = priorities(&[("editor", 1)]);

        assert_eq!(best(vec![first, second], &roles, "write && publish"), (Some(1), 0));
    }

    #[test]
    fn failing_provider_should_only_drop_its_permissions() {
        let healthy: Arc<dyn Provider> = Arc::new(PermissionTable {
            permissions: HashMap::from([("editor", vec!["write"])]),
            failing: false,
        });
        let broken: Arc<dyn Provider> = Arc::new(PermissionTable {
            permissions: HashMap::new(),
            failing: true,
        });
        let roles = priorities(&[("editor", 3)]);

        assert_eq!(best(vec![healthy, broken], &roles, "write"), (Some(3), 1));
    }
}
