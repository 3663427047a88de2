use crate::error::{Error, ProviderError};
use crate::resolver::{RolePriorities, flatten};
use crate::types::RoleName;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Default limit on inheritance depth, counting directly assigned roles as 1.
pub const DEFAULT_MAX_INHERIT_DEPTH: usize = 32;

/// Roles reachable from a subject, each mapped to the roles it inherits.
///
/// An empty child tree marks a role without further inheritance. The same
/// role may appear under several parents; a role is expected to inherit the
/// same roles wherever it appears. Child trees are reference counted, so a
/// role reached through several parents can share one subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleTree {
    roles: HashMap<RoleName, Arc<RoleTree>>,
}

impl RoleTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a role with its inherited roles.
    pub fn with_role(mut self, role: RoleName, inherited: impl Into<Arc<RoleTree>>) -> Self {
        self.roles.insert(role, inherited.into());
        self
    }

    /// Adds a role without inherited roles.
    pub fn with_leaf(self, role: RoleName) -> Self {
        self.with_role(role, RoleTree::new())
    }

    /// Inserts a role, returning the inherited tree it replaced.
    pub fn insert(
        &mut self,
        role: RoleName,
        inherited: impl Into<Arc<RoleTree>>,
    ) -> Option<Arc<RoleTree>> {
        self.roles.insert(role, inherited.into())
    }

    /// Removes a role and its inherited tree from this level.
    pub fn remove(&mut self, role: &str) -> Option<Arc<RoleTree>> {
        self.roles.remove(role)
    }

    /// Returns the inherited tree of a role at this level.
    pub fn get(&self, role: &str) -> Option<&RoleTree> {
        self.roles.get(role).map(Arc::as_ref)
    }

    /// Returns whether a role is present at this level.
    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Number of roles at this level.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Returns whether this level has no roles.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Iterates over the roles at this level.
    pub fn iter(&self) -> impl Iterator<Item = (&RoleName, &RoleTree)> {
        self.roles
            .iter()
            .map(|(role, inherited)| (role, inherited.as_ref()))
    }

    /// Returns the role names at this level.
    pub fn roles(&self) -> impl Iterator<Item = &RoleName> {
        self.roles.keys()
    }

    /// Collects every distinct role name anywhere in the tree.
    pub fn role_names(&self) -> HashSet<&RoleName> {
        let mut names = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            if !visited.insert(tree.node_key()) {
                continue;
            }
            for (role, inherited) in tree.iter() {
                names.insert(role);
                stack.push(inherited);
            }
        }
        names
    }

    /// Flattens the tree into role priorities, keeping the shallowest depth
    /// of every role. Directly assigned roles have priority 1.
    pub fn priorities(&self) -> RolePriorities {
        flatten(self)
    }

    /// Returns a role sitting deeper than `max_depth`, if any.
    pub fn deeper_than(&self, max_depth: usize) -> Option<&RoleName> {
        let mut visited = HashSet::new();
        let mut level = vec![self];
        let mut depth = 1;
        while !level.is_empty() {
            let mut next = Vec::new();
            for tree in level {
                for (role, inherited) in tree.iter() {
                    if depth > max_depth {
                        return Some(role);
                    }
                    if !inherited.is_empty() && visited.insert(inherited.node_key()) {
                        next.push(inherited);
                    }
                }
            }
            level = next;
            depth += 1;
        }
        None
    }

    /// Identity of this node, shared by every parent holding the same subtree.
    pub(crate) fn node_key(&self) -> usize {
        std::ptr::from_ref(self).addr()
    }

    /// Builds a tree from directly assigned roles and an inheritance lookup,
    /// limited to [`DEFAULT_MAX_INHERIT_DEPTH`].
    pub async fn collect<S>(roles: Vec<RoleName>, source: &S) -> Result<Self, ProviderError>
    where
        S: InheritanceSource + ?Sized,
    {
        Self::collect_with_max_depth(roles, source, DEFAULT_MAX_INHERIT_DEPTH).await
    }

    /// Builds a tree from directly assigned roles and an inheritance lookup.
    ///
    /// Every role is looked up at most once per call and its subtree is
    /// shared by all of its parents. An inherited role already on the path
    /// from the root is left out, which stops inheritance cycles. Roles the
    /// source does not know are left out as well. Inheritance deeper than
    /// `max_depth` fails with [`Error::DepthExceeded`].
    pub async fn collect_with_max_depth<S>(
        roles: Vec<RoleName>,
        source: &S,
        max_depth: usize,
    ) -> Result<Self, ProviderError>
    where
        S: InheritanceSource + ?Sized,
    {
        let mut collector = Collector {
            source,
            max_depth,
            built: HashMap::new(),
            path: Vec::new(),
        };
        let mut tree = RoleTree::new();
        for role in roles {
            if tree.contains(role.as_str()) {
                continue;
            }
            if let Some((inherited, _)) = collector.expand(role.clone()).await? {
                tree.insert(role, inherited);
            }
        }
        Ok(tree)
    }
}

impl FromIterator<(RoleName, RoleTree)> for RoleTree {
    fn from_iter<I: IntoIterator<Item = (RoleName, RoleTree)>>(iter: I) -> Self {
        Self {
            roles: iter
                .into_iter()
                .map(|(role, inherited)| (role, Arc::new(inherited)))
                .collect(),
        }
    }
}

impl FromIterator<(RoleName, Arc<RoleTree>)> for RoleTree {
    fn from_iter<I: IntoIterator<Item = (RoleName, Arc<RoleTree>)>>(iter: I) -> Self {
        Self {
            roles: iter.into_iter().collect(),
        }
    }
}

impl From<HashMap<RoleName, RoleTree>> for RoleTree {
    fn from(roles: HashMap<RoleName, RoleTree>) -> Self {
        roles.into_iter().collect()
    }
}

/// Lookup of the roles a role inherits, used by [`RoleTree::collect`].
#[async_trait]
pub trait InheritanceSource: Send + Sync {
    /// Returns the inherited roles, or `None` when the role is unknown.
    async fn inherited(&self, role: &RoleName) -> Result<Option<Vec<RoleName>>, ProviderError>;
}

struct Collector<'a, S: ?Sized> {
    source: &'a S,
    max_depth: usize,
    built: HashMap<RoleName, Arc<RoleTree>>,
    path: Vec<RoleName>,
}

impl<'a, S> Collector<'a, S>
where
    S: InheritanceSource + ?Sized,
{
    /// Expands one role below the current path.
    ///
    /// Returns the subtree together with the shallowest path index a cycle
    /// was cut at. A subtree is reused only when none of its cuts point
    /// above the role itself, so reuse never hides a reachable role.
    fn expand<'s>(
        &'s mut self,
        role: RoleName,
    ) -> BoxFuture<'s, Result<Option<(Arc<RoleTree>, usize)>, ProviderError>> {
        async move {
            if let Some(inherited) = self.built.get(&role) {
                return Ok(Some((Arc::clone(inherited), usize::MAX)));
            }
            if self.path.len() >= self.max_depth {
                return Err(Box::new(Error::DepthExceeded {
                    role,
                    max_depth: self.max_depth,
                }) as ProviderError);
            }
            let Some(inherited) = self.source.inherited(&role).await? else {
                return Ok(None);
            };

            let position = self.path.len();
            self.path.push(role.clone());
            let mut children = RoleTree::new();
            let mut cut = usize::MAX;
            for child in inherited {
                if children.contains(child.as_str()) {
                    continue;
                }
                if let Some(index) = self.path.iter().position(|ancestor| *ancestor == child) {
                    cut = cut.min(index);
                    continue;
                }
                if let Some((subtree, child_cut)) = self.expand(child.clone()).await? {
                    cut = cut.min(child_cut);
                    children.insert(child, subtree);
                }
            }
            self.path.pop();

            let children = Arc::new(children);
            if cut >= position {
                self.built.insert(role, Arc::clone(&children));
            }
            Ok(Some((children, cut)))
        }
        .boxed()
    }
}
