use crate::error::Error;
use crate::filter::AttributeFilter;
use crate::provider::Provider;
use crate::report::{FailureStage, Reporter};
use crate::tree::RoleTree;
use crate::types::{Params, RoleName, SubjectId};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Role name -> priority (inheritance depth, 1 = directly assigned).
pub type RolePriorities = HashMap<RoleName, u32>;

/// Resolves the attribute-filtered roles of a subject across providers.
pub(crate) struct RoleResolver<'a> {
    providers: &'a [Arc<dyn Provider>],
    filter: AttributeFilter<'a>,
    reporter: &'a Reporter<'a>,
    max_depth: usize,
}

impl<'a> RoleResolver<'a> {
    pub(crate) fn new(
        providers: &'a [Arc<dyn Provider>],
        filter: AttributeFilter<'a>,
        reporter: &'a Reporter<'a>,
        max_depth: usize,
    ) -> Self {
        Self {
            providers,
            filter,
            reporter,
            max_depth,
        }
    }

    /// Resolves every provider in parallel and keeps the best priority per role.
    pub(crate) async fn resolve(&self, subject: &SubjectId, params: &Arc<Params>) -> RolePriorities {
        let resolved = join_all(
            self.providers
                .iter()
                .map(|provider| self.resolve_with(provider.as_ref(), subject, params)),
        )
        .await;

        let mut priorities = RolePriorities::new();
        for roles in resolved {
            merge(&mut priorities, roles);
        }
        tracing::trace!(subject = %subject, roles = priorities.len(), "resolved roles");
        priorities
    }

    async fn resolve_with(
        &self,
        provider: &dyn Provider,
        subject: &SubjectId,
        params: &Arc<Params>,
    ) -> RolePriorities {
        let tree = match provider.roles(subject).await {
            Ok(tree) => tree,
            Err(error) => {
                self.reporter
                    .report(None, FailureStage::Roles, Error::Provider(error));
                return RolePriorities::new();
            }
        };
        if tree.is_empty() {
            return RolePriorities::new();
        }
        if let Some(role) = tree.deeper_than(self.max_depth) {
            self.reporter.report(
                None,
                FailureStage::Roles,
                Error::DepthExceeded {
                    role: role.clone(),
                    max_depth: self.max_depth,
                },
            );
            return RolePriorities::new();
        }

        self.filter
            .filter(provider, subject, &tree, params)
            .await
            .priorities()
    }
}

/// Flattens a role tree breadth-first starting at depth 1.
///
/// Every role gets the depth of the first level it appears on, which is the
/// shortest path to it. A subtree shared by several parents is expanded
/// once.
pub(crate) fn flatten(tree: &RoleTree) -> RolePriorities {
    let mut priorities = RolePriorities::new();
    let mut expanded = HashSet::new();
    let mut level = vec![tree];
    let mut depth = 1;

    while !level.is_empty() {
        let mut next = Vec::new();
        for node in level {
            for (role, inherited) in node.iter() {
                priorities.entry(role.clone()).or_insert(depth);
                if !inherited.is_empty() && expanded.insert(inherited.node_key()) {
                    next.push(inherited);
                }
            }
        }
        level = next;
        depth += 1;
    }
    priorities
}

/// Merges `other` into `into`, keeping the smallest priority per role.
pub(crate) fn merge(into: &mut RolePriorities, other: RolePriorities) {
    for (role, priority) in other {
        into.entry(role)
            .and_modify(|best| *best = (*best).min(priority))
            .or_insert(priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> RoleName {
        RoleName::try_from(name).unwrap()
    }

    #[test]
    fn flatten_should_count_depth_from_one() {
        let tree = RoleTree::new().with_role(
            role("writer"),
            RoleTree::new().with_role(role("reader"), RoleTree::new().with_leaf(role("guest"))),
        );

        let priorities = flatten(&tree);

        assert_eq!(priorities.get("writer"), Some(&1));
        assert_eq!(priorities.get("reader"), Some(&2));
        assert_eq!(priorities.get("guest"), Some(&3));
    }

    #[test]
    fn flatten_should_keep_shallowest_path() {
        // guest is reachable at depth 4 through the chain and at depth 2 via admin
        let tree = RoleTree::new()
            .with_role(
                role("writer"),
                RoleTree::new().with_role(
                    role("reader"),
                    RoleTree::new().with_role(
                        role("member"),
                        RoleTree::new().with_leaf(role("guest")),
                    ),
                ),
            )
            .with_role(role("admin"), RoleTree::new().with_leaf(role("guest")));

        let priorities = flatten(&tree);

        assert_eq!(priorities.get("guest"), Some(&2));
        assert_eq!(priorities.get("member"), Some(&3));
    }

    #[test]
    fn flatten_should_improve_descendants_of_revisited_role() {
        let shared = RoleTree::new().with_role(role("shared"), RoleTree::new().with_leaf(role("leaf")));
        let tree = RoleTree::new()
            .with_role(role("deep"), RoleTree::new().with_role(role("mid"), shared.clone()))
            .with_role(role("shallow"), shared);

        let priorities = flatten(&tree);

        assert_eq!(priorities.get("shared"), Some(&2));
        assert_eq!(priorities.get("leaf"), Some(&3));
    }

    #[test]
    fn flatten_should_handle_diamonds() {
        let base = RoleTree::new().with_leaf(role("base"));
        let tree = RoleTree::new()
            .with_role(role("left"), base.clone())
            .with_role(role("right"), base);

        let priorities = flatten(&tree);

        assert_eq!(priorities.len(), 3);
        assert_eq!(priorities.get("base"), Some(&2));
    }

    #[test]
    fn merge_should_keep_minimum() {
        let mut into = RolePriorities::from([(role("a"), 3), (role("b"), 1)]);
        merge(
            &mut into,
            RolePriorities::from([(role("a"), 2), (role("b"), 4), (role("c"), 5)]),
        );

        assert_eq!(into.get("a"), Some(&2));
        assert_eq!(into.get("b"), Some(&1));
        assert_eq!(into.get("c"), Some(&5));
    }
}
