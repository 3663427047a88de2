use crate::attribute::{AttributeContext, AttributeRegistry, AttributeVerdict};
use crate::error::Error;
use crate::provider::Provider;
use crate::report::{FailureStage, Reporter};
use crate::tree::RoleTree;
use crate::types::{Params, RoleName, SubjectId};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Removes roles whose attributes do not hold, together with everything
/// they inherit.
///
/// The tree is walked level by level. All roles of a level not judged yet
/// are evaluated in parallel, then the children of surviving roles form the
/// next level. A role is evaluated at most once per call, however many
/// branches reach it, and roles below a removed role are never evaluated
/// through that branch.
pub(crate) struct AttributeFilter<'a> {
    registry: &'a AttributeRegistry,
    reporter: &'a Reporter<'a>,
}

impl<'a> AttributeFilter<'a> {
    pub(crate) fn new(registry: &'a AttributeRegistry, reporter: &'a Reporter<'a>) -> Self {
        Self { registry, reporter }
    }

    /// Returns a new tree holding only the roles whose attributes pass.
    pub(crate) async fn filter(
        &self,
        provider: &dyn Provider,
        subject: &SubjectId,
        tree: &RoleTree,
        params: &Arc<Params>,
    ) -> RoleTree {
        let mut verdicts: HashMap<RoleName, bool> = HashMap::new();
        let mut expanded: HashSet<usize> = HashSet::new();
        let mut level: Vec<&RoleTree> = vec![tree];

        while !level.is_empty() {
            let pending: HashSet<&RoleName> = level
                .iter()
                .flat_map(|tree| tree.roles())
                .filter(|role| !verdicts.contains_key(*role))
                .collect();
            let evaluated = join_all(pending.into_iter().map(|role| async move {
                let allowed = self.role_allowed(provider, subject, role, params).await;
                (role.clone(), allowed)
            }))
            .await;
            verdicts.extend(evaluated);

            level = level
                .into_iter()
                .flat_map(|tree| tree.iter())
                .filter(|(role, inherited)| {
                    !inherited.is_empty() && verdicts.get(*role).copied().unwrap_or(false)
                })
                .map(|(_, inherited)| inherited)
                .filter(|inherited| expanded.insert(inherited.node_key()))
                .collect();
        }

        prune(tree, &verdicts, &mut HashMap::new())
    }

    async fn role_allowed(
        &self,
        provider: &dyn Provider,
        subject: &SubjectId,
        role: &RoleName,
        params: &Arc<Params>,
    ) -> bool {
        let names = match provider.attributes(role).await {
            Ok(names) => names,
            Err(error) => {
                self.reporter
                    .report(Some(role), FailureStage::Attributes, Error::Provider(error));
                return false;
            }
        };
        if names.is_empty() {
            return true;
        }

        let context = AttributeContext::new(subject.clone(), role.clone(), Arc::clone(params));
        let verdicts = join_all(
            names
                .iter()
                .map(|name| self.registry.validate(name, &context)),
        )
        .await;

        let mut allowed = true;
        for (name, verdict) in names.iter().zip(verdicts) {
            match verdict {
                Ok(AttributeVerdict::Fail) => {
                    tracing::debug!(subject = %subject, role = %role, attribute = %name, "attribute denied role");
                    allowed = false;
                }
                Ok(AttributeVerdict::Pass | AttributeVerdict::Absent) => {}
                Err(error) => {
                    self.reporter
                        .report(Some(role), FailureStage::Attributes, error);
                    allowed = false;
                }
            }
        }
        allowed
    }
}

fn prune(
    tree: &RoleTree,
    verdicts: &HashMap<RoleName, bool>,
    pruned: &mut HashMap<usize, Arc<RoleTree>>,
) -> RoleTree {
    let mut kept = RoleTree::new();
    for (role, inherited) in tree.iter() {
        if !verdicts.get(role).copied().unwrap_or(false) {
            continue;
        }
        let key = inherited.node_key();
        let subtree = match pruned.get(&key) {
            Some(subtree) => Arc::clone(subtree),
            None => {
                let subtree = Arc::new(prune(inherited, verdicts, pruned));
                pruned.insert(key, Arc::clone(&subtree));
                subtree
            }
        };
        kept.insert(role.clone(), subtree);
    }
    kept
}
