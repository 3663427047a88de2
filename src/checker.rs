use crate::attribute::AttributeRegistry;
use crate::error::Result;
use crate::filter::AttributeFilter;
use crate::matcher::PermissionMatcher;
use crate::permission::{IntoPermissionExpr, PermissionExpr};
use crate::provider::Provider;
use crate::report::{CheckFailure, ErrorListener, Reporter};
use crate::resolver::RoleResolver;
use crate::tree::DEFAULT_MAX_INHERIT_DEPTH;
use crate::types::{Params, SubjectId};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Access granted at the given priority. Lower is more specific; 1 means
    /// a directly assigned role carries the permissions.
    Granted(u32),
    /// No role grants the requested permissions.
    Denied,
}

impl Decision {
    /// Returns the priority of a granted decision.
    pub fn priority(self) -> Option<u32> {
        match self {
            Self::Granted(priority) => Some(priority),
            Self::Denied => None,
        }
    }

    /// Returns whether access is granted.
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// Numeric form: the priority, or NaN when denied.
    pub fn as_f64(self) -> f64 {
        self.priority().map_or(f64::NAN, f64::from)
    }
}

impl From<Option<u32>> for Decision {
    fn from(priority: Option<u32>) -> Self {
        priority.map_or(Self::Denied, Self::Granted)
    }
}

/// Decision together with the isolated failures met while computing it.
#[derive(Debug)]
pub struct CheckReport {
    decision: Decision,
    failures: Vec<CheckFailure>,
}

impl CheckReport {
    /// Final decision.
    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// Failures reported during the check, in no particular order.
    pub fn failures(&self) -> &[CheckFailure] {
        &self.failures
    }

    /// Splits the report into its parts.
    pub fn into_parts(self) -> (Decision, Vec<CheckFailure>) {
        (self.decision, self.failures)
    }
}

/// Permission checker over pluggable providers and attribute predicates.
pub struct Checker {
    providers: Vec<Arc<dyn Provider>>,
    attributes: AttributeRegistry,
    listeners: Vec<Arc<dyn ErrorListener>>,
    max_inherit_depth: usize,
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker")
            .field("providers", &self.providers.len())
            .field("attributes", &self.attributes)
            .field("listeners", &self.listeners.len())
            .field("max_inherit_depth", &self.max_inherit_depth)
            .finish()
    }
}

/// Builder for [`Checker`].
pub struct CheckerBuilder {
    providers: Vec<Arc<dyn Provider>>,
    attributes: AttributeRegistry,
    listeners: Vec<Arc<dyn ErrorListener>>,
    max_inherit_depth: usize,
}

impl Default for CheckerBuilder {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            attributes: AttributeRegistry::default(),
            listeners: Vec::new(),
            max_inherit_depth: DEFAULT_MAX_INHERIT_DEPTH,
        }
    }
}

impl CheckerBuilder {
    /// Creates a builder without providers and with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deepest accepted role tree, counting directly assigned roles
    /// as 1. A provider returning a deeper tree contributes no roles and the
    /// overflow is reported as a failure.
    pub fn max_inherit_depth(mut self, depth: usize) -> Self {
        self.max_inherit_depth = depth;
        self
    }

    /// Adds a provider.
    pub fn provider(self, provider: impl Provider + 'static) -> Self {
        self.shared_provider(Arc::new(provider))
    }

    /// Adds a shared provider. Adding the same instance twice has no effect.
    pub fn shared_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        push_provider(&mut self.providers, provider);
        self
    }

    /// Sets the attribute registry.
    pub fn attributes(mut self, attributes: AttributeRegistry) -> Self {
        self.attributes = attributes;
        self
    }

    /// Adds a closure notified of every isolated failure.
    pub fn on_error<F>(self, listener: F) -> Self
    where
        F: Fn(&CheckFailure) + Send + Sync + 'static,
    {
        self.listener(listener)
    }

    /// Adds a failure listener.
    pub fn listener(mut self, listener: impl ErrorListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Builds the checker.
    pub fn build(self) -> Checker {
        Checker {
            providers: self.providers,
            attributes: self.attributes,
            listeners: self.listeners,
            max_inherit_depth: self.max_inherit_depth,
        }
    }
}

fn push_provider(providers: &mut Vec<Arc<dyn Provider>>, provider: Arc<dyn Provider>) -> bool {
    if providers
        .iter()
        .any(|known| std::ptr::addr_eq(Arc::as_ptr(known), Arc::as_ptr(&provider)))
    {
        return false;
    }
    providers.push(provider);
    true
}

impl Checker {
    /// Starts building a checker.
    pub fn builder() -> CheckerBuilder {
        CheckerBuilder::new()
    }

    /// Registered providers.
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Adds a provider, returning `false` when the instance is already registered.
    pub fn add_provider(&mut self, provider: Arc<dyn Provider>) -> bool {
        push_provider(&mut self.providers, provider)
    }

    /// Attribute registry.
    pub fn attributes(&self) -> &AttributeRegistry {
        &self.attributes
    }

    /// Mutable attribute registry. Exclusive access guarantees no check is
    /// running while registrations change.
    pub fn attributes_mut(&mut self) -> &mut AttributeRegistry {
        &mut self.attributes
    }

    /// Adds a failure listener.
    pub fn add_listener(&mut self, listener: Arc<dyn ErrorListener>) {
        self.listeners.push(listener);
    }

    /// Checks whether `subject` holds `permissions`.
    ///
    /// The expression is parsed before this returns, so malformed input fails
    /// here rather than inside the future. Provider and attribute failures
    /// never fail the future; they are reported to listeners and only remove
    /// their own contribution.
    pub fn check<'a, E>(
        &'a self,
        subject: &'a SubjectId,
        permissions: E,
        params: Params,
    ) -> Result<BoxFuture<'a, Decision>>
    where
        E: IntoPermissionExpr,
    {
        let expr = permissions.into_permission_expr()?;
        Ok(async move { self.evaluate(subject, &expr, params).await.decision }.boxed())
    }

    /// Evaluates a parsed expression and returns the decision with every
    /// isolated failure.
    pub async fn evaluate(
        &self,
        subject: &SubjectId,
        expr: &PermissionExpr,
        params: Params,
    ) -> CheckReport {
        if self.providers.is_empty() {
            tracing::debug!(subject = %subject, "no provider registered, denying");
            return CheckReport {
                decision: Decision::Denied,
                failures: Vec::new(),
            };
        }

        let params = Arc::new(params);
        let reporter = Reporter::new(subject, &self.listeners);
        let decision = {
            let filter = AttributeFilter::new(&self.attributes, &reporter);
            let roles =
                RoleResolver::new(&self.providers, filter, &reporter, self.max_inherit_depth)
                    .resolve(subject, &params)
                    .await;
            if roles.is_empty() {
                Decision::Denied
            } else {
                PermissionMatcher::new(&self.providers, &reporter)
                    .best_priority(&roles, expr)
                    .await
                    .into()
            }
        };

        tracing::debug!(
            subject = %subject,
            permissions = %expr,
            decision = ?decision,
            "permission check finished"
        );
        CheckReport {
            decision,
            failures: reporter.into_failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeContext, from_fn};
    use crate::error::{Error, ProviderError};
    use crate::permission::Permission;
    use crate::report::FailureStage;
    use crate::tree::RoleTree;
    use crate::types::RoleName;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default, Clone)]
    struct TestProvider {
        tree: RoleTree,
        permissions: HashMap<RoleName, Vec<Permission>>,
        attributes: HashMap<RoleName, Vec<String>>,
        fail_roles: bool,
    }

    #[async_trait]
    impl Provider for TestProvider {
        async fn roles(&self, _subject: &SubjectId) -> std::result::Result<RoleTree, ProviderError> {
            if self.fail_roles {
                return Err("role store offline".into());
            }
            Ok(self.tree.clone())
        }

        async fn permissions(
            &self,
            role: &RoleName,
        ) -> std::result::Result<Vec<Permission>, ProviderError> {
            Ok(self.permissions.get(role).cloned().unwrap_or_default())
        }

        async fn attributes(&self, role: &RoleName) -> std::result::Result<Vec<String>, ProviderError> {
            Ok(self.attributes.get(role).cloned().unwrap_or_default())
        }
    }

    fn role(name: &str) -> RoleName {
        RoleName::try_from(name).unwrap()
    }

    fn permissions(names: &[&str]) -> Vec<Permission> {
        names
            .iter()
            .map(|name| Permission::try_from(*name).unwrap())
            .collect()
    }

    fn tester_provider() -> TestProvider {
        let mut provider = TestProvider {
            tree: RoleTree::new().with_role(role("tester"), RoleTree::new().with_leaf(role("dummy"))),
            ..TestProvider::default()
        };
        provider
            .permissions
            .insert(role("tester"), permissions(&["test", "read"]));
        provider
            .permissions
            .insert(role("dummy"), permissions(&["idle"]));
        provider
    }

    fn subject() -> SubjectId {
        SubjectId::try_from("tester").unwrap()
    }

    fn check(checker: &Checker, expr: &str) -> Decision {
        block_on(checker.check(&subject(), expr, Params::new()).unwrap())
    }

    #[test]
    fn check_should_grant_by_depth() {
        let checker = Checker::builder().provider(tester_provider()).build();

        assert_eq!(check(&checker, "test"), Decision::Granted(1));
        assert_eq!(check(&checker, "idle"), Decision::Granted(2));
        assert_eq!(check(&checker, "missing"), Decision::Denied);
    }

    #[test]
    fn check_should_accept_any_alternative() {
        let checker = Checker::builder().provider(tester_provider()).build();

        assert_eq!(check(&checker, "idle, missing"), Decision::Granted(2));
        assert_eq!(check(&checker, "idle, test"), Decision::Granted(1));
    }

    #[test]
    fn check_should_require_every_conjunct() {
        let checker = Checker::builder().provider(tester_provider()).build();

        assert_eq!(check(&checker, "test && idle"), Decision::Granted(2));
        assert_eq!(check(&checker, "test && missing"), Decision::Denied);
    }

    #[test]
    fn check_should_reject_malformed_expression_eagerly() {
        let checker = Checker::builder().provider(tester_provider()).build();
        let subject = subject();

        let result = checker.check(&subject, " , && ", Params::new());

        assert!(matches!(result, Err(Error::InvalidPermission(_))));
    }

    #[test]
    fn check_should_deny_without_providers() {
        let checker = Checker::builder().build();

        assert_eq!(check(&checker, "test"), Decision::Denied);
    }

    #[test]
    fn check_should_deny_when_attribute_fails() {
        let mut provider = tester_provider();
        provider
            .attributes
            .insert(role("tester"), vec!["test_attribute".to_string()]);
        let mut attributes = AttributeRegistry::new();
        attributes
            .set(
                "test_attribute",
                from_fn(|ctx: &AttributeContext| ctx.role().as_str() != "tester"),
            )
            .unwrap();
        let checker = Checker::builder()
            .provider(provider)
            .attributes(attributes)
            .build();

        assert_eq!(check(&checker, "test"), Decision::Denied);
        assert_eq!(check(&checker, "idle"), Decision::Denied);
    }

    #[test]
    fn check_should_pass_params_to_attributes() {
        let mut provider = tester_provider();
        provider
            .attributes
            .insert(role("dummy"), vec!["flag".to_string()]);
        let mut attributes = AttributeRegistry::new();
        attributes
            .set(
                "flag",
                from_fn(|ctx: &AttributeContext| ctx.param("enabled").cloned().unwrap_or_default()),
            )
            .unwrap();
        let checker = Checker::builder()
            .provider(provider)
            .attributes(attributes)
            .build();
        let subject = subject();

        let enabled = Params::from([("enabled".to_string(), serde_json::json!(true))]);
        let granted = block_on(checker.check(&subject, "idle", enabled).unwrap());
        let denied = block_on(checker.check(&subject, "idle", Params::new()).unwrap());

        assert_eq!(granted, Decision::Granted(2));
        assert_eq!(denied, Decision::Denied);
    }

    #[test]
    fn failing_provider_should_be_isolated() {
        let broken = TestProvider {
            fail_roles: true,
            ..TestProvider::default()
        };
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let checker = Checker::builder()
            .provider(broken)
            .provider(tester_provider())
            .on_error(move |failure: &CheckFailure| {
                assert_eq!(failure.stage(), FailureStage::Roles);
                assert!(failure.role().is_none());
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        assert_eq!(check(&checker, "test"), Decision::Granted(1));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn evaluate_should_report_failures() {
        let broken = TestProvider {
            fail_roles: true,
            ..TestProvider::default()
        };
        let checker = Checker::builder().provider(broken).build();
        let expr = PermissionExpr::parse("test").unwrap();

        let report = block_on(checker.evaluate(&subject(), &expr, Params::new()));

        assert_eq!(report.decision(), Decision::Denied);
        assert_eq!(report.failures().len(), 1);
        assert!(matches!(report.failures()[0].error(), Error::Provider(_)));
    }

    #[test]
    fn providers_should_merge_best_depth() {
        let deep = TestProvider {
            tree: RoleTree::new().with_role(role("lead"), RoleTree::new().with_leaf(role("editor"))),
            ..TestProvider::default()
        };
        let mut direct = TestProvider {
            tree: RoleTree::new().with_leaf(role("editor")),
            ..TestProvider::default()
        };
        direct
            .permissions
            .insert(role("editor"), permissions(&["write"]));
        let checker = Checker::builder().provider(deep).provider(direct).build();

        assert_eq!(check(&checker, "write"), Decision::Granted(1));
    }

    #[test]
    fn shared_provider_should_register_once() {
        let provider: Arc<dyn Provider> = Arc::new(tester_provider());
        let mut checker = Checker::builder()
            .shared_provider(Arc::clone(&provider))
            .shared_provider(Arc::clone(&provider))
            .build();

        assert_eq!(checker.providers().len(), 1);
        assert!(!checker.add_provider(provider));
    }

    #[test]
    fn attributes_mut_should_affect_later_checks() {
        let mut provider = tester_provider();
        provider
            .attributes
            .insert(role("tester"), vec!["open".to_string()]);
        let mut checker = Checker::builder().provider(provider).build();

        assert_eq!(check(&checker, "test"), Decision::Denied);

        checker
            .attributes_mut()
            .set("open", from_fn(|_: &AttributeContext| true))
            .unwrap();

        assert_eq!(check(&checker, "test"), Decision::Granted(1));
    }

    #[test]
    fn decision_should_expose_numeric_form() {
        assert_eq!(Decision::Granted(3).as_f64(), 3.0);
        assert!(Decision::Denied.as_f64().is_nan());
        assert_eq!(Decision::from(None::<u32>), Decision::Denied);
    }

    #[test]
    fn tree_deeper_than_limit_should_be_reported() {
        let checker = Checker::builder()
            .provider(tester_provider())
            .max_inherit_depth(1)
            .build();
        let expr = PermissionExpr::parse("test").unwrap();

        let report = block_on(checker.evaluate(&subject(), &expr, Params::new()));

        assert_eq!(report.decision(), Decision::Denied);
        assert_eq!(report.failures().len(), 1);
        assert!(matches!(
            report.failures()[0].error(),
            Error::DepthExceeded { role, max_depth: 1 } if role.as_str() == "dummy"
        ));

        let relaxed = Checker::builder()
            .provider(tester_provider())
            .max_inherit_depth(2)
            .build();
        assert_eq!(check(&relaxed, "idle"), Decision::Granted(2));
    }
}
