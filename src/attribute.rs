use crate::error::{AttributeError, Error, Result};
use crate::types::{Params, RoleName, SubjectId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Context handed to attribute predicates.
#[derive(Debug, Clone)]
pub struct AttributeContext {
    subject: SubjectId,
    role: RoleName,
    params: Arc<Params>,
}

impl AttributeContext {
    /// Creates a context for one role of a subject.
    pub fn new(subject: SubjectId, role: RoleName, params: Arc<Params>) -> Self {
        Self {
            subject,
            role,
            params,
        }
    }

    /// Subject being checked.
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Role whose attribute is evaluated.
    pub fn role(&self) -> &RoleName {
        &self.role
    }

    /// Caller-supplied parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns a single parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

/// Named predicate gating whether a role is active for a check.
///
/// The returned value is coerced with [`is_truthy`]. Returning an error is
/// a failure, reported separately from a legitimate falsy value; both deny
/// the role.
#[async_trait]
pub trait Attribute: Send + Sync {
    /// Evaluates the predicate.
    async fn evaluate(&self, context: &AttributeContext) -> std::result::Result<Value, AttributeError>;
}

/// Attribute backed by an infallible closure. See [`from_fn`].
pub struct FnAttribute<F>(F);

/// Attribute backed by a fallible closure. See [`try_from_fn`].
pub struct TryFnAttribute<F>(F);

/// Wraps a synchronous closure as an [`Attribute`].
pub fn from_fn<F, V>(f: F) -> FnAttribute<F>
where
    F: Fn(&AttributeContext) -> V + Send + Sync,
    V: Into<Value> + 'static,
{
    FnAttribute(f)
}

/// Wraps a synchronous fallible closure as an [`Attribute`].
pub fn try_from_fn<F, V>(f: F) -> TryFnAttribute<F>
where
    F: Fn(&AttributeContext) -> std::result::Result<V, AttributeError> + Send + Sync,
    V: Into<Value> + 'static,
{
    TryFnAttribute(f)
}

#[async_trait]
impl<F, V> Attribute for FnAttribute<F>
where
    F: Fn(&AttributeContext) -> V + Send + Sync,
    V: Into<Value> + 'static,
{
    async fn evaluate(&self, context: &AttributeContext) -> std::result::Result<Value, AttributeError> {
        Ok((self.0)(context).into())
    }
}

#[async_trait]
impl<F, V> Attribute for TryFnAttribute<F>
where
    F: Fn(&AttributeContext) -> std::result::Result<V, AttributeError> + Send + Sync,
    V: Into<Value> + 'static,
{
    async fn evaluate(&self, context: &AttributeContext) -> std::result::Result<Value, AttributeError> {
        (self.0)(context).map(Into::into)
    }
}

/// Truthiness rule applied to attribute results.
///
/// `null`, `false`, zero, NaN and the empty string are falsy. Everything
/// else, including empty arrays and objects, is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number
            .as_f64()
            .is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// How the registry treats attribute names it does not know.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingAttributePolicy {
    /// The attribute fails silently and the role is denied.
    #[default]
    Deny,
    /// The attribute is treated as absent and the role stays active.
    Ignore,
    /// Validation returns [`Error::UnknownAttribute`].
    Error,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeVerdict {
    /// The predicate returned a truthy value.
    Pass,
    /// The predicate returned a falsy value, or the attribute is missing
    /// under [`MissingAttributePolicy::Deny`].
    Fail,
    /// The attribute is missing under [`MissingAttributePolicy::Ignore`].
    Absent,
}

impl AttributeVerdict {
    /// Returns whether the verdict keeps the role active.
    pub fn allows(self) -> bool {
        !matches!(self, Self::Fail)
    }
}

/// Registry of named attribute predicates.
///
/// The registry is read-only during a check. Mutating it requires exclusive
/// access, so hosts sharing a checker across tasks decide themselves when
/// registrations change.
#[derive(Clone, Default)]
pub struct AttributeRegistry {
    attributes: HashMap<String, Arc<dyn Attribute>>,
    policy: MissingAttributePolicy,
}

impl fmt::Debug for AttributeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("AttributeRegistry")
            .field("attributes", &names)
            .field("policy", &self.policy)
            .finish()
    }
}

impl AttributeRegistry {
    /// Creates an empty registry denying unknown attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy for unknown attributes.
    pub fn with_policy(mut self, policy: MissingAttributePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shorthand for the two classic policies: `true` denies unknown
    /// attributes silently, `false` reports them as errors.
    pub fn ignore_missing_attributes(self, ignore: bool) -> Self {
        self.with_policy(if ignore {
            MissingAttributePolicy::Deny
        } else {
            MissingAttributePolicy::Error
        })
    }

    /// Returns the policy for unknown attributes.
    pub fn policy(&self) -> MissingAttributePolicy {
        self.policy
    }

    /// Changes the policy for unknown attributes.
    pub fn set_policy(&mut self, policy: MissingAttributePolicy) {
        self.policy = policy;
    }

    /// Registers an attribute, replacing any previous one with that name.
    pub fn set(
        &mut self,
        name: impl AsRef<str>,
        attribute: impl Attribute + 'static,
    ) -> Result<&mut Self> {
        self.set_shared(name, Arc::new(attribute))
    }

    /// Registers a shared attribute, replacing any previous one with that name.
    pub fn set_shared(
        &mut self,
        name: impl AsRef<str>,
        attribute: Arc<dyn Attribute>,
    ) -> Result<&mut Self> {
        let name = attribute_name(name.as_ref())?;
        self.attributes.insert(name.to_string(), attribute);
        Ok(self)
    }

    /// Unregisters an attribute and returns it, if it was registered.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Attribute>> {
        self.attributes.remove(name.trim())
    }

    /// Returns a registered attribute.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Attribute>> {
        self.attributes.get(name.trim())
    }

    /// Returns whether an attribute is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name.trim())
    }

    /// Iterates over registered attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Number of registered attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns whether no attribute is registered.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Evaluates an attribute against a context.
    pub async fn validate(&self, name: &str, context: &AttributeContext) -> Result<AttributeVerdict> {
        let name = attribute_name(name)?;
        let Some(attribute) = self.attributes.get(name) else {
            return match self.policy {
                MissingAttributePolicy::Deny => Ok(AttributeVerdict::Fail),
                MissingAttributePolicy::Ignore => Ok(AttributeVerdict::Absent),
                MissingAttributePolicy::Error => Err(Error::UnknownAttribute(name.to_string())),
            };
        };

        let value = attribute
            .evaluate(context)
            .await
            .map_err(|source| Error::Attribute {
                name: name.to_string(),
                source,
            })?;
        Ok(if is_truthy(&value) {
            AttributeVerdict::Pass
        } else {
            AttributeVerdict::Fail
        })
    }
}

fn attribute_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidAttribute(
            "attribute name must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}
