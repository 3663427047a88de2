//! Hierarchical RBAC permission checks.
//!
//! Roles come from pluggable async [`Provider`]s as inheritance trees. Each
//! role may be gated by named [`Attribute`] predicates evaluated against the
//! subject, the role and caller parameters. A check answers with a
//! [`Decision`]: denied, or granted at a priority equal to the inheritance
//! depth of the least specific role needed, so lower means more direct.
//!
//! Provider and attribute failures are isolated: they are reported to
//! [`ErrorListener`]s and through `tracing`, remove only their own
//! contribution, and never fail a check. Only malformed input is an error.
//!
//! # Examples
//!
//! Checking permissions against static JSON rules (enable `json-provider`):
//! ```no_run
//! # #[cfg(feature = "json-provider")]
//! # {
//! use rs_rbac::{Checker, Decision, JsonProvider, Params, SubjectId};
//! use futures::executor::block_on;
//!
//! let provider = JsonProvider::from_json(r#"{
//!     "roles": {
//!         "reader": { "permissions": ["read"] },
//!         "writer": { "permissions": ["create"], "inherited": ["reader"] }
//!     },
//!     "users": { "john.smith": ["writer"] }
//! }"#).unwrap();
//! let checker = Checker::builder().provider(provider).build();
//! let subject = SubjectId::try_from("john.smith").unwrap();
//!
//! let decision = block_on(checker.check(&subject, "read", Params::new()).unwrap());
//! assert_eq!(decision, Decision::Granted(2));
//! # }
//! ```
//!
//! Gating a role with an attribute:
//! ```no_run
//! use rs_rbac::{AttributeContext, AttributeRegistry, from_fn};
//!
//! let mut attributes = AttributeRegistry::new();
//! attributes
//!     .set("weekday", from_fn(|ctx: &AttributeContext| ctx.param("weekday").cloned().unwrap_or_default()))
//!     .unwrap();
//! # let _ = attributes;
//! ```
#![forbid(unsafe_code)]

mod attribute;
mod checker;
mod error;
mod filter;
mod matcher;
mod permission;
mod provider;
mod report;
mod resolver;
mod tree;
mod types;

#[cfg(feature = "json-provider")]
mod json_provider;

pub use crate::attribute::{
    Attribute, AttributeContext, AttributeRegistry, AttributeVerdict, FnAttribute,
    MissingAttributePolicy, TryFnAttribute, from_fn, is_truthy, try_from_fn,
};
pub use crate::checker::{CheckReport, Checker, CheckerBuilder, Decision};
pub use crate::error::{AttributeError, Error, ProviderError, Result};
pub use crate::permission::{IntoPermissionExpr, Permission, PermissionExpr};
pub use crate::provider::Provider;
pub use crate::report::{CheckFailure, ErrorListener, FailureStage};
pub use crate::resolver::RolePriorities;
pub use crate::tree::{DEFAULT_MAX_INHERIT_DEPTH, InheritanceSource, RoleTree};
pub use crate::types::{Params, RoleName, SubjectId};

#[cfg(feature = "json-provider")]
pub use crate::json_provider::{JsonProvider, JsonRules, RoleRules};
