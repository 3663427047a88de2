use crate::error::Error;
use crate::types::{RoleName, SubjectId};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Stage of a check in which a collaborator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    /// Fetching the role tree of the subject.
    Roles,
    /// Fetching or evaluating the attributes of a role.
    Attributes,
    /// Fetching the permissions of a role.
    Permissions,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Roles => "roles",
            Self::Attributes => "attributes",
            Self::Permissions => "permissions",
        })
    }
}

/// Isolated provider or attribute failure observed during a check.
///
/// The failure only removed its own contribution; the check carried on.
#[derive(Debug)]
pub struct CheckFailure {
    subject: SubjectId,
    role: Option<RoleName>,
    stage: FailureStage,
    error: Error,
}

impl CheckFailure {
    /// Subject being checked.
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Role concerned, or `None` when the failure covers every role of the subject.
    pub fn role(&self) -> Option<&RoleName> {
        self.role.as_ref()
    }

    /// Stage that failed.
    pub fn stage(&self) -> FailureStage {
        self.stage
    }

    /// Underlying error.
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Consumes the failure and returns the underlying error.
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.role {
            Some(role) => write!(
                f,
                "{} failed for subject {} role {}: {}",
                self.stage, self.subject, role, self.error
            ),
            None => write!(
                f,
                "{} failed for subject {}: {}",
                self.stage, self.subject, self.error
            ),
        }
    }
}

/// Observer notified of every isolated failure as it happens.
///
/// Listeners are purely observational; a check never depends on them.
pub trait ErrorListener: Send + Sync {
    /// Called once per failure.
    fn on_error(&self, failure: &CheckFailure);
}

impl<F> ErrorListener for F
where
    F: Fn(&CheckFailure) + Send + Sync,
{
    fn on_error(&self, failure: &CheckFailure) {
        self(failure)
    }
}

/// Per-check failure sink.
pub(crate) struct Reporter<'a> {
    subject: &'a SubjectId,
    listeners: &'a [Arc<dyn ErrorListener>],
    failures: Mutex<Vec<CheckFailure>>,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(subject: &'a SubjectId, listeners: &'a [Arc<dyn ErrorListener>]) -> Self {
        Self {
            subject,
            listeners,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn report(&self, role: Option<&RoleName>, stage: FailureStage, error: Error) {
        let failure = CheckFailure {
            subject: self.subject.clone(),
            role: role.cloned(),
            stage,
            error,
        };
        tracing::warn!(
            subject = %failure.subject,
            role = failure.role.as_ref().map(RoleName::as_str).unwrap_or("*"),
            stage = %failure.stage,
            error = %failure.error,
            "isolated check failure"
        );
        for listener in self.listeners {
            listener.on_error(&failure);
        }
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    pub(crate) fn into_failures(self) -> Vec<CheckFailure> {
        self.failures
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
