//! Error classification for replica operations
//!
//! Failures from a reconfiguration end up in one of a few outward classes. A
//! redirect names the metadata master to retry against; everything that is
//! neither a user error nor a permission problem is reported as internal.

use crate::common::Error;
use serde::{Deserialize, Serialize};

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Errno {
    EPERM,
    ENOENT,
    EINVAL,
    EAGAIN,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Errno,
    Redirect,
    InternalServerError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    PermissionDenied,
    Redirect { target: String },
    User(Errno),
    /// Quorum could not be reached; reported as internal
    TooFewResponses,
    Internal,
}

/// What the caller of a failed operation is told
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_type: ErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<Errno>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

impl ErrorRecord {
    pub fn errno(errno: Errno, message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Errno,
            errno: Some(errno),
            message: message.into(),
            redirect_to: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::InternalServerError,
            errno: None,
            message: message.into(),
            redirect_to: None,
        }
    }

    pub fn redirect(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            error_type: ErrorType::Redirect,
            errno: None,
            message: format!("redirect to {}", target),
            redirect_to: Some(target),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    /// Where to redirect when the error does not name a target
    fallback_redirect: Option<String>,
}

impl ErrorClassifier {
    pub fn new(fallback_redirect: Option<String>) -> Self {
        Self { fallback_redirect }
    }

    pub fn classify(&self, err: &Error) -> ErrorClass {
        if err.is_permission_denied() {
            return ErrorClass::PermissionDenied;
        }
        match err {
            Error::Redirect { target } => match target.clone().or_else(|| self.fallback_redirect.clone()) {
                Some(target) => ErrorClass::Redirect { target },
                None => ErrorClass::Internal,
            },
            Error::QuorumUnreachable { .. } => ErrorClass::TooFewResponses,
            Error::NotFound(_) => ErrorClass::User(Errno::ENOENT),
            Error::InvalidArgument(_) => ErrorClass::User(Errno::EINVAL),
            Error::Busy(_) => ErrorClass::User(Errno::EAGAIN),
            _ => ErrorClass::Internal,
        }
    }

    /// Classify, log and turn `err` into the record reported to the caller
    pub fn report(&self, file_id: &str, err: &Error) -> ErrorRecord {
        match self.classify(err) {
            ErrorClass::PermissionDenied => {
                tracing::debug!("Permission denied on {}: {}", file_id, err);
                ErrorRecord::errno(Errno::EPERM, err.to_string())
            }
            ErrorClass::Redirect { target } => {
                tracing::debug!("Redirecting request on {} to {}", file_id, target);
                ErrorRecord::redirect(target)
            }
            ErrorClass::User(errno) => {
                tracing::debug!("Request on {} failed: {}", file_id, err);
                ErrorRecord::errno(errno, err.to_string())
            }
            ErrorClass::TooFewResponses => {
                tracing::warn!("Replica set change of {} aborted: {}", file_id, err);
                ErrorRecord::internal(format!(
                    "An error has occurred at the metadata server. Details: {}",
                    err
                ))
            }
            ErrorClass::Internal => {
                tracing::error!("Internal error while changing replicas of {}: {:?}", file_id, err);
                ErrorRecord::internal(format!(
                    "An error has occurred at the metadata server. Details: {}",
                    err
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let classifier = ErrorClassifier::default();

        assert_eq!(
            classifier.classify(&Error::PermissionDenied("x".into())),
            ErrorClass::PermissionDenied
        );
        assert_eq!(
            classifier.classify(&Error::Grpc(tonic::Status::permission_denied("cap"))),
            ErrorClass::PermissionDenied
        );
        assert_eq!(
            classifier.classify(&Error::QuorumUnreachable {
                phase: "update",
                required: 1,
                total: 1,
                responded: 0,
                errored: 1,
            }),
            ErrorClass::TooFewResponses
        );
        assert_eq!(
            classifier.classify(&Error::Busy("in progress".into())),
            ErrorClass::User(Errno::EAGAIN)
        );
        assert_eq!(
            classifier.classify(&Error::MetadataCorrupted("boom".into())),
            ErrorClass::Internal
        );
    }

    #[test]
    fn test_redirect_falls_back_to_master() {
        let without_master = ErrorClassifier::default();
        assert_eq!(
            without_master.classify(&Error::Redirect { target: None }),
            ErrorClass::Internal
        );

        let classifier = ErrorClassifier::new(Some("mrc-master:32636".into()));
        assert_eq!(
            classifier.classify(&Error::Redirect { target: None }),
            ErrorClass::Redirect {
                target: "mrc-master:32636".into()
            }
        );
        assert_eq!(
            classifier.classify(&Error::Redirect {
                target: Some("mrc-2:32636".into())
            }),
            ErrorClass::Redirect {
                target: "mrc-2:32636".into()
            }
        );
    }

    #[test]
    fn test_report_records() {
        let classifier = ErrorClassifier::default();

        let record = classifier.report("f", &Error::NotFound("f".into()));
        assert_eq!(record.error_type, ErrorType::Errno);
        assert_eq!(record.errno, Some(Errno::ENOENT));

        let record = classifier.report(
            "f",
            &Error::QuorumUnreachable {
                phase: "invalidate",
                required: 2,
                total: 3,
                responded: 1,
                errored: 2,
            },
        );
        assert_eq!(record.error_type, ErrorType::InternalServerError);
        assert!(record.message.contains("Quorum unreachable during invalidate"));
    }
}
