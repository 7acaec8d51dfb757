use crate::error::AdmissionError;
use crate::request::AdmissionResponse;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// What to do when a collaborator cannot answer in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Deny the request
    #[default]
    Fail,
    /// Skip the failing collaborator and admit
    Ignore,
}

impl FailurePolicy {
    /// Whether `err` may be skipped under this policy.
    ///
    /// Only collaborator failures are subject to the policy; rejected or
    /// malformed objects are always denied.
    pub fn ignores(self, err: &AdmissionError) -> bool {
        self == FailurePolicy::Ignore
            && matches!(err, AdmissionError::CollaboratorUnavailable { .. })
    }

    /// Turn an admission error into the response for `uid`
    pub fn resolve(self, uid: &str, err: &AdmissionError) -> AdmissionResponse {
        if self.ignores(err) {
            warn!("Ignoring admission failure for request {}: {}", uid, err);
            AdmissionResponse::allow(uid).with_message(err.to_string())
        } else {
            AdmissionResponse::deny(uid, err.to_string())
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(FailurePolicy::Fail),
            "ignore" => Ok(FailurePolicy::Ignore),
            other => Err(format!(
                "unknown failure policy '{}', expected Fail or Ignore",
                other
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Fail => write!(f, "Fail"),
            FailurePolicy::Ignore => write!(f, "Ignore"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("Fail".parse::<FailurePolicy>().unwrap(), FailurePolicy::Fail);
        assert_eq!("ignore".parse::<FailurePolicy>().unwrap(), FailurePolicy::Ignore);
        assert!("sometimes".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::default().to_string(), "Fail");
    }

    #[test]
    fn test_resolve() {
        let unavailable = AdmissionError::collaborator_unavailable("quota", "timed out");
        let rejected = AdmissionError::rejected("bad toleration");

        assert!(!FailurePolicy::Fail.resolve("a", &unavailable).allowed);

        let ignored = FailurePolicy::Ignore.resolve("a", &unavailable);
        assert!(ignored.allowed);
        assert!(ignored.message.unwrap().contains("quota"));

        assert!(!FailurePolicy::Ignore.resolve("a", &rejected).allowed);
        assert!(!FailurePolicy::Ignore.ignores(&rejected));
        assert!(!FailurePolicy::Fail.ignores(&unavailable));
    }
}
