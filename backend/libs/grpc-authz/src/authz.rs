//! Authorization gate

use crate::access::RequiredAccess;
use crate::fault::FaultEnvelope;
use crate::principal::Principal;
use tonic::Status;
use tracing::debug;

/// Result of checking a call against its required access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzOutcome {
    Allowed,
    /// No principal attached to the call
    NoPrincipal,
    /// Principal attached but lacking the required operations
    Denied,
}

impl AuthzOutcome {
    /// `Ok` when allowed, otherwise the matching wire status
    pub fn into_result(self) -> Result<(), Status> {
        match self {
            Self::Allowed => Ok(()),
            Self::NoPrincipal => Err(FaultEnvelope::no_principal().into_status()),
            Self::Denied => Err(FaultEnvelope::denied().into_status()),
        }
    }
}

/// Decide whether the principal may call a method requiring `access`.
///
/// Unprotected methods are allowed without consulting the principal.
pub fn authorize(principal: Option<&dyn Principal>, access: &RequiredAccess) -> AuthzOutcome {
    if access.is_unprotected() {
        return AuthzOutcome::Allowed;
    }

    let Some(principal) = principal else {
        debug!(resource = access.resource(), "Rejecting call without principal");
        return AuthzOutcome::NoPrincipal;
    };

    if principal.is_authorized(access.resource(), access.operations()) {
        AuthzOutcome::Allowed
    } else {
        debug!(
            resource = access.resource(),
            operations = ?access.operations(),
            "Principal lacks required operations"
        );
        AuthzOutcome::Denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Locale;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FixedPrincipal {
        allow: bool,
        calls: AtomicUsize,
    }

    impl FixedPrincipal {
        fn new(allow: bool) -> Self {
            Self {
                allow,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Principal for FixedPrincipal {
        fn is_authorized(&self, _resource: &str, _operations: &BTreeSet<String>) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.allow
        }

        fn locale(&self) -> Option<Locale> {
            None
        }

        fn set_locale(&self, _locale: Locale) {}
    }

    #[test]
    fn test_unprotected_skips_principal() {
        let principal = FixedPrincipal::new(false);
        let outcome = authorize(Some(&principal), &RequiredAccess::unprotected());

        assert_eq!(outcome, AuthzOutcome::Allowed);
        assert_eq!(principal.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unprotected_without_principal() {
        assert_eq!(
            authorize(None, &RequiredAccess::unprotected()),
            AuthzOutcome::Allowed
        );
    }

    #[test]
    fn test_no_principal() {
        let outcome = authorize(None, &RequiredAccess::new("resX", ["read"]));
        assert_eq!(outcome, AuthzOutcome::NoPrincipal);

        let status = outcome.into_result().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "No user context.");
    }

    #[test]
    fn test_denied() {
        let principal = FixedPrincipal::new(false);
        let outcome = authorize(Some(&principal), &RequiredAccess::new("resX", ["read"]));
        assert_eq!(outcome, AuthzOutcome::Denied);
        assert_eq!(principal.calls.load(Ordering::SeqCst), 1);

        let status = outcome.into_result().unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(status.message(), "You don't have the expected rights.");
    }

    #[test]
    fn test_allowed() {
        let principal = FixedPrincipal::new(true);
        let outcome = authorize(Some(&principal), &RequiredAccess::new("resX", ["read"]));
        assert_eq!(outcome, AuthzOutcome::Allowed);
        assert!(outcome.into_result().is_ok());
    }
}
