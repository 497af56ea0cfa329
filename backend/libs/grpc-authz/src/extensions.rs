//! Request Extension Trait for Principal Access
//!
//! The authentication stage runs before the authorization interceptor and
//! leaves its result in request extensions. This module is the handshake
//! between the two.

use crate::principal::Principal;
use std::sync::Arc;
use tonic::{Request, Status};

/// Principal stored in request extensions
///
/// Extensions require `Clone`, so the principal is kept behind an `Arc` and
/// shared with every call of the same session or connection.
#[derive(Debug, Clone)]
pub struct PrincipalHandle(pub Arc<dyn Principal>);

/// Extension trait for attaching and reading the call's principal
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_authz::{GrantedPrincipal, PrincipalExt};
/// use std::sync::Arc;
/// use tonic::Request;
///
/// // In the authentication stage
/// let mut request = Request::new(());
/// let principal = GrantedPrincipal::new(uuid::Uuid::new_v4(), "alice")
///     .grant("posts", ["read"]);
/// request.attach_principal(Arc::new(principal));
///
/// // Later, in a handler
/// let principal = request.require_principal()?;
/// # Ok::<(), tonic::Status>(())
/// ```
pub trait PrincipalExt {
    /// Principal attached by the authentication stage, if any
    fn principal(&self) -> Option<Arc<dyn Principal>>;

    /// Like [`principal`](Self::principal) but fails with
    /// `Status::unauthenticated` when nothing is attached
    fn require_principal(&self) -> Result<Arc<dyn Principal>, Status>;

    fn attach_principal(&mut self, principal: Arc<dyn Principal>);
}

impl<T> PrincipalExt for Request<T> {
    fn principal(&self) -> Option<Arc<dyn Principal>> {
        self.extensions()
            .get::<PrincipalHandle>()
            .map(|handle| handle.0.clone())
    }

    fn require_principal(&self) -> Result<Arc<dyn Principal>, Status> {
        self.principal()
            .ok_or_else(|| Status::unauthenticated(crate::fault::NO_PRINCIPAL_MESSAGE))
    }

    fn attach_principal(&mut self, principal: Arc<dyn Principal>) {
        self.extensions_mut().insert(PrincipalHandle(principal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::GrantedPrincipal;
    use uuid::Uuid;

    #[test]
    fn test_principal_missing() {
        let request = Request::new(());
        assert!(request.principal().is_none());

        let status = request.require_principal().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "No user context.");
    }

    #[test]
    fn test_principal_present() {
        let user_id = Uuid::new_v4();
        let mut request = Request::new(());
        request.attach_principal(Arc::new(
            GrantedPrincipal::new(user_id, "alice").grant("posts", ["read"]),
        ));

        let principal = request.require_principal().expect("principal attached");
        let read = ["read".to_string()].into_iter().collect();
        assert!(principal.is_authorized("posts", &read));
    }

    #[test]
    fn test_attach_replaces_previous_principal() {
        let mut request = Request::new(());
        request.attach_principal(Arc::new(GrantedPrincipal::new(Uuid::new_v4(), "alice")));
        request.attach_principal(Arc::new(
            GrantedPrincipal::new(Uuid::new_v4(), "bob").grant("posts", ["read"]),
        ));

        let read = ["read".to_string()].into_iter().collect();
        assert!(request
            .principal()
            .expect("principal attached")
            .is_authorized("posts", &read));
    }
}
