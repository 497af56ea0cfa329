//! Failure taxonomy and its translation to the wire
//!
//! Handlers fail with a [`CallError`]. The translator turns that into either
//! the handler's own `Status` (already wire-native) or a [`FaultEnvelope`]
//! carrying one of three codes. Internal details never reach the caller.

use bytes::Bytes;
use thiserror::Error;
use tonic::{Code, Status};
use tracing::{debug, error, warn};

pub const NO_PRINCIPAL_MESSAGE: &str = "No user context.";
pub const DENIED_MESSAGE: &str = "You don't have the expected rights.";
pub const UNEXPECTED_MESSAGE: &str = "An error occurs.";
pub const BUSINESS_MESSAGE: &str = "A business rule was violated.";
pub const CANCELLED_MESSAGE: &str = "Call cancelled.";

/// Caller-facing business failure carrying one or more messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .messages.join("; "))]
pub struct BusinessFault {
    messages: Vec<String>,
}

impl BusinessFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    pub fn from_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            messages: messages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Serialized message list, as attached to the status details
    pub fn to_detail(&self) -> Option<Bytes> {
        serde_json::to_vec(&self.messages).ok().map(Bytes::from)
    }

    /// Client side: recover the business messages from a received status
    ///
    /// Returns `None` for statuses that do not carry a business payload.
    pub fn from_status(status: &Status) -> Option<Self> {
        if status.code() != Code::Internal || status.details().is_empty() {
            return None;
        }

        serde_json::from_slice::<Vec<String>>(status.details())
            .ok()
            .map(|messages| Self { messages })
    }
}

/// Everything a downstream handler can fail with
#[derive(Debug, Error)]
pub enum CallError {
    /// Already expressed in the transport's status vocabulary
    #[error("transport fault: {0}")]
    Transport(#[from] Status),

    #[error("business fault: {0}")]
    Business(#[from] BusinessFault),

    #[error("unexpected fault: {0:#}")]
    Unexpected(anyhow::Error),

    /// The caller went away; a normal termination
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    pub fn unexpected(err: impl Into<anyhow::Error>) -> Self {
        Self::Unexpected(err.into())
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::Business(BusinessFault::new(message))
    }
}

impl From<anyhow::Error> for CallError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unexpected(err)
    }
}

/// Wire codes a fault envelope can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    Unauthenticated,
    PermissionDenied,
    Internal,
}

impl FaultCode {
    /// Name in the transport's status vocabulary
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission denied",
            Self::Internal => "internal",
        }
    }
}

impl From<FaultCode> for Code {
    fn from(code: FaultCode) -> Self {
        match code {
            FaultCode::Unauthenticated => Code::Unauthenticated,
            FaultCode::PermissionDenied => Code::PermissionDenied,
            FaultCode::Internal => Code::Internal,
        }
    }
}

/// Normalized failure sent to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultEnvelope {
    pub code: FaultCode,
    pub message: String,
    /// Serialized business messages; present only for business faults
    pub structured_detail: Option<Bytes>,
}

impl FaultEnvelope {
    fn plain(code: FaultCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            structured_detail: None,
        }
    }

    pub fn no_principal() -> Self {
        Self::plain(FaultCode::Unauthenticated, NO_PRINCIPAL_MESSAGE)
    }

    pub fn denied() -> Self {
        Self::plain(FaultCode::PermissionDenied, DENIED_MESSAGE)
    }

    pub fn unexpected() -> Self {
        Self::plain(FaultCode::Internal, UNEXPECTED_MESSAGE)
    }

    pub fn business(fault: &BusinessFault) -> Self {
        Self {
            code: FaultCode::Internal,
            message: BUSINESS_MESSAGE.to_string(),
            structured_detail: fault.to_detail(),
        }
    }

    /// Encode as a tonic status; the structured detail rides in the details
    /// side-channel, never in the message
    pub fn into_status(self) -> Status {
        match self.structured_detail {
            Some(detail) => Status::with_details(self.code.into(), self.message, detail),
            None => Status::new(self.code.into(), self.message),
        }
    }
}

impl From<FaultEnvelope> for Status {
    fn from(envelope: FaultEnvelope) -> Self {
        envelope.into_status()
    }
}

/// Outcome of translating a handler failure
#[derive(Debug)]
pub enum Translation {
    /// Wire-native failure, passed through unchanged
    Rethrow(Status),
    Envelope(FaultEnvelope),
}

impl Translation {
    pub fn into_status(self) -> Status {
        match self {
            Self::Rethrow(status) => status,
            Self::Envelope(envelope) => envelope.into_status(),
        }
    }
}

/// Classify a handler failure
///
/// Total over [`CallError`]. Transport faults pass through, business faults
/// keep their messages as structured detail, unexpected faults collapse to a
/// fixed message after being logged in full.
///
/// Cancellation is not a fault. The dispatcher settles it before translation
/// (see [`Invocation::on_cancelled`](crate::Invocation::on_cancelled)), so the
/// `Cancelled` arm is only reached when `translate` is called directly, and
/// it maps to the transport's own `CANCELLED` code without an envelope.
///
/// ## Example
///
/// ```rust
/// use grpc_authz::{translate, BusinessFault, CallError};
/// use tonic::Code;
///
/// let status = translate(CallError::from(BusinessFault::new("cart is empty"))).into_status();
/// assert_eq!(status.code(), Code::Internal);
/// assert_eq!(
///     BusinessFault::from_status(&status),
///     Some(BusinessFault::new("cart is empty"))
/// );
/// ```
pub fn translate(err: CallError) -> Translation {
    match err {
        CallError::Transport(status) => {
            debug!(
                code = ?status.code(),
                message = %status.message(),
                "Handler returned gRPC status, passing through"
            );
            Translation::Rethrow(status)
        }
        CallError::Business(fault) => {
            warn!(
                message_count = fault.messages().len(),
                "Handler raised business fault"
            );
            Translation::Envelope(FaultEnvelope::business(&fault))
        }
        CallError::Unexpected(err) => {
            error!(error = ?err, "Unexpected handler failure: {:#}", err);
            Translation::Envelope(FaultEnvelope::unexpected())
        }
        // Dispatcher never gets here; kept so direct callers stay total.
        CallError::Cancelled => {
            debug!("Call cancelled by caller");
            Translation::Rethrow(Status::cancelled(CANCELLED_MESSAGE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn envelope(translation: Translation) -> FaultEnvelope {
        match translation {
            Translation::Envelope(envelope) => envelope,
            Translation::Rethrow(status) => panic!("expected envelope, got {:?}", status),
        }
    }

    #[test]
    fn test_fault_code_wire_names() {
        assert_eq!(FaultCode::Unauthenticated.as_str(), "unauthenticated");
        assert_eq!(FaultCode::PermissionDenied.as_str(), "permission denied");
        assert_eq!(FaultCode::Internal.as_str(), "internal");
        assert_eq!(Code::from(FaultCode::PermissionDenied), Code::PermissionDenied);
    }

    #[test]
    fn test_transport_fault_passes_through() {
        let status = Status::not_found("post 42 not found");
        match translate(CallError::from(status)) {
            Translation::Rethrow(status) => {
                assert_eq!(status.code(), Code::NotFound);
                assert_eq!(status.message(), "post 42 not found");
            }
            Translation::Envelope(e) => panic!("expected rethrow, got {:?}", e),
        }
    }

    #[test]
    fn test_business_fault_envelope() {
        let fault = BusinessFault::new("bad input");
        let envelope = envelope(translate(fault.into()));

        assert_eq!(envelope.code, FaultCode::Internal);
        assert_eq!(
            envelope.structured_detail.as_deref(),
            Some(br#"["bad input"]"#.as_slice())
        );
        assert!(!envelope.message.contains("bad input"));
    }

    #[test]
    fn test_unexpected_fault_hides_details() {
        let err = anyhow!("connection refused to db-primary:5432");
        let envelope = envelope(translate(err.into()));

        assert_eq!(envelope, FaultEnvelope::unexpected());
        assert_eq!(envelope.message, "An error occurs.");
        assert!(envelope.structured_detail.is_none());
    }

    #[test]
    fn test_unexpected_translation_is_deterministic() {
        let first = envelope(translate(CallError::unexpected(anyhow!("boom"))));
        let second = envelope(translate(CallError::unexpected(anyhow!("boom"))));
        assert_eq!(first, second);

        let first = first.into_status();
        let second = second.into_status();
        assert_eq!(first.code(), second.code());
        assert_eq!(first.message(), second.message());
        assert_eq!(first.details(), second.details());
    }

    #[test]
    fn test_cancelled_is_not_enveloped() {
        match translate(CallError::Cancelled) {
            Translation::Rethrow(status) => {
                assert_eq!(status.code(), Code::Cancelled);
                assert!(status.details().is_empty());
            }
            Translation::Envelope(envelope) => panic!("cancellation enveloped: {:?}", envelope),
        }
    }

    #[test]
    fn test_envelope_into_status_keeps_detail_out_of_message() {
        let fault = BusinessFault::from_messages(["name is required", "age must be positive"]);
        let status = FaultEnvelope::business(&fault).into_status();

        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), BUSINESS_MESSAGE);
        assert_eq!(BusinessFault::from_status(&status), Some(fault));
    }

    #[test]
    fn test_authorization_envelopes() {
        let status = FaultEnvelope::no_principal().into_status();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "No user context.");

        let status = FaultEnvelope::denied().into_status();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(status.message(), "You don't have the expected rights.");
    }

    #[test]
    fn test_business_fault_from_plain_status() {
        assert!(BusinessFault::from_status(&Status::internal("An error occurs.")).is_none());
        assert!(BusinessFault::from_status(&Status::not_found("missing")).is_none());
    }

    #[test]
    fn test_business_fault_display() {
        let fault = BusinessFault::new("first").with_message("second");
        assert_eq!(fault.to_string(), "first; second");
        assert_eq!(fault.messages().len(), 2);
    }
}
