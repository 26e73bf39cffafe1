//! Billing error types.
//!
//! Every fallible operation in the crate returns [`BillingError`]. Errors are
//! classified into three categories so callers can decide between fixing the
//! request, retrying, and paging someone: caller mistakes, external dependency
//! failures, and business invariant violations.

use serde::Serialize;

/// The error type for all billing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    // Caller errors
    /// The request carried an invalid or missing argument.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The request carried no verified caller identity.
    #[error("Unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// The caller is not allowed to act on this company's billing data.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An event or request payload could not be decoded.
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    // Business invariant violations
    /// The company has no billable subscription.
    #[error("No billable subscription for company '{company_id}'")]
    NoSubscription { company_id: String },

    /// The requested status change is not a legal transition.
    #[error("Invalid {entity} transition from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// The record is in a terminal state and cannot be acted on.
    #[error("{entity} '{id}' is already {state}")]
    AlreadyTerminal {
        entity: &'static str,
        id: String,
        state: String,
    },

    /// The payment has used up every allowed attempt.
    #[error("Payment '{payment_id}' has exhausted its {attempts} allowed attempts")]
    RetryExhausted { payment_id: String, attempts: u32 },

    /// Another writer updated the subscription between read and save.
    #[error("Concurrent modification of subscription '{subscription_id}', please retry")]
    ConcurrentModification { subscription_id: String },

    // External dependency failures
    /// The payment gateway returned an error.
    #[error("Gateway error during '{operation}': {message}{}", gateway_detail(.code, .http_status))]
    Gateway {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },

    /// The billing store could not serve the request.
    #[error("Store unavailable during '{operation}': {message}")]
    StoreUnavailable { operation: String, message: String },

    /// An unexpected internal error occurred.
    #[error("Internal billing error: {message}")]
    Internal { message: String },
}

fn gateway_detail(code: &Option<String>, http_status: &Option<u16>) -> String {
    let mut detail = String::new();
    if let Some(code) = code {
        detail.push_str(&format!(" (code: {})", code));
    }
    if let Some(status) = http_status {
        detail.push_str(&format!(" [HTTP {}]", status));
    }
    detail
}

/// Coarse error classification used by callers and the operations layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request itself was wrong: bad input, unknown id, missing permission.
    Caller,
    /// The gateway or the store failed; the request may succeed on retry.
    Dependency,
    /// A business rule rejected the operation.
    Invariant,
}

/// Serializable error envelope for operation responses.
///
/// Carries the redacted message, never the internal one.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub category: ErrorCategory,
}

impl BillingError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument { message: msg.into() }
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated { message: msg.into() }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied { message: msg.into() }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload { message: msg.into() }
    }

    pub fn gateway(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Gateway {
            operation: operation.into(),
            message: msg.into(),
            code: None,
            http_status: None,
        }
    }

    pub fn store_unavailable(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Classify this error per the billing taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. }
            | Self::Unauthenticated { .. }
            | Self::PermissionDenied { .. }
            | Self::NotFound { .. }
            | Self::InvalidPayload { .. } => ErrorCategory::Caller,

            Self::Gateway { .. } | Self::StoreUnavailable { .. } => ErrorCategory::Dependency,

            Self::NoSubscription { .. }
            | Self::InvalidTransition { .. }
            | Self::AlreadyTerminal { .. }
            | Self::RetryExhausted { .. }
            | Self::ConcurrentModification { .. }
            | Self::Internal { .. } => ErrorCategory::Invariant,
        }
    }

    /// Stable machine-readable code, independent of message wording.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid-argument",
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::PermissionDenied { .. } => "permission-denied",
            Self::NotFound { .. } => "not-found",
            Self::InvalidPayload { .. } => "invalid-payload",
            Self::NoSubscription { .. } => "subscription-not-found",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::AlreadyTerminal { .. } => "already-in-terminal-state",
            Self::RetryExhausted { .. } => "retry-exhausted",
            Self::ConcurrentModification { .. } => "conflict",
            Self::Gateway { .. } => "payment-gateway-error",
            Self::StoreUnavailable { .. } => "store-unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    /// Check if retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } | Self::StoreUnavailable { .. } => true,
            // No status means a transport failure or timeout.
            Self::Gateway { http_status, .. } => {
                matches!(http_status, Some(429) | Some(500..=599) | None)
            }
            _ => false,
        }
    }

    /// Returns a message safe to surface outside the billing engine.
    ///
    /// # Security
    ///
    /// Dependency and internal failures may carry upstream detail such as
    /// gateway payloads or store addresses. Those are logged server-side and
    /// replaced with a generic message here (CWE-209). Caller and invariant
    /// errors keep their full text since the caller needs it to act.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Gateway { .. } => "Payment gateway is unavailable, please retry later".to_string(),
            Self::StoreUnavailable { .. } => {
                "Billing storage is unavailable, please retry later".to_string()
            }
            Self::Internal { .. } => "Internal billing error".to_string(),
            other => other.to_string(),
        }
    }

    /// Build the serializable envelope for an operation response.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.public_message(),
            code: self.error_code(),
            category: self.category(),
        }
    }
}

/// Result type alias for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        // Classify based on error category
        if err.is_data() || err.is_syntax() || err.is_eof() {
            BillingError::invalid_payload(format!("JSON error: {}", err))
        } else {
            BillingError::internal(format!("JSON serialization error: {}", err))
        }
    }
}
