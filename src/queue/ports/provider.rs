//! Port for the upstream SIM provisioning provider.
//!
//! Provider clients report failures as [`ProviderError`] values whose
//! [`ProviderErrorKind`] is decided once, when the raw provider text is first
//! seen. Callers branch on the kind and never re-parse messages.

use crate::queue::domain::{FailureClass, LabelField};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Provider result strings that denote success.
const SUCCESS_RESULTS: [&str; 2] = ["succeeded", "SUCCESS"];

/// Provider client contract.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Authenticates against the provider.
    async fn login(&self) -> ProviderResult<()>;

    /// Searches SIM records.
    async fn get_sims(&self, query: &SimQuery) -> ProviderResult<SimPage>;

    /// Applies one action to a set of SIMs.
    async fn bulk_update(
        &self,
        targets: &[String],
        action: ProviderAction,
        value: &str,
    ) -> ProviderResult<ProviderOutcome>;

    /// Writes one customer label.
    async fn update_sim_label(
        &self,
        target: &str,
        field: LabelField,
        value: &str,
    ) -> ProviderResult<ProviderOutcome>;

    /// Reads the provisioning status the provider holds for a SIM.
    ///
    /// Returns `None` when the provider has no status for it.
    async fn get_sim_status(&self, target: &str) -> ProviderResult<Option<String>>;
}

/// Bulk actions understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderAction {
    /// Provisioning status change.
    SimStateChange,
}

impl ProviderAction {
    /// Returns the provider's action code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimStateChange => "SIM_STATE_CHANGE",
        }
    }
}

impl fmt::Display for ProviderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search criteria for [`ProviderClient::get_sims`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimQuery {
    /// Exact MSISDN filter.
    pub msisdn: Option<String>,
    /// Zero-based page index.
    pub page: u32,
    /// Page size.
    pub page_size: u32,
}

impl SimQuery {
    /// Query matching a single MSISDN.
    #[must_use]
    pub fn by_msisdn(msisdn: impl Into<String>) -> Self {
        Self {
            msisdn: Some(msisdn.into()),
            page: 0,
            page_size: 1,
        }
    }
}

/// One page of provider SIM records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimPage {
    /// Records on this page.
    pub records: Vec<SimRecord>,
    /// Total matching records.
    pub total: u64,
}

/// SIM record as held by the provider and mirrored locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRecord {
    /// Subscriber number.
    pub msisdn: String,
    /// Calling-line identifier.
    pub cli: String,
    /// Subscriber identity.
    pub imsi: String,
    /// SIM card serial.
    pub iccid: String,
    /// Device identity.
    pub imei: String,
    /// Provisioning status.
    pub status: String,
    /// Rate plan name.
    pub rate_plan: String,
    /// First customer label.
    pub label_1: String,
    /// Second customer label.
    pub label_2: String,
    /// Third customer label.
    pub label_3: String,
    /// Access point name.
    pub apn: String,
    /// Assigned IP address.
    pub ip: String,
    /// Whether the SIM has an active data session.
    pub in_session: bool,
}

/// Response body of a provider write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOutcome {
    /// Provider result code, `succeeded` on success.
    pub result: String,
    /// Human-readable provider message.
    pub message: String,
    /// Provider-side request identifier.
    pub request_id: Option<i64>,
}

impl ProviderOutcome {
    /// Returns `true` when the provider reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        SUCCESS_RESULTS.contains(&self.result.as_str())
    }

    /// Converts a non-success outcome into a classified error.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] carrying `API Error: <result> - <message>`
    /// when the provider did not report success.
    pub fn into_checked(self) -> ProviderResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ProviderError::from_message(format!(
            "API Error: {} - {}",
            self.result, self.message
        )))
    }
}

/// Category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// The account may not perform the operation.
    Unauthorized,
    /// The SIM is unknown to the provider.
    NotFound,
    /// The request is malformed or missing mandatory fields.
    InvalidRequest,
    /// The provider reported an internal system error.
    UpstreamSystem,
    /// The provider holds no current status for the SIM.
    MissingInitialState,
    /// The provider could not be reached.
    Network,
    /// The provider refused the request.
    Rejected,
    /// Anything else.
    Unknown,
}

/// Phrases marking requests the provider will never accept.
const FATAL_PHRASES: &[(&str, ProviderErrorKind)] = &[
    ("not allowed to request_type_id", ProviderErrorKind::Unauthorized),
    ("permission denied", ProviderErrorKind::Unauthorized),
    ("initial value #null", ProviderErrorKind::MissingInitialState),
    ("subscriber not found", ProviderErrorKind::NotFound),
    ("invalid subscriber", ProviderErrorKind::NotFound),
    ("not allowed", ProviderErrorKind::Unauthorized),
    ("actiontype is mandatory", ProviderErrorKind::InvalidRequest),
    ("targetid is mandatory", ProviderErrorKind::InvalidRequest),
    ("invalid actiontype", ProviderErrorKind::InvalidRequest),
    ("invalid targetid", ProviderErrorKind::InvalidRequest),
    ("system error", ProviderErrorKind::UpstreamSystem),
];

/// Provider result code that, with a field phrase, marks a malformed request.
/// Matched case-sensitively.
const FAILED_RESULT_CODE: &str = "FAILED";

/// Phrases that, together with [`FAILED_RESULT_CODE`], mark a malformed
/// request.
const FAILED_FIELD_PHRASES: &[&str] = &["target_value", "mandatory"];

const NETWORK_PHRASES: &[&str] = &[
    "connect refused",
    "connectex",
    "no such host",
    "timeout",
    "dial tcp",
    "connection refused",
    "connection reset",
    "timed out",
    "dns error",
    "failed to lookup address",
];

const REJECTED_PHRASES: &[&str] = &["500", "403", "server internal error"];

impl ProviderErrorKind {
    /// Classifies raw provider or transport text.
    ///
    /// Phrase matching is case-insensitive; the `FAILED` result code is
    /// matched as written. Fatal phrases take precedence over network
    /// phrases, which take precedence over rejection codes.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let text = message.to_lowercase();
        if let Some((_, kind)) = FATAL_PHRASES
            .iter()
            .find(|(phrase, _)| text.contains(phrase))
        {
            return *kind;
        }
        if message.contains(FAILED_RESULT_CODE)
            && FAILED_FIELD_PHRASES
                .iter()
                .any(|phrase| text.contains(phrase))
        {
            return Self::InvalidRequest;
        }
        if NETWORK_PHRASES.iter().any(|phrase| text.contains(phrase)) {
            return Self::Network;
        }
        if REJECTED_PHRASES.iter().any(|phrase| text.contains(phrase)) {
            return Self::Rejected;
        }
        Self::Unknown
    }

    /// Returns how the worker treats this kind of failure.
    #[must_use]
    pub const fn failure_class(self) -> FailureClass {
        match self {
            Self::Unauthorized
            | Self::NotFound
            | Self::InvalidRequest
            | Self::UpstreamSystem
            | Self::MissingInitialState => FailureClass::Fatal,
            Self::Network => FailureClass::Network,
            Self::Rejected | Self::Unknown => FailureClass::Retryable,
        }
    }
}

/// Classified provider failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
}

impl ProviderError {
    /// Creates an error with an explicit kind.
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an error classified from its message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let text: String = message.into();
        Self {
            kind: ProviderErrorKind::from_message(&text),
            message: text,
        }
    }

    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    /// Returns the raw message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
