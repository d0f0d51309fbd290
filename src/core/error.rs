//! Custom error types for webpilot
//!
//! Each subsystem has its own taxonomy so the orchestrator can decide
//! which failures are routed to supervision and which are fatal.

use thiserror::Error;

/// Errors raised while capturing a page snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Attaching a debugging session to the target failed
    #[error("attach failed: {0}")]
    AttachFailed(String),

    /// No addressable page target exists
    #[error("no page target available")]
    NoTarget,

    /// Enabling an inspection domain failed
    #[error("failed to enable {domain} domain: {message}")]
    DomainEnableFailed { domain: String, message: String },

    /// A sensing command failed after the session was established
    #[error("sensing command failed: {0}")]
    Protocol(String),
}

/// Errors raised while executing an instruction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The handle is not present in the snapshot used for execution
    #[error("target '{0}' not found in the current snapshot")]
    TargetMissing(String),

    /// The handle is malformed or no longer resolves to a live element
    #[error("target '{target}' is invalid: {reason}")]
    TargetInvalid { target: String, reason: String },

    /// The action name is not one the executor knows
    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),

    /// The action is missing a field it needs
    #[error("action '{action}' requires field '{field}'")]
    MissingRequiredField { action: String, field: String },

    /// `navigate` without a url
    #[error("navigate requires a url")]
    NavigationMissingUrl,

    /// `navigate` with a url that is not absolute
    #[error("'{0}' is not an absolute url")]
    InvalidUrl(String),

    /// A wire command failed while acting
    #[error("action command failed: {0}")]
    Protocol(String),
}

/// Errors raised when an oracle response does not match its schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleProtocolError {
    /// The response could not be parsed as the expected JSON shape
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),

    /// The response parsed but lacks a required field
    #[error("oracle response is missing '{0}'")]
    MissingRequiredField(String),
}

/// Errors on the DevTools wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CdpError {
    /// Could not reach or upgrade the DevTools endpoint
    #[error("CDP connect failed: {0}")]
    Connect(String),

    /// The browser answered with an error object
    #[error("CDP error {code} in {method}: {message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    /// No answer within the command deadline
    #[error("CDP command {0} timed out")]
    Timeout(String),

    /// The connection dropped before a response arrived
    #[error("CDP connection closed")]
    Closed,
}

/// Main error type for webpilot operations
#[derive(Error, Debug)]
pub enum PilotError {
    /// Oracle transport or API errors
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Browser connection errors
    #[error("Browser error: {0}")]
    Browser(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Task plan rejected by validation
    #[error("Invalid plan: {0}")]
    Plan(String),

    /// Bridge channel errors
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Sensing failure
    #[error(transparent)]
    Sensor(#[from] SensorError),

    /// Action failure
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Oracle schema violation
    #[error(transparent)]
    OracleProtocol(#[from] OracleProtocolError),

    /// Wire failure
    #[error(transparent)]
    Cdp(#[from] CdpError),

    /// No browsing target at task start
    #[error("no addressable browsing target; start Chrome with --remote-debugging-port and open a page")]
    NoTarget,

    /// A task is already running on this orchestrator
    #[error("a task is already running on this orchestrator")]
    AlreadyRunning,

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for webpilot operations
pub type Result<T> = std::result::Result<T, PilotError>;

impl PilotError {
    /// Create an oracle error
    pub fn oracle(msg: impl Into<String>) -> Self {
        Self::Oracle(msg.into())
    }

    /// Create a browser error
    pub fn browser(msg: impl Into<String>) -> Self {
        Self::Browser(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a plan error
    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan(msg.into())
    }

    /// Create a bridge error
    pub fn bridge(msg: impl Into<String>) -> Self {
        Self::Bridge(msg.into())
    }
}

impl From<CdpError> for SensorError {
    fn from(err: CdpError) -> Self {
        SensorError::Protocol(err.to_string())
    }
}

impl From<CdpError> for ActionError {
    fn from(err: CdpError) -> Self {
        ActionError::Protocol(err.to_string())
    }
}
