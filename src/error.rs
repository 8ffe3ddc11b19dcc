//! Error types raised by the engine components.

use reqwest::StatusCode;
use thiserror::Error;

/// Failures raised by the push channel while connecting or receiving.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The configured server URL cannot be turned into a push endpoint.
    #[error("invalid push channel url `{url}`: {reason}")]
    InvalidUrl {
        /// Configured server URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The WebSocket handshake failed.
    #[error("failed to connect push channel at `{url}`")]
    Connect {
        /// Push endpoint.
        url: String,
        /// Handshake error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    /// The WebSocket handshake did not finish within the connect timeout.
    #[error("push channel handshake with `{url}` timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// Push endpoint.
        url: String,
        /// Timeout that expired.
        timeout_ms: u64,
    },
    /// The established connection broke while reading frames.
    #[error("push channel receive failed")]
    Receive {
        /// Read error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}

/// Failures raised while pulling the full state from the server.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the connection dropped.
    #[error("failed to send full-state request to `{url}`")]
    Send {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("unexpected full-state response status {status} from `{url}`")]
    Status {
        /// Requested URL.
        url: String,
        /// Status returned by the server.
        status: StatusCode,
    },
    /// The response body was not the expected JSON document.
    #[error("failed to decode full-state response from `{url}`")]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The request did not complete within the configured timeout.
    #[error("full-state request to `{url}` timed out")]
    Timeout {
        /// Requested URL.
        url: String,
    },
}

/// Failures raised while dispatching a mutating command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command was rejected before anything was sent.
    #[error("invalid command input: {0}")]
    InvalidInput(String),
    /// The request could not be sent or the connection dropped.
    #[error("failed to send command to `{path}`")]
    Send {
        /// Command path.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with an error status.
    #[error("unexpected command response status {status} for `{path}`")]
    Status {
        /// Command path.
        path: String,
        /// Status returned by the server.
        status: StatusCode,
    },
    /// The server answered 2xx but flagged the command as unsuccessful.
    #[error("server rejected command `{path}`")]
    Rejected {
        /// Command path.
        path: String,
    },
    /// The request did not complete within the configured timeout.
    #[error("command `{path}` timed out")]
    Timeout {
        /// Command path.
        path: String,
    },
}

impl From<validator::ValidationErrors> for CommandError {
    fn from(err: validator::ValidationErrors) -> Self {
        CommandError::InvalidInput(format!("validation failed: {}", err))
    }
}

/// Failures raised while reading the engine configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config `{path}`")]
    Read {
        /// Config file location.
        path: String,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file content is not valid configuration JSON.
    #[error("failed to parse config `{path}`")]
    Parse {
        /// Config file location.
        path: String,
        /// JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Failures raised while assembling the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build HTTP client")]
    ClientBuilder {
        /// Builder error.
        #[source]
        source: reqwest::Error,
    },
}
