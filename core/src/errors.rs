use thiserror::Error;

/// Failures surfaced by a [`LedgerConnection`](crate::ledger::LedgerConnection).
///
/// Every variant keeps whatever the transport or node told us; nothing is
/// collapsed into a bare tag.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("RPC node timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Transaction {hash} failed: {reason}")]
    TransactionFailed { hash: String, reason: String },

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Connection has no signer; state-changing calls require one")]
    SignerRequired,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unexpected return value: {0}")]
    Decode(String),

    #[error("XDR error: {0}")]
    Xdr(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event subscriptions need a running Tokio runtime")]
    NoRuntime,
}

/// Errors returned by a [`TokenBinding`](crate::token::TokenBinding).
#[derive(Error, Debug)]
pub enum BindingError {
    /// Raised locally, before anything touches the network.
    #[error("Invalid address: `{parameter}` must not be empty")]
    InvalidAddress { parameter: &'static str },

    #[error("No contract is bound; call `init` first")]
    UnboundContract,

    #[error("Remote call `{function}` failed")]
    RemoteCall {
        function: &'static str,
        #[source]
        source: LedgerError,
    },
}

impl BindingError {
    pub(crate) fn remote(function: &'static str, source: LedgerError) -> Self {
        Self::RemoteCall { function, source }
    }

    /// The ledger failure behind a `RemoteCall`, if any.
    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            Self::RemoteCall { source, .. } => Some(source),
            _ => None,
        }
    }
}
