//! The ledger connection capability and the values that cross it.
//!
//! A [`LedgerConnection`] knows how to reach one ledger: run read-only
//! contract calls, submit state-changing ones (when it can sign), and push
//! contract events to a sink. Everything chain-specific (address formats,
//! wire encoding, signing) lives behind it.

pub mod memory;
pub mod rpc;
pub mod scval;
pub mod signer;

use std::future::Future;
use std::sync::Arc;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;

pub use memory::InMemoryLedger;
pub use rpc::RpcConnection;
pub use signer::LocalSigner;

/// A contract call argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Address(String),
    Amount(U256),
    U32(u32),
    /// The account the connection signs with.
    Invoker,
    /// `latest ledger + n`, resolved by the connection at submission time.
    LedgersFromNow(u32),
}

/// A decoded contract return value, event topic or event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Void,
    Bool(bool),
    U32(u32),
    Amount(U256),
    String(String),
    Address(String),
    Vec(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::U32(_) => "u32",
            Value::Amount(_) => "amount",
            Value::String(_) => "string",
            Value::Address(_) => "address",
            Value::Vec(_) => "vec",
        }
    }
}

/// A contract event as delivered by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEvent {
    pub contract: String,
    pub ledger: u64,
    /// First topic is the event name.
    pub topics: Vec<Value>,
    pub data: Value,
}

/// Confirmation of a state-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub hash: String,
    pub ledger: u64,
}

/// Callback that receives decoded contract events.
pub type EventSink = Arc<dyn Fn(ContractEvent) + Send + Sync>;

/// A submitted, not yet confirmed transaction.
pub trait PendingTransaction: Send {
    fn hash(&self) -> &str;

    /// Resolve once the ledger reports the transaction as final.
    fn wait(self) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;
}

/// Access to one ledger.
pub trait LedgerConnection: Send + Sync + 'static {
    type Pending: PendingTransaction;

    /// Dropping the subscription stops event delivery.
    type Subscription: Send + 'static;

    /// Run a read-only contract function.
    fn call(
        &self,
        contract: &str,
        function: &str,
        args: Vec<Arg>,
    ) -> impl Future<Output = Result<Value, LedgerError>> + Send;

    /// Submit a state-changing contract function. Fails with
    /// [`LedgerError::SignerRequired`] on read-only connections.
    fn submit(
        &self,
        contract: &str,
        function: &str,
        args: Vec<Arg>,
    ) -> impl Future<Output = Result<Self::Pending, LedgerError>> + Send;

    /// Deliver every `event` emitted by `contract` to `sink` until the
    /// returned subscription is dropped.
    fn subscribe(
        &self,
        contract: &str,
        event: &str,
        sink: EventSink,
    ) -> Result<Self::Subscription, LedgerError>;
}
