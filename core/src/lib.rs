//! Reactive client binding for SEP-41 fungible-token contracts.
//!
//! [`TokenBinding`] exposes a token's metadata and balances as memoized,
//! lazily refreshed values, its `transfer` and `approve` events as
//! latest-value feeds, and `transfer`, `transfer_from` and `approve` as async
//! actions that refresh dependent balances once confirmed. The ledger sits
//! behind [`LedgerConnection`]: [`RpcConnection`] talks Soroban JSON-RPC,
//! [`InMemoryLedger`] runs the same token logic in process.

pub mod config;
pub mod errors;
pub mod ledger;
pub mod network;
pub mod reactive;
pub mod token;

pub use errors::{BindingError, LedgerError};
pub use ledger::{
    Arg, ContractEvent, InMemoryLedger, LedgerConnection, LocalSigner, PendingTransaction,
    Receipt, RpcConnection, Value,
};
pub use token::{
    ApprovalEvent, Binding, BindingOptions, MetadataView, RefreshCounter, TokenBinding,
    TransferEvent,
};

/// Token amounts.
pub use alloy_primitives::U256;
