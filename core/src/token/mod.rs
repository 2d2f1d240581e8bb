//! Reactive binding to a deployed fungible-token contract.
//!
//! A [`TokenBinding`] holds the current [`Binding`] (contract address plus
//! connection) in an [`Observable`] and a [`RefreshCounter`] that actions
//! advance once their transaction is confirmed. Read accessors are
//! [`Derived`] values that depend on the binding (metadata) or on the binding
//! and the refresh counter (balances, allowances). Transfer and approval
//! events are exposed as [`PushSlot`]s whose ledger subscription lives only
//! while somebody observes them.

pub mod abi;
pub mod events;

use std::sync::Arc;

use alloy_primitives::U256;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::errors::{BindingError, LedgerError};
use crate::ledger::{
    Arg, ContractEvent, EventSink, LedgerConnection, PendingTransaction, Receipt, Value,
};
use crate::reactive::{Derived, Lease, Observable, Publisher, PushObserver, PushSlot};

pub use events::{ApprovalEvent, TransferEvent};

/// Roughly one day of 5 second ledgers.
pub const DEFAULT_APPROVAL_TTL_LEDGERS: u32 = 17_280;

/// The contract a [`TokenBinding`] talks to.
pub struct Binding<C> {
    address: String,
    connection: Arc<C>,
}

impl<C> Binding<C> {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }
}

impl<C> std::fmt::Debug for Binding<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

type BindingStore<C> = Observable<Option<Arc<Binding<C>>>>;

/// Version stamp advanced after every confirmed action.
///
/// Only its changes matter; quantity accessors depend on it.
#[derive(Debug, Clone)]
pub struct RefreshCounter(Observable<u64>);

impl RefreshCounter {
    fn new() -> Self {
        Self(Observable::new(0))
    }

    fn advance(&self) {
        self.0.update(|n| *n = n.wrapping_add(1));
    }

    fn watch(&self) -> watch::Receiver<u64> {
        self.0.watch()
    }

    /// Number of times the counter has been advanced.
    pub fn version(&self) -> u64 {
        self.0.version()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingOptions {
    /// How long an approval stays valid, in ledgers from submission.
    pub approval_ttl_ledgers: u32,
    /// Run at most one action at a time on this binding.
    pub serialize_actions: bool,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            approval_ttl_ledgers: DEFAULT_APPROVAL_TTL_LEDGERS,
            serialize_actions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataView {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
}

pub struct TokenBinding<C> {
    store: BindingStore<C>,
    refresh: RefreshCounter,
    options: BindingOptions,
    name: Derived<String>,
    symbol: Derived<String>,
    decimals: Derived<u8>,
    total_supply: Derived<U256>,
    transfer_events: Arc<PushSlot<TransferEvent>>,
    approval_events: Arc<PushSlot<ApprovalEvent>>,
    action_lock: Option<Mutex<()>>,
}

impl<C: LedgerConnection> std::fmt::Debug for TokenBinding<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBinding")
            .field("contract", &self.store.get())
            .field("refresh", &self.refresh.version())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C: LedgerConnection> Default for TokenBinding<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: LedgerConnection> TokenBinding<C> {
    /// An unbound binding; call [`init`](Self::init) before reading.
    pub fn new() -> Self {
        Self::with_options(BindingOptions::default())
    }

    pub fn with_options(options: BindingOptions) -> Self {
        let store: BindingStore<C> = Observable::new(None);
        Self {
            name: metadata_accessor(&store, abi::NAME, abi::string),
            symbol: metadata_accessor(&store, abi::SYMBOL, abi::string),
            decimals: metadata_accessor(&store, abi::DECIMALS, abi::decimals),
            total_supply: metadata_accessor(&store, abi::TOTAL_SUPPLY, abi::amount),
            transfer_events: event_slot(&store, abi::TRANSFER_EVENT, |e| {
                TransferEvent::try_from(e)
            }),
            approval_events: event_slot(&store, abi::APPROVAL_EVENT, |e| {
                ApprovalEvent::try_from(e)
            }),
            action_lock: options.serialize_actions.then(|| Mutex::new(())),
            refresh: RefreshCounter::new(),
            store,
            options,
        }
    }

    /// A binding initialized with `address` and `connection`.
    pub fn bound(address: impl Into<String>, connection: C) -> Result<Self, BindingError> {
        let binding = Self::new();
        binding.init(address, connection)?;
        Ok(binding)
    }

    /// Bind to `address`, replacing any previous binding.
    ///
    /// Only checks that the address is non-empty; nothing is sent to the
    /// ledger. An active event subscription stays on the contract it was
    /// acquired for until its last observer drops.
    pub fn init(&self, address: impl Into<String>, connection: C) -> Result<(), BindingError> {
        let address = address.into();
        if address.is_empty() {
            return Err(BindingError::InvalidAddress {
                parameter: "address",
            });
        }
        tracing::info!(contract = %address, "Binding token contract");
        self.store.set(Some(Arc::new(Binding {
            address,
            connection: Arc::new(connection),
        })));
        Ok(())
    }

    pub fn contract(&self) -> Option<Arc<Binding<C>>> {
        self.store.get()
    }

    /// Receiver notified whenever [`init`](Self::init) swaps the binding.
    pub fn watch_contract(&self) -> watch::Receiver<Option<Arc<Binding<C>>>> {
        self.store.watch()
    }

    pub fn refresh_counter(&self) -> &RefreshCounter {
        &self.refresh
    }

    pub fn options(&self) -> &BindingOptions {
        &self.options
    }

    pub fn name(&self) -> &Derived<String> {
        &self.name
    }

    pub fn symbol(&self) -> &Derived<String> {
        &self.symbol
    }

    pub fn decimals(&self) -> &Derived<u8> {
        &self.decimals
    }

    pub fn total_supply(&self) -> &Derived<U256> {
        &self.total_supply
    }

    /// All four metadata values, each from its own accessor.
    pub async fn metadata(&self) -> Result<MetadataView, BindingError> {
        let (name, symbol, decimals, total_supply) = tokio::try_join!(
            self.name.get(),
            self.symbol.get(),
            self.decimals.get(),
            self.total_supply.get()
        )?;
        Ok(MetadataView {
            name,
            symbol,
            decimals,
            total_supply,
        })
    }

    /// Balance of `owner`, refreshed after every confirmed action.
    ///
    /// The address is passed to the ledger as is.
    pub fn balance_of(&self, owner: impl Into<String>) -> Derived<U256> {
        let owner = owner.into();
        self.quantity(
            format!("balance({owner})"),
            abi::BALANCE,
            vec![Arg::Address(owner)],
        )
    }

    /// Amount `spender` may still move out of `owner`'s balance.
    pub fn allowance(&self, owner: impl Into<String>, spender: impl Into<String>) -> Derived<U256> {
        let owner = owner.into();
        let spender = spender.into();
        self.quantity(
            format!("allowance({owner}, {spender})"),
            abi::ALLOWANCE,
            vec![Arg::Address(owner), Arg::Address(spender)],
        )
    }

    fn quantity(&self, label: String, function: &'static str, args: Vec<Arg>) -> Derived<U256> {
        let store = self.store.clone();
        Derived::new(
            label,
            vec![Box::new(self.store.watch()), Box::new(self.refresh.watch())],
            Box::new(move || {
                let current = store.get();
                let args = args.clone();
                async move {
                    let value = query(current, function, args).await?;
                    abi::amount(value).map_err(|e| BindingError::remote(function, e))
                }
                .boxed()
            }),
        )
    }

    /// Move `value` from the signing account to `to`.
    pub async fn transfer(&self, to: &str, value: U256) -> Result<Receipt, BindingError> {
        require("to", to)?;
        self.act(
            abi::TRANSFER,
            vec![Arg::Invoker, Arg::Address(to.to_string()), Arg::Amount(value)],
        )
        .await
    }

    /// Move `value` from `from` to `to` against the signing account's
    /// allowance.
    pub async fn transfer_from(
        &self,
        from: &str,
        to: &str,
        value: U256,
    ) -> Result<Receipt, BindingError> {
        require("from", from)?;
        require("to", to)?;
        self.act(
            abi::TRANSFER_FROM,
            vec![
                Arg::Invoker,
                Arg::Address(from.to_string()),
                Arg::Address(to.to_string()),
                Arg::Amount(value),
            ],
        )
        .await
    }

    /// Let `spender` move up to `value` of the signing account's balance.
    /// A zero `value` revokes the allowance.
    pub async fn approve(&self, spender: &str, value: U256) -> Result<Receipt, BindingError> {
        require("spender", spender)?;
        self.act(
            abi::APPROVE,
            vec![
                Arg::Invoker,
                Arg::Address(spender.to_string()),
                Arg::Amount(value),
                Arg::LedgersFromNow(self.options.approval_ttl_ledgers),
            ],
        )
        .await
    }

    async fn act(&self, function: &'static str, args: Vec<Arg>) -> Result<Receipt, BindingError> {
        let _serialized = match &self.action_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let binding = self.store.get().ok_or(BindingError::UnboundContract)?;
        let contract = binding.address();

        tracing::debug!(contract, function, "Submitting");
        let pending = binding
            .connection
            .submit(contract, function, args)
            .await
            .map_err(|e| failed(contract, function, e))?;

        tracing::debug!(contract, function, hash = pending.hash(), "Confirming");
        let receipt = pending
            .wait()
            .await
            .map_err(|e| failed(contract, function, e))?;

        self.refresh.advance();
        tracing::info!(
            contract,
            function,
            hash = %receipt.hash,
            ledger = receipt.ledger,
            "Succeeded"
        );
        Ok(receipt)
    }

    /// Observe the latest `transfer` event. The first observer subscribes on
    /// the current binding's connection.
    pub fn transfer_events(&self) -> Result<PushObserver<TransferEvent>, BindingError> {
        self.transfer_events.observe()
    }

    pub fn approval_events(&self) -> Result<PushObserver<ApprovalEvent>, BindingError> {
        self.approval_events.observe()
    }
}

fn require(parameter: &'static str, address: &str) -> Result<(), BindingError> {
    if address.is_empty() {
        return Err(BindingError::InvalidAddress { parameter });
    }
    Ok(())
}

fn failed(contract: &str, function: &'static str, error: LedgerError) -> BindingError {
    tracing::warn!(contract, function, error = %error, "Failed");
    BindingError::remote(function, error)
}

async fn query<C: LedgerConnection>(
    binding: Option<Arc<Binding<C>>>,
    function: &'static str,
    args: Vec<Arg>,
) -> Result<Value, BindingError> {
    let binding = binding.ok_or(BindingError::UnboundContract)?;
    tracing::debug!(contract = %binding.address, function, "Reading");
    binding
        .connection
        .call(&binding.address, function, args)
        .await
        .map_err(|e| BindingError::remote(function, e))
}

fn metadata_accessor<C, T>(
    store: &BindingStore<C>,
    function: &'static str,
    decode: fn(Value) -> Result<T, LedgerError>,
) -> Derived<T>
where
    C: LedgerConnection,
    T: Clone + Send + 'static,
{
    let source = store.clone();
    Derived::new(
        function,
        vec![Box::new(store.watch())],
        Box::new(move || {
            let current = source.get();
            async move {
                let value = query(current, function, Vec::new()).await?;
                decode(value).map_err(|e| BindingError::remote(function, e))
            }
            .boxed()
        }),
    )
}

fn event_slot<C, E>(
    store: &BindingStore<C>,
    event: &'static str,
    decode: fn(&ContractEvent) -> Result<E, LedgerError>,
) -> Arc<PushSlot<E>>
where
    C: LedgerConnection,
    E: Clone + Send + Sync + 'static,
{
    let store = store.clone();
    PushSlot::new(
        event,
        Box::new(move |publisher: Publisher<E>| {
            let binding = store.get().ok_or(BindingError::UnboundContract)?;
            let sink: EventSink = Arc::new(move |raw: ContractEvent| match decode(&raw) {
                Ok(decoded) => {
                    publisher.publish(decoded);
                }
                Err(e) => {
                    tracing::warn!(contract = %raw.contract, event, error = %e, "Skipping malformed event")
                }
            });
            let subscription = binding
                .connection
                .subscribe(&binding.address, event, sink)
                .map_err(|e| BindingError::remote(event, e))?;
            Ok(Lease::new(subscription))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use std::error::Error as _;

    const TOKEN: &str = "CTOKEN";
    const OTHER: &str = "COTHER";
    const OWNER: &str = "GOWNER";
    const BOB: &str = "GBOB";
    const SPENDER: &str = "GSPENDER";

    fn amount(n: u64) -> U256 {
        U256::from(n)
    }

    fn ledger() -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.deploy(TOKEN, "Test Token", "TT", 7);
        ledger.mint(TOKEN, OWNER, amount(1_000)).unwrap();
        ledger
    }

    fn owner_binding(ledger: &InMemoryLedger) -> TokenBinding<InMemoryLedger> {
        TokenBinding::bound(TOKEN, ledger.connect_as(OWNER)).unwrap()
    }

    #[test]
    fn test_init_sets_binding() {
        let ledger = ledger();
        let binding = TokenBinding::<InMemoryLedger>::new();
        assert!(binding.contract().is_none());

        binding.init(TOKEN, ledger.clone()).unwrap();
        assert_eq!(binding.contract().unwrap().address(), TOKEN);
    }

    #[test]
    fn test_init_rejects_empty_address_and_keeps_binding() {
        let ledger = ledger();
        let binding = TokenBinding::<InMemoryLedger>::new();
        assert!(matches!(
            binding.init("", ledger.clone()),
            Err(BindingError::InvalidAddress {
                parameter: "address"
            })
        ));
        assert!(binding.contract().is_none());

        binding.init(TOKEN, ledger.clone()).unwrap();
        let changes = binding.watch_contract();
        assert!(binding.init("", ledger.clone()).is_err());
        assert_eq!(binding.contract().unwrap().address(), TOKEN);
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_unbound_binding_fails_explicitly() {
        let binding = TokenBinding::<InMemoryLedger>::new();
        assert!(matches!(
            binding.name().get().await,
            Err(BindingError::UnboundContract)
        ));
        assert!(matches!(
            binding.balance_of(OWNER).get().await,
            Err(BindingError::UnboundContract)
        ));
        assert!(matches!(
            binding.transfer(BOB, amount(1)).await,
            Err(BindingError::UnboundContract)
        ));
        assert!(matches!(
            binding.transfer_events(),
            Err(BindingError::UnboundContract)
        ));
    }

    #[tokio::test]
    async fn test_metadata_reads_once() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);

        assert_eq!(binding.name().get().await.unwrap(), "Test Token");
        assert_eq!(binding.name().get().await.unwrap(), "Test Token");
        assert_eq!(ledger.reads(), 1);

        let metadata = binding.metadata().await.unwrap();
        assert_eq!(
            metadata,
            MetadataView {
                name: "Test Token".to_string(),
                symbol: "TT".to_string(),
                decimals: 7,
                total_supply: amount(1_000),
            }
        );
        // name was memoized; symbol, decimals and total supply were not.
        assert_eq!(ledger.reads(), 4);
    }

    #[tokio::test]
    async fn test_reinit_recomputes_metadata() {
        let ledger = ledger();
        ledger.deploy(OTHER, "Other Token", "OT", 2);
        let binding = owner_binding(&ledger);
        assert_eq!(binding.symbol().get().await.unwrap(), "TT");
        assert!(!binding.symbol().is_stale().await);

        binding.init(OTHER, ledger.connect_as(OWNER)).unwrap();
        assert!(binding.symbol().is_stale().await);
        assert_eq!(binding.symbol().get().await.unwrap(), "OT");
        assert_eq!(binding.decimals().get().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_keeps_cause() {
        let ledger = InMemoryLedger::new();
        let binding = TokenBinding::bound("CMISSING", ledger).unwrap();
        let err = binding.total_supply().get().await.unwrap_err();
        assert!(matches!(
            err,
            BindingError::RemoteCall {
                function: "total_supply",
                source: LedgerError::Simulation(_)
            }
        ));
        assert!(err.source().is_some());
    }

    #[tokio::test]
    async fn test_transfer_refreshes_balance() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);
        let balance = binding.balance_of(OWNER);

        assert_eq!(balance.get().await.unwrap(), amount(1_000));
        assert_eq!(balance.get().await.unwrap(), amount(1_000));
        assert_eq!(ledger.reads(), 1);

        let receipt = binding.transfer(BOB, amount(100)).await.unwrap();
        assert_eq!(receipt.ledger, ledger.sequence());
        assert_eq!(receipt.hash.len(), 64);
        assert_eq!(binding.refresh_counter().version(), 1);

        assert!(balance.is_stale().await);
        assert_eq!(balance.get().await.unwrap(), amount(900));
        assert_eq!(ledger.reads(), 2);
        assert_eq!(ledger.balance(TOKEN, BOB), amount(100));
    }

    #[tokio::test]
    async fn test_refresh_follows_confirmation() {
        let ledger = ledger();
        ledger.set_auto_mine(false);
        let binding = owner_binding(&ledger);
        let balance = binding.balance_of(OWNER);
        balance.get().await.unwrap();

        let (receipt, ()) = tokio::join!(binding.transfer(BOB, amount(10)), async {
            while ledger.pending_count() == 0 {
                tokio::task::yield_now().await;
            }
            // Submitted but not confirmed: nothing may refresh yet.
            assert_eq!(binding.refresh_counter().version(), 0);
            assert!(!balance.is_stale().await);
            assert_eq!(ledger.mine(), 1);
        });

        receipt.unwrap();
        assert_eq!(binding.refresh_counter().version(), 1);
        assert_eq!(balance.get().await.unwrap(), amount(990));
    }

    #[tokio::test]
    async fn test_invalid_addresses_never_reach_the_ledger() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);

        assert!(matches!(
            binding.transfer("", amount(1)).await,
            Err(BindingError::InvalidAddress { parameter: "to" })
        ));
        assert!(matches!(
            binding.transfer_from(OWNER, "", amount(1)).await,
            Err(BindingError::InvalidAddress { parameter: "to" })
        ));
        assert!(matches!(
            binding.transfer_from("", BOB, amount(1)).await,
            Err(BindingError::InvalidAddress { parameter: "from" })
        ));
        assert!(matches!(
            binding.approve("", amount(1)).await,
            Err(BindingError::InvalidAddress {
                parameter: "spender"
            })
        ));

        assert_eq!(ledger.reads(), 0);
        assert_eq!(ledger.submits(), 0);
        assert_eq!(binding.refresh_counter().version(), 0);
    }

    #[tokio::test]
    async fn test_failed_actions_do_not_refresh() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);

        ledger.fail_next_submit("mempool full");
        let err = binding.transfer(BOB, amount(1)).await.unwrap_err();
        match &err {
            BindingError::RemoteCall {
                function: "transfer",
                source: LedgerError::Rejected(reason),
            } => assert_eq!(reason, "mempool full"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.source().unwrap().to_string(), "Transaction rejected: mempool full");

        let err = binding.transfer(BOB, amount(5_000)).await.unwrap_err();
        assert!(matches!(
            err.ledger_error(),
            Some(LedgerError::TransactionFailed { .. })
        ));

        assert_eq!(binding.refresh_counter().version(), 0);
        assert_eq!(ledger.balance(TOKEN, OWNER), amount(1_000));
    }

    #[tokio::test]
    async fn test_read_only_connection_cannot_act() {
        let ledger = ledger();
        let binding = TokenBinding::bound(TOKEN, ledger.clone()).unwrap();
        assert_eq!(
            binding.balance_of(OWNER).get().await.unwrap(),
            amount(1_000)
        );
        let err = binding.transfer(BOB, amount(1)).await.unwrap_err();
        assert!(matches!(
            err,
            BindingError::RemoteCall {
                function: "transfer",
                source: LedgerError::SignerRequired
            }
        ));
    }

    #[tokio::test]
    async fn test_approve_then_transfer_from() {
        let ledger = ledger();
        let owner = owner_binding(&ledger);
        let spender = TokenBinding::bound(TOKEN, ledger.connect_as(SPENDER)).unwrap();
        let allowance = spender.allowance(OWNER, SPENDER);
        assert_eq!(allowance.get().await.unwrap(), U256::ZERO);

        owner.approve(SPENDER, amount(50)).await.unwrap();
        // The spender's binding has not seen an action yet.
        assert!(!allowance.is_stale().await);
        assert_eq!(owner.allowance(OWNER, SPENDER).get().await.unwrap(), amount(50));

        spender.transfer_from(OWNER, BOB, amount(30)).await.unwrap();
        assert_eq!(allowance.get().await.unwrap(), amount(20));
        assert_eq!(
            spender.balance_of(BOB).get().await.unwrap(),
            amount(30)
        );

        let err = spender
            .transfer_from(OWNER, BOB, amount(21))
            .await
            .unwrap_err();
        assert!(matches!(
            err.ledger_error(),
            Some(LedgerError::TransactionFailed { reason, .. }) if reason == "insufficient allowance"
        ));
    }

    #[tokio::test]
    async fn test_approve_refreshes_allowance() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);
        let allowance = binding.allowance(OWNER, SPENDER);
        assert_eq!(allowance.get().await.unwrap(), U256::ZERO);
        assert_eq!(ledger.reads(), 1);

        binding.approve(SPENDER, amount(50)).await.unwrap();
        assert_eq!(binding.refresh_counter().version(), 1);
        assert!(allowance.is_stale().await);
        assert_eq!(allowance.get().await.unwrap(), amount(50));
        assert_eq!(ledger.reads(), 2);
    }

    #[tokio::test]
    async fn test_failed_approve_does_not_refresh() {
        let ledger = ledger();
        let binding = TokenBinding::with_options(BindingOptions {
            approval_ttl_ledgers: 0,
            serialize_actions: false,
        });
        binding.init(TOKEN, ledger.connect_as(OWNER)).unwrap();
        let allowance = binding.allowance(OWNER, SPENDER);
        allowance.get().await.unwrap();

        let err = binding.approve(SPENDER, amount(50)).await.unwrap_err();
        assert!(matches!(
            err.ledger_error(),
            Some(LedgerError::TransactionFailed { reason, .. }) if reason == "expiration ledger is in the past"
        ));
        assert_eq!(binding.refresh_counter().version(), 0);
        assert!(!allowance.is_stale().await);
        assert_eq!(allowance.get().await.unwrap(), U256::ZERO);
        assert_eq!(ledger.reads(), 1);
    }

    #[tokio::test]
    async fn test_events_before_attach_are_lost() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);

        binding.transfer(BOB, amount(1)).await.unwrap();
        let observer = binding.transfer_events().unwrap();
        assert_eq!(observer.latest(), None);

        binding.transfer(BOB, amount(2)).await.unwrap();
        assert_eq!(
            observer.latest(),
            Some(TransferEvent {
                from: OWNER.to_string(),
                to: BOB.to_string(),
                value: amount(2),
            })
        );
    }

    #[tokio::test]
    async fn test_subscription_released_with_last_observer() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);

        let first = binding.transfer_events().unwrap();
        let second = binding.transfer_events().unwrap();
        assert_eq!(ledger.listener_count(), 1);

        drop(first);
        assert_eq!(ledger.listener_count(), 1);
        drop(second);
        assert_eq!(ledger.listener_count(), 0);

        // Re-attaching starts from an empty slot.
        binding.transfer(BOB, amount(3)).await.unwrap();
        let again = binding.transfer_events().unwrap();
        assert_eq!(again.latest(), None);
    }

    #[tokio::test]
    async fn test_approval_events_carry_expiration() {
        let ledger = ledger();
        let binding = TokenBinding::with_options(BindingOptions {
            approval_ttl_ledgers: 100,
            serialize_actions: false,
        });
        binding.init(TOKEN, ledger.connect_as(OWNER)).unwrap();
        let mut observer = binding.approval_events().unwrap();

        let start = ledger.sequence();
        let (event, receipt) = tokio::join!(observer.next(), binding.approve(SPENDER, amount(7)));
        receipt.unwrap();
        assert_eq!(
            event,
            Some(ApprovalEvent {
                owner: OWNER.to_string(),
                spender: SPENDER.to_string(),
                value: amount(7),
                expiration_ledger: Some(start as u32 + 100),
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_events_are_skipped() {
        let ledger = ledger();
        let binding = owner_binding(&ledger);
        let observer = binding.transfer_events().unwrap();

        ledger.emit(ContractEvent {
            contract: TOKEN.to_string(),
            ledger: ledger.sequence(),
            topics: vec![Value::String("transfer".to_string()), Value::U32(1)],
            data: Value::Amount(amount(1)),
        });
        assert_eq!(observer.latest(), None);
    }

    #[tokio::test]
    async fn test_concurrent_actions_share_a_ledger_by_default() {
        let ledger = ledger();
        ledger.set_auto_mine(false);
        let binding = owner_binding(&ledger);

        let (a, b, ()) = tokio::join!(
            binding.transfer(BOB, amount(1)),
            binding.transfer(BOB, amount(2)),
            async {
                while ledger.pending_count() < 2 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(ledger.mine(), 2);
            }
        );
        assert_eq!(a.unwrap().ledger, b.unwrap().ledger);
        assert_eq!(binding.refresh_counter().version(), 2);
    }

    #[tokio::test]
    async fn test_serialized_actions_run_one_at_a_time() {
        let ledger = ledger();
        ledger.set_auto_mine(false);
        let binding = TokenBinding::with_options(BindingOptions {
            serialize_actions: true,
            ..BindingOptions::default()
        });
        binding.init(TOKEN, ledger.connect_as(OWNER)).unwrap();

        let (a, b, ()) = tokio::join!(
            binding.transfer(BOB, amount(1)),
            binding.transfer(BOB, amount(2)),
            async {
                while ledger.pending_count() == 0 {
                    tokio::task::yield_now().await;
                }
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(ledger.pending_count(), 1);
                assert_eq!(ledger.mine(), 1);

                while ledger.pending_count() == 0 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(ledger.mine(), 1);
            }
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.ledger < b.ledger);
        assert_eq!(ledger.balance(TOKEN, BOB), amount(3));
    }
}
