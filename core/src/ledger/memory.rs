//! An in-process token ledger.
//!
//! [`InMemoryLedger`] runs the transfer and approval logic of
//! `contracts/token` (balances, allowances with expiration, metadata, total
//! supply, `transfer`/`approve` events) against plain maps. There is no
//! admin: [`InMemoryLedger::mint`] credits directly and its event topics are
//! `("mint", to)`, without the admin topic the contract publishes. Submitted transactions sit in a mempool until they are
//! mined: with auto-mine on (the default) `wait()` mines them, otherwise
//! [`InMemoryLedger::mine`] does. Reads and submissions are counted so tests
//! can check how often the network would have been hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use alloy_primitives::U256;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use super::{Arg, ContractEvent, EventSink, LedgerConnection, PendingTransaction, Receipt, Value};
use crate::errors::LedgerError;

#[derive(Debug, Clone)]
struct Allowance {
    amount: U256,
    expiration_ledger: u32,
}

#[derive(Debug)]
struct TokenState {
    name: String,
    symbol: String,
    decimals: u32,
    total_supply: U256,
    balances: HashMap<String, U256>,
    allowances: HashMap<(String, String), Allowance>,
}

impl TokenState {
    fn balance(&self, id: &str) -> U256 {
        self.balances.get(id).copied().unwrap_or(U256::ZERO)
    }

    fn allowance(&self, from: &str, spender: &str, sequence: u64) -> Allowance {
        match self.allowances.get(&(from.to_string(), spender.to_string())) {
            Some(a) if u64::from(a.expiration_ledger) >= sequence => a.clone(),
            _ => Allowance {
                amount: U256::ZERO,
                expiration_ledger: 0,
            },
        }
    }

    fn spend_balance(&mut self, id: &str, amount: U256) -> Result<(), String> {
        let balance = self.balance(id);
        let remaining = balance
            .checked_sub(amount)
            .ok_or_else(|| "insufficient balance".to_string())?;
        self.balances.insert(id.to_string(), remaining);
        Ok(())
    }

    fn receive_balance(&mut self, id: &str, amount: U256) -> Result<(), String> {
        let balance = self.balance(id);
        let updated = balance
            .checked_add(amount)
            .ok_or_else(|| "balance overflow".to_string())?;
        self.balances.insert(id.to_string(), updated);
        Ok(())
    }
}

/// A queued state-changing call with every argument resolved.
struct QueuedTx {
    hash: String,
    contract: String,
    function: String,
    args: Vec<Arg>,
    done: oneshot::Sender<Result<Receipt, LedgerError>>,
}

struct Listener {
    contract: String,
    event: String,
    sink: EventSink,
}

struct LedgerState {
    sequence: u64,
    contracts: HashMap<String, TokenState>,
    listeners: HashMap<u64, Listener>,
    mempool: Vec<QueuedTx>,
    fail_next_submit: Option<String>,
}

struct Ledger {
    state: Mutex<LedgerState>,
    auto_mine: AtomicBool,
    next_listener: AtomicU64,
    next_tx: AtomicU64,
    reads: AtomicUsize,
    submits: AtomicUsize,
}

impl Ledger {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mine(&self) -> usize {
        let (mined, events) = {
            let mut state = self.lock();
            if state.mempool.is_empty() {
                return 0;
            }
            state.sequence += 1;
            let sequence = state.sequence;
            let queued = std::mem::take(&mut state.mempool);
            let mined = queued.len();
            let mut events = Vec::new();
            for tx in queued {
                let outcome = apply(&mut state, &tx, sequence, &mut events);
                let result = match outcome {
                    Ok(()) => Ok(Receipt {
                        hash: tx.hash.clone(),
                        ledger: sequence,
                    }),
                    Err(reason) => {
                        tracing::debug!(hash = %tx.hash, %reason, "transaction failed");
                        Err(LedgerError::TransactionFailed {
                            hash: tx.hash.clone(),
                            reason,
                        })
                    }
                };
                // The submitter may have stopped waiting.
                let _ = tx.done.send(result);
            }
            let deliveries: Vec<(EventSink, ContractEvent)> = events
                .into_iter()
                .flat_map(|event: ContractEvent| {
                    listeners_for(&state, &event)
                        .into_iter()
                        .map(move |sink| (sink, event.clone()))
                        .collect::<Vec<_>>()
                })
                .collect();
            (mined, deliveries)
        };
        for (sink, event) in events {
            sink(event);
        }
        mined
    }
}

fn listeners_for(state: &LedgerState, event: &ContractEvent) -> Vec<EventSink> {
    let name = match event.topics.first() {
        Some(Value::String(name)) => name.as_str(),
        _ => return Vec::new(),
    };
    state
        .listeners
        .values()
        .filter(|l| l.contract == event.contract && l.event == name)
        .map(|l| Arc::clone(&l.sink))
        .collect()
}

fn apply(
    state: &mut LedgerState,
    tx: &QueuedTx,
    sequence: u64,
    events: &mut Vec<ContractEvent>,
) -> Result<(), String> {
    let token = state
        .contracts
        .get_mut(&tx.contract)
        .ok_or_else(|| format!("contract {} not found", tx.contract))?;
    let event = |topics: Vec<Value>, data: Value| ContractEvent {
        contract: tx.contract.clone(),
        ledger: sequence,
        topics,
        data,
    };

    match tx.function.as_str() {
        "transfer" => {
            let from = address_arg(&tx.args, 0).map_err(|e| e.to_string())?;
            let to = address_arg(&tx.args, 1).map_err(|e| e.to_string())?;
            let amount = amount_arg(&tx.args, 2).map_err(|e| e.to_string())?;
            token.spend_balance(&from, amount)?;
            token.receive_balance(&to, amount)?;
            events.push(event(
                vec![
                    Value::String("transfer".to_string()),
                    Value::Address(from),
                    Value::Address(to),
                ],
                Value::Amount(amount),
            ));
        }
        "transfer_from" => {
            let spender = address_arg(&tx.args, 0).map_err(|e| e.to_string())?;
            let from = address_arg(&tx.args, 1).map_err(|e| e.to_string())?;
            let to = address_arg(&tx.args, 2).map_err(|e| e.to_string())?;
            let amount = amount_arg(&tx.args, 3).map_err(|e| e.to_string())?;
            let allowance = token.allowance(&from, &spender, sequence);
            let remaining = allowance
                .amount
                .checked_sub(amount)
                .ok_or_else(|| "insufficient allowance".to_string())?;
            token.spend_balance(&from, amount)?;
            token.receive_balance(&to, amount)?;
            if !amount.is_zero() {
                token.allowances.insert(
                    (from.clone(), spender),
                    Allowance {
                        amount: remaining,
                        expiration_ledger: allowance.expiration_ledger,
                    },
                );
            }
            events.push(event(
                vec![
                    Value::String("transfer".to_string()),
                    Value::Address(from),
                    Value::Address(to),
                ],
                Value::Amount(amount),
            ));
        }
        "approve" => {
            let from = address_arg(&tx.args, 0).map_err(|e| e.to_string())?;
            let spender = address_arg(&tx.args, 1).map_err(|e| e.to_string())?;
            let amount = amount_arg(&tx.args, 2).map_err(|e| e.to_string())?;
            let expiration_ledger = u32_arg(&tx.args, 3).map_err(|e| e.to_string())?;
            if amount > U256::ZERO && u64::from(expiration_ledger) < sequence {
                return Err("expiration ledger is in the past".to_string());
            }
            let key = (from.clone(), spender.clone());
            if amount.is_zero() {
                token.allowances.remove(&key);
            } else {
                token.allowances.insert(
                    key,
                    Allowance {
                        amount,
                        expiration_ledger,
                    },
                );
            }
            events.push(event(
                vec![
                    Value::String("approve".to_string()),
                    Value::Address(from),
                    Value::Address(spender),
                ],
                Value::Vec(vec![Value::Amount(amount), Value::U32(expiration_ledger)]),
            ));
        }
        other => return Err(format!("unknown function `{other}`")),
    }
    Ok(())
}

fn arg_at(args: &[Arg], index: usize) -> Result<&Arg, LedgerError> {
    args.get(index)
        .ok_or_else(|| LedgerError::InvalidArgument(format!("missing argument {index}")))
}

fn address_arg(args: &[Arg], index: usize) -> Result<String, LedgerError> {
    match arg_at(args, index)? {
        Arg::Address(a) if !a.is_empty() => Ok(a.clone()),
        Arg::Address(_) => Err(LedgerError::InvalidArgument(format!(
            "argument {index}: empty address"
        ))),
        other => Err(LedgerError::InvalidArgument(format!(
            "argument {index}: expected address, got {other:?}"
        ))),
    }
}

fn amount_arg(args: &[Arg], index: usize) -> Result<U256, LedgerError> {
    match arg_at(args, index)? {
        Arg::Amount(a) => Ok(*a),
        other => Err(LedgerError::InvalidArgument(format!(
            "argument {index}: expected amount, got {other:?}"
        ))),
    }
}

fn u32_arg(args: &[Arg], index: usize) -> Result<u32, LedgerError> {
    match arg_at(args, index)? {
        Arg::U32(v) => Ok(*v),
        other => Err(LedgerError::InvalidArgument(format!(
            "argument {index}: expected u32, got {other:?}"
        ))),
    }
}

/// Token ledger kept in memory.
///
/// Cloning shares the ledger. [`connect_as`](Self::connect_as) hands out a
/// connection to the same ledger that signs as a given account; a plain
/// [`new`](Self::new) ledger is read-only.
#[derive(Clone)]
pub struct InMemoryLedger {
    ledger: Arc<Ledger>,
    signer: Option<String>,
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("signer", &self.signer)
            .field("sequence", &self.sequence())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// An empty ledger at sequence 1, without a signer.
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Ledger {
                state: Mutex::new(LedgerState {
                    sequence: 1,
                    contracts: HashMap::new(),
                    listeners: HashMap::new(),
                    mempool: Vec::new(),
                    fail_next_submit: None,
                }),
                auto_mine: AtomicBool::new(true),
                next_listener: AtomicU64::new(1),
                next_tx: AtomicU64::new(1),
                reads: AtomicUsize::new(0),
                submits: AtomicUsize::new(0),
            }),
            signer: None,
        }
    }

    /// A connection to the same ledger that signs as `account`.
    pub fn connect_as(&self, account: impl Into<String>) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            signer: Some(account.into()),
        }
    }

    pub fn signer(&self) -> Option<&str> {
        self.signer.as_deref()
    }

    /// Deploy a token contract at `contract`, replacing any previous one.
    pub fn deploy(&self, contract: &str, name: &str, symbol: &str, decimals: u32) {
        self.ledger.lock().contracts.insert(
            contract.to_string(),
            TokenState {
                name: name.to_string(),
                symbol: symbol.to_string(),
                decimals,
                total_supply: U256::ZERO,
                balances: HashMap::new(),
                allowances: HashMap::new(),
            },
        );
    }

    /// Credit `to` and grow the total supply. Emits a `mint` event with
    /// topics `("mint", to)`.
    pub fn mint(&self, contract: &str, to: &str, amount: U256) -> Result<(), LedgerError> {
        let (event, sinks) = {
            let mut state = self.ledger.lock();
            let sequence = state.sequence;
            let token = state
                .contracts
                .get_mut(contract)
                .ok_or_else(|| LedgerError::Rejected(format!("contract {contract} not found")))?;
            token
                .receive_balance(to, amount)
                .map_err(LedgerError::Rejected)?;
            token.total_supply = token
                .total_supply
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Rejected("total supply overflow".to_string()))?;
            let event = ContractEvent {
                contract: contract.to_string(),
                ledger: sequence,
                topics: vec![
                    Value::String("mint".to_string()),
                    Value::Address(to.to_string()),
                ],
                data: Value::Amount(amount),
            };
            let sinks = listeners_for(&state, &event);
            (event, sinks)
        };
        for sink in sinks {
            sink(event.clone());
        }
        Ok(())
    }

    /// Push a raw event to every matching listener, as if the contract had
    /// emitted it.
    pub fn emit(&self, event: ContractEvent) {
        let sinks = listeners_for(&self.ledger.lock(), &event);
        for sink in sinks {
            sink(event.clone());
        }
    }

    /// Balance straight from ledger state; not counted as a read.
    pub fn balance(&self, contract: &str, id: &str) -> U256 {
        self.ledger
            .lock()
            .contracts
            .get(contract)
            .map(|t| t.balance(id))
            .unwrap_or(U256::ZERO)
    }

    /// When off, submitted transactions wait for [`mine`](Self::mine).
    pub fn set_auto_mine(&self, enabled: bool) {
        self.ledger.auto_mine.store(enabled, Ordering::SeqCst);
    }

    /// Close a ledger containing every queued transaction. Returns how many
    /// were included.
    pub fn mine(&self) -> usize {
        self.ledger.mine()
    }

    /// Make the next submission fail with [`LedgerError::Rejected`].
    pub fn fail_next_submit(&self, reason: impl Into<String>) {
        self.ledger.lock().fail_next_submit = Some(reason.into());
    }

    pub fn sequence(&self) -> u64 {
        self.ledger.lock().sequence
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.lock().mempool.len()
    }

    pub fn listener_count(&self) -> usize {
        self.ledger.lock().listeners.len()
    }

    /// Read-only calls served so far.
    pub fn reads(&self) -> usize {
        self.ledger.reads.load(Ordering::SeqCst)
    }

    /// Transactions accepted into the mempool so far.
    pub fn submits(&self) -> usize {
        self.ledger.submits.load(Ordering::SeqCst)
    }

    fn read(&self, contract: &str, function: &str, args: &[Arg]) -> Result<Value, LedgerError> {
        let state = self.ledger.lock();
        let token = state
            .contracts
            .get(contract)
            .ok_or_else(|| LedgerError::Simulation(format!("contract {contract} not found")))?;
        let value = match function {
            "name" => Value::String(token.name.clone()),
            "symbol" => Value::String(token.symbol.clone()),
            "decimals" => Value::U32(token.decimals),
            "total_supply" => Value::Amount(token.total_supply),
            "balance" => Value::Amount(token.balance(&address_arg(args, 0)?)),
            "allowance" => {
                let from = address_arg(args, 0)?;
                let spender = address_arg(args, 1)?;
                Value::Amount(token.allowance(&from, &spender, state.sequence).amount)
            }
            other => {
                return Err(LedgerError::Simulation(format!(
                    "function `{other}` is not a read-only token function"
                )))
            }
        };
        Ok(value)
    }

    fn resolve(&self, args: Vec<Arg>, sequence: u64) -> Result<Vec<Arg>, LedgerError> {
        args.into_iter()
            .map(|arg| match arg {
                Arg::Invoker => self
                    .signer
                    .clone()
                    .map(Arg::Address)
                    .ok_or(LedgerError::SignerRequired),
                Arg::LedgersFromNow(n) => {
                    let target = sequence.saturating_add(u64::from(n));
                    Ok(Arg::U32(u32::try_from(target).unwrap_or(u32::MAX)))
                }
                other => Ok(other),
            })
            .collect()
    }
}

/// Handle for a transaction in the mempool.
pub struct MemoryPending {
    hash: String,
    ledger: Arc<Ledger>,
    done: oneshot::Receiver<Result<Receipt, LedgerError>>,
}

impl PendingTransaction for MemoryPending {
    fn hash(&self) -> &str {
        &self.hash
    }

    async fn wait(self) -> Result<Receipt, LedgerError> {
        if self.ledger.auto_mine.load(Ordering::SeqCst) {
            self.ledger.mine();
        }
        self.done
            .await
            .map_err(|_| LedgerError::Rejected(format!("transaction {} was dropped", self.hash)))?
    }
}

/// Registration of an event listener; dropping it unregisters.
pub struct MemorySubscription {
    ledger: Weak<Ledger>,
    id: u64,
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.upgrade() {
            ledger.lock().listeners.remove(&self.id);
        }
    }
}

impl LedgerConnection for InMemoryLedger {
    type Pending = MemoryPending;
    type Subscription = MemorySubscription;

    async fn call(&self, contract: &str, function: &str, args: Vec<Arg>) -> Result<Value, LedgerError> {
        self.ledger.reads.fetch_add(1, Ordering::SeqCst);
        self.read(contract, function, &args)
    }

    async fn submit(
        &self,
        contract: &str,
        function: &str,
        args: Vec<Arg>,
    ) -> Result<MemoryPending, LedgerError> {
        let mut state = self.ledger.lock();
        if let Some(reason) = state.fail_next_submit.take() {
            return Err(LedgerError::Rejected(reason));
        }
        if !state.contracts.contains_key(contract) {
            return Err(LedgerError::Simulation(format!(
                "contract {contract} not found"
            )));
        }
        let args = self.resolve(args, state.sequence)?;

        // The first argument of every token mutation is the authorizing account.
        let authorizer = address_arg(&args, 0)?;
        if self.signer.as_deref() != Some(authorizer.as_str()) {
            return Err(LedgerError::Rejected(format!(
                "{authorizer} did not authorize `{function}`"
            )));
        }

        let id = self.ledger.next_tx.fetch_add(1, Ordering::SeqCst);
        let digest = Sha256::digest(format!("{id}:{contract}:{function}").as_bytes());
        let hash = hex::encode(digest);
        let (done, rx) = oneshot::channel();
        state.mempool.push(QueuedTx {
            hash: hash.clone(),
            contract: contract.to_string(),
            function: function.to_string(),
            args,
            done,
        });
        self.ledger.submits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%hash, contract, function, "transaction queued");

        Ok(MemoryPending {
            hash,
            ledger: Arc::clone(&self.ledger),
            done: rx,
        })
    }

    fn subscribe(
        &self,
        contract: &str,
        event: &str,
        sink: EventSink,
    ) -> Result<MemorySubscription, LedgerError> {
        let id = self.ledger.next_listener.fetch_add(1, Ordering::SeqCst);
        self.ledger.lock().listeners.insert(
            id,
            Listener {
                contract: contract.to_string(),
                event: event.to_string(),
                sink,
            },
        );
        Ok(MemorySubscription {
            ledger: Arc::downgrade(&self.ledger),
            id,
        })
    }
}
