//! [`LedgerConnection`] over Soroban JSON-RPC.
//!
//! Reads run through `simulateTransaction`. Submissions are simulated,
//! assembled with the returned footprint, auth entries and resource fee,
//! signed locally and sent with `sendTransaction`; confirmation polls
//! `getTransaction`. Event subscriptions poll `getEvents` from a background
//! task that is aborted when the subscription is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use soroban_sdk::xdr::{
    AccountId, HostFunction, InvokeContractArgs, InvokeHostFunctionOp, LedgerEntryData, LedgerKey,
    LedgerKeyAccount, Memo, MuxedAccount, Operation, OperationBody, Preconditions, PublicKey,
    ScAddress, ScSymbol, ScVal, SequenceNumber, SorobanAuthorizationEntry, SorobanTransactionData,
    TimeBounds, TimePoint, Transaction, TransactionEnvelope, TransactionExt, TransactionV1Envelope,
    Uint256, VecM,
};
use tokio::task::JoinHandle;

use super::{
    scval, Arg, ContractEvent, EventSink, LedgerConnection, LocalSigner, PendingTransaction,
    Receipt, Value,
};
use crate::errors::LedgerError;

const BASE_FEE: u32 = 100;

/// Upper time bound placed on submitted transactions.
const TX_VALIDITY_SECS: u64 = 300;

/// A pending transaction that is still unknown after this long is reported
/// as timed out.
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(TX_VALIDITY_SECS + 30);

const EVENT_PAGE_LIMIT: u32 = 100;

/// Endpoint and timing for an [`RpcConnection`].
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub rpc_url: String,
    pub network_passphrase: String,
    pub request_timeout: Duration,
    /// Interval for confirmation and event polling.
    pub poll_interval: Duration,
}

impl RpcSettings {
    pub fn new(rpc_url: impl Into<String>, network_passphrase: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            network_passphrase: network_passphrase.into(),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResult {
    #[serde(default)]
    transaction_data: String,
    #[serde(default)]
    min_resource_fee: String,
    #[serde(default)]
    results: Vec<HostFunctionResult>,
    #[serde(default)]
    latest_ledger: u64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostFunctionResult {
    #[serde(default)]
    auth: Vec<String>,
    xdr: String,
}

#[derive(Debug, Deserialize)]
struct LatestLedger {
    sequence: u64,
}

#[derive(Debug, Deserialize)]
struct LedgerEntries {
    #[serde(default)]
    entries: Option<Vec<LedgerEntryResult>>,
}

#[derive(Debug, Deserialize)]
struct LedgerEntryResult {
    xdr: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResult {
    status: String,
    hash: String,
    #[serde(default)]
    error_result_xdr: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionStatus {
    status: String,
    #[serde(default)]
    ledger: Option<u64>,
    #[serde(default)]
    result_xdr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<RawEvent>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    contract_id: String,
    ledger: u64,
    #[serde(default)]
    paging_token: Option<String>,
    topic: Vec<String>,
    value: String,
}

struct RpcInner {
    settings: RpcSettings,
    client: Client,
    signer: Option<LocalSigner>,
    next_id: AtomicU64,
}

/// A Soroban RPC endpoint, optionally with a signing key.
///
/// Cloning is cheap and shares the HTTP client.
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<RpcInner>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("rpc_url", &self.inner.settings.rpc_url)
            .field("signer", &self.inner.signer)
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    /// Without a signer the connection is read-only.
    pub fn new(settings: RpcSettings, signer: Option<LocalSigner>) -> Self {
        Self {
            inner: Arc::new(RpcInner {
                settings,
                client: Client::new(),
                signer,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &RpcSettings {
        &self.inner.settings
    }

    /// `G...` address of the signing account, if any.
    pub fn signer_address(&self) -> Option<String> {
        self.inner.signer.as_ref().map(LocalSigner::address)
    }

    pub async fn latest_ledger(&self) -> Result<u64, LedgerError> {
        self.inner.latest_ledger().await
    }
}

impl RpcInner {
    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, LedgerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::debug!(method, url = %self.settings.rpc_url, "Sending RPC request");

        let response = tokio::time::timeout(
            self.settings.request_timeout,
            self.client
                .post(&self.settings.rpc_url)
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| LedgerError::Timeout)?
        .map_err(|e| {
            if e.is_timeout() {
                LedgerError::Timeout
            } else {
                LedgerError::Network(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(LedgerError::Http(response.status().as_u16()));
        }

        let body: RpcResponse<R> = response.json().await?;
        into_result(method, body)
    }

    async fn latest_ledger(&self) -> Result<u64, LedgerError> {
        let latest: LatestLedger = self.request("getLatestLedger", json!({})).await?;
        Ok(latest.sequence)
    }

    async fn account_sequence(&self, account: [u8; 32]) -> Result<i64, LedgerError> {
        let key = LedgerKey::Account(LedgerKeyAccount {
            account_id: AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(account))),
        });
        let result: LedgerEntries = self
            .request("getLedgerEntries", json!({ "keys": [scval::to_base64(&key)?] }))
            .await?;

        let entry = result
            .entries
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Rejected("source account does not exist".to_string()))?;

        match scval::from_base64::<LedgerEntryData>(&entry.xdr)? {
            LedgerEntryData::Account(account) => Ok(account.seq_num.0),
            _ => Err(LedgerError::Decode("expected an account ledger entry".to_string())),
        }
    }

    async fn simulate(&self, tx: Transaction) -> Result<SimulateResult, LedgerError> {
        let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: VecM::default(),
        });
        let result: SimulateResult = self
            .request(
                "simulateTransaction",
                json!({ "transaction": scval::to_base64(&envelope)? }),
            )
            .await?;

        if let Some(error) = result.error {
            return Err(LedgerError::Simulation(error));
        }
        tracing::debug!(latest_ledger = result.latest_ledger, "Simulation successful");
        Ok(result)
    }

    async fn resolve_args(&self, args: Vec<Arg>) -> Result<Vec<ScVal>, LedgerError> {
        let mut latest = None;
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            let value = match arg {
                Arg::Address(address) => ScVal::Address(scval::address(&address)?),
                Arg::Amount(amount) => scval::amount(amount)?,
                Arg::U32(v) => ScVal::U32(v),
                Arg::Invoker => {
                    let signer = self.signer.as_ref().ok_or(LedgerError::SignerRequired)?;
                    ScVal::Address(ScAddress::Account(AccountId(
                        PublicKey::PublicKeyTypeEd25519(Uint256(signer.public_key())),
                    )))
                }
                Arg::LedgersFromNow(n) => {
                    let base = match latest {
                        Some(sequence) => sequence,
                        None => {
                            let sequence = self.latest_ledger().await?;
                            latest = Some(sequence);
                            sequence
                        }
                    };
                    let target = base.saturating_add(u64::from(n));
                    ScVal::U32(u32::try_from(target).unwrap_or(u32::MAX))
                }
            };
            resolved.push(value);
        }
        Ok(resolved)
    }
}

fn into_result<R>(method: &str, body: RpcResponse<R>) -> Result<R, LedgerError> {
    if let Some(error) = body.error {
        tracing::error!(method, "RPC error (code {}): {}", error.code, error.message);
        let message = match error.code {
            -32600 => format!("Invalid request format: {}", error.message),
            -32601 => format!("Method not found: {method}"),
            -32602 => format!("Invalid parameters: {}", error.message),
            -32603 => format!("Internal error: {}", error.message),
            _ => error.message,
        };
        return Err(LedgerError::Node {
            code: error.code,
            message,
        });
    }
    body.result
        .ok_or_else(|| LedgerError::Decode(format!("`{method}` returned neither result nor error")))
}

fn invoke_operation(
    contract: &str,
    function: &str,
    args: Vec<ScVal>,
    auth: Vec<SorobanAuthorizationEntry>,
) -> Result<Operation, LedgerError> {
    let contract_address = scval::address(contract)?;
    if !matches!(contract_address, ScAddress::Contract(_)) {
        return Err(LedgerError::InvalidArgument(format!(
            "{contract} is not a contract address"
        )));
    }
    let function_name: ScSymbol = function
        .try_into()
        .map_err(|_| LedgerError::InvalidArgument(format!("invalid function name: {function}")))?;

    let host_function = HostFunction::InvokeContract(InvokeContractArgs {
        contract_address,
        function_name,
        args: args
            .try_into()
            .map_err(|_| LedgerError::InvalidArgument("too many arguments".to_string()))?,
    });

    Ok(Operation {
        source_account: None,
        body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
            host_function,
            auth: auth
                .try_into()
                .map_err(|_| LedgerError::Xdr("too many auth entries".to_string()))?,
        }),
    })
}

fn transaction(
    source: [u8; 32],
    seq_num: i64,
    fee: u32,
    cond: Preconditions,
    operation: Operation,
    ext: TransactionExt,
) -> Result<Transaction, LedgerError> {
    Ok(Transaction {
        source_account: MuxedAccount::Ed25519(Uint256(source)),
        fee,
        seq_num: SequenceNumber(seq_num),
        cond,
        memo: Memo::None,
        operations: vec![operation]
            .try_into()
            .map_err(|_| LedgerError::Xdr("Failed to create operations".to_string()))?,
        ext,
    })
}

fn validity_window() -> Preconditions {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Preconditions::Time(TimeBounds {
        min_time: TimePoint(0),
        max_time: TimePoint(now + TX_VALIDITY_SECS),
    })
}

fn decode_event(raw: &RawEvent) -> Result<ContractEvent, LedgerError> {
    let topics = raw
        .topic
        .iter()
        .map(|t| scval::to_value(&scval::from_base64::<ScVal>(t)?))
        .collect::<Result<Vec<_>, _>>()?;
    let data = scval::to_value(&scval::from_base64::<ScVal>(&raw.value)?)?;
    Ok(ContractEvent {
        contract: raw.contract_id.clone(),
        ledger: raw.ledger,
        topics,
        data,
    })
}

fn events_params(
    contract: &str,
    topic: &str,
    start_ledger: u64,
    cursor: Option<&str>,
) -> serde_json::Value {
    let filters = json!([{
        "type": "contract",
        "contractIds": [contract],
        "topics": [[topic, "*", "*"]],
    }]);
    match cursor {
        Some(cursor) => json!({
            "filters": filters,
            "pagination": { "cursor": cursor, "limit": EVENT_PAGE_LIMIT },
        }),
        None => json!({
            "startLedger": start_ledger,
            "filters": filters,
            "pagination": { "limit": EVENT_PAGE_LIMIT },
        }),
    }
}

async fn poll_events(inner: Arc<RpcInner>, contract: String, topic: String, sink: EventSink) {
    let mut ticker = tokio::time::interval(inner.settings.poll_interval);

    // Events in ledgers closed before the subscription started are skipped.
    let start_ledger = loop {
        ticker.tick().await;
        match inner.latest_ledger().await {
            Ok(sequence) => break sequence,
            Err(e) => tracing::warn!(%contract, error = %e, "Cannot start event polling"),
        }
    };

    let mut cursor: Option<String> = None;
    loop {
        ticker.tick().await;
        let params = events_params(&contract, &topic, start_ledger, cursor.as_deref());
        let page: EventsPage = match inner.request("getEvents", params).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(%contract, error = %e, "getEvents failed");
                continue;
            }
        };

        let mut last_token = None;
        for raw in &page.events {
            last_token = raw.paging_token.clone();
            if raw.ledger <= start_ledger {
                continue;
            }
            match decode_event(raw) {
                Ok(event) => sink(event),
                Err(e) => tracing::warn!(%contract, error = %e, "Dropping undecodable event"),
            }
        }
        if let Some(next) = page.cursor.or(last_token) {
            cursor = Some(next);
        }
    }
}

/// `Some` once `getTransaction` reports a final outcome.
fn settled(hash: &str, status: TransactionStatus) -> Result<Option<Receipt>, LedgerError> {
    match status.status.as_str() {
        "SUCCESS" => {
            let ledger = status.ledger.ok_or_else(|| {
                LedgerError::Decode(format!("transaction {hash} succeeded without a ledger"))
            })?;
            Ok(Some(Receipt {
                hash: hash.to_string(),
                ledger,
            }))
        }
        "FAILED" => Err(LedgerError::TransactionFailed {
            hash: hash.to_string(),
            reason: status.result_xdr.unwrap_or_else(|| "FAILED".to_string()),
        }),
        _ => Ok(None),
    }
}

/// A transaction accepted by the node, not yet final.
pub struct RpcPending {
    hash: String,
    inner: Arc<RpcInner>,
}

impl PendingTransaction for RpcPending {
    fn hash(&self) -> &str {
        &self.hash
    }

    async fn wait(self) -> Result<Receipt, LedgerError> {
        let deadline = tokio::time::Instant::now() + CONFIRMATION_TIMEOUT;
        loop {
            let status: TransactionStatus = self
                .inner
                .request("getTransaction", json!({ "hash": self.hash }))
                .await?;

            if let Some(receipt) = settled(&self.hash, status)? {
                tracing::info!(hash = %receipt.hash, ledger = receipt.ledger, "Transaction confirmed");
                return Ok(receipt);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(LedgerError::Timeout);
            }
            tokio::time::sleep(self.inner.settings.poll_interval).await;
        }
    }
}

/// Background `getEvents` poller; dropping it stops the task.
pub struct RpcSubscription {
    task: JoinHandle<()>,
}

impl Drop for RpcSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl LedgerConnection for RpcConnection {
    type Pending = RpcPending;
    type Subscription = RpcSubscription;

    async fn call(&self, contract: &str, function: &str, args: Vec<Arg>) -> Result<Value, LedgerError> {
        let args = self.inner.resolve_args(args).await?;
        let operation = invoke_operation(contract, function, args, Vec::new())?;
        let tx = transaction(
            [0u8; 32],
            0,
            BASE_FEE,
            Preconditions::None,
            operation,
            TransactionExt::V0,
        )?;

        let simulation = self.inner.simulate(tx).await?;
        let first = simulation.results.first().ok_or_else(|| {
            LedgerError::Decode(format!("`{function}` simulation returned no result"))
        })?;
        scval::to_value(&scval::from_base64::<ScVal>(&first.xdr)?)
    }

    async fn submit(
        &self,
        contract: &str,
        function: &str,
        args: Vec<Arg>,
    ) -> Result<RpcPending, LedgerError> {
        let inner = &self.inner;
        let signer = inner.signer.as_ref().ok_or(LedgerError::SignerRequired)?;
        let args = inner.resolve_args(args).await?;
        let source = signer.public_key();
        let seq_num = inner.account_sequence(source).await? + 1;
        let cond = validity_window();

        let draft = transaction(
            source,
            seq_num,
            BASE_FEE,
            cond.clone(),
            invoke_operation(contract, function, args.clone(), Vec::new())?,
            TransactionExt::V0,
        )?;
        let simulation = inner.simulate(draft).await?;
        let first = simulation.results.first().ok_or_else(|| {
            LedgerError::Decode(format!("`{function}` simulation returned no result"))
        })?;

        let auth = first
            .auth
            .iter()
            .map(|entry| scval::from_base64::<SorobanAuthorizationEntry>(entry))
            .collect::<Result<Vec<_>, _>>()?;
        let soroban_data: SorobanTransactionData =
            scval::from_base64(&simulation.transaction_data)?;
        let resource_fee: u32 = simulation
            .min_resource_fee
            .parse()
            .map_err(|e| LedgerError::Decode(format!("minResourceFee: {e}")))?;

        let tx = transaction(
            source,
            seq_num,
            BASE_FEE.saturating_add(resource_fee),
            cond,
            invoke_operation(contract, function, args, auth)?,
            TransactionExt::V1(soroban_data),
        )?;
        let envelope = signer.sign_transaction(tx, &inner.settings.network_passphrase)?;

        let sent: SendResult = inner
            .request(
                "sendTransaction",
                json!({ "transaction": scval::to_base64(&envelope)? }),
            )
            .await?;

        match sent.status.as_str() {
            "PENDING" | "DUPLICATE" => {
                tracing::info!(hash = %sent.hash, function, "Transaction submitted");
                Ok(RpcPending {
                    hash: sent.hash,
                    inner: Arc::clone(&self.inner),
                })
            }
            "TRY_AGAIN_LATER" => Err(LedgerError::Rejected(
                "node is congested, try again later".to_string(),
            )),
            status => Err(LedgerError::Rejected(format!(
                "{status}: {}",
                sent.error_result_xdr.unwrap_or_default()
            ))),
        }
    }

    fn subscribe(
        &self,
        contract: &str,
        event: &str,
        sink: EventSink,
    ) -> Result<RpcSubscription, LedgerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LedgerError::NoRuntime)?;
        let topic = scval::to_base64(&scval::symbol(event)?)?;
        let task = runtime.spawn(poll_events(
            Arc::clone(&self.inner),
            contract.to_string(),
            topic,
            sink,
        ));
        tracing::debug!(contract, event, "Event polling started");
        Ok(RpcSubscription { task })
    }
}
