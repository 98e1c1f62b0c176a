//! Batch read engine.
//!
//! Read calls recorded against a [`Multicall`] are held in an open batch and dispatched as a
//! single Multicall3 `aggregate3` call. Each recorded call hands back a [`Deferred`] that
//! resolves to that call's decoded value once the batch has been executed.
//!
//! ## Flushing
//!
//! A batch is flushed when the first [`Deferred`] whose value is not yet available is
//! awaited. When the open batch reaches the configured size it is sealed and a new one is
//! started; sealed batches are sent in order, one aggregated call each, by the next flush.
//! Flushes on one `Multicall` are serialized.
//!
//! ## Failure isolation
//!
//! Sub-calls are sent with `allowFailure = true`. A reverted or undecodable sub-call fails
//! only its own [`Deferred`] with [`SdkError::Decode`]; a failed aggregated call (transport
//! error, undecodable response, or a response whose length does not match the request) fails
//! every [`Deferred`] of that batch with [`SdkError::BatchExecution`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let multicall = toolkit.multicall(Network::Optimism)?;
//! let token = contracts.erc20(Network::Optimism, address)?;
//! let batched = multicall.wrap(&token);
//! let symbol = batched.call(|t| t.symbol());
//! let supply = batched.call(|t| t.total_supply());
//! // One aggregated call resolves both.
//! let (symbol, supply) = futures::try_join!(symbol.resolve(), supply.resolve())?;
//! ```

use crate::errors::{SdkError, REVERT_REASON_PREFIX};
use crate::metrics;
use crate::network::Network;
use crate::types::conversions::address_to_string;
use async_trait::async_trait;
use ethers::abi::{Detokenize, Function, Param, ParamType, StateMutability, Token};
use ethers::contract::ContractCall;
use ethers::providers::Middleware;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, NameOrAddress, TransactionRequest};
use futures::future::BoxFuture;
use indexmap::IndexSet;
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::future::IntoFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Multicall3 is deployed at the same address on every supported network.
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Upper bound on sub-calls per aggregated call.
pub const MAX_BATCH_SIZE: usize = 1000;

/// A single read call to be batched in a multicall.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    /// Target contract address
    pub target: Address,
    /// Encoded function call data
    pub call_data: Bytes,
}

/// Raw outcome of one sub-call as reported by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCallResult {
    pub success: bool,
    pub return_data: Bytes,
}

/// Sends one read-only call to an address and returns the raw return data.
///
/// The batch engine only ever needs `eth_call`, so it talks to the network through this
/// seam rather than a full middleware stack. Any ethers [`Middleware`] is a transport via
/// [`MiddlewareTransport`]; recording or replaying transports can be registered per network.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> anyhow::Result<Bytes>;
}

/// [`CallTransport`] over an ethers middleware (typically `Provider<Http>`).
pub struct MiddlewareTransport<M> {
    provider: Arc<M>,
}

impl<M> MiddlewareTransport<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<M: Middleware + 'static> CallTransport for MiddlewareTransport<M> {
    async fn call(&self, to: Address, data: Bytes) -> anyhow::Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| anyhow::anyhow!("eth_call to {:?} failed: {}", to, e))
    }
}

static AGGREGATE3: Lazy<Function> = Lazy::new(aggregate3_function);

/// `aggregate3((address target, bool allowFailure, bytes callData)[])
///     returns ((bool success, bytes returnData)[])`
#[allow(deprecated)]
pub fn aggregate3_function() -> Function {
    Function {
        name: "aggregate3".to_string(),
        inputs: vec![Param {
            name: "calls".to_string(),
            kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Bool,
                ParamType::Bytes,
            ]))),
            internal_type: None,
        }],
        outputs: vec![Param {
            name: "returnData".to_string(),
            kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Bool,
                ParamType::Bytes,
            ]))),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// Encodes `calls` as `aggregate3` calldata with `allowFailure = true` on every sub-call.
pub fn encode_aggregate3(calls: &[Call]) -> Result<Bytes, ethers::abi::Error> {
    let call_tokens = calls
        .iter()
        .map(|call| {
            Token::Tuple(vec![
                Token::Address(call.target),
                Token::Bool(true),
                Token::Bytes(call.call_data.to_vec()),
            ])
        })
        .collect();
    let calldata = AGGREGATE3.encode_input(&[Token::Array(call_tokens)])?;
    Ok(Bytes::from(calldata))
}

/// Decodes `aggregate3` calldata back into calls. Used by transports that answer
/// aggregated calls themselves (recorders, test chains).
pub fn decode_aggregate3_calls(calldata: &[u8]) -> anyhow::Result<Vec<Call>> {
    let function = &*AGGREGATE3;
    let body = calldata
        .strip_prefix(function.short_signature().as_slice())
        .ok_or_else(|| anyhow::anyhow!("calldata is not an aggregate3 call"))?;
    let tokens = function.decode_input(body)?;
    let entries = tokens
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .ok_or_else(|| anyhow::anyhow!("aggregate3 input is not an array"))?;

    entries
        .into_iter()
        .map(|entry| match entry.into_tuple().as_deref() {
            Some([Token::Address(target), _, Token::Bytes(data)]) => Ok(Call {
                target: *target,
                call_data: Bytes::from(data.clone()),
            }),
            _ => Err(anyhow::anyhow!("malformed aggregate3 call entry")),
        })
        .collect()
}

/// Encodes sub-call outcomes as an `aggregate3` return value.
pub fn encode_aggregate3_results(results: &[SubCallResult]) -> Bytes {
    let tokens = results
        .iter()
        .map(|r| Token::Tuple(vec![Token::Bool(r.success), Token::Bytes(r.return_data.to_vec())]))
        .collect();
    Bytes::from(ethers::abi::encode(&[Token::Array(tokens)]))
}

/// Decodes an `aggregate3` return value.
pub fn decode_aggregate3_results(response: &[u8]) -> Result<Vec<SubCallResult>, String> {
    let decoded = AGGREGATE3
        .decode_output(response)
        .map_err(|e| format!("undecodable aggregate3 response: {}", e))?;

    let results_array = decoded
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .ok_or_else(|| "invalid aggregate3 response format".to_string())?;

    results_array
        .into_iter()
        .map(|result_token| match result_token.into_tuple().as_deref() {
            // Result struct: (bool success, bytes returnData)
            Some([Token::Bool(success), Token::Bytes(data)]) => Ok(SubCallResult {
                success: *success,
                return_data: Bytes::from(data.clone()),
            }),
            _ => Err("malformed aggregate3 result entry".to_string()),
        })
        .collect()
}

type Resolver = Box<dyn FnOnce(Result<SubCallResult, SdkError>) + Send>;

struct PendingCall {
    call: Call,
    resolve: Resolver,
}

#[derive(Default)]
struct BatchState {
    open: Vec<PendingCall>,
    sealed: VecDeque<Vec<PendingCall>>,
}

struct Inner {
    network: Network,
    aggregator: Address,
    transport: Arc<dyn CallTransport>,
    batch_size: usize,
    state: Mutex<BatchState>,
    flush_turn: tokio::sync::Mutex<()>,
}

/// Batch collector for one network.
///
/// Cloning is cheap and clones share the same pending batches. A collector is meant to be
/// scoped to one pipeline invocation; see [`crate::app_toolkit::AppToolkit::multicall`].
#[derive(Clone)]
pub struct Multicall {
    inner: Arc<Inner>,
}

impl Multicall {
    pub fn new(
        network: Network,
        transport: Arc<dyn CallTransport>,
        aggregator: Address,
        batch_size: usize,
    ) -> Self {
        let validated_batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        if validated_batch_size != batch_size {
            warn!(
                "Multicall batch size {} out of range on {}, using {}",
                batch_size, network, validated_batch_size
            );
        }

        Self {
            inner: Arc::new(Inner {
                network,
                aggregator,
                transport,
                batch_size: validated_batch_size,
                state: Mutex::new(BatchState::default()),
                flush_turn: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn network(&self) -> Network {
        self.inner.network
    }

    pub fn aggregator(&self) -> Address {
        self.inner.aggregator
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// Calls recorded but not yet sent.
    pub fn pending(&self) -> usize {
        let state = self.lock_state();
        state.open.len() + state.sealed.iter().map(Vec::len).sum::<usize>()
    }

    /// Wraps a contract binding so its read methods record into this collector.
    pub fn wrap<'a, C>(&'a self, contract: &'a C) -> Batched<'a, C> {
        Batched {
            multicall: self,
            contract,
        }
    }

    /// Records an abigen read call.
    pub fn enqueue<M, D>(&self, call: ContractCall<M, D>) -> Deferred<D>
    where
        M: Middleware + 'static,
        D: Detokenize + Send + 'static,
    {
        let function = call.function.clone();
        let label = function.name.clone();
        let target = match call.tx.to() {
            Some(NameOrAddress::Address(address)) => *address,
            other => {
                return Deferred::failed(
                    self.clone(),
                    SdkError::InvalidAddress {
                        network: self.inner.network,
                        address: format!("{:?}", other),
                    },
                )
            }
        };
        let Some(call_data) = call.calldata() else {
            return Deferred::failed(
                self.clone(),
                SdkError::Decode {
                    target: address_to_string(target),
                    function: label,
                    reason: "call has no calldata".to_string(),
                },
            );
        };

        self.enqueue_raw(target, call_data, label, move |data| {
            let tokens = function.decode_output(data).map_err(|e| e.to_string())?;
            D::from_tokens(tokens).map_err(|e| e.to_string())
        })
    }

    /// Records a call from pre-encoded calldata and a decoder for its return data.
    pub fn enqueue_raw<T, F>(
        &self,
        target: Address,
        call_data: Bytes,
        label: impl Into<String>,
        decode: F,
    ) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(&[u8]) -> Result<T, String> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let label = label.into();

        let resolve: Resolver = Box::new(move |outcome| {
            let result = outcome.and_then(|sub_call| {
                let decode_error = |reason: String| {
                    metrics::increment_decode_failures(&label);
                    SdkError::Decode {
                        target: address_to_string(target),
                        function: label.clone(),
                        reason,
                    }
                };
                if !sub_call.success {
                    return Err(decode_error(format!(
                        "{} (0x{})",
                        REVERT_REASON_PREFIX,
                        hex::encode(&sub_call.return_data)
                    )));
                }
                decode(&sub_call.return_data).map_err(decode_error)
            });
            // The receiver may already be gone; nobody is waiting for this value then.
            let _ = sender.send(result);
        });

        let mut state = self.lock_state();
        state.open.push(PendingCall {
            call: Call { target, call_data },
            resolve,
        });
        if state.open.len() >= self.inner.batch_size {
            let batch = std::mem::take(&mut state.open);
            state.sealed.push_back(batch);
        }
        drop(state);

        Deferred {
            receiver,
            multicall: self.clone(),
        }
    }

    /// Sends every pending batch, sealed batches first, and resolves their deferred values.
    ///
    /// Returns the first batch failure, after every batch has been attempted.
    pub async fn execute(&self) -> Result<(), SdkError> {
        let _turn = self.inner.flush_turn.lock().await;
        let mut first_error = None;
        while let Some(batch) = self.next_batch() {
            if let Err(e) = self.flush(batch).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Runs `calls` as one aggregated call, bypassing the pending batches.
    ///
    /// Identical calls are coalesced; results come back in the order of `calls`.
    pub async fn run(&self, calls: Vec<Call>) -> Result<Vec<SubCallResult>, SdkError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Coalesce identical calls to reduce load
        let mut unique_calls = IndexSet::with_capacity(calls.len());
        let original_indices: Vec<usize> = calls
            .iter()
            .map(|call| unique_calls.insert_full(call.clone()).0)
            .collect();
        let unique_calls: Vec<Call> = unique_calls.into_iter().collect();
        debug!(
            "Multicall on {} coalesced {} calls into {}",
            self.inner.network,
            calls.len(),
            unique_calls.len()
        );
        metrics::record_multicall_batch_size(unique_calls.len() as f64);

        let results = match self.aggregate(&unique_calls).await {
            Ok(results) => results,
            Err(cause) => {
                warn!(
                    "Multicall batch of {} calls on {} failed: {}",
                    calls.len(),
                    self.inner.network,
                    cause
                );
                metrics::increment_multicall_batch_failed(self.inner.network.as_str());
                return Err(SdkError::BatchExecution {
                    network: self.inner.network,
                    calls: calls.len(),
                    cause,
                });
            }
        };
        metrics::increment_multicall_batches(self.inner.network.as_str());

        // Reconstruct the full result set in the original order
        Ok(original_indices
            .into_iter()
            .filter_map(|index| results.get(index).cloned())
            .collect())
    }

    async fn aggregate(&self, calls: &[Call]) -> Result<Vec<SubCallResult>, String> {
        let calldata = encode_aggregate3(calls).map_err(|e| e.to_string())?;
        let response = self
            .inner
            .transport
            .call(self.inner.aggregator, calldata)
            .await
            .map_err(|e| format!("{:#}", e))?;
        let results = decode_aggregate3_results(&response)?;
        if results.len() != calls.len() {
            return Err(format!(
                "aggregator returned {} results for {} calls",
                results.len(),
                calls.len()
            ));
        }
        Ok(results)
    }

    async fn flush(&self, batch: Vec<PendingCall>) -> Result<(), SdkError> {
        let calls = batch.iter().map(|pending| pending.call.clone()).collect();
        match self.run(calls).await {
            Ok(results) => {
                for (pending, result) in batch.into_iter().zip(results) {
                    (pending.resolve)(Ok(result));
                }
                Ok(())
            }
            Err(e) => {
                for pending in batch {
                    (pending.resolve)(Err(e.clone()));
                }
                Err(e)
            }
        }
    }

    fn next_batch(&self) -> Option<Vec<PendingCall>> {
        let mut state = self.lock_state();
        if let Some(batch) = state.sealed.pop_front() {
            return Some(batch);
        }
        if state.open.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut state.open))
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BatchState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A contract binding whose read calls record into a [`Multicall`].
pub struct Batched<'a, C> {
    multicall: &'a Multicall,
    contract: &'a C,
}

impl<'a, C> Batched<'a, C> {
    /// Records the call built by `build` instead of sending it.
    pub fn call<M, D, F>(&self, build: F) -> Deferred<D>
    where
        F: FnOnce(&C) -> ContractCall<M, D>,
        M: Middleware + 'static,
        D: Detokenize + Send + 'static,
    {
        self.multicall.enqueue(build(self.contract))
    }

    pub fn contract(&self) -> &C {
        self.contract
    }
}

/// Value of a recorded call, available once its batch has been executed.
#[must_use = "a deferred read does nothing until it is resolved"]
pub struct Deferred<T> {
    receiver: oneshot::Receiver<Result<T, SdkError>>,
    multicall: Multicall,
}

impl<T: Send + 'static> Deferred<T> {
    fn failed(multicall: Multicall, error: SdkError) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(error));
        Self {
            receiver,
            multicall,
        }
    }

    /// Waits for the value, flushing the collector's pending batches if it is not yet there.
    pub async fn resolve(mut self) -> Result<T, SdkError> {
        match self.receiver.try_recv() {
            Ok(result) => return result,
            Err(TryRecvError::Closed) => return Err(dropped(&self.multicall)),
            Err(TryRecvError::Empty) => {}
        }

        // Batch failures reach every deferred of the batch through its own channel.
        let _ = self.multicall.execute().await;
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(dropped(&self.multicall)),
        }
    }
}

impl<T: Send + 'static> IntoFuture for Deferred<T> {
    type Output = Result<T, SdkError>;
    type IntoFuture = BoxFuture<'static, Result<T, SdkError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.resolve())
    }
}

fn dropped(multicall: &Multicall) -> SdkError {
    SdkError::BatchExecution {
        network: multicall.network(),
        calls: 1,
        cause: "batch dropped before its result was delivered".to_string(),
    }
}
