//! In-memory chains for tests. Each fake chain runs the Counter contract
//! natively, and the network relays `incrementOnChain` messages to the
//! target chain once a delay has passed on the tokio clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Filter, Log, TransactionReceipt as ChainReceipt, ValueOrArray, H160, H256, U256,
    U64,
};
use tokio::time::Instant;

use superchain_common::crypto::{create2_address, keccak256};
use superchain_common::{ChainId, Config, DeployerIdentity, ObserverConfig};

use crate::binding::ContractDescriptor;
use crate::registry::ChainEndpointRegistry;
use crate::rpc::{ChainRpc, RpcError};
use crate::session::Session;
use crate::signer::{SignerError, TransactionSigner};

pub(crate) const COUNTER_ARTIFACT: &str = include_str!("../fixtures/Counter.json");

const DEFAULT_RELAY_DELAY: Duration = Duration::from_secs(2);
const L2_TO_L2_MESSENGER: Address = H160([0x42; 20]);

pub(crate) fn counter_descriptor() -> ContractDescriptor {
    ContractDescriptor::from_artifact_json(COUNTER_ARTIFACT).unwrap()
}

pub(crate) fn no_clients() -> Vec<(ChainId, Arc<dyn ChainRpc>)> {
    Vec::new()
}

/// Session over the supersim chain ids backed by `network`.
pub(crate) fn supersim_session(network: &FakeNetwork) -> Session {
    let registry = ChainEndpointRegistry::from_chains(&Config::supersim().chains).unwrap();
    let clients = network
        .clients()
        .into_iter()
        .filter(|(chain_id, _)| registry.contains(*chain_id))
        .collect();

    Session::with_clients(
        registry,
        clients,
        Arc::new(FakeSigner::default()),
        counter_descriptor(),
        DeployerIdentity::default(),
        ObserverConfig::default(),
    )
    .unwrap()
}

/// "Signs" by serialising the request so the fake chain can read it back.
/// The chain id travels next to the request since ethers does not serialise
/// it as part of an EIP-1559 request.
pub(crate) struct FakeSigner {
    account: Address,
}

impl Default for FakeSigner {
    fn default() -> Self {
        Self {
            account: Address::repeat_byte(0x11),
        }
    }
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    fn account(&self) -> Address {
        self.account
    }

    async fn sign(&self, chain_id: ChainId, tx: &TypedTransaction) -> Result<Bytes, SignerError> {
        let mut tx = tx.clone();
        tx.set_chain_id(chain_id);
        serde_json::to_vec(&serde_json::json!({ "chain_id": chain_id, "tx": tx }))
            .map(Bytes::from)
            .map_err(|e| SignerError::Other(e.to_string()))
    }
}

#[derive(Default)]
struct ChainState {
    block: u64,
    code: HashMap<Address, Bytes>,
    counters: HashMap<Address, U256>,
    nonces: HashMap<Address, U256>,
    receipts: HashMap<H256, ChainReceipt>,
    logs: Vec<Log>,
    deployments: usize,
    nonce_lookups: usize,
    rejected_submissions: usize,
    failing_log_queries: usize,
}

impl ChainState {
    /// Appends a block holding `logs` and returns its number.
    fn mine(&mut self, tx_hash: Option<H256>, logs: Vec<(Address, Vec<H256>, Bytes)>) -> (u64, Vec<Log>) {
        self.block += 1;
        let block = self.block;
        let logs: Vec<Log> = logs
            .into_iter()
            .enumerate()
            .map(|(index, (address, topics, data))| Log {
                address,
                topics,
                data,
                block_number: Some(U64::from(block)),
                transaction_hash: tx_hash,
                log_index: Some(U256::from(index)),
                ..Default::default()
            })
            .collect();
        self.logs.extend(logs.iter().cloned());
        (block, logs)
    }
}

struct Relay {
    target: ChainId,
    contract: Address,
    deliver_at: Instant,
}

struct NetworkState {
    abi: Abi,
    chains: BTreeMap<ChainId, ChainState>,
    relays: Vec<Relay>,
    relay_delay: Duration,
    requests: usize,
}

enum Outcome {
    Success(Vec<(Address, Vec<H256>, Bytes)>),
    Revert,
}

impl NetworkState {
    fn selector(&self, function: &str) -> [u8; 4] {
        self.abi.function(function).unwrap().short_signature()
    }

    fn topic(&self, event: &str) -> H256 {
        self.abi.event(event).unwrap().signature()
    }

    fn chain(&mut self, chain_id: ChainId) -> &mut ChainState {
        self.chains.get_mut(&chain_id).unwrap()
    }

    /// Every request counts and moves due cross-chain messages first.
    fn begin(&mut self) {
        self.requests += 1;

        let now = Instant::now();
        let (due, pending): (Vec<Relay>, Vec<Relay>) =
            self.relays.drain(..).partition(|relay| relay.deliver_at <= now);
        self.relays = pending;

        let topic = self.topic("CounterIncremented");
        for relay in due {
            let Some(chain) = self.chains.get_mut(&relay.target) else {
                continue;
            };
            if !chain.code.contains_key(&relay.contract) {
                continue;
            }
            let value = increment(chain, relay.contract);
            chain.mine(
                Some(H256::random()),
                vec![(
                    relay.contract,
                    vec![topic, H256::from(L2_TO_L2_MESSENGER)],
                    ethers::abi::encode(&[Token::Uint(value)]).into(),
                )],
            );
        }
    }

    fn execute(&mut self, chain_id: ChainId, tx: TypedTransaction, tx_hash: H256) -> Result<(), RpcError> {
        let from = *tx.from().ok_or_else(|| RpcError::Transport("missing sender".into()))?;
        let nonce = *tx.nonce().ok_or_else(|| RpcError::Transport("missing nonce".into()))?;
        if tx.chain_id().map(|id| id.as_u64()) != Some(chain_id) {
            return Err(RpcError::Transport("invalid chain id for signer".into()));
        }

        let chain = self.chain(chain_id);
        if chain.rejected_submissions > 0 {
            chain.rejected_submissions -= 1;
            return Err(RpcError::Transport("txpool is full".into()));
        }
        let expected = chain.nonces.get(&from).copied().unwrap_or_default();
        if nonce != expected {
            return Err(RpcError::Transport(format!(
                "nonce mismatch: expected {}, got {}",
                expected, nonce
            )));
        }
        chain.nonces.insert(from, expected + U256::one());

        let to = tx.to_addr().copied();
        let data = tx.data().cloned().unwrap_or_default();
        let outcome = self.apply(chain_id, from, to, &data);

        let chain = self.chain(chain_id);
        let (status, logs) = match outcome {
            Outcome::Success(logs) => (1u64, logs),
            Outcome::Revert => (0u64, Vec::new()),
        };
        let (block, logs) = chain.mine(Some(tx_hash), logs);
        chain.receipts.insert(
            tx_hash,
            ChainReceipt {
                transaction_hash: tx_hash,
                block_number: Some(U64::from(block)),
                status: Some(U64::from(status)),
                gas_used: Some(U256::from(50_000)),
                from,
                to,
                logs,
                ..Default::default()
            },
        );
        Ok(())
    }

    fn apply(&mut self, chain_id: ChainId, from: Address, to: Option<Address>, data: &[u8]) -> Outcome {
        let Some(to) = to else {
            return Outcome::Revert;
        };

        if to == DeployerIdentity::default().factory {
            if data.len() <= 32 {
                return Outcome::Revert;
            }
            let deployer = DeployerIdentity {
                salt: H256::from_slice(&data[..32]),
                ..DeployerIdentity::default()
            };
            let address = create2_address(&deployer, &data[32..]);
            let chain = self.chain(chain_id);
            if chain.code.contains_key(&address) {
                return Outcome::Revert;
            }
            chain.code.insert(address, Bytes::from(data[32..].to_vec()));
            chain.deployments += 1;
            return Outcome::Success(Vec::new());
        }

        if !self.chain(chain_id).code.contains_key(&to) || data.len() < 4 {
            return Outcome::Success(Vec::new());
        }

        let selector = &data[..4];
        if selector == self.selector("increment") {
            let topic = self.topic("CounterIncremented");
            let value = increment(self.chain(chain_id), to);
            Outcome::Success(vec![(
                to,
                vec![topic, H256::from(from)],
                ethers::abi::encode(&[Token::Uint(value)]).into(),
            )])
        } else if selector == self.selector("incrementOnChain") && data.len() >= 36 {
            let destination = U256::from_big_endian(&data[4..36]);
            let target = destination.low_u64();
            if destination > U256::from(u64::MAX) || !self.chains.contains_key(&target) {
                return Outcome::Revert;
            }
            self.relays.push(Relay {
                target,
                contract: to,
                deliver_at: Instant::now() + self.relay_delay,
            });

            let mut word = [0u8; 32];
            destination.to_big_endian(&mut word);
            Outcome::Success(vec![(
                to,
                vec![self.topic("CrossChainIncrementSent"), H256::from(word)],
                Bytes::default(),
            )])
        } else {
            Outcome::Revert
        }
    }
}

fn increment(chain: &mut ChainState, contract: Address) -> U256 {
    let counter = chain.counters.entry(contract).or_default();
    *counter += U256::one();
    *counter
}

fn lock(state: &Mutex<NetworkState>) -> MutexGuard<'_, NetworkState> {
    state.lock().unwrap()
}

#[derive(Clone)]
pub(crate) struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl FakeNetwork {
    pub(crate) fn new(chain_ids: &[ChainId]) -> Self {
        Self::with_relay_delay(chain_ids, DEFAULT_RELAY_DELAY)
    }

    pub(crate) fn with_relay_delay(chain_ids: &[ChainId], relay_delay: Duration) -> Self {
        let chains = chain_ids
            .iter()
            .map(|chain_id| (*chain_id, ChainState::default()))
            .collect();

        Self {
            state: Arc::new(Mutex::new(NetworkState {
                abi: counter_descriptor().abi().clone(),
                chains,
                relays: Vec::new(),
                relay_delay,
                requests: 0,
            })),
        }
    }

    pub(crate) fn clients(&self) -> BTreeMap<ChainId, Arc<dyn ChainRpc>> {
        lock(&self.state)
            .chains
            .keys()
            .map(|chain_id| {
                let client: Arc<dyn ChainRpc> = Arc::new(FakeChain {
                    chain_id: *chain_id,
                    state: self.state.clone(),
                });
                (*chain_id, client)
            })
            .collect()
    }

    pub(crate) fn request_count(&self) -> usize {
        lock(&self.state).requests
    }

    pub(crate) fn deployments(&self, chain_id: ChainId) -> usize {
        lock(&self.state).chain(chain_id).deployments
    }

    pub(crate) fn nonce_lookups(&self, chain_id: ChainId) -> usize {
        lock(&self.state).chain(chain_id).nonce_lookups
    }

    pub(crate) fn has_code(&self, chain_id: ChainId, address: Address) -> bool {
        lock(&self.state).chain(chain_id).code.contains_key(&address)
    }

    pub(crate) fn counter(&self, chain_id: ChainId, address: Address) -> U256 {
        lock(&self.state)
            .chain(chain_id)
            .counters
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn reject_next_submission(&self, chain_id: ChainId) {
        lock(&self.state).chain(chain_id).rejected_submissions += 1;
    }

    pub(crate) fn fail_next_log_queries(&self, chain_id: ChainId, count: usize) {
        lock(&self.state).chain(chain_id).failing_log_queries += count;
    }

    /// Mines a block on `chain_id` holding `count` logs from `address`.
    pub(crate) fn emit(&self, chain_id: ChainId, address: Address, count: usize) {
        let logs = (0..count)
            .map(|i| (address, vec![H256::from_low_u64_be(i as u64)], Bytes::default()))
            .collect();
        lock(&self.state).chain(chain_id).mine(Some(H256::random()), logs);
    }
}

struct FakeChain {
    chain_id: ChainId,
    state: Arc<Mutex<NetworkState>>,
}

impl FakeChain {
    fn with_chain<T>(&self, f: impl FnOnce(&mut NetworkState, ChainId) -> T) -> T {
        let mut state = lock(&self.state);
        state.begin();
        f(&mut state, self.chain_id)
    }
}

/// Reads back a payload produced by [`FakeSigner`].
fn decode_signed(raw: &[u8]) -> Result<TypedTransaction, RpcError> {
    let malformed = |e: String| RpcError::Transport(format!("malformed payload: {}", e));
    let mut envelope: serde_json::Value = serde_json::from_slice(raw).map_err(|e| malformed(e.to_string()))?;
    let chain_id = envelope["chain_id"]
        .as_u64()
        .ok_or_else(|| malformed("missing chain id".into()))?;
    let mut tx: TypedTransaction =
        serde_json::from_value(envelope["tx"].take()).map_err(|e| malformed(e.to_string()))?;
    tx.set_chain_id(chain_id);
    Ok(tx)
}

fn matches_filter(filter: &Filter, log: &Log, from_block: u64, to_block: u64) -> bool {
    let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
    if block < from_block || block > to_block {
        return false;
    }

    let address_ok = match &filter.address {
        None => true,
        Some(ValueOrArray::Value(address)) => log.address == *address,
        Some(ValueOrArray::Array(addresses)) => addresses.contains(&log.address),
    };

    let topic_ok = match &filter.topics[0] {
        None | Some(ValueOrArray::Value(None)) => true,
        Some(ValueOrArray::Value(Some(topic))) => log.topics.first() == Some(topic),
        Some(ValueOrArray::Array(topics)) => topics
            .iter()
            .any(|topic| topic.is_none() || log.topics.first() == topic.as_ref()),
    };

    address_ok && topic_ok
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.with_chain(|state, id| state.chain(id).block))
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, RpcError> {
        self.with_chain(|state, id| {
            let to = tx.to_addr().copied().unwrap_or_default();
            let data = tx.data().cloned().unwrap_or_default();
            let number = state.selector("number");
            let chain = state.chain(id);

            if !chain.code.contains_key(&to) {
                return Ok(Bytes::default());
            }
            if data.len() >= 4 && data[..4] == number {
                let value = chain.counters.get(&to).copied().unwrap_or_default();
                return Ok(ethers::abi::encode(&[Token::Uint(value)]).into());
            }
            Err(RpcError::Transport("execution reverted".into()))
        })
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        Ok(self.with_chain(|state, id| {
            state.chain(id).code.get(&address).cloned().unwrap_or_default()
        }))
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, RpcError> {
        Ok(self.with_chain(|state, id| {
            let chain = state.chain(id);
            chain.nonce_lookups += 1;
            chain.nonces.get(&address).copied().unwrap_or_default()
        }))
    }

    async fn fill_transaction(&self, tx: &mut TypedTransaction) -> Result<(), RpcError> {
        self.with_chain(|_, _| {
            if tx.gas().is_none() {
                tx.set_gas(100_000u64);
            }
        });
        Ok(())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError> {
        let tx = decode_signed(&raw)?;
        let tx_hash = keccak256(&raw);
        self.with_chain(|state, id| state.execute(id, tx, tx_hash))?;
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<ChainReceipt, RpcError> {
        self.with_chain(|state, id| {
            state
                .chain(id)
                .receipts
                .get(&tx_hash)
                .cloned()
                .ok_or(RpcError::Dropped(tx_hash))
        })
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.with_chain(|state, id| {
            let chain = state.chain(id);
            if chain.failing_log_queries > 0 {
                chain.failing_log_queries -= 1;
                return Err(RpcError::Transport("upstream timeout".into()));
            }

            let from_block = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
            let to_block = filter.get_to_block().map(|b| b.as_u64()).unwrap_or(chain.block);
            Ok(chain
                .logs
                .iter()
                .filter(|log| matches_filter(filter, log, from_block, to_block))
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Eip1559TransactionRequest;

    #[tokio::test]
    async fn test_fake_payload_keeps_chain_id() {
        let signer = FakeSigner::default();
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(signer.account())
            .to(Address::repeat_byte(0x22))
            .nonce(7u64)
            .into();

        let raw = signer.sign(902, &tx).await.unwrap();
        let decoded = decode_signed(&raw).unwrap();
        assert_eq!(decoded.chain_id().map(|id| id.as_u64()), Some(902));
        assert_eq!(decoded.nonce(), Some(&U256::from(7)));
        assert_eq!(decoded.from(), Some(&signer.account()));

        assert!(decode_signed(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_fake_chain_accepts_signed_submission() {
        let network = FakeNetwork::new(&[901]);
        let client = network.clients().remove(&901).unwrap();
        let signer = FakeSigner::default();
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(signer.account())
            .to(Address::repeat_byte(0x22))
            .nonce(0u64)
            .into();

        let tx_hash = client
            .send_raw_transaction(signer.sign(901, &tx).await.unwrap())
            .await
            .unwrap();
        let receipt = client.wait_for_receipt(tx_hash).await.unwrap();
        assert_eq!(receipt.status, Some(U64::one()));

        // Signed for another chain.
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(signer.account())
            .to(Address::repeat_byte(0x22))
            .nonce(1u64)
            .into();
        let raw = signer.sign(902, &tx).await.unwrap();
        assert!(client.send_raw_transaction(raw).await.is_err());
    }
}
