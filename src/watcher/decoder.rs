use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};

use crate::events::CanonicalEvent;

// Generate the SocketBridge event ABI using alloy's sol! macro. All fields
// are non-indexed, so the payload is seven 32-byte words in the log data.
sol! {
    event SocketBridge(
        uint256 amount,
        address token,
        uint256 toChainId,
        bytes32 bridgeName,
        address sender,
        address receiver,
        bytes32 metadata
    );
}

/// Topic0 the watcher filters on when the config does not override it.
pub const SOCKET_BRIDGE_TOPIC: B256 = SocketBridge::SIGNATURE_HASH;

const WORD: usize = 32;
const PAYLOAD_WORDS: usize = 7;

/// A decoded bridging log before canonical mapping. Ephemeral; never
/// persisted directly.
#[derive(Debug)]
pub struct RawBridgeLog {
    pub amount: U256,
    pub token: Address,
    pub to_chain_id: U256,
    pub bridge_name: B256,
    pub sender: Address,
    pub receiver: Address,
    pub metadata: B256,
    pub tx_hash: B256,
}

/// Attempt to decode a log as a SocketBridge event. `topic0` is the topic
/// the watcher subscribed with, so an override in config decodes the same
/// payload layout.
///
/// Returns `None` if:
/// - the log's topic0 doesn't match the subscribed topic
/// - the data payload is shorter than the seven ABI words
pub fn decode_bridge_log(log: &Log, topic0: B256) -> Option<RawBridgeLog> {
    let inner = &log.inner;

    let topics = inner.data.topics();
    if topics.is_empty() || topics[0] != topic0 {
        return None;
    }

    let data = inner.data.data.as_ref();
    if data.len() < PAYLOAD_WORDS * WORD {
        return None;
    }

    let word = |i: usize| &data[i * WORD..(i + 1) * WORD];

    Some(RawBridgeLog {
        amount: U256::from_be_slice(word(0)),
        token: Address::from_word(B256::from_slice(word(1))),
        to_chain_id: U256::from_be_slice(word(2)),
        bridge_name: B256::from_slice(word(3)),
        sender: Address::from_word(B256::from_slice(word(4))),
        receiver: Address::from_word(B256::from_slice(word(5))),
        metadata: B256::from_slice(word(6)),
        tx_hash: log.transaction_hash.unwrap_or_default(),
    })
}

/// Map a raw log to its canonical wire form, stamped with the observation
/// time. Chain endpoints are rendered as the sender and receiver addresses.
pub fn to_canonical(raw: &RawBridgeLog, observed_at: DateTime<Utc>) -> CanonicalEvent {
    CanonicalEvent {
        token: raw.token.to_string(),
        amount: raw.amount.to_string(),
        from_chain: raw.sender.to_string(),
        to_chain: raw.receiver.to_string(),
        transaction_hash: raw.tx_hash.to_string(),
        timestamp: observed_at,
    }
}
