//! Test data builders for blocks, payloads and chainhook JSON bodies
//!
//! Hashes are deterministic: `hash_for(height, fork)` differs per fork, so a
//! block built on fork 1 never links to a fork-0 parent.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::chainhook::models::{
    Asset, AssetValue, Block, BlockIdentifier, ChainPayload, EventData, EventKind, Hash32,
    PayloadKind, Receipt, ReceiptEvent, ReceiptStatus, Transaction, TransactionKind,
};
use crate::chainhook::tracker::ChainTipState;

const BLOCK_MARKER: u8 = 0xab;
const TX_MARKER: u8 = 0xcd;
const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// Deterministic block hash for a height on a given fork
pub fn hash_for(height: u64, fork: u8) -> Hash32 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_be_bytes());
    bytes[30] = BLOCK_MARKER;
    bytes[31] = fork;
    Hash32::new(bytes)
}

/// Deterministic transaction id
pub fn tx_id_for(height: u64, index: u32, fork: u8) -> Hash32 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_be_bytes());
    bytes[8..12].copy_from_slice(&index.to_be_bytes());
    bytes[30] = TX_MARKER;
    bytes[31] = fork;
    Hash32::new(bytes)
}

pub fn identifier(height: u64, fork: u8) -> BlockIdentifier {
    BlockIdentifier::new(height, hash_for(height, fork))
}

/// Builder for test transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    id: Hash32,
    index: u32,
    kind: TransactionKind,
    status: ReceiptStatus,
    events: Vec<ReceiptEvent>,
}

impl TransactionBuilder {
    pub fn new(height: u64, index: u32, fork: u8) -> Self {
        Self {
            id: tx_id_for(height, index, fork),
            index,
            kind: TransactionKind::ContractCall,
            status: ReceiptStatus::Success,
            events: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: TransactionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_status(mut self, status: ReceiptStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_event(mut self, kind: EventKind, data: EventData) -> Self {
        let index = self.events.len() as u32;
        self.events.push(ReceiptEvent { index, kind, data });
        self
    }

    pub fn with_ft_transfer(self, amount: u128) -> Self {
        self.with_event(
            EventKind::FtTransfer,
            EventData::Transfer {
                asset: Asset::Fungible("SP000.token::usd".to_string()),
                sender: "SP1SENDER".to_string(),
                recipient: "SP2RECIPIENT".to_string(),
                value: AssetValue::Amount(amount),
            },
        )
    }

    pub fn with_print(self, topic: &str) -> Self {
        self.with_event(
            EventKind::Print,
            EventData::Print {
                contract_identifier: "SP000.market".to_string(),
                topic: topic.to_string(),
                value: json!({ "topic": topic }),
            },
        )
    }

    pub fn build(self) -> Transaction {
        Transaction {
            id: self.id,
            index: self.index,
            kind: self.kind,
            sender: Some("SP1SENDER".to_string()),
            operations: Vec::new(),
            receipt: Receipt {
                status: self.status,
                events: self.events,
                result: Some("(ok true)".to_string()),
            },
        }
    }
}

/// Builder for test blocks
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    height: u64,
    fork: u8,
    parent_fork: u8,
    transactions: Vec<Transaction>,
}

impl BlockBuilder {
    pub fn new(height: u64, fork: u8) -> Self {
        Self {
            height,
            fork,
            parent_fork: fork,
            transactions: Vec::new(),
        }
    }

    /// Build on a parent from a different fork (the first block after a fork point)
    pub fn with_parent_fork(mut self, fork: u8) -> Self {
        self.parent_fork = fork;
        self
    }

    pub fn with_transaction(mut self, tx: Transaction) -> Self {
        self.transactions.push(tx);
        self
    }

    pub fn build(self) -> Block {
        Block::new(
            identifier(self.height, self.fork),
            identifier(self.height.saturating_sub(1), self.parent_fork),
            Utc.timestamp_opt(BASE_TIMESTAMP + self.height as i64, 0)
                .single()
                .expect("valid timestamp"),
            self.transactions,
        )
    }
}

/// Block with one contract call emitting an ft transfer and a print event
pub fn block(height: u64, fork: u8) -> Block {
    BlockBuilder::new(height, fork)
        .with_transaction(
            TransactionBuilder::new(height, 0, fork)
                .with_ft_transfer(1_000 + height as u128)
                .with_print("order-filled")
                .build(),
        )
        .build()
}

pub fn blocks(from: u64, to: u64, fork: u8) -> Vec<Block> {
    (from..=to).map(|h| block(h, fork)).collect()
}

pub fn apply_payload(from: u64, to: u64, fork: u8) -> ChainPayload {
    let blocks = blocks(from, to, fork);
    let previous_tip = Some(blocks[0].parent());
    ChainPayload::new(PayloadKind::Apply, blocks, previous_tip).expect("valid apply payload")
}

pub fn rollback_payload(from: u64, to: u64, fork: u8) -> ChainPayload {
    let blocks = blocks(from, to, fork);
    let previous_tip = Some(blocks[blocks.len() - 1].identifier());
    ChainPayload::new(PayloadKind::Rollback, blocks, previous_tip).expect("valid rollback payload")
}

/// Anchored tip at `height` on `fork` with `depth` blocks of history
pub fn anchored_tip(height: u64, fork: u8, depth: u64) -> ChainTipState {
    let mut tip = ChainTipState::anchored(identifier(height, fork));
    let from = height.saturating_sub(depth.saturating_sub(1));
    for h in from..=height {
        tip.history.insert(h, hash_for(h, fork));
    }
    tip
}

/// Chainhook JSON for one block (same content as [`block`])
pub fn block_json(height: u64, fork: u8) -> Value {
    linked_block_json(height, fork, fork)
}

/// Block JSON whose parent sits on `parent_fork`
pub fn linked_block_json(height: u64, fork: u8, parent_fork: u8) -> Value {
    json!({
        "block_identifier": { "index": height, "hash": hash_for(height, fork).to_string() },
        "parent_block_identifier": {
            "index": height.saturating_sub(1),
            "hash": hash_for(height.saturating_sub(1), parent_fork).to_string()
        },
        "timestamp": BASE_TIMESTAMP + height as i64,
        "metadata": { "stacks_block_hash": "0x00", "tenure_height": 12 },
        "transactions": [{
            "transaction_identifier": { "hash": tx_id_for(height, 0, fork).to_string() },
            "operations": [{
                "operation_identifier": { "index": 0 },
                "type": "DEBIT",
                "status": "SUCCESS",
                "account": { "address": "SP1SENDER" },
                "amount": { "value": "1000", "currency": { "symbol": "STX", "decimals": 6 } }
            }],
            "metadata": {
                "success": true,
                "result": "(ok true)",
                "sender": "SP1SENDER",
                "position": { "index": 0 },
                "kind": { "type": "ContractCall", "data": { "contract_identifier": "SP000.market" } },
                "receipt": {
                    "mutated_contracts_radius": ["SP000.market"],
                    "events": [
                        {
                            "type": "FTTransferEvent",
                            "position": { "index": 0 },
                            "data": {
                                "asset_identifier": "SP000.token::usd",
                                "sender": "SP1SENDER",
                                "recipient": "SP2RECIPIENT",
                                "amount": (1_000 + height).to_string()
                            }
                        },
                        {
                            "type": "SmartContractEvent",
                            "position": { "index": 1 },
                            "data": {
                                "contract_identifier": "SP000.market",
                                "topic": "print",
                                "value": { "topic": "order-filled" }
                            }
                        }
                    ]
                }
            }
        }]
    })
}

pub fn apply_body(from: u64, to: u64, fork: u8) -> Value {
    let blocks: Vec<Value> = (from..=to).map(|h| block_json(h, fork)).collect();
    json!({
        "chainhook": { "uuid": "1f0a3f0e-test", "is_streaming_blocks": true, "predicate": { "scope": "ft_event" } },
        "apply": blocks,
        "rollback": []
    })
}

/// Rollback body; blocks are emitted highest first, the way chainhook sends them
pub fn rollback_body(from: u64, to: u64, fork: u8) -> Value {
    let blocks: Vec<Value> = (from..=to).rev().map(|h| block_json(h, fork)).collect();
    json!({
        "chainhook": { "uuid": "1f0a3f0e-test", "is_streaming_blocks": true },
        "apply": [],
        "rollback": blocks
    })
}

/// Reorg body replacing fork-0 blocks `fork_height..=old_tip` with
/// `fork_height..=new_tip` on `fork`
pub fn reorg_body(fork_height: u64, old_tip: u64, new_tip: u64, fork: u8) -> Value {
    let rollback: Vec<Value> = (fork_height..=old_tip)
        .rev()
        .map(|h| block_json(h, 0))
        .collect();
    let apply: Vec<Value> = (fork_height..=new_tip)
        .map(|h| {
            let parent_fork = if h == fork_height { 0 } else { fork };
            linked_block_json(h, fork, parent_fork)
        })
        .collect();
    json!({
        "chainhook": { "uuid": "1f0a3f0e-test", "is_streaming_blocks": true },
        "apply": apply,
        "rollback": rollback
    })
}
