//! Core data structures for chainhook payloads

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::MalformedPayload;

/// 32-byte chain identifier (block hash or transaction id)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for Hash32 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != 64 {
            return Err(format!(
                "expected 32-byte hex identifier, got {} hex characters",
                digits.len()
            ));
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|e| format!("invalid hex: {e}"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Height and hash of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockIdentifier {
    pub index: u64,
    pub hash: Hash32,
}

impl BlockIdentifier {
    pub fn new(index: u64, hash: Hash32) -> Self {
        Self { index, hash }
    }
}

impl fmt::Display for BlockIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.index, self.hash)
    }
}

/// A block carried by a chainhook payload. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    identifier: BlockIdentifier,
    parent: BlockIdentifier,
    timestamp: DateTime<Utc>,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        identifier: BlockIdentifier,
        parent: BlockIdentifier,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            identifier,
            parent,
            timestamp,
            transactions,
        }
    }

    pub fn identifier(&self) -> BlockIdentifier {
        self.identifier
    }

    pub fn height(&self) -> u64 {
        self.identifier.index
    }

    pub fn hash(&self) -> Hash32 {
        self.identifier.hash
    }

    pub fn parent(&self) -> BlockIdentifier {
        self.parent
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn event_count(&self) -> usize {
        self.transactions
            .iter()
            .map(|tx| tx.receipt.events.len())
            .sum()
    }
}

/// A transaction and its execution receipt
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Hash32,
    /// Position within the block
    pub index: u32,
    pub kind: TransactionKind,
    pub sender: Option<String>,
    pub operations: Vec<Operation>,
    pub receipt: Receipt,
}

/// Chain-specific action inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub index: u32,
    pub operation_type: String,
    pub status: Option<String>,
    pub account: Option<String>,
    pub amount: Option<u128>,
}

/// Outcome of executing a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub status: ReceiptStatus,
    /// Events in emission order
    pub events: Vec<ReceiptEvent>,
    /// Clarity representation of the return value, e.g. `(ok true)`
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failure,
    PendingResolution,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::PendingResolution => "pending_resolution",
        }
    }
}

/// A typed notification emitted while executing a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptEvent {
    /// Emission index within the receipt
    pub index: u32,
    pub kind: EventKind,
    pub data: EventData,
}

/// Event kinds emitted by chainhook receipts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    StxTransfer,
    StxMint,
    StxBurn,
    StxLock,
    FtTransfer,
    FtMint,
    FtBurn,
    NftTransfer,
    NftMint,
    NftBurn,
    /// `print` output of a smart contract
    Print,
    DataVarSet,
    DataMapInsert,
    DataMapUpdate,
    DataMapDelete,
    Other(String),
}

impl EventKind {
    /// Map the chainhook `type` tag; unknown tags are kept as `Other`
    pub fn from_chainhook_type(tag: &str) -> Self {
        match tag {
            "STXTransferEvent" => Self::StxTransfer,
            "STXMintEvent" => Self::StxMint,
            "STXBurnEvent" => Self::StxBurn,
            "STXLockEvent" => Self::StxLock,
            "FTTransferEvent" => Self::FtTransfer,
            "FTMintEvent" => Self::FtMint,
            "FTBurnEvent" => Self::FtBurn,
            "NFTTransferEvent" => Self::NftTransfer,
            "NFTMintEvent" => Self::NftMint,
            "NFTBurnEvent" => Self::NftBurn,
            "SmartContractEvent" => Self::Print,
            "DataVarSetEvent" => Self::DataVarSet,
            "DataMapInsertEvent" => Self::DataMapInsert,
            "DataMapUpdateEvent" => Self::DataMapUpdate,
            "DataMapDeleteEvent" => Self::DataMapDelete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::StxTransfer => "stx_transfer",
            Self::StxMint => "stx_mint",
            Self::StxBurn => "stx_burn",
            Self::StxLock => "stx_lock",
            Self::FtTransfer => "ft_transfer",
            Self::FtMint => "ft_mint",
            Self::FtBurn => "ft_burn",
            Self::NftTransfer => "nft_transfer",
            Self::NftMint => "nft_mint",
            Self::NftBurn => "nft_burn",
            Self::Print => "print",
            Self::DataVarSet => "data_var_set",
            Self::DataMapInsert => "data_map_insert",
            Self::DataMapUpdate => "data_map_update",
            Self::DataMapDelete => "data_map_delete",
            Self::Other(tag) => tag,
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    /// Accepts the snake_case names used in configuration
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "stx_transfer" => Self::StxTransfer,
            "stx_mint" => Self::StxMint,
            "stx_burn" => Self::StxBurn,
            "stx_lock" => Self::StxLock,
            "ft_transfer" => Self::FtTransfer,
            "ft_mint" => Self::FtMint,
            "ft_burn" => Self::FtBurn,
            "nft_transfer" => Self::NftTransfer,
            "nft_mint" => Self::NftMint,
            "nft_burn" => Self::NftBurn,
            "print" => Self::Print,
            "data_var_set" => Self::DataVarSet,
            "data_map_insert" => Self::DataMapInsert,
            "data_map_update" => Self::DataMapUpdate,
            "data_map_delete" => Self::DataMapDelete,
            other => return Err(format!("unknown event kind '{other}'")),
        };
        Ok(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Transaction kinds reported in chainhook transaction metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    TokenTransfer,
    ContractCall,
    ContractDeployment,
    Coinbase,
    TenureChange,
    BitcoinOp,
    Other(String),
}

impl TransactionKind {
    pub fn from_chainhook_type(tag: &str) -> Self {
        match tag {
            "NativeTokenTransfer" => Self::TokenTransfer,
            "ContractCall" => Self::ContractCall,
            "ContractDeployment" => Self::ContractDeployment,
            "Coinbase" => Self::Coinbase,
            "TenureChange" => Self::TenureChange,
            "BitcoinOp" => Self::BitcoinOp,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TokenTransfer => "token_transfer",
            Self::ContractCall => "contract_call",
            Self::ContractDeployment => "contract_deployment",
            Self::Coinbase => "coinbase",
            Self::TenureChange => "tenure_change",
            Self::BitcoinOp => "bitcoin_op",
            Self::Other(tag) => tag,
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "token_transfer" => Self::TokenTransfer,
            "contract_call" => Self::ContractCall,
            "contract_deployment" => Self::ContractDeployment,
            "coinbase" => Self::Coinbase,
            "tenure_change" => Self::TenureChange,
            "bitcoin_op" => Self::BitcoinOp,
            other => return Err(format!("unknown transaction kind '{other}'")),
        };
        Ok(kind)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TransactionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Asset touched by a transfer, mint or burn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Asset {
    Stx,
    /// Fungible token, e.g. `SP000….token::name`
    Fungible(String),
    NonFungible(String),
}

/// Quantity for fungible assets, identifier for non-fungible ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetValue {
    Amount(u128),
    Token(String),
}

impl Serialize for AssetValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // u128 does not survive every JSON consumer, so amounts travel as strings
            Self::Amount(amount) => serializer.collect_str(amount),
            Self::Token(token) => serializer.serialize_str(token),
        }
    }
}

fn serialize_u128_str<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Typed event payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventData {
    Transfer {
        asset: Asset,
        sender: String,
        recipient: String,
        value: AssetValue,
    },
    Mint {
        asset: Asset,
        recipient: String,
        value: AssetValue,
    },
    Burn {
        asset: Asset,
        sender: String,
        value: AssetValue,
    },
    Lock {
        locked_address: String,
        #[serde(serialize_with = "serialize_u128_str")]
        locked_amount: u128,
        unlock_height: u64,
    },
    Print {
        contract_identifier: String,
        topic: String,
        value: serde_json::Value,
    },
    /// Kinds without a typed shape keep their raw data
    Other(serde_json::Value),
}

/// Whether a payload appends blocks or invalidates them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Apply,
    Rollback,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The top-level parsed unit: contiguous blocks to apply or roll back
#[derive(Debug, Clone, PartialEq)]
pub struct ChainPayload {
    kind: PayloadKind,
    blocks: Vec<Block>,
    previous_tip: Option<BlockIdentifier>,
    chainhook_uuid: Option<String>,
}

impl ChainPayload {
    /// Build a payload, checking that heights are contiguous, strictly
    /// increasing and hash-linked.
    pub fn new(
        kind: PayloadKind,
        blocks: Vec<Block>,
        previous_tip: Option<BlockIdentifier>,
    ) -> Result<Self, MalformedPayload> {
        let label = kind.as_str();
        if blocks.is_empty() {
            return Err(MalformedPayload::new(label, "empty block list"));
        }

        for (i, pair) in blocks.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.height().checked_add(1) != Some(next.height()) {
                return Err(MalformedPayload::new(
                    format!("{label}[{}].block_identifier.index", i + 1),
                    format!(
                        "non-monotonic heights: expected {}, found {}",
                        prev.height().saturating_add(1),
                        next.height()
                    ),
                ));
            }
            if next.parent().hash != prev.hash() {
                return Err(MalformedPayload::new(
                    format!("{label}[{}].parent_block_identifier.hash", i + 1),
                    format!(
                        "parent hash {} does not match block {} hash {}",
                        next.parent().hash,
                        prev.height(),
                        prev.hash()
                    ),
                ));
            }
        }

        Ok(Self {
            kind,
            blocks,
            previous_tip,
            chainhook_uuid: None,
        })
    }

    /// Attach the uuid of the chainhook that produced the payload
    pub fn with_chainhook_uuid(mut self, uuid: Option<String>) -> Self {
        self.chainhook_uuid = uuid;
        self
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn previous_tip(&self) -> Option<BlockIdentifier> {
        self.previous_tip
    }

    pub fn chainhook_uuid(&self) -> Option<&str> {
        self.chainhook_uuid.as_deref()
    }

    pub fn first(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn last(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn first_height(&self) -> u64 {
        self.first().height()
    }

    pub fn last_height(&self) -> u64 {
        self.last().height()
    }

    pub fn event_count(&self) -> usize {
        self.blocks.iter().map(Block::event_count).sum()
    }

    /// Drop blocks at or below `height`. Returns `None` when nothing remains.
    pub fn trim_through(&self, height: u64) -> Option<ChainPayload> {
        let remaining: Vec<Block> = self
            .blocks
            .iter()
            .filter(|b| b.height() > height)
            .cloned()
            .collect();
        if remaining.is_empty() {
            return None;
        }

        let previous_tip = Some(remaining[0].parent());
        Some(ChainPayload {
            kind: self.kind,
            blocks: remaining,
            previous_tip,
            chainhook_uuid: self.chainhook_uuid.clone(),
        })
    }
}

/// One parsed webhook body: a rollback, an apply, or both (a reorg)
#[derive(Debug, Clone, PartialEq)]
pub struct ChainhookDelivery {
    pub rollback: Option<ChainPayload>,
    pub apply: Option<ChainPayload>,
}

impl ChainhookDelivery {
    pub fn is_reorg(&self) -> bool {
        self.rollback.is_some() && self.apply.is_some()
    }

    /// Payloads in processing order: rollback first
    pub fn into_payloads(self) -> Vec<ChainPayload> {
        self.rollback.into_iter().chain(self.apply).collect()
    }
}
