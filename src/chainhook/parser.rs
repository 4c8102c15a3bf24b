//! Parser turning untyped chainhook webhook bodies into the typed event model
//!
//! Every structural violation is reported with a path to the first offending
//! value, e.g. `apply[1].transactions[0].metadata.receipt.events[2].data.amount`.
//! Unknown fields inside blocks, transactions and events are ignored so newer
//! chainhook versions keep parsing.

use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::error::MalformedPayload;
use super::models::{
    Asset, AssetValue, Block, BlockIdentifier, ChainPayload, ChainhookDelivery, EventData,
    EventKind, Hash32, Operation, PayloadKind, Receipt, ReceiptEvent, ReceiptStatus, Transaction,
    TransactionKind,
};

type ParseResult<T> = std::result::Result<T, MalformedPayload>;

const TOP_LEVEL_KEYS: [&str; 4] = ["chainhook", "previous_tip", "apply", "rollback"];

/// Stateless chainhook payload parser
pub struct PayloadParser;

impl PayloadParser {
    /// Parse a raw webhook body
    pub fn parse_slice(body: &[u8]) -> ParseResult<ChainhookDelivery> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| MalformedPayload::new("$", format!("invalid JSON: {e}")))?;
        Self::parse_delivery(&value)
    }

    /// Parse a body that must carry exactly one of `apply` or `rollback`
    pub fn parse(value: &Value) -> ParseResult<ChainPayload> {
        let delivery = Self::parse_delivery(value)?;
        match (delivery.rollback, delivery.apply) {
            (Some(rollback), None) => Ok(rollback),
            (None, Some(apply)) => Ok(apply),
            _ => Err(MalformedPayload::new(
                "$",
                "expected a single apply or rollback payload, found both",
            )),
        }
    }

    /// Parse a body into its rollback and apply payloads.
    ///
    /// A body carrying both is a reorg delivery; the rollback is processed first.
    pub fn parse_delivery(value: &Value) -> ParseResult<ChainhookDelivery> {
        let body = value
            .as_object()
            .ok_or_else(|| MalformedPayload::new("$", "payload body must be a JSON object"))?;

        if let Some(key) = body.keys().find(|k| !TOP_LEVEL_KEYS.contains(&k.as_str())) {
            return Err(MalformedPayload::new(
                key.as_str(),
                "unknown top-level payload kind",
            ));
        }

        let chainhook_uuid = body
            .get("chainhook")
            .and_then(|c| c.get("uuid"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let explicit_tip = match body.get("previous_tip") {
            None | Some(Value::Null) => None,
            Some(tip) => Some(parse_identifier(tip, "previous_tip")?),
        };

        let rollback_blocks = parse_block_list(body, PayloadKind::Rollback)?;
        let apply_blocks = parse_block_list(body, PayloadKind::Apply)?;

        if rollback_blocks.is_none() && apply_blocks.is_none() {
            return Err(MalformedPayload::new("$", "empty block list"));
        }

        // An explicit previous_tip describes the state before the first payload
        let mut explicit_tip = explicit_tip;

        let rollback = match rollback_blocks {
            Some(blocks) => {
                let previous_tip = explicit_tip
                    .take()
                    .or_else(|| blocks.last().map(Block::identifier));
                Some(
                    ChainPayload::new(PayloadKind::Rollback, blocks, previous_tip)?
                        .with_chainhook_uuid(chainhook_uuid.clone()),
                )
            }
            None => None,
        };

        let apply = match apply_blocks {
            Some(blocks) => {
                let previous_tip = explicit_tip
                    .take()
                    .or_else(|| blocks.first().map(Block::parent));
                Some(
                    ChainPayload::new(PayloadKind::Apply, blocks, previous_tip)?
                        .with_chainhook_uuid(chainhook_uuid.clone()),
                )
            }
            None => None,
        };

        let delivery = ChainhookDelivery { rollback, apply };
        debug!(
            "Parsed chainhook delivery (uuid: {:?}, rollback: {:?}, apply: {:?})",
            chainhook_uuid,
            delivery
                .rollback
                .as_ref()
                .map(|p| (p.first_height(), p.last_height())),
            delivery
                .apply
                .as_ref()
                .map(|p| (p.first_height(), p.last_height())),
        );
        Ok(delivery)
    }
}

/// Parse the `apply` or `rollback` array. Missing, null and empty arrays yield `None`.
fn parse_block_list(
    body: &Map<String, Value>,
    kind: PayloadKind,
) -> ParseResult<Option<Vec<Block>>> {
    let label = kind.as_str();
    let raw = match body.get(label) {
        None | Some(Value::Null) => return Ok(None),
        Some(raw) => as_array(raw, label)?,
    };
    if raw.is_empty() {
        return Ok(None);
    }

    let mut blocks = raw
        .iter()
        .enumerate()
        .map(|(i, b)| parse_block(b, &format!("{label}[{i}]")))
        .collect::<ParseResult<Vec<_>>>()?;

    // chainhook emits rollback blocks newest first
    let descending =
        kind == PayloadKind::Rollback && blocks.len() > 1 && blocks[0].height() > blocks[1].height();
    check_sequence(&blocks, label, descending)?;
    if descending {
        blocks.reverse();
    }

    Ok(Some(blocks))
}

/// Check heights are contiguous and hashes linked, reporting indices as received
fn check_sequence(blocks: &[Block], label: &str, descending: bool) -> ParseResult<()> {
    for i in 1..blocks.len() {
        let (prev, next) = (&blocks[i - 1], &blocks[i]);
        let expected = if descending {
            prev.height().checked_sub(1)
        } else {
            prev.height().checked_add(1)
        };
        if expected != Some(next.height()) {
            return Err(MalformedPayload::new(
                format!("{label}[{i}].block_identifier.index"),
                match expected {
                    Some(expected) => format!(
                        "non-monotonic heights: expected {expected}, found {}",
                        next.height()
                    ),
                    None => format!("non-monotonic heights: found {}", next.height()),
                },
            ));
        }

        let (child, child_index, parent) = if descending {
            (prev, i - 1, next)
        } else {
            (next, i, prev)
        };
        if child.parent().hash != parent.hash() {
            return Err(MalformedPayload::new(
                format!("{label}[{child_index}].parent_block_identifier.hash"),
                format!(
                    "parent hash {} does not match block {} hash {}",
                    child.parent().hash,
                    parent.height(),
                    parent.hash()
                ),
            ));
        }
    }
    Ok(())
}

fn parse_block(value: &Value, path: &str) -> ParseResult<Block> {
    let obj = as_object(value, path)?;

    let identifier = parse_identifier(
        required(obj, "block_identifier", path)?,
        &format!("{path}.block_identifier"),
    )?;
    let parent = parse_identifier(
        required(obj, "parent_block_identifier", path)?,
        &format!("{path}.parent_block_identifier"),
    )?;
    if identifier.index > 0 && parent.index != identifier.index - 1 {
        return Err(MalformedPayload::new(
            format!("{path}.parent_block_identifier.index"),
            format!(
                "parent index {} does not precede block index {}",
                parent.index, identifier.index
            ),
        ));
    }

    let timestamp_path = format!("{path}.timestamp");
    let seconds = as_u64(required(obj, "timestamp", path)?, &timestamp_path)?;
    let timestamp = i64::try_from(seconds)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .ok_or_else(|| MalformedPayload::new(&timestamp_path, "timestamp out of range"))?;

    let transactions_path = format!("{path}.transactions");
    let transactions = as_array(required(obj, "transactions", path)?, &transactions_path)?
        .iter()
        .enumerate()
        .map(|(i, tx)| parse_transaction(tx, &format!("{transactions_path}[{i}]"), i))
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(Block::new(identifier, parent, timestamp, transactions))
}

fn parse_identifier(value: &Value, path: &str) -> ParseResult<BlockIdentifier> {
    let obj = as_object(value, path)?;
    let index = as_u64(required(obj, "index", path)?, &format!("{path}.index"))?;
    let hash = as_hash(required(obj, "hash", path)?, &format!("{path}.hash"))?;
    Ok(BlockIdentifier::new(index, hash))
}

fn parse_transaction(value: &Value, path: &str, position: usize) -> ParseResult<Transaction> {
    let obj = as_object(value, path)?;

    let id_path = format!("{path}.transaction_identifier");
    let id_obj = as_object(required(obj, "transaction_identifier", path)?, &id_path)?;
    let id = as_hash(required(id_obj, "hash", &id_path)?, &format!("{id_path}.hash"))?;

    let meta_path = format!("{path}.metadata");
    let metadata = as_object(required(obj, "metadata", path)?, &meta_path)?;

    let status = match metadata.get("success") {
        None | Some(Value::Null) => ReceiptStatus::PendingResolution,
        Some(Value::Bool(true)) => ReceiptStatus::Success,
        Some(Value::Bool(false)) => ReceiptStatus::Failure,
        Some(_) => {
            return Err(MalformedPayload::new(
                format!("{meta_path}.success"),
                "expected boolean",
            ))
        }
    };

    let kind = match optional(metadata, "kind") {
        None => TransactionKind::Other("unspecified".to_string()),
        Some(kind) => {
            let kind_path = format!("{meta_path}.kind");
            let kind_obj = as_object(kind, &kind_path)?;
            TransactionKind::from_chainhook_type(as_str(
                required(kind_obj, "type", &kind_path)?,
                &format!("{kind_path}.type"),
            )?)
        }
    };

    let index = match optional(metadata, "position").and_then(|p| p.get("index")) {
        Some(index) => as_u32(index, &format!("{meta_path}.position.index"))?,
        None => u32::try_from(position)
            .map_err(|_| MalformedPayload::new(path, "transaction position out of range"))?,
    };

    let sender = optional_str(metadata, "sender", &meta_path)?;
    let result = optional_str(metadata, "result", &meta_path)?;

    let events = match optional(metadata, "receipt") {
        None => Vec::new(),
        Some(receipt) => {
            let receipt_path = format!("{meta_path}.receipt");
            let receipt = as_object(receipt, &receipt_path)?;
            match optional(receipt, "events") {
                None => Vec::new(),
                Some(events) => parse_events(events, &format!("{receipt_path}.events"))?,
            }
        }
    };

    let operations = match optional(obj, "operations") {
        None => Vec::new(),
        Some(ops) => {
            let ops_path = format!("{path}.operations");
            as_array(ops, &ops_path)?
                .iter()
                .enumerate()
                .map(|(i, op)| parse_operation(op, &format!("{ops_path}[{i}]")))
                .collect::<ParseResult<Vec<_>>>()?
        }
    };

    Ok(Transaction {
        id,
        index,
        kind,
        sender,
        operations,
        receipt: Receipt {
            status,
            events,
            result,
        },
    })
}

fn parse_operation(value: &Value, path: &str) -> ParseResult<Operation> {
    let obj = as_object(value, path)?;

    let id_path = format!("{path}.operation_identifier");
    let id_obj = as_object(required(obj, "operation_identifier", path)?, &id_path)?;
    let index = as_u32(required(id_obj, "index", &id_path)?, &format!("{id_path}.index"))?;

    let operation_type = as_str(required(obj, "type", path)?, &format!("{path}.type"))?.to_string();
    let status = optional_str(obj, "status", path)?;

    let account = match optional(obj, "account") {
        None => None,
        Some(account) => {
            let account_path = format!("{path}.account");
            optional_str(as_object(account, &account_path)?, "address", &account_path)?
        }
    };

    let amount = match optional(obj, "amount") {
        None => None,
        Some(amount) => {
            let amount_path = format!("{path}.amount");
            let amount_obj = as_object(amount, &amount_path)?;
            optional(amount_obj, "value")
                .map(|v| as_amount(v, &format!("{amount_path}.value")))
                .transpose()?
        }
    };

    Ok(Operation {
        index,
        operation_type,
        status,
        account,
        amount,
    })
}

/// Parse receipt events, ordered by emission index
fn parse_events(value: &Value, path: &str) -> ParseResult<Vec<ReceiptEvent>> {
    let mut events = Vec::new();
    let mut positions = Vec::new();

    for (i, raw) in as_array(value, path)?.iter().enumerate() {
        let event_path = format!("{path}[{i}]");
        let event = parse_event(raw, &event_path, i)?;
        positions.push((event.index, event_path));
        events.push(event);
    }

    positions.sort_by_key(|(index, _)| *index);
    for pair in positions.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(MalformedPayload::new(
                format!("{}.position.index", pair[1].1),
                format!("duplicate event index {}", pair[1].0),
            ));
        }
    }

    events.sort_by_key(|e| e.index);
    Ok(events)
}

fn parse_event(value: &Value, path: &str, position: usize) -> ParseResult<ReceiptEvent> {
    let obj = as_object(value, path)?;
    let kind = EventKind::from_chainhook_type(as_str(
        required(obj, "type", path)?,
        &format!("{path}.type"),
    )?);

    let index = match optional(obj, "position").and_then(|p| p.get("index")) {
        Some(index) => as_u32(index, &format!("{path}.position.index"))?,
        None => u32::try_from(position)
            .map_err(|_| MalformedPayload::new(path, "event position out of range"))?,
    };

    let data = parse_event_data(&kind, obj, path)?;
    Ok(ReceiptEvent { index, kind, data })
}

fn parse_event_data(
    kind: &EventKind,
    event: &Map<String, Value>,
    path: &str,
) -> ParseResult<EventData> {
    let data_path = format!("{path}.data");

    // Untyped kinds keep whatever data they carry
    let typed = !matches!(
        kind,
        EventKind::DataVarSet
            | EventKind::DataMapInsert
            | EventKind::DataMapUpdate
            | EventKind::DataMapDelete
            | EventKind::Other(_)
    );
    if !typed {
        return Ok(EventData::Other(
            optional(event, "data").cloned().unwrap_or(Value::Null),
        ));
    }

    let data = as_object(required(event, "data", path)?, &data_path)?;
    let text = |key: &str| -> ParseResult<String> {
        as_str(required(data, key, &data_path)?, &format!("{data_path}.{key}")).map(str::to_string)
    };
    let amount = |key: &str| -> ParseResult<u128> {
        as_amount(required(data, key, &data_path)?, &format!("{data_path}.{key}"))
    };
    let fungible = || text("asset_identifier").map(Asset::Fungible);
    let non_fungible = || text("asset_identifier").map(Asset::NonFungible);
    let token = || -> ParseResult<AssetValue> {
        let key = if data.contains_key("raw_value") {
            "raw_value"
        } else {
            "hex_asset_value"
        };
        text(key).map(AssetValue::Token)
    };

    let parsed = match kind {
        EventKind::StxTransfer => EventData::Transfer {
            asset: Asset::Stx,
            sender: text("sender")?,
            recipient: text("recipient")?,
            value: AssetValue::Amount(amount("amount")?),
        },
        EventKind::StxMint => EventData::Mint {
            asset: Asset::Stx,
            recipient: text("recipient")?,
            value: AssetValue::Amount(amount("amount")?),
        },
        EventKind::StxBurn => EventData::Burn {
            asset: Asset::Stx,
            sender: text("sender")?,
            value: AssetValue::Amount(amount("amount")?),
        },
        EventKind::StxLock => EventData::Lock {
            locked_address: text("locked_address")?,
            locked_amount: amount("locked_amount")?,
            unlock_height: as_u64(
                required(data, "unlock_height", &data_path)?,
                &format!("{data_path}.unlock_height"),
            )?,
        },
        EventKind::FtTransfer => EventData::Transfer {
            asset: fungible()?,
            sender: text("sender")?,
            recipient: text("recipient")?,
            value: AssetValue::Amount(amount("amount")?),
        },
        EventKind::FtMint => EventData::Mint {
            asset: fungible()?,
            recipient: text("recipient")?,
            value: AssetValue::Amount(amount("amount")?),
        },
        EventKind::FtBurn => EventData::Burn {
            asset: fungible()?,
            sender: text("sender")?,
            value: AssetValue::Amount(amount("amount")?),
        },
        EventKind::NftTransfer => EventData::Transfer {
            asset: non_fungible()?,
            sender: text("sender")?,
            recipient: text("recipient")?,
            value: token()?,
        },
        EventKind::NftMint => EventData::Mint {
            asset: non_fungible()?,
            recipient: text("recipient")?,
            value: token()?,
        },
        EventKind::NftBurn => EventData::Burn {
            asset: non_fungible()?,
            sender: text("sender")?,
            value: token()?,
        },
        EventKind::Print => EventData::Print {
            contract_identifier: text("contract_identifier")?,
            topic: text("topic")?,
            value: data.get("value").cloned().unwrap_or(Value::Null),
        },
        _ => EventData::Other(Value::Object(data.clone())),
    };
    Ok(parsed)
}

// Path-tracked accessors

fn optional<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn required<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> ParseResult<&'a Value> {
    optional(obj, key)
        .ok_or_else(|| MalformedPayload::new(format!("{path}.{key}"), "missing required field"))
}

fn optional_str(obj: &Map<String, Value>, key: &str, path: &str) -> ParseResult<Option<String>> {
    optional(obj, key)
        .map(|v| as_str(v, &format!("{path}.{key}")).map(str::to_string))
        .transpose()
}

fn as_object<'a>(value: &'a Value, path: &str) -> ParseResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| MalformedPayload::new(path, "expected object"))
}

fn as_array<'a>(value: &'a Value, path: &str) -> ParseResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| MalformedPayload::new(path, "expected array"))
}

fn as_str<'a>(value: &'a Value, path: &str) -> ParseResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| MalformedPayload::new(path, "expected string"))
}

fn as_u64(value: &Value, path: &str) -> ParseResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| MalformedPayload::new(path, "expected unsigned integer"))
}

fn as_u32(value: &Value, path: &str) -> ParseResult<u32> {
    u32::try_from(as_u64(value, path)?)
        .map_err(|_| MalformedPayload::new(path, "integer out of range"))
}

fn as_hash(value: &Value, path: &str) -> ParseResult<Hash32> {
    as_str(value, path)?
        .parse::<Hash32>()
        .map_err(|reason| MalformedPayload::new(path, reason))
}

/// Amounts arrive as decimal strings or plain JSON numbers
fn as_amount(value: &Value, path: &str) -> ParseResult<u128> {
    match value {
        Value::String(s) => s
            .parse::<u128>()
            .map_err(|_| MalformedPayload::new(path, format!("invalid amount '{s}'"))),
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| MalformedPayload::new(path, format!("invalid amount {n}"))),
        _ => Err(MalformedPayload::new(path, "expected amount string or number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{apply_body, block_json, hash_for, rollback_body};
    use serde_json::json;

    #[test]
    fn test_parse_apply_payload() {
        let payload = PayloadParser::parse(&apply_body(101, 102, 0)).unwrap();

        assert_eq!(payload.kind(), PayloadKind::Apply);
        assert_eq!(payload.first_height(), 101);
        assert_eq!(payload.last_height(), 102);
        assert_eq!(payload.previous_tip().unwrap().hash, hash_for(100, 0));
        assert_eq!(payload.chainhook_uuid(), Some("1f0a3f0e-test"));

        let tx = &payload.first().transactions()[0];
        assert_eq!(tx.kind, TransactionKind::ContractCall);
        assert_eq!(tx.receipt.status, ReceiptStatus::Success);
        assert_eq!(tx.sender.as_deref(), Some("SP1SENDER"));
        assert_eq!(tx.operations.len(), 1);
        assert_eq!(tx.operations[0].amount, Some(1000));

        let events = &tx.receipt.events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::FtTransfer);
        assert_eq!(
            events[0].data,
            EventData::Transfer {
                asset: Asset::Fungible("SP000.token::usd".to_string()),
                sender: "SP1SENDER".to_string(),
                recipient: "SP2RECIPIENT".to_string(),
                value: AssetValue::Amount(1101),
            }
        );
        assert_eq!(events[1].kind, EventKind::Print);
    }

    #[test]
    fn test_parse_matches_builder_blocks() {
        let parsed = PayloadParser::parse(&apply_body(101, 103, 0)).unwrap();
        let built = crate::test_utils::apply_payload(101, 103, 0);
        for (p, b) in parsed.blocks().iter().zip(built.blocks()) {
            assert_eq!(p.identifier(), b.identifier());
            assert_eq!(p.parent(), b.parent());
            assert_eq!(p.timestamp(), b.timestamp());
            assert_eq!(
                p.transactions()[0].receipt.events,
                b.transactions()[0].receipt.events
            );
        }
    }

    #[test]
    fn test_rollback_is_normalized_to_ascending() {
        let payload = PayloadParser::parse(&rollback_body(101, 103, 0)).unwrap();

        assert_eq!(payload.kind(), PayloadKind::Rollback);
        let heights: Vec<u64> = payload.blocks().iter().map(|b| b.height()).collect();
        assert_eq!(heights, vec![101, 102, 103]);
        assert_eq!(payload.previous_tip().unwrap().index, 103);
    }

    #[test]
    fn test_reorg_delivery() {
        let mut body = apply_body(101, 102, 1);
        body["rollback"] = rollback_body(101, 101, 0)["rollback"].clone();

        let delivery = PayloadParser::parse_delivery(&body).unwrap();
        assert!(delivery.is_reorg());
        let payloads = delivery.into_payloads();
        assert_eq!(payloads[0].kind(), PayloadKind::Rollback);
        assert_eq!(payloads[1].kind(), PayloadKind::Apply);

        let err = PayloadParser::parse(&body).unwrap_err();
        assert_eq!(err.path, "$");
    }

    #[test]
    fn test_missing_field_reports_path() {
        let mut body = apply_body(101, 102, 0);
        body["apply"][1]["transactions"][0]["metadata"]["receipt"]["events"][0]["data"]
            .as_object_mut()
            .unwrap()
            .remove("amount");

        let err = PayloadParser::parse(&body).unwrap_err();
        assert_eq!(
            err.path,
            "apply[1].transactions[0].metadata.receipt.events[0].data.amount"
        );
        assert_eq!(err.reason, "missing required field");
    }

    #[test]
    fn test_invalid_amount_and_hash() {
        let mut body = apply_body(101, 101, 0);
        body["apply"][0]["transactions"][0]["metadata"]["receipt"]["events"][0]["data"]["amount"] =
            json!("12abc");
        let err = PayloadParser::parse(&body).unwrap_err();
        assert!(err.path.ends_with("events[0].data.amount"));
        assert!(err.reason.contains("invalid amount"));

        let mut body = apply_body(101, 101, 0);
        body["apply"][0]["block_identifier"]["hash"] = json!("0x1234");
        let err = PayloadParser::parse(&body).unwrap_err();
        assert_eq!(err.path, "apply[0].block_identifier.hash");
    }

    #[test]
    fn test_numeric_amount_is_accepted() {
        let mut body = apply_body(101, 101, 0);
        body["apply"][0]["transactions"][0]["metadata"]["receipt"]["events"][0]["data"]["amount"] =
            json!(42);
        let payload = PayloadParser::parse(&body).unwrap();
        let event = &payload.first().transactions()[0].receipt.events[0];
        assert!(matches!(
            event.data,
            EventData::Transfer {
                value: AssetValue::Amount(42),
                ..
            }
        ));
    }

    #[test]
    fn test_non_contiguous_heights_rejected() {
        let body = json!({ "apply": [block_json(101, 0), block_json(103, 0)] });
        let err = PayloadParser::parse(&body).unwrap_err();
        assert_eq!(err.path, "apply[1].block_identifier.index");
        assert!(err.reason.contains("expected 102, found 103"));

        // apply arrays must already be ascending
        let body = json!({ "apply": [block_json(102, 0), block_json(101, 0)] });
        assert!(PayloadParser::parse(&body).is_err());
    }

    #[test]
    fn test_broken_hash_link_rejected() {
        let body = json!({ "apply": [block_json(101, 0), block_json(102, 1)] });
        let err = PayloadParser::parse(&body).unwrap_err();
        assert_eq!(err.path, "apply[1].parent_block_identifier.hash");
    }

    #[test]
    fn test_empty_and_unknown_bodies() {
        let err = PayloadParser::parse(&json!({ "apply": [], "rollback": [] })).unwrap_err();
        assert_eq!(err.reason, "empty block list");

        let err = PayloadParser::parse(&json!({ "chainhook": {} })).unwrap_err();
        assert_eq!(err.reason, "empty block list");

        let err = PayloadParser::parse(&json!({ "invalidate": [block_json(1, 0)] })).unwrap_err();
        assert_eq!(err.path, "invalidate");
        assert_eq!(err.reason, "unknown top-level payload kind");

        let err = PayloadParser::parse(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.path, "$");

        let err = PayloadParser::parse_slice(b"{not json").unwrap_err();
        assert!(err.reason.starts_with("invalid JSON"));
    }

    #[test]
    fn test_pending_status_and_unknown_event_type() {
        let mut body = apply_body(101, 101, 0);
        let metadata = &mut body["apply"][0]["transactions"][0]["metadata"];
        metadata.as_object_mut().unwrap().remove("success");
        metadata["receipt"]["events"][1] = json!({
            "type": "QuantumEvent",
            "position": { "index": 1 },
            "data": { "anything": true }
        });

        let payload = PayloadParser::parse(&body).unwrap();
        let receipt = &payload.first().transactions()[0].receipt;
        assert_eq!(receipt.status, ReceiptStatus::PendingResolution);
        assert_eq!(
            receipt.events[1].kind,
            EventKind::Other("QuantumEvent".to_string())
        );
        assert_eq!(
            receipt.events[1].data,
            EventData::Other(json!({ "anything": true }))
        );
    }

    #[test]
    fn test_events_ordered_by_position() {
        let mut body = apply_body(101, 101, 0);
        let events = &mut body["apply"][0]["transactions"][0]["metadata"]["receipt"]["events"];
        events[0]["position"]["index"] = json!(5);
        events[1]["position"]["index"] = json!(2);

        let payload = PayloadParser::parse(&body).unwrap();
        let events = &payload.first().transactions()[0].receipt.events;
        assert_eq!(events[0].kind, EventKind::Print);
        assert_eq!(events[1].kind, EventKind::FtTransfer);

        let mut body = apply_body(101, 101, 0);
        let events = &mut body["apply"][0]["transactions"][0]["metadata"]["receipt"]["events"];
        events[1]["position"]["index"] = json!(0);
        let err = PayloadParser::parse(&body).unwrap_err();
        assert!(err.reason.contains("duplicate event index 0"));
    }

    #[test]
    fn test_explicit_previous_tip() {
        let mut body = apply_body(101, 101, 0);
        body["previous_tip"] = json!({ "index": 100, "hash": hash_for(100, 0).to_string() });
        let payload = PayloadParser::parse(&body).unwrap();
        assert_eq!(
            payload.previous_tip(),
            Some(BlockIdentifier::new(100, hash_for(100, 0)))
        );
    }

    #[test]
    fn test_unknown_nested_fields_are_ignored() {
        let mut body = apply_body(101, 101, 0);
        body["apply"][0]["future_field"] = json!({ "nested": [1, 2] });
        body["apply"][0]["transactions"][0]["metadata"]["fee"] = json!(180);
        assert!(PayloadParser::parse(&body).is_ok());
    }
}
