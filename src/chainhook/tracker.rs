//! Chain-tip tracking: validation of incoming payloads and tip commits

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::TipInconsistency;
use super::models::{BlockIdentifier, ChainPayload, Hash32, PayloadKind};

/// The recorded canonical chain tip
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTipState {
    pub height: u64,
    /// `None` until the first block is committed
    pub hash: Option<Hash32>,
    /// Recently committed canonical hashes, bounded by the tracker's history depth
    pub history: BTreeMap<u64, Hash32>,
    /// Increases by one per commit; stores compare-and-swap on it
    pub version: u64,
}

impl ChainTipState {
    pub fn unanchored() -> Self {
        Self::default()
    }

    pub fn anchored(identifier: BlockIdentifier) -> Self {
        let mut history = BTreeMap::new();
        history.insert(identifier.index, identifier.hash);
        Self {
            height: identifier.index,
            hash: Some(identifier.hash),
            history,
            version: 0,
        }
    }

    pub fn is_anchored(&self) -> bool {
        self.hash.is_some()
    }

    pub fn identifier(&self) -> Option<BlockIdentifier> {
        self.hash.map(|hash| BlockIdentifier::new(self.height, hash))
    }

    pub fn recorded_hash(&self, height: u64) -> Option<Hash32> {
        self.history.get(&height).copied()
    }

    /// Heights below the retained history window are final
    pub fn is_final(&self, height: u64) -> bool {
        self.history
            .first_key_value()
            .map_or(false, |(oldest, _)| height < *oldest)
    }
}

/// Outcome of validating a payload against the tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Duplicate,
    Gap { missing: RangeInclusive<u64> },
    ForkRollback { fork_height: u64 },
    Invalid { reason: String },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Duplicate => "duplicate",
            Self::Gap { .. } => "gap",
            Self::ForkRollback { .. } => "fork_rollback",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// The inconsistency behind a non-accepting decision
    pub fn inconsistency(&self) -> Option<TipInconsistency> {
        match self {
            Self::Gap { missing } => Some(TipInconsistency::Gap {
                missing: missing.clone(),
            }),
            Self::ForkRollback { fork_height } => Some(TipInconsistency::ForkRollback {
                fork_height: *fork_height,
            }),
            Self::Invalid { reason } => Some(TipInconsistency::Invalid {
                reason: reason.clone(),
            }),
            Self::Accept | Self::Duplicate => None,
        }
    }
}

/// Sole owner of the chain-tip state
#[derive(Debug)]
pub struct TipTracker {
    state: ChainTipState,
    history_depth: usize,
}

impl TipTracker {
    pub fn new(mut state: ChainTipState, history_depth: usize) -> Self {
        let history_depth = history_depth.max(1);
        while state.history.len() > history_depth {
            state.history.pop_first();
        }
        Self {
            state,
            history_depth,
        }
    }

    pub fn current_tip(&self) -> ChainTipState {
        self.state.clone()
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    /// Validate a payload against the tracker's own tip
    pub fn check(&self, payload: &ChainPayload) -> Decision {
        Self::validate(payload, &self.state)
    }

    /// Decide how a payload relates to `tip`. Pure; never mutates state.
    pub fn validate(payload: &ChainPayload, tip: &ChainTipState) -> Decision {
        let decision = match payload.kind() {
            PayloadKind::Apply => validate_apply(payload, tip),
            PayloadKind::Rollback => validate_rollback(payload, tip),
        };
        debug!(
            "Validated {} payload {}..={} against tip {} (version {}): {:?}",
            payload.kind(),
            payload.first_height(),
            payload.last_height(),
            tip.height,
            tip.version,
            decision
        );
        decision
    }

    /// Compute the state a payload would commit to, without installing it.
    ///
    /// Returns `Ok(None)` when the payload carries no blocks beyond the tip.
    pub fn prepare_commit(
        &self,
        payload: &ChainPayload,
    ) -> Result<Option<ChainTipState>, TipInconsistency> {
        match payload.kind() {
            PayloadKind::Apply => self.prepare_apply(payload),
            PayloadKind::Rollback => self.prepare_rollback(payload).map(Some),
        }
    }

    pub fn install(&mut self, state: ChainTipState) {
        self.state = state;
    }

    /// Prepare and install in one step
    pub fn commit(&mut self, payload: &ChainPayload) -> Result<ChainTipState, TipInconsistency> {
        if let Some(next) = self.prepare_commit(payload)? {
            self.install(next);
        }
        Ok(self.current_tip())
    }

    fn prepare_apply(
        &self,
        payload: &ChainPayload,
    ) -> Result<Option<ChainTipState>, TipInconsistency> {
        let tip = &self.state;
        let new_blocks: Vec<_> = payload
            .blocks()
            .iter()
            .filter(|b| !tip.is_anchored() || b.height() > tip.height)
            .collect();
        let (Some(first), Some(last)) = (new_blocks.first(), new_blocks.last()) else {
            return Ok(None);
        };

        let mut next = tip.clone();
        match tip.hash {
            Some(tip_hash) => {
                if tip.height.checked_add(1) != Some(first.height())
                    || first.parent().hash != tip_hash
                {
                    return Err(TipInconsistency::CommitOutOfOrder {
                        reason: format!(
                            "block {} does not connect to tip #{} ({})",
                            first.identifier(),
                            tip.height,
                            tip_hash
                        ),
                    });
                }
            }
            None => next.history.clear(),
        }

        for block in &new_blocks {
            next.history.insert(block.height(), block.hash());
        }
        while next.history.len() > self.history_depth {
            next.history.pop_first();
        }
        next.height = last.height();
        next.hash = Some(last.hash());
        next.version += 1;
        Ok(Some(next))
    }

    fn prepare_rollback(&self, payload: &ChainPayload) -> Result<ChainTipState, TipInconsistency> {
        let tip = &self.state;
        if !tip.is_anchored() {
            return Err(TipInconsistency::CommitOutOfOrder {
                reason: "cannot roll back an unanchored tip".to_string(),
            });
        }
        if payload.last_height() > tip.height {
            return Err(TipInconsistency::CommitOutOfOrder {
                reason: format!(
                    "rollback reaches height {} above tip {}",
                    payload.last_height(),
                    tip.height
                ),
            });
        }

        let lowest = payload.first_height();
        let mut next = tip.clone();
        next.history.split_off(&lowest);
        if lowest == 0 {
            next.height = 0;
            next.hash = None;
            next.history.clear();
        } else {
            let target = lowest - 1;
            let hash = tip
                .recorded_hash(target)
                .unwrap_or(payload.first().parent().hash);
            next.history.insert(target, hash);
            next.height = target;
            next.hash = Some(hash);
        }
        next.version += 1;
        Ok(next)
    }
}

fn validate_apply(payload: &ChainPayload, tip: &ChainTipState) -> Decision {
    let Some(tip_hash) = tip.hash else {
        return Decision::Accept;
    };

    let first = payload.first_height();
    // A tip at u64::MAX has no next height; everything at or below it is checked below
    if let Some(next) = tip.height.checked_add(1) {
        if first > next {
            return Decision::Gap {
                missing: next..=first - 1,
            };
        }
        if first == next {
            let parent = payload.first().parent().hash;
            return if parent == tip_hash {
                Decision::Accept
            } else {
                Decision::Invalid {
                    reason: format!(
                        "parent hash {parent} of block {first} does not match tip hash {tip_hash}"
                    ),
                }
            };
        }
    }

    // The payload starts at or below the tip: its known prefix must match
    for block in payload.blocks().iter().take_while(|b| b.height() <= tip.height) {
        let height = block.height();
        match tip.recorded_hash(height) {
            Some(recorded) if recorded == block.hash() => {}
            Some(recorded) => {
                return Decision::Invalid {
                    reason: format!(
                        "block {height} hash {} differs from recorded hash {recorded}",
                        block.hash()
                    ),
                }
            }
            None if tip.is_final(height) => {}
            None => {
                return Decision::Invalid {
                    reason: format!("no recorded hash for height {height}"),
                }
            }
        }
    }

    if payload.last_height() <= tip.height {
        Decision::Duplicate
    } else {
        Decision::Accept
    }
}

fn validate_rollback(payload: &ChainPayload, tip: &ChainTipState) -> Decision {
    if !tip.is_anchored() {
        return Decision::Invalid {
            reason: "cannot roll back an unanchored tip".to_string(),
        };
    }
    if payload.last_height() > tip.height {
        return Decision::Invalid {
            reason: format!(
                "rollback references height {} above tip {}",
                payload.last_height(),
                tip.height
            ),
        };
    }
    if tip.is_final(payload.first_height()) {
        return Decision::Invalid {
            reason: format!(
                "rollback to height {} is below the retained history window",
                payload.first_height()
            ),
        };
    }

    for block in payload.blocks() {
        if let Some(recorded) = tip.recorded_hash(block.height()) {
            if recorded != block.hash() {
                return Decision::ForkRollback {
                    fork_height: block.height(),
                };
            }
        }
    }
    Decision::Accept
}
