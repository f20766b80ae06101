//! Pipeline graph and join counters.
//!
//! The document pipeline has a fixed shape whose width is only known once
//! extraction has produced its image list:
//!
//! ```text
//! extract -> { ner_text, ocr/0 .. ocr/n-1 } -> fan_in_1 -> { ner_ocr/0 .. ner_ocr/n-1 } -> fan_in_2
//! ```
//!
//! Join state is never held in memory between decisions. It is recomputed
//! from checkpoints every time, and a released join is persisted as a
//! `Joined` checkpoint so recovery sees the same "k of m done" picture.

use std::collections::HashMap;

use docflow_types::workflow::{CheckpointEntry, StepFailure, StepId, StepOutcome};

// ---------------------------------------------------------------------------
// Step graph
// ---------------------------------------------------------------------------

/// Children joined by `fan_in_1` for a document with `image_count` images.
///
/// `ner_text` comes first, followed by every OCR step in image order.
pub fn first_fan_out(image_count: u32) -> Vec<StepId> {
    std::iter::once(StepId::ner_text())
        .chain((0..image_count).map(StepId::ocr))
        .collect()
}

/// Children joined by `fan_in_2`: one NER step per OCR result.
pub fn second_fan_out(image_count: u32) -> Vec<StepId> {
    (0..image_count).map(StepId::ner_ocr).collect()
}

// ---------------------------------------------------------------------------
// Checkpoint view
// ---------------------------------------------------------------------------

/// Read-only index over the checkpoints of one run.
#[derive(Debug, Default)]
pub struct CheckpointView<'a> {
    entries: HashMap<StepId, &'a CheckpointEntry>,
}

impl<'a> CheckpointView<'a> {
    pub fn new(checkpoints: &'a [CheckpointEntry]) -> Self {
        let mut entries = HashMap::with_capacity(checkpoints.len());
        for entry in checkpoints {
            // Write-once stores never yield two entries per step; keep the
            // earliest if a caller passes a hand-built list that does.
            entries
                .entry(entry.step_id)
                .and_modify(|current: &mut &'a CheckpointEntry| {
                    if entry.seq < current.seq {
                        *current = entry;
                    }
                })
                .or_insert(entry);
        }
        Self { entries }
    }

    pub fn get(&self, step_id: &StepId) -> Option<&'a CheckpointEntry> {
        self.entries.get(step_id).copied()
    }

    pub fn outcome(&self, step_id: &StepId) -> Option<&'a StepOutcome> {
        self.get(step_id).map(|e| &e.outcome)
    }

    pub fn contains(&self, step_id: &StepId) -> bool {
        self.entries.contains_key(step_id)
    }
}

// ---------------------------------------------------------------------------
// Join counter
// ---------------------------------------------------------------------------

/// State of a fan-in over a set of children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinState {
    /// Some children have no terminal result yet.
    Waiting {
        succeeded: u32,
        width: u32,
        /// Children without a checkpoint, in fan-out order.
        pending: Vec<StepId>,
    },
    /// Every child succeeded.
    Released { width: u32 },
    /// At least one child failed permanently. Carries the failure that was
    /// recorded first (lowest checkpoint sequence).
    Aborted(StepFailure),
}

/// Evaluate the join counter for `children` against recorded checkpoints.
///
/// Releases only when the number of successes equals the fan-out width;
/// aborts as soon as any child has a permanent failure, even while
/// siblings are still pending.
pub fn evaluate_join(children: &[StepId], view: &CheckpointView<'_>) -> JoinState {
    let width = children.len() as u32;
    let mut succeeded = 0u32;
    let mut pending = Vec::new();
    let mut first_failure: Option<&CheckpointEntry> = None;

    for child in children {
        match view.get(child) {
            None => pending.push(*child),
            Some(entry) => match &entry.outcome {
                StepOutcome::Failed { .. } => {
                    if first_failure.is_none_or(|f| entry.seq < f.seq) {
                        first_failure = Some(entry);
                    }
                }
                StepOutcome::Succeeded { .. } | StepOutcome::Joined { .. } => succeeded += 1,
            },
        }
    }

    if let Some(entry) = first_failure {
        if let StepOutcome::Failed { kind, message } = &entry.outcome {
            return JoinState::Aborted(StepFailure {
                step_id: entry.step_id,
                kind: *kind,
                message: message.clone(),
            });
        }
    }

    if succeeded == width {
        JoinState::Released { width }
    } else {
        JoinState::Waiting {
            succeeded,
            width,
            pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
