//! Replay-safe decision function for the document pipeline.
//!
//! `decide` maps a run and its checkpoints to the next scheduling decision.
//! It reads no clock, generates no ids and performs no I/O, so calling it
//! again after a crash with the same checkpoints yields the same decision.
//! Steps that already have a checkpoint are never scheduled again; steps
//! that were scheduled but have not finished are scheduled again, and the
//! queue collapses them onto their existing task by deterministic task id.

use docflow_types::error::ErrorKind;
use docflow_types::workflow::{
    ActivityInput, ActivityOutput, BlobRef, CheckpointEntry, Entity, PipelineAggregate,
    StepFailure, StepId, StepOutcome, TaskSpec, WorkflowRun,
};

use super::dag::{CheckpointView, JoinState, evaluate_join, first_fan_out, second_fan_out};

/// A fan-in node that became ready and must be persisted as `Joined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRelease {
    pub step_id: StepId,
    pub width: u32,
}

/// Where a pending run is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    FirstFanIn { succeeded: u32, width: u32 },
    SecondFanIn { succeeded: u32, width: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pending(Stage),
    Completed(PipelineAggregate),
    Failed(StepFailure),
}

/// Output of one evaluation of the decision function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Steps to enqueue, in deterministic order.
    pub schedule: Vec<TaskSpec>,
    /// Joins to persist before anything else.
    pub joins: Vec<JoinRelease>,
    pub verdict: Verdict,
}

impl Decision {
    fn failed(failure: StepFailure) -> Self {
        Self {
            schedule: Vec::new(),
            joins: Vec::new(),
            verdict: Verdict::Failed(failure),
        }
    }
}

/// Compute the next decision for `run` from its checkpoints.
pub fn decide(run: &WorkflowRun, checkpoints: &[CheckpointEntry]) -> Decision {
    let view = CheckpointView::new(checkpoints);
    plan(run, &view).unwrap_or_else(Decision::failed)
}

fn plan(run: &WorkflowRun, view: &CheckpointView<'_>) -> Result<Decision, StepFailure> {
    let extract = StepId::extract();
    let (text_ref, image_refs) = match view.outcome(&extract) {
        None => {
            return Ok(Decision {
                schedule: vec![task(
                    run,
                    extract,
                    ActivityInput::Extract {
                        blob_ref: run.input_ref.clone(),
                    },
                )],
                joins: Vec::new(),
                verdict: Verdict::Pending(Stage::Extracting),
            });
        }
        Some(StepOutcome::Succeeded {
            output: ActivityOutput::Extracted {
                text_ref,
                image_refs,
            },
        }) => (text_ref, image_refs),
        Some(other) => return Err(step_failure(extract, other)),
    };

    let image_count = image_refs.len() as u32;
    let mut joins = Vec::new();

    // Wave 1: NER over the full text plus one OCR per image.
    let fan_in_first = StepId::fan_in_first();
    if !view.contains(&fan_in_first) {
        match evaluate_join(&first_fan_out(image_count), view) {
            JoinState::Aborted(failure) => return Err(failure),
            JoinState::Waiting {
                succeeded,
                width,
                pending,
            } => {
                let schedule = pending
                    .into_iter()
                    .map(|step| first_wave_task(run, step, text_ref, image_refs))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Decision {
                    schedule,
                    joins,
                    verdict: Verdict::Pending(Stage::FirstFanIn { succeeded, width }),
                });
            }
            JoinState::Released { width } => joins.push(JoinRelease {
                step_id: fan_in_first,
                width,
            }),
        }
    }

    // Wave 2: NER over each OCR result.
    let ocr_texts = (0..image_count)
        .map(|i| recognized_text(view, StepId::ocr(i)))
        .collect::<Result<Vec<_>, _>>()?;

    let fan_in_second = StepId::fan_in_second();
    if !view.contains(&fan_in_second) {
        match evaluate_join(&second_fan_out(image_count), view) {
            JoinState::Aborted(failure) => return Err(failure),
            JoinState::Waiting {
                succeeded,
                width,
                pending,
            } => {
                let schedule = pending
                    .into_iter()
                    .filter_map(|step| {
                        let text_ref = ocr_texts.get(step.index? as usize)?.clone();
                        Some(task(run, step, ActivityInput::Ner { text_ref }))
                    })
                    .collect();
                return Ok(Decision {
                    schedule,
                    joins,
                    verdict: Verdict::Pending(Stage::SecondFanIn { succeeded, width }),
                });
            }
            JoinState::Released { width } => joins.push(JoinRelease {
                step_id: fan_in_second,
                width,
            }),
        }
    }

    let aggregate = PipelineAggregate {
        ner_text: entities(view, StepId::ner_text())?,
        ner_ocr_results: (0..image_count)
            .map(|i| entities(view, StepId::ner_ocr(i)))
            .collect::<Result<Vec<_>, _>>()?,
        ocr_results: ocr_texts,
        total_images: image_count,
    };

    Ok(Decision {
        schedule: Vec::new(),
        joins,
        verdict: Verdict::Completed(aggregate),
    })
}

fn task(run: &WorkflowRun, step_id: StepId, input: ActivityInput) -> TaskSpec {
    TaskSpec {
        run_id: run.id,
        step_id,
        input,
    }
}

fn first_wave_task(
    run: &WorkflowRun,
    step_id: StepId,
    text_ref: &BlobRef,
    image_refs: &[BlobRef],
) -> Result<TaskSpec, StepFailure> {
    let input = match step_id.index {
        None => ActivityInput::Ner {
            text_ref: text_ref.clone(),
        },
        Some(i) => ActivityInput::Ocr {
            image_ref: image_refs
                .get(i as usize)
                .cloned()
                .ok_or_else(|| inconsistent(step_id, "image index out of range"))?,
        },
    };
    Ok(task(run, step_id, input))
}

fn recognized_text(view: &CheckpointView<'_>, step_id: StepId) -> Result<BlobRef, StepFailure> {
    match view.outcome(&step_id) {
        Some(StepOutcome::Succeeded {
            output: ActivityOutput::Recognized { text_ref },
        }) => Ok(text_ref.clone()),
        Some(other) => Err(step_failure(step_id, other)),
        None => Err(inconsistent(step_id, "joined step has no checkpoint")),
    }
}

fn entities(view: &CheckpointView<'_>, step_id: StepId) -> Result<Vec<Entity>, StepFailure> {
    match view.outcome(&step_id) {
        Some(StepOutcome::Succeeded {
            output: ActivityOutput::Entities { entities },
        }) => Ok(entities.clone()),
        Some(other) => Err(step_failure(step_id, other)),
        None => Err(inconsistent(step_id, "joined step has no checkpoint")),
    }
}

/// Failure carried by a checkpoint, or an inconsistency if the checkpoint
/// holds an output of the wrong shape.
fn step_failure(step_id: StepId, outcome: &StepOutcome) -> StepFailure {
    match outcome {
        StepOutcome::Failed { kind, message } => StepFailure {
            step_id,
            kind: *kind,
            message: message.clone(),
        },
        StepOutcome::Succeeded { output } => inconsistent(
            step_id,
            &format!("unexpected {} output", output.activity_type()),
        ),
        StepOutcome::Joined { .. } => inconsistent(step_id, "activity step recorded as a join"),
    }
}

fn inconsistent(step_id: StepId, reason: &str) -> StepFailure {
    StepFailure {
        step_id,
        kind: ErrorKind::Validation,
        message: format!("inconsistent checkpoint for {step_id}: {reason}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
