//! Cooperative cancellation and progress reporting for one assessment run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Cancellation flag shared between the caller and a running pipeline.
///
/// Clones observe the same flag. The pipeline only reads it at stage
/// boundaries; nothing is interrupted mid-stage.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    Preprocessing,
    Segmenting,
    Recognizing,
    Verifying,
    CheckingHandwriting,
    Gating,
    Scoring,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Preprocessing => "preprocessing",
            Self::Segmenting => "segmenting",
            Self::Recognizing => "recognizing",
            Self::Verifying => "verifying",
            Self::CheckingHandwriting => "checking_handwriting",
            Self::Gating => "gating",
            Self::Scoring => "scoring",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Emitted after each checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub page_index: Option<usize>,
    /// Non-decreasing across a run, 1.0 on completion.
    pub fraction: f32,
}

/// Counts completed steps and forwards fractions to the caller's callback.
///
/// Steps: 1 load + 3 per page (preprocess, segment, recognize) + 4 global
/// (verify, handwriting, gate, score). Skipped steps are still counted when
/// the run jumps ahead, so the fraction never moves backwards.
pub(crate) struct ProgressTracker<'a> {
    callback: Option<&'a dyn Fn(ProgressEvent)>,
    total_steps: usize,
    completed: usize,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(callback: Option<&'a dyn Fn(ProgressEvent)>) -> Self {
        Self {
            callback,
            total_steps: 1,
            completed: 0,
        }
    }

    /// Fix the step count once the page count is known. Call before the first step.
    pub(crate) fn set_page_count(&mut self, pages: usize) {
        self.total_steps = (1 + 3 * pages + 4).max(self.completed);
    }

    pub(crate) fn step(&mut self, stage: Stage, page_index: Option<usize>) {
        self.advance(stage, page_index, 1);
    }

    /// Count `steps` at once (used when stages are skipped).
    pub(crate) fn advance(&mut self, stage: Stage, page_index: Option<usize>, steps: usize) {
        self.completed = (self.completed + steps).min(self.total_steps);
        self.emit(stage, page_index);
    }

    pub(crate) fn finish(&mut self, stage: Stage) {
        self.completed = self.total_steps;
        self.emit(stage, None);
    }

    fn emit(&self, stage: Stage, page_index: Option<usize>) {
        if let Some(callback) = self.callback {
            callback(ProgressEvent {
                stage,
                page_index,
                fraction: self.completed as f32 / self.total_steps as f32,
            });
        }
    }
}
