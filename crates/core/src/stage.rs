//! Narrative stage tracking.
//!
//! Stages are not accumulated. Every detection replaces the current stage
//! with the highest-ordinal stage present in that reply, or with no stage
//! when the reply is `None`. Moving back to an earlier stage is allowed.

use crate::classifier::{ClassificationError, LabelClassifier};
use crate::labels::{LabelConfigError, LabelSet};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// One point in the ordered narrative progression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Stage {
    /// Zero-based position in the stage alphabet.
    pub ordinal: usize,
    pub code: String,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// Display helper for an optional stage.
pub struct StageDisplay<'a>(pub Option<&'a Stage>);

impl fmt::Display for StageDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(stage) => write!(f, "{stage}"),
            None => write!(f, "no stage"),
        }
    }
}

pub struct StageTracker {
    classifier: LabelClassifier,
    terminal: usize,
    current_stage: Option<Stage>,
    stage_history: Vec<LabelSet>,
}

impl StageTracker {
    /// The last stage of the alphabet is terminal.
    pub fn new(classifier: LabelClassifier) -> Self {
        let terminal = classifier.alphabet().len().saturating_sub(1);
        Self {
            classifier,
            terminal,
            current_stage: None,
            stage_history: Vec::new(),
        }
    }

    /// Marks another stage as the one that ends the conversation.
    pub fn with_terminal_stage(mut self, code: &str) -> Result<Self, LabelConfigError> {
        self.terminal = self
            .classifier
            .alphabet()
            .position(code)
            .ok_or_else(|| LabelConfigError::UnknownCode(code.to_string()))?;
        Ok(self)
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        self.current_stage.as_ref()
    }

    /// Every detection result so far, for inspection only.
    pub fn stage_history(&self) -> &[LabelSet] {
        &self.stage_history
    }

    pub fn terminal_stage(&self) -> Stage {
        self.stage_at(self.terminal)
    }

    pub fn is_terminal(&self, stage: Option<&Stage>) -> bool {
        stage.is_some_and(|s| s.ordinal == self.terminal)
    }

    /// The stage a label set resolves to: its highest-ordinal member.
    pub fn resolve(&self, labels: &LabelSet) -> Option<Stage> {
        let code = labels.last()?;
        let ordinal = self.classifier.alphabet().position(code)?;
        Some(self.stage_at(ordinal))
    }

    /// Classifies an utterance without replacing the current stage.
    pub async fn evaluate(&self, utterance: &str) -> Result<LabelSet, ClassificationError> {
        self.classifier.classify(utterance, None).await
    }

    /// Replaces the current stage with the one `labels` resolves to.
    pub fn commit(&mut self, labels: LabelSet) -> Option<&Stage> {
        self.current_stage = self.resolve(&labels);
        debug!(
            labels = %labels,
            stage = %StageDisplay(self.current_stage.as_ref()),
            "Stage detected"
        );
        self.stage_history.push(labels);
        self.current_stage.as_ref()
    }

    /// Classifies an utterance and makes the result the current stage.
    pub async fn detect(&mut self, utterance: &str) -> Result<Option<Stage>, ClassificationError> {
        let labels = self.evaluate(utterance).await?;
        Ok(self.commit(labels).cloned())
    }

    fn stage_at(&self, ordinal: usize) -> Stage {
        Stage {
            ordinal,
            code: self.classifier.alphabet().entries()[ordinal].code.clone(),
        }
    }
}
