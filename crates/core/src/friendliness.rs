//! Weighted, clamped accumulation of classifier labels.
//!
//! Each scored exchange contributes the summed weights of its labels to a
//! running score that is clamped to a closed range after every update. The
//! gated behaviour unlocks while the score sits at or above the threshold.

use crate::classifier::{ClassificationError, LabelClassifier};
use crate::labels::{LabelConfigError, LabelSet};
use std::collections::HashMap;
use tracing::debug;

/// Closed range the running score is kept within.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBounds {
    pub min: f64,
    pub max: f64,
}

impl ScoreBounds {
    pub fn new(min: f64, max: f64) -> Result<Self, LabelConfigError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(LabelConfigError::NonFiniteBounds { min, max });
        }
        if min > max {
            return Err(LabelConfigError::InvertedBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self {
            min: -5.0,
            max: 5.0,
        }
    }
}

/// A classified exchange and the score change it carries, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLabels {
    pub delta: f64,
    pub labels: LabelSet,
}

/// Folds classifier output into a bounded running score.
pub struct ScoreAccumulator {
    classifier: LabelClassifier,
    weights: HashMap<String, f64>,
    bounds: ScoreBounds,
    threshold: f64,
    current_score: f64,
    scoring_history: Vec<LabelSet>,
}

impl ScoreAccumulator {
    /// Creates an accumulator starting at a score of zero.
    ///
    /// The weight table must cover exactly the classifier's alphabet. Bounds
    /// built field by field are checked again here.
    pub fn new(
        classifier: LabelClassifier,
        weights: HashMap<String, f64>,
        bounds: ScoreBounds,
        threshold: f64,
    ) -> Result<Self, LabelConfigError> {
        classifier.alphabet().validate_weights(&weights)?;
        let bounds = ScoreBounds::new(bounds.min, bounds.max)?;
        if !threshold.is_finite() {
            return Err(LabelConfigError::NonFiniteThreshold(threshold));
        }
        let accumulator = Self {
            classifier,
            weights,
            bounds,
            threshold,
            current_score: 0.0,
            scoring_history: Vec::new(),
        };
        accumulator.with_initial_score(0.0)
    }

    /// Starts from a different score, which must lie within the bounds.
    pub fn with_initial_score(mut self, initial: f64) -> Result<Self, LabelConfigError> {
        if !self.bounds.contains(initial) {
            return Err(LabelConfigError::InitialOutOfBounds {
                initial,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        self.current_score = initial;
        Ok(self)
    }

    pub fn current_score(&self) -> f64 {
        self.current_score
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn bounds(&self) -> ScoreBounds {
        self.bounds
    }

    pub fn scoring_history(&self) -> &[LabelSet] {
        &self.scoring_history
    }

    /// The label set of the most recently scored exchange.
    pub fn last_labels(&self) -> Option<&LabelSet> {
        self.scoring_history.last()
    }

    pub fn threshold_met(&self) -> bool {
        self.current_score >= self.threshold
    }

    /// The score a commit of `delta` would produce.
    pub fn projected_score(&self, delta: f64) -> f64 {
        self.bounds.clamp(self.current_score + delta)
    }

    /// Whether the threshold would be met after committing `delta`.
    pub fn threshold_met_after(&self, delta: f64) -> bool {
        self.projected_score(delta) >= self.threshold
    }

    /// Sum of the weights of `labels`.
    pub fn delta_for(&self, labels: &LabelSet) -> f64 {
        labels
            .iter()
            .map(|code| self.weights.get(code).copied().unwrap_or_default())
            .sum()
    }

    /// Classifies an exchange without touching the running state.
    pub async fn evaluate(
        &self,
        primary: &str,
        secondary: Option<&str>,
    ) -> Result<ScoredLabels, ClassificationError> {
        let labels = self.classifier.classify(primary, secondary).await?;
        let delta = self.delta_for(&labels);
        Ok(ScoredLabels { delta, labels })
    }

    /// Records an evaluated exchange and folds its delta into the score.
    pub fn commit(&mut self, scored: &ScoredLabels) {
        self.scoring_history.push(scored.labels.clone());
        self.apply_delta(scored.delta);
        debug!(
            classifier = %self.classifier.name(),
            labels = %scored.labels,
            delta = scored.delta,
            score = self.current_score,
            threshold_met = self.threshold_met(),
            "Score updated"
        );
    }

    /// Classifies an exchange and applies the result.
    pub async fn score(
        &mut self,
        primary: &str,
        secondary: Option<&str>,
    ) -> Result<ScoredLabels, ClassificationError> {
        let scored = self.evaluate(primary, secondary).await?;
        self.commit(&scored);
        Ok(scored)
    }

    fn apply_delta(&mut self, delta: f64) {
        self.current_score = self.projected_score(delta);
    }
}
