//! Picks the physical gestures that should accompany a line of dialogue.

use crate::classifier::{ClassificationError, LabelClassifier};
use crate::labels::LabelSet;

pub struct GestureDetector {
    classifier: LabelClassifier,
    current_gestures: LabelSet,
}

impl GestureDetector {
    pub fn new(classifier: LabelClassifier) -> Self {
        Self {
            classifier,
            current_gestures: LabelSet::empty(),
        }
    }

    /// Gestures chosen for the most recent line.
    pub fn current_gestures(&self) -> &LabelSet {
        &self.current_gestures
    }

    /// Description of a gesture code, e.g. to look up a motion file.
    pub fn describe(&self, code: &str) -> Option<&str> {
        self.classifier
            .alphabet()
            .entries()
            .iter()
            .find(|e| e.code == code)
            .map(|e| e.description.as_str())
    }

    pub async fn evaluate(&self, line: &str) -> Result<LabelSet, ClassificationError> {
        self.classifier.classify(line, None).await
    }

    pub fn commit(&mut self, gestures: LabelSet) {
        self.current_gestures = gestures;
    }

    pub async fn detect(&mut self, line: &str) -> Result<LabelSet, ClassificationError> {
        let gestures = self.evaluate(line).await?;
        self.commit(gestures.clone());
        Ok(gestures)
    }
}
