//! Label alphabets and the per-turn label sets drawn from them.
//!
//! An alphabet is the fixed, ordered list of codes a classifier may answer
//! with. Every label set is tied to the alphabet it was parsed against: it
//! only ever holds members of that alphabet, without duplicates, in the
//! alphabet's declaration order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Faults in classifier configuration, detected when a component is built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LabelConfigError {
    #[error("Label alphabet must contain at least one code")]
    EmptyAlphabet,
    #[error("Invalid label code '{0}': codes must be non-empty and alphanumeric")]
    InvalidCode(String),
    #[error("Label code '{0}' appears more than once in the alphabet")]
    DuplicateCode(String),
    #[error("Weight table references '{0}', which is not in the alphabet")]
    UnknownCode(String),
    #[error("Label code '{0}' has no weight")]
    MissingWeight(String),
    #[error("Weight for '{code}' must be a finite number, got {weight}")]
    NonFiniteWeight { code: String, weight: f64 },
    #[error("Invalid score bounds: min {min} is greater than max {max}")]
    InvertedBounds { min: f64, max: f64 },
    #[error("Score bounds must be finite, got [{min}, {max}]")]
    NonFiniteBounds { min: f64, max: f64 },
    #[error("Threshold must be a finite number, got {0}")]
    NonFiniteThreshold(f64),
    #[error("Initial score {initial} lies outside the bounds [{min}, {max}]")]
    InitialOutOfBounds { initial: f64, min: f64, max: f64 },
    #[error("max_output_tokens must be positive")]
    NonPositiveOutputBudget,
    #[error("Prompt template is missing the '{0}' placeholder")]
    MissingPlaceholder(&'static str),
    #[error("Failed to compile the reply pattern: {0}")]
    Pattern(String),
}

/// One code of an alphabet and the characterisation it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub code: String,
    pub description: String,
}

/// A fixed, ordered set of label codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAlphabet {
    entries: Vec<LabelEntry>,
}

impl LabelAlphabet {
    /// Builds an alphabet from `(code, description)` pairs in canonical order.
    ///
    /// Codes are compared case-insensitively, so `a` and `A` cannot both be
    /// members. Codes may only contain letters, digits, `_` and `-`, which
    /// keeps them distinguishable from the comma-separated reply syntax.
    pub fn new<I, C, D>(entries: I) -> Result<Self, LabelConfigError>
    where
        I: IntoIterator<Item = (C, D)>,
        C: Into<String>,
        D: Into<String>,
    {
        let mut validated: Vec<LabelEntry> = Vec::new();
        for (code, description) in entries {
            let code = code.into();
            let valid = !code.is_empty()
                && code
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(LabelConfigError::InvalidCode(code));
            }
            if validated
                .iter()
                .any(|e| e.code.eq_ignore_ascii_case(&code))
            {
                return Err(LabelConfigError::DuplicateCode(code));
            }
            validated.push(LabelEntry {
                code,
                description: description.into(),
            });
        }
        if validated.is_empty() {
            return Err(LabelConfigError::EmptyAlphabet);
        }
        Ok(Self { entries: validated })
    }

    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordinal of `code` within the alphabet, ignoring ASCII case.
    pub fn position(&self, code: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.code.eq_ignore_ascii_case(code))
    }

    /// The canonical spelling of `code`, if it is a member.
    pub fn canonical(&self, code: &str) -> Option<&str> {
        self.position(code).map(|i| self.entries[i].code.as_str())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.position(code).is_some()
    }

    /// The `"{code}) {description}"` lines shown to the agent.
    pub fn options_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}) {}", e.code, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Same shape as [`options_text`](Self::options_text), restricted to `set`.
    pub fn describe(&self, set: &LabelSet) -> String {
        self.entries
            .iter()
            .filter(|e| set.contains(&e.code))
            .map(|e| format!("{}) {}", e.code, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Builds a label set from known codes, in canonical order.
    ///
    /// Unknown codes are rejected; duplicates are collapsed. This is the
    /// constructor for sets assembled in code. Agent replies go through
    /// [`crate::parser::ReplyParser`], which is stricter about duplicates.
    pub fn label_set<I, S>(&self, codes: I) -> Result<LabelSet, LabelConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut positions = Vec::new();
        for code in codes {
            let code = code.as_ref();
            let position = self
                .position(code)
                .ok_or_else(|| LabelConfigError::UnknownCode(code.to_string()))?;
            positions.push(position);
        }
        Ok(self.set_from_positions(positions))
    }

    pub(crate) fn set_from_positions(&self, mut positions: Vec<usize>) -> LabelSet {
        positions.sort_unstable();
        positions.dedup();
        LabelSet {
            codes: positions
                .into_iter()
                .map(|i| self.entries[i].code.clone())
                .collect(),
        }
    }

    /// Checks a weight table against this alphabet: every code needs a
    /// finite weight and no weight may name a foreign code.
    pub fn validate_weights(&self, weights: &HashMap<String, f64>) -> Result<(), LabelConfigError> {
        for (code, &weight) in weights {
            match self.canonical(code) {
                Some(canonical) if canonical == code => {}
                _ => return Err(LabelConfigError::UnknownCode(code.clone())),
            }
            if !weight.is_finite() {
                return Err(LabelConfigError::NonFiniteWeight {
                    code: code.clone(),
                    weight,
                });
            }
        }
        for entry in &self.entries {
            if !weights.contains_key(&entry.code) {
                return Err(LabelConfigError::MissingWeight(entry.code.clone()));
            }
        }
        Ok(())
    }
}

/// The deduplicated, canonically ordered codes that apply to one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LabelSet {
    codes: Vec<String>,
}

impl LabelSet {
    /// The empty set, i.e. a `None` reply.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    /// The highest-ordinal code in the set.
    pub fn last(&self) -> Option<&str> {
        self.codes.last().map(String::as_str)
    }

    /// Comma-joined codes, empty for the empty set.
    pub fn joined(&self) -> String {
        self.codes.join(",")
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.codes.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", self.joined())
        }
    }
}

/// Serialized description of one label, as found in a label policy file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub code: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Serialized alphabet, optionally carrying a weight per label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphabetSpec {
    pub labels: Vec<LabelSpec>,
}

impl AlphabetSpec {
    pub fn alphabet(&self) -> Result<LabelAlphabet, LabelConfigError> {
        LabelAlphabet::new(
            self.labels
                .iter()
                .map(|l| (l.code.clone(), l.description.clone())),
        )
    }

    /// The weight table; every label must carry a weight.
    pub fn weights(&self) -> Result<HashMap<String, f64>, LabelConfigError> {
        self.labels
            .iter()
            .map(|l| {
                l.weight
                    .map(|w| (l.code.clone(), w))
                    .ok_or_else(|| LabelConfigError::MissingWeight(l.code.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> LabelAlphabet {
        LabelAlphabet::new([("A", "first"), ("B", "second"), ("C", "third")]).unwrap()
    }

    #[test]
    fn test_alphabet_rejects_bad_codes() {
        let empty: [(&str, &str); 0] = [];
        assert_eq!(
            LabelAlphabet::new(empty).unwrap_err(),
            LabelConfigError::EmptyAlphabet
        );
        assert_eq!(
            LabelAlphabet::new([("A", "x"), ("a", "y")]).unwrap_err(),
            LabelConfigError::DuplicateCode("a".into())
        );
        assert_eq!(
            LabelAlphabet::new([("A,B", "x")]).unwrap_err(),
            LabelConfigError::InvalidCode("A,B".into())
        );
        assert_eq!(
            LabelAlphabet::new([("", "x")]).unwrap_err(),
            LabelConfigError::InvalidCode(String::new())
        );
    }

    #[test]
    fn test_options_text_shape() {
        assert_eq!(abc().options_text(), "A) first\nB) second\nC) third");
    }

    #[test]
    fn test_label_set_is_canonical() {
        let alphabet = abc();
        let set = alphabet.label_set(["c", "A", "C"]).unwrap();
        assert_eq!(set.codes(), ["A", "C"]);
        assert_eq!(set.last(), Some("C"));
        assert_eq!(set.to_string(), "A,C");
        assert_eq!(LabelSet::empty().to_string(), "None");
        assert_eq!(alphabet.describe(&set), "A) first\nC) third");
    }

    #[test]
    fn test_label_set_rejects_unknown_code() {
        assert_eq!(
            abc().label_set(["D"]).unwrap_err(),
            LabelConfigError::UnknownCode("D".into())
        );
    }

    #[test]
    fn test_validate_weights() {
        let alphabet = abc();
        let mut weights: HashMap<String, f64> =
            [("A".to_string(), 1.0), ("B".to_string(), 2.0)].into();
        assert_eq!(
            alphabet.validate_weights(&weights).unwrap_err(),
            LabelConfigError::MissingWeight("C".into())
        );
        weights.insert("C".into(), -2.0);
        assert!(alphabet.validate_weights(&weights).is_ok());
        weights.insert("Z".into(), 0.5);
        assert_eq!(
            alphabet.validate_weights(&weights).unwrap_err(),
            LabelConfigError::UnknownCode("Z".into())
        );
    }

    #[test]
    fn test_validate_weights_rejects_non_finite() {
        let alphabet = abc();
        let weights: HashMap<String, f64> = [
            ("A".to_string(), f64::INFINITY),
            ("B".to_string(), 1.0),
            ("C".to_string(), -2.0),
        ]
        .into();
        assert!(matches!(
            alphabet.validate_weights(&weights),
            Err(LabelConfigError::NonFiniteWeight { code, .. }) if code == "A"
        ));
    }

    #[test]
    fn test_alphabet_spec_from_json() {
        let spec: AlphabetSpec = serde_json::from_str(
            r#"{"labels":[{"code":"A","description":"kind","weight":1.5},
                          {"code":"B","description":"rude","weight":-2}]}"#,
        )
        .unwrap();
        let alphabet = spec.alphabet().unwrap();
        let weights = spec.weights().unwrap();
        assert_eq!(alphabet.len(), 2);
        assert_eq!(weights["B"], -2.0);
    }

    #[test]
    fn test_alphabet_spec_requires_weights() {
        let spec: AlphabetSpec =
            serde_json::from_str(r#"{"labels":[{"code":"A","description":"kind"}]}"#).unwrap();
        assert_eq!(
            spec.weights().unwrap_err(),
            LabelConfigError::MissingWeight("A".into())
        );
    }
}
