//! Parse-and-validate boundary for classifier replies.
//!
//! A classifier reply is accepted in exactly two shapes: the literal token
//! `None` (any case, optional trailing periods), or a comma-separated list of
//! alphabet codes with optional whitespace around the commas. Anything else
//! is reported as a [`ParseFailure`] carrying the raw reply, never coerced
//! into a guess.

use crate::labels::{LabelAlphabet, LabelConfigError, LabelSet};
use regex::{Regex, RegexBuilder};

/// Why a classifier reply was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("Agent reply is not 'None' or a comma-separated list of known labels: '{raw}'")]
    Malformed { raw: String },
    #[error("Agent reply lists label '{code}' more than once: '{raw}'")]
    DuplicateLabel { raw: String, code: String },
}

impl ParseFailure {
    /// The reply exactly as the agent returned it.
    pub fn raw(&self) -> &str {
        match self {
            ParseFailure::Malformed { raw } | ParseFailure::DuplicateLabel { raw, .. } => raw,
        }
    }
}

/// Validates replies against one alphabet. Patterns are compiled once.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    alphabet: LabelAlphabet,
    reply_pattern: Regex,
    code_pattern: Regex,
}

impl ReplyParser {
    pub fn new(alphabet: LabelAlphabet) -> Result<Self, LabelConfigError> {
        // Longest codes first so that e.g. `Stage10` is not read as `Stage1`.
        let mut codes: Vec<&str> = alphabet.entries().iter().map(|e| e.code.as_str()).collect();
        codes.sort_by_key(|c| std::cmp::Reverse(c.len()));
        let alternation = codes
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");

        let reply_pattern = RegexBuilder::new(&format!(
            r"^\s*(?:{alternation})(?:\s*,\s*(?:{alternation}))*\s*$"
        ))
        .case_insensitive(true)
        .build()
        .map_err(|e| LabelConfigError::Pattern(e.to_string()))?;
        let code_pattern = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()
            .map_err(|e| LabelConfigError::Pattern(e.to_string()))?;

        Ok(Self {
            alphabet,
            reply_pattern,
            code_pattern,
        })
    }

    pub fn alphabet(&self) -> &LabelAlphabet {
        &self.alphabet
    }

    /// Parses one raw agent reply into a label set.
    pub fn parse(&self, raw: &str) -> Result<LabelSet, ParseFailure> {
        let normalized = normalize(raw);

        if normalized.eq_ignore_ascii_case("none") {
            return Ok(LabelSet::empty());
        }

        if !self.reply_pattern.is_match(normalized) {
            return Err(ParseFailure::Malformed {
                raw: raw.to_string(),
            });
        }

        let mut positions: Vec<usize> = Vec::new();
        for found in self.code_pattern.find_iter(normalized) {
            let position = self
                .alphabet
                .position(found.as_str())
                .ok_or_else(|| ParseFailure::Malformed {
                    raw: raw.to_string(),
                })?;
            if positions.contains(&position) {
                return Err(ParseFailure::DuplicateLabel {
                    raw: raw.to_string(),
                    code: self.alphabet.entries()[position].code.clone(),
                });
            }
            positions.push(position);
        }

        Ok(self.alphabet.set_from_positions(positions))
    }
}

/// Strips surrounding whitespace, then trailing periods.
fn normalize(raw: &str) -> &str {
    raw.trim().trim_end_matches('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters() -> ReplyParser {
        ReplyParser::new(
            LabelAlphabet::new([("A", "one"), ("B", "two"), ("C", "three"), ("J", "ten")]).unwrap(),
        )
        .unwrap()
    }

    fn stages() -> ReplyParser {
        ReplyParser::new(
            LabelAlphabet::new((1..=5).map(|i| (format!("Stage{i}"), format!("stage {i}"))))
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_none_in_any_case_is_empty() {
        let parser = letters();
        for reply in ["None", "none", "NONE", "None.", " nOnE.. ", "\nNone\n"] {
            assert_eq!(parser.parse(reply).unwrap(), LabelSet::empty(), "{reply:?}");
        }
        assert!(stages().parse("none.").unwrap().is_empty());
    }

    #[test]
    fn test_permutations_give_the_same_sorted_set() {
        let parser = letters();
        let expected = parser.alphabet().label_set(["A", "C", "J"]).unwrap();
        for reply in ["A,C,J", "J,A,C", "c , a,j", " J ,C ,  A. ", "a,c,J"] {
            let parsed = parser.parse(reply).unwrap();
            assert_eq!(parsed, expected, "{reply:?}");
            assert_eq!(parsed.codes(), ["A", "C", "J"]);
        }
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let parser = letters();
        assert_eq!(
            parser.parse("A,A").unwrap_err(),
            ParseFailure::DuplicateLabel {
                raw: "A,A".into(),
                code: "A".into()
            }
        );
        assert!(matches!(
            parser.parse("B, c, b").unwrap_err(),
            ParseFailure::DuplicateLabel { code, .. } if code == "B"
        ));
    }

    #[test]
    fn test_malformed_replies_are_rejected() {
        let parser = letters();
        for reply in [
            "A and B",
            "",
            ".",
            "A,",
            ",A",
            "A;B",
            "D",
            "AB",
            "The answer is A",
            "A,,B",
            "'A'",
        ] {
            let err = parser.parse(reply).unwrap_err();
            assert_eq!(
                err,
                ParseFailure::Malformed {
                    raw: reply.to_string()
                },
                "{reply:?}"
            );
            assert_eq!(err.raw(), reply);
        }
    }

    #[test]
    fn test_word_codes_and_prefixes() {
        let parser = stages();
        let parsed = parser.parse("Stage3,Stage2").unwrap();
        assert_eq!(parsed.codes(), ["Stage2", "Stage3"]);
        assert_eq!(parsed.last(), Some("Stage3"));
        assert!(matches!(
            parser.parse("Stage6").unwrap_err(),
            ParseFailure::Malformed { .. }
        ));
    }

    #[test]
    fn test_longer_code_is_not_split() {
        let parser = ReplyParser::new(
            LabelAlphabet::new([("Stage1", "a"), ("Stage10", "b")]).unwrap(),
        )
        .unwrap();
        assert_eq!(parser.parse("Stage10").unwrap().codes(), ["Stage10"]);
        assert_eq!(
            parser.parse("stage10, Stage1").unwrap().codes(),
            ["Stage1", "Stage10"]
        );
    }

    #[test]
    fn test_diagnostic_quotes_raw_reply() {
        let err = letters().parse("maybe A").unwrap_err();
        assert!(err.to_string().contains("'maybe A'"));
    }
}
