//! The generic label-classification protocol.
//!
//! A [`LabelClassifier`] asks the language agent which labels of its alphabet
//! apply to a piece of dialogue, with a small output budget, and validates the
//! reply through a [`ReplyParser`]. The friendliness scorer, the stage tracker
//! and the gesture detector are all built on it.

use crate::labels::{LabelAlphabet, LabelConfigError, LabelSet};
use crate::llm_client::LanguageAgent;
use crate::messages::ChatMessage;
use crate::parser::{ParseFailure, ReplyParser};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Output budget for classification calls, in tokens.
pub const DEFAULT_CLASSIFIER_MAX_TOKENS: u32 = 16;

const OPTIONS: &str = "{options}";
const PRIMARY: &str = "{primary}";
const SECONDARY: &str = "{secondary}";

/// Failure of a single classification call.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    /// The reply was malformed or listed a label twice.
    #[error(transparent)]
    Reply(#[from] ParseFailure),
    /// The agent itself failed; passed through unchanged.
    #[error(transparent)]
    Agent(#[from] anyhow::Error),
}

impl ClassificationError {
    /// The offending raw reply, for reply failures.
    pub fn raw_reply(&self) -> Option<&str> {
        match self {
            ClassificationError::Reply(failure) => Some(failure.raw()),
            ClassificationError::Agent(_) => None,
        }
    }
}

/// Classification prompt with `{options}`, `{primary}` and, for classifiers
/// that look at an exchange, `{secondary}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, LabelConfigError> {
        let template = template.into();
        for placeholder in [OPTIONS, PRIMARY] {
            if !template.contains(placeholder) {
                return Err(LabelConfigError::MissingPlaceholder(placeholder));
            }
        }
        Ok(Self { template })
    }

    /// Whether the template embeds a second utterance.
    pub fn uses_secondary(&self) -> bool {
        self.template.contains(SECONDARY)
    }

    /// Fills the template in a single pass, so placeholder-like text inside
    /// the utterances is left alone. Each template line is trimmed so
    /// templates may be written as indented strings.
    pub fn render(&self, options: &str, primary: &str, secondary: Option<&str>) -> String {
        let stripped = self
            .template
            .lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n");
        let values = [
            (OPTIONS, options),
            (PRIMARY, primary),
            (SECONDARY, secondary.unwrap_or_default()),
        ];

        let mut out = String::with_capacity(stripped.len() + options.len() + primary.len());
        let mut rest = stripped.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match values.iter().find(|(p, _)| tail.starts_with(p)) {
                Some((placeholder, value)) => {
                    out.push_str(value);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// One instance of the classification protocol, bound to an alphabet.
pub struct LabelClassifier {
    name: String,
    agent: Arc<dyn LanguageAgent>,
    parser: ReplyParser,
    template: PromptTemplate,
    max_output_tokens: u32,
}

impl fmt::Debug for LabelClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelClassifier")
            .field("name", &self.name)
            .field("parser", &self.parser)
            .field("template", &self.template)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish_non_exhaustive()
    }
}

impl LabelClassifier {
    /// Creates a classifier. `name` only appears in logs.
    pub fn new(
        name: impl Into<String>,
        agent: Arc<dyn LanguageAgent>,
        alphabet: LabelAlphabet,
        template: PromptTemplate,
    ) -> Result<Self, LabelConfigError> {
        Ok(Self {
            name: name.into(),
            agent,
            parser: ReplyParser::new(alphabet)?,
            template,
            max_output_tokens: DEFAULT_CLASSIFIER_MAX_TOKENS,
        })
    }

    /// Overrides the output budget for classification calls.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Result<Self, LabelConfigError> {
        if max_output_tokens == 0 {
            return Err(LabelConfigError::NonPositiveOutputBudget);
        }
        self.max_output_tokens = max_output_tokens;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alphabet(&self) -> &LabelAlphabet {
        self.parser.alphabet()
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    /// The exact prompt sent for this input.
    pub fn build_prompt(&self, primary: &str, secondary: Option<&str>) -> String {
        self.template
            .render(&self.alphabet().options_text(), primary, secondary)
    }

    /// Classifies one utterance (optionally with the utterance it answers).
    pub async fn classify(
        &self,
        primary: &str,
        secondary: Option<&str>,
    ) -> Result<LabelSet, ClassificationError> {
        let prompt = self.build_prompt(primary, secondary);
        let reply = self
            .agent
            .ask(vec![ChatMessage::user(prompt)], Some(self.max_output_tokens))
            .await?;

        let labels = self.parser.parse(&reply)?;
        debug!(
            classifier = %self.name,
            reply = %reply,
            labels = %labels,
            "Classification reply accepted:\n{}",
            self.alphabet().describe(&labels)
        );
        Ok(labels)
    }
}
