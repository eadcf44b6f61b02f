use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Where the user's lines come from (keyboard, speech-to-text, a script).
#[async_trait]
pub trait UtteranceSource: Send {
    /// Blocks until the next utterance is available. `None` means the input
    /// is closed and the conversation should stop.
    async fn next_utterance(&mut self) -> Result<Option<String>>;
}

/// Replays a fixed list of utterances, then reports closed input.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UtteranceSource for ScriptedInput {
    async fn next_utterance(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}
