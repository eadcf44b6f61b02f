//! Terminal stand-ins for the microphone and the robot body.

use anyhow::{Context, Result};
use async_trait::async_trait;
use barkeep_core::actuation::{Actuator, MoodIndicator};
use barkeep_core::input::UtteranceSource;
use barkeep_core::labels::LabelAlphabet;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tracing::info;

const QUIT_WORDS: [&str; 2] = ["quit", "exit"];

/// Reads one utterance per line. End of input, `quit` or `exit` close it.
pub struct LineInput<R> {
    reader: R,
}

pub type StdinInput = LineInput<BufReader<Stdin>>;

impl StdinInput {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> LineInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> UtteranceSource for LineInput<R> {
    async fn next_utterance(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read from input")?;
        if read == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if QUIT_WORDS.iter().any(|w| line.eq_ignore_ascii_case(w)) {
            return Ok(None);
        }
        Ok(Some(line.to_string()))
    }
}

/// Logs the motions and light changes a physical character would perform.
pub struct ConsoleActuator {
    gestures: HashMap<String, String>,
}

impl ConsoleActuator {
    pub fn new(gestures: &LabelAlphabet) -> Self {
        let gestures = gestures
            .entries()
            .iter()
            .map(|e| (e.code.clone(), e.description.clone()))
            .collect();
        Self { gestures }
    }
}

#[async_trait]
impl Actuator for ConsoleActuator {
    async fn perform_gesture(&self, code: &str) -> Result<()> {
        let motion = self
            .gestures
            .get(code)
            .with_context(|| format!("No motion recorded for gesture '{code}'"))?;
        info!(gesture = %code, "*{}*", motion.to_lowercase());
        Ok(())
    }

    async fn show_mood(&self, mood: MoodIndicator) -> Result<()> {
        let (r, g, b) = mood.rgb();
        info!(%mood, r, g, b, "*eyes glow {}*", mood);
        Ok(())
    }
}
