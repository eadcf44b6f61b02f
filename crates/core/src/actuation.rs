//! Side effects issued once a reply is final: gestures and the mood light.
//!
//! Effects are fire-and-forget from the conversation's point of view. They
//! run concurrently, their results are never read back, and a failing
//! effect is logged without failing the turn.

use crate::labels::LabelSet;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Indicator colour derived from the accumulated friendliness score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoodIndicator {
    Red,
    Amber,
    White,
    Green,
    BrightGreen,
}

impl MoodIndicator {
    /// Lower bounds of each colour, checked against the whole-number part
    /// of the score. The highest bound reached wins.
    const LOWER_BOUNDS: [(f64, MoodIndicator); 5] = [
        (f64::NEG_INFINITY, MoodIndicator::Red),
        (-2.5, MoodIndicator::Amber),
        (-0.5, MoodIndicator::White),
        (0.5, MoodIndicator::Green),
        (5.0, MoodIndicator::BrightGreen),
    ];

    pub fn from_score(score: f64) -> Self {
        let whole = score.trunc();
        Self::LOWER_BOUNDS
            .iter()
            .rev()
            .find(|(bound, _)| whole >= *bound)
            .map(|(_, mood)| *mood)
            .unwrap_or(MoodIndicator::Red)
    }

    /// RGB intensities in `0.0..=1.0`.
    pub fn rgb(&self) -> (f32, f32, f32) {
        match self {
            MoodIndicator::Red => (1.0, 0.0, 0.0),
            MoodIndicator::Amber => (1.0, 0.75, 0.0),
            MoodIndicator::White => (1.0, 1.0, 1.0),
            MoodIndicator::Green => (0.0, 0.5, 0.0),
            MoodIndicator::BrightGreen => (0.2, 0.8, 0.2),
        }
    }
}

impl fmt::Display for MoodIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoodIndicator::Red => "RED",
            MoodIndicator::Amber => "AMBER",
            MoodIndicator::White => "WHITE",
            MoodIndicator::Green => "GREEN",
            MoodIndicator::BrightGreen => "BRIGHT-GREEN",
        };
        write!(f, "{name}")
    }
}

/// The body that acts out a reply.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Plays the gesture with the given code.
    async fn perform_gesture(&self, code: &str) -> Result<()>;

    /// Changes the mood indicator.
    async fn show_mood(&self, mood: MoodIndicator) -> Result<()>;
}

/// Issues every gesture and the mood change concurrently and waits for all
/// of them. Failures are logged, never returned.
pub async fn dispatch_effects(actuator: Arc<dyn Actuator>, gestures: &LabelSet, mood: MoodIndicator) {
    let gesture_runs = gestures.iter().map(|code| {
        let actuator = actuator.clone();
        async move {
            if let Err(e) = actuator.perform_gesture(code).await {
                warn!(gesture = %code, error = ?e, "Gesture failed");
            }
        }
    });
    let mood_run = async {
        if let Err(e) = actuator.show_mood(mood).await {
            warn!(%mood, error = ?e, "Mood indicator update failed");
        }
    };

    futures::join!(join_all(gesture_runs), mood_run);
}
