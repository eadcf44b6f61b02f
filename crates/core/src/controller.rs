//! The bounded conversation loop.
//!
//! A controller owns one conversation: the persistent turn history, the
//! friendliness accumulator, the stage tracker and the optional gesture
//! detector. Every turn is evaluated in full before any of that state is
//! touched, so a failed turn can simply be retried.
//!
//! Replies are forwarded to the reply channel while they are generated, ahead
//! of gesture detection. A reply can therefore be shown for a turn that then
//! fails and is not committed; the channel reports that with
//! [`ReplyEvent::Discarded`].

use crate::actuation::{Actuator, MoodIndicator, dispatch_effects};
use crate::friendliness::{ScoreAccumulator, ScoredLabels};
use crate::gesture::GestureDetector;
use crate::input::UtteranceSource;
use crate::labels::LabelSet;
use crate::llm_client::LanguageAgent;
use crate::messages::{ChatMessage, TurnHistory};
use crate::presets::Classifiers;
use crate::stage::{Stage, StageDisplay, StageTracker};
use crate::transcript::{TranscriptEntry, TranscriptSink};
use anyhow::{Context, Result, bail, ensure};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{Instrument, info, info_span, warn};

pub const DEFAULT_MAX_TURNS: usize = 100;

/// The narrative text a conversation is driven by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationScript {
    /// System directive describing the character.
    pub persona: String,
    /// The user line the conversation is seeded with.
    pub opening_line: String,
    /// Directive for ending without giving the secret away.
    pub reveal_denied: String,
    /// Directive for ending and giving the secret away.
    pub reveal_granted: String,
    /// Payload appended to the granting directive.
    pub secret: String,
    /// Appended to every generation call, never persisted.
    pub speech_directive: Option<String>,
}

impl ConversationScript {
    pub fn directive(&self, decision: RevealDecision) -> String {
        match decision {
            RevealDecision::Withhold => self.reveal_denied.clone(),
            RevealDecision::Reveal if self.secret.is_empty() => self.reveal_granted.clone(),
            RevealDecision::Reveal => format!("{}\n{}", self.reveal_granted, self.secret),
        }
    }
}

/// Live view of a reply as it is generated.
///
/// Every reply ends with exactly one `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// The next piece of reply text. A non-streamed reply arrives whole.
    Fragment(String),
    /// The reply is complete.
    Done,
    /// Generation broke off. The fragments since the last `Done` are partial.
    Failed,
    /// The last completed reply belongs to a turn that failed afterwards and
    /// was not kept in the history.
    Discarded,
}

/// What the character was told to do once the terminal stage came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealDecision {
    Withhold,
    Reveal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    NotStarted,
    InProgress,
    Ended,
    TurnBudgetExhausted,
    InputClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationOutcome {
    /// The terminal stage was reached.
    Ended { secret_revealed: bool },
    /// The turn budget ran out before the terminal stage.
    TurnBudgetExhausted,
    /// The utterance source closed first.
    InputClosed,
}

/// Everything one committed turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turn: usize,
    pub reply: String,
    pub friendliness: ScoredLabels,
    pub score: f64,
    pub threshold_met: bool,
    pub stage: Option<Stage>,
    pub gestures: LabelSet,
    pub mood: MoodIndicator,
    pub reveal: Option<RevealDecision>,
    pub latency: Duration,
    pub finished: bool,
}

pub struct ConversationController {
    agent: Arc<dyn LanguageAgent>,
    script: ConversationScript,
    friendliness: ScoreAccumulator,
    stages: StageTracker,
    gestures: Option<GestureDetector>,
    actuator: Option<Arc<dyn Actuator>>,
    transcript: Option<Box<dyn TranscriptSink>>,
    reply_tx: Option<mpsc::Sender<ReplyEvent>>,
    max_turns: usize,
    stream_replies: bool,
    history: TurnHistory,
    phase: ConversationPhase,
    last_reply: String,
    turns_taken: usize,
    reveal: Option<RevealDecision>,
}

impl ConversationController {
    pub fn new(
        agent: Arc<dyn LanguageAgent>,
        script: ConversationScript,
        friendliness: ScoreAccumulator,
        stages: StageTracker,
    ) -> Self {
        Self {
            agent,
            script,
            friendliness,
            stages,
            gestures: None,
            actuator: None,
            transcript: None,
            reply_tx: None,
            max_turns: DEFAULT_MAX_TURNS,
            stream_replies: false,
            history: TurnHistory::new(),
            phase: ConversationPhase::NotStarted,
            last_reply: String::new(),
            turns_taken: 0,
            reveal: None,
        }
    }

    /// Builds a controller from a full classifier set, gestures included.
    pub fn from_classifiers(
        agent: Arc<dyn LanguageAgent>,
        script: ConversationScript,
        classifiers: Classifiers,
    ) -> Self {
        Self::new(agent, script, classifiers.friendliness, classifiers.stages)
            .with_gestures(classifiers.gestures)
    }

    pub fn with_gestures(mut self, gestures: GestureDetector) -> Self {
        self.gestures = Some(gestures);
        self
    }

    pub fn with_actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn with_transcript(mut self, transcript: Box<dyn TranscriptSink>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Forwards every reply to `tx` as it is generated.
    pub fn with_reply_sender(mut self, tx: mpsc::Sender<ReplyEvent>) -> Self {
        self.reply_tx = Some(tx);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Result<Self> {
        ensure!(max_turns > 0, "max_turns must be positive");
        self.max_turns = max_turns;
        Ok(self)
    }

    /// Generate replies with `ask_stream` instead of `ask`.
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.stream_replies = enabled;
        self
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn history(&self) -> &TurnHistory {
        &self.history
    }

    pub fn friendliness(&self) -> &ScoreAccumulator {
        &self.friendliness
    }

    pub fn stages(&self) -> &StageTracker {
        &self.stages
    }

    pub fn gestures(&self) -> Option<&GestureDetector> {
        self.gestures.as_ref()
    }

    pub fn turns_taken(&self) -> usize {
        self.turns_taken
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn last_reply(&self) -> &str {
        &self.last_reply
    }

    /// The outcome, once the conversation has stopped.
    pub fn outcome(&self) -> Option<ConversationOutcome> {
        match self.phase {
            ConversationPhase::NotStarted | ConversationPhase::InProgress => None,
            ConversationPhase::Ended => Some(ConversationOutcome::Ended {
                secret_revealed: self.reveal == Some(RevealDecision::Reveal),
            }),
            ConversationPhase::TurnBudgetExhausted => Some(ConversationOutcome::TurnBudgetExhausted),
            ConversationPhase::InputClosed => Some(ConversationOutcome::InputClosed),
        }
    }

    /// Seeds the history and produces the character's opening line.
    pub async fn open(&mut self) -> Result<String> {
        ensure!(
            self.phase == ConversationPhase::NotStarted,
            "Conversation already started ({:?})",
            self.phase
        );

        let mut history = TurnHistory::new();
        history.push(ChatMessage::system(self.script.persona.clone()));
        history.push(ChatMessage::user(self.script.opening_line.clone()));
        let prompt = history.compose(self.speech_directive());

        let reply = self
            .generate(prompt)
            .await
            .context("Failed to generate the opening line")?;
        let gestures = self.evaluate_gestures(&reply).await?;

        history.push(ChatMessage::assistant(reply.clone()));
        self.history = history;
        self.last_reply = reply.clone();
        if let Some(detector) = self.gestures.as_mut() {
            detector.commit(gestures.clone());
        }
        self.phase = ConversationPhase::InProgress;
        info!(max_turns = self.max_turns, "Conversation opened");

        let mood = MoodIndicator::from_score(self.friendliness.current_score());
        self.dispatch(&gestures, mood).await;
        self.record(TranscriptEntry {
            user_text: self.script.opening_line.clone(),
            assistant_text: reply.clone(),
            friendliness_labels: None,
            response_latency: None,
        });
        Ok(reply)
    }

    /// Runs one full turn for `user_text`.
    ///
    /// Nothing is committed unless every classifier and the reply call
    /// succeed.
    pub async fn take_turn(&mut self, user_text: &str) -> Result<TurnReport> {
        if self.phase != ConversationPhase::InProgress {
            bail!("Cannot take a turn while the conversation is {:?}", self.phase);
        }
        let turn = self.turns_taken + 1;
        let span = info_span!("turn", turn);
        self.run_turn(turn, user_text).instrument(span).await
    }

    /// Opens the conversation if needed, then takes turns until it stops.
    pub async fn run(&mut self, input: &mut dyn UtteranceSource) -> Result<ConversationOutcome> {
        if self.phase == ConversationPhase::NotStarted {
            self.open().await?;
        }
        while self.phase == ConversationPhase::InProgress {
            let Some(line) = input
                .next_utterance()
                .await
                .context("Failed to read the next utterance")?
            else {
                info!(turns = self.turns_taken, "Input closed");
                self.phase = ConversationPhase::InputClosed;
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.take_turn(line).await?;
        }
        self.outcome()
            .context("Conversation stopped without an outcome")
    }

    async fn run_turn(&mut self, turn: usize, user_text: &str) -> Result<TurnReport> {
        let scored = self
            .friendliness
            .evaluate(&self.last_reply, Some(user_text))
            .await
            .context("Friendliness scoring failed")?;
        let stage_labels = self
            .stages
            .evaluate(&self.last_reply)
            .await
            .context("Stage detection failed")?;
        let stage = self.stages.resolve(&stage_labels);
        let terminal = self.stages.is_terminal(stage.as_ref());

        let threshold_met = self.friendliness.threshold_met_after(scored.delta);
        let reveal = terminal.then_some(if threshold_met {
            RevealDecision::Reveal
        } else {
            RevealDecision::Withhold
        });

        let mut tail = Vec::new();
        if let Some(decision) = reveal {
            tail.push(ChatMessage::system(self.script.directive(decision)));
        }
        tail.push(ChatMessage::user(user_text));
        tail.extend(self.speech_directive());
        let prompt = self.history.compose(tail);

        let started = Instant::now();
        let reply = self.generate(prompt).await.context("Failed to generate reply")?;
        let latency = started.elapsed();
        let gestures = self.evaluate_gestures(&reply).await?;

        self.friendliness.commit(&scored);
        self.stages.commit(stage_labels);
        if let Some(detector) = self.gestures.as_mut() {
            detector.commit(gestures.clone());
        }
        self.history.push(ChatMessage::user(user_text));
        self.history.push(ChatMessage::assistant(reply.clone()));
        self.last_reply = reply.clone();
        self.turns_taken = turn;

        if terminal {
            self.reveal = reveal;
            self.phase = ConversationPhase::Ended;
        } else if self.turns_taken >= self.max_turns {
            self.phase = ConversationPhase::TurnBudgetExhausted;
        }
        let finished = self.phase != ConversationPhase::InProgress;

        let score = self.friendliness.current_score();
        let mood = MoodIndicator::from_score(score);
        info!(
            labels = %scored.labels,
            delta = scored.delta,
            score,
            stage = %StageDisplay(stage.as_ref()),
            gestures = %gestures,
            latency_ms = latency.as_millis() as u64,
            finished,
            "Turn complete"
        );
        if let Some(decision) = reveal {
            info!(?decision, threshold_met, "Terminal stage reached");
        } else if finished {
            warn!(max_turns = self.max_turns, "Turn budget exhausted");
        }

        self.dispatch(&gestures, mood).await;
        self.record(TranscriptEntry {
            user_text: user_text.to_string(),
            assistant_text: reply.clone(),
            friendliness_labels: Some(scored.labels.clone()),
            response_latency: Some(latency),
        });

        Ok(TurnReport {
            turn,
            reply,
            friendliness: scored,
            score,
            threshold_met: self.friendliness.threshold_met(),
            stage,
            gestures,
            mood,
            reveal,
            latency,
            finished,
        })
    }

    fn speech_directive(&self) -> Option<ChatMessage> {
        self.script
            .speech_directive
            .as_ref()
            .map(|directive| ChatMessage::system(directive.clone()))
    }

    async fn generate(&self, prompt: Vec<ChatMessage>) -> Result<String> {
        match self.produce_reply(prompt).await {
            Ok(reply) => {
                self.forward(ReplyEvent::Done).await;
                Ok(reply)
            }
            Err(e) => {
                self.forward(ReplyEvent::Failed).await;
                Err(e)
            }
        }
    }

    async fn produce_reply(&self, prompt: Vec<ChatMessage>) -> Result<String> {
        let reply = if self.stream_replies {
            let mut stream = self.agent.ask_stream(prompt, None).await?;
            let mut reply = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                reply.push_str(&chunk);
                self.forward(ReplyEvent::Fragment(chunk)).await;
            }
            reply
        } else {
            let reply = self.agent.ask(prompt, None).await?;
            self.forward(ReplyEvent::Fragment(reply.clone())).await;
            reply
        };
        Ok(reply)
    }

    async fn forward(&self, event: ReplyEvent) {
        if let Some(tx) = &self.reply_tx
            && tx.send(event).await.is_err()
        {
            warn!("Reply receiver dropped");
        }
    }

    /// Runs after `reply` has been shown, so a failure discards it.
    async fn evaluate_gestures(&self, reply: &str) -> Result<LabelSet> {
        let Some(detector) = &self.gestures else {
            return Ok(LabelSet::empty());
        };
        match detector.evaluate(reply).await {
            Ok(gestures) => Ok(gestures),
            Err(e) => {
                self.forward(ReplyEvent::Discarded).await;
                Err(e).context("Gesture detection failed")
            }
        }
    }

    async fn dispatch(&self, gestures: &LabelSet, mood: MoodIndicator) {
        if let Some(actuator) = &self.actuator {
            dispatch_effects(actuator.clone(), gestures, mood).await;
        }
    }

    fn record(&mut self, entry: TranscriptEntry) {
        if let Some(sink) = self.transcript.as_mut() {
            if let Err(e) = sink.record(&entry) {
                warn!(error = ?e, "Failed to record transcript entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{LabelClassifier, PromptTemplate};
    use crate::friendliness::ScoreBounds;
    use crate::input::ScriptedInput;
    use crate::labels::LabelAlphabet;
    use crate::llm_client::{MockLanguageAgent, ScriptedAgent, TextStream};
    use crate::messages::Role;
    use futures::stream;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const DENIED: &str = "End the conversation. Keep the secret.";
    const GRANTED: &str = "End the conversation and share the secret.";
    const SECRET: &str = "Seek the oldest elm.";
    const STYLE: &str = "Use short sentences.";

    fn script() -> ConversationScript {
        ConversationScript {
            persona: "You are a barkeep.".into(),
            opening_line: "Greet the traveller.".into(),
            reveal_denied: DENIED.into(),
            reveal_granted: GRANTED.into(),
            secret: SECRET.into(),
            speech_directive: Some(STYLE.into()),
        }
    }

    fn classifier(name: &str, agent: Arc<dyn LanguageAgent>, codes: &[&str]) -> LabelClassifier {
        let alphabet = LabelAlphabet::new(codes.iter().map(|c| (*c, "label"))).unwrap();
        let template = PromptTemplate::new(format!("{name}: {{primary}} | {{secondary}}\n{{options}}")).unwrap();
        LabelClassifier::new(name, agent, alphabet, template).unwrap()
    }

    fn controller(agent: Arc<ScriptedAgent>, threshold: f64) -> ConversationController {
        controller_for(agent, threshold)
    }

    fn controller_for(agent: Arc<dyn LanguageAgent>, threshold: f64) -> ConversationController {
        let weights: HashMap<String, f64> =
            [("A", 1.0), ("B", 2.0), ("C", -2.0)].map(|(c, w)| (c.to_string(), w)).into();
        let friendliness = ScoreAccumulator::new(
            classifier("friendliness", agent.clone(), &["A", "B", "C"]),
            weights,
            ScoreBounds::default(),
            threshold,
        )
        .unwrap();
        let stages = StageTracker::new(classifier("stage", agent.clone(), &["Stage1", "Stage2", "Stage3"]));
        let gestures = GestureDetector::new(classifier("gesture", agent.clone(), &["N", "W"]));
        ConversationController::new(agent, script(), friendliness, stages).with_gestures(gestures)
    }

    #[derive(Default)]
    struct MemoryTranscript(Arc<Mutex<Vec<TranscriptEntry>>>);

    impl TranscriptSink for MemoryTranscript {
        fn record(&mut self, entry: &TranscriptEntry) -> Result<()> {
            self.0.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_open_seeds_history() {
        let agent = Arc::new(ScriptedAgent::new(["Welcome, stranger.", "N"]));
        let mut controller = controller(agent.clone(), 3.0);

        let reply = controller.open().await.unwrap();
        assert_eq!(reply, "Welcome, stranger.");
        assert_eq!(controller.phase(), ConversationPhase::InProgress);
        assert_eq!(controller.gestures().unwrap().current_gestures().codes(), ["N"]);

        let roles: Vec<Role> = controller.history().messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant]);
        assert!(!controller.history().contains_content(STYLE));

        let greeting_prompt = &agent.received()[0];
        assert_eq!(greeting_prompt.last().unwrap(), &ChatMessage::system(STYLE));
        assert!(controller.open().await.is_err());
    }

    #[tokio::test]
    async fn test_turn_before_open_is_rejected() {
        let agent = Arc::new(ScriptedAgent::default());
        let mut controller = controller(agent, 3.0);
        assert!(controller.take_turn("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_regular_turn_commits_everything() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome.", "None", // greeting, gestures
            "A,B", "Stage1", "Where from?", "W", // turn 1
        ]));
        let mut controller = controller(agent.clone(), 5.0);
        controller.open().await.unwrap();

        let report = controller.take_turn("Thanks, friend!").await.unwrap();
        assert_eq!(report.turn, 1);
        assert_eq!(report.reply, "Where from?");
        assert_eq!(report.friendliness.delta, 3.0);
        assert_eq!(report.score, 3.0);
        assert!(!report.threshold_met);
        assert_eq!(report.stage.as_ref().map(|s| s.code.as_str()), Some("Stage1"));
        assert_eq!(report.gestures.codes(), ["W"]);
        assert_eq!(report.mood, MoodIndicator::Green);
        assert_eq!(report.reveal, None);
        assert!(!report.finished);

        assert_eq!(controller.turns_taken(), 1);
        assert_eq!(controller.last_reply(), "Where from?");
        assert_eq!(controller.history().len(), 5);

        let prompts = agent.received();
        // friendliness sees the previous reply and the user line
        assert!(prompts[2][0].content.contains("Welcome. | Thanks, friend!"));
        // stage sees only the previous reply
        assert!(prompts[3][0].content.starts_with("stage: Welcome. |"));
        let reply_prompt = &prompts[4];
        assert_eq!(reply_prompt.len(), 5);
        assert_eq!(reply_prompt[3], ChatMessage::user("Thanks, friend!"));
        assert_eq!(reply_prompt[4], ChatMessage::system(STYLE));
    }

    #[tokio::test]
    async fn test_terminal_turn_reveals_when_threshold_met() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome.", "None",
            "A,B", "Stage3", "Here is the secret.", "N",
        ]));
        let mut controller = controller(agent.clone(), 3.0);
        controller.open().await.unwrap();

        let report = controller.take_turn("Tell me more").await.unwrap();
        assert_eq!(report.reveal, Some(RevealDecision::Reveal));
        assert!(report.finished);
        assert_eq!(controller.phase(), ConversationPhase::Ended);
        assert_eq!(
            controller.outcome(),
            Some(ConversationOutcome::Ended { secret_revealed: true })
        );

        let reply_prompt = &agent.received()[4];
        let granted = format!("{GRANTED}\n{SECRET}");
        assert_eq!(reply_prompt[3], ChatMessage::system(granted.clone()));
        assert_eq!(reply_prompt[4], ChatMessage::user("Tell me more"));

        let history = controller.history();
        assert!(!history.contains_content(&granted));
        assert!(!history.contains_content(STYLE));
        assert!(history.contains_content("Tell me more"));
        assert!(history.contains_content("Here is the secret."));
        assert!(controller.take_turn("Another?").await.is_err());
    }

    #[tokio::test]
    async fn test_terminal_turn_withholds_below_threshold() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome.", "None",
            "C", "Stage2,stage3", "Off with you.", "None",
        ]));
        let mut controller = controller(agent.clone(), 3.0);
        controller.open().await.unwrap();

        let report = controller.take_turn("Just tell me").await.unwrap();
        assert_eq!(report.reveal, Some(RevealDecision::Withhold));
        assert_eq!(report.score, -2.0);
        assert_eq!(report.mood, MoodIndicator::Amber);
        assert_eq!(agent.received()[4][3], ChatMessage::system(DENIED));
        assert!(!controller.history().contains_content(DENIED));
        assert_eq!(
            controller.outcome(),
            Some(ConversationOutcome::Ended { secret_revealed: false })
        );
    }

    #[tokio::test]
    async fn test_failed_turn_commits_nothing() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome.", "None",
            "A", "Stage1 and Stage2", // malformed stage reply
            "A", "Stage1", "Where from?", "None", // retry
        ]));
        let mut controller = controller(agent.clone(), 5.0);
        controller.open().await.unwrap();

        let err = controller.take_turn("Hi").await.unwrap_err();
        assert!(format!("{err:#}").contains("Stage1 and Stage2"));
        assert_eq!(controller.friendliness().current_score(), 0.0);
        assert!(controller.friendliness().scoring_history().is_empty());
        assert!(controller.stages().current_stage().is_none());
        assert_eq!(controller.history().len(), 3);
        assert_eq!(controller.turns_taken(), 0);
        assert_eq!(controller.phase(), ConversationPhase::InProgress);

        let report = controller.take_turn("Hi").await.unwrap();
        assert_eq!(report.turn, 1);
        assert_eq!(report.score, 1.0);
    }

    #[tokio::test]
    async fn test_turn_budget_exhaustion() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome.", "None",
            "A", "Stage1", "Hm.", "None",
            "A", "None", "Hm?", "None",
        ]));
        let mut controller = controller(agent, 5.0).with_max_turns(2).unwrap();
        let mut input = ScriptedInput::new(["one", "", "two", "three"]);

        let outcome = controller.run(&mut input).await.unwrap();
        assert_eq!(outcome, ConversationOutcome::TurnBudgetExhausted);
        assert_eq!(controller.turns_taken(), 2);
        assert_eq!(controller.friendliness().current_score(), 2.0);
    }

    #[tokio::test]
    async fn test_zero_turn_budget_is_rejected() {
        let agent = Arc::new(ScriptedAgent::default());
        assert!(controller(agent, 5.0).with_max_turns(0).is_err());
    }

    #[tokio::test]
    async fn test_input_closed() {
        let agent = Arc::new(ScriptedAgent::new(["Welcome.", "None", "None", "None", "Bye.", "None"]));
        let mut controller = controller(agent, 5.0);
        let mut input = ScriptedInput::new(["hello"]);

        let outcome = controller.run(&mut input).await.unwrap();
        assert_eq!(outcome, ConversationOutcome::InputClosed);
        assert_eq!(controller.turns_taken(), 1);
    }

    #[tokio::test]
    async fn test_streamed_reply_is_forwarded() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome in.", "None",
            "None", "None", "Pull up a stool.", "None",
        ]));
        let (tx, mut rx) = mpsc::channel(32);
        let mut controller = controller(agent, 5.0).streaming(true).with_reply_sender(tx);

        controller.open().await.unwrap();
        let report = controller.take_turn("Evening").await.unwrap();
        assert_eq!(report.reply, "Pull up a stool.");

        drop(controller);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let fragment = |s: &str| ReplyEvent::Fragment(s.to_string());
        assert_eq!(
            events,
            [
                fragment("Welcome "),
                fragment("in."),
                ReplyEvent::Done,
                fragment("Pull "),
                fragment("up "),
                fragment("a "),
                fragment("stool."),
                ReplyEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_whole_reply_is_forwarded_without_streaming() {
        let agent = Arc::new(ScriptedAgent::new(["Welcome in.", "None"]));
        let (tx, mut rx) = mpsc::channel(4);
        let mut controller = controller(agent, 5.0).with_reply_sender(tx);

        controller.open().await.unwrap();
        assert_eq!(rx.recv().await, Some(ReplyEvent::Fragment("Welcome in.".into())));
        assert_eq!(rx.recv().await, Some(ReplyEvent::Done));
    }

    async fn drain(mut rx: mpsc::Receiver<ReplyEvent>) -> Vec<ReplyEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_broken_stream_ends_the_reply_with_failed() {
        let mut agent = MockLanguageAgent::new();
        agent.expect_ask_stream().times(1).returning(|_, _| {
            let broken: TextStream = Box::pin(stream::iter(vec![
                Ok("Welcome ".to_string()),
                Err(anyhow::anyhow!("connection reset")),
            ]));
            Ok(broken)
        });
        agent.expect_ask().never();
        let (tx, rx) = mpsc::channel(8);
        let mut controller = controller_for(Arc::new(agent), 5.0)
            .streaming(true)
            .with_reply_sender(tx);

        let err = controller.open().await.unwrap_err();
        assert!(format!("{err:#}").contains("connection reset"));
        assert_eq!(controller.phase(), ConversationPhase::NotStarted);
        assert!(controller.history().is_empty());

        drop(controller);
        assert_eq!(
            drain(rx).await,
            [ReplyEvent::Fragment("Welcome ".into()), ReplyEvent::Failed]
        );
    }

    #[tokio::test]
    async fn test_shown_reply_is_discarded_when_gestures_fail() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome.", "None",
            "A", "Stage1", "Where from?", "N or W", // malformed gesture reply
        ]));
        let (tx, rx) = mpsc::channel(8);
        let mut controller = controller(agent, 5.0).with_reply_sender(tx);
        controller.open().await.unwrap();

        let err = controller.take_turn("Evening").await.unwrap_err();
        assert!(format!("{err:#}").contains("Gesture detection failed"));
        assert_eq!(controller.history().len(), 3);
        assert_eq!(controller.turns_taken(), 0);
        assert_eq!(controller.friendliness().current_score(), 0.0);

        drop(controller);
        assert_eq!(
            drain(rx).await,
            [
                ReplyEvent::Fragment("Welcome.".into()),
                ReplyEvent::Done,
                ReplyEvent::Fragment("Where from?".into()),
                ReplyEvent::Done,
                ReplyEvent::Discarded,
            ]
        );
    }

    #[tokio::test]
    async fn test_transcript_rows() {
        let agent = Arc::new(ScriptedAgent::new([
            "Welcome.", "None",
            "B", "Stage1", "Where from?", "None",
        ]));
        let rows = Arc::new(Mutex::new(Vec::new()));
        let mut controller =
            controller(agent, 5.0).with_transcript(Box::new(MemoryTranscript(rows.clone())));

        controller.open().await.unwrap();
        controller.take_turn("Good evening").await.unwrap();

        let rows = rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_text, "Greet the traveller.");
        assert_eq!(rows[0].friendliness_labels, None);
        assert_eq!(rows[1].assistant_text, "Where from?");
        assert_eq!(rows[1].friendliness_labels.as_ref().map(LabelSet::joined).as_deref(), Some("B"));
        assert!(rows[1].response_latency.is_some());
    }
}
