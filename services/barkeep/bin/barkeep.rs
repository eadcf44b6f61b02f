//! Main Entrypoint for the Barkeep Conversation
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Loading the narrative prompts and the label policy.
//! 3. Initializing the language agent for the configured provider.
//! 4. Building the classifiers and the conversation controller.
//! 5. Talking to the traveller on the terminal until the conversation stops.

use anyhow::Context;
use barkeep_core::{
    ConversationController, ConversationOutcome, LanguageAgent, OpenAICompatibleClient, ReplyEvent,
    transcript::CsvTranscript,
};
use barkeep_service::{
    config::Config,
    console::{ConsoleActuator, StdinInput},
    prompts::{classifier_templates, conversation_script, load_label_policy, load_prompts},
};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Talk your way to the barkeep's secret.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Write a CSV transcript of the conversation to this file.
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Friendliness the traveller must reach to hear the secret.
    #[arg(long)]
    threshold: Option<f64>,

    /// Wait for whole replies instead of streaming them.
    #[arg(long)]
    no_stream: bool,
}

/// Prints replies as they arrive, one paragraph per reply.
async fn print_replies(mut rx: mpsc::Receiver<ReplyEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            ReplyEvent::Fragment(text) => print!("{text}"),
            ReplyEvent::Done => println!("\n"),
            ReplyEvent::Failed => println!(" ...\n"),
            ReplyEvent::Discarded => println!("(That reply was not kept.)\n"),
        }
        stdout.flush().ok();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(path) = args.transcript {
        config.transcript_path = Some(path);
    }
    if let Some(threshold) = args.threshold {
        config.friendliness_threshold = threshold;
    }
    if args.no_stream {
        config.stream_replies = false;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Loading prompts...");

    // --- 3. Load Prompts and Labels ---
    let prompts = load_prompts(&config.prompts_path)?;
    let script = conversation_script(&prompts)?;
    let templates = classifier_templates(&prompts);
    let policy = load_label_policy(config.labels_path.as_deref())?;

    // --- 4. Initialize the Agent ---
    info!(provider = ?config.provider, model = %config.chat_model, "Initializing language agent.");
    let agent: Arc<dyn LanguageAgent> = Arc::new(OpenAICompatibleClient::new(
        config.api_config()?,
        config.chat_model.clone(),
    ));

    // --- 5. Build the Controller ---
    let classifiers = policy
        .build(agent.clone(), &templates, config.friendliness_threshold)
        .context("Invalid label policy")?;
    let actuator = Arc::new(ConsoleActuator::new(&policy.gestures.alphabet()?));
    let (reply_tx, reply_rx) = mpsc::channel(64);

    let mut controller = ConversationController::from_classifiers(agent, script, classifiers)
        .with_actuator(actuator)
        .with_reply_sender(reply_tx)
        .with_max_turns(config.max_turns)?
        .streaming(config.stream_replies);
    if let Some(path) = &config.transcript_path {
        controller = controller.with_transcript(Box::new(CsvTranscript::create(path)?));
        info!(path = %path.display(), "Recording transcript.");
    }
    let printer = tokio::spawn(print_replies(reply_rx));

    // --- 6. Talk ---
    info!(
        threshold = config.friendliness_threshold,
        max_turns = config.max_turns,
        streaming = config.stream_replies,
        "Barkeep is ready."
    );
    if let Some(intro) = prompts.get("intro") {
        println!("{intro}\n");
    }

    let mut input = StdinInput::stdin();
    let outcome = controller.run(&mut input).await;
    let turns = controller.turns_taken();
    let score = controller.friendliness().current_score();
    drop(controller);
    printer.await.context("Reply printer failed")?;

    match outcome? {
        ConversationOutcome::Ended {
            secret_revealed: true,
        } => println!("The barkeep has trusted you with the secret. Well played!"),
        ConversationOutcome::Ended {
            secret_revealed: false,
        } => println!("The barkeep bids you farewell, the secret still kept."),
        ConversationOutcome::TurnBudgetExhausted => {
            println!("The night is over and the secret was never told.")
        }
        ConversationOutcome::InputClosed => println!("You leave the tavern."),
    }
    info!(turns, score, "Conversation finished.");
    Ok(())
}
