pub mod actuation;
pub mod classifier;
pub mod controller;
pub mod friendliness;
pub mod gesture;
pub mod input;
pub mod labels;
pub mod llm_client;
pub mod messages;
pub mod parser;
pub mod presets;
pub mod stage;
pub mod transcript;

pub use controller::{
    ConversationController, ConversationOutcome, ConversationPhase, ConversationScript,
    ReplyEvent, RevealDecision, TurnReport,
};
pub use labels::{LabelAlphabet, LabelSet};
pub use llm_client::{LanguageAgent, OpenAICompatibleClient};
