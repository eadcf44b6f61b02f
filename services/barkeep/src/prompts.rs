//! Narrative configuration loaded from the prompts directory.
//!
//! Every `*.md` file is keyed by its file stem. The conversation script
//! files are required; classifier templates fall back to the built-in ones.

use anyhow::{Context, Result};
use barkeep_core::controller::ConversationScript;
use barkeep_core::presets::{ClassifierTemplates, LabelPolicy};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Loads every Markdown prompt in `prompts_path`, keyed by file stem.
pub fn load_prompts(prompts_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts directory {}", prompts_path.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt {}", path.display()))?;
            prompts.insert(prompt_key, content.trim().to_string());
        }
    }
    Ok(prompts)
}

fn required(prompts: &HashMap<String, String>, key: &str) -> Result<String> {
    prompts
        .get(key)
        .cloned()
        .with_context(|| format!("{key}.md not found in prompts directory"))
}

/// Builds the conversation script. `speech_style.md` is optional.
pub fn conversation_script(prompts: &HashMap<String, String>) -> Result<ConversationScript> {
    Ok(ConversationScript {
        persona: required(prompts, "persona")?,
        opening_line: required(prompts, "opening_line")?,
        reveal_denied: required(prompts, "reveal_denied")?,
        reveal_granted: required(prompts, "reveal_granted")?,
        secret: required(prompts, "secret")?,
        speech_directive: prompts.get("speech_style").cloned(),
    })
}

/// Classifier templates, each overridable by its own prompt file.
pub fn classifier_templates(prompts: &HashMap<String, String>) -> ClassifierTemplates {
    let defaults = ClassifierTemplates::default();
    let pick = |key: &str, fallback: String| prompts.get(key).cloned().unwrap_or(fallback);
    ClassifierTemplates {
        friendliness: pick("friendliness_classifier", defaults.friendliness),
        stage: pick("stage_classifier", defaults.stage),
        gesture: pick("gesture_classifier", defaults.gesture),
    }
}

/// Reads a JSON label policy, or the built-in one when no path is given.
pub fn load_label_policy(path: Option<&Path>) -> Result<LabelPolicy> {
    let Some(path) = path else {
        return Ok(LabelPolicy::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read label policy {}", path.display()))?;
    LabelPolicy::from_json(&raw)
        .with_context(|| format!("Failed to parse label policy {}", path.display()))
}
