//! Built-in label policy for the tavern scenario.
//!
//! Alphabets, weights and prompt templates are plain data. A [`LabelPolicy`]
//! can be deserialized from JSON to swap in a different scoring policy
//! without touching the classifier logic.

use crate::classifier::{LabelClassifier, PromptTemplate};
use crate::friendliness::{ScoreAccumulator, ScoreBounds};
use crate::gesture::GestureDetector;
use crate::labels::{AlphabetSpec, LabelConfigError, LabelSpec};
use crate::llm_client::LanguageAgent;
use crate::stage::StageTracker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FRIENDLINESS_TEMPLATE: &str = r#"
    The following is an exchange between you and a traveller in a tavern:
    you: "{primary}"
    traveller: "{secondary}"

    Which of the following apply to what the traveller said (can be multiple or none)?
    Please answer with comma separated letters (e.g 'A,B'), or simply 'None' if none apply:
    {options}
"#;

pub const STAGE_TEMPLATE: &str = r#"
    The following is a reply from you to a traveller in a tavern:
    you: "{primary}"

    Which of the following stages does the reply belong to (can be multiple or none)?
    Please answer with comma separated stage names (e.g 'Stage1,Stage2'), or simply 'None' if none apply:
    {options}
"#;

pub const GESTURE_TEMPLATE: &str = r#"
    The following is a reply from you to a traveller in a tavern:
    you: "{primary}"

    Which of the following gestures fit while speaking the reply (can be multiple or none)?
    Please answer with comma separated letters (e.g 'A,B'), or simply 'None' if none apply:
    {options}
"#;

fn label(code: &str, description: &str, weight: Option<f64>) -> LabelSpec {
    LabelSpec {
        code: code.to_string(),
        description: description.to_string(),
        weight,
    }
}

/// How friendly the traveller's reply was, with its weight.
pub fn friendliness_alphabet() -> AlphabetSpec {
    AlphabetSpec {
        labels: vec![
            label("A", "The traveller opens with a friendly or respectful greeting", Some(0.5)),
            label("B", "The traveller speaks in a friendly or kind tone", Some(0.25)),
            label("C", "The traveller speaks in a polite tone", Some(0.25)),
            label("D", "The traveller speaks in a cold or indifferent tone", Some(-0.25)),
            label("E", "The traveller shows appreciation or thanks", Some(1.0)),
            label("F", "The traveller willingly shares personal stories, experiences or tastes", Some(1.0)),
            label("G", "The traveller asks about your stories or preferences", Some(2.0)),
            label("H", "The traveller expresses sympathy or understanding for your stories", Some(1.0)),
            label("I", "The traveller is impatient, rushes the conversation or demands information", Some(-1.0)),
            label("J", "The traveller makes dismissive, rude or disrespectful remarks", Some(-2.0)),
        ],
    }
}

/// The five narrative stages, in order. The last one ends the conversation.
pub fn stage_alphabet() -> AlphabetSpec {
    AlphabetSpec {
        labels: vec![
            label(
                "Stage1",
                "**First contact**: welcoming the traveller to sit, remarking on their \
                 appearance, asking where they come from. No castle, no treasure.",
                None,
            ),
            label(
                "Stage2",
                "**Light bonding**: why you like this tavern, favourite food and drink, \
                 small details about your own tastes.",
                None,
            ),
            label(
                "Stage3",
                "**Trading stories**: a short tale from your past adventures, asking about \
                 the traveller's own journeys, reacting with curiosity or empathy.",
                None,
            ),
            label(
                "Stage4",
                "**The castle legend**: bringing up the ancient castle, its danger and allure, \
                 asking what the traveller would do with the treasure. Nothing about the key.",
                None,
            ),
            label(
                "Stage5",
                "**The key**: revealing rumours about the castle's key, stressing the danger \
                 of the journey, deciding whether to invite the traveller, ending the conversation.",
                None,
            ),
        ],
    }
}

/// Pre-recorded motions the character can play while speaking.
pub fn gesture_alphabet() -> AlphabetSpec {
    AlphabetSpec {
        labels: vec![
            label("A", "Nod your head", None),
            label("B", "Lift one arm to your chest", None),
            label("C", "Open one arm widely", None),
            label("E", "Lift one arm to your chin, pointing to yourself", None),
            label("F", "Place a hand over your heart to show respect", None),
            label("G", "Gently tap your lips or temple to suggest secrecy", None),
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsSpec {
    pub min: f64,
    pub max: f64,
}

impl Default for BoundsSpec {
    fn default() -> Self {
        let bounds = ScoreBounds::default();
        Self {
            min: bounds.min,
            max: bounds.max,
        }
    }
}

/// Alphabets, weights and bounds for the three classifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelPolicy {
    pub friendliness: AlphabetSpec,
    #[serde(default)]
    pub score_bounds: BoundsSpec,
    pub stages: AlphabetSpec,
    pub gestures: AlphabetSpec,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            friendliness: friendliness_alphabet(),
            score_bounds: BoundsSpec::default(),
            stages: stage_alphabet(),
            gestures: gesture_alphabet(),
        }
    }
}

/// Prompt templates for the three classifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierTemplates {
    pub friendliness: String,
    pub stage: String,
    pub gesture: String,
}

impl Default for ClassifierTemplates {
    fn default() -> Self {
        Self {
            friendliness: FRIENDLINESS_TEMPLATE.to_string(),
            stage: STAGE_TEMPLATE.to_string(),
            gesture: GESTURE_TEMPLATE.to_string(),
        }
    }
}

/// The three classifier components, sharing one agent.
pub struct Classifiers {
    pub friendliness: ScoreAccumulator,
    pub stages: StageTracker,
    pub gestures: GestureDetector,
}

impl LabelPolicy {
    /// Parses a policy document. Missing score bounds default to `[-5, 5]`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Builds every classifier, validating the whole policy up front.
    pub fn build(
        &self,
        agent: Arc<dyn LanguageAgent>,
        templates: &ClassifierTemplates,
        threshold: f64,
    ) -> Result<Classifiers, LabelConfigError> {
        // Friendliness judges the traveller's answer to the barkeep's line.
        let friendliness_template = PromptTemplate::new(templates.friendliness.clone())?;
        if !friendliness_template.uses_secondary() {
            return Err(LabelConfigError::MissingPlaceholder("{secondary}"));
        }
        let friendliness_classifier = LabelClassifier::new(
            "friendliness",
            agent.clone(),
            self.friendliness.alphabet()?,
            friendliness_template,
        )?;
        let friendliness = ScoreAccumulator::new(
            friendliness_classifier,
            self.friendliness.weights()?,
            ScoreBounds::new(self.score_bounds.min, self.score_bounds.max)?,
            threshold,
        )?;

        let stages = StageTracker::new(LabelClassifier::new(
            "stage",
            agent.clone(),
            self.stages.alphabet()?,
            PromptTemplate::new(templates.stage.clone())?,
        )?);

        let gestures = GestureDetector::new(LabelClassifier::new(
            "gesture",
            agent,
            self.gestures.alphabet()?,
            PromptTemplate::new(templates.gesture.clone())?,
        )?);

        Ok(Classifiers {
            friendliness,
            stages,
            gestures,
        })
    }
}
