//! Conversation state and turns (§3 "Conversation State", "Turn")

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::language::{Dialect, Language};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// Structured annotations a turn may carry, populated by policy modules the
/// core merely forwards (§4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnAnnotations {
    pub triage_urgency: Option<String>,
    pub triage_category: Option<String>,
    pub detected_intent: Option<String>,
    pub detected_language: Option<Language>,
}

/// One message in the conversation. Immutable once appended (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub annotations: TurnAnnotations,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
            timestamp: Utc::now(),
            annotations: TurnAnnotations::default(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            annotations: TurnAnnotations::default(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            annotations: TurnAnnotations::default(),
        }
    }

    pub fn with_annotations(mut self, annotations: TurnAnnotations) -> Self {
        self.annotations = annotations;
        self
    }
}

/// A plain role/content message as handed to the LLM (§4.2 `messages`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: TurnRole,
    pub content: String,
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        Message {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// Confidence threshold below which a new language/dialect detection may not
/// override the previously detected one (§3 invariant, §4.4).
pub const DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// One per active call (§3). Append-only turn sequence plus the running
/// per-domain policy context bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: Uuid,
    pub turns: Vec<Turn>,
    pub language: Option<Language>,
    pub language_confidence: f32,
    pub dialect: Dialect,
    pub dialect_confidence: f32,
    pub dialect_features: Vec<String>,
    /// Opaque per-domain bag: patient id, job id, slot, triage result, ...
    pub policy_context: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
            language: None,
            language_confidence: 0.0,
            dialect: Dialect::Standard,
            dialect_confidence: 0.0,
            dialect_features: Vec::new(),
            policy_context: HashMap::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Append-only; turns are strictly ordered (§3 invariant, §8 property).
    pub fn append_turn(&mut self, turn: Turn) {
        self.last_activity_at = turn.timestamp;
        self.turns.push(turn);
    }

    /// Update the detected language, honoring the "only overrides when new
    /// confidence exceeds both the threshold and the prior confidence"
    /// invariant of §3/§4.4.
    pub fn maybe_update_language(&mut self, detected: Language, confidence: f32) -> bool {
        let should_update = confidence >= DETECTION_CONFIDENCE_THRESHOLD
            && confidence > self.language_confidence;
        if should_update {
            self.language = Some(detected);
            self.language_confidence = confidence;
        }
        should_update
    }

    /// Same rule as `maybe_update_language`, applied to dialect.
    pub fn maybe_update_dialect(
        &mut self,
        detected: Dialect,
        confidence: f32,
        features: Vec<String>,
    ) -> bool {
        let should_update = confidence >= DETECTION_CONFIDENCE_THRESHOLD
            && confidence > self.dialect_confidence;
        if should_update {
            self.dialect = detected;
            self.dialect_confidence = confidence;
            self.dialect_features = features;
        }
        should_update
    }

    /// Last `max_turns` turns as role/content messages, always preceded by a
    /// fresh SYSTEM message (§4.4 "History management", §8 "History bounding").
    pub fn history_for_llm(&self, system_prompt: &str, max_turns: usize) -> Vec<Message> {
        let mut messages = Vec::with_capacity(max_turns + 1);
        messages.push(Message {
            role: TurnRole::System,
            content: system_prompt.to_string(),
        });
        let start = self.turns.len().saturating_sub(max_turns);
        messages.extend(self.turns[start..].iter().map(Message::from));
        messages
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}
