//! Domain policy interfaces (§4.8, §1 Non-goals)
//!
//! Industry-specific content — triage tables, system prompts, workflow
//! scripts — is out of scope for the core; these traits are the seam a
//! deployment plugs that content into. Everything in this module is
//! vocabulary and a trivial default, never a real policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationState;
use crate::error::Result;
use crate::language::{Dialect, Language};

/// Urgency classification a triage policy assigns to a caller's stated need
/// (§3 "Triage Result", §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Routine,
    Elevated,
    Emergency,
}

/// What the conversation engine should do next, as decided by the triage
/// policy (§4.8). The engine interprets this; it never hardcodes the
/// decision itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Continue,
    Transfer { target: String, reason: String },
    ScheduleAppointment,
    EndCall,
}

/// Result of one triage pass over the conversation so far (§3 "Triage
/// Result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub urgency: Urgency,
    pub category: Option<String>,
    pub action: Action,
    pub confidence: f32,
}

/// Supplies the system prompt for a turn, parameterised by language/dialect
/// and the running policy context (§4.8, §4.4 "prompt assembly").
#[async_trait]
pub trait SystemPromptProvider: Send + Sync {
    async fn system_prompt(
        &self,
        language: Language,
        dialect: Dialect,
        conversation: &ConversationState,
    ) -> Result<String>;
}

/// Industry-specific triage logic: turns the running conversation into an
/// urgency/category/action verdict (§4.8).
#[async_trait]
pub trait TriagePolicy: Send + Sync {
    async fn triage(&self, conversation: &ConversationState) -> Result<TriageResult>;
}

/// Classifies free text into an intent label meaningful to the deployment
/// (e.g. "book_appointment", "request_callback", "complaint"). The core only
/// carries the label through `TurnAnnotations::detected_intent`.
#[async_trait]
pub trait IntentDetector: Send + Sync {
    async fn detect(&self, text: &str, conversation: &ConversationState) -> Result<Option<String>>;
}

/// Compliance gate consulted before any turn is persisted verbatim (§1
/// Non-goals: the storage schema is out of scope, but the gate that decides
/// whether persistence is permitted is not).
#[async_trait]
pub trait ConsentGate: Send + Sync {
    async fn may_persist(&self, conversation: &ConversationState) -> Result<bool>;
}

/// Caller-facing apology spoken when a turn fails after retry/circuit-breaker
/// exhaustion, before the call returns to `LISTENING` (§5 "cancellation &
/// timeouts": "the conversation layer plays a pre-canned apology"). A
/// trivial, language-tagged default; a deployment's own policy content can
/// still override the reply text per-turn through its `SystemPromptProvider`.
pub fn apology_text(language: Language) -> &'static str {
    match language {
        Language::German => "Entschuldigung, da ist gerade etwas schiefgelaufen. Können Sie das bitte wiederholen?",
        Language::Russian => "Извините, произошла ошибка. Не могли бы вы повторить?",
        Language::Turkish => "Üzgünüm, bir sorun oluştu. Tekrar eder misiniz?",
        Language::English => "Sorry, something went wrong on my end. Could you repeat that?",
    }
}

/// Trivial always-continue triage policy, used in tests and as the default
/// when a deployment has not wired in real triage content.
pub struct NullTriagePolicy;

#[async_trait]
impl TriagePolicy for NullTriagePolicy {
    async fn triage(&self, _conversation: &ConversationState) -> Result<TriageResult> {
        Ok(TriageResult {
            urgency: Urgency::Routine,
            category: None,
            action: Action::Continue,
            confidence: 0.0,
        })
    }
}

/// Trivial system prompt provider returning a fixed, language-agnostic
/// greeting instruction. Real deployments supply their own.
pub struct NullPromptProvider;

#[async_trait]
impl SystemPromptProvider for NullPromptProvider {
    async fn system_prompt(
        &self,
        _language: Language,
        _dialect: Dialect,
        _conversation: &ConversationState,
    ) -> Result<String> {
        Ok("You are a helpful phone assistant.".to_string())
    }
}

/// Consent gate that always permits persistence, used where no compliance
/// module has been configured.
pub struct AlwaysConsent;

#[async_trait]
impl ConsentGate for AlwaysConsent {
    async fn may_persist(&self, _conversation: &ConversationState) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_triage_policy_always_continues() {
        let conv = ConversationState::new();
        let result = NullTriagePolicy.triage(&conv).await.unwrap();
        assert_eq!(result.action, Action::Continue);
        assert_eq!(result.urgency, Urgency::Routine);
    }

    #[test]
    fn urgency_orders_emergency_above_routine() {
        assert!(Urgency::Emergency > Urgency::Elevated);
        assert!(Urgency::Elevated > Urgency::Routine);
    }

    #[test]
    fn apology_text_is_localized_per_language() {
        for language in Language::all() {
            assert!(!apology_text(*language).is_empty());
        }
        assert_ne!(apology_text(Language::German), apology_text(Language::English));
    }
}
