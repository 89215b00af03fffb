//! Binds one call's state machine to its conversation engine session.
//!
//! Per §5 "ordering guarantees": the conversation is behind a `tokio::Mutex`
//! so the engine never issues a second LLM call for the same call before the
//! previous one has returned or failed, regardless of how many bridge/
//! softswitch/webhook tasks touch this handler concurrently.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use phone_agent_agent::{CallFsm, ConversationEngine, TurnOutput};
use phone_agent_core::{CallContext, CallEvent, CallState, ConversationState, StateTransitionRecord};
use phone_agent_persistence::{
    Actor, AuditLog, AuditOutcome, PersistenceLayer, TimingRepository, TranscriptRepository,
    TransitionRepository,
};

use crate::error::ServerError;

pub struct CallHandler {
    fsm: CallFsm,
    engine: Arc<ConversationEngine>,
    conversation: tokio::sync::Mutex<ConversationState>,
    persistence: Option<Arc<PersistenceLayer>>,
    turn_index: AtomicI32,
}

impl CallHandler {
    pub fn new(
        call_id: impl Into<String>,
        caller_id: impl Into<String>,
        callee_id: impl Into<String>,
        engine: Arc<ConversationEngine>,
    ) -> Self {
        let conversation = engine.start_conversation();
        Self {
            fsm: CallFsm::new(call_id, caller_id, callee_id),
            engine,
            conversation: tokio::sync::Mutex::new(conversation),
            persistence: None,
            turn_index: AtomicI32::new(0),
        }
    }

    /// Attaches the persistence layer this call's transcripts, timings,
    /// transitions and audit events are written through (§"Persisted state
    /// (core-visible)"). Left unset in tests and in deployments that haven't
    /// configured a backend; every write site below is a no-op without it.
    pub fn with_persistence(mut self, persistence: Option<Arc<PersistenceLayer>>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn state(&self) -> CallState {
        self.fsm.state()
    }

    pub fn context(&self) -> CallContext {
        self.fsm.context()
    }

    pub fn transitions(&self) -> Vec<StateTransitionRecord> {
        self.fsm.transitions()
    }

    pub async fn conversation_snapshot(&self) -> ConversationState {
        self.conversation.lock().await.clone()
    }

    /// Moves `Idle` to `Ringing`. Every backend calls this once, immediately
    /// after normalising its own inbound event into `IncomingCall`.
    pub fn accept(&self) -> Result<CallState, ServerError> {
        Ok(self.fsm.apply(CallEvent::IncomingCall)?)
    }

    /// Moves `Ringing`/`Idle` to `Greeting` and speaks the opening turn.
    pub async fn answer(&self) -> Result<TurnOutput, ServerError> {
        self.fsm.apply(CallEvent::CallAnswered)?;

        let mut conversation = self.conversation.lock().await;
        let language = conversation.language.unwrap_or_default();
        let dialect = conversation.dialect;
        let output = self.engine.generate_greeting(&mut conversation, language, dialect).await?;
        drop(conversation);

        self.fsm.apply(CallEvent::GreetingComplete)?;
        Ok(output)
    }

    pub fn on_speech_detected(&self) -> Result<CallState, ServerError> {
        Ok(self.fsm.apply(CallEvent::SpeechDetected)?)
    }

    /// A complete utterance arrived from the audio pipeline; runs one full
    /// transcribe → triage → generate → synthesize turn. A backend failure
    /// does not propagate: the FSM is told via `CallEvent::Error` (§4.5
    /// `Processing + Error -> Speaking`) and the turn returned is the
    /// pre-canned apology instead of the normal reply, so one provider
    /// hiccup never drops the call.
    pub async fn on_utterance(&self, samples: &[f32], sample_rate: u32) -> Result<TurnOutput, ServerError> {
        self.fsm.apply(CallEvent::UtteranceComplete)?;

        let mut conversation = self.conversation.lock().await;
        let turns_before = conversation.turns.len();
        match self.engine.process_audio(&mut conversation, samples, sample_rate).await {
            Ok(output) => {
                self.persist_new_turns(&conversation, turns_before, &output.timing).await;
                drop(conversation);
                self.fsm.apply(CallEvent::ResponseReady)?;
                Ok(output)
            }
            Err(err) => {
                tracing::warn!(error = %err, "turn failed, falling back to apology");
                let language = conversation.language.unwrap_or_default();
                let output = self.engine.recover_with_apology(&mut conversation, language).await?;
                self.persist_new_turns(&conversation, turns_before, &output.timing).await;
                drop(conversation);
                self.fsm.apply(CallEvent::Error { reason: err.to_string() })?;
                self.audit(
                    "turn_failed",
                    "call",
                    AuditOutcome::Failure,
                    Some(err.to_string()),
                )
                .await;
                Ok(output)
            }
        }
    }

    /// Appends every turn `process_audio`/`recover_with_apology` added since
    /// `turns_before` to the transcript repository and records the turn's
    /// timing rollup (§"Persisted state (core-visible)"). A no-op when no
    /// persistence layer is attached.
    async fn persist_new_turns(
        &self,
        conversation: &ConversationState,
        turns_before: usize,
        timing: &phone_agent_core::TurnTiming,
    ) {
        let Some(persistence) = &self.persistence else { return };
        let call_id = self.fsm.context().call_id;

        for turn in &conversation.turns[turns_before..] {
            let turn_index = self.turn_index.fetch_add(1, Ordering::SeqCst);
            if let Err(err) = persistence.transcripts.append(&call_id, turn_index, turn).await {
                tracing::warn!(error = %err, %call_id, "failed to persist transcript turn");
            }
        }

        let turn_index = self.turn_index.load(Ordering::SeqCst);
        if let Err(err) = persistence.timings.record(&call_id, turn_index, timing).await {
            tracing::warn!(error = %err, %call_id, "failed to persist turn timing");
        }
    }

    /// Best-effort audit write; a failure here never fails the call.
    async fn audit(&self, action: &str, resource_type: &str, outcome: AuditOutcome, details: Option<String>) {
        let Some(persistence) = &self.persistence else { return };
        let call_id = self.fsm.context().call_id;
        if let Err(err) = persistence
            .audit
            .record(&call_id, Actor::agent(), action, resource_type, &call_id, outcome, details)
            .await
        {
            tracing::warn!(error = %err, %call_id, "failed to record audit entry");
        }
    }

    pub fn on_playback_complete(&self) -> Result<CallState, ServerError> {
        Ok(self.fsm.apply(CallEvent::PlaybackComplete)?)
    }

    pub fn on_timeout(&self) -> Result<CallState, ServerError> {
        Ok(self.fsm.apply(CallEvent::Timeout)?)
    }

    pub fn on_transfer_requested(&self, target: String) -> Result<CallState, ServerError> {
        Ok(self.fsm.apply(CallEvent::TransferRequested { target })?)
    }

    pub fn on_transfer_complete(&self) -> Result<CallState, ServerError> {
        Ok(self.fsm.apply(CallEvent::TransferComplete)?)
    }

    /// Drives the call to `Ended` and, if a persistence layer is attached,
    /// flushes the full transition history and an audit entry for the
    /// hangup (§"Persisted state (core-visible)").
    pub async fn on_hangup(&self) -> Result<CallState, ServerError> {
        let state = self.fsm.apply(CallEvent::Hangup)?;
        self.persist_transitions().await;
        self.audit("call_ended", "call", AuditOutcome::Success, None).await;
        Ok(state)
    }

    /// Writes every transition recorded by the FSM so far that hasn't
    /// already been persisted. A no-op when no persistence layer is
    /// attached.
    async fn persist_transitions(&self) {
        let Some(persistence) = &self.persistence else { return };
        for transition in self.fsm.transitions() {
            if let Err(err) = persistence.transitions.record(&transition).await {
                tracing::warn!(error = %err, call_id = %transition.call_id, "failed to persist call transition");
            }
        }
    }

    pub fn on_error(&self, reason: String) -> Result<CallState, ServerError> {
        Ok(self.fsm.apply(CallEvent::Error { reason })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phone_agent_core::{
        AlwaysConsent, FinishReason, GenerationChunk, GenerationResult, IntentDetector, Language,
        LanguageModel, Message, NullPromptProvider, NullTriagePolicy, Result, SpeechToText, TextToSpeech,
        TranscriptionResult, VadEvent, VadState, VoiceActivityDetector,
    };
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct FixedLlm;
    #[async_trait]
    impl LanguageModel for FixedLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult> {
            Ok(GenerationResult {
                text: "Guten Tag, wie kann ich helfen?".to_string(),
                finish_reason: FinishReason::Stop,
                prompt_tokens: 1,
                completion_tokens: 1,
            })
        }
        async fn generate_stream(&self, _messages: &[Message]) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
            unimplemented!()
        }
        fn is_available(&self) -> bool {
            true
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingLlm;
    #[async_trait]
    impl LanguageModel for FailingLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult> {
            Err(phone_agent_core::Error::Provider("llm backend unreachable".to_string()))
        }
        async fn generate_stream(&self, _messages: &[Message]) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
            unimplemented!()
        }
        fn is_available(&self) -> bool {
            false
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    struct FixedStt;
    #[async_trait]
    impl SpeechToText for FixedStt {
        async fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<TranscriptionResult> {
            Ok(TranscriptionResult { text: "Hallo".to_string(), language: None, confidence: 0.9, is_final: true })
        }
        async fn transcribe_stream(
            &self,
            _frames: BoxStream<'static, phone_agent_core::AudioFrame>,
        ) -> Result<BoxStream<'static, Result<TranscriptionResult>>> {
            unimplemented!()
        }
        fn supported_languages(&self) -> Vec<Language> {
            vec![Language::German]
        }
        fn model_name(&self) -> &str {
            "fixed-stt"
        }
    }

    struct FixedTts;
    #[async_trait]
    impl TextToSpeech for FixedTts {
        async fn synthesize(&self, _text: &str, _voice: &str, _language: Language) -> Result<Vec<f32>> {
            Ok(vec![0.0; 16])
        }
        async fn synthesize_stream(
            &self,
            _text: &str,
            _voice: &str,
            _language: Language,
        ) -> Result<BoxStream<'static, Result<Vec<f32>>>> {
            unimplemented!()
        }
        fn available_voices(&self, _language: Language) -> Vec<String> {
            vec!["voice-1".to_string()]
        }
        fn model_name(&self) -> &str {
            "fixed-tts"
        }
    }

    struct FixedVad;
    #[async_trait]
    impl VoiceActivityDetector for FixedVad {
        async fn detect(&self, _frame: &phone_agent_core::AudioFrame) -> Result<VadEvent> {
            Ok(VadEvent::Silence)
        }
        fn speech_probability(&self, _frame: &phone_agent_core::AudioFrame) -> f32 {
            0.0
        }
        async fn process_stream(
            &self,
            _frames: BoxStream<'static, phone_agent_core::AudioFrame>,
        ) -> Result<BoxStream<'static, Result<VadEvent>>> {
            unimplemented!()
        }
        fn reset(&self) {}
        fn current_state(&self) -> VadState {
            VadState::Idle
        }
        fn model_info(&self) -> &str {
            "fixed-vad"
        }
        fn is_neural(&self) -> bool {
            false
        }
    }

    struct FixedIntent;
    #[async_trait]
    impl IntentDetector for FixedIntent {
        async fn detect(
            &self,
            _text: &str,
            _conversation: &phone_agent_core::ConversationState,
        ) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn engine() -> Arc<ConversationEngine> {
        engine_with_llm(Arc::new(FixedLlm))
    }

    fn engine_with_llm(llm: Arc<dyn LanguageModel>) -> Arc<ConversationEngine> {
        Arc::new(ConversationEngine::new(
            llm,
            Arc::new(FixedStt),
            Arc::new(FixedTts),
            Arc::new(FixedVad),
            Arc::new(NullPromptProvider),
            Arc::new(NullTriagePolicy),
            Arc::new(FixedIntent),
            Arc::new(AlwaysConsent),
            "voice-1",
        ))
    }

    #[tokio::test]
    async fn answer_moves_through_greeting_into_listening() {
        let handler = CallHandler::new("call-1", "+49123", "+49456", engine());
        handler.accept().unwrap();
        let output = handler.answer().await.unwrap();
        assert!(!output.text.is_empty());
        assert_eq!(handler.state(), CallState::Listening);
    }

    #[tokio::test]
    async fn utterance_runs_full_turn_and_returns_to_processing_then_speaking() {
        let handler = CallHandler::new("call-1", "+49123", "+49456", engine());
        handler.accept().unwrap();
        handler.answer().await.unwrap();
        let output = handler.on_utterance(&[0.0; 160], 16_000).await.unwrap();
        assert!(!output.text.is_empty());
        assert_eq!(handler.state(), CallState::Speaking);
    }

    #[tokio::test]
    async fn a_failing_backend_yields_an_apology_turn_instead_of_an_error() {
        let handler = CallHandler::new("call-1", "+49123", "+49456", engine_with_llm(Arc::new(FailingLlm)));
        handler.accept().unwrap();
        handler.fsm.apply(CallEvent::CallAnswered).unwrap();
        handler.fsm.apply(CallEvent::GreetingComplete).unwrap();

        let output = handler.on_utterance(&[0.0; 160], 16_000).await.unwrap();
        assert!(!output.text.is_empty());
        assert_eq!(handler.state(), CallState::Speaking);
        assert_eq!(handler.context().error_reason.as_deref(), Some("provider error: llm backend unreachable"));
    }
}
