//! Conversation Engine (§4.4, C4).
//!
//! Ties language detection, the LLM seam, and the audio pipeline seams
//! together into one per-call request/response cycle: transcribe, detect
//! language/dialect, assemble a dialect-aware system prompt, run triage,
//! generate a reply, synthesize it. Every external call is timed through
//! `phone_agent_core::metrics` (C7).

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;

use phone_agent_core::{
    apology_text, latency_metrics, Action, AudioFrame, ConsentGate, ConversationState, Dialect,
    IntentDetector, Language, LanguageModel, Result, SpeechToText, SystemPromptProvider, TextToSpeech,
    TriagePolicy, TriageResult, Turn, TurnAnnotations, TurnTiming, Urgency, VoiceActivityDetector,
};

use phone_agent_language::{detect_dialect, detect_language};

/// Maximum turns of history handed to the LLM per call (§4.4 "history
/// bounding", §8).
const MAX_HISTORY_TURNS: usize = 12;

/// Result of one complete conversational turn.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub text: String,
    pub audio: Vec<f32>,
    pub triage: TriageResult,
    pub language: Language,
    pub dialect: Dialect,
    pub timing: TurnTiming,
}

/// Incremental events emitted by [`ConversationEngine::process_audio_streaming`],
/// letting the telephony adapter start playback before the whole reply has
/// been generated (§8 "first-byte latency").
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PartialTranscript(String),
    FinalTranscript(String),
    AssistantTextChunk(String),
    AudioChunk(Vec<f32>),
    TurnComplete(TriageResult),
}

pub struct ConversationEngine {
    llm: Arc<dyn LanguageModel>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    vad: Arc<dyn VoiceActivityDetector>,
    prompts: Arc<dyn SystemPromptProvider>,
    triage: Arc<dyn TriagePolicy>,
    intent: Arc<dyn IntentDetector>,
    consent: Arc<dyn ConsentGate>,
    default_voice: String,
}

impl ConversationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        vad: Arc<dyn VoiceActivityDetector>,
        prompts: Arc<dyn SystemPromptProvider>,
        triage: Arc<dyn TriagePolicy>,
        intent: Arc<dyn IntentDetector>,
        consent: Arc<dyn ConsentGate>,
        default_voice: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            stt,
            tts,
            vad,
            prompts,
            triage,
            intent,
            consent,
            default_voice: default_voice.into(),
        }
    }

    pub fn start_conversation(&self) -> ConversationState {
        ConversationState::new()
    }

    /// Whether a consent-gated persistence layer may store this
    /// conversation verbatim (§1 Non-goals: the storage schema is out of
    /// scope, the gate is not).
    pub async fn may_persist(&self, conversation: &ConversationState) -> Result<bool> {
        self.consent.may_persist(conversation).await
    }

    pub fn voice_detector(&self) -> &Arc<dyn VoiceActivityDetector> {
        &self.vad
    }

    /// Whether the language model backend is reachable, for readiness
    /// probes (§6 "`/ready` reflects real backend health, not just process
    /// liveness").
    pub fn llm_available(&self) -> bool {
        self.llm.is_available()
    }

    /// Produces the opening turn for a call, spoken before the caller says
    /// anything (§4.5 `Greeting` state).
    pub async fn generate_greeting(
        &self,
        conversation: &mut ConversationState,
        language: Language,
        dialect: Dialect,
    ) -> Result<TurnOutput> {
        conversation.language = Some(language);
        conversation.dialect = dialect;

        let system_prompt = self.assemble_system_prompt(language, dialect, conversation).await?;
        let messages = conversation.history_for_llm(&system_prompt, MAX_HISTORY_TURNS);

        let _timer = latency_metrics().start("llm");
        let generation = self.llm.generate(&messages).await?;
        drop(_timer);

        conversation.append_turn(Turn::assistant(generation.text.clone()));

        let audio = self.synthesize(&generation.text, language, &self.default_voice).await?;

        Ok(TurnOutput {
            text: generation.text,
            audio,
            triage: TriageResult {
                urgency: phone_agent_core::Urgency::Routine,
                category: None,
                action: phone_agent_core::Action::Continue,
                confidence: 0.0,
            },
            language,
            dialect,
            timing: TurnTiming::default(),
        })
    }

    /// Produces the pre-canned apology turn played after a backend failure
    /// has exhausted retries, before the call returns to `Listening` (§5
    /// "cancellation & timeouts": "the conversation layer plays a pre-canned
    /// apology"). Synthesis failure here falls back to silent audio rather
    /// than propagating, since this path is already the error recovery leg.
    pub async fn recover_with_apology(
        &self,
        conversation: &mut ConversationState,
        language: Language,
    ) -> Result<TurnOutput> {
        let text = apology_text(language).to_string();
        conversation.append_turn(Turn::assistant(text.clone()));

        let voice = self.tts.default_voice(language);
        let audio = self
            .synthesize(&text, language, &voice)
            .await
            .unwrap_or_default();

        Ok(TurnOutput {
            text,
            audio,
            triage: TriageResult {
                urgency: Urgency::Routine,
                category: None,
                action: Action::Continue,
                confidence: 0.0,
            },
            language,
            dialect: conversation.dialect,
            timing: TurnTiming::default(),
        })
    }

    /// Runs one turn from a caller's spoken utterance: transcribe, detect
    /// language, reply, synthesize.
    pub async fn process_audio(
        &self,
        conversation: &mut ConversationState,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<TurnOutput> {
        let mut timing = TurnTiming::default();

        let stt_timer = latency_metrics().start("stt");
        let stt_started = std::time::Instant::now();
        let transcription = self.stt.transcribe(samples, sample_rate).await?;
        timing.stt_ms = Some(stt_started.elapsed().as_secs_f64() * 1000.0);
        drop(stt_timer);

        self.process_text_with_timing(conversation, &transcription.text, transcription.language, timing)
            .await
    }

    /// Runs one turn from already-transcribed text (e.g. a DTMF-free text
    /// channel, or a test harness bypassing audio entirely).
    pub async fn process_text(
        &self,
        conversation: &mut ConversationState,
        text: &str,
    ) -> Result<TurnOutput> {
        self.process_text_with_timing(conversation, text, None, TurnTiming::default()).await
    }

    async fn process_text_with_timing(
        &self,
        conversation: &mut ConversationState,
        text: &str,
        stt_language_hint: Option<Language>,
        mut timing: TurnTiming,
    ) -> Result<TurnOutput> {
        let (language, dialect) = self.detect_language_and_dialect(conversation, text, stt_language_hint);

        let detected_intent = self.intent.detect(text, conversation).await?;
        let mut user_turn = Turn::user(text);
        user_turn.annotations = TurnAnnotations {
            detected_intent: detected_intent.clone(),
            detected_language: Some(language),
            ..TurnAnnotations::default()
        };
        conversation.append_turn(user_turn);

        let triage = force_transfer_on_emergency(self.triage.triage(conversation).await?);
        if let Some(last) = conversation.turns.last_mut() {
            last.annotations.triage_urgency = Some(format!("{:?}", triage.urgency));
            last.annotations.triage_category = triage.category.clone();
        }

        let system_prompt = self.assemble_system_prompt(language, dialect, conversation).await?;
        let messages = conversation.history_for_llm(&system_prompt, MAX_HISTORY_TURNS);

        let llm_timer = latency_metrics().start("llm");
        let llm_started = std::time::Instant::now();
        let generation = self.llm.generate(&messages).await?;
        timing.llm_total_ms = Some(llm_started.elapsed().as_secs_f64() * 1000.0);
        drop(llm_timer);

        conversation.append_turn(Turn::assistant(generation.text.clone()));

        let voice = self.tts.default_voice(language);
        let tts_timer = latency_metrics().start("tts");
        let tts_started = std::time::Instant::now();
        let audio = self.synthesize(&generation.text, language, &voice).await?;
        timing.tts_total_ms = Some(tts_started.elapsed().as_secs_f64() * 1000.0);
        drop(tts_timer);

        timing.turn_total_ms = Some(
            timing.stt_ms.unwrap_or(0.0) + timing.llm_total_ms.unwrap_or(0.0) + timing.tts_total_ms.unwrap_or(0.0),
        );

        Ok(TurnOutput {
            text: generation.text,
            audio,
            triage,
            language,
            dialect,
            timing,
        })
    }

    /// Streams a live caller utterance through STT, then the generated reply
    /// through the LLM and TTS sentence-by-sentence, so the first audio
    /// chunk reaches the caller well before the whole reply is ready.
    pub async fn process_audio_streaming(
        &self,
        conversation: ConversationState,
        frames: BoxStream<'static, AudioFrame>,
    ) -> Result<BoxStream<'static, Result<EngineEvent>>> {
        let stt = self.stt.clone();
        let llm = self.llm.clone();
        let tts = self.tts.clone();
        let prompts = self.prompts.clone();
        let triage = self.triage.clone();
        let intent = self.intent.clone();
        let default_voice = self.default_voice.clone();

        Ok(Box::pin(async_stream::stream! {
            use futures::StreamExt;

            let mut transcripts = match stt.transcribe_stream(frames).await {
                Ok(s) => s,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut conversation = conversation;
            let mut final_text = String::new();

            while let Some(result) = transcripts.next().await {
                match result {
                    Ok(partial) if partial.is_final => {
                        final_text = partial.text.clone();
                        yield Ok(EngineEvent::FinalTranscript(partial.text));
                    }
                    Ok(partial) => yield Ok(EngineEvent::PartialTranscript(partial.text)),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if final_text.trim().is_empty() {
                return;
            }

            let language = detect_language(&final_text);
            conversation.maybe_update_language(language.language, language.confidence);
            if let Some(dialect) = detect_dialect(&final_text) {
                conversation.maybe_update_dialect(dialect.dialect, dialect.confidence, dialect.features);
            }
            let language = conversation.language.unwrap_or_default();
            let dialect = conversation.dialect;

            let detected_intent = match intent.detect(&final_text, &conversation).await {
                Ok(i) => i,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let mut user_turn = Turn::user(final_text.clone());
            user_turn.annotations.detected_intent = detected_intent;
            user_turn.annotations.detected_language = Some(language);
            conversation.append_turn(user_turn);

            let triage_result = match triage.triage(&conversation).await {
                Ok(t) => force_transfer_on_emergency(t),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let system_prompt = match prompts.system_prompt(language, dialect, &conversation).await {
                Ok(p) => p,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let messages = conversation.history_for_llm(&system_prompt, MAX_HISTORY_TURNS);

            let mut generation = match llm.generate_stream(&messages).await {
                Ok(s) => s,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut sentence_buffer = String::new();
            let mut full_reply = String::new();
            let voice = tts.default_voice(language);

            while let Some(chunk) = generation.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                sentence_buffer.push_str(&chunk.delta);
                full_reply.push_str(&chunk.delta);
                yield Ok(EngineEvent::AssistantTextChunk(chunk.delta));

                for sentence in extract_complete_sentences(&mut sentence_buffer) {
                    match tts.synthesize(&sentence, &voice, language).await {
                        Ok(audio) => yield Ok(EngineEvent::AudioChunk(audio)),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if !sentence_buffer.trim().is_empty() {
                match tts.synthesize(&sentence_buffer, &voice, language).await {
                    Ok(audio) => yield Ok(EngineEvent::AudioChunk(audio)),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let _ = full_reply;
            yield Ok(EngineEvent::TurnComplete(triage_result));
        }))
    }

    fn detect_language_and_dialect(
        &self,
        conversation: &mut ConversationState,
        text: &str,
        stt_language_hint: Option<Language>,
    ) -> (Language, Dialect) {
        let detection = detect_language(text);
        conversation.maybe_update_language(detection.language, detection.confidence);
        // An STT provider's own language tag is treated as a full-confidence
        // signal, since it came from acoustic evidence the text detector
        // never sees.
        if let Some(hint) = stt_language_hint {
            conversation.maybe_update_language(hint, 1.0);
        }
        if let Some(dialect) = detect_dialect(text) {
            conversation.maybe_update_dialect(dialect.dialect, dialect.confidence, dialect.features);
        }
        (conversation.language.unwrap_or_default(), conversation.dialect)
    }

    /// Builds the system prompt for one turn: the policy-supplied content
    /// plus a thin dialect-awareness instruction this engine owns directly,
    /// since dialect phrasing is a conversational-mechanics concern, not
    /// domain content (§4.4 "prompt assembly").
    async fn assemble_system_prompt(
        &self,
        language: Language,
        dialect: Dialect,
        conversation: &ConversationState,
    ) -> Result<String> {
        let base = self.prompts.system_prompt(language, dialect, conversation).await?;
        if dialect == Dialect::Standard {
            return Ok(base);
        }
        Ok(format!(
            "{base}\n\nThe caller speaks the {} variety of German; prefer its characteristic phrasing where natural, but stay intelligible to a standard-German speaker.",
            dialect.tag().replace('_', " ")
        ))
    }

    async fn synthesize(&self, text: &str, language: Language, voice: &str) -> Result<Vec<f32>> {
        self.tts.synthesize(text, voice, language).await
    }
}

/// An `Urgency::Emergency` triage always routes to a human, regardless of
/// whether the policy's own action heuristic already decided to transfer
/// (§4.8: urgency is the engine's own backstop, not the policy's).
fn force_transfer_on_emergency(mut triage: TriageResult) -> TriageResult {
    if triage.urgency == Urgency::Emergency && !matches!(triage.action, Action::Transfer { .. }) {
        triage.action = Action::Transfer {
            target: "emergency".to_string(),
            reason: "emergency urgency detected".to_string(),
        };
    }
    triage
}

/// Minimum sentence length (in characters) a cut point must produce to be
/// emitted (spec §4.4 "Sentence extraction": `len(sentence) ≥ 5`). Shorter
/// candidates are rejected and folded into the next cut instead, so a
/// one-word affirmative like "Ja." never ships on its own.
const MIN_SENTENCE_LEN: usize = 5;

/// Splits `buffer` at each complete sentence boundary (`.`, `!`, `?`
/// followed by whitespace or end-of-input), returning the completed
/// sentences and leaving any trailing partial sentence in `buffer` for the
/// next chunk.
fn extract_complete_sentences(buffer: &mut String) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last_cut = 0;
    let chars: Vec<(usize, char)> = buffer.char_indices().collect();

    for i in 0..chars.len() {
        let (byte_idx, ch) = chars[i];
        if matches!(ch, '.' | '!' | '?') {
            let next_is_boundary = chars
                .get(i + 1)
                .map(|(_, c)| c.is_whitespace())
                .unwrap_or(true);
            if next_is_boundary {
                let end = byte_idx + ch.len_utf8();
                let sentence = buffer[last_cut..end].trim().to_string();
                if sentence.chars().count() < MIN_SENTENCE_LEN {
                    continue;
                }
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                last_cut = end;
            }
        }
    }

    *buffer = buffer[last_cut..].to_string();
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_one_sentence_and_keeps_remainder() {
        let mut buffer = "Guten Tag. Wie kann ich".to_string();
        let sentences = extract_complete_sentences(&mut buffer);
        assert_eq!(sentences, vec!["Guten Tag.".to_string()]);
        assert_eq!(buffer, " Wie kann ich");
    }

    #[test]
    fn extracts_multiple_sentences_in_one_pass() {
        let mut buffer = "Hallo! Wie geht es Ihnen? Gut,".to_string();
        let sentences = extract_complete_sentences(&mut buffer);
        assert_eq!(sentences, vec!["Hallo!".to_string(), "Wie geht es Ihnen?".to_string()]);
        assert_eq!(buffer, " Gut,");
    }

    #[test]
    fn a_sub_five_character_candidate_is_not_emitted_as_a_standalone_sentence() {
        let mut buffer = "Ja. Wie kann ich helfen?".to_string();
        let sentences = extract_complete_sentences(&mut buffer);
        assert_eq!(sentences, vec!["Ja. Wie kann ich helfen?".to_string()]);
        assert_eq!(buffer, "");
    }

    #[test]
    fn no_terminator_leaves_buffer_untouched() {
        let mut buffer = "Einen Moment bitte".to_string();
        let sentences = extract_complete_sentences(&mut buffer);
        assert!(sentences.is_empty());
        assert_eq!(buffer, "Einen Moment bitte");
    }

    #[test]
    fn emergency_urgency_forces_a_transfer_even_if_the_policy_said_continue() {
        let triage = force_transfer_on_emergency(TriageResult {
            urgency: Urgency::Emergency,
            category: Some("medical".to_string()),
            action: Action::Continue,
            confidence: 0.8,
        });
        assert!(matches!(triage.action, Action::Transfer { .. }));
    }

    #[test]
    fn non_emergency_urgency_leaves_the_policy_action_untouched() {
        let triage = force_transfer_on_emergency(TriageResult {
            urgency: Urgency::Routine,
            category: None,
            action: Action::Continue,
            confidence: 0.9,
        });
        assert_eq!(triage.action, Action::Continue);
    }

    #[test]
    fn emergency_urgency_keeps_the_policys_own_transfer_target() {
        let triage = force_transfer_on_emergency(TriageResult {
            urgency: Urgency::Emergency,
            category: Some("medical".to_string()),
            action: Action::Transfer { target: "poison-control".to_string(), reason: "caller named a specific hotline".to_string() },
            confidence: 0.95,
        });
        assert_eq!(
            triage.action,
            Action::Transfer { target: "poison-control".to_string(), reason: "caller named a specific hotline".to_string() }
        );
    }
}
