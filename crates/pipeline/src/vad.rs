//! Voice activity detection (§4.3 "Audio Pipeline" / C3).
//!
//! Two implementations of `phone_agent_core::VoiceActivityDetector`:
//! [`SimpleVad`] (energy/RMS threshold, no model, always available) and,
//! behind the `neural` feature, [`NeuralVad`] (ONNX Silero-style speech
//! probability model). Both share the same frame-debounce state machine in
//! [`advance`], which turns a raw per-frame speech probability into the
//! `VadEvent`/`VadState` vocabulary core defines.

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;

use phone_agent_core::{AudioFrame, Result, VadConfig, VadEvent, VadState, VoiceActivityDetector};

/// Debounced state shared by both VAD implementations.
struct DebounceState {
    state: VadState,
    speech_run_ms: u32,
    silence_run_ms: u32,
}

impl DebounceState {
    fn new() -> Self {
        Self {
            state: VadState::Idle,
            speech_run_ms: 0,
            silence_run_ms: 0,
        }
    }
}

/// Advances the debounce state machine by one frame of duration `frame_ms`
/// given a raw `probability` in `[0, 1]`, returning the event to surface.
///
/// `min_speech_duration_ms` / `min_silence_duration_ms` gate the
/// `PendingSpeech`/`PendingSilence` holds before a transition is confirmed,
/// so a single noisy frame doesn't flip state. Pre/post padding (`VadConfig`)
/// is applied downstream when an utterance's sample window is extracted, not
/// at this per-frame layer.
fn advance(state: &mut DebounceState, config: &VadConfig, frame_ms: u32, probability: f32) -> VadEvent {
    let is_speech = probability >= config.threshold;
    match (state.state, is_speech) {
        (VadState::Idle, true) => {
            state.state = VadState::PendingSpeech;
            state.speech_run_ms = frame_ms;
            VadEvent::Silence
        }
        (VadState::Idle, false) => VadEvent::Silence,
        (VadState::PendingSpeech, true) => {
            state.speech_run_ms += frame_ms;
            if state.speech_run_ms >= config.min_speech_duration_ms {
                state.state = VadState::InSpeech;
                state.silence_run_ms = 0;
                VadEvent::SpeechStart
            } else {
                VadEvent::Silence
            }
        }
        (VadState::PendingSpeech, false) => {
            state.state = VadState::Idle;
            state.speech_run_ms = 0;
            VadEvent::Silence
        }
        (VadState::InSpeech, true) => {
            state.silence_run_ms = 0;
            VadEvent::SpeechContinue { probability }
        }
        (VadState::InSpeech, false) => {
            state.state = VadState::PendingSilence;
            state.silence_run_ms = frame_ms;
            VadEvent::SpeechContinue { probability }
        }
        (VadState::PendingSilence, true) => {
            state.state = VadState::InSpeech;
            state.silence_run_ms = 0;
            VadEvent::SpeechContinue { probability }
        }
        (VadState::PendingSilence, false) => {
            state.silence_run_ms += frame_ms;
            if state.silence_run_ms >= config.min_silence_duration_ms {
                state.state = VadState::Idle;
                state.speech_run_ms = 0;
                state.silence_run_ms = 0;
                VadEvent::SpeechEnd
            } else {
                VadEvent::SpeechContinue { probability: 0.0 }
            }
        }
    }
}

fn frame_duration_ms(frame: &AudioFrame) -> u32 {
    ((frame.samples.len() as u64 * 1000) / frame.sample_rate.max(1) as u64) as u32
}

/// Energy-floor probability: 0 below `energy_floor_db`, ramping to 1 over a
/// 30dB range above it. No model, no warm-up, always `is_available`.
fn energy_probability(rms: f32, energy_floor_db: f32) -> f32 {
    let db = 20.0 * rms.max(1e-8).log10();
    if db < energy_floor_db {
        0.0
    } else {
        ((db - energy_floor_db) / 30.0).clamp(0.0, 1.0)
    }
}

pub struct SimpleVad {
    config: VadConfig,
    state: Mutex<DebounceState>,
}

impl SimpleVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DebounceState::new()),
        }
    }
}

#[async_trait]
impl VoiceActivityDetector for SimpleVad {
    async fn detect(&self, frame: &AudioFrame) -> Result<VadEvent> {
        let probability = energy_probability(frame.rms, self.config.energy_floor_db);
        let mut state = self.state.lock();
        Ok(advance(&mut state, &self.config, frame_duration_ms(frame), probability))
    }

    fn speech_probability(&self, frame: &AudioFrame) -> f32 {
        energy_probability(frame.rms, self.config.energy_floor_db)
    }

    async fn process_stream(
        &self,
        frames: BoxStream<'static, AudioFrame>,
    ) -> Result<BoxStream<'static, Result<VadEvent>>> {
        let config = self.config.clone();
        Ok(Box::pin(async_stream::stream! {
            use futures::StreamExt;
            tokio::pin!(frames);
            let mut state = DebounceState::new();
            while let Some(frame) = frames.next().await {
                let probability = energy_probability(frame.rms, config.energy_floor_db);
                yield Ok(advance(&mut state, &config, frame_duration_ms(&frame), probability));
            }
        }))
    }

    fn reset(&self) {
        *self.state.lock() = DebounceState::new();
    }

    fn current_state(&self) -> VadState {
        self.state.lock().state
    }

    fn model_info(&self) -> &str {
        "energy-rms"
    }

    fn is_neural(&self) -> bool {
        false
    }
}

#[cfg(feature = "neural")]
pub use neural_impl::NeuralVad;

#[cfg(feature = "neural")]
mod neural_impl {
    use super::*;
    use ndarray::Array3;
    use ort::session::Session;
    use ort::value::Tensor;
    use phone_agent_core::Error;

    const LSTM_HIDDEN: usize = 64;

    struct Lstm {
        h: Vec<f32>,
        c: Vec<f32>,
    }

    impl Lstm {
        fn zeroed() -> Self {
            Self {
                h: vec![0.0; LSTM_HIDDEN],
                c: vec![0.0; LSTM_HIDDEN],
            }
        }
    }

    /// ONNX speech-probability model (Silero-style: single-layer LSTM over
    /// fixed-size audio chunks, recurrent state carried between calls).
    pub struct NeuralVad {
        session: Mutex<Session>,
        lstm: Mutex<Lstm>,
        debounce: Mutex<DebounceState>,
        config: VadConfig,
        chunk_size: usize,
        sample_rate: i64,
    }

    impl NeuralVad {
        pub fn load(model_path: &str, config: VadConfig, sample_rate: u32) -> Result<Self> {
            let session = Session::builder()
                .map_err(|e| Error::Provider(format!("onnx session builder: {e}")))?
                .commit_from_file(model_path)
                .map_err(|e| Error::Provider(format!("failed to load vad model: {e}")))?;
            Ok(Self {
                session: Mutex::new(session),
                lstm: Mutex::new(Lstm::zeroed()),
                debounce: Mutex::new(DebounceState::new()),
                config,
                chunk_size: 512,
                sample_rate: sample_rate as i64,
            })
        }

        fn infer(&self, samples: &[f32]) -> Result<f32> {
            let mut lstm = self.lstm.lock();
            let input = Array3::from_shape_vec((1, 1, samples.len()), samples.to_vec())
                .map_err(|e| Error::Provider(format!("vad input shape: {e}")))?;
            let h_in = Array3::from_shape_vec((2, 1, LSTM_HIDDEN), {
                let mut v = lstm.h.clone();
                v.extend(lstm.h.clone());
                v
            })
            .map_err(|e| Error::Provider(format!("vad h shape: {e}")))?;
            let c_in = Array3::from_shape_vec((2, 1, LSTM_HIDDEN), {
                let mut v = lstm.c.clone();
                v.extend(lstm.c.clone());
                v
            })
            .map_err(|e| Error::Provider(format!("vad c shape: {e}")))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![
                    "input" => Tensor::from_array(input).map_err(|e| Error::Provider(e.to_string()))?,
                    "sr" => Tensor::from_array(([1], vec![self.sample_rate])).map_err(|e| Error::Provider(e.to_string()))?,
                    "h" => Tensor::from_array(h_in).map_err(|e| Error::Provider(e.to_string()))?,
                    "c" => Tensor::from_array(c_in).map_err(|e| Error::Provider(e.to_string()))?,
                ])
                .map_err(|e| Error::Provider(format!("vad inference: {e}")))?;

            let probability = outputs["output"]
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Provider(e.to_string()))?
                .1
                .first()
                .copied()
                .unwrap_or(0.0);

            if let Ok(hn) = outputs["hn"].try_extract_tensor::<f32>() {
                lstm.h = hn.1[..LSTM_HIDDEN].to_vec();
            }
            if let Ok(cn) = outputs["cn"].try_extract_tensor::<f32>() {
                lstm.c = cn.1[..LSTM_HIDDEN].to_vec();
            }

            Ok(probability)
        }
    }

    #[async_trait]
    impl VoiceActivityDetector for NeuralVad {
        async fn detect(&self, frame: &AudioFrame) -> Result<VadEvent> {
            let mut samples = frame.samples.clone();
            samples.resize(self.chunk_size, 0.0);
            let probability = self.infer(&samples)?;
            let mut state = self.debounce.lock();
            Ok(advance(&mut state, &self.config, frame_duration_ms(frame), probability))
        }

        fn speech_probability(&self, frame: &AudioFrame) -> f32 {
            let mut samples = frame.samples.clone();
            samples.resize(self.chunk_size, 0.0);
            self.infer(&samples).unwrap_or(0.0)
        }

        async fn process_stream(
            &self,
            frames: BoxStream<'static, AudioFrame>,
        ) -> Result<BoxStream<'static, Result<VadEvent>>> {
            // Neural inference needs `&self`, so frames are processed one at a
            // time through `detect` rather than re-implementing the loop.
            Ok(Box::pin(async_stream::stream! {
                use futures::StreamExt;
                tokio::pin!(frames);
                while let Some(frame) = frames.next().await {
                    yield self.detect(&frame).await;
                }
            }))
        }

        fn reset(&self) {
            *self.lstm.lock() = Lstm::zeroed();
            *self.debounce.lock() = DebounceState::new();
        }

        fn current_state(&self) -> VadState {
            self.debounce.lock().state
        }

        fn model_info(&self) -> &str {
            "silero-onnx"
        }

        fn is_neural(&self) -> bool {
            true
        }

        fn recommended_frame_size(&self) -> usize {
            self.chunk_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rms: f32) -> AudioFrame {
        AudioFrame {
            samples: vec![0.0; 160],
            sample_rate: 16_000,
            is_speech: None,
            rms,
            captured_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn stays_silent_below_energy_floor() {
        let vad = SimpleVad::new(VadConfig::default());
        let event = vad.detect(&frame(0.0001)).await.unwrap();
        assert!(!event.is_speech());
        assert_eq!(vad.current_state(), VadState::Idle);
    }

    #[tokio::test]
    async fn confirms_speech_after_min_duration() {
        let config = VadConfig {
            min_speech_duration_ms: 20,
            ..VadConfig::default()
        };
        let vad = SimpleVad::new(config);
        let loud = frame(0.5);
        let first = vad.detect(&loud).await.unwrap();
        assert!(matches!(first, VadEvent::Silence));
        let second = vad.detect(&loud).await.unwrap();
        assert!(matches!(second, VadEvent::SpeechStart));
        assert_eq!(vad.current_state(), VadState::InSpeech);
    }

    #[tokio::test]
    async fn reset_clears_state() {
        let vad = SimpleVad::new(VadConfig::default());
        vad.detect(&frame(0.5)).await.unwrap();
        vad.reset();
        assert_eq!(vad.current_state(), VadState::Idle);
    }
}
