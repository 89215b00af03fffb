//! Language and dialect tags
//!
//! The core treats dialect only as an opaque tag that steers STT model
//! choice and prompt content (see GLOSSARY); the detection logic that
//! produces these tags lives in `phone-agent-language`.

use serde::{Deserialize, Serialize};

/// The four languages the conversational core is required to route between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    German,
    Russian,
    Turkish,
    English,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::German => "de",
            Self::Russian => "ru",
            Self::Turkish => "tr",
            Self::English => "en",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "de" | "deu" | "german" | "deutsch" => Some(Self::German),
            "ru" | "rus" | "russian" => Some(Self::Russian),
            "tr" | "tur" | "turkish" => Some(Self::Turkish),
            "en" | "eng" | "english" => Some(Self::English),
            _ => None,
        }
    }

    pub fn all() -> &'static [Language] {
        &[Self::German, Self::Russian, Self::Turkish, Self::English]
    }
}

/// A regional variety of German recognised by the core only as an opaque
/// tag (GLOSSARY: Dialect). `Standard` means no dialect hint is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Standard,
    /// Alemannic/Swabian (Schwäbisch)
    Alemannic,
    Bavarian,
    LowGerman,
}

impl Dialect {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Alemannic => "alemannic",
            Self::Bavarian => "bavarian",
            Self::LowGerman => "low_german",
        }
    }

    /// STT model identifier the factory should prefer for this dialect.
    /// Concrete model names are a pipeline concern; this is the *tag* the
    /// factory consults, matching the "recommended STT model" of §4.2.
    pub fn recommended_stt_hint(&self) -> &'static str {
        match self {
            Self::Standard => "de-standard",
            Self::Alemannic => "de-alemannic-tuned",
            Self::Bavarian => "de-bavarian-tuned",
            Self::LowGerman => "de-low-german-tuned",
        }
    }
}

/// Outcome of a dialect classification pass (audio-first or text-based).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialectDetection {
    pub dialect: Dialect,
    pub confidence: f32,
    /// Character/lexical or acoustic features that drove the classification,
    /// kept for observability and for §8's test assertions.
    pub features: Vec<String>,
}

/// Outcome of a language classification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDetection {
    pub language: Language,
    pub confidence: f32,
}
