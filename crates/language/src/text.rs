//! Text-based language and dialect detection (§4.4, §4.9)
//!
//! Staged detection: Cyrillic script ⇒ Russian, Turkish-specific characters
//! ⇒ Turkish, dialect lexical markers ⇒ German + dialect tag, a handful of
//! common English words ⇒ English, otherwise German.

use once_cell::sync::Lazy;
use regex::Regex;

use phone_agent_core::{Dialect, DialectDetection, Language, LanguageDetection};

const MEDIUM_CONFIDENCE: f32 = 0.7;
const HIGH_CONFIDENCE: f32 = 0.9;
const MIN_ENGLISH_MATCHES: usize = 2;
const MIN_DIALECT_MATCHES: usize = 1;

static CYRILLIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[Ѐ-ӿ]").unwrap());

const TURKISH_CHARS: &[char] = &['ş', 'Ş', 'ğ', 'Ğ', 'ı', 'İ', 'ç', 'Ç'];

/// Alemannic/Swabian lexical markers (§GLOSSARY "Alemannic").
static ALEMANNIC_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b\w+le\b",
        r"(?i)\bi\s+(?:hab|han|bin|gang|komm|mach|will|kann)",
        r"(?i)\bdu\s+hosch\b",
        r"(?i)\bnet\b",
        r"(?i)\bnix\b",
        r"(?i)\bbissle\b",
        r"(?i)\bgell\b",
        r"(?i)\bgschwend\b",
        r"(?i)\bschaffe\b",
        r"(?i)\bgugg\b",
        r"(?i)\bhock\b",
        r"(?i)\bwo\s+bischt\b",
        r"(?i)\bdes\s+isch\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Bavarian lexical markers.
static BAVARIAN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bpfiat\s?di\b",
        r"(?i)\bservus\b",
        r"(?i)\bmog\b",
        r"(?i)\bfei\b",
        r"(?i)\bbasst\s+scho\b",
        r"(?i)\bned\b",
        r"(?i)\bgscheit\b",
        r"(?i)\bbrocka\b",
        r"(?i)\bhabe\s+fertig\b",
        r"(?i)\bi\s+moag\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Low German (Plattdeutsch) lexical markers.
static LOW_GERMAN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bmoin\b",
        r"(?i)\bwat\b",
        r"(?i)\bdat\b",
        r"(?i)\bkiek\b",
        r"(?i)\bnu\b",
        r"(?i)\btschüss\b",
        r"(?i)\bswienegel\b",
        r"(?i)\bool\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static ENGLISH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:hello|hi|hey)\b",
        r"(?i)\b(?:I have|I need|I want|I am|I'm)\b",
        r"(?i)\b(?:please|thank you|thanks)\b",
        r"(?i)\b(?:power outage|no power|electricity|electrical)\b",
        r"(?i)\b(?:help|problem|issue|broken|repair)\b",
        r"(?i)\b(?:appointment|schedule|today|tomorrow)\b",
        r"(?i)\b(?:the|and|but|with|for|this|that)\b",
        r"(?i)\b(?:my|your|our|their)\b",
        r"(?i)\b(?:is|are|was|were|have|has)\b",
        r"(?i)\b(?:can|could|would|should)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn count_matches(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().filter(|p| p.is_match(text)).count()
}

/// Detect the spoken language of `text` (§4.4 "language detection").
pub fn detect_language(text: &str) -> LanguageDetection {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return LanguageDetection {
            language: Language::German,
            confidence: 0.0,
        };
    }

    let cyrillic_count = CYRILLIC.find_iter(trimmed).count();
    if cyrillic_count > 0 {
        let total_alpha = trimmed.chars().filter(|c| c.is_alphabetic()).count().max(1);
        let confidence = (cyrillic_count as f32 / total_alpha as f32 * 1.5).min(1.0);
        return LanguageDetection {
            language: Language::Russian,
            confidence: confidence.max(MEDIUM_CONFIDENCE),
        };
    }

    let turkish_count = trimmed.chars().filter(|c| TURKISH_CHARS.contains(c)).count();
    if turkish_count > 0 {
        let confidence = (turkish_count as f32 / trimmed.chars().count() as f32 * 10.0).min(1.0);
        return LanguageDetection {
            language: Language::Turkish,
            confidence: confidence.max(MEDIUM_CONFIDENCE),
        };
    }

    if detect_dialect(trimmed).is_some() {
        return LanguageDetection {
            language: Language::German,
            confidence: HIGH_CONFIDENCE,
        };
    }

    let english_matches = count_matches(&ENGLISH_PATTERNS, trimmed);
    if english_matches >= MIN_ENGLISH_MATCHES {
        let confidence = (english_matches as f32 / 5.0).min(1.0);
        return LanguageDetection {
            language: Language::English,
            confidence: confidence.max(MEDIUM_CONFIDENCE),
        };
    }

    LanguageDetection {
        language: Language::German,
        confidence: HIGH_CONFIDENCE,
    }
}

/// Detect a German dialect from lexical markers, returning `None` when no
/// dialect pattern matches strongly enough (§4.9).
pub fn detect_dialect(text: &str) -> Option<DialectDetection> {
    let candidates: [(Dialect, &[Regex]); 3] = [
        (Dialect::Alemannic, &ALEMANNIC_PATTERNS),
        (Dialect::Bavarian, &BAVARIAN_PATTERNS),
        (Dialect::LowGerman, &LOW_GERMAN_PATTERNS),
    ];

    let mut best: Option<DialectDetection> = None;
    for (dialect, patterns) in candidates {
        let matched: Vec<String> = patterns
            .iter()
            .filter(|p| p.is_match(text))
            .map(|p| p.as_str().to_string())
            .collect();
        if matched.len() >= MIN_DIALECT_MATCHES {
            let confidence = (matched.len() as f32 / 3.0).min(1.0).max(MEDIUM_CONFIDENCE);
            let is_better = best
                .as_ref()
                .map(|b| confidence > b.confidence)
                .unwrap_or(true);
            if is_better {
                best = Some(DialectDetection {
                    dialect,
                    confidence,
                    features: matched,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_russian_from_cyrillic() {
        let result = detect_language("Привет, у меня проблема с электричеством");
        assert_eq!(result.language, Language::Russian);
        assert!(result.confidence >= MEDIUM_CONFIDENCE);
    }

    #[test]
    fn detects_turkish_from_special_chars() {
        let result = detect_language("Merhaba, elektrik arızası var, yardım eder misiniz?");
        assert_eq!(result.language, Language::Turkish);
    }

    #[test]
    fn detects_alemannic_dialect_markers() {
        let dialect = detect_dialect("I han a bissle Stress mit em Heizung, des isch komisch");
        assert!(dialect.is_some());
        assert_eq!(dialect.unwrap().dialect, Dialect::Alemannic);
    }

    #[test]
    fn detects_bavarian_dialect_markers() {
        let dialect = detect_dialect("Servus, des basst scho, i moag des ned");
        assert!(dialect.is_some());
        assert_eq!(dialect.unwrap().dialect, Dialect::Bavarian);
    }

    #[test]
    fn detects_low_german_dialect_markers() {
        let dialect = detect_dialect("Moin, wat is mit dat Kabel los, kiek mal");
        assert!(dialect.is_some());
        assert_eq!(dialect.unwrap().dialect, Dialect::LowGerman);
    }

    #[test]
    fn detects_english_with_enough_matches() {
        let result = detect_language("Hello, I have a problem with my electricity, please help");
        assert_eq!(result.language, Language::English);
    }

    #[test]
    fn defaults_to_standard_german() {
        let result = detect_language("Guten Tag, ich habe ein Problem mit der Heizung");
        assert_eq!(result.language, Language::German);
        assert!(detect_dialect("Guten Tag, ich habe ein Problem mit der Heizung").is_none());
    }

    #[test]
    fn empty_text_yields_zero_confidence() {
        let result = detect_language("   ");
        assert_eq!(result.confidence, 0.0);
    }
}
