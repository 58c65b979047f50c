//! Language normalization for incoming questions.
//!
//! Detection is local and deterministic:
//! - script classification for non-Latin alphabets
//! - stop-word scoring among Latin-script languages
//! - fallback to the canonical language when there is no signal
//!
//! Only translation goes through the model capability.

use crate::bounded;
use lazy_static::lazy_static;
use nl2sql_core::{
    ModelCapability, PipelineError, PipelineStage, PipelineState, QuestionUpdate, UpdateOutcome,
};
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\p{L}+").unwrap();

    /// Function words per Latin-script language, lower-case. Words that also
    /// occur in English text or in place names (`la`, `los`, `no`, `van`) are
    /// left out.
    static ref STOP_WORDS: Vec<(&'static str, HashSet<&'static str>)> = vec![
        ("en", words(&[
            "the", "a", "an", "is", "are", "was", "were", "how", "many", "much", "what", "which",
            "who", "of", "in", "with", "for", "and", "to", "there", "do", "does", "by", "each",
            "per", "from", "show", "list", "all", "have", "has", "that", "than", "most", "their",
        ])),
        ("es", words(&[
            "que", "cuántas", "cuántos", "cuál", "cuáles", "por", "para", "y", "es", "son",
            "una", "escuelas", "qué", "tienen", "más", "cuantas", "cuantos",
        ])),
        ("fr", words(&[
            "combien", "quel", "quelle", "quels", "quelles", "est", "sont", "et", "avec", "pour",
            "dans", "une", "ont", "qui", "écoles",
        ])),
        ("de", words(&[
            "der", "das", "wie", "viele", "welche", "welcher", "ist", "sind", "und", "für",
            "von", "gibt", "eine", "ein", "haben", "nur", "schulen",
        ])),
        ("it", words(&[
            "gli", "quanti", "quante", "quale", "quali", "è", "sono", "che", "della", "delle",
            "nel", "hanno", "scuole",
        ])),
        ("pt", words(&[
            "dos", "das", "quantos", "quantas", "qual", "quais", "é", "são", "com", "que", "uma",
            "um", "há", "têm", "escolas",
        ])),
        ("nl", words(&[
            "het", "een", "hoeveel", "welke", "zijn", "met", "voor", "wat", "hebben", "alleen",
            "scholen",
        ])),
    ];
}

const MIN_FOREIGN_HITS: usize = 2;
const FOREIGN_MARGIN: usize = 1;

fn words(list: &[&'static str]) -> HashSet<&'static str> {
    list.iter().copied().collect()
}

fn hits<'a>(tokens: &[&'a str], stop_words: &HashSet<&'a str>) -> usize {
    tokens.iter().filter(|t| stop_words.contains(*t)).count()
}

/// Language code for a non-Latin script, if the character belongs to one.
fn script_language(c: char) -> Option<&'static str> {
    match c as u32 {
        0x3040..=0x30FF => Some("ja"),
        0xAC00..=0xD7AF | 0x1100..=0x11FF => Some("ko"),
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => Some("zh"),
        0x0400..=0x04FF => Some("ru"),
        0x0600..=0x06FF => Some("ar"),
        0x0370..=0x03FF => Some("el"),
        0x0590..=0x05FF => Some("he"),
        0x0900..=0x097F => Some("hi"),
        0x0E00..=0x0E7F => Some("th"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct LanguageDetector {
    canonical: String,
}

impl LanguageDetector {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into().to_lowercase(),
        }
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// ISO 639-1 code of the dominant language of `text`.
    pub fn detect(&self, text: &str) -> String {
        if let Some(code) = self.detect_script(text) {
            return code.to_string();
        }
        self.detect_latin(text)
    }

    pub fn is_canonical(&self, text: &str) -> bool {
        self.detect(text) == self.canonical
    }

    fn detect_script(&self, text: &str) -> Option<&'static str> {
        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.is_empty() {
            return None;
        }
        let scripted: Vec<&'static str> = letters.iter().filter_map(|c| script_language(*c)).collect();
        // Table and column names stay Latin; a third of the letters is enough.
        if scripted.len() * 3 < letters.len() {
            return None;
        }
        // Kana marks Japanese even when Han characters dominate.
        if scripted.contains(&"ja") {
            return Some("ja");
        }
        let mut best: Option<(&'static str, usize)> = None;
        for code in &scripted {
            let count = scripted.iter().filter(|c| *c == code).count();
            if best.map_or(true, |(_, n)| count > n) {
                best = Some((*code, count));
            }
        }
        best.map(|(code, _)| code)
    }

    fn detect_latin(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = WORD.find_iter(&lowered).map(|m| m.as_str()).collect();
        let canonical_score = STOP_WORDS
            .iter()
            .find(|(code, _)| *code == self.canonical)
            .map_or(0, |(_, stop_words)| hits(&tokens, stop_words));

        let mut best: Option<(&str, usize)> = None;
        for (code, stop_words) in STOP_WORDS.iter().filter(|(code, _)| *code != self.canonical) {
            let score = hits(&tokens, stop_words);
            if best.map_or(true, |(_, n)| score > n) {
                best = Some((*code, score));
            }
        }
        debug!(tokens = tokens.len(), canonical_score, best = ?best, "latin stop-word scores");

        // A foreign language has to win clearly; stray proper nouns must not flip it.
        match best {
            Some((code, score)) if score >= MIN_FOREIGN_HITS && score > canonical_score + FOREIGN_MARGIN => {
                code.to_string()
            }
            _ => self.canonical.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageOutcome {
    /// Question already in the working language; state untouched.
    AlreadyCanonical { language: String },
    Translated { from: String, update: UpdateOutcome },
}

impl LanguageOutcome {
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Translated { .. })
    }
}

pub struct LanguageNormalizer {
    detector: LanguageDetector,
    timeout: Duration,
}

impl LanguageNormalizer {
    pub fn new(canonical: impl Into<String>, timeout: Duration) -> Self {
        Self {
            detector: LanguageDetector::new(canonical),
            timeout,
        }
    }

    pub fn detector(&self) -> &LanguageDetector {
        &self.detector
    }

    /// Translates the working question into the canonical language when it
    /// is not already in it. Running it again afterwards changes nothing.
    pub async fn normalize(
        &self,
        state: &mut PipelineState,
        capability: &dyn ModelCapability,
    ) -> Result<LanguageOutcome, PipelineError> {
        let detected = self.detector.detect(state.question());
        if detected == self.detector.canonical() {
            debug!(language = %detected, "question already canonical");
            return Ok(LanguageOutcome::AlreadyCanonical { language: detected });
        }

        let original = state.question().to_string();
        let translated = bounded(
            "translate",
            self.timeout,
            capability.translate(&original, self.detector.canonical()),
            PipelineError::Translation,
        )
        .await?;
        let translated = translated.trim().to_string();
        if translated.is_empty() {
            return Err(PipelineError::Translation(format!(
                "empty translation from '{}'",
                detected
            )));
        }

        let update = QuestionUpdate::default()
            .question(translated)
            .original_question(state.original_question().unwrap_or(original.as_str()).to_string())
            .original_language(detected.clone());
        let update = state.apply_question_update(PipelineStage::NormalizeLanguage, update)?;
        info!(from = %detected, to = %self.detector.canonical(), "question translated");

        Ok(LanguageOutcome::Translated {
            from: detected,
            update,
        })
    }
}

/// The question as the user wrote it.
pub fn restore_original(state: &PipelineState) -> &str {
    state.original_question().unwrap_or_else(|| state.question())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> LanguageDetector {
        LanguageDetector::new("en")
    }

    #[test]
    fn detects_latin_languages() {
        let d = detector();
        assert_eq!(d.detect("How many schools are exclusively virtual?"), "en");
        assert_eq!(d.detect("¿Cuántas escuelas son exclusivamente virtuales?"), "es");
        assert_eq!(d.detect("Combien d'écoles sont exclusivement virtuelles ?"), "fr");
        assert_eq!(d.detect("Wie viele Schulen sind ausschließlich virtuell?"), "de");
        assert_eq!(d.detect("Quantas escolas são exclusivamente virtuais?"), "pt");
    }

    #[test]
    fn english_with_foreign_looking_words_stays_canonical() {
        let d = detector();
        assert_eq!(d.detect("Count schools no longer open"), "en");
        assert_eq!(d.detect("Schools in La Mesa, Los Angeles and La Jolla"), "en");
        assert_eq!(d.detect("How many schools are in Los Angeles County?"), "en");
        assert_eq!(d.detect("List schools in Del Mar and El Cajon"), "en");
        assert_eq!(d.detect("Average SAT math score of Son Valley High"), "en");
    }

    #[test]
    fn single_foreign_hit_is_not_enough() {
        assert_eq!(detector().detect("escuelas"), "en");
    }

    #[test]
    fn detects_scripts() {
        let d = detector();
        assert_eq!(d.detect("有多少所学校是完全虚拟的？"), "zh");
        assert_eq!(d.detect("完全にバーチャルな学校はいくつありますか？"), "ja");
        assert_eq!(d.detect("Сколько школ полностью виртуальные?"), "ru");
        assert_eq!(d.detect("완전히 가상인 학교는 몇 개입니까?"), "ko");
    }

    #[test]
    fn no_signal_defaults_to_canonical() {
        let d = detector();
        assert_eq!(d.detect("CDSCode 0123"), "en");
        assert_eq!(d.detect(""), "en");
        assert!(d.is_canonical("SELECT"));
    }

    #[test]
    fn latin_identifiers_do_not_outvote_script() {
        let d = detector();
        assert_eq!(d.detect("schools 表里有多少所学校是完全虚拟的"), "zh");
    }

    #[test]
    fn restore_prefers_original() {
        let mut state = PipelineState::new("¿Cuántas escuelas hay?");
        assert_eq!(restore_original(&state), "¿Cuántas escuelas hay?");
        state
            .apply_question_update(
                PipelineStage::NormalizeLanguage,
                QuestionUpdate::default()
                    .question("How many schools are there?")
                    .original_question("¿Cuántas escuelas hay?"),
            )
            .unwrap();
        assert_eq!(restore_original(&state), "¿Cuántas escuelas hay?");
    }
}
