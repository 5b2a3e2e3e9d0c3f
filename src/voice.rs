//! Voice input.
//!
//! Speech recognition itself is an outside capability behind [`Transcriber`].
//! This module turns a raw transcript into a field value (spoken French and
//! Arabic numbers, Arabic-Indic digits, "virgule" and "plus") and applies it
//! to the draft if no newer edit landed in the meantime.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::model::ScalarField;
use crate::rows::{Edit, RowField, RowKind};
use crate::store::{EditTicket, SiteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoiceLanguage {
    #[serde(rename = "en-US")]
    EnUs,
    #[default]
    #[serde(rename = "fr-FR")]
    FrFr,
    #[serde(rename = "es-ES")]
    EsEs,
    #[serde(rename = "ar-SA")]
    ArSa,
    #[serde(rename = "none")]
    None,
}

impl VoiceLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            VoiceLanguage::EnUs => "en-US",
            VoiceLanguage::FrFr => "fr-FR",
            VoiceLanguage::EsEs => "es-ES",
            VoiceLanguage::ArSa => "ar-SA",
            VoiceLanguage::None => "none",
        }
    }
}

impl fmt::Display for VoiceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceLanguage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [
            VoiceLanguage::EnUs,
            VoiceLanguage::FrFr,
            VoiceLanguage::EsEs,
            VoiceLanguage::ArSa,
            VoiceLanguage::None,
        ]
        .into_iter()
        .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| format!("unknown voice language '{s}'"))
    }
}

/// Produces a raw transcript of what was said in `language`.
pub trait Transcriber {
    fn listen(&mut self, language: VoiceLanguage) -> Result<String>;
}

/// Stand-in for runtimes without speech recognition.
#[derive(Debug, Default)]
pub struct Unavailable;

impl Transcriber for Unavailable {
    fn listen(&mut self, _language: VoiceLanguage) -> Result<String> {
        Err(LedgerError::Unsupported(
            "Speech recognition is not supported in this environment".to_string(),
        ))
    }
}

/// Where a dictated value goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictationTarget {
    Scalar(ScalarField),
    Row {
        kind: RowKind,
        index: usize,
        field: RowField,
    },
}

impl DictationTarget {
    pub fn is_number_field(&self) -> bool {
        !matches!(
            self,
            DictationTarget::Row {
                field: RowField::Client,
                ..
            }
        )
    }
}

// ==========================================
// Normalization tables
// ==========================================

const NUMBER_WORDS: &[(&str, &str)] = &[
    ("zéro", "0"),
    ("un", "1"),
    ("deux", "2"),
    ("trois", "3"),
    ("quatre", "4"),
    ("cinq", "5"),
    ("six", "6"),
    ("sept", "7"),
    ("huit", "8"),
    ("neuf", "9"),
    ("dix", "10"),
    ("onze", "11"),
    ("douze", "12"),
    ("treize", "13"),
    ("quatorze", "14"),
    ("quinze", "15"),
    ("seize", "16"),
    ("vingt", "20"),
    ("trente", "30"),
    ("quarante", "40"),
    ("cinquante", "50"),
    ("soixante", "60"),
    ("soixante-dix", "70"),
    ("quatre-vingt", "80"),
    ("quatre-vingt-dix", "90"),
    ("cent", "100"),
    ("cents", "100"),
    ("mille", "1000"),
    ("صفر", "0"),
    ("واحد", "1"),
    ("اثنين", "2"),
    ("ثلاثة", "3"),
    ("اربعة", "4"),
    ("خمسة", "5"),
    ("ستة", "6"),
    ("سبعة", "7"),
    ("ثمانية", "8"),
    ("تسعة", "9"),
    ("عشرة", "10"),
    ("عشرين", "20"),
    ("ثلاثين", "30"),
    ("اربعين", "40"),
    ("خمسين", "50"),
    ("ستين", "60"),
    ("سبعين", "70"),
    ("ثمانين", "80"),
    ("تسعين", "90"),
    ("مية", "100"),
    ("الف", "1000"),
];

const CORRECTIONS: &[(&str, &str)] = &[
    ("virgule", "."),
    ("point", "."),
    ("plus", "+"),
    ("et", "+"),
    ("euros", ""),
    ("euro", ""),
    ("zéros", "zéro"),
    ("فاصلة", "."),
    ("نقطة", "."),
    ("زائد", "+"),
    ("و", "+"),
    ("دنانير", ""),
    ("دينار", ""),
    ("موافق", "ok"),
    ("عم", "ok"),
];

/// `\b(?:w1|w2|...)\b` with longer words first so "soixante-dix" wins over
/// "soixante".
fn word_alternation(words: &[(&str, &str)]) -> Regex {
    let mut keys: Vec<&str> = words.iter().map(|(w, _)| *w).collect();
    keys.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
    let escaped: Vec<String> = keys.iter().map(|w| regex::escape(w)).collect();
    Regex::new(&format!(r"\b(?:{})\b", escaped.join("|"))).unwrap()
}

static NUMBER_MAP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| NUMBER_WORDS.iter().copied().collect());
static CORRECTION_MAP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| CORRECTIONS.iter().copied().collect());

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| word_alternation(NUMBER_WORDS));
static CORRECTION_RE: LazyLock<Regex> = LazyLock::new(|| word_alternation(CORRECTIONS));
static HUNDREDS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+)\s+cents?\b").unwrap());
static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)[.,](\d+)").unwrap());
static PLUS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\+\s*").unwrap());
static NOT_NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\d.+]").unwrap());

/// Arabic-Indic (U+0660..) and extended (U+06F0..) digits to ASCII.
fn fold_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            other => other,
        })
        .collect()
}

/// Turns a transcript into a field value. Text fields are only trimmed;
/// number fields end up as digits, `.` and `+`.
pub fn normalize(transcript: &str, is_number_field: bool) -> String {
    if !is_number_field {
        return transcript.trim().to_string();
    }

    let text = transcript.to_lowercase();
    let text = text.trim();

    let text = HUNDREDS_RE.replace_all(text, |caps: &Captures| match NUMBER_MAP.get(&caps[1]) {
        Some(digit) => digit
            .parse::<u64>()
            .map(|n| (n * 100).to_string())
            .unwrap_or_else(|_| caps[0].to_string()),
        None => caps[0].to_string(),
    });
    let text = fold_digits(&text);
    let text = CORRECTION_RE.replace_all(&text, |caps: &Captures| {
        CORRECTION_MAP.get(&caps[0]).copied().unwrap_or_default().to_string()
    });
    let text = NUMBER_RE.replace_all(&text, |caps: &Captures| {
        NUMBER_MAP.get(&caps[0]).copied().unwrap_or_default().to_string()
    });
    let text = DECIMAL_RE.replace_all(&text, "${1}.${2}");
    let text = PLUS_RE.replace_all(&text, "+");

    if text.contains('+') {
        return text.trim().to_string();
    }
    NOT_NUMERIC_RE.replace_all(&text, "").into_owned()
}

/// Applies an already captured transcript, provided `ticket` is still current.
pub fn apply_transcript(
    store: &mut SiteStore,
    ticket: EditTicket,
    target: DictationTarget,
    transcript: &str,
) -> Result<Edit> {
    let value = normalize(transcript, target.is_number_field());
    debug!(?target, %value, "dictated");
    store.apply_if_current(ticket, |store| match target {
        DictationTarget::Scalar(field) => Ok(store.set_field(field, &value)),
        DictationTarget::Row { kind, index, field } => store.update_row(kind, index, field, &value),
    })
}

/// Listens once and writes the normalized value into `target`.
pub fn dictate(
    store: &mut SiteStore,
    transcriber: &mut dyn Transcriber,
    language: VoiceLanguage,
    target: DictationTarget,
) -> Result<Edit> {
    if language == VoiceLanguage::None {
        return Err(LedgerError::Unsupported(
            "Please select a voice input language first".to_string(),
        ));
    }
    let ticket = store.ticket();
    let transcript = transcriber.listen(language)?;
    apply_transcript(store, ticket, target, &transcript)
}
