//! Text cleaning rules: MacRoman mojibake repair, NFKC normalization,
//! U+FFFD replacement-character repair, and dropped-ligature repair. Each
//! pass is idempotent, and so is the pipeline as a whole — running
//! `clean_text` twice produces the same output as running it once.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Curly-quote-adjacent characters that show up when MacRoman-encoded
/// bytes are misread as a different 8-bit codepage. Only applied when at
/// least two of these markers are present in the text, to avoid false
/// positives on text that legitimately contains one of them.
const MACROMAN_MARKERS: &[(char, char)] = &[
    ('\u{02c6}', '\u{00e0}'), // ˆ -> à
    ('\u{017d}', '\u{00e9}'), // Ž -> é
    ('\u{017e}', '\u{00fb}'), // ž -> û
    ('\u{0160}', '\u{00e4}'), // Š -> ä
    ('\u{0161}', '\u{00f6}'), // š -> ö
];

static CONTEXTUAL_APOSTROPHE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)\u{00d5}(\w)").unwrap());

static FFFD_GENERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])\u{fffd}([a-z])").unwrap());

/// Explicit U+FFFD repair table: known corrupted words seen in the
/// original corpus, keyed by the literal (with U+FFFD in place of the
/// dropped glyph) they replace.
const FFFD_REPAIRS: &[(&str, &str)] = &[
    ("Na\u{fffd}onal", "National"),
    ("Interna\u{fffd}onal", "International"),
    ("Informa\u{fffd}on", "Information"),
    ("Organiza\u{fffd}on", "Organization"),
    ("Administra\u{fffd}on", "Administration"),
    ("Federa\u{fffd}on", "Federation"),
    ("Founda\u{fffd}on", "Foundation"),
    ("Opera\u{fffd}on", "Operation"),
    ("Regula\u{fffd}on", "Regulation"),
    ("Implementa\u{fffd}on", "Implementation"),
    ("Situa\u{fffd}on", "Situation"),
    ("Popula\u{fffd}on", "Population"),
    ("Documenta\u{fffd}on", "Documentation"),
    ("Evalua\u{fffd}on", "Evaluation"),
    ("Communica\u{fffd}on", "Communication"),
    ("Coordina\u{fffd}on", "Coordination"),
    ("Consulta\u{fffd}on", "Consultation"),
    ("Participa\u{fffd}on", "Participation"),
    ("Applica\u{fffd}on", "Application"),
    ("Educa\u{fffd}on", "Education"),
];

/// Explicit dropped-ligature repair table: the `fi`/`ti` ligature was
/// silently dropped (not replaced with U+FFFD) during extraction for
/// these words.
const LIGATURE_REPAIRS: &[(&str, &str)] = &[
    ("Naonal", "National"),
    ("Internaonal", "International"),
    ("Informaon", "Information"),
    ("Organizaon", "Organization"),
    ("Administraon", "Administration"),
    ("Federaon", "Federation"),
    ("Foundaon", "Foundation"),
    ("Operaon", "Operation"),
    ("Regulaon", "Regulation"),
    ("Implementaon", "Implementation"),
    ("Situaon", "Situation"),
    ("Populaon", "Population"),
    ("Documentaon", "Documentation"),
    ("Evaluaon", "Evaluation"),
    ("Communicaon", "Communication"),
    ("Coordinaon", "Coordination"),
    ("Consultaon", "Consultation"),
    ("Participaon", "Participation"),
    ("Applicaon", "Application"),
    ("Educaon", "Education"),
    ("Formave", "Formative"),
    ("Summave", "Summative"),
    ("Quantave", "Quantitative"),
    ("Qualitave", "Qualitative"),
    ("Iniave", "Initiative"),
    ("Administrave", "Administrative"),
    ("Legislave", "Legislative"),
    ("Represent", "Representative"),
    ("Effecve", "Effective"),
    ("Objecve", "Objective"),
    ("Collecon", "Collection"),
    ("Projecon", "Projection"),
    ("Direcon", "Direction"),
    ("Secon", "Section"),
    ("Funcon", "Function"),
    ("Quesonnaire", "Questionnaire"),
    ("Posion", "Position"),
    ("Condion", "Condition"),
];

static SPACED_OUT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\b[A-Za-z]\s){3,}[A-Za-z]\b").unwrap());

static BRACKETED_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d{1,3})\]").unwrap());
static SUP_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<sup>(\d{1,3})</sup>").unwrap());

/// Count of MacRoman marker characters required before mojibake repair
/// kicks in, to keep the rule from firing on coincidental single hits.
const MACROMAN_MIN_MARKERS: usize = 2;

/// Repairs MacRoman-as-another-codepage mojibake, but only when at least
/// [`MACROMAN_MIN_MARKERS`] distinct marker characters are present.
fn fix_macroman_mojibake(text: &str) -> String {
    let present = MACROMAN_MARKERS
        .iter()
        .filter(|(marker, _)| text.contains(*marker))
        .count();
    if present < MACROMAN_MIN_MARKERS {
        return text.to_string();
    }
    let mut out = text.to_string();
    for (marker, replacement) in MACROMAN_MARKERS {
        out = out.replace(*marker, &replacement.to_string());
    }
    out = CONTEXTUAL_APOSTROPHE
        .replace_all(&out, "$1'$2")
        .into_owned();
    out
}

fn repair_fffd(text: &str) -> String {
    let mut out = text.to_string();
    for (broken, fixed) in FFFD_REPAIRS {
        out = out.replace(broken, fixed);
    }
    out = FFFD_GENERIC.replace_all(&out, "${1}ti${2}").into_owned();
    out
}

fn repair_dropped_ligatures(text: &str) -> String {
    let mut out = text.to_string();
    for (broken, fixed) in LIGATURE_REPAIRS {
        out = out.replace(broken, fixed);
    }
    out
}

/// Standardizes footnote markers to the `[^N]` form used by the chunker's
/// footnote post-processing pass.
fn standardize_footnote_markers(text: &str) -> String {
    let text = SUP_DIGIT.replace_all(text, "[^$1]").into_owned();
    BRACKETED_DIGIT.replace_all(&text, "[^$1]").into_owned()
}

/// Collapses sequences of individually-spaced letters (`T h i s` ->
/// `This`) produced by some PDF extractors for emphasized or small-caps
/// runs.
fn collapse_spaced_out_text(text: &str) -> String {
    SPACED_OUT_RUN
        .replace_all(text, |caps: &regex::Captures| {
            caps[0].chars().filter(|c| !c.is_whitespace()).collect::<String>()
        })
        .into_owned()
}

/// Full cleaning pipeline applied to every text element before it is
/// attached to a chunk. Order matters: mojibake repair must run on the
/// raw bytes-as-chars before NFKC normalization folds away the markers it
/// looks for.
pub fn clean_text(text: &str) -> String {
    let text = fix_macroman_mojibake(text);
    let text: String = text.nfkc().collect();
    let text = repair_fffd(&text);
    let text = repair_dropped_ligatures(&text);
    let text = standardize_footnote_markers(&text);
    collapse_spaced_out_text(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_is_idempotent() {
        let samples = [
            "The Na\u{fffd}onal Organiza\u{fffd}on met today.",
            "Formave evaluaon was conducted for the Secon.",
            "Plain ASCII text with nothing to fix.",
            "T h i s   w a s   e m p h a s i z e d   text.",
        ];
        for sample in samples {
            let once = clean_text(sample);
            let twice = clean_text(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn repairs_fffd_corrupted_words() {
        let cleaned = clean_text("The Na\u{fffd}onal Founda\u{fffd}on report.");
        assert_eq!(cleaned, "The National Foundation report.");
    }

    #[test]
    fn repairs_dropped_ligature_words() {
        let cleaned = clean_text("A Formave Evaluaon of the Projecon.");
        assert_eq!(cleaned, "A Formative Evaluation of the Projection.");
    }

    #[test]
    fn macroman_repair_requires_at_least_two_markers() {
        let single = clean_text("A caf\u{02c6} with one marker.");
        assert!(single.contains('\u{02c6}'), "should not fire on a single marker");
    }

    #[test]
    fn collapses_spaced_out_letter_runs() {
        let cleaned = clean_text("This is an E M P H A S I S example.");
        assert!(cleaned.contains("EMPHASIS"));
    }
}
