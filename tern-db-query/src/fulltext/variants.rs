//! Term variant expansion
//!
//! Each search term expands into lookup candidates: the original pattern,
//! transliterated forms (Cyrillic ↔ Latin), keyboard-layout conversions
//! (qwerty ↔ ЙЦУКЕН), stemmed forms per enabled language, and configured
//! synonyms. Stemmed variants allow prefix continuation but not suffix
//! matches, except for the first (original) spelling. Exact terms skip
//! everything but synonyms are never applied to NOT terms.

use super::parse::{FtTerm, TermOp};
use tern_db_core::fulltext::FtConfig;

/// Relevancy percent of a full word match
pub const FULL_MATCH_PROC: i32 = 100;
/// Floor for prefix matches
pub const PREFIX_MIN_PROC: i32 = 50;
/// Floor for suffix matches
pub const SUFFIX_MIN_PROC: i32 = 10;
/// Ceiling for typo matches
pub const TYPO_PROC: i32 = 85;
/// Relevancy step per typo
pub const TYPO_STEP_PROC: i32 = 15;
/// Decrease when the pattern was found through a stem
pub const STEM_PROC_DECREASE: i32 = 15;

/// One lookup candidate
#[derive(Debug, Clone)]
pub struct FtVariant {
    pub pattern: String,
    pub proc: i32,
    pub prefix_allowed: bool,
    pub suffix_allowed: bool,
}

const RU_TRANSLIT: &[(&str, &str)] = &[
    ("а", "a"), ("б", "b"), ("в", "v"), ("г", "g"), ("д", "d"), ("е", "e"),
    ("ё", "e"), ("ж", "zh"), ("з", "z"), ("и", "i"), ("й", "j"), ("к", "k"),
    ("л", "l"), ("м", "m"), ("н", "n"), ("о", "o"), ("п", "p"), ("р", "r"),
    ("с", "s"), ("т", "t"), ("у", "u"), ("ф", "f"), ("х", "h"), ("ц", "c"),
    ("ч", "ch"), ("ш", "sh"), ("щ", "sch"), ("ъ", ""), ("ы", "y"), ("ь", ""),
    ("э", "e"), ("ю", "yu"), ("я", "ya"),
];

const KB_EN: &str = "qwertyuiop[]asdfghjkl;'zxcvbnm,.";
const KB_RU: &str = "йцукенгшщзхъфывапролджэячсмитьбю";

fn translit_ru_to_en(word: &str) -> Option<String> {
    let mut out = String::with_capacity(word.len());
    let mut any = false;
    for c in word.chars() {
        let s = c.to_string();
        match RU_TRANSLIT.iter().find(|(ru, _)| *ru == s) {
            Some((_, en)) => {
                out.push_str(en);
                any = true;
            }
            None => out.push(c),
        }
    }
    (any && out != word).then_some(out)
}

fn kb_convert(word: &str, from: &str, to: &str) -> Option<String> {
    let to_chars: Vec<char> = to.chars().collect();
    let mut out = String::with_capacity(word.len());
    let mut any = false;
    for c in word.chars() {
        match from.chars().position(|f| f == c) {
            Some(pos) => {
                out.push(to_chars[pos]);
                any = true;
            }
            None => out.push(c),
        }
    }
    (any && out != word).then_some(out)
}

/// Strip common suffixes; a deliberately small stand-in for a dictionary
/// stemmer, applied per enabled language.
fn stem(word: &str, lang: &str) -> Option<String> {
    let suffixes: &[&str] = match lang {
        "en" => &["ingly", "edly", "ing", "ely", "est", "ies", "ed", "ly", "es", "s"],
        "ru" => &[
            "иями", "ями", "ами", "ией", "ого", "его", "ому", "ему", "ыми", "ими",
            "ая", "яя", "ое", "ее", "ий", "ый", "ой", "ам", "ям", "ах", "ях",
            "ов", "ев", "ы", "и", "а", "я", "о", "е", "у", "ю",
        ],
        _ => return None,
    };
    for suf in suffixes {
        if let Some(stripped) = word.strip_suffix(suf) {
            if stripped.chars().count() >= 3 {
                return Some(stripped.to_string());
            }
        }
    }
    None
}

/// Expand a term into its lookup variants
pub fn prepare_variants(term: &FtTerm, cfg: &FtConfig) -> Vec<FtVariant> {
    // base spellings before stemming: original + translit + kb layout +
    // synonyms
    let mut spellings: Vec<(String, i32)> = vec![(term.pattern.clone(), FULL_MATCH_PROC)];

    if !term.exact {
        if cfg.enable_translit {
            if let Some(t) = translit_ru_to_en(&term.pattern) {
                spellings.push((t, FULL_MATCH_PROC - 10));
            }
        }
        if cfg.enable_kb_layout {
            if let Some(t) = kb_convert(&term.pattern, KB_EN, KB_RU) {
                spellings.push((t, FULL_MATCH_PROC - 10));
            }
            if let Some(t) = kb_convert(&term.pattern, KB_RU, KB_EN) {
                spellings.push((t, FULL_MATCH_PROC - 10));
            }
        }
    }
    if term.op != TermOp::Not {
        for syn in &cfg.synonyms {
            if syn.tokens.iter().any(|t| t == &term.pattern) {
                for alt in &syn.alternatives {
                    if !spellings.iter().any(|(s, _)| s == alt) {
                        spellings.push((alt.clone(), FULL_MATCH_PROC - 5));
                    }
                }
            }
        }
    }

    let mut out = Vec::with_capacity(spellings.len() * 2);
    for (i, (spelling, proc)) in spellings.iter().enumerate() {
        if spelling.is_empty() {
            continue;
        }
        out.push(FtVariant {
            pattern: spelling.clone(),
            proc: *proc,
            prefix_allowed: term.prefix_allowed,
            suffix_allowed: term.suffix_allowed,
        });
        if !term.exact {
            for lang in &cfg.stemmers {
                if let Some(stemmed) = stem(spelling, lang) {
                    if &stemmed != spelling {
                        out.push(FtVariant {
                            pattern: stemmed,
                            proc: proc - STEM_PROC_DECREASE,
                            prefix_allowed: true,
                            // only the original spelling keeps its suffix
                            // permission through stemming
                            suffix_allowed: term.suffix_allowed && i == 0,
                        });
                    }
                }
            }
        }
    }
    out
}
