//! Full-text indexed state
//!
//! The structures a full-text index keeps per namespace, built in *steps*:
//! each commit step owns the suffix array and typo maps for the words it
//! introduced, so incremental indexing never rewrites earlier steps. The
//! selector (in the query crate) walks every step.
//!
//! - word table: global word ids with posting lists
//!   `(doc, field-mask, positions)`
//! - per-step suffix array mapping every suffix of every indexed word to its
//!   word id
//! - per-step typo maps from generated typos (character deletions) to word
//!   ids, split into a "half" and a "max" map by deletion depth
//! - per-document word counts and most-frequent-word counts per field,
//!   feeding BM25

use crate::idset::RowId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Global word identifier
pub type WordId = u32;

/// Per-field full-text options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtFieldConfig {
    pub bm25_boost: f64,
    pub bm25_weight: f64,
    pub position_boost: f64,
    pub position_weight: f64,
    pub term_len_boost: f64,
    pub term_len_weight: f64,
}

impl Default for FtFieldConfig {
    fn default() -> Self {
        Self {
            bm25_boost: 1.0,
            bm25_weight: 0.1,
            position_boost: 1.0,
            position_weight: 0.1,
            term_len_boost: 1.0,
            term_len_weight: 0.3,
        }
    }
}

/// Full-text index configuration (decoded from the index definition JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtConfig {
    pub enable_translit: bool,
    pub enable_kb_layout: bool,
    /// Language codes with stemming enabled
    pub stemmers: Vec<String>,
    /// Each entry maps any of `tokens` to the listed alternatives
    pub synonyms: Vec<FtSynonym>,
    /// Typo budget for the query-word/index-word pair
    pub max_typos: u32,
    /// Words longer than this never get typo handling
    pub max_typo_len: usize,
    pub merge_limit: usize,
    pub partial_match_decrease: u32,
    pub full_match_boost: f64,
    pub distance_boost: f64,
    pub distance_weight: f64,
    pub sum_ranks_by_fields_ratio: f64,
    pub min_relevancy: f64,
    pub stop_words: Vec<String>,
    pub fields: FxHashMap<String, FtFieldConfig>,
}

impl Default for FtConfig {
    fn default() -> Self {
        Self {
            enable_translit: true,
            enable_kb_layout: true,
            stemmers: vec!["en".to_string()],
            synonyms: Vec::new(),
            max_typos: 2,
            max_typo_len: 15,
            merge_limit: 20000,
            partial_match_decrease: 15,
            full_match_boost: 1.1,
            distance_boost: 1.0,
            distance_weight: 0.5,
            sum_ranks_by_fields_ratio: 0.0,
            min_relevancy: 0.05,
            stop_words: Vec::new(),
            fields: FxHashMap::default(),
        }
    }
}

impl FtConfig {
    /// Maximum typos on one side of the pair
    pub fn max_typos_in_word(&self) -> u32 {
        (self.max_typos + 1) / 2
    }

    pub fn field_config(&self, name: &str) -> FtFieldConfig {
        self.fields.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtSynonym {
    pub tokens: Vec<String>,
    pub alternatives: Vec<String>,
}

/// One occurrence list of a word inside one document
#[derive(Debug, Clone)]
pub struct Posting {
    /// Index into [`FtIndexData::docs`]
    pub doc: u32,
    /// `(field ordinal, position)` pairs in ascending position order
    pub positions: Vec<(u8, u32)>,
}

impl Posting {
    pub fn used_fields_mask(&self) -> u64 {
        self.positions.iter().fold(0u64, |m, (f, _)| m | 1 << f)
    }

    pub fn words_in_field(&self, field: u8) -> u32 {
        self.positions.iter().filter(|(f, _)| *f == field).count() as u32
    }

    pub fn min_position_in_field(&self, field: u8) -> u32 {
        self.positions
            .iter()
            .filter(|(f, _)| *f == field)
            .map(|(_, p)| *p)
            .min()
            .unwrap_or(u32::MAX)
    }

    /// Minimal absolute position distance to another posting, used for the
    /// AND-term proximity gate
    pub fn distance(&self, other: &Posting) -> u32 {
        let mut best = u32::MAX;
        for (_, a) in &self.positions {
            for (_, b) in &other.positions {
                let d = a.abs_diff(*b);
                if d < best {
                    best = d;
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone)]
pub struct WordEntry {
    pub word: String,
    pub postings: Vec<Posting>,
}

impl WordEntry {
    /// Total referenced ids, the iterator cost input
    pub fn vids(&self) -> usize {
        self.postings.len()
    }
}

/// Per-document statistics
#[derive(Debug, Clone)]
pub struct DocEntry {
    pub row_id: RowId,
    /// Words per indexed field
    pub words_count: Vec<u32>,
    /// Count of the most frequent word per field
    pub most_freq_word_count: Vec<u32>,
    pub tombstone: bool,
}

/// Suffix-array entry: a suffix of `words[word_id]` starting at `offset`
#[derive(Debug, Clone, Copy)]
pub struct SuffixEntry {
    pub word_id: WordId,
    pub offset: u16,
}

/// One commit step: suffix array and typo maps over a word-id range
#[derive(Debug, Clone, Default)]
pub struct FtStep {
    pub word_range: std::ops::Range<u32>,
    /// Sorted by suffix string
    pub suffixes: Vec<SuffixEntry>,
    pub typos_half: FxHashMap<String, Vec<WordId>>,
    pub typos_max: FxHashMap<String, Vec<WordId>>,
}

/// Built full-text state for one namespace index
#[derive(Debug, Clone, Default)]
pub struct FtIndexData {
    pub words: Vec<WordEntry>,
    word_ids: FxHashMap<String, WordId>,
    pub steps: Vec<FtStep>,
    pub docs: Vec<DocEntry>,
    doc_by_row: FxHashMap<RowId, u32>,
    /// Sum of words per field across live docs
    total_words: Vec<u64>,
    live_docs: u64,
    num_fields: usize,
}

impl FtIndexData {
    pub fn new(num_fields: usize) -> Self {
        Self {
            total_words: vec![0; num_fields],
            num_fields,
            ..Default::default()
        }
    }

    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    pub fn word(&self, id: WordId) -> &WordEntry {
        &self.words[id as usize]
    }

    pub fn total_docs(&self) -> usize {
        self.docs.len()
    }

    pub fn avg_words_in_field(&self, field: u8) -> f64 {
        if self.live_docs == 0 {
            0.0
        } else {
            self.total_words[field as usize] as f64 / self.live_docs as f64
        }
    }

    pub fn doc_for_row(&self, row_id: RowId) -> Option<&DocEntry> {
        self.doc_by_row
            .get(&row_id)
            .map(|&d| &self.docs[d as usize])
    }

    /// Index one document's field texts; tokens must already be lowercased
    /// and split by the caller's tokenizer.
    pub fn add_doc(&mut self, row_id: RowId, field_tokens: &[Vec<String>], cfg: &FtConfig) {
        debug_assert_eq!(field_tokens.len(), self.num_fields);
        if self.doc_by_row.contains_key(&row_id) {
            self.remove_doc(row_id);
        }
        let doc_idx = self.docs.len() as u32;
        let mut words_count = vec![0u32; self.num_fields];
        let mut per_word: FxHashMap<String, Vec<(u8, u32)>> = FxHashMap::default();
        let mut freq: Vec<FxHashMap<&str, u32>> = vec![FxHashMap::default(); self.num_fields];

        let mut new_words: Vec<WordId> = Vec::new();
        for (field, tokens) in field_tokens.iter().enumerate() {
            for (pos, tok) in tokens.iter().enumerate() {
                words_count[field] += 1;
                per_word
                    .entry(tok.clone())
                    .or_default()
                    .push((field as u8, pos as u32));
            }
            for tok in tokens {
                *freq[field].entry(tok.as_str()).or_default() += 1;
            }
        }
        let most_freq_word_count = freq
            .iter()
            .map(|m| m.values().copied().max().unwrap_or(0))
            .collect();

        for (word, mut positions) in per_word {
            positions.sort_by_key(|(_, p)| *p);
            let wid = match self.word_ids.get(&word) {
                Some(&w) => w,
                None => {
                    let w = self.words.len() as WordId;
                    self.words.push(WordEntry {
                        word: word.clone(),
                        postings: Vec::new(),
                    });
                    self.word_ids.insert(word, w);
                    new_words.push(w);
                    w
                }
            };
            self.words[wid as usize].postings.push(Posting {
                doc: doc_idx,
                positions,
            });
        }

        for (f, c) in words_count.iter().enumerate() {
            self.total_words[f] += *c as u64;
        }
        self.live_docs += 1;
        self.docs.push(DocEntry {
            row_id,
            words_count,
            most_freq_word_count,
            tombstone: false,
        });
        self.doc_by_row.insert(row_id, doc_idx);

        if !new_words.is_empty() {
            self.commit_step(new_words, cfg);
        }
    }

    /// Tombstone a document; postings are skipped at query time
    pub fn remove_doc(&mut self, row_id: RowId) {
        if let Some(doc_idx) = self.doc_by_row.remove(&row_id) {
            let doc = &mut self.docs[doc_idx as usize];
            if !doc.tombstone {
                doc.tombstone = true;
                self.live_docs -= 1;
                for (f, c) in doc.words_count.iter().enumerate() {
                    self.total_words[f] -= *c as u64;
                }
            }
        }
    }

    /// Build the suffix array and typo maps for a batch of new words.
    /// Words are appended contiguously, so the batch forms a dense range and
    /// the step covers exactly that range.
    fn commit_step(&mut self, new_words: Vec<WordId>, cfg: &FtConfig) {
        let lo = *new_words.iter().min().unwrap();
        let hi = *new_words.iter().max().unwrap() + 1;
        let mut step = FtStep {
            word_range: lo..hi,
            ..Default::default()
        };
        for &wid in &new_words {
            let word = self.words[wid as usize].word.clone();
            let chars: Vec<char> = word.chars().collect();
            for offset in 0..chars.len() {
                step.suffixes.push(SuffixEntry {
                    word_id: wid,
                    offset: offset as u16,
                });
            }
            if word.chars().count() <= cfg.max_typo_len {
                let max_in_word = cfg.max_typos_in_word();
                // the word itself participates so one-sided deletions on the
                // query side still meet it
                step.typos_half.entry(word.clone()).or_default().push(wid);
                generate_typos(&word, max_in_word, &mut |typo, level| {
                    // single-deletion typos land in the half map, deeper
                    // ones in the max map
                    let tcount = max_in_word - level;
                    if tcount <= 1 {
                        step.typos_half.entry(typo.to_string()).or_default().push(wid);
                    } else {
                        step.typos_max.entry(typo.to_string()).or_default().push(wid);
                    }
                });
            }
        }
        let words = &self.words;
        step.suffixes.sort_by(|a, b| {
            suffix_str(words, *a).cmp(suffix_str(words, *b))
        });
        self.steps.push(step);
    }

    /// Walk a step's suffix array over every entry whose suffix starts with
    /// `pattern`, in sorted order.
    pub fn lookup_suffixes<'a>(
        &'a self,
        step: &'a FtStep,
        pattern: &'a str,
    ) -> impl Iterator<Item = SuffixEntry> + 'a {
        let start = step
            .suffixes
            .partition_point(|e| suffix_str(&self.words, *e) < pattern);
        step.suffixes[start..]
            .iter()
            .take_while(move |e| suffix_str(&self.words, **e).starts_with(pattern))
            .copied()
    }

    pub fn word_len(&self, id: WordId) -> usize {
        self.words[id as usize].word.chars().count()
    }
}

fn suffix_str(words: &[WordEntry], e: SuffixEntry) -> &str {
    let w = &words[e.word_id as usize].word;
    // offset counts chars; words are indexed lowercased so this walks to the
    // byte offset of the Nth char
    match w.char_indices().nth(e.offset as usize) {
        Some((byte, _)) => &w[byte..],
        None => "",
    }
}

/// Enumerate typos of a word by deleting up to `max_level` characters.
/// `level` passed to the callback counts remaining deletions, matching the
/// convention the selector's percent arithmetic expects.
pub fn generate_typos(word: &str, max_level: u32, cb: &mut impl FnMut(&str, u32)) {
    fn rec(chars: &[char], level: u32, cb: &mut impl FnMut(&str, u32)) {
        if level == 0 || chars.len() <= 2 {
            return;
        }
        for skip in 0..chars.len() {
            let typo: String = chars
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, c)| *c)
                .collect();
            cb(&typo, level - 1);
            let typo_chars: Vec<char> = typo.chars().collect();
            rec(&typo_chars, level - 1, cb);
        }
    }
    let chars: Vec<char> = word.chars().collect();
    rec(&chars, max_level, cb);
}

/// Lowercase alphanumeric tokenizer with stop-word removal
pub fn tokenize(text: &str, stop_words: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let lower = text.to_lowercase();
    for tok in lower.split(|c: char| !c.is_alphanumeric()) {
        if tok.is_empty() {
            continue;
        }
        if stop_words.iter().any(|s| s == tok) {
            continue;
        }
        out.push(tok.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FtConfig {
        FtConfig::default()
    }

    #[test]
    fn tokenizer_splits_and_filters() {
        let toks = tokenize("Fast, red car!", &["a".to_string()]);
        assert_eq!(toks, vec!["fast", "red", "car"]);
    }

    #[test]
    fn add_doc_builds_suffixes() {
        let mut data = FtIndexData::new(1);
        data.add_doc(1, &[tokenize("fast red car", &[])], &cfg());
        assert_eq!(data.words.len(), 3);
        assert_eq!(data.steps.len(), 1);
        // "car" suffixes: car, ar, r -> every word contributes len suffixes
        let total: usize = data.words.iter().map(|w| w.word.chars().count()).sum();
        assert_eq!(data.steps[0].suffixes.len(), total);

        // prefix lookup finds the word
        let hits: Vec<_> = data.lookup_suffixes(&data.steps[0], "fa").collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(data.word(hits[0].word_id).word, "fast");
    }

    #[test]
    fn suffix_lookup_matches_infixes() {
        let mut data = FtIndexData::new(1);
        data.add_doc(1, &[tokenize("carpet", &[])], &cfg());
        // "pet" is a suffix of carpet starting at offset 3
        let hits: Vec<_> = data.lookup_suffixes(&data.steps[0], "pet").collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].offset, 3);
    }

    #[test]
    fn typos_are_deletions() {
        let mut seen = Vec::new();
        generate_typos("cat", 1, &mut |t, lvl| {
            seen.push((t.to_string(), lvl));
        });
        assert!(seen.iter().any(|(t, _)| t == "at"));
        assert!(seen.iter().any(|(t, _)| t == "ct"));
        assert!(seen.iter().any(|(t, _)| t == "ca"));
    }

    #[test]
    fn tombstone_updates_stats() {
        let mut data = FtIndexData::new(1);
        data.add_doc(1, &[tokenize("red car", &[])], &cfg());
        data.add_doc(2, &[tokenize("blue car", &[])], &cfg());
        assert_eq!(data.avg_words_in_field(0), 2.0);
        data.remove_doc(1);
        assert_eq!(data.avg_words_in_field(0), 2.0);
        assert!(data.doc_for_row(1).is_none());
        assert!(data.doc_for_row(2).is_some());
    }
}
