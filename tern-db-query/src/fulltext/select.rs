//! Ranked full-text selection
//!
//! Walks the per-step suffix arrays and typo maps for every term variant,
//! deduplicates matched words per term keeping the best match percent, then
//! merges postings per document: BM25 blended with positional rank and
//! term-length boost, proximity gating for AND terms, exclusion for NOT
//! terms, and the full-match bonus. Output is sorted by rank descending with
//! ascending-id tie-break for determinism.

use super::bm25::{bm25_score, bound, idf, pos2rank};
use super::parse::{FtQuery, FtTerm, TermOp};
use super::variants::{
    prepare_variants, PREFIX_MIN_PROC, SUFFIX_MIN_PROC, TYPO_PROC, TYPO_STEP_PROC,
};
use crate::error::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use tern_db_core::fulltext::{generate_typos, WordId};
use tern_db_core::{FtIndex, OpContext, RowId};
use tracing::debug;

/// One ranked document
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FtMergeEntry {
    pub row_id: RowId,
    pub rank: f64,
}

/// Best match of one word for one term
#[derive(Debug, Clone, Copy)]
struct FoundWord {
    word_id: WordId,
    proc: i32,
}

/// Per-document contribution of one term
#[derive(Debug, Clone)]
struct TermHit {
    rank: f64,
    field: u8,
    positions: Vec<(u8, u32)>,
}

/// Accumulated document state across terms
#[derive(Debug, Clone)]
struct MergeInfo {
    rank: f64,
    field: u8,
    last_positions: Vec<(u8, u32)>,
}

fn min_distance(a: &[(u8, u32)], b: &[(u8, u32)]) -> u32 {
    let mut best = u32::MAX;
    for (_, x) in a {
        for (_, y) in b {
            best = best.min(x.abs_diff(*y));
        }
    }
    best
}

/// Full-text selector over one built index
pub struct FtSelector<'a> {
    ft: &'a FtIndex,
    /// Names of the indexed fields, ordinal order
    field_names: Vec<String>,
}

impl<'a> FtSelector<'a> {
    pub fn new(ft: &'a FtIndex, field_names: Vec<String>) -> Self {
        Self { ft, field_names }
    }

    /// Run the pipeline for a parsed expression
    pub fn process(&self, query: &FtQuery, ctx: &OpContext) -> Result<Vec<FtMergeEntry>> {
        let cfg = &self.ft.config;
        let mut merged: FxHashMap<RowId, MergeInfo> = FxHashMap::default();
        let mut excluded: FxHashSet<RowId> = FxHashSet::default();
        let mut has_been_and = false;

        for term in &query.terms {
            ctx.check().map_err(crate::error::QueryError::Core)?;
            let words = self.lookup_term(term);
            debug!(term = %term.pattern, words = words.len(), "full-text term lookup");
            let hits = self.term_hits(term, &words);

            match term.op {
                TermOp::Not => {
                    for row in hits.keys() {
                        merged.remove(row);
                        excluded.insert(*row);
                    }
                }
                TermOp::And => {
                    let mut next: FxHashMap<RowId, MergeInfo> = FxHashMap::default();
                    for (row, hit) in hits {
                        if excluded.contains(&row) {
                            continue;
                        }
                        match merged.remove(&row) {
                            Some(info) => {
                                let dist = min_distance(&info.last_positions, &hit.positions);
                                if dist > term.distance {
                                    continue;
                                }
                                let norm_dist = bound(
                                    1.0 / f64::from(dist.max(1)),
                                    cfg.distance_weight,
                                    cfg.distance_boost,
                                );
                                next.insert(
                                    row,
                                    MergeInfo {
                                        rank: info.rank + hit.rank * norm_dist,
                                        field: hit.field,
                                        last_positions: hit.positions,
                                    },
                                );
                            }
                            None => {
                                // an AND term may introduce documents until
                                // a previous AND has constrained the set
                                if !has_been_and
                                    && merged.len() + next.len() < cfg.merge_limit
                                {
                                    next.insert(
                                        row,
                                        MergeInfo {
                                            rank: hit.rank,
                                            field: hit.field,
                                            last_positions: hit.positions,
                                        },
                                    );
                                }
                            }
                        }
                    }
                    merged = next;
                    has_been_and = true;
                }
                TermOp::Or => {
                    for (row, hit) in hits {
                        if excluded.contains(&row) {
                            continue;
                        }
                        match merged.get_mut(&row) {
                            Some(info) => {
                                // proximity to the previous term's match
                                // scales the contribution, so in-order
                                // phrases outrank shuffled ones
                                let dist = min_distance(&info.last_positions, &hit.positions);
                                let norm_dist = bound(
                                    1.0 / f64::from(dist.max(1)),
                                    cfg.distance_weight,
                                    cfg.distance_boost,
                                );
                                info.rank += hit.rank * norm_dist;
                                info.field = hit.field;
                                info.last_positions = hit.positions;
                            }
                            None => {
                                if !has_been_and && merged.len() < cfg.merge_limit {
                                    merged.insert(
                                        row,
                                        MergeInfo {
                                            rank: hit.rank,
                                            field: hit.field,
                                            last_positions: hit.positions,
                                        },
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        // full-match bonus: a driving field holding exactly as many words as
        // the query has positive terms is a whole-field match
        let positive_terms = query.terms.iter().filter(|t| t.op != TermOp::Not).count();
        let mut out: Vec<FtMergeEntry> = Vec::with_capacity(merged.len());
        for (row, info) in merged {
            if info.rank <= 0.0 {
                continue;
            }
            let mut rank = info.rank;
            if let Some(doc) = self.ft.data.doc_for_row(row) {
                if doc.words_count.get(info.field as usize).copied() == Some(positive_terms as u32)
                {
                    rank *= cfg.full_match_boost;
                }
            }
            out.push(FtMergeEntry { row_id: row, rank });
        }
        out.sort_unstable_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.row_id.cmp(&b.row_id))
        });
        out.truncate(cfg.merge_limit);
        Ok(out)
    }

    /// Suffix-array and typo lookup for one term, deduplicated by word with
    /// the best percent winning
    fn lookup_term(&self, term: &FtTerm) -> Vec<FoundWord> {
        let cfg = &self.ft.config;
        let data = &self.ft.data;
        let mut found: FxHashMap<WordId, i32> = FxHashMap::default();

        for variant in prepare_variants(term, cfg) {
            let match_len = variant.pattern.chars().count();
            for step in &data.steps {
                for hit in data.lookup_suffixes(step, &variant.pattern) {
                    let word_len = data.word_len(hit.word_id);
                    let suffix_len = hit.offset as usize;
                    if !variant.suffix_allowed && suffix_len > 0 {
                        continue;
                    }
                    if !variant.prefix_allowed && word_len != match_len + suffix_len {
                        continue;
                    }
                    let match_dif =
                        (word_len as i64 - match_len as i64 + suffix_len as i64).unsigned_abs();
                    let floor = if suffix_len > 0 {
                        SUFFIX_MIN_PROC
                    } else {
                        PREFIX_MIN_PROC
                    };
                    let proc = (variant.proc
                        - (cfg.partial_match_decrease as i64 * match_dif as i64
                            / match_len.max(3) as i64) as i32)
                        .max(floor);
                    found
                        .entry(hit.word_id)
                        .and_modify(|p| *p = (*p).max(proc))
                        .or_insert(proc);
                }
            }
        }

        let typos_enabled =
            !term.exact && (cfg.max_typos > 0 || term.typos_forced) && !term.pattern.is_empty();
        if typos_enabled && term.pattern.chars().count() <= cfg.max_typo_len {
            self.lookup_typos(term, &mut found);
        }

        found
            .into_iter()
            .map(|(word_id, proc)| FoundWord { word_id, proc })
            .collect()
    }

    fn lookup_typos(&self, term: &FtTerm, found: &mut FxHashMap<WordId, i32>) {
        let cfg = &self.ft.config;
        let data = &self.ft.data;
        let max_in_word = cfg.max_typos_in_word();
        // when the budget is odd, the max map would double-count pairs of
        // single-sided typos; skip it for length-changing level-1 typos
        let dont_use_max_typos_for_both = max_in_word != cfg.max_typos / 2;
        let pattern_size = term.pattern.chars().count();

        for step in &data.steps {
            let mut probe = |typo: &str, level: u32| {
                let tcount = (max_in_word - level) as i32;
                let maps = [&step.typos_half, &step.typos_max];
                for (i, map) in maps.iter().enumerate() {
                    if let Some(word_ids) = map.get(typo) {
                        for &word_id in word_ids {
                            let word_len = data.word_len(word_id) as i32;
                            let proc = TYPO_PROC
                                - tcount * TYPO_STEP_PROC / ((word_len - tcount) / 3).max(1);
                            found
                                .entry(word_id)
                                .and_modify(|p| *p = (*p).max(proc))
                                .or_insert(proc);
                        }
                    }
                    if i == 0
                        && dont_use_max_typos_for_both
                        && level == 1
                        && typo.chars().count() != pattern_size
                    {
                        break;
                    }
                }
            };
            // the unmodified pattern meets index-side deletions; generated
            // deletions meet shorter index words and their own deletions
            probe(&term.pattern, max_in_word);
            generate_typos(&term.pattern, max_in_word, &mut probe);
        }
    }

    /// Best per-document contribution across a term's matched words
    fn term_hits(&self, term: &FtTerm, words: &[FoundWord]) -> FxHashMap<RowId, TermHit> {
        let cfg = &self.ft.config;
        let data = &self.ft.data;
        let total_docs = data.total_docs();
        let mut hits: FxHashMap<RowId, TermHit> = FxHashMap::default();

        let mut sorted: Vec<&FoundWord> = words.iter().collect();
        sorted.sort_by(|a, b| b.proc.cmp(&a.proc));

        for fw in sorted {
            let word = data.word(fw.word_id);
            let word_idf = idf(total_docs, word.postings.len());
            for posting in &word.postings {
                let doc = &data.docs[posting.doc as usize];
                if doc.tombstone {
                    continue;
                }
                let mut best_rank = 0.0f64;
                let mut best_field = 0u8;
                let mut mask = posting.used_fields_mask();
                while mask != 0 {
                    let f = mask.trailing_zeros() as u8;
                    mask &= mask - 1;
                    let field_name = self.field_names.get(f as usize);
                    let fboost = if term.field_boosts.is_empty() {
                        1.0
                    } else {
                        field_name
                            .and_then(|n| term.field_boosts.get(n))
                            .copied()
                            .unwrap_or(0.0)
                    };
                    if fboost == 0.0 {
                        continue;
                    }
                    let fcfg = field_name
                        .map(|n| cfg.field_config(n))
                        .unwrap_or_default();
                    let bm = word_idf
                        * bm25_score(
                            posting.words_in_field(f),
                            doc.words_count[f as usize],
                            data.avg_words_in_field(f),
                        );
                    let norm_bm25 = bound(bm, fcfg.bm25_weight, fcfg.bm25_boost);
                    let pos_rank = bound(
                        pos2rank(posting.min_position_in_field(f)),
                        fcfg.position_weight,
                        fcfg.position_boost,
                    );
                    let term_len_boost = bound(1.0, fcfg.term_len_weight, fcfg.term_len_boost);
                    let rank = fboost
                        * (fw.proc as f64 / 100.0)
                        * norm_bm25
                        * term.boost
                        * term_len_boost
                        * pos_rank;
                    if rank > best_rank {
                        best_rank = rank;
                        best_field = f;
                    }
                }
                if best_rank <= 0.0 {
                    continue;
                }
                let entry = hits.entry(doc.row_id).or_insert_with(|| TermHit {
                    rank: 0.0,
                    field: best_field,
                    positions: posting.positions.clone(),
                });
                if best_rank > entry.rank {
                    entry.rank = best_rank;
                    entry.field = best_field;
                    entry.positions = posting.positions.clone();
                }
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulltext::parse::parse_ft_expression;
    use tern_db_core::fulltext::{tokenize, FtConfig, FtIndexData};

    fn index(docs: &[(RowId, &str)]) -> FtIndex {
        let cfg = FtConfig::default();
        let mut data = FtIndexData::new(1);
        for (row, text) in docs {
            data.add_doc(*row, &[tokenize(text, &cfg.stop_words)], &cfg);
        }
        FtIndex { config: cfg, data }
    }

    fn select(ft: &FtIndex, expr: &str) -> Vec<FtMergeEntry> {
        let sel = FtSelector::new(ft, vec!["title".to_string()]);
        sel.process(&parse_ft_expression(expr).unwrap(), &OpContext::new())
            .unwrap()
    }

    #[test]
    fn phrase_order_ranks_higher() {
        let ft = index(&[
            (1, "fast red car"),
            (2, "red car fast"),
            (3, "slow blue bike"),
        ]);
        let res = select(&ft, "fast red car");
        assert_eq!(res.len(), 2);
        let ids: Vec<RowId> = res.iter().map(|e| e.row_id).collect();
        assert!(ids.contains(&1) && ids.contains(&2));
        // doc 1 matches the term order; positional boost puts it first
        assert_eq!(res[0].row_id, 1);
        assert!(res[0].rank > res[1].rank);
    }

    #[test]
    fn not_term_excludes() {
        let ft = index(&[(1, "fast red car"), (2, "fast blue car")]);
        let res = select(&ft, "fast -blue");
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].row_id, 1);
    }

    #[test]
    fn and_term_requires_match() {
        let ft = index(&[(1, "fast red car"), (2, "fast bike")]);
        let res = select(&ft, "+fast +car");
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].row_id, 1);
    }

    #[test]
    fn prefix_wildcard_matches_longer_words() {
        let ft = index(&[(1, "carpet cleaner")]);
        assert!(select(&ft, "car").is_empty());
        let res = select(&ft, "car*");
        assert_eq!(res.len(), 1);
    }

    #[test]
    fn typo_lookup_finds_near_words() {
        let ft = index(&[(1, "elephant parade")]);
        // one deleted character
        let res = select(&ft, "elephnt");
        assert_eq!(res.len(), 1);
        // exact prefix disables typos
        assert!(select(&ft, "=elephnt").is_empty());
    }

    #[test]
    fn field_boost_monotonicity() {
        let ft = index(&[(1, "fast red car"), (2, "fast blue car")]);
        let base = select(&ft, "fast");
        let boosted = select(&ft, "@title^2.0 fast");
        for (b, a) in boosted.iter().zip(&base) {
            assert!(b.rank >= a.rank);
        }
    }

    #[test]
    fn rank_sort_breaks_ties_by_id() {
        let ft = index(&[(5, "red car"), (2, "red car")]);
        let res = select(&ft, "red car");
        assert_eq!(res[0].row_id, 2);
        assert_eq!(res[1].row_id, 5);
    }
}
