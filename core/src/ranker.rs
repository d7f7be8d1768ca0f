use crate::corpus::{Corpus, DocId, Document};
use crate::scorer::Bm25;
use crate::tokenizer::tokenize;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ScoredResult<'a, R> {
    pub document: &'a Document<R>,
    pub raw_score: f64,
    /// Min-max scaled over the returned set.
    pub normalized_score: f64,
}

#[derive(Debug)]
pub struct Ranked<'a, R> {
    /// Matching documents before truncation.
    pub total: usize,
    pub results: Vec<ScoredResult<'a, R>>,
}

/// Serializable view of a ranked hit: the normalized score rounded to three decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit<R> {
    pub doc_id: DocId,
    pub score: f64,
    #[serde(flatten)]
    pub record: R,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPage<R> {
    pub total: usize,
    pub results: Vec<RankedHit<R>>,
}

impl<R> Default for RankedPage<R> {
    fn default() -> Self { Self { total: 0, results: Vec::new() } }
}

impl Bm25 {
    /// Score every document, drop zero scores, sort descending (stable), truncate and normalize.
    pub fn search<'a, R>(&self, corpus: &'a Corpus<R>, query: &str, limit: usize) -> Ranked<'a, R> {
        if corpus.is_empty() {
            return Ranked { total: 0, results: Vec::new() };
        }
        let query_terms = tokenize(query);
        let mut results: Vec<ScoredResult<'a, R>> = corpus
            .documents()
            .iter()
            .filter_map(|doc| {
                let raw_score = self.score(&query_terms, doc, corpus);
                (raw_score != 0.0).then_some(ScoredResult { document: doc, raw_score, normalized_score: 0.0 })
            })
            .collect();
        results.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score));
        let total = results.len();
        results.truncate(limit);
        normalize(&mut results);
        Ranked { total, results }
    }
}

fn normalize<R>(results: &mut [ScoredResult<'_, R>]) {
    let (min, max) = results.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
        (lo.min(r.raw_score), hi.max(r.raw_score))
    });
    for r in results.iter_mut() {
        r.normalized_score = if max == min { 1.0 } else { (r.raw_score - min) / (max - min) };
    }
}

pub fn round3(x: f64) -> f64 { (x * 1000.0).round() / 1000.0 }

impl<'a, R: Clone> Ranked<'a, R> {
    pub fn into_page(self) -> RankedPage<R> {
        self.into_page_with(|doc| doc.record.clone())
    }
}

impl<'a, R> Ranked<'a, R> {
    /// Build the response page, mapping each document into the presented record type.
    pub fn into_page_with<T, F>(self, mut f: F) -> RankedPage<T>
    where
        F: FnMut(&'a Document<R>) -> T,
    {
        let results = self
            .results
            .into_iter()
            .map(|r| RankedHit { doc_id: r.document.id, score: round3(r.normalized_score), record: f(r.document) })
            .collect();
        RankedPage { total: self.total, results }
    }
}
