//! Okapi BM25 scoring against a [`Corpus`].

use crate::corpus::{Corpus, CorpusStats, Document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25 {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization.
    pub b: f64,
}

impl Default for Bm25 {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

impl Bm25 {
    pub fn new(k1: f64, b: f64) -> Self { Self { k1, b } }

    /// `ln((N - df + 0.5) / (df + 0.5))`, negative once a term is in more than half the corpus.
    pub fn idf<R>(&self, term: &str, corpus: &Corpus<R>) -> f64 {
        let n = corpus.total_documents() as f64;
        let df = corpus.document_frequency(term) as f64;
        ((n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Sum of per-term contributions. Must not be called on an empty corpus.
    pub fn score<R>(&self, query_terms: &[String], doc: &Document<R>, corpus: &Corpus<R>) -> f64 {
        let avg_len = corpus.ensure_average_doc_length();
        let mut score = 0.0;
        for term in query_terms {
            let tf = doc.term_freqs.get(term).copied().unwrap_or(0);
            let df = corpus.document_frequency(term);
            if tf > 0 && df > 0 {
                let tf = tf as f64;
                let numerator = tf * (self.k1 + 1.0);
                let denominator =
                    tf + self.k1 * (1.0 - self.b + self.b * (doc.length as f64 / avg_len));
                score += self.idf(term, corpus) * (numerator / denominator);
            }
        }
        score
    }

    pub fn stats<R>(&self, corpus: &Corpus<R>) -> CorpusStats {
        CorpusStats {
            total_documents: corpus.total_documents(),
            average_doc_length: corpus.average_doc_length(),
            vocabulary_size: corpus.vocabulary_size(),
            k1: self.k1,
            b: self.b,
        }
    }
}
