use crate::tokenizer::tokenize;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

pub type DocId = u32;

/// The three text fields a record contributes to ranking.
///
/// Missing fields are treated as empty strings.
pub trait Searchable {
    fn title(&self) -> Option<&str>;
    /// Institution, authors, or another short secondary label.
    fn secondary(&self) -> Option<&str>;
    fn body(&self) -> Option<&str>;

    fn searchable_text(&self) -> String {
        format!(
            "{} {} {}",
            self.title().unwrap_or(""),
            self.secondary().unwrap_or(""),
            self.body().unwrap_or("")
        )
    }
}

impl Searchable for serde_json::Value {
    fn title(&self) -> Option<&str> { self.get("title").and_then(|v| v.as_str()) }
    fn secondary(&self) -> Option<&str> { self.get("institution").and_then(|v| v.as_str()) }
    fn body(&self) -> Option<&str> { self.get("content").and_then(|v| v.as_str()) }
}

#[derive(Debug, Clone)]
pub struct Document<R> {
    pub id: DocId,
    pub record: R,
    pub tokens: Vec<String>,
    pub length: usize,
    pub term_freqs: HashMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_documents: usize,
    pub average_doc_length: f64,
    pub vocabulary_size: usize,
    pub k1: f64,
    pub b: f64,
}

/// Per-request term statistics over a batch of records.
///
/// `average_doc_length` is filled in lazily by the first query and is only recomputed
/// while it still reads `0.0`. Documents added after that point do not update it.
#[derive(Debug)]
pub struct Corpus<R> {
    documents: Vec<Document<R>>,
    document_freqs: HashMap<String, u32>,
    total_documents: usize,
    average_doc_length: Cell<f64>,
}

impl<R> Default for Corpus<R> {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            document_freqs: HashMap::new(),
            total_documents: 0,
            average_doc_length: Cell::new(0.0),
        }
    }
}

impl<R: Searchable> Corpus<R> {
    pub fn new() -> Self { Self::default() }

    /// Build a corpus from records, using their position as the document id.
    pub fn from_records<I: IntoIterator<Item = R>>(records: I) -> Self {
        let mut corpus = Self::new();
        for (idx, record) in records.into_iter().enumerate() {
            corpus.add_document(record, idx as DocId);
        }
        corpus
    }

    pub fn add_document(&mut self, record: R, id: DocId) {
        let tokens = tokenize(&record.searchable_text());
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }
        let unique: HashSet<&String> = tokens.iter().collect();
        for term in unique {
            *self.document_freqs.entry(term.clone()).or_insert(0) += 1;
        }
        let length = tokens.len();
        self.documents.push(Document { id, record, tokens, length, term_freqs });
        self.total_documents += 1;
    }
}

impl<R> Corpus<R> {
    pub fn documents(&self) -> &[Document<R>] { &self.documents }

    pub fn total_documents(&self) -> usize { self.total_documents }

    pub fn is_empty(&self) -> bool { self.total_documents == 0 }

    pub fn document_frequency(&self, term: &str) -> u32 {
        self.document_freqs.get(term).copied().unwrap_or(0)
    }

    pub fn vocabulary_size(&self) -> usize { self.document_freqs.len() }

    /// Current average length, `0.0` until the first query has been scored.
    pub fn average_doc_length(&self) -> f64 { self.average_doc_length.get() }

    /// Compute the average length if it is still unset and return it.
    pub fn ensure_average_doc_length(&self) -> f64 {
        if self.average_doc_length.get() == 0.0 && self.total_documents > 0 {
            let total: usize = self.documents.iter().map(|d| d.length).sum();
            self.average_doc_length.set(total as f64 / self.total_documents as f64);
        }
        self.average_doc_length.get()
    }

    pub fn reset(&mut self) {
        self.documents.clear();
        self.document_freqs.clear();
        self.total_documents = 0;
        self.average_doc_length.set(0.0);
    }
}
