//! BM25 ranking over per-request corpora, plus the cache-aside layer that fronts
//! every expensive read.

pub mod cache;
pub mod corpus;
pub mod highlight;
pub mod ranker;
pub mod records;
pub mod scorer;
pub mod tokenizer;

pub use corpus::{Corpus, CorpusStats, DocId, Document, Searchable};
pub use ranker::{Ranked, RankedHit, RankedPage, ScoredResult};
pub use scorer::Bm25;
