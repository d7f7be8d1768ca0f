use anyhow::Result;
use scholar_core::records::load_records;
use scholar_core::Searchable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

/// Ids arrive as strings or integers depending on where the rows were exported from.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default, alias = "journal_ref")]
    pub journal: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default, alias = "pdf_url")]
    pub pdf: Option<String>,
    #[serde(default)]
    pub update_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

impl Searchable for Paper {
    fn title(&self) -> Option<&str> { Some(&self.title) }
    fn secondary(&self) -> Option<&str> { self.authors.as_deref() }
    fn body(&self) -> Option<&str> { self.abstract_text.as_deref() }
}

impl Searchable for Article {
    fn title(&self) -> Option<&str> { Some(&self.title) }
    fn secondary(&self) -> Option<&str> { self.institution.as_deref() }
    fn body(&self) -> Option<&str> { self.content.as_deref() }
}

pub trait Record: Searchable + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
    /// Listing order: newest first.
    fn listing_cmp(&self, other: &Self) -> Ordering;
}

impl Record for Paper {
    fn id(&self) -> &str { &self.id }
    fn listing_cmp(&self, other: &Self) -> Ordering { other.update_date.cmp(&self.update_date) }
}

impl Record for Article {
    fn id(&self) -> &str { &self.id }
    fn listing_cmp(&self, other: &Self) -> Ordering { other.year.cmp(&self.year) }
}

/// Backing data source for one content set.
///
/// `candidates` returns every record in source order; it is the input to a ranked search.
pub trait RecordSource<R>: Send + Sync {
    fn list(&self, offset: usize, limit: usize) -> Result<Vec<R>>;
    fn get(&self, id: &str) -> Result<Option<R>>;
    fn count(&self) -> Result<usize>;
    fn candidates(&self) -> Result<Vec<R>>;
}

/// Records held in memory after loading JSON/JSONL exports at startup.
pub struct JsonSource<R> {
    records: Vec<R>,
    listing: Vec<usize>,
    by_id: HashMap<String, usize>,
}

impl<R: Record> JsonSource<R> {
    pub fn new(records: Vec<R>) -> Self {
        let mut listing: Vec<usize> = (0..records.len()).collect();
        listing.sort_by(|&a, &b| records[a].listing_cmp(&records[b]));
        let by_id = records.iter().enumerate().map(|(i, r)| (Record::id(r).to_string(), i)).collect();
        Self { records, listing, by_id }
    }

    /// Load `<dir>/<name>.jsonl`, `<dir>/<name>.json` or `<dir>/<name>/`; empty when none exist.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let candidates = [dir.join(format!("{name}.jsonl")), dir.join(format!("{name}.json")), dir.join(name)];
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => {
                let records: Vec<R> = load_records(path)?;
                tracing::info!(collection = name, records = records.len(), path = %path.display(), "loaded collection");
                Ok(Self::new(records))
            }
            None => {
                tracing::warn!(collection = name, dir = %dir.display(), "no data found; collection is empty");
                Ok(Self::new(Vec::new()))
            }
        }
    }
}

impl<R: Record> RecordSource<R> for JsonSource<R> {
    fn list(&self, offset: usize, limit: usize) -> Result<Vec<R>> {
        Ok(self.listing.iter().skip(offset).take(limit).map(|&i| self.records[i].clone()).collect())
    }

    fn get(&self, id: &str) -> Result<Option<R>> {
        Ok(self.by_id.get(id).map(|&i| self.records[i].clone()))
    }

    fn count(&self) -> Result<usize> { Ok(self.records.len()) }

    fn candidates(&self) -> Result<Vec<R>> { Ok(self.records.clone()) }
}
