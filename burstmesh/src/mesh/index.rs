//! Key index: which server owns the data of each api key.
//!
//! The index is eventually consistent across the mesh. Each node keeps its
//! own copy; batches arrive through `PUT /index` as sentence lines and
//! replace the local copy wholesale (last writer wins per batch).

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::sentence::SentenceTemplate;

/// Sentence carrying one index entry per line.
pub static INDEX_SENTENCE: LazyLock<SentenceTemplate> =
    LazyLock::new(|| SentenceTemplate::new("Api key %s is served by %s."));

/// One api key and the server that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The api key.
    pub api_key: String,
    /// Address of the owning server.
    pub server: String,
}

impl IndexEntry {
    /// Render the entry as one index sentence (without newline).
    pub fn to_sentence(&self) -> String {
        INDEX_SENTENCE.print(&[&self.api_key, &self.server])
    }
}

/// A parsed index batch.
#[derive(Debug, Default)]
pub struct IndexBatch {
    /// Entries keyed by api key; later lines win over earlier ones.
    pub entries: HashMap<String, String>,
    /// Number of lines that did not parse and were skipped.
    pub skipped: usize,
}

/// Parse a sentence-encoded batch, skipping malformed lines individually.
pub fn parse_index_batch(text: &str) -> IndexBatch {
    let mut batch = IndexBatch::default();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match INDEX_SENTENCE.scan(line) {
            Ok(fields) if fields.iter().all(|field| !field.is_empty()) => {
                let mut fields = fields.into_iter();
                if let (Some(api_key), Some(server)) = (fields.next(), fields.next()) {
                    batch.entries.insert(api_key, server);
                }
            }
            _ => {
                tracing::debug!(line, "Skipping malformed index line");
                batch.skipped += 1;
            }
        }
    }
    batch
}

/// In-memory api key → server mapping.
#[derive(Debug, Default)]
pub struct KeyIndex {
    entries: HashMap<String, String>,
}

impl KeyIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Owning server of `api_key`.
    pub fn lookup(&self, api_key: &str) -> Option<&str> {
        self.entries.get(api_key).map(String::as_str)
    }

    /// Set the owner of `api_key`, returning the previous owner.
    pub fn insert(&mut self, api_key: &str, server: &str) -> Option<String> {
        self.entries.insert(api_key.to_string(), server.to_string())
    }

    /// Replace the whole index. Returns `true` if the content changed.
    pub fn replace(&mut self, entries: HashMap<String, String>) -> bool {
        if self.entries == entries {
            return false;
        }
        self.entries = entries;
        true
    }

    /// All entries sorted by api key.
    pub fn entries(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self
            .entries
            .iter()
            .map(|(api_key, server)| IndexEntry {
                api_key: api_key.clone(),
                server: server.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.api_key.cmp(&b.api_key));
        entries
    }

    /// Serialize the whole index, one sentence per line.
    pub fn encode(&self) -> String {
        self.entries()
            .iter()
            .map(|entry| entry.to_sentence() + "\n")
            .collect()
    }

    /// Number of keys in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let batch = parse_index_batch(
            "Api key K1 is served by a:1.\nnot a sentence\n\n\
             Api key K2 is served by b:1.\nApi key  is served by c:1.\n",
        );
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.entries["K1"], "a:1");
        assert_eq!(batch.entries["K2"], "b:1");
        assert_eq!(batch.skipped, 2);
    }

    #[test]
    fn test_later_line_wins() {
        let batch = parse_index_batch("Api key K is served by a:1.\nApi key K is served by b:1.\n");
        assert_eq!(batch.entries["K"], "b:1");
    }

    #[test]
    fn test_replace_reports_change() {
        let mut index = KeyIndex::new();
        index.insert("OLD", "z:1");
        let batch = parse_index_batch("Api key K is served by a:1.\n");

        assert!(index.replace(batch.entries.clone()));
        assert_eq!(index.lookup("OLD"), None);
        assert_eq!(index.lookup("K"), Some("a:1"));
        assert!(!index.replace(batch.entries));
    }

    #[test]
    fn test_encode_is_parseable() {
        let mut index = KeyIndex::new();
        index.insert("B", "b:1");
        index.insert("A", "a:1");
        let encoded = index.encode();
        assert_eq!(
            encoded,
            "Api key A is served by a:1.\nApi key B is served by b:1.\n"
        );
        assert_eq!(parse_index_batch(&encoded).entries.len(), 2);
    }
}
