//! Deferred link records.
//!
//! Links met during the copy pass are not created immediately: their
//! targets may not exist in the destination yet. They are recorded here and
//! resolved once the destination tree is complete.

use crate::path;
use crate::{Error, Result};

/// A link to create in the destination once the walk is done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRecord {
    /// Destination group in which the link is created.
    pub from: String,
    /// Destination path of the link target (the node's canonical path).
    pub to: String,
    /// Leaf name of the link.
    pub name: String,
}

impl LinkRecord {
    #[must_use]
    pub fn new(from: &str, to: &str, name: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            name: name.to_string(),
        }
    }

    /// True when the link carries the same name as its target.
    #[must_use]
    pub fn has_default_name(&self) -> bool {
        path::leaf(&self.to) == self.name
    }

    /// Full destination path of the link itself.
    #[must_use]
    pub fn link_path(&self) -> String {
        path::join(&self.from, &self.name)
    }
}

/// Ordered table of pending links.
#[derive(Clone, Debug, Default)]
pub struct LinkTable {
    records: Vec<LinkRecord>,
    limit: Option<usize>,
}

impl LinkTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table that refuses to grow past `limit` entries.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            records: Vec::new(),
            limit: Some(limit),
        }
    }

    /// Append a record.
    ///
    /// # Errors
    /// Returns [`Error::TooManyLinks`] when the table is full.
    pub fn record(&mut self, record: LinkRecord) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.records.len() >= limit {
                return Err(Error::TooManyLinks(limit));
            }
        }
        self.records.push(record);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the table, yielding records in the order they were recorded.
    pub fn drain(&mut self) -> std::vec::Drain<'_, LinkRecord> {
        self.records.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_name_detection() {
        let record = LinkRecord::new("/entry/instrument/bank1", "/entry/bank1/data", "data");
        assert!(record.has_default_name());
        assert_eq!(record.link_path(), "/entry/instrument/bank1/data");

        let named = LinkRecord::new("/entry", "/entry/bank1/data", "counts");
        assert!(!named.has_default_name());
    }

    #[test]
    fn test_records_drain_in_order() {
        let mut table = LinkTable::new();
        table.record(LinkRecord::new("/a", "/b/x", "x")).unwrap();
        table.record(LinkRecord::new("/c", "/d/y", "y")).unwrap();
        let names: Vec<String> = table.drain().map(|r| r.name).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_limit_fails_fast() {
        let mut table = LinkTable::with_limit(1);
        table.record(LinkRecord::new("/a", "/b/x", "x")).unwrap();
        let err = table.record(LinkRecord::new("/a", "/b/y", "y")).unwrap_err();
        assert_eq!(err, Error::TooManyLinks(1));
        assert_eq!(table.len(), 1);
    }
}
