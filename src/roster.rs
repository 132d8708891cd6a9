//! Client roster: the ordered list of client ids admitted for ingestion
//!
//! Clients are kept as 64-bit id hashes, both in definition order (so
//! predictions can be returned in the order the caller supplied) and in a
//! set for membership tests. An empty roster means "admit everyone".

use std::collections::BTreeSet;

use crate::error::{Result, TempoError};
use crate::hash::hash_str;
use crate::stream::{BinaryImage, Cursor};

/// An ordered collection of client id hashes with fast membership lookup.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    ids: Vec<u64>,
    id_set: BTreeSet<u64>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client id, preserving definition order.
    pub fn add(&mut self, client: &str) {
        let hash = hash_str(client);

        self.ids.push(hash);
        self.id_set.insert(hash);
    }

    pub fn contains(&self, client_hash: u64) -> bool {
        self.id_set.contains(&client_hash)
    }

    /// Client hashes in definition order.
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn save(&self, image: &mut BinaryImage) {
        image.put_section("clients");
        image.put_u64(self.ids.len() as u64);
        for &hash in &self.ids {
            image.put_u64(hash);
        }
        image.put_section("end");
    }

    pub fn load(&mut self, image: &BinaryImage, cursor: &mut Cursor) -> Result<()> {
        image.expect_section(cursor, "clients")?;
        if !self.ids.is_empty() || !self.id_set.is_empty() {
            return Err(TempoError::NotEmpty("roster"));
        }

        let num_ids = image.get_u64(cursor)?;
        for _ in 0..num_ids {
            let hash = image.get_u64(cursor)?;
            self.ids.push(hash);
            self.id_set.insert(hash);
        }

        image.expect_section(cursor, "end")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_membership() {
        let mut roster = Roster::new();
        roster.add("zoe");
        roster.add("abe");

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.ids()[0], hash_str("zoe"));
        assert_eq!(roster.ids()[1], hash_str("abe"));
        assert!(roster.contains(hash_str("zoe")));
        assert!(!roster.contains(hash_str("mia")));
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut roster = Roster::new();
        roster.add("one");
        roster.add("two");
        roster.add("one");

        let mut image = BinaryImage::new();
        roster.save(&mut image);

        let mut restored = Roster::new();
        let mut cursor = Cursor::default();
        restored.load(&image, &mut cursor).unwrap();

        assert_eq!(restored.ids(), roster.ids());

        let mut cursor = Cursor::default();
        assert!(matches!(
            restored.load(&image, &mut cursor),
            Err(TempoError::NotEmpty(_))
        ));
    }
}
