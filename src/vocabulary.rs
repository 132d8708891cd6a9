//! Event vocabulary: mapping observed event triples to small integer codes
//!
//! An event is identified by the triple (emitter, description, weight). The
//! vocabulary turns the open-ended space of triples into a bounded code
//! alphabet, in one of two mutually exclusive modes:
//!
//! - **Discovery**: [`Vocabulary::observe`] assigns codes on the fly and,
//!   once the capacity is reached, evicts the entry with the lowest
//!   priority. Priority grows with how often a triple has been seen, with
//!   a monotonic counter breaking ties toward recently touched entries.
//! - **Explicit**: [`Vocabulary::define`] takes caller-chosen codes and
//!   refuses to mix with discovery.
//!
//! An optional reverse string table keeps the original emitter and
//! description strings with a reference count, so hashes can be rendered
//! back for reporting.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Result, TempoError};
use crate::hash::hash_str;
use crate::stream::{BinaryImage, Cursor};

/// Default capacity of a discovery-mode vocabulary.
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Priority weight of one observation. Close enough to 2^31 that a
/// higher-seen entry always outranks a lower-seen one regardless of age.
pub const PRIORITY_SEEN_FACTOR: u64 = 2_000_000_000;

/// 10^(digits) at which event weights are rounded for comparison.
pub const WEIGHT_PRECISION: f64 = 10_000.0;

/// The identity of an event class: hashed emitter and description plus the
/// quantized weight. Quantizing makes the ordering platform-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub emitter: u64,
    pub description: u64,
    pub weight_q: i64,
}

impl EventKey {
    pub fn new(emitter: u64, description: u64, weight: f64) -> Self {
        Self {
            emitter,
            description,
            weight_q: (weight * WEIGHT_PRECISION).round() as i64,
        }
    }
}

/// The metrics tracked per event key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventEntry {
    /// Number of times the event has been seen.
    pub seen: u64,
    /// The code identifying the event. Positive; 0 is the "unknown" sentinel.
    pub code: u64,
    /// Current key into the priority index (0 for explicit entries).
    pub priority: u64,
}

#[derive(Debug, Clone)]
struct StringUsage {
    seen: u64,
    text: String,
}

/// A bounded vocabulary of event codes.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    store_strings: bool,
    max_events: usize,
    priority_counter: u64,
    next_code: u64,
    names: BTreeMap<u64, StringUsage>,
    events: BTreeMap<EventKey, EventEntry>,
    priority: BTreeMap<u64, EventKey>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            store_strings: true,
            max_events: DEFAULT_MAX_EVENTS,
            priority_counter: 0,
            next_code: 0,
            names: BTreeMap::new(),
            events: BTreeMap::new(),
            priority: BTreeMap::new(),
        }
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep (or stop keeping) the original strings behind the hashes.
    pub fn set_store_strings(&mut self, store: bool) {
        self.store_strings = store;
    }

    /// Capacity of discovery mode. Applies to future [`observe`] calls.
    ///
    /// [`observe`]: Vocabulary::observe
    pub fn set_max_events(&mut self, max_events: usize) {
        self.max_events = max_events;
    }

    /// Number of event classes currently held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Register a string in the reverse table (when enabled) and return its
    /// hash. The empty string maps to the sentinel 0 and is not stored.
    pub fn intern(&mut self, text: &str) -> u64 {
        let hash = hash_str(text);

        if hash != 0 && self.store_strings {
            self.names
                .entry(hash)
                .and_modify(|usage| usage.seen += 1)
                .or_insert_with(|| StringUsage {
                    seen: 1,
                    text: text.to_string(),
                });
        }

        hash
    }

    /// Drop one reference to a stored string, removing it at zero.
    fn release(&mut self, hash: u64) {
        if !self.store_strings {
            return;
        }

        if let Some(usage) = self.names.get_mut(&hash) {
            usage.seen -= 1;
            if usage.seen == 0 {
                self.names.remove(&hash);
            }
        }
    }

    /// Render a hash back to its original string, if the table holds it.
    pub fn string_of(&self, hash: u64) -> Option<&str> {
        self.names.get(&hash).map(|usage| usage.text.as_str())
    }

    /// Process one row in discovery mode. Never fails: unknown triples are
    /// admitted (evicting the lowest-priority entry at capacity) and known
    /// ones get their priority refreshed.
    pub fn observe(&mut self, emitter: &str, description: &str, weight: f64) {
        let key = EventKey::new(self.intern(emitter), self.intern(description), weight);

        if let Some(entry) = self.events.get_mut(&key) {
            entry.seen += 1;

            self.priority.remove(&entry.priority);
            self.priority_counter += 1;
            entry.priority = self.priority_counter + PRIORITY_SEEN_FACTOR * entry.seen;
            self.priority.insert(entry.priority, key);

            return;
        }

        if self.events.len() >= self.max_events {
            if let Some((low_priority, low_key)) = self.priority.pop_first() {
                debug!(priority = low_priority, "evicting lowest-priority event");

                self.release(low_key.description);
                self.release(low_key.emitter);
                self.events.remove(&low_key);
            }
        }

        self.priority_counter += 1;
        self.next_code += 1;

        let entry = EventEntry {
            seen: 1,
            code: self.next_code,
            priority: self.priority_counter + PRIORITY_SEEN_FACTOR,
        };

        self.events.insert(key, entry);
        self.priority.insert(entry.priority, key);
    }

    /// Define an event explicitly with a caller-chosen code.
    ///
    /// Fails if the triple is already defined (either mode) or discovery
    /// has been used on this vocabulary.
    pub fn define(&mut self, emitter: &str, description: &str, weight: f64, code: u64) -> Result<()> {
        let key = EventKey::new(self.intern(emitter), self.intern(description), weight);

        if self.events.contains_key(&key) {
            return Err(TempoError::DuplicateEvent);
        }
        if !self.priority.is_empty() {
            return Err(TempoError::ModeMixed);
        }

        self.events.insert(
            key,
            EventEntry {
                seen: 1,
                code,
                priority: 0,
            },
        );

        Ok(())
    }

    /// The code assigned to a triple, or 0 when the triple is unknown.
    pub fn code_of(&self, key: &EventKey) -> u64 {
        self.events.get(key).map_or(0, |entry| entry.code)
    }

    /// The set of codes currently assigned.
    pub fn codes(&self) -> std::collections::BTreeSet<u64> {
        self.events.values().map(|entry| entry.code).collect()
    }

    /// Drop every event whose code is not in `keep`, together with its
    /// priority entry. Returns how many events were removed. Used by the
    /// optimizer to discard codes that never occur in the timelines.
    pub fn retain_codes(&mut self, keep: &std::collections::BTreeSet<u64>) -> usize {
        let doomed: Vec<EventKey> = self
            .events
            .iter()
            .filter(|(_, entry)| !keep.contains(&entry.code))
            .map(|(key, _)| *key)
            .collect();

        for key in &doomed {
            if let Some(entry) = self.events.remove(key) {
                if entry.priority != 0 {
                    self.priority.remove(&entry.priority);
                }
            }
        }

        doomed.len()
    }

    /// Rewrite every code as `dict[code] - base`. Codes missing from the
    /// dictionary are left untouched. Used by the optimizer finalization.
    pub fn rebase_codes(&mut self, dict: &BTreeMap<u64, u64>, base: u64) {
        for entry in self.events.values_mut() {
            if let Some(&mapped) = dict.get(&entry.code) {
                entry.code = mapped - base;
            }
        }
    }

    pub fn save(&self, image: &mut BinaryImage) {
        image.put_section("events");
        image.put_bool(self.store_strings);
        image.put_u64(self.max_events as u64);
        image.put_u64(self.priority_counter);
        image.put_u64(self.next_code);

        image.put_section("names_map");
        image.put_u64(self.names.len() as u64);
        for (hash, usage) in &self.names {
            image.put_u64(*hash);
            image.put_u64(usage.seen);
            image.put_str(&usage.text);
        }

        image.put_section("event");
        image.put_u64(self.events.len() as u64);
        for (key, entry) in &self.events {
            image.put_u64(key.emitter);
            image.put_u64(key.description);
            image.put_i64(key.weight_q);
            image.put_u64(entry.seen);
            image.put_u64(entry.code);
            image.put_u64(entry.priority);
        }

        image.put_section("priority");
        image.put_u64(self.priority.len() as u64);
        for (priority, key) in &self.priority {
            image.put_u64(*priority);
            image.put_u64(key.emitter);
            image.put_u64(key.description);
            image.put_i64(key.weight_q);
        }

        image.put_section("end");
    }

    /// Load from a stream at `cursor`. The destination containers must be
    /// empty; on any error the object is left partially populated and must
    /// be discarded by the caller.
    pub fn load(&mut self, image: &BinaryImage, cursor: &mut Cursor) -> Result<()> {
        image.expect_section(cursor, "events")?;
        self.store_strings = image.get_bool(cursor)?;
        self.max_events = image.get_u64(cursor)? as usize;
        self.priority_counter = image.get_u64(cursor)?;
        self.next_code = image.get_u64(cursor)?;

        image.expect_section(cursor, "names_map")?;
        if !self.names.is_empty() {
            return Err(TempoError::NotEmpty("string table"));
        }
        let num_names = image.get_u64(cursor)?;
        for _ in 0..num_names {
            let hash = image.get_u64(cursor)?;
            let seen = image.get_u64(cursor)?;
            let text = image.get_str(cursor)?;
            self.names.insert(hash, StringUsage { seen, text });
        }

        image.expect_section(cursor, "event")?;
        if !self.events.is_empty() {
            return Err(TempoError::NotEmpty("event map"));
        }
        let num_events = image.get_u64(cursor)?;
        for _ in 0..num_events {
            let key = EventKey {
                emitter: image.get_u64(cursor)?,
                description: image.get_u64(cursor)?,
                weight_q: image.get_i64(cursor)?,
            };
            let entry = EventEntry {
                seen: image.get_u64(cursor)?,
                code: image.get_u64(cursor)?,
                priority: image.get_u64(cursor)?,
            };
            self.events.insert(key, entry);
        }

        image.expect_section(cursor, "priority")?;
        if !self.priority.is_empty() {
            return Err(TempoError::NotEmpty("priority index"));
        }
        let num_priorities = image.get_u64(cursor)?;
        for _ in 0..num_priorities {
            let priority = image.get_u64(cursor)?;
            let key = EventKey {
                emitter: image.get_u64(cursor)?,
                description: image.get_u64(cursor)?,
                weight_q: image.get_i64(cursor)?,
            };
            self.priority.insert(priority, key);
        }

        image.expect_section(cursor, "end")
    }

    #[cfg(test)]
    fn entry(&self, emitter: &str, description: &str, weight: f64) -> Option<EventEntry> {
        let key = EventKey::new(hash_str(emitter), hash_str(description), weight);
        self.events.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_eviction() {
        let mut vocab = Vocabulary::new();
        vocab.set_max_events(2);

        vocab.observe("a", "a", 1.0);
        vocab.observe("b", "b", 1.0);
        vocab.observe("c", "c", 1.0);

        // (a,a,1) was the oldest single-seen entry.
        assert_eq!(vocab.len(), 2);
        assert!(vocab.entry("a", "a", 1.0).is_none());
        assert!(vocab.entry("b", "b", 1.0).is_some());
        assert!(vocab.entry("c", "c", 1.0).is_some());

        vocab.observe("b", "b", 1.0);
        vocab.observe("d", "d", 1.0);

        // (c,c,1) ties (d,d,1) on seen but carries the older counter.
        assert!(vocab.entry("c", "c", 1.0).is_none());
        let b = vocab.entry("b", "b", 1.0).unwrap();
        let d = vocab.entry("d", "d", 1.0).unwrap();
        assert_eq!(b.seen, 2);
        assert_eq!(d.seen, 1);
    }

    #[test]
    fn test_priority_index_matches_event_map() {
        let mut vocab = Vocabulary::new();
        vocab.set_max_events(3);

        for _ in 0..4 {
            vocab.observe("x", "x", 1.0);
        }
        vocab.observe("y", "y", 2.0);
        vocab.observe("z", "z", 3.0);
        vocab.observe("w", "w", 4.0);

        assert_eq!(vocab.len(), vocab.priority.len());
        for entry in vocab.events.values() {
            assert!(vocab.priority.contains_key(&entry.priority));
        }
    }

    #[test]
    fn test_mode_mixing() {
        let mut vocab = Vocabulary::new();

        assert!(vocab.define("a", "a", 1.0, 100).is_ok());
        assert!(matches!(
            vocab.define("a", "a", 1.0, 100),
            Err(TempoError::DuplicateEvent)
        ));

        // Discovery is still allowed: the priority index is empty.
        vocab.observe("b", "b", 1.0);

        assert!(matches!(
            vocab.define("c", "c", 1.0, 200),
            Err(TempoError::ModeMixed)
        ));
    }

    #[test]
    fn test_unknown_lookup_is_zero() {
        let vocab = Vocabulary::new();
        let key = EventKey::new(hash_str("nope"), hash_str("nope"), 1.0);
        assert_eq!(vocab.code_of(&key), 0);
    }

    #[test]
    fn test_weight_quantization() {
        let mut vocab = Vocabulary::new();
        vocab.observe("a", "a", 1.0);
        // Within rounding distance: same key.
        vocab.observe("a", "a", 1.00001);
        assert_eq!(vocab.len(), 1);
        assert_eq!(vocab.entry("a", "a", 1.0).unwrap().seen, 2);
        // Outside rounding distance: a new key.
        vocab.observe("a", "a", 1.0001);
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn test_string_table_refcounts() {
        let mut vocab = Vocabulary::new();
        vocab.set_max_events(1);

        vocab.observe("shared", "one", 1.0);
        assert_eq!(vocab.string_of(hash_str("shared")), Some("shared"));

        // Evicting the only entry releases both strings.
        vocab.observe("other", "two", 1.0);
        assert_eq!(vocab.string_of(hash_str("shared")), None);
        assert_eq!(vocab.string_of(hash_str("one")), None);
        assert_eq!(vocab.string_of(hash_str("other")), Some("other"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut vocab = Vocabulary::new();
        vocab.set_max_events(10);
        vocab.observe("a", "login", 1.0);
        vocab.observe("a", "login", 1.0);
        vocab.observe("b", "purchase", 2.5);

        let mut image = BinaryImage::new();
        vocab.save(&mut image);

        let mut restored = Vocabulary::new();
        let mut cursor = Cursor::default();
        restored.load(&image, &mut cursor).unwrap();

        assert_eq!(restored.len(), vocab.len());
        assert_eq!(restored.next_code, vocab.next_code);
        assert_eq!(restored.priority_counter, vocab.priority_counter);
        assert_eq!(restored.events, vocab.events);
        assert_eq!(restored.priority, vocab.priority);
        assert_eq!(restored.string_of(hash_str("login")), Some("login"));

        // Saving the restored copy reproduces the stream byte for byte.
        let mut second = BinaryImage::new();
        restored.save(&mut second);
        assert_eq!(second, image);

        // Loading into a non-empty vocabulary is rejected.
        let mut cursor = Cursor::default();
        assert!(matches!(
            vocab.load(&image, &mut cursor),
            Err(TempoError::NotEmpty(_))
        ));
    }
}
