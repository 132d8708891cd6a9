//! Per-client timelines built from a transaction firehose
//!
//! A timeline is the ordered map from event timestamps to event codes for
//! one client. The store owns the roster that gates ingestion and the
//! vocabulary that resolves event triples, so a single [`scan`] call can
//! take a raw transaction row end to end: filter, resolve, parse, insert.
//! A bad row never aborts a batch; it is dropped and `scan` reports false.
//!
//! [`scan`]: TimelineStore::scan

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::error::{Result, TempoError};
use crate::hash::hash_str;
use crate::roster::Roster;
use crate::stream::{BinaryImage, Cursor};
use crate::vocabulary::{EventKey, Vocabulary};

/// One client's ordered sequence of events: timestamp -> code.
pub type Timeline = BTreeMap<i64, u64>;

/// All timelines, keyed by client id hash.
pub type TimelineMap = BTreeMap<u64, Timeline>;

/// Timestamp format used when none is configured.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a timestamp under a strftime-like format into whole seconds since
/// the Unix epoch, interpreted as UTC. Returns `None` for text that does
/// not parse or falls before the epoch.
pub fn parse_time(text: &str, format: &str) -> Option<i64> {
    let seconds = NaiveDateTime::parse_from_str(text, format)
        .ok()?
        .and_utc()
        .timestamp();

    (seconds >= 0).then_some(seconds)
}

/// Collapse every timeline in a map to states: drop entries whose code
/// repeats the immediately preceding one, keeping the earliest timestamp
/// of each run. Idempotent.
pub fn collapse_map(timelines: &mut TimelineMap) {
    for timeline in timelines.values_mut() {
        let mut last_code = None;
        timeline.retain(|_, code| {
            let keep = last_code != Some(*code);
            last_code = Some(*code);
            keep
        });
    }
}

/// The store of per-client timelines plus the roster and vocabulary that
/// gate what gets in.
#[derive(Debug, Clone)]
pub struct TimelineStore {
    roster: Roster,
    vocabulary: Vocabulary,
    timelines: TimelineMap,
    time_format: String,
}

impl TimelineStore {
    pub fn new(roster: Roster, vocabulary: Vocabulary) -> Self {
        Self {
            roster,
            vocabulary,
            timelines: TimelineMap::new(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }

    /// Set the strftime-like format used to parse transaction timestamps.
    pub fn set_time_format(&mut self, format: &str) {
        self.time_format = format.to_string();
    }

    pub fn time_format(&self) -> &str {
        &self.time_format
    }

    /// Ingest one transaction row. Returns false when the row is dropped:
    /// empty client, client outside a non-empty roster, event triple not
    /// in the vocabulary, or a timestamp that does not parse as a
    /// non-negative time.
    pub fn scan(
        &mut self,
        emitter: &str,
        description: &str,
        weight: f64,
        client: &str,
        time: &str,
    ) -> bool {
        if client.is_empty() {
            return false;
        }
        let client_hash = hash_str(client);

        if !self.roster.is_empty() && !self.roster.contains(client_hash) {
            return false;
        }

        let key = EventKey::new(
            self.vocabulary.intern(emitter),
            self.vocabulary.intern(description),
            weight,
        );
        let code = self.vocabulary.code_of(&key);
        if code == 0 {
            return false;
        }

        let Some(time_pt) = parse_time(time, &self.time_format) else {
            return false;
        };

        // Same-timestamp inserts overwrite.
        self.timelines.entry(client_hash).or_default().insert(time_pt, code);

        true
    }

    /// Collapse every timeline to states. See [`collapse_map`].
    pub fn collapse_to_states(&mut self) {
        collapse_map(&mut self.timelines);
    }

    /// Number of clients with at least one event.
    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }

    /// Total number of events across all timelines.
    pub fn num_points(&self) -> u64 {
        self.timelines.values().map(|t| t.len() as u64).sum()
    }

    pub fn timelines(&self) -> &TimelineMap {
        &self.timelines
    }

    /// Number of event classes in the owned vocabulary.
    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    /// Number of clients in the owned roster.
    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    pub(crate) fn timelines_mut(&mut self) -> &mut TimelineMap {
        &mut self.timelines
    }

    pub fn into_timelines(self) -> TimelineMap {
        self.timelines
    }

    pub fn save(&self, image: &mut BinaryImage) {
        image.put_section("clips");
        image.put_str(&self.time_format);

        self.roster.save(image);
        self.vocabulary.save(image);

        image.put_section("clip_map");
        image.put_u64(self.timelines.len() as u64);
        for (client_hash, timeline) in &self.timelines {
            image.put_u64(*client_hash);
            image.put_u64(timeline.len() as u64);
            for (&time_pt, &code) in timeline {
                image.put_i64(time_pt);
                image.put_u64(code);
            }
        }

        image.put_section("end");
    }

    pub fn load(&mut self, image: &BinaryImage, cursor: &mut Cursor) -> Result<()> {
        image.expect_section(cursor, "clips")?;
        self.time_format = image.get_str(cursor)?;

        self.roster.load(image, cursor)?;
        self.vocabulary.load(image, cursor)?;

        image.expect_section(cursor, "clip_map")?;
        if !self.timelines.is_empty() {
            return Err(TempoError::NotEmpty("timeline map"));
        }

        let num_clients = image.get_u64(cursor)?;
        for _ in 0..num_clients {
            let client_hash = image.get_u64(cursor)?;
            let num_points = image.get_u64(cursor)?;

            let mut timeline = Timeline::new();
            for _ in 0..num_points {
                let time_pt = image.get_i64(cursor)?;
                let code = image.get_u64(cursor)?;
                timeline.insert(time_pt, code);
            }

            self.timelines.insert(client_hash, timeline);
        }

        image.expect_section(cursor, "end")
    }
}
