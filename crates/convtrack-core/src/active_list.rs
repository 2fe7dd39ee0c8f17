//! Ordered list of handlers currently eligible to converse.
//!
//! Most recently active first. The list is never re-sorted as a whole:
//! only promotion (front insert), uncertain tail-append and removal
//! change its order.
//!
//! Invariants held by every mutator:
//!
//! - at most one entry per `handler_id`
//! - the empty id is never stored

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// ─── Entry ───────────────────────────────────────────────────────────

/// One handler considered eligible to converse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHandlerEntry {
    pub handler_id: String,
    /// Most recent evidence that this handler was engaged.
    pub last_active_at: DateTime<Utc>,
}

impl ActiveHandlerEntry {
    pub fn new(handler_id: impl Into<String>, last_active_at: DateTime<Utc>) -> Self {
        Self {
            handler_id: handler_id.into(),
            last_active_at,
        }
    }

    /// Time elapsed since `last_active_at`. Negative if the entry is
    /// stamped in the future (clock skew from a remote snapshot).
    pub fn elapsed(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.last_active_at)
    }
}

/// Convert fractional seconds since the Unix epoch (bus wire format).
pub fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

/// Fractional seconds since the Unix epoch.
pub fn to_epoch_secs(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

// ─── List ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveHandlerList {
    entries: Vec<ActiveHandlerEntry>,
}

impl ActiveHandlerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from entries in the given order.
    ///
    /// Empty ids are dropped and only the first occurrence of a duplicated
    /// id is kept, so an authoritative snapshot cannot break the list
    /// invariants.
    pub fn from_entries(entries: impl IntoIterator<Item = ActiveHandlerEntry>) -> Self {
        let mut list = Self::new();
        for entry in entries {
            if entry.handler_id.is_empty() || list.contains(&entry.handler_id) {
                continue;
            }
            list.entries.push(entry);
        }
        list
    }

    pub fn entries(&self) -> &[ActiveHandlerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.position(handler_id).is_some()
    }

    pub fn get(&self, handler_id: &str) -> Option<&ActiveHandlerEntry> {
        self.entries.iter().find(|e| e.handler_id == handler_id)
    }

    /// Handler ids, most recently active first.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.handler_id.as_str())
    }

    /// Timestamp of the least recently active entry.
    pub fn tail_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.last_active_at)
    }

    fn position(&self, handler_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.handler_id == handler_id)
    }

    /// Move `handler_id` to the front, stamped `now`.
    ///
    /// Any previous entry for the same id is dropped first. Returns `false`
    /// (and leaves the list untouched) for the empty id.
    pub fn promote(&mut self, handler_id: &str, now: DateTime<Utc>) -> bool {
        if handler_id.is_empty() {
            return false;
        }
        self.remove(handler_id);
        self.entries.insert(0, ActiveHandlerEntry::new(handler_id, now));
        true
    }

    /// Remove the entry for `handler_id`, returning it if it was present.
    pub fn remove(&mut self, handler_id: &str) -> Option<ActiveHandlerEntry> {
        self.position(handler_id).map(|idx| self.entries.remove(idx))
    }

    /// Append a handler whose real recency is unknown.
    ///
    /// The entry goes to the tail, stamped with the current tail's timestamp
    /// (or `now` when the list is empty), so it never claims to be more
    /// recent than anything already tracked. Already-tracked and empty ids
    /// are left alone; returns whether an entry was appended.
    pub fn append_uncertain(&mut self, handler_id: &str, now: DateTime<Utc>) -> bool {
        if handler_id.is_empty() || self.contains(handler_id) {
            return false;
        }
        let ts = self.tail_timestamp().unwrap_or(now);
        self.entries.push(ActiveHandlerEntry::new(handler_id, ts));
        true
    }

    /// Drop every entry idle for strictly longer than `window`.
    ///
    /// An entry whose elapsed time equals the window is still eligible.
    /// Returns the removed entries in list order.
    pub fn expire(&mut self, now: DateTime<Utc>, window: TimeDelta) -> Vec<ActiveHandlerEntry> {
        let (kept, expired): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.elapsed(now) <= window);
        self.entries = kept;
        expired
    }
}
