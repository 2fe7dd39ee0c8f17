//! Convergent merge of the local active list with an authoritative snapshot.
//!
//! Speculative updates (utterance resolution, self-announcements) can be
//! missed or arrive out of order. `merge` is the backstop: it is independent
//! of event ordering and can be re-run at any time.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::active_list::{ActiveHandlerEntry, ActiveHandlerList, from_epoch_secs, to_epoch_secs};

// ─── Snapshot ────────────────────────────────────────────────────────

/// Active handlers as reported by the intent service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveHandlersSnapshot {
    /// Every entry carries its own timestamp; authoritative as-is.
    Timestamped(Vec<ActiveHandlerEntry>),
    /// Ids only, most recently active first.
    Ordered(Vec<String>),
}

impl ActiveHandlersSnapshot {
    /// Parse the wire payload: an array of either bare ids or
    /// `[id, epoch_secs]` pairs.
    ///
    /// A fully paired array is `Timestamped`. Bare ids, or a mix of both,
    /// fall back to `Ordered` keeping the source order. Anything else
    /// (non-array, non-string ids, pairs of the wrong arity) is `None`.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let mut ids = Vec::with_capacity(items.len());
        let mut entries = Vec::with_capacity(items.len());
        let mut all_paired = true;

        for item in items {
            match item {
                Value::String(id) => {
                    all_paired = false;
                    ids.push(id.clone());
                }
                Value::Array(pair) if pair.len() == 2 => {
                    let id = pair[0].as_str()?;
                    let ts = pair[1].as_f64().and_then(from_epoch_secs)?;
                    ids.push(id.to_owned());
                    entries.push(ActiveHandlerEntry::new(id, ts));
                }
                _ => return None,
            }
        }

        if all_paired && !entries.is_empty() {
            Some(Self::Timestamped(entries))
        } else {
            Some(Self::Ordered(ids))
        }
    }

    /// Handler ids in snapshot order.
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Timestamped(entries) => entries.iter().map(|e| e.handler_id.as_str()).collect(),
            Self::Ordered(ids) => ids.iter().map(String::as_str).collect(),
        }
    }

    pub fn has_timestamps(&self) -> bool {
        matches!(self, Self::Timestamped(_))
    }
}

/// Serialize a list in the timestamped wire shape.
pub fn to_wire(list: &ActiveHandlerList) -> Value {
    Value::Array(
        list.entries()
            .iter()
            .map(|e| serde_json::json!([e.handler_id, to_epoch_secs(e.last_active_at)]))
            .collect(),
    )
}

// ─── Merge ───────────────────────────────────────────────────────────

/// Lifecycle changes produced by a merge, in the order they happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
    /// True when the whole list was replaced by a timestamped snapshot.
    pub replaced: bool,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        !self.replaced && self.activated.is_empty() && self.deactivated.is_empty()
    }
}

/// Merge `remote` into `local`.
///
/// - `Timestamped`: the snapshot replaces the list verbatim (modulo the
///   list invariants). No lifecycle changes are reported.
/// - `Ordered`: walk the ids from least to most recently active and
///   promote every id not tracked yet (stamped `now`), so the most recent
///   ends up in front. Already-tracked ids keep their local timestamp.
///   Then drop every local id the snapshot does not list.
///
/// The ordered path trusts the source ordering; if the remote list is not
/// really most-recent-first, the reconstructed order is wrong too.
pub fn merge(
    local: &ActiveHandlerList,
    remote: &ActiveHandlersSnapshot,
    now: DateTime<Utc>,
) -> (ActiveHandlerList, MergeOutcome) {
    match remote {
        ActiveHandlersSnapshot::Timestamped(entries) => {
            let list = ActiveHandlerList::from_entries(entries.iter().cloned());
            let outcome = MergeOutcome {
                replaced: true,
                ..MergeOutcome::default()
            };
            (list, outcome)
        }
        ActiveHandlersSnapshot::Ordered(ids) => {
            let mut list = local.clone();
            let mut outcome = MergeOutcome::default();

            for id in ids.iter().rev() {
                if !list.contains(id) && list.promote(id, now) {
                    outcome.activated.push(id.clone());
                }
            }

            let missing: Vec<String> = list
                .ids()
                .filter(|tracked| !ids.iter().any(|id| id == tracked))
                .map(str::to_owned)
                .collect();
            for id in missing {
                if list.remove(&id).is_some() {
                    outcome.deactivated.push(id);
                }
            }

            (list, outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn list(entries: &[(&str, i64)]) -> ActiveHandlerList {
        ActiveHandlerList::from_entries(
            entries
                .iter()
                .map(|(id, ts)| ActiveHandlerEntry::new(*id, at(*ts))),
        )
    }

    #[test]
    fn wire_pairs_are_timestamped() {
        let snap = ActiveHandlersSnapshot::from_wire(&json!([["timer", 105.0], ["weather", 100]]))
            .expect("valid payload");
        assert_eq!(
            snap,
            ActiveHandlersSnapshot::Timestamped(vec![
                ActiveHandlerEntry::new("timer", at(105)),
                ActiveHandlerEntry::new("weather", at(100)),
            ])
        );
    }

    #[test]
    fn wire_bare_ids_are_ordered() {
        // Two-character ids must not be mistaken for pairs.
        let snap = ActiveHandlersSnapshot::from_wire(&json!(["ab", "weather"])).expect("valid");
        assert_eq!(
            snap,
            ActiveHandlersSnapshot::Ordered(vec!["ab".into(), "weather".into()])
        );
        assert!(!snap.has_timestamps());
    }

    #[test]
    fn wire_mixed_falls_back_to_ordered() {
        let snap =
            ActiveHandlersSnapshot::from_wire(&json!([["timer", 105], "weather"])).expect("valid");
        assert_eq!(snap.ids(), vec!["timer", "weather"]);
        assert!(!snap.has_timestamps());
    }

    #[test]
    fn wire_empty_is_ordered_empty() {
        let snap = ActiveHandlersSnapshot::from_wire(&json!([])).expect("valid");
        assert_eq!(snap, ActiveHandlersSnapshot::Ordered(vec![]));
    }

    #[test]
    fn wire_malformed_is_none() {
        assert!(ActiveHandlersSnapshot::from_wire(&json!({"skills": []})).is_none());
        assert!(ActiveHandlersSnapshot::from_wire(&json!([["timer"]])).is_none());
        assert!(ActiveHandlersSnapshot::from_wire(&json!([[1, 2]])).is_none());
        assert!(ActiveHandlersSnapshot::from_wire(&json!([42])).is_none());
    }

    #[test]
    fn to_wire_emits_pairs() {
        let l = list(&[("timer", 105), ("weather", 100)]);
        assert_eq!(to_wire(&l), json!([["timer", 105.0], ["weather", 100.0]]));
    }

    #[test]
    fn timestamped_snapshot_replaces_list() {
        let local = list(&[("b", 50), ("c", 40)]);
        let remote = ActiveHandlersSnapshot::Timestamped(vec![
            ActiveHandlerEntry::new("a", at(90)),
            ActiveHandlerEntry::new("b", at(80)),
        ]);

        let (merged, outcome) = merge(&local, &remote, at(100));

        assert_eq!(merged, list(&[("a", 90), ("b", 80)]));
        assert!(outcome.replaced);
        assert!(outcome.activated.is_empty());
        assert!(outcome.deactivated.is_empty());
    }

    #[test]
    fn ordered_snapshot_converges_and_keeps_local_timestamps() {
        let local = list(&[("b", 50), ("c", 40)]);
        let remote = ActiveHandlersSnapshot::Ordered(vec!["a".into(), "b".into()]);

        let (merged, outcome) = merge(&local, &remote, at(100));

        let ids: Vec<&str> = merged.ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(merged.get("b").map(|e| e.last_active_at), Some(at(50)));
        assert_eq!(merged.get("a").map(|e| e.last_active_at), Some(at(100)));
        assert_eq!(outcome.activated, vec!["a".to_string()]);
        assert_eq!(outcome.deactivated, vec!["c".to_string()]);
        assert!(!outcome.replaced);
    }

    #[test]
    fn ordered_snapshot_puts_most_recent_first() {
        let local = ActiveHandlerList::new();
        let remote =
            ActiveHandlersSnapshot::Ordered(vec!["newest".into(), "middle".into(), "oldest".into()]);

        let (merged, outcome) = merge(&local, &remote, at(100));

        let ids: Vec<&str> = merged.ids().collect();
        assert_eq!(ids, vec!["newest", "middle", "oldest"]);
        assert_eq!(outcome.activated, vec!["oldest", "middle", "newest"]);
    }

    // An empty id-only reply is authoritative and clears the list. Earlier
    // trackers ignored an empty reply and kept stale handlers active.
    #[test]
    fn empty_ordered_snapshot_clears_list() {
        let local = list(&[("b", 50), ("c", 40)]);
        let (merged, outcome) = merge(&local, &ActiveHandlersSnapshot::Ordered(vec![]), at(100));

        assert!(merged.is_empty());
        assert_eq!(outcome.deactivated, vec!["b", "c"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let local = list(&[("b", 50), ("c", 40)]);
        let remote = ActiveHandlersSnapshot::Ordered(vec!["a".into(), "b".into()]);

        let (once, _) = merge(&local, &remote, at(100));
        let (twice, outcome) = merge(&once, &remote, at(200));

        assert_eq!(once, twice);
        assert!(outcome.is_noop());
    }

    #[test]
    fn ordered_snapshot_skips_empty_ids() {
        let local = ActiveHandlerList::new();
        let remote = ActiveHandlersSnapshot::Ordered(vec!["".into(), "a".into()]);

        let (merged, outcome) = merge(&local, &remote, at(100));

        assert_eq!(merged.len(), 1);
        assert_eq!(outcome.activated, vec!["a"]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn arb_id() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[a-f]"]
    }

    fn arb_local() -> impl Strategy<Value = ActiveHandlerList> {
        proptest::collection::vec((arb_id(), 0i64..1_000), 0..10).prop_map(|raw| {
            ActiveHandlerList::from_entries(
                raw.into_iter().map(|(id, t)| ActiveHandlerEntry::new(id, at(t))),
            )
        })
    }

    proptest! {
        /// Invariant 1: an ordered merge yields exactly the snapshot's
        /// non-empty ids, and merging the same snapshot again changes nothing.
        #[test]
        fn ordered_merge_converges(
            local in arb_local(),
            remote in proptest::collection::vec(arb_id(), 0..10),
            first in 1_000i64..2_000,
            second in 2_000i64..3_000,
        ) {
            let snapshot = ActiveHandlersSnapshot::Ordered(remote.clone());
            let (merged, outcome) = merge(&local, &snapshot, at(first));

            let expected: HashSet<&str> =
                remote.iter().map(String::as_str).filter(|id| !id.is_empty()).collect();
            let got: HashSet<&str> = merged.ids().collect();
            prop_assert_eq!(&got, &expected);
            prop_assert_eq!(merged.len(), expected.len());
            prop_assert!(!outcome.replaced);
            for id in &outcome.activated {
                prop_assert!(!local.contains(id));
            }
            for id in &outcome.deactivated {
                prop_assert!(!expected.contains(id.as_str()));
            }

            let (again, outcome) = merge(&merged, &snapshot, at(second));
            prop_assert_eq!(&again, &merged);
            prop_assert!(outcome.is_noop());
        }
    }
}
