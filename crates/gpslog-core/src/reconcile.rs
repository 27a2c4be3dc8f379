//! Merging the store's record set with in-flight local writes.
//!
//! The committed set fetched from the store is authoritative: records it no
//! longer contains disappear from the view, and records are keyed by their
//! store-assigned id. Pending placeholders fill the gap between `append` and
//! acknowledgement, and are retired as soon as the committed set contains the
//! record they stand for.

use std::collections::HashMap;

use time::Duration;

use gpslog_types::{LocationRecord, RecordId};

/// Coordinates closer than this (degrees, per axis) are the same point.
pub const COORDINATE_EPSILON: f64 = 1e-9;

/// Default window within which a placeholder's client timestamp may differ
/// from the server timestamp of the record that acknowledged it.
pub const DEFAULT_DEDUP_TOLERANCE: Duration = Duration::seconds(5);

/// Merge a fetched committed set with pending placeholders into the display order.
///
/// - Committed records are merged by id; a later duplicate replaces an earlier one.
/// - A placeholder is dropped when a committed record carries its submission
///   token, or sits on the same coordinate with a `created_at` within
///   `tolerance` of the placeholder's client timestamp.
/// - The result is ordered by `created_at`, then store sequence; surviving
///   placeholders sort after committed records sharing their timestamp.
///
/// # Example
///
/// ```
/// use gpslog_core::reconcile::{reconcile, DEFAULT_DEDUP_TOLERANCE};
///
/// let view = reconcile(Vec::new(), Vec::new(), DEFAULT_DEDUP_TOLERANCE);
/// assert!(view.is_empty());
/// ```
pub fn reconcile(
    committed: Vec<LocationRecord>,
    pending: Vec<LocationRecord>,
    tolerance: Duration,
) -> Vec<LocationRecord> {
    let mut by_id: HashMap<RecordId, usize> = HashMap::with_capacity(committed.len());
    let mut merged: Vec<LocationRecord> = Vec::with_capacity(committed.len() + pending.len());

    for record in committed {
        let Some(id) = record.id.clone() else {
            // A committed record always has an id; treat strays as pending
            merged.push(record);
            continue;
        };
        match by_id.get(&id) {
            Some(&slot) => merged[slot] = record,
            None => {
                by_id.insert(id, merged.len());
                merged.push(record);
            }
        }
    }

    let committed_len = merged.len();
    for placeholder in pending {
        let acknowledged = merged[..committed_len]
            .iter()
            .any(|record| supersedes(record, &placeholder, tolerance));
        if !acknowledged {
            merged.push(placeholder);
        }
    }

    merged.sort_by(|a, b| a.display_order(b));
    merged
}

/// Whether `record` is the acknowledged form of `placeholder`.
pub fn supersedes(record: &LocationRecord, placeholder: &LocationRecord, tolerance: Duration) -> bool {
    if let (Some(a), Some(b)) = (record.submission, placeholder.submission)
        && a == b
    {
        return true;
    }

    record
        .coordinate()
        .approx_eq(&placeholder.coordinate(), COORDINATE_EPSILON)
        && (record.created_at - placeholder.created_at).abs() <= tolerance
}


#[cfg(test)]
mod proptests {
    use super::*;
    use gpslog_types::SubmissionId;
    use proptest::prelude::*;
    use time::OffsetDateTime;

    fn arb_committed() -> impl Strategy<Value = Vec<LocationRecord>> {
        prop::collection::vec((0u8..20, -90.0f64..=90.0, 0i64..86_400), 0..40).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(seq, (id, lat, secs))| LocationRecord {
                    id: Some(RecordId::new(format!("r{id}"))),
                    latitude: lat,
                    longitude: 0.0,
                    created_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs),
                    sequence: Some(seq as u64),
                    submission: None,
                })
                .collect()
        })
    }

    /// A fetched committed set plus the pending writes read alongside it.
    ///
    /// Placeholders either reuse a committed row's submission token, copy its
    /// point and time under a fresh token, or sit somewhere unrelated.
    fn arb_sync_state() -> impl Strategy<Value = (Vec<LocationRecord>, Vec<LocationRecord>)> {
        arb_committed()
            .prop_flat_map(|committed| {
                let rows = committed.len().max(1);
                let placeholders = prop::collection::vec(
                    (0..rows, 0u8..3, -90.0f64..=90.0, 0i64..86_400),
                    0..12,
                );
                (Just(committed), placeholders)
            })
            .prop_map(|(mut committed, placeholders)| {
                for (i, record) in committed.iter_mut().enumerate() {
                    if i % 3 == 0 {
                        record.submission = Some(SubmissionId(i as u64));
                    }
                }

                let pending = placeholders
                    .into_iter()
                    .enumerate()
                    .map(|(i, (row, kind, lat, secs))| {
                        let fresh = Some(SubmissionId(1_000 + i as u64));
                        match (committed.get(row), kind) {
                            (Some(source), 0) => LocationRecord {
                                id: None,
                                sequence: None,
                                submission: source.submission.or(fresh),
                                ..source.clone()
                            },
                            (Some(source), 1) => LocationRecord {
                                id: None,
                                sequence: None,
                                submission: fresh,
                                ..source.clone()
                            },
                            _ => LocationRecord {
                                id: None,
                                latitude: lat,
                                longitude: 90.0,
                                created_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs),
                                sequence: None,
                                submission: fresh,
                            },
                        }
                    })
                    .collect();
                (committed, pending)
            })
    }

    fn multiset_key(record: &LocationRecord) -> (Option<SubmissionId>, OffsetDateTime, u64) {
        (record.submission, record.created_at, record.latitude.to_bits())
    }

    proptest! {
        #[test]
        fn placeholders_appear_once_alongside_their_acknowledgement(
            (committed, pending) in arb_sync_state()
        ) {
            let mut expected_ids: Vec<_> = committed.iter().filter_map(|r| r.id.clone()).collect();
            expected_ids.sort();
            expected_ids.dedup();

            let view = reconcile(committed, pending.clone(), DEFAULT_DEDUP_TOLERANCE);

            for pair in view.windows(2) {
                prop_assert!(pair[0].display_order(&pair[1]).is_le());
            }

            let (acknowledged, surviving): (Vec<_>, Vec<_>) =
                view.iter().cloned().partition(|r| r.id.is_some());

            // Every committed id exactly once
            let mut ids: Vec<_> = acknowledged.iter().filter_map(|r| r.id.clone()).collect();
            ids.sort();
            prop_assert_eq!(&ids, &expected_ids);

            // No placeholder outlives a committed record carrying its token
            for placeholder in &surviving {
                prop_assert!(!acknowledged.iter().any(|r| {
                    r.submission.is_some() && r.submission == placeholder.submission
                }), "placeholder outlives a committed record carrying its token");
            }

            // A placeholder survives exactly when nothing committed supersedes it
            let mut expected: Vec<_> = pending
                .iter()
                .filter(|p| !acknowledged.iter().any(|r| supersedes(r, p, DEFAULT_DEDUP_TOLERANCE)))
                .map(multiset_key)
                .collect();
            let mut actual: Vec<_> = surviving.iter().map(multiset_key).collect();
            expected.sort();
            actual.sort();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn view_is_sorted_and_ids_unique(committed in arb_committed()) {
            let view = reconcile(committed, Vec::new(), DEFAULT_DEDUP_TOLERANCE);

            for pair in view.windows(2) {
                prop_assert!(pair[0].display_order(&pair[1]).is_le());
            }
            let mut ids: Vec<_> = view.iter().filter_map(|r| r.id.clone()).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
        }

        #[test]
        fn reconcile_is_idempotent(committed in arb_committed()) {
            let once = reconcile(committed, Vec::new(), DEFAULT_DEDUP_TOLERANCE);
            let twice = reconcile(once.clone(), Vec::new(), DEFAULT_DEDUP_TOLERANCE);
            prop_assert_eq!(once, twice);
        }
    }
}
