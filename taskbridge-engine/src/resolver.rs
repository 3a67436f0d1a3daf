//! Conflict resolution over a record's pending-change log.
//!
//! Decision order:
//! 1. no changes → none
//! 2. one change → it wins, window ignored
//! 3. one origin only → latest timestamp wins
//! 4. both origins → compare each origin's latest; inside the window the
//!    sign picks the winner (positive → remote), outside it the newer raw
//!    timestamp wins, with exact ties defaulting to remote
//!
//! Pure function: no logging, no mutation. A `deleted` flag in the winning
//! changeset is not special-cased here; the write-back planner interprets it.

use taskbridge_core::types::{ChangeOrigin, ConflictWindow, PendingChange};

/// Pick the winning change from a pending log, if any.
pub fn resolve(pending: &[PendingChange], window: ConflictWindow) -> Option<&PendingChange> {
    match pending {
        [] => None,
        [only] => Some(only),
        _ => {
            let latest_local = latest_of(pending, ChangeOrigin::Local);
            let latest_remote = latest_of(pending, ChangeOrigin::Remote);
            match (latest_local, latest_remote) {
                (Some(local), None) => Some(local),
                (None, Some(remote)) => Some(remote),
                (Some(local), Some(remote)) => Some(pick_across_origins(local, remote, window)),
                (None, None) => None,
            }
        }
    }
}

/// Latest change of one origin; on equal timestamps the later-appended one.
fn latest_of(pending: &[PendingChange], origin: ChangeOrigin) -> Option<&PendingChange> {
    pending
        .iter()
        .filter(|c| c.origin == origin)
        .reduce(|best, c| if c.timestamp >= best.timestamp { c } else { best })
}

fn pick_across_origins<'a>(
    local: &'a PendingChange,
    remote: &'a PendingChange,
    window: ConflictWindow,
) -> &'a PendingChange {
    let diff_secs = (local.timestamp - remote.timestamp)
        .num_milliseconds()
        .abs()
        / 1000;

    if diff_secs <= window.magnitude_secs() {
        if window.remote_wins_inside() {
            remote
        } else {
            local
        }
    } else if local.timestamp > remote.timestamp {
        local
    } else {
        // Covers the strictly-newer remote and the exact-tie default.
        remote
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rstest::rstest;
    use taskbridge_core::types::ChangeSet;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().expect("timestamp")
    }

    fn change(origin: ChangeOrigin, ms: i64, content: &str) -> PendingChange {
        PendingChange {
            origin,
            timestamp: at_ms(ms),
            change: ChangeSet {
                content: Some(content.to_string()),
                ..ChangeSet::default()
            },
        }
    }

    #[test]
    fn no_changes_resolves_to_none() {
        assert_eq!(resolve(&[], ConflictWindow(60)), None);
    }

    #[rstest]
    #[case(ConflictWindow(60))]
    #[case(ConflictWindow(-60))]
    #[case(ConflictWindow(0))]
    fn single_change_wins_regardless_of_window(#[case] window: ConflictWindow) {
        let pending = vec![change(ChangeOrigin::Local, 10_000, "only")];
        let winner = resolve(&pending, window).expect("winner");
        assert_eq!(winner, &pending[0]);
    }

    #[test]
    fn single_origin_latest_timestamp_wins() {
        let pending = vec![
            change(ChangeOrigin::Local, 10_000, "first"),
            change(ChangeOrigin::Local, 30_000, "latest"),
            change(ChangeOrigin::Local, 20_000, "middle"),
        ];
        let winner = resolve(&pending, ConflictWindow(60)).expect("winner");
        assert_eq!(winner.change.content.as_deref(), Some("latest"));
    }

    #[test]
    fn inside_positive_window_remote_wins() {
        // diff 30s ≤ 60s window
        let pending = vec![
            change(ChangeOrigin::Local, 1_000_000, "local"),
            change(ChangeOrigin::Remote, 1_030_000, "remote"),
        ];
        let winner = resolve(&pending, ConflictWindow(60)).expect("winner");
        assert_eq!(winner.origin, ChangeOrigin::Remote);
    }

    #[test]
    fn outside_window_newer_side_wins() {
        // diff 1000s > 60s window; local is newer
        let pending = vec![
            change(ChangeOrigin::Local, 2_000_000, "local"),
            change(ChangeOrigin::Remote, 1_000_000, "remote"),
        ];
        let winner = resolve(&pending, ConflictWindow(60)).expect("winner");
        assert_eq!(winner.origin, ChangeOrigin::Local);
    }

    #[test]
    fn negative_window_prefers_local_despite_newer_remote() {
        // diff 20s ≤ 30s magnitude; sign ≤ 0 → local
        let pending = vec![
            change(ChangeOrigin::Local, 1_000_000, "local"),
            change(ChangeOrigin::Remote, 1_020_000, "remote"),
        ];
        let winner = resolve(&pending, ConflictWindow(-30)).expect("winner");
        assert_eq!(winner.origin, ChangeOrigin::Local);
    }

    #[rstest]
    #[case(ConflictWindow(60), ChangeOrigin::Remote)]
    #[case(ConflictWindow(0), ChangeOrigin::Local)]
    #[case(ConflictWindow(-30), ChangeOrigin::Local)]
    fn exact_tie_is_always_inside_the_window(
        #[case] window: ConflictWindow,
        #[case] expected: ChangeOrigin,
    ) {
        // diff 0 falls inside every window, so the sign decides ties.
        let pending = vec![
            change(ChangeOrigin::Local, 5_000_000, "local"),
            change(ChangeOrigin::Remote, 5_000_000, "remote"),
        ];
        let winner = resolve(&pending, window).expect("winner");
        assert_eq!(winner.origin, expected);
    }

    #[test]
    fn both_origins_compare_latest_of_each_first() {
        // Latest local (90s) vs latest remote (100s): diff 10s ≤ 60 → remote.
        // The stale local at 95s must not be compared against remote directly.
        let pending = vec![
            change(ChangeOrigin::Local, 20_000, "old local"),
            change(ChangeOrigin::Local, 90_000, "latest local"),
            change(ChangeOrigin::Remote, 40_000, "old remote"),
            change(ChangeOrigin::Remote, 100_000, "latest remote"),
        ];
        let winner = resolve(&pending, ConflictWindow(60)).expect("winner");
        assert_eq!(winner.change.content.as_deref(), Some("latest remote"));
    }

    #[test]
    fn deleted_flag_is_propagated_not_special_cased() {
        let deletion = PendingChange {
            origin: ChangeOrigin::Local,
            timestamp: at_ms(10_000),
            change: ChangeSet::deletion(),
        };
        let winner = resolve(std::slice::from_ref(&deletion), ConflictWindow(60)).expect("winner");
        assert!(winner.change.deleted);
    }
}
