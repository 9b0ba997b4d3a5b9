//! Acknowledgment tracker integration tests.
//!
//! Exercises the trackers built by `AckTrackerFactory` against the simulated
//! store: prefix safety under arbitrary confirmation orders, flush
//! idempotence, backpressure, bookmarkless behavior and poisoning.

// Test-specific lint allowances.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]

use std::sync::Arc;
use std::time::Duration;

use tally_ack::{
    AckError, AckTracker, AckTrackerConfig, AckTrackerFactory, AckTrackerKind, ConfirmOutcome,
    FlushOutcome, ReliabilityMode, SimulatedBookmarkStore, TrackOutcome, Tracker,
};
use tally_core::{Bookmark, SequenceNumber, SourceId};

use crate::scenarios::seeds::REGRESSION_SEEDS;
use crate::scenarios::shuffled;

fn consecutive(window: u32) -> (Tracker, SimulatedBookmarkStore) {
    let store = SimulatedBookmarkStore::new(42);
    let tracker = AckTrackerFactory::create(
        &AckTrackerConfig::for_testing()
            .with_mode(ReliabilityMode::Consecutive)
            .with_window_size(window),
        SourceId::new(1),
        true,
        Arc::new(store.clone()),
        None,
    )
    .unwrap();
    (tracker, store)
}

async fn read_offsets(tracker: &Tracker, count: u64) -> Vec<SequenceNumber> {
    let mut sequences = Vec::with_capacity(count as usize);
    for offset in 1..=count {
        sequences.push(
            tracker
                .track_read(Bookmark::from_offset(offset))
                .await
                .unwrap(),
        );
    }
    sequences
}

fn safe_offset(tracker: &Tracker) -> Option<u64> {
    tracker.current_safe_bookmark().and_then(|b| b.as_offset())
}

// ============================================================================
// Prefix Properties
// ============================================================================

#[tokio::test]
async fn test_ack_full_prefix_any_order() {
    crate::init_tracing();

    for &seed in REGRESSION_SEEDS {
        let (tracker, _store) = consecutive(64);
        let sequences = read_offsets(&tracker, 40).await;

        for n in shuffled(40, seed) {
            tracker.confirm(sequences[(n - 1) as usize]).unwrap();
        }

        assert_eq!(safe_offset(&tracker), Some(40), "seed {seed}");
    }
}

#[tokio::test]
async fn test_ack_safe_bookmark_never_passes_gap() {
    for &seed in REGRESSION_SEEDS {
        let (tracker, _store) = consecutive(64);
        let sequences = read_offsets(&tracker, 30).await;

        // Hold back one record and confirm the rest in random order.
        let held_back = seed % 30 + 1;
        for n in shuffled(30, seed) {
            if n == held_back {
                continue;
            }
            tracker.confirm(sequences[(n - 1) as usize]).unwrap();

            let safe = safe_offset(&tracker);
            assert!(
                safe.map_or(true, |offset| offset < held_back),
                "seed {seed}: safe bookmark {safe:?} passed unconfirmed record {held_back}"
            );
        }

        let expected = if held_back == 1 {
            None
        } else {
            Some(held_back - 1)
        };
        assert_eq!(safe_offset(&tracker), expected, "seed {seed}");
    }
}

#[tokio::test]
async fn test_ack_no_gap_example() {
    let (tracker, store) = consecutive(16);
    let seqs = read_offsets(&tracker, 5).await;

    for i in [0, 2, 3, 4] {
        tracker.confirm(seqs[i]).unwrap();
    }
    assert_eq!(safe_offset(&tracker), Some(1));

    let outcome = tracker.flush().await.unwrap();
    assert!(matches!(outcome, FlushOutcome::Persisted { collected: 1, .. }));
    assert_eq!(store.stored().unwrap().bookmark.as_offset(), Some(1));

    // With R1 also unconfirmed nothing would be safe.
    let (tracker, _store) = consecutive(16);
    let seqs = read_offsets(&tracker, 5).await;
    for i in [2, 3, 4] {
        tracker.confirm(seqs[i]).unwrap();
    }
    assert_eq!(safe_offset(&tracker), None);
    assert_eq!(tracker.flush().await.unwrap(), FlushOutcome::Unchanged);
}

// ============================================================================
// Flush
// ============================================================================

#[tokio::test]
async fn test_ack_flush_idempotent() {
    let (tracker, store) = consecutive(16);
    let seqs = read_offsets(&tracker, 4).await;
    tracker.confirm(seqs[0]).unwrap();
    tracker.confirm(seqs[1]).unwrap();

    assert!(tracker.flush().await.unwrap().is_persisted());
    let pending = tracker.pending();
    let saves = store.save_count();

    assert_eq!(tracker.flush().await.unwrap(), FlushOutcome::Unchanged);
    assert_eq!(tracker.pending(), pending);
    assert_eq!(store.save_count(), saves);
}

#[tokio::test]
async fn test_ack_duplicate_confirm_after_collection() {
    let (tracker, store) = consecutive(16);
    let seqs = read_offsets(&tracker, 3).await;
    for seq in &seqs {
        tracker.confirm(*seq).unwrap();
    }
    tracker.flush().await.unwrap();
    let stored = store.stored();

    for seq in &seqs {
        assert_eq!(tracker.confirm(*seq).unwrap(), ConfirmOutcome::Stale);
    }
    assert_eq!(tracker.flush().await.unwrap(), FlushOutcome::Unchanged);
    assert_eq!(store.stored(), stored);
    assert_eq!(tracker.pending(), 0);
}

#[tokio::test]
async fn test_ack_generations_increase() {
    let (tracker, store) = consecutive(16);
    let mut last = None;

    for round in 1..=5u64 {
        let seq = tracker
            .track_read(Bookmark::from_offset(round))
            .await
            .unwrap();
        tracker.confirm(seq).unwrap();

        let FlushOutcome::Persisted { generation, .. } = tracker.flush().await.unwrap() else {
            panic!("round {round} did not persist");
        };
        assert!(last.map_or(true, |prev| generation > prev));
        last = Some(generation);
    }
    assert_eq!(store.stored().unwrap().generation.get(), 5);
}

// ============================================================================
// Window
// ============================================================================

#[tokio::test]
async fn test_ack_window_backpressure() {
    const WINDOW: u32 = 4;
    let (tracker, _store) = consecutive(WINDOW);
    let tracker = Arc::new(tracker);
    let seqs = read_offsets(&tracker, u64::from(WINDOW)).await;

    assert!(matches!(
        tracker.try_track_read(Bookmark::from_offset(99)).await.unwrap(),
        TrackOutcome::WindowFull(_)
    ));

    let blocked = {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move { tracker.track_read(Bookmark::from_offset(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    // Confirming without flushing does not free capacity.
    tracker.confirm(seqs[1]).unwrap();
    tracker.confirm(seqs[0]).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    let outcome = tracker.flush().await.unwrap();
    assert!(matches!(outcome, FlushOutcome::Persisted { collected: 2, .. }));

    let seq = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(seq, SequenceNumber::new(u64::from(WINDOW) + 1));
    assert_eq!(tracker.pending(), 3);
}

#[tokio::test]
async fn test_ack_concurrent_confirmers() {
    let (tracker, _store) = consecutive(1024);
    let tracker = Arc::new(tracker);
    let seqs = read_offsets(&tracker, 1000).await;

    // Four threads confirm interleaved slices.
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let tracker = Arc::clone(&tracker);
            let mine: Vec<_> = seqs.iter().copied().skip(worker).step_by(4).collect();
            std::thread::spawn(move || {
                for seq in mine.into_iter().rev() {
                    assert_eq!(tracker.confirm(seq).unwrap(), ConfirmOutcome::Acked);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(safe_offset(&tracker), Some(1000));
    assert_eq!(tracker.stats().confirmed, 1000);
    tracker.wait_all_acked().await;
}

// ============================================================================
// Variants
// ============================================================================

#[tokio::test]
async fn test_ack_bookmarkless_never_persists() {
    for mode in [ReliabilityMode::Instant, ReliabilityMode::Consecutive] {
        let store = SimulatedBookmarkStore::new(1);
        let tracker = AckTrackerFactory::create(
            &AckTrackerConfig::for_testing().with_mode(mode),
            SourceId::new(1),
            false,
            Arc::new(store.clone()),
            None,
        )
        .unwrap();
        assert_eq!(tracker.kind(), AckTrackerKind::InstantBookmarkless);

        let seqs = read_offsets(&tracker, 10).await;
        for seq in seqs {
            tracker.confirm(seq).unwrap();
            assert!(tracker.current_safe_bookmark().is_none());
        }
        assert_eq!(tracker.flush().await.unwrap(), FlushOutcome::Unchanged);
        assert_eq!(store.save_count(), 0);
    }
}

#[tokio::test]
async fn test_ack_instant_tracks_newest_read() {
    let store = SimulatedBookmarkStore::new(1);
    let tracker = AckTrackerFactory::create(
        &AckTrackerConfig::for_testing().with_mode(ReliabilityMode::Instant),
        SourceId::new(1),
        true,
        Arc::new(store.clone()),
        None,
    )
    .unwrap();

    read_offsets(&tracker, 3).await;
    assert_eq!(store.stored().unwrap().bookmark.as_offset(), Some(3));
    assert_eq!(store.save_count(), 3);
    assert_eq!(tracker.pending(), 0);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_ack_unknown_sequence_poisons_every_variant() {
    for (mode, resumable) in [
        (ReliabilityMode::Instant, true),
        (ReliabilityMode::Instant, false),
        (ReliabilityMode::Consecutive, true),
    ] {
        let store = SimulatedBookmarkStore::new(1);
        let tracker = AckTrackerFactory::create(
            &AckTrackerConfig::for_testing().with_mode(mode),
            SourceId::new(1),
            resumable,
            Arc::new(store.clone()),
            None,
        )
        .unwrap();
        read_offsets(&tracker, 2).await;
        let saves = store.save_count();

        let err = tracker.confirm(SequenceNumber::new(1_000)).unwrap_err();
        assert!(err.is_fatal());

        assert!(matches!(
            tracker.track_read(Bookmark::from_offset(3)).await,
            Err(AckError::Poisoned { .. })
        ));
        assert!(matches!(
            tracker.flush().await,
            Err(AckError::Poisoned { .. })
        ));
        assert_eq!(store.save_count(), saves);
    }
}

#[tokio::test]
async fn test_ack_confirm_zero_poisons_every_variant() {
    for (mode, resumable) in [
        (ReliabilityMode::Instant, true),
        (ReliabilityMode::Instant, false),
        (ReliabilityMode::Consecutive, true),
    ] {
        for reads in [0, 2] {
            let tracker = AckTrackerFactory::create(
                &AckTrackerConfig::for_testing().with_mode(mode),
                SourceId::new(1),
                resumable,
                Arc::new(SimulatedBookmarkStore::new(1)),
                None,
            )
            .unwrap();
            read_offsets(&tracker, reads).await;

            let err = tracker.confirm(SequenceNumber::new(0)).unwrap_err();
            assert!(
                matches!(err, AckError::UnknownSequence { .. }),
                "{mode:?}/{resumable} with {reads} reads: {err:?}"
            );
            assert!(matches!(
                tracker.track_read(Bookmark::from_offset(10)).await,
                Err(AckError::Poisoned { .. })
            ));
        }
    }
}

#[tokio::test]
async fn test_ack_persist_failure_then_retry() {
    let (tracker, store) = consecutive(16);
    let seqs = read_offsets(&tracker, 3).await;
    for seq in &seqs {
        tracker.confirm(*seq).unwrap();
    }

    store.fault_config().save_fail_rate = 1.0;
    for _ in 0..3 {
        assert!(matches!(
            tracker.flush().await,
            Err(AckError::Persist { .. })
        ));
        assert_eq!(tracker.pending(), 3);
        assert_eq!(safe_offset(&tracker), Some(3));
    }

    store.fault_config().save_fail_rate = 0.0;
    let outcome = tracker.flush().await.unwrap();
    assert!(matches!(outcome, FlushOutcome::Persisted { collected: 3, .. }));
    assert_eq!(store.stored().unwrap().bookmark.as_offset(), Some(3));

    let stats = tracker.stats();
    assert_eq!(stats.flush_failures, 3);
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_ack_disable_saving() {
    let (tracker, store) = consecutive(16);
    let seqs = read_offsets(&tracker, 2).await;
    tracker.confirm(seqs[0]).unwrap();
    tracker.flush().await.unwrap();

    tracker.disable_bookmark_saving();
    tracker.confirm(seqs[1]).unwrap();

    assert_eq!(tracker.flush().await.unwrap(), FlushOutcome::Disabled);
    assert_eq!(store.stored().unwrap().bookmark.as_offset(), Some(1));
    assert_eq!(store.save_count(), 1);
}
