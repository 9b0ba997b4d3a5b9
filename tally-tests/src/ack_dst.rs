//! Acknowledgment tracking DST tests.
//!
//! Deterministic simulation of a source reading lines, a destination
//! confirming them in random order, flaky bookmark storage and crashes. After
//! every step the property checker verifies that:
//! - the persisted bookmark never covers an undelivered line
//! - the persisted bookmark and its generation never move backwards
//! - the safe bookmark never covers an undelivered line
//! - the pending window is never exceeded
//! - a restarted source resumes exactly after the persisted bookmark

// Test-specific lint allowances.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::doc_markdown)]
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tally_ack::{
    AckError, AckTracker, AckTrackerConfig, BookmarkStoreFaultConfig, ConfirmOutcome,
    ReliabilityMode, SimulatedBookmarkStore, TrackedSource,
};
use tally_core::{Bookmark, SequenceNumber, SourceId};

use crate::scenarios::seeds::REGRESSION_SEEDS;
use crate::scenarios::LineResource;

const SOURCE: SourceId = SourceId::new(1);

// ============================================================================
// Property Checker
// ============================================================================

/// All possible invariant violations.
#[derive(Debug, Clone)]
pub enum Violation {
    PersistedPastUndelivered {
        seed: u64,
        step: u64,
        persisted: u64,
        missing: u64,
    },
    PersistedRegressed {
        seed: u64,
        step: u64,
        previous: (u64, u64),
        current: (u64, u64),
    },
    SafeBookmarkPastUndelivered {
        seed: u64,
        step: u64,
        safe: u64,
        missing: u64,
    },
    WindowExceeded {
        seed: u64,
        step: u64,
        pending: u64,
        window: u32,
    },
    ResumeMismatch {
        seed: u64,
        expected: u64,
        actual: u64,
    },
    UnexpectedConfirm {
        seed: u64,
        step: u64,
        outcome: String,
    },
    UnexpectedError {
        seed: u64,
        step: u64,
        error: String,
    },
    IncompleteDrain {
        seed: u64,
        persisted: Option<u64>,
        lines: u64,
    },
}

/// Checks tracker and store state against the delivery model.
pub struct PropertyChecker {
    /// Last persisted (generation, offset), for monotonicity.
    last_persisted: Option<(u64, u64)>,
    /// All violations found.
    violations: Vec<Violation>,
    /// Statistics.
    pub checks_performed: u64,
    pub restarts: u64,
    pub flush_failures: u64,
}

impl PropertyChecker {
    pub const fn new() -> Self {
        Self {
            last_persisted: None,
            violations: Vec::new(),
            checks_performed: 0,
            restarts: 0,
            flush_failures: 0,
        }
    }

    fn first_undelivered(offset: u64, delivered: &HashSet<u64>) -> Option<u64> {
        (1..=offset).find(|line| !delivered.contains(line))
    }

    /// Verifies the persisted record.
    pub fn check_store(
        &mut self,
        seed: u64,
        step: u64,
        store: &SimulatedBookmarkStore,
        delivered: &HashSet<u64>,
    ) {
        self.checks_performed += 1;

        let Some(record) = store.stored() else {
            return;
        };
        let offset = record.bookmark.as_offset().unwrap_or_default();
        let current = (record.generation.get(), offset);

        if let Some(missing) = Self::first_undelivered(offset, delivered) {
            self.violations.push(Violation::PersistedPastUndelivered {
                seed,
                step,
                persisted: offset,
                missing,
            });
        }

        if let Some(previous) = self.last_persisted {
            if current.0 < previous.0 || current.1 < previous.1 {
                self.violations.push(Violation::PersistedRegressed {
                    seed,
                    step,
                    previous,
                    current,
                });
            }
        }
        self.last_persisted = Some(current);
    }

    /// Verifies the live tracker.
    pub fn check_tracker(
        &mut self,
        seed: u64,
        step: u64,
        tracker: &dyn AckTracker,
        window: u32,
        delivered: &HashSet<u64>,
    ) {
        self.checks_performed += 1;

        if let Some(safe) = tracker.current_safe_bookmark().and_then(|b| b.as_offset()) {
            if let Some(missing) = Self::first_undelivered(safe, delivered) {
                self.violations.push(Violation::SafeBookmarkPastUndelivered {
                    seed,
                    step,
                    safe,
                    missing,
                });
            }
        }

        let pending = tracker.pending();
        if pending > u64::from(window) {
            self.violations.push(Violation::WindowExceeded {
                seed,
                step,
                pending,
                window,
            });
        }
    }

    pub fn record(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn print_summary(&self, label: &str) {
        println!(
            "{label}: checks={}, restarts={}, flush_failures={}, violations={}",
            self.checks_performed,
            self.restarts,
            self.flush_failures,
            self.violations.len()
        );
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// Parameters for one simulated run.
#[derive(Debug, Clone, Copy)]
struct SimConfig {
    seed: u64,
    lines: u64,
    steps: u64,
    window: u32,
    crash_percent: u32,
}

impl SimConfig {
    const fn new(seed: u64) -> Self {
        Self {
            seed,
            lines: 200,
            steps: 600,
            window: 16,
            crash_percent: 2,
        }
    }
}

fn line_number(record: &str) -> u64 {
    record
        .strip_prefix("line-")
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| panic!("unexpected record {record}"))
}

fn stored_offset(store: &SimulatedBookmarkStore) -> u64 {
    store
        .stored()
        .and_then(|r| r.bookmark.as_offset())
        .unwrap_or(0)
}

async fn open_source(
    store: &SimulatedBookmarkStore,
    config: &AckTrackerConfig,
    lines: u64,
) -> TrackedSource<LineResource> {
    // Loads can fail under the flaky store; a real supervisor retries too.
    for _ in 0..32 {
        match TrackedSource::open(
            SOURCE,
            LineResource::numbered(lines),
            Arc::new(store.clone()),
            config,
        )
        .await
        {
            Ok(source) => return source,
            Err(AckError::Io { .. }) => {}
            Err(e) => panic!("unexpected open error: {e}"),
        }
    }
    panic!("store kept failing loads");
}

/// Per-run bookkeeping, reset on crash.
#[derive(Default)]
struct Run {
    outstanding: Vec<(SequenceNumber, u64)>,
    confirmed: Vec<SequenceNumber>,
    /// Line the next read must return.
    expected_next: u64,
}

impl Run {
    fn resuming_from(offset: u64) -> Self {
        Self {
            expected_next: offset + 1,
            ..Self::default()
        }
    }
}

async fn run_simulation(sim: SimConfig) -> PropertyChecker {
    let mut checker = PropertyChecker::new();
    let mut rng = StdRng::seed_from_u64(sim.seed);

    let store = SimulatedBookmarkStore::with_faults(sim.seed, BookmarkStoreFaultConfig::flaky());
    let config = AckTrackerConfig::for_testing()
        .with_mode(ReliabilityMode::Consecutive)
        .with_window_size(sim.window);

    let mut delivered: HashSet<u64> = HashSet::new();
    let mut source = open_source(&store, &config, sim.lines).await;
    let mut run = Run::resuming_from(stored_offset(&store));

    for step in 0..sim.steps {
        let roll = rng.gen_range(0..100u32);

        if roll < sim.crash_percent {
            // Crash: everything in flight is lost and will be replayed.
            drop(source);
            checker.restarts += 1;
            source = open_source(&store, &config, sim.lines).await;
            run = Run::resuming_from(stored_offset(&store));
        } else if roll < 40 {
            // Read, unless that would wait on the window.
            if source.tracker().pending() < u64::from(sim.window) {
                match source.next_record().await {
                    Ok(Some(tracked)) => {
                        let line = line_number(&tracked.record);
                        if line != run.expected_next {
                            checker.record(Violation::ResumeMismatch {
                                seed: sim.seed,
                                expected: run.expected_next,
                                actual: line,
                            });
                        }
                        run.expected_next = line + 1;
                        run.outstanding.push((tracked.sequence, line));
                    }
                    Ok(None) => {}
                    Err(e) => checker.record(Violation::UnexpectedError {
                        seed: sim.seed,
                        step,
                        error: e.to_string(),
                    }),
                }
            }
        } else if roll < 75 {
            // Deliver and confirm a random outstanding record.
            if !run.outstanding.is_empty() {
                let index = rng.gen_range(0..run.outstanding.len());
                let (sequence, line) = run.outstanding.swap_remove(index);
                delivered.insert(line);
                match source.confirmer().confirm(sequence) {
                    Ok(ConfirmOutcome::Acked) => run.confirmed.push(sequence),
                    other => checker.record(Violation::UnexpectedConfirm {
                        seed: sim.seed,
                        step,
                        outcome: format!("{other:?}"),
                    }),
                }
            }
        } else if roll < 82 {
            // Redelivery: confirming again changes nothing.
            if let Some(&sequence) = run.confirmed.choose(&mut rng) {
                match source.confirmer().confirm(sequence) {
                    Ok(ConfirmOutcome::Duplicate | ConfirmOutcome::Stale) => {}
                    other => checker.record(Violation::UnexpectedConfirm {
                        seed: sim.seed,
                        step,
                        outcome: format!("{other:?}"),
                    }),
                }
            }
        } else {
            match source.flush().await {
                Ok(_) => {}
                Err(AckError::Persist { .. }) => checker.flush_failures += 1,
                Err(e) => checker.record(Violation::UnexpectedError {
                    seed: sim.seed,
                    step,
                    error: e.to_string(),
                }),
            }
        }

        checker.check_store(sim.seed, step, &store, &delivered);
        checker.check_tracker(sim.seed, step, source.tracker(), sim.window, &delivered);
    }

    // Drain: heal the store, deliver everything left, read to the end.
    *store.fault_config() = BookmarkStoreFaultConfig::none();
    let confirmer = source.confirmer();
    for (sequence, line) in run.outstanding.drain(..) {
        delivered.insert(line);
        confirmer.confirm(sequence).unwrap();
    }
    while let Some(tracked) = source.next_record().await.unwrap() {
        delivered.insert(line_number(&tracked.record));
        confirmer.confirm(tracked.sequence).unwrap();
    }
    source.shutdown().await.unwrap();
    checker.check_store(sim.seed, sim.steps, &store, &delivered);

    let persisted = store.stored().and_then(|r| r.bookmark.as_offset());
    if persisted != Some(sim.lines) {
        checker.record(Violation::IncompleteDrain {
            seed: sim.seed,
            persisted,
            lines: sim.lines,
        });
    }

    checker
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_dst_ack_regression_seeds() {
    crate::init_tracing();

    for &seed in REGRESSION_SEEDS {
        let checker = run_simulation(SimConfig::new(seed)).await;
        checker.print_summary(&format!("seed {seed}"));
        assert!(
            checker.is_clean(),
            "seed {seed}: {:?}",
            checker.violations()
        );
    }
}

#[tokio::test]
async fn test_dst_ack_crash_heavy() {
    for &seed in &REGRESSION_SEEDS[..5] {
        let sim = SimConfig {
            crash_percent: 10,
            ..SimConfig::new(seed)
        };
        let checker = run_simulation(sim).await;
        assert!(checker.restarts > 0, "seed {seed} never crashed");
        assert!(
            checker.is_clean(),
            "seed {seed}: {:?}",
            checker.violations()
        );
    }
}

#[tokio::test]
async fn test_dst_ack_window_of_one() {
    for &seed in &REGRESSION_SEEDS[..3] {
        let sim = SimConfig {
            window: 1,
            lines: 50,
            ..SimConfig::new(seed)
        };
        let checker = run_simulation(sim).await;
        assert!(
            checker.is_clean(),
            "seed {seed}: {:?}",
            checker.violations()
        );
    }
}

#[tokio::test]
async fn test_dst_ack_concurrent_delivery() {
    const LINES: u64 = 500;
    const BATCH: usize = 8;

    for &seed in REGRESSION_SEEDS {
        let store = SimulatedBookmarkStore::new(seed);
        let config = AckTrackerConfig::for_testing()
            .with_mode(ReliabilityMode::Consecutive)
            .with_window_size(16);
        let mut source = open_source(&store, &config, LINES).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(SequenceNumber, u64)>();
        let confirmer = source.confirmer();

        // Destination: confirms in shuffled batches.
        let delivery = tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut batch = Vec::with_capacity(BATCH);
            let mut delivered = HashSet::new();
            loop {
                let next = rx.recv().await;
                if let Some(item) = next {
                    batch.push(item);
                }
                if batch.len() == BATCH || (next.is_none() && !batch.is_empty()) {
                    batch.shuffle(&mut rng);
                    for (sequence, line) in batch.drain(..) {
                        delivered.insert(line);
                        confirmer.confirm(sequence).unwrap();
                    }
                }
                if next.is_none() {
                    return delivered;
                }
            }
        });

        while let Some(tracked) = source.next_record().await.unwrap() {
            tx.send((tracked.sequence, line_number(&tracked.record)))
                .unwrap();
        }
        drop(tx);

        let delivered = delivery.await.unwrap();
        assert_eq!(delivered.len() as u64, LINES, "seed {seed}");

        source.shutdown().await.unwrap();
        assert_eq!(
            store.stored().and_then(|r| r.bookmark.as_offset()),
            Some(LINES),
            "seed {seed}"
        );
    }
}

#[tokio::test]
async fn test_dst_ack_resume_never_skips_undelivered() {
    // Confirm R1..R3 of R1..R5, persist, crash, resume.
    let store = SimulatedBookmarkStore::new(42);
    let config = AckTrackerConfig::for_testing().with_mode(ReliabilityMode::Consecutive);

    let mut source = open_source(&store, &config, 5).await;
    let mut tracked = Vec::new();
    while let Some(record) = source.next_record().await.unwrap() {
        tracked.push(record);
    }
    for record in &tracked[..3] {
        source.confirmer().confirm(record.sequence).unwrap();
    }
    // R5 confirmed too, but R4 is not: the gap holds the bookmark at R3.
    source.confirmer().confirm(tracked[4].sequence).unwrap();
    source.flush().await.unwrap();
    assert_eq!(stored_offset(&store), 3);
    drop(source);

    let mut resumed = open_source(&store, &config, 5).await;
    assert_eq!(resumed.resumed_from(), Some(&Bookmark::from_offset(3)));
    let first = resumed.next_record().await.unwrap().unwrap();
    assert_eq!(first.record, "line-4");
}
