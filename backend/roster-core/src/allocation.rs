// src/allocation.rs
use chrono::NaiveDate;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use std::{collections::HashSet, fmt, sync::Mutex};
use tracing::{debug, info};

use crate::models::{EmployeeId, EmployeeRef, TestDefinition};

/// Assignments are only ever created in pairs.
pub const PAIR_SIZE: usize = 2;

/// Injected source of randomness for pair selection.
///
/// Production draws from OS entropy; tests and reproducible runs pass a seed.
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_seed_option(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => {
                info!("Allocation RNG seeded with {}", seed);
                Self::seeded(seed)
            }
            None => Self::from_entropy(),
        }
    }

    /// Draws `amount` distinct members of `pool`, each subset equally likely.
    fn choose(&self, pool: &[EmployeeRef], amount: usize) -> Vec<EmployeeRef> {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pool.choose_multiple(&mut *rng, amount).cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SkipReason {
    /// Fewer than `PAIR_SIZE` candidates remain after removing existing holders.
    #[serde(rename_all = "camelCase")]
    InsufficientCandidates { available: usize },
    /// The test already holds a full pair for the date.
    #[serde(rename_all = "camelCase")]
    AlreadyAllocated { existing: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientCandidates { available } => write!(
                f,
                "only {} candidate(s) available, {} required",
                available, PAIR_SIZE
            ),
            SkipReason::AlreadyAllocated { existing } => {
                write!(f, "already allocated ({} existing assignments)", existing)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub selected: Vec<EmployeeRef>,
    pub skipped: Option<SkipReason>,
    /// Size of the test's candidate pool before existing holders were removed.
    pub candidate_count: usize,
    /// Candidates left once existing holders were removed.
    pub available_count: usize,
}

impl AllocationPlan {
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn selected_ids(&self) -> Vec<EmployeeId> {
        self.selected.iter().map(|e| e.id.clone()).collect()
    }
}

/// Picks the pair of employees who must complete `test` on `date`.
///
/// `candidates` is the test's candidate pool; `already_assigned` are the
/// employees that hold an assignment for `(test, date)` already.
pub fn plan_allocation(
    date: NaiveDate,
    test: &TestDefinition,
    candidates: &[EmployeeRef],
    already_assigned: &HashSet<EmployeeId>,
    rng: &RandomSource,
) -> AllocationPlan {
    let candidate_count = candidates.len();

    if already_assigned.len() >= PAIR_SIZE {
        debug!(
            "Test {} already holds {} assignments on {}",
            test.id,
            already_assigned.len(),
            date
        );
        return AllocationPlan {
            selected: Vec::new(),
            skipped: Some(SkipReason::AlreadyAllocated {
                existing: already_assigned.len(),
            }),
            candidate_count,
            available_count: 0,
        };
    }

    // Sorted so a seeded source reproduces the same pair for the same pool.
    let mut available: Vec<EmployeeRef> = candidates
        .iter()
        .filter(|e| !already_assigned.contains(&e.id))
        .cloned()
        .collect();
    available.sort_by(|a, b| a.id.cmp(&b.id));
    available.dedup_by(|a, b| a.id == b.id);
    let available_count = available.len();

    if available_count < PAIR_SIZE {
        info!(
            "Skipping test {} on {}: {} candidate(s) available",
            test.id, date, available_count
        );
        return AllocationPlan {
            selected: Vec::new(),
            skipped: Some(SkipReason::InsufficientCandidates {
                available: available_count,
            }),
            candidate_count,
            available_count,
        };
    }

    let selected = rng.choose(&available, PAIR_SIZE);
    info!(
        "Planned test {} on {}: selected {:?} from {} candidates",
        test.id,
        date,
        selected.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        available_count
    );
    AllocationPlan {
        selected,
        skipped: None,
        candidate_count,
        available_count,
    }
}
