// src/assignment_writer.rs
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::{
    AssignmentMethod, EmployeeId, EmployeeRef, NewAssignment, NewHistoryRecord, TestDefinition,
};
use crate::scheduler_error::SchedulerError;
use crate::store::SchedulerStore;

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub created: usize,
    /// Selected employees whose row already existed and was dropped.
    pub dropped: usize,
    pub history_id: Uuid,
}

/// A write that stopped part way. `created` rows are already stored.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub created: usize,
    pub error: SchedulerError,
}

impl WriteFailure {
    fn new(created: usize, error: impl Into<SchedulerError>) -> Self {
        Self {
            created,
            error: error.into(),
        }
    }
}

fn history_record(
    test: &TestDefinition,
    date: NaiveDate,
    employees: Vec<EmployeeId>,
    total_eligible: usize,
    now: DateTime<Utc>,
) -> NewHistoryRecord {
    NewHistoryRecord {
        assignment_date: date,
        test_id: test.id.clone(),
        assigned_employees: employees,
        total_eligible_employees: i32::try_from(total_eligible).unwrap_or(i32::MAX),
        assignment_method: AssignmentMethod::Automatic,
        created_at: now,
    }
}

/// Persists an allocation decision for one test.
///
/// Rows are insert-if-absent on `(test_id, employee_id, assigned_date)`; a
/// conflicting row is dropped silently so reruns stay idempotent. Exactly one
/// history record is appended per call, whatever the number of inserted rows.
///
/// If an insert fails after earlier rows went in, the history record lists
/// only the employees whose rows are stored and the failure carries their count.
pub async fn write_allocation(
    store: &dyn SchedulerStore,
    test: &TestDefinition,
    date: NaiveDate,
    selected: &[EmployeeRef],
    total_eligible: usize,
    now: DateTime<Utc>,
) -> Result<WriteOutcome, WriteFailure> {
    let mut created = 0;
    let mut dropped = 0;
    let mut written: Vec<EmployeeId> = Vec::with_capacity(selected.len());

    for employee in selected {
        let inserted = match NewAssignment::new(&test.id, &employee.id, date, now) {
            Ok(new) => store
                .insert_assignment_if_absent(new)
                .await
                .map_err(SchedulerError::from),
            Err(e) => Err(e),
        };
        match inserted {
            Ok(Some(assignment)) => {
                debug!(
                    "Created assignment {} for employee {} on test {}",
                    assignment.id, employee.id, test.id
                );
                created += 1;
                written.push(employee.id.clone());
            }
            Ok(None) => {
                debug!(
                    "Employee {} already holds test {} on {}, insert dropped",
                    employee.id, test.id, date
                );
                dropped += 1;
                written.push(employee.id.clone());
            }
            Err(e) => {
                if created > 0 {
                    record_partial_write(store, test, date, written, total_eligible, now).await;
                }
                return Err(WriteFailure::new(created, e));
            }
        }
    }

    let history = store
        .append_history(history_record(test, date, written, total_eligible, now))
        .await
        .map_err(|e| WriteFailure::new(created, e))?;

    info!(
        "Wrote allocation for test {} on {}: {} created, {} dropped, history {}",
        test.id, date, created, dropped, history.id
    );
    Ok(WriteOutcome {
        created,
        dropped,
        history_id: history.id,
    })
}

async fn record_partial_write(
    store: &dyn SchedulerStore,
    test: &TestDefinition,
    date: NaiveDate,
    written: Vec<EmployeeId>,
    total_eligible: usize,
    now: DateTime<Utc>,
) {
    let count = written.len();
    match store
        .append_history(history_record(test, date, written, total_eligible, now))
        .await
    {
        Ok(history) => info!(
            "Recorded partial allocation for test {} on {} ({} of the pair), history {}",
            test.id, date, count, history.id
        ),
        Err(e) => error!(
            "Partial allocation for test {} on {} has no history record: {}",
            test.id, date, e
        ),
    }
}
