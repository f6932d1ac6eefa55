// src/eligibility.rs
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::models::EmployeeRef;
use crate::store::{SchedulerStore, StoreError};

/// Employees that may receive assignments on `date`: active, test-eligible and
/// not covered by an approved leave request. Order is unspecified.
///
/// An empty result is a normal outcome; only storage failures are errors.
pub async fn resolve_eligible(
    store: &dyn SchedulerStore,
    date: NaiveDate,
) -> Result<Vec<EmployeeRef>, StoreError> {
    let candidates = store.active_test_eligible_employees().await?;
    let candidate_count = candidates.len();

    let mut eligible = Vec::with_capacity(candidate_count);
    for employee in candidates {
        if store.is_on_approved_leave(&employee.id, date).await? {
            debug!("Employee {} is on approved leave on {}", employee.id, date);
            continue;
        }
        eligible.push(employee);
    }

    info!(
        "Resolved {} eligible employees for {} ({} excluded by leave)",
        eligible.len(),
        date,
        candidate_count - eligible.len()
    );
    Ok(eligible)
}
