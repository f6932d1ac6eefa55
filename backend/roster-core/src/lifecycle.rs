// src/lifecycle.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::eligibility::resolve_eligible;
use crate::models::{
    Assignment, AssignmentHistory, AssignmentMethod, AssignmentStatus, AssignmentView,
    NewAssignment, NewHistoryRecord, TestId,
};
use crate::scheduler_error::SchedulerError;
use crate::store::{SchedulerStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAssignments {
    pub test_id: TestId,
    pub test_title: String,
    pub display_order: i32,
    pub assignments: Vec<AssignmentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentsByDate {
    pub date: NaiveDate,
    pub tests: Vec<TestAssignments>,
    pub total_tests: usize,
    pub total_assignments: usize,
    pub is_today: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentRequest {
    #[serde(default)]
    pub test_id: String,
    #[serde(default)]
    pub employee_id: String,
    /// Defaults to today.
    pub assigned_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAssignmentRequest {
    pub status: Option<AssignmentStatus>,
    pub employee_id: Option<String>,
    /// An empty string clears the notes.
    pub notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateItem {
    #[serde(default)]
    pub id: String,
    /// Parsed per item so one bad value does not reject the whole batch.
    #[serde(default)]
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemError {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<Assignment>,
    pub errors: Vec<BatchItemError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Maps a write failure, turning a duplicate triple into a conflict.
fn write_error(err: StoreError) -> SchedulerError {
    match err {
        StoreError::UniqueViolation(detail) => SchedulerError::Conflict(detail),
        other => SchedulerError::Storage(other),
    }
}

fn not_found(id: Uuid) -> SchedulerError {
    SchedulerError::NotFound(format!("assignment {}", id))
}

/// Admin and self-service operations on individual assignments.
pub struct AssignmentService {
    store: Arc<dyn SchedulerStore>,
    clock: Arc<dyn Clock>,
    today_only_edits: bool,
}

impl AssignmentService {
    pub fn new(store: Arc<dyn SchedulerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            today_only_edits: false,
        }
    }

    /// Restricts create and delete to assignments dated today.
    pub fn with_today_only_edits(mut self, today_only: bool) -> Self {
        self.today_only_edits = today_only;
        self
    }

    fn ensure_editable(&self, date: NaiveDate) -> Result<(), SchedulerError> {
        let today = self.clock.today();
        if self.today_only_edits && date != today {
            return Err(SchedulerError::Validation(format!(
                "assignments can only be changed for today ({}), not {}",
                today, date
            )));
        }
        Ok(())
    }

    pub async fn get_by_date(&self, date: NaiveDate) -> Result<AssignmentsByDate, SchedulerError> {
        let views = self.store.assignments_on(date).await?;
        let total_assignments = views.len();

        // Views arrive in display order.
        let mut tests: Vec<TestAssignments> = Vec::new();
        for view in views {
            let starts_group = tests
                .last()
                .map_or(true, |group| group.test_id != view.assignment.test_id);
            if starts_group {
                tests.push(TestAssignments {
                    test_id: view.assignment.test_id.clone(),
                    test_title: view.test_title.clone(),
                    display_order: view.test_display_order,
                    assignments: Vec::new(),
                });
            }
            if let Some(group) = tests.last_mut() {
                group.assignments.push(view);
            }
        }

        Ok(AssignmentsByDate {
            date,
            total_tests: tests.len(),
            total_assignments,
            tests,
            is_today: date == self.clock.today(),
        })
    }

    pub async fn create(&self, request: CreateAssignmentRequest) -> Result<Assignment, SchedulerError> {
        let test_id = request.test_id.trim();
        let employee_id = request.employee_id.trim();
        if test_id.is_empty() || employee_id.is_empty() {
            return Err(SchedulerError::Validation(
                "testId and employeeId are required".to_string(),
            ));
        }
        let assigned_date = request.assigned_date.unwrap_or_else(|| self.clock.today());
        self.ensure_editable(assigned_date)?;
        if let Some(due) = request.due_date {
            if due < assigned_date {
                return Err(SchedulerError::Validation(format!(
                    "due date {} is before assigned date {}",
                    due, assigned_date
                )));
            }
        }

        let store = self.store.as_ref();
        if store.find_test(test_id).await?.is_none() {
            return Err(SchedulerError::Validation(format!("unknown test {}", test_id)));
        }
        if store.find_employee(employee_id).await?.is_none() {
            return Err(SchedulerError::Validation(format!(
                "unknown employee {}",
                employee_id
            )));
        }

        let now = self.clock.now();
        let mut new = NewAssignment::new(test_id, employee_id, assigned_date, now)?;
        if let Some(due) = request.due_date {
            new = new.due(due);
        }
        new.notes = request.notes.filter(|n| !n.trim().is_empty());

        // Resolved up front so the history record never carries a guessed count.
        let total_eligible = resolve_eligible(store, assigned_date).await?.len();

        let assignment = store.insert_assignment(new).await.map_err(write_error)?;
        info!(
            "Created manual assignment {} (test {}, employee {}, {})",
            assignment.id, test_id, employee_id, assigned_date
        );

        let record = NewHistoryRecord {
            assignment_date: assigned_date,
            test_id: test_id.to_string(),
            assigned_employees: vec![employee_id.to_string()],
            total_eligible_employees: i32::try_from(total_eligible).unwrap_or(i32::MAX),
            assignment_method: AssignmentMethod::Manual,
            created_at: now,
        };
        if let Err(e) = store.append_history(record).await {
            error!(
                "History write failed for manual assignment {}, removing it: {}",
                assignment.id, e
            );
            if let Err(cleanup) = store.delete_assignment(assignment.id).await {
                error!(
                    "Manual assignment {} is stored without history: {}",
                    assignment.id, cleanup
                );
            }
            return Err(SchedulerError::Storage(e));
        }

        Ok(assignment)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateAssignmentRequest,
    ) -> Result<Assignment, SchedulerError> {
        let store = self.store.as_ref();
        let mut assignment = store.get_assignment(id).await?.ok_or_else(|| not_found(id))?;
        let now = self.clock.now();

        let target = request.status.unwrap_or(assignment.status);
        if request.completed_at.is_some() && target != AssignmentStatus::Completed {
            return Err(SchedulerError::Validation(format!(
                "completedAt given but assignment would be {}",
                target.as_str()
            )));
        }

        if let Some(employee_id) = request.employee_id.as_deref().map(str::trim) {
            if employee_id.is_empty() {
                return Err(SchedulerError::Validation(
                    "employeeId must not be blank".to_string(),
                ));
            }
            if employee_id != assignment.employee_id {
                if store.find_employee(employee_id).await?.is_none() {
                    return Err(SchedulerError::Validation(format!(
                        "unknown employee {}",
                        employee_id
                    )));
                }
                info!(
                    "Reassigning assignment {} from {} to {}",
                    id, assignment.employee_id, employee_id
                );
                assignment.employee_id = employee_id.to_string();
            }
        }

        if let Some(status) = request.status {
            assignment.set_status(status, now);
        }
        if let Some(completed_at) = request.completed_at {
            assignment.completed_at = Some(completed_at);
        }
        if let Some(notes) = request.notes {
            assignment.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }
        assignment.updated_at = now;

        let saved = store
            .save_assignment(&assignment)
            .await
            .map_err(write_error)?
            .ok_or_else(|| not_found(id))?;
        info!("Updated assignment {} (status {})", id, saved.status.as_str());
        Ok(saved)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), SchedulerError> {
        let store = self.store.as_ref();
        if self.today_only_edits {
            let assignment = store.get_assignment(id).await?.ok_or_else(|| not_found(id))?;
            self.ensure_editable(assignment.assigned_date)?;
        }
        if !store.delete_assignment(id).await? {
            return Err(not_found(id));
        }
        info!("Deleted assignment {}", id);
        Ok(())
    }

    /// Applies each item on its own. A systemic storage failure stops the
    /// batch; the result then carries the items processed so far.
    pub async fn batch_update(&self, items: Vec<BatchUpdateItem>) -> Result<BatchResult, SchedulerError> {
        if items.is_empty() {
            return Err(SchedulerError::Validation(
                "batch must contain at least one update".to_string(),
            ));
        }
        let total = items.len();
        let mut result = BatchResult {
            success: false,
            success_count: 0,
            error_count: 0,
            results: Vec::new(),
            errors: Vec::new(),
            message: None,
        };

        for item in items {
            let id = match Uuid::parse_str(item.id.trim()) {
                Ok(id) => id,
                Err(_) => {
                    result.errors.push(BatchItemError {
                        id: item.id,
                        error: "invalid assignment id".to_string(),
                    });
                    continue;
                }
            };
            let status = match AssignmentStatus::parse(item.status.trim()) {
                Some(status) => status,
                None => {
                    warn!("Batch item {} has unknown status '{}'", id, item.status);
                    result.errors.push(BatchItemError {
                        error: format!("unknown status '{}'", item.status),
                        id: item.id,
                    });
                    continue;
                }
            };
            let request = UpdateAssignmentRequest {
                status: Some(status),
                notes: item.notes,
                ..Default::default()
            };
            match self.update(id, request).await {
                Ok(assignment) => result.results.push(assignment),
                Err(e) if e.is_systemic() => {
                    error!("Batch update stopped at {}: {}", id, e);
                    result.errors.push(BatchItemError {
                        id: item.id,
                        error: e.to_string(),
                    });
                    let processed = result.results.len() + result.errors.len();
                    result.message = Some(format!(
                        "Batch stopped after {} of {} items: {}",
                        processed, total, e
                    ));
                    break;
                }
                Err(e) => {
                    warn!("Batch item {} failed: {}", id, e);
                    result.errors.push(BatchItemError {
                        id: item.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        result.success_count = result.results.len();
        result.error_count = result.errors.len();
        result.success = result.error_count == 0;
        info!(
            "Batch update of {} items: {} succeeded, {} failed",
            total, result.success_count, result.error_count
        );
        Ok(result)
    }

    pub async fn history_on(&self, date: NaiveDate) -> Result<Vec<AssignmentHistory>, SchedulerError> {
        Ok(self.store.history_on(date).await?)
    }

    pub async fn assignments_for_employee(
        &self,
        employee_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AssignmentView>, SchedulerError> {
        if self.store.find_employee(employee_id).await?.is_none() {
            return Err(SchedulerError::NotFound(format!("employee {}", employee_id)));
        }
        Ok(self.store.assignments_for_employee(employee_id, date).await?)
    }
}
