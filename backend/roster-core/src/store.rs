// src/store.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Assignment, AssignmentHistory, AssignmentView, EmployeeId, EmployeeRef, NewAssignment,
    NewHistoryRecord, TestDefinition,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage cannot be reached at all. Multi-item operations abort on this.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage query failed: {0}")]
    Query(String),
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("Stored row could not be decoded: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_systemic(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Everything the scheduler reads from and writes to persistence.
///
/// Directory reads (employees, leave, tests) are owned by other parts of the
/// portal; the scheduler only consumes them. Assignment rows are shared with
/// admin edits and self-service updates, so writes are last-writer-wins
/// except for creation, which is keyed on `(test_id, employee_id, assigned_date)`.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    // --- Directory (read only) ---

    async fn active_test_eligible_employees(&self) -> Result<Vec<EmployeeRef>, StoreError>;

    async fn is_on_approved_leave(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// Active tests ordered by display order.
    async fn active_tests(&self) -> Result<Vec<TestDefinition>, StoreError>;

    async fn find_test(&self, test_id: &str) -> Result<Option<TestDefinition>, StoreError>;

    async fn find_employee(&self, employee_id: &str) -> Result<Option<EmployeeRef>, StoreError>;

    // --- Assignments ---

    async fn assigned_employee_ids(
        &self,
        test_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<EmployeeId>, StoreError>;

    /// Inserts unless the triple already exists; `Ok(None)` means the row was dropped.
    async fn insert_assignment_if_absent(
        &self,
        new: NewAssignment,
    ) -> Result<Option<Assignment>, StoreError>;

    /// Inserts or fails with `StoreError::UniqueViolation`.
    async fn insert_assignment(&self, new: NewAssignment) -> Result<Assignment, StoreError>;

    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, StoreError>;

    /// Overwrites the mutable columns of an existing row. `Ok(None)` if the row is gone.
    async fn save_assignment(&self, assignment: &Assignment)
        -> Result<Option<Assignment>, StoreError>;

    async fn delete_assignment(&self, id: Uuid) -> Result<bool, StoreError>;

    /// All assignments for `date`, ordered by test display order then employee name.
    async fn assignments_on(&self, date: NaiveDate) -> Result<Vec<AssignmentView>, StoreError>;

    async fn assignments_for_employee(
        &self,
        employee_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AssignmentView>, StoreError>;

    // --- History ---

    async fn append_history(
        &self,
        record: NewHistoryRecord,
    ) -> Result<AssignmentHistory, StoreError>;

    async fn history_on(&self, date: NaiveDate) -> Result<Vec<AssignmentHistory>, StoreError>;
}
