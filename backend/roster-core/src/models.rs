// src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler_error::SchedulerError;

// --- Core Data Structures ---

pub type EmployeeId = String;
pub type TestId = String;
pub type DepartmentId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Active,
    Inactive,
    Archived,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Active => "active",
            TestStatus::Inactive => "inactive",
            TestStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(TestStatus::Active),
            "inactive" => Some(TestStatus::Inactive),
            "archived" => Some(TestStatus::Archived),
            _ => None,
        }
    }
}

/// How the candidate pool of a test is formed before the pair is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    Automatic,
    ManualEmployees,
    ManualDepartments,
}

impl AssignmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentType::Automatic => "automatic",
            AssignmentType::ManualEmployees => "manual_employees",
            AssignmentType::ManualDepartments => "manual_departments",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "automatic" => Some(AssignmentType::Automatic),
            "manual_employees" => Some(AssignmentType::ManualEmployees),
            "manual_departments" => Some(AssignmentType::ManualDepartments),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Completed,
    Skipped,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AssignmentStatus::Pending),
            "completed" => Some(AssignmentStatus::Completed),
            "skipped" => Some(AssignmentStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    Automatic,
    Manual,
}

impl AssignmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentMethod::Automatic => "automatic",
            AssignmentMethod::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "automatic" => Some(AssignmentMethod::Automatic),
            "manual" => Some(AssignmentMethod::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
        }
    }
}

/// A recurring check employees may be assigned to complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub id: TestId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    pub status: TestStatus,
    pub assignment_type: AssignmentType,
    #[serde(default)]
    pub employee_ids: Vec<EmployeeId>,
    #[serde(default)]
    pub department_ids: Vec<DepartmentId>,
    #[serde(default)]
    pub display_order: i32,
}

impl TestDefinition {
    pub fn is_active(&self) -> bool {
        self.status == TestStatus::Active
    }

    /// Narrows the eligible pool to the employees this test may draw from.
    pub fn candidate_pool(&self, eligible: &[EmployeeRef]) -> Vec<EmployeeRef> {
        match self.assignment_type {
            AssignmentType::Automatic => eligible.to_vec(),
            AssignmentType::ManualEmployees => eligible
                .iter()
                .filter(|e| self.employee_ids.contains(&e.id))
                .cloned()
                .collect(),
            AssignmentType::ManualDepartments => eligible
                .iter()
                .filter(|e| {
                    e.department
                        .as_ref()
                        .map_or(false, |d| self.department_ids.contains(d))
                })
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    #[serde(default)]
    pub department: Option<DepartmentId>,
    pub is_active: bool,
    pub test_eligible: bool,
}

impl Employee {
    pub fn to_ref(&self) -> EmployeeRef {
        EmployeeRef {
            id: self.id.clone(),
            name: self.name.clone(),
            department: self.department.clone(),
        }
    }
}

/// The slice of an employee the scheduler works with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRef {
    pub id: EmployeeId,
    pub name: String,
    pub department: Option<DepartmentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub employee_id: EmployeeId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LeaveStatus,
}

impl LeaveRequest {
    /// True when this is approved leave whose inclusive range contains `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.status == LeaveStatus::Approved && self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: Uuid,
    pub test_id: TestId,
    pub employee_id: EmployeeId,
    pub assigned_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: AssignmentStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Moves the assignment to `status`, keeping `completed_at` in step with it.
    pub fn set_status(&mut self, status: AssignmentStatus, now: DateTime<Utc>) {
        self.completed_at = match status {
            AssignmentStatus::Completed => self.completed_at.filter(|_| self.status == status).or(Some(now)),
            AssignmentStatus::Pending | AssignmentStatus::Skipped => None,
        };
        self.status = status;
    }
}

/// The day after `assigned_date`. Fails for the last representable date.
pub fn default_due_date(assigned_date: NaiveDate) -> Result<NaiveDate, SchedulerError> {
    assigned_date.succ_opt().ok_or_else(|| {
        SchedulerError::Validation(format!(
            "assigned date {} has no following day for a due date",
            assigned_date
        ))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAssignment {
    pub test_id: TestId,
    pub employee_id: EmployeeId,
    pub assigned_date: NaiveDate,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAssignment {
    pub fn new(
        test_id: &str,
        employee_id: &str,
        assigned_date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SchedulerError> {
        Ok(Self {
            test_id: test_id.to_string(),
            employee_id: employee_id.to_string(),
            assigned_date,
            due_date: default_due_date(assigned_date)?,
            notes: None,
            created_at,
        })
    }

    pub fn due(mut self, due_date: NaiveDate) -> Self {
        self.due_date = due_date;
        self
    }

    pub fn into_assignment(self, id: Uuid) -> Assignment {
        Assignment {
            id,
            test_id: self.test_id,
            employee_id: self.employee_id,
            assigned_date: self.assigned_date,
            due_date: self.due_date,
            status: AssignmentStatus::Pending,
            completed_at: None,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Append-only audit row: one allocation decision for one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentHistory {
    pub id: Uuid,
    pub assignment_date: NaiveDate,
    pub test_id: TestId,
    pub assigned_employees: Vec<EmployeeId>,
    pub total_eligible_employees: i32,
    pub assignment_method: AssignmentMethod,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryRecord {
    pub assignment_date: NaiveDate,
    pub test_id: TestId,
    pub assigned_employees: Vec<EmployeeId>,
    pub total_eligible_employees: i32,
    pub assignment_method: AssignmentMethod,
    pub created_at: DateTime<Utc>,
}

impl NewHistoryRecord {
    pub fn into_history(self, id: Uuid) -> AssignmentHistory {
        AssignmentHistory {
            id,
            assignment_date: self.assignment_date,
            test_id: self.test_id,
            assigned_employees: self.assigned_employees,
            total_eligible_employees: self.total_eligible_employees,
            assignment_method: self.assignment_method,
            created_at: self.created_at,
        }
    }
}

/// An assignment joined with the display data of its test and employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub test_title: String,
    pub test_display_order: i32,
    pub employee_name: String,
    pub employee_department: Option<DepartmentId>,
}
