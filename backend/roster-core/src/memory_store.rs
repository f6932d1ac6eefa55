// src/memory_store.rs
use anyhow::{Context, Result as AnyhowResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    Assignment, AssignmentHistory, AssignmentView, Employee, EmployeeId, EmployeeRef,
    LeaveRequest, NewAssignment, NewHistoryRecord, TestDefinition, TestId,
};
use crate::store::{SchedulerStore, StoreError};

/// Contents of a `SEED_FILE` used to populate the in-memory directory.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    #[serde(default)]
    pub tests: Vec<TestDefinition>,
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub leave_requests: Vec<LeaveRequest>,
}

#[derive(Debug, Default)]
struct Faults {
    outage: bool,
    failing_tests: HashSet<TestId>,
    outage_on_test: Option<TestId>,
    saves_before_outage: Option<usize>,
    inserts_before_failure: Option<usize>,
    leave_lookup_outage: bool,
    history_rejected: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local store. Used when no `DATABASE_URL` is configured and by tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tests: Arc<Mutex<HashMap<TestId, TestDefinition>>>,
    employees: Arc<Mutex<HashMap<EmployeeId, Employee>>>,
    leave_requests: Arc<Mutex<Vec<LeaveRequest>>>,
    assignments: Arc<Mutex<HashMap<Uuid, Assignment>>>,
    history: Arc<Mutex<Vec<AssignmentHistory>>>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for test in seed.tests {
            store.configure_test(test);
        }
        for employee in seed.employees {
            store.configure_employee(employee);
        }
        for leave in seed.leave_requests {
            store.configure_leave(leave);
        }
        store
    }

    pub fn from_seed_file(path: &Path) -> AnyhowResult<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let seed: SeedData = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
        info!(
            "Loaded seed file {}: {} tests, {} employees, {} leave requests",
            path.display(),
            seed.tests.len(),
            seed.employees.len(),
            seed.leave_requests.len()
        );
        Ok(Self::from_seed(seed))
    }

    // --- Configuration Methods ---

    pub fn configure_test(&self, test: TestDefinition) {
        debug!("Configuring test: {:?}", test);
        lock(&self.tests).insert(test.id.clone(), test);
    }

    pub fn configure_employee(&self, employee: Employee) {
        debug!("Configuring employee: {:?}", employee);
        lock(&self.employees).insert(employee.id.clone(), employee);
    }

    pub fn configure_leave(&self, leave: LeaveRequest) {
        debug!("Configuring leave: {:?}", leave);
        lock(&self.leave_requests).push(leave);
    }

    #[cfg(test)]
    pub fn assignment_count(&self) -> usize {
        lock(&self.assignments).len()
    }

    #[cfg(test)]
    pub fn history_count(&self) -> usize {
        lock(&self.history).len()
    }

    // --- Failure Injection ---

    #[cfg(test)]
    pub fn set_outage(&self, outage: bool) {
        lock(&self.faults).outage = outage;
    }

    #[cfg(test)]
    pub fn fail_writes_for_test(&self, test_id: &str) {
        lock(&self.faults).failing_tests.insert(test_id.to_string());
    }

    #[cfg(test)]
    pub fn outage_on_test(&self, test_id: &str) {
        lock(&self.faults).outage_on_test = Some(test_id.to_string());
    }

    #[cfg(test)]
    pub fn outage_after_saves(&self, saves: usize) {
        lock(&self.faults).saves_before_outage = Some(saves);
    }

    #[cfg(test)]
    pub fn fail_inserts_after(&self, inserts: usize) {
        lock(&self.faults).inserts_before_failure = Some(inserts);
    }

    #[cfg(test)]
    pub fn set_leave_lookup_outage(&self, outage: bool) {
        lock(&self.faults).leave_lookup_outage = outage;
    }

    #[cfg(test)]
    pub fn reject_history(&self, rejected: bool) {
        lock(&self.faults).history_rejected = rejected;
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if lock(&self.faults).outage {
            return Err(StoreError::Unavailable("in-memory outage".to_string()));
        }
        Ok(())
    }

    fn check_test_writable(&self, test_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let faults = lock(&self.faults);
        if faults.outage_on_test.as_deref() == Some(test_id) {
            return Err(StoreError::Unavailable(format!(
                "connection lost while writing test {}",
                test_id
            )));
        }
        if faults.failing_tests.contains(test_id) {
            return Err(StoreError::Query(format!(
                "write rejected for test {}",
                test_id
            )));
        }
        Ok(())
    }

    fn check_save_budget(&self) -> Result<(), StoreError> {
        self.check_available()?;
        let mut faults = lock(&self.faults);
        match faults.saves_before_outage {
            Some(0) => {
                faults.outage = true;
                Err(StoreError::Unavailable("in-memory outage".to_string()))
            }
            Some(remaining) => {
                faults.saves_before_outage = Some(remaining - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_insert_budget(&self, test_id: &str) -> Result<(), StoreError> {
        self.check_test_writable(test_id)?;
        let mut faults = lock(&self.faults);
        match faults.inserts_before_failure {
            Some(0) => Err(StoreError::Query(format!(
                "insert rejected for test {}",
                test_id
            ))),
            Some(remaining) => {
                faults.inserts_before_failure = Some(remaining - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn view_of(&self, assignment: &Assignment) -> AssignmentView {
        let tests = lock(&self.tests);
        let employees = lock(&self.employees);
        let test = tests.get(&assignment.test_id);
        let employee = employees.get(&assignment.employee_id);
        AssignmentView {
            assignment: assignment.clone(),
            test_title: test
                .map(|t| t.title.clone())
                .unwrap_or_else(|| assignment.test_id.clone()),
            test_display_order: test.map_or(i32::MAX, |t| t.display_order),
            employee_name: employee
                .map(|e| e.name.clone())
                .unwrap_or_else(|| assignment.employee_id.clone()),
            employee_department: employee.and_then(|e| e.department.clone()),
        }
    }

    fn sorted_views<'a>(&self, rows: impl Iterator<Item = &'a Assignment>) -> Vec<AssignmentView> {
        let mut views: Vec<AssignmentView> = rows.map(|a| self.view_of(a)).collect();
        views.sort_by(|a, b| {
            a.assignment
                .assigned_date
                .cmp(&b.assignment.assigned_date)
                .then(a.test_display_order.cmp(&b.test_display_order))
                .then_with(|| a.assignment.test_id.cmp(&b.assignment.test_id))
                .then_with(|| a.employee_name.cmp(&b.employee_name))
                .then_with(|| a.assignment.employee_id.cmp(&b.assignment.employee_id))
        });
        views
    }
}

fn holds_triple(
    assignments: &HashMap<Uuid, Assignment>,
    test_id: &str,
    employee_id: &str,
    date: NaiveDate,
    except: Option<Uuid>,
) -> bool {
    assignments.values().any(|a| {
        Some(a.id) != except
            && a.test_id == test_id
            && a.employee_id == employee_id
            && a.assigned_date == date
    })
}

#[async_trait]
impl SchedulerStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn active_test_eligible_employees(&self) -> Result<Vec<EmployeeRef>, StoreError> {
        self.check_available()?;
        Ok(lock(&self.employees)
            .values()
            .filter(|e| e.is_active && e.test_eligible)
            .map(Employee::to_ref)
            .collect())
    }

    async fn is_on_approved_leave(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        if lock(&self.faults).leave_lookup_outage {
            return Err(StoreError::Unavailable("leave lookup timed out".to_string()));
        }
        Ok(lock(&self.leave_requests)
            .iter()
            .any(|l| l.employee_id == employee_id && l.covers(date)))
    }

    async fn active_tests(&self) -> Result<Vec<TestDefinition>, StoreError> {
        self.check_available()?;
        let mut tests: Vec<TestDefinition> = lock(&self.tests)
            .values()
            .filter(|t| t.is_active())
            .cloned()
            .collect();
        tests.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tests)
    }

    async fn find_test(&self, test_id: &str) -> Result<Option<TestDefinition>, StoreError> {
        self.check_available()?;
        Ok(lock(&self.tests).get(test_id).cloned())
    }

    async fn find_employee(&self, employee_id: &str) -> Result<Option<EmployeeRef>, StoreError> {
        self.check_available()?;
        Ok(lock(&self.employees).get(employee_id).map(Employee::to_ref))
    }

    async fn assigned_employee_ids(
        &self,
        test_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<EmployeeId>, StoreError> {
        self.check_test_writable(test_id)?;
        Ok(lock(&self.assignments)
            .values()
            .filter(|a| a.test_id == test_id && a.assigned_date == date)
            .map(|a| a.employee_id.clone())
            .collect())
    }

    async fn insert_assignment_if_absent(
        &self,
        new: NewAssignment,
    ) -> Result<Option<Assignment>, StoreError> {
        self.check_insert_budget(&new.test_id)?;
        let mut assignments = lock(&self.assignments);
        if holds_triple(
            &assignments,
            &new.test_id,
            &new.employee_id,
            new.assigned_date,
            None,
        ) {
            return Ok(None);
        }
        let assignment = new.into_assignment(Uuid::new_v4());
        assignments.insert(assignment.id, assignment.clone());
        Ok(Some(assignment))
    }

    async fn insert_assignment(&self, new: NewAssignment) -> Result<Assignment, StoreError> {
        self.check_insert_budget(&new.test_id)?;
        let mut assignments = lock(&self.assignments);
        if holds_triple(
            &assignments,
            &new.test_id,
            &new.employee_id,
            new.assigned_date,
            None,
        ) {
            return Err(StoreError::UniqueViolation(format!(
                "employee {} already holds test {} on {}",
                new.employee_id, new.test_id, new.assigned_date
            )));
        }
        let assignment = new.into_assignment(Uuid::new_v4());
        assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, StoreError> {
        self.check_available()?;
        Ok(lock(&self.assignments).get(&id).cloned())
    }

    async fn save_assignment(
        &self,
        assignment: &Assignment,
    ) -> Result<Option<Assignment>, StoreError> {
        self.check_save_budget()?;
        let mut assignments = lock(&self.assignments);
        if !assignments.contains_key(&assignment.id) {
            return Ok(None);
        }
        if holds_triple(
            &assignments,
            &assignment.test_id,
            &assignment.employee_id,
            assignment.assigned_date,
            Some(assignment.id),
        ) {
            return Err(StoreError::UniqueViolation(format!(
                "employee {} already holds test {} on {}",
                assignment.employee_id, assignment.test_id, assignment.assigned_date
            )));
        }
        assignments.insert(assignment.id, assignment.clone());
        Ok(Some(assignment.clone()))
    }

    async fn delete_assignment(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(lock(&self.assignments).remove(&id).is_some())
    }

    async fn assignments_on(&self, date: NaiveDate) -> Result<Vec<AssignmentView>, StoreError> {
        self.check_available()?;
        let rows: Vec<Assignment> = lock(&self.assignments)
            .values()
            .filter(|a| a.assigned_date == date)
            .cloned()
            .collect();
        Ok(self.sorted_views(rows.iter()))
    }

    async fn assignments_for_employee(
        &self,
        employee_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AssignmentView>, StoreError> {
        self.check_available()?;
        let rows: Vec<Assignment> = lock(&self.assignments)
            .values()
            .filter(|a| a.employee_id == employee_id)
            .filter(|a| date.map_or(true, |d| a.assigned_date == d))
            .cloned()
            .collect();
        Ok(self.sorted_views(rows.iter()))
    }

    async fn append_history(
        &self,
        record: NewHistoryRecord,
    ) -> Result<AssignmentHistory, StoreError> {
        self.check_test_writable(&record.test_id)?;
        if lock(&self.faults).history_rejected {
            return Err(StoreError::Query(format!(
                "history write rejected for test {}",
                record.test_id
            )));
        }
        let history = record.into_history(Uuid::new_v4());
        lock(&self.history).push(history.clone());
        Ok(history)
    }

    async fn history_on(&self, date: NaiveDate) -> Result<Vec<AssignmentHistory>, StoreError> {
        self.check_available()?;
        Ok(lock(&self.history)
            .iter()
            .filter(|h| h.assignment_date == date)
            .cloned()
            .collect())
    }
}
