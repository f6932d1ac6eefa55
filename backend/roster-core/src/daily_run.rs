// src/daily_run.rs
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::allocation::{plan_allocation, RandomSource, SkipReason};
use crate::assignment_writer::write_allocation;
use crate::clock::Clock;
use crate::eligibility::resolve_eligible;
use crate::models::{default_due_date, EmployeeId, EmployeeRef, TestDefinition, TestId};
use crate::scheduler_error::SchedulerError;
use crate::store::SchedulerStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TestOutcome {
    Assigned,
    Skipped { reason: SkipReason },
    Failed { error: String },
}

/// Trace of what happened to one test during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunDebug {
    pub test_id: TestId,
    pub test_title: String,
    pub candidate_count: usize,
    pub already_assigned: usize,
    pub selected: Vec<EmployeeId>,
    pub created: usize,
    pub outcome: TestOutcome,
}

impl TestRunDebug {
    fn new(test: &TestDefinition, candidate_count: usize) -> Self {
        Self {
            test_id: test.id.clone(),
            test_title: test.title.clone(),
            candidate_count,
            already_assigned: 0,
            selected: Vec::new(),
            created: 0,
            outcome: TestOutcome::Assigned,
        }
    }

    fn failed(mut self, error: &SchedulerError) -> Self {
        self.outcome = TestOutcome::Failed {
            error: error.to_string(),
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub date: NaiveDate,
    pub total_tests: usize,
    pub total_assignments: usize,
    pub eligible_employees: usize,
    pub success: bool,
    pub message: String,
    pub per_test_debug: Vec<TestRunDebug>,
}

impl RunReport {
    fn aborted(date: NaiveDate, stage: &str, err: impl Display) -> Self {
        Self {
            date,
            total_tests: 0,
            total_assignments: 0,
            eligible_employees: 0,
            success: false,
            message: format!("Run aborted while {}: {}", stage, err),
            per_test_debug: Vec::new(),
        }
    }

    pub fn failed_tests(&self) -> usize {
        self.per_test_debug
            .iter()
            .filter(|t| matches!(t.outcome, TestOutcome::Failed { .. }))
            .count()
    }
}

/// Runs eligibility, planning and writing for every active test of a date.
pub struct DailyAssignmentRunner {
    store: Arc<dyn SchedulerStore>,
    rng: Arc<RandomSource>,
    clock: Arc<dyn Clock>,
}

impl DailyAssignmentRunner {
    pub fn new(store: Arc<dyn SchedulerStore>, rng: Arc<RandomSource>, clock: Arc<dyn Clock>) -> Self {
        Self { store, rng, clock }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Per-test failures are recorded and the run moves on to the next test.
    /// A systemic storage failure stops the run; the report then carries the
    /// counts reached so far with `success = false`.
    pub async fn run(&self, date: NaiveDate) -> RunReport {
        info!("Starting daily assignment run for {}", date);
        let store = self.store.as_ref();

        if let Err(e) = default_due_date(date) {
            error!("Daily run for {} rejected: {}", date, e);
            return RunReport::aborted(date, "checking the run date", &e);
        }

        let tests = match store.active_tests().await {
            Ok(tests) => tests,
            Err(e) => {
                error!("Daily run for {} could not load active tests: {}", date, e);
                return RunReport::aborted(date, "loading active tests", &e);
            }
        };

        let eligible = match resolve_eligible(store, date).await {
            Ok(eligible) => eligible,
            Err(e) => {
                error!("Daily run for {} could not resolve eligibility: {}", date, e);
                let mut report = RunReport::aborted(date, "resolving eligible employees", &e);
                report.total_tests = tests.len();
                return report;
            }
        };

        let mut report = RunReport {
            date,
            total_tests: tests.len(),
            total_assignments: 0,
            eligible_employees: eligible.len(),
            success: true,
            message: String::new(),
            per_test_debug: Vec::with_capacity(tests.len()),
        };
        let mut abort: Option<SchedulerError> = None;

        for test in &tests {
            match self.run_test(test, date, &eligible).await {
                Ok(debug) => {
                    report.total_assignments += debug.created;
                    report.per_test_debug.push(debug);
                }
                Err((debug, e)) if e.is_systemic() => {
                    error!("Daily run for {} aborted on test {}: {}", date, test.id, e);
                    report.total_assignments += debug.created;
                    report.per_test_debug.push(debug);
                    abort = Some(e);
                    break;
                }
                Err((debug, e)) => {
                    warn!("Test {} failed during run for {}: {}", test.id, date, e);
                    report.total_assignments += debug.created;
                    report.per_test_debug.push(debug);
                }
            }
        }

        let failed = report.failed_tests();
        report.success = abort.is_none() && failed == 0;
        report.message = match &abort {
            Some(e) => format!(
                "Run aborted after {} of {} tests: {}",
                report.per_test_debug.len(),
                report.total_tests,
                e
            ),
            None if failed > 0 => format!(
                "Created {} assignments across {} tests; {} test(s) failed",
                report.total_assignments, report.total_tests, failed
            ),
            None => format!(
                "Created {} assignments across {} tests",
                report.total_assignments, report.total_tests
            ),
        };
        info!("Daily assignment run for {} finished: {}", date, report.message);
        report
    }

    async fn run_test(
        &self,
        test: &TestDefinition,
        date: NaiveDate,
        eligible: &[EmployeeRef],
    ) -> Result<TestRunDebug, (TestRunDebug, SchedulerError)> {
        let store = self.store.as_ref();
        let candidates = test.candidate_pool(eligible);
        let mut debug = TestRunDebug::new(test, candidates.len());

        let already_assigned = match store.assigned_employee_ids(&test.id, date).await {
            Ok(ids) => ids,
            Err(e) => {
                let e = SchedulerError::from(e);
                return Err((debug.failed(&e), e));
            }
        };
        debug.already_assigned = already_assigned.len();

        let plan = plan_allocation(date, test, &candidates, &already_assigned, &self.rng);
        if let Some(reason) = plan.skipped.clone() {
            debug.outcome = TestOutcome::Skipped { reason };
            return Ok(debug);
        }
        debug.selected = plan.selected_ids();

        match write_allocation(
            store,
            test,
            date,
            &plan.selected,
            plan.candidate_count,
            self.clock.now(),
        )
        .await
        {
            Ok(outcome) => {
                debug.created = outcome.created;
                Ok(debug)
            }
            Err(failure) => {
                debug.created = failure.created;
                Err((debug.failed(&failure.error), failure.error))
            }
        }
    }
}
