// src/daily_run_tests.rs

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::NaiveDate;

    use crate::allocation::{RandomSource, SkipReason};
    use crate::clock::{Clock, TestClock};
    use crate::daily_run::*;
    use crate::lifecycle::{AssignmentService, UpdateAssignmentRequest};
    use crate::memory_store::InMemoryStore;
    use crate::models::{
        AssignmentStatus, AssignmentType, Employee, LeaveRequest, LeaveStatus, NewAssignment,
        TestDefinition, TestStatus,
    };
    use crate::store::SchedulerStore;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn test_definition(id: &str, display_order: i32) -> TestDefinition {
        TestDefinition {
            id: id.to_string(),
            title: format!("Test {}", id),
            description: Some("Quarterly compliance check".to_string()),
            instructions: None,
            status: TestStatus::Active,
            assignment_type: AssignmentType::Automatic,
            employee_ids: Vec::new(),
            department_ids: Vec::new(),
            display_order,
        }
    }

    fn employee(id: &str, department: &str) -> Employee {
        Employee {
            id: id.to_string(),
            name: format!("Employee {}", id),
            department: Some(department.to_string()),
            is_active: true,
            test_eligible: true,
        }
    }

    // --- Test Setup ---
    fn setup_test_environment(
        employees: &[&str],
    ) -> (DailyAssignmentRunner, Arc<InMemoryStore>, TestClock) {
        let clock = TestClock::new("2024-05-01 06:00:00");
        let store = Arc::new(InMemoryStore::new());
        for id in employees {
            store.configure_employee(employee(id, "ops"));
        }
        let runner = DailyAssignmentRunner::new(
            store.clone(),
            Arc::new(RandomSource::seeded(1234)),
            Arc::new(clock.clone()),
        );
        (runner, store, clock)
    }

    async fn triples(store: &InMemoryStore, date: NaiveDate) -> HashSet<(String, String)> {
        store
            .assignments_on(date)
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.assignment.test_id, v.assignment.employee_id))
            .collect()
    }

    #[tokio::test]
    async fn single_test_with_three_eligible_employees_creates_one_pair() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));
        let date = d("2024-05-01");

        let report = runner.run(date).await;

        assert!(report.success, "{}", report.message);
        assert_eq!(report.total_tests, 1);
        assert_eq!(report.total_assignments, 2);
        assert_eq!(report.eligible_employees, 3);

        let rows = store.assignments_on(date).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.assignment.test_id == "T1"));
        assert!(rows
            .iter()
            .all(|r| r.assignment.status == AssignmentStatus::Pending));

        let history = store.history_on(date).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].total_eligible_employees, 3);
        assert_eq!(history[0].assigned_employees.len(), 2);
    }

    #[tokio::test]
    async fn rerun_after_completion_creates_no_new_rows() {
        let (runner, store, clock) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));
        let date = d("2024-05-01");
        runner.run(date).await;

        let service = AssignmentService::new(store.clone(), Arc::new(clock.clone()));
        let first = store.assignments_on(date).await.unwrap()[0].assignment.id;
        service
            .update(
                first,
                UpdateAssignmentRequest {
                    status: Some(AssignmentStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let before = triples(&store, date).await;
        let rerun = runner.run(date).await;

        assert!(rerun.success);
        assert_eq!(rerun.total_assignments, 0);
        assert_eq!(triples(&store, date).await, before);
        assert_eq!(store.assignment_count(), 2);
    }

    #[tokio::test]
    async fn rerunning_a_date_is_idempotent_even_with_a_large_pool() {
        let (runner, store, _) =
            setup_test_environment(&["E1", "E2", "E3", "E4", "E5", "E6", "E7", "E8"]);
        store.configure_test(test_definition("T1", 1));
        store.configure_test(test_definition("T2", 2));
        let date = d("2024-05-01");

        runner.run(date).await;
        let once = triples(&store, date).await;
        let rerun = runner.run(date).await;

        assert_eq!(once.len(), 4);
        assert_eq!(triples(&store, date).await, once);
        assert_eq!(rerun.total_assignments, 0);
        assert!(rerun.per_test_debug.iter().all(|t| t.outcome
            == TestOutcome::Skipped {
                reason: SkipReason::AlreadyAllocated { existing: 2 }
            }));
    }

    #[tokio::test]
    async fn every_test_receives_zero_or_two_rows() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3", "E4"]);
        store.configure_test(test_definition("T1", 1));
        let mut narrow = test_definition("T2", 2);
        narrow.assignment_type = AssignmentType::ManualEmployees;
        narrow.employee_ids = vec!["E4".to_string()];
        store.configure_test(narrow);
        let date = d("2024-05-01");

        let report = runner.run(date).await;

        for debug in &report.per_test_debug {
            assert!(debug.created == 0 || debug.created == 2, "{:?}", debug);
        }
        let t2 = &report.per_test_debug[1];
        assert_eq!(t2.test_id, "T2");
        assert_eq!(t2.candidate_count, 1);
        assert_eq!(
            t2.outcome,
            TestOutcome::Skipped {
                reason: SkipReason::InsufficientCandidates { available: 1 }
            }
        );
        // A skipped test leaves no history behind.
        assert_eq!(store.history_on(date).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn employees_on_approved_leave_are_never_assigned() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3", "E4"]);
        store.configure_test(test_definition("T1", 1));
        store.configure_test(test_definition("T2", 2));
        store.configure_leave(LeaveRequest {
            employee_id: "E1".to_string(),
            start_date: d("2024-04-29"),
            end_date: d("2024-05-01"),
            status: LeaveStatus::Approved,
        });
        store.configure_leave(LeaveRequest {
            employee_id: "E2".to_string(),
            start_date: d("2024-05-01"),
            end_date: d("2024-05-03"),
            status: LeaveStatus::Approved,
        });
        let date = d("2024-05-01");

        let report = runner.run(date).await;

        assert_eq!(report.eligible_employees, 2);
        let assigned: HashSet<String> = triples(&store, date)
            .await
            .into_iter()
            .map(|(_, employee)| employee)
            .collect();
        assert!(!assigned.contains("E1"));
        assert!(!assigned.contains("E2"));
        assert_eq!(report.total_assignments, 4);
    }

    #[tokio::test]
    async fn partial_manual_pre_assignment_is_excluded_from_the_draw() {
        let (runner, store, clock) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));
        let date = d("2024-05-01");
        store
            .insert_assignment(NewAssignment::new("T1", "E2", date, clock.now()).unwrap())
            .await
            .unwrap();

        let report = runner.run(date).await;

        let debug = &report.per_test_debug[0];
        assert_eq!(debug.already_assigned, 1);
        assert_eq!(debug.created, 2);
        assert!(!debug.selected.contains(&"E2".to_string()));
        assert_eq!(store.assignment_count(), 3);
    }

    #[tokio::test]
    async fn inactive_and_archived_tests_do_not_participate() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        let mut inactive = test_definition("T1", 1);
        inactive.status = TestStatus::Inactive;
        let mut archived = test_definition("T2", 2);
        archived.status = TestStatus::Archived;
        store.configure_test(inactive);
        store.configure_test(archived);

        let report = runner.run(d("2024-05-01")).await;

        assert!(report.success);
        assert_eq!(report.total_tests, 0);
        assert_eq!(store.assignment_count(), 0);
    }

    #[tokio::test]
    async fn tests_are_processed_in_display_order() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("late", 30));
        store.configure_test(test_definition("early", 10));
        store.configure_test(test_definition("middle", 20));

        let report = runner.run(d("2024-05-01")).await;

        let order: Vec<&str> = report
            .per_test_debug
            .iter()
            .map(|t| t.test_id.as_str())
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn per_test_failure_is_recorded_and_the_run_continues() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));
        store.configure_test(test_definition("T2", 2));
        store.configure_test(test_definition("T3", 3));
        store.fail_writes_for_test("T2");

        let report = runner.run(d("2024-05-01")).await;

        assert!(!report.success);
        assert_eq!(report.per_test_debug.len(), 3);
        assert_eq!(report.total_assignments, 4);
        assert_eq!(report.failed_tests(), 1);
        assert!(matches!(
            report.per_test_debug[1].outcome,
            TestOutcome::Failed { .. }
        ));
        assert!(report.message.contains("1 test(s) failed"));
    }

    #[tokio::test]
    async fn failure_inside_a_pair_reports_the_row_already_written() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));
        store.fail_inserts_after(1);
        let date = d("2024-05-01");

        let report = runner.run(date).await;

        assert!(!report.success);
        assert_eq!(report.total_assignments, 1);
        let debug = &report.per_test_debug[0];
        assert_eq!(debug.created, 1);
        assert!(matches!(debug.outcome, TestOutcome::Failed { .. }));
        assert_eq!(store.assignment_count(), 1);

        let history = store.history_on(date).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].assigned_employees.len(), 1);
        let (_, stored) = triples(&store, date).await.into_iter().next().unwrap();
        assert_eq!(history[0].assigned_employees[0], stored);
    }

    #[tokio::test]
    async fn run_for_the_last_representable_date_is_rejected() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));

        let report = runner.run(NaiveDate::MAX).await;

        assert!(!report.success);
        assert!(report.message.contains("checking the run date"), "{}", report.message);
        assert_eq!(store.assignment_count(), 0);
    }

    #[tokio::test]
    async fn storage_outage_aborts_but_keeps_partial_counts() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));
        store.configure_test(test_definition("T2", 2));
        store.configure_test(test_definition("T3", 3));
        store.outage_on_test("T2");

        let report = runner.run(d("2024-05-01")).await;

        assert!(!report.success);
        assert_eq!(report.total_tests, 3);
        assert_eq!(report.total_assignments, 2);
        assert_eq!(report.per_test_debug.len(), 2, "T3 must not be attempted");
        assert!(report.message.starts_with("Run aborted after 2 of 3 tests"));
        // Rows written before the outage stay in place.
        assert_eq!(store.assignment_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_storage_fails_the_whole_run() {
        let (runner, store, _) = setup_test_environment(&["E1", "E2", "E3"]);
        store.configure_test(test_definition("T1", 1));
        store.set_outage(true);

        let report = runner.run(d("2024-05-01")).await;

        assert!(!report.success);
        assert_eq!(report.total_assignments, 0);
        assert!(report.message.contains("loading active tests"));
    }

    #[tokio::test]
    async fn run_report_serializes_with_camel_case_fields() {
        let (runner, store, _) = setup_test_environment(&["E1"]);
        store.configure_test(test_definition("T1", 1));

        let report = runner.run(d("2024-05-01")).await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["totalTests"], 1);
        assert_eq!(json["totalAssignments"], 0);
        assert_eq!(json["perTestDebug"][0]["outcome"]["kind"], "skipped");
        assert_eq!(
            json["perTestDebug"][0]["outcome"]["reason"]["type"],
            "insufficientCandidates"
        );
    }
}
