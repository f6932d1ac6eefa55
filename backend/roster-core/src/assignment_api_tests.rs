// src/assignment_api_tests.rs

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::allocation::RandomSource;
    use crate::assignment_api::{router, AppState};
    use crate::clock::TestClock;
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

    fn employee(id: &str, name: &str) -> Employee {
        Employee {
            id: id.to_string(),
            name: name.to_string(),
            department: Some("ops".to_string()),
            is_active: true,
            test_eligible: true,
        }
    }

    // --- Test Setup ---
    fn setup_test_environment() -> (Router, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.configure_test(TestDefinition {
            id: "T1".to_string(),
            title: "Fire safety".to_string(),
            description: None,
            instructions: Some("Walk the evacuation route".to_string()),
            status: TestStatus::Active,
            assignment_type: AssignmentType::Automatic,
            employee_ids: Vec::new(),
            department_ids: Vec::new(),
            display_order: 1,
        });
        store.configure_employee(employee("E1", "Alice"));
        store.configure_employee(employee("E2", "Bob"));
        store.configure_employee(employee("E3", "Carol"));
        store.configure_leave(LeaveRequest {
            employee_id: "E3".to_string(),
            start_date: d("2024-05-01"),
            end_date: d("2024-05-01"),
            status: LeaveStatus::Approved,
        });

        let state = AppState::new(
            store.clone(),
            Arc::new(RandomSource::seeded(99)),
            Arc::new(TestClock::new("2024-05-01 08:00:00")),
            true,
        );
        (router(state), store)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn send_raw(
        app: &Router,
        uri: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn seed_assignment(store: &InMemoryStore, employee_id: &str) -> Uuid {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
        store
            .insert_assignment(NewAssignment::new("T1", employee_id, d("2024-05-01"), created).unwrap())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn health_reports_ok_and_unavailable_storage() {
        let (app, store) = setup_test_environment();

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        store.set_outage(true);
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn run_defaults_to_today_and_skips_employees_on_leave() {
        let (app, store) = setup_test_environment();

        let (status, report) = send(&app, Method::POST, "/api/assignments/run", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["date"], "2024-05-01");
        assert_eq!(report["success"], true);
        assert_eq!(report["totalAssignments"], 2);
        assert_eq!(report["eligibleEmployees"], 2);
        let assigned: Vec<String> = store
            .assignments_on(d("2024-05-01"))
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.assignment.employee_id)
            .collect();
        assert!(!assigned.contains(&"E3".to_string()));
    }

    #[tokio::test]
    async fn run_accepts_an_explicit_date() {
        let (app, _) = setup_test_environment();

        let (status, report) = send(
            &app,
            Method::POST,
            "/api/assignments/run",
            Some(json!({ "date": "2024-05-02" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["date"], "2024-05-02");
        assert_eq!(report["eligibleEmployees"], 3);
    }

    #[tokio::test]
    async fn failed_run_still_returns_the_report() {
        let (app, store) = setup_test_environment();
        store.outage_on_test("T1");

        let (status, report) = send(&app, Method::POST, "/api/assignments/run", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(report["success"], false);
        assert_eq!(report["totalTests"], 1);
    }

    #[tokio::test]
    async fn assignments_by_date_are_grouped_per_test() {
        let (app, store) = setup_test_environment();
        seed_assignment(&store, "E2").await;
        seed_assignment(&store, "E1").await;

        let (status, body) = send(&app, Method::GET, "/api/assignments?date=2024-05-01", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isToday"], true);
        assert_eq!(body["totalTests"], 1);
        assert_eq!(body["totalAssignments"], 2);
        assert_eq!(body["tests"][0]["testTitle"], "Fire safety");
        assert_eq!(body["tests"][0]["assignments"][0]["employeeName"], "Alice");
        assert_eq!(body["tests"][0]["assignments"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn malformed_date_query_is_rejected() {
        let (app, _) = setup_test_environment();

        let (status, body) =
            send(&app, Method::GET, "/api/assignments?date=yesterday", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string(), "{}", body);
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let (app, _) = setup_test_environment();

        let (status, body) = send_raw(
            &app,
            "/api/assignments/batch",
            Some("application/json"),
            r#"[{"id": "x", "status": "completed""#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string(), "{}", body);

        let (status, body) = send_raw(
            &app,
            "/api/assignments",
            Some("application/json"),
            r#"{"testId": 7}"#,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string(), "{}", body);

        let (status, body) =
            send_raw(&app, "/api/assignments", None, r#"{"testId": "T1"}"#).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body["error"].is_string(), "{}", body);

        let (status, body) = send_raw(
            &app,
            "/api/assignments/run",
            Some("application/json"),
            r#"{"date": "tomorrow"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string(), "{}", body);
    }

    #[tokio::test]
    async fn create_then_conflict_on_duplicate() {
        let (app, _) = setup_test_environment();
        let payload = json!({ "testId": "T1", "employeeId": "E1" });

        let (status, created) =
            send(&app, Method::POST, "/api/assignments", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["dueDate"], "2024-05-02");

        let (status, body) = send(&app, Method::POST, "/api/assignments", Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn create_for_another_day_is_rejected() {
        let (app, _) = setup_test_environment();

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/assignments",
            Some(json!({ "testId": "T1", "employeeId": "E1", "assignedDate": "2024-05-04" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_completes_and_reopens_an_assignment() {
        let (app, store) = setup_test_environment();
        let id = seed_assignment(&store, "E1").await;
        let uri = format!("/api/assignments/{}", id);

        let (status, body) =
            send(&app, Method::PATCH, &uri, Some(json!({ "status": "completed" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["completedAt"], "2024-05-01T08:00:00Z");

        let (status, body) =
            send(&app, Method::PATCH, &uri, Some(json!({ "status": "pending" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["completedAt"].is_null());
    }

    #[tokio::test]
    async fn patch_reports_missing_and_malformed_ids() {
        let (app, _) = setup_test_environment();

        let (status, _) = send(
            &app,
            Method::PATCH,
            &format!("/api/assignments/{}", Uuid::new_v4()),
            Some(json!({ "status": "completed" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::PATCH,
            "/api/assignments/42",
            Some(json!({ "status": "completed" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_returns_no_content_then_not_found() {
        let (app, store) = setup_test_environment();
        let id = seed_assignment(&store, "E1").await;
        let uri = format!("/api/assignments/{}", id);

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn batch_reports_per_item_results() {
        let (app, store) = setup_test_environment();
        let id = seed_assignment(&store, "E1").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/assignments/batch",
            Some(json!([
                { "id": id.to_string(), "status": "skipped", "notes": "on site visit" },
                { "id": "nope", "status": "completed" }
            ])),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["errorCount"], 1);
        assert_eq!(body["errors"][0]["id"], "nope");
        assert_eq!(body["results"][0]["notes"], "on site visit");
    }

    #[tokio::test]
    async fn batch_with_an_unknown_status_applies_the_valid_items() {
        let (app, store) = setup_test_environment();
        let first = seed_assignment(&store, "E1").await;
        let second = seed_assignment(&store, "E2").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/assignments/batch",
            Some(json!([
                { "id": first.to_string(), "status": "completed" },
                { "id": second.to_string(), "status": "done" }
            ])),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["errorCount"], 1);
        assert_eq!(body["errors"][0]["id"], second.to_string());
        let stored = store.get_assignment(first).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Completed);
    }

    #[tokio::test]
    async fn empty_batch_is_a_bad_request() {
        let (app, _) = setup_test_environment();

        let (status, _) = send(&app, Method::POST, "/api/assignments/batch", Some(json!([]))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn eligible_employees_exclude_leave() {
        let (app, _) = setup_test_environment();

        let (status, body) =
            send(&app, Method::GET, "/api/employees/eligible?date=2024-05-01", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["employees"][0]["name"], "Alice");
        assert_eq!(body["employees"][1]["name"], "Bob");
    }

    #[tokio::test]
    async fn history_and_employee_listing_follow_a_run() {
        let (app, _) = setup_test_environment();
        let (_, report) = send(&app, Method::POST, "/api/assignments/run", None).await;
        let selected = report["perTestDebug"][0]["selected"][0]
            .as_str()
            .unwrap()
            .to_string();

        let (status, history) =
            send(&app, Method::GET, "/api/assignments/history?date=2024-05-01", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().map(Vec::len), Some(1));
        assert_eq!(history[0]["assignmentMethod"], "automatic");
        assert_eq!(history[0]["totalEligibleEmployees"], 2);

        let (status, listing) = send(
            &app,
            Method::GET,
            &format!("/api/employees/{}/assignments", selected),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn active_tests_are_listed() {
        let (app, _) = setup_test_environment();

        let (status, body) = send(&app, Method::GET, "/api/tests", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "T1");
        assert_eq!(body[0]["assignmentType"], "automatic");
    }
}
