// src/main.rs

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    date: NaiveDate,
    total_tests: usize,
    total_assignments: usize,
    success: bool,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentRow {
    id: String,
    employee_name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestGroup {
    test_title: String,
    assignments: Vec<AssignmentRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentsByDate {
    date: NaiveDate,
    tests: Vec<TestGroup>,
    total_assignments: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResult {
    success: bool,
    success_count: usize,
    error_count: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::var("ROSTER_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health_response = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {:?}", health_response);

    // Test 2: Trigger the daily run for today
    println!("\n🔍 Triggering daily assignment run...");
    let run_response = client
        .post(format!("{}/api/assignments/run", base_url))
        .send()
        .await?;
    println!("Run status: {}", run_response.status());
    let report = run_response.json::<RunReport>().await?;
    println!(
        "Run for {}: {} assignments across {} tests (success: {}) - {}",
        report.date, report.total_assignments, report.total_tests, report.success, report.message
    );

    // Test 3: Rerun must not create anything new
    println!("\n🔍 Rerunning the same date...");
    let rerun = client
        .post(format!("{}/api/assignments/run", base_url))
        .json(&json!({ "date": report.date }))
        .send()
        .await?
        .json::<RunReport>()
        .await?;
    println!("Rerun created {} assignments", rerun.total_assignments);
    if rerun.total_assignments != 0 {
        println!("⚠️ Rerun was expected to be idempotent");
    }

    // Test 4: Read back the day
    println!("\n🔍 Fetching assignments for {}...", report.date);
    let day = client
        .get(format!("{}/api/assignments?date={}", base_url, report.date))
        .send()
        .await?
        .json::<AssignmentsByDate>()
        .await?;
    println!("{} assignments on {}", day.total_assignments, day.date);
    for group in &day.tests {
        println!("  {}", group.test_title);
        for row in &group.assignments {
            println!("    {} [{}] {}", row.employee_name, row.status, row.id);
        }
    }

    // Test 5: Complete everything in one batch
    let updates: Vec<_> = day
        .tests
        .iter()
        .flat_map(|group| group.assignments.iter())
        .map(|row| json!({ "id": row.id, "status": "completed" }))
        .collect();
    if updates.is_empty() {
        println!("\n⚠️ No assignments to update, skipping batch test");
    } else {
        println!("\n🔍 Completing {} assignments in one batch...", updates.len());
        let batch = client
            .post(format!("{}/api/assignments/batch", base_url))
            .json(&updates)
            .send()
            .await?
            .json::<BatchResult>()
            .await?;
        println!(
            "Batch results: success={}, succeeded={}, failed={}",
            batch.success, batch.success_count, batch.error_count
        );
    }

    println!("\n✅ Testing complete!");

    Ok(())
}
