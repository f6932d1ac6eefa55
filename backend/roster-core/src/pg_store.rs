// src/pg_store.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{
    Assignment, AssignmentHistory, AssignmentMethod, AssignmentStatus, AssignmentType,
    AssignmentView, EmployeeId, EmployeeRef, LeaveStatus, NewAssignment, NewHistoryRecord,
    TestDefinition, TestStatus,
};
use crate::store::{SchedulerStore, StoreError};

const ASSIGNMENT_COLUMNS: &str =
    "id, test_id, employee_id, assigned_date, due_date, status, completed_at, notes, created_at, updated_at";

const VIEW_SELECT: &str = r#"
    SELECT a.id, a.test_id, a.employee_id, a.assigned_date, a.due_date, a.status,
           a.completed_at, a.notes, a.created_at, a.updated_at,
           COALESCE(t.title, a.test_id) AS test_title,
           COALESCE(t.display_order, 2147483647) AS test_display_order,
           COALESCE(e.name, a.employee_id) AS employee_name,
           e.department AS employee_department
    FROM assignments a
    LEFT JOIN tests t ON t.id = a.test_id
    LEFT JOIN employees e ON e.id = a.employee_id
"#;

const VIEW_ORDER: &str =
    "ORDER BY a.assigned_date, test_display_order, a.test_id, employee_name, a.employee_id";

fn map_sqlx(context: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            error!("Storage unavailable while {}: {}", context, err);
            StoreError::Unavailable(format!("{}: {}", context, err))
        }
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::UniqueViolation(format!("{}: {}", context, db.message()))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{}: {}", context, err))
        }
        other => StoreError::Query(format!("{}: {}", context, other)),
    }
}

fn corrupt(column: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unexpected {} value '{}'", column, value))
}

// --- Row types ---

#[derive(Debug, FromRow)]
struct TestRow {
    id: String,
    title: String,
    description: Option<String>,
    instructions: Option<String>,
    status: String,
    assignment_type: String,
    employee_ids: Vec<String>,
    department_ids: Vec<String>,
    display_order: i32,
}

impl TryFrom<TestRow> for TestDefinition {
    type Error = StoreError;

    fn try_from(row: TestRow) -> Result<Self, Self::Error> {
        Ok(TestDefinition {
            status: TestStatus::parse(&row.status).ok_or_else(|| corrupt("test status", &row.status))?,
            assignment_type: AssignmentType::parse(&row.assignment_type)
                .ok_or_else(|| corrupt("assignment type", &row.assignment_type))?,
            id: row.id,
            title: row.title,
            description: row.description,
            instructions: row.instructions,
            employee_ids: row.employee_ids,
            department_ids: row.department_ids,
            display_order: row.display_order,
        })
    }
}

#[derive(Debug, FromRow)]
struct EmployeeRow {
    id: String,
    name: String,
    department: Option<String>,
}

impl From<EmployeeRow> for EmployeeRef {
    fn from(row: EmployeeRow) -> Self {
        EmployeeRef {
            id: row.id,
            name: row.name,
            department: row.department,
        }
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: Uuid,
    test_id: String,
    employee_id: String,
    assigned_date: NaiveDate,
    due_date: NaiveDate,
    status: String,
    completed_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Assignment {
            status: AssignmentStatus::parse(&row.status)
                .ok_or_else(|| corrupt("assignment status", &row.status))?,
            id: row.id,
            test_id: row.test_id,
            employee_id: row.employee_id,
            assigned_date: row.assigned_date,
            due_date: row.due_date,
            completed_at: row.completed_at,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssignmentViewRow {
    #[sqlx(flatten)]
    assignment: AssignmentRow,
    test_title: String,
    test_display_order: i32,
    employee_name: String,
    employee_department: Option<String>,
}

impl TryFrom<AssignmentViewRow> for AssignmentView {
    type Error = StoreError;

    fn try_from(row: AssignmentViewRow) -> Result<Self, Self::Error> {
        Ok(AssignmentView {
            assignment: row.assignment.try_into()?,
            test_title: row.test_title,
            test_display_order: row.test_display_order,
            employee_name: row.employee_name,
            employee_department: row.employee_department,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: Uuid,
    assignment_date: NaiveDate,
    test_id: String,
    assigned_employees: Vec<String>,
    total_eligible_employees: i32,
    assignment_method: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for AssignmentHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(AssignmentHistory {
            assignment_method: AssignmentMethod::parse(&row.assignment_method)
                .ok_or_else(|| corrupt("assignment method", &row.assignment_method))?,
            id: row.id,
            assignment_date: row.assignment_date,
            test_id: row.test_id,
            assigned_employees: row.assigned_employees,
            total_eligible_employees: row.total_eligible_employees,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!("Connecting to database (max {} connections)", max_connections);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connecting to database: {}", e)))?;
        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Loads migrations from disk at runtime and applies any pending ones.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let candidates = vec![
            PathBuf::from("./migrations"),
            PathBuf::from("backend/roster-core/migrations"),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!("Loaded migrations from {}", dir.display());
                    migrator
                        .run(&self.pool)
                        .await
                        .map_err(|e| StoreError::Query(format!("running migrations: {}", e)))?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(StoreError::Query(format!(
            "no migrations directory found: {}",
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    async fn views_where(
        &self,
        filter: &str,
        employee_id: Option<&str>,
        date: Option<NaiveDate>,
        context: &str,
    ) -> Result<Vec<AssignmentView>, StoreError> {
        let sql = format!("{} {} {}", VIEW_SELECT, filter, VIEW_ORDER);
        let mut query = sqlx::query_as::<_, AssignmentViewRow>(&sql);
        if let Some(employee_id) = employee_id {
            query = query.bind(employee_id);
        }
        if let Some(date) = date {
            query = query.bind(date);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(context, e))?;
        convert_all(rows)
    }
}

#[async_trait]
impl SchedulerStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("pinging database", e))?;
        Ok(())
    }

    async fn active_test_eligible_employees(&self) -> Result<Vec<EmployeeRef>, StoreError> {
        let rows = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT id, name, department
            FROM employees
            WHERE is_active AND test_eligible
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("loading eligible employees", e))?;
        Ok(rows.into_iter().map(EmployeeRef::from).collect())
    }

    async fn is_on_approved_leave(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM leave_requests
                WHERE employee_id = $1
                  AND status = $3
                  AND start_date <= $2
                  AND end_date >= $2
            )
            "#,
        )
        .bind(employee_id)
        .bind(date)
        .bind(LeaveStatus::Approved.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("checking leave", e))
    }

    async fn active_tests(&self) -> Result<Vec<TestDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, TestRow>(
            r#"
            SELECT id, title, description, instructions, status, assignment_type,
                   employee_ids, department_ids, display_order
            FROM tests
            WHERE status = $1
            ORDER BY display_order, id
            "#,
        )
        .bind(TestStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("loading active tests", e))?;
        convert_all(rows)
    }

    async fn find_test(&self, test_id: &str) -> Result<Option<TestDefinition>, StoreError> {
        sqlx::query_as::<_, TestRow>(
            r#"
            SELECT id, title, description, instructions, status, assignment_type,
                   employee_ids, department_ids, display_order
            FROM tests
            WHERE id = $1
            "#,
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("loading test", e))?
        .map(TestDefinition::try_from)
        .transpose()
    }

    async fn find_employee(&self, employee_id: &str) -> Result<Option<EmployeeRef>, StoreError> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            "SELECT id, name, department FROM employees WHERE id = $1",
        )
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("loading employee", e))?;
        Ok(row.map(EmployeeRef::from))
    }

    async fn assigned_employee_ids(
        &self,
        test_id: &str,
        date: NaiveDate,
    ) -> Result<HashSet<EmployeeId>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT employee_id FROM assignments WHERE test_id = $1 AND assigned_date = $2",
        )
        .bind(test_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("loading existing assignments", e))?;
        Ok(ids.into_iter().collect())
    }

    async fn insert_assignment_if_absent(
        &self,
        new: NewAssignment,
    ) -> Result<Option<Assignment>, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO assignments ({columns})
            VALUES ($1, $2, $3, $4, $5, 'pending', NULL, $6, $7, $7)
            ON CONFLICT (test_id, employee_id, assigned_date) DO NOTHING
            RETURNING {columns}
            "#,
            columns = ASSIGNMENT_COLUMNS
        );
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.test_id)
            .bind(&new.employee_id)
            .bind(new.assigned_date)
            .bind(new.due_date)
            .bind(&new.notes)
            .bind(new.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("inserting assignment", e))?
            .map(Assignment::try_from)
            .transpose()
    }

    async fn insert_assignment(&self, new: NewAssignment) -> Result<Assignment, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO assignments ({columns})
            VALUES ($1, $2, $3, $4, $5, 'pending', NULL, $6, $7, $7)
            RETURNING {columns}
            "#,
            columns = ASSIGNMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.test_id)
            .bind(&new.employee_id)
            .bind(new.assigned_date)
            .bind(new.due_date)
            .bind(&new.notes)
            .bind(new.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx("inserting assignment", e))?;
        row.try_into()
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, StoreError> {
        let sql = format!("SELECT {} FROM assignments WHERE id = $1", ASSIGNMENT_COLUMNS);
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("loading assignment", e))?
            .map(Assignment::try_from)
            .transpose()
    }

    async fn save_assignment(
        &self,
        assignment: &Assignment,
    ) -> Result<Option<Assignment>, StoreError> {
        let sql = format!(
            r#"
            UPDATE assignments
            SET employee_id = $2, status = $3, completed_at = $4, notes = $5, updated_at = $6
            WHERE id = $1
            RETURNING {}
            "#,
            ASSIGNMENT_COLUMNS
        );
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(assignment.id)
            .bind(&assignment.employee_id)
            .bind(assignment.status.as_str())
            .bind(assignment.completed_at)
            .bind(&assignment.notes)
            .bind(assignment.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("saving assignment", e))?
            .map(Assignment::try_from)
            .transpose()
    }

    async fn delete_assignment(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM assignments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("deleting assignment", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn assignments_on(&self, date: NaiveDate) -> Result<Vec<AssignmentView>, StoreError> {
        self.views_where(
            "WHERE a.assigned_date = $1",
            None,
            Some(date),
            "loading assignments by date",
        )
        .await
    }

    async fn assignments_for_employee(
        &self,
        employee_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AssignmentView>, StoreError> {
        let filter = if date.is_some() {
            "WHERE a.employee_id = $1 AND a.assigned_date = $2"
        } else {
            "WHERE a.employee_id = $1"
        };
        self.views_where(filter, Some(employee_id), date, "loading employee assignments")
            .await
    }

    async fn append_history(
        &self,
        record: NewHistoryRecord,
    ) -> Result<AssignmentHistory, StoreError> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            INSERT INTO assignment_history
                (id, assignment_date, test_id, assigned_employees, total_eligible_employees,
                 assignment_method, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, assignment_date, test_id, assigned_employees, total_eligible_employees,
                      assignment_method, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.assignment_date)
        .bind(&record.test_id)
        .bind(&record.assigned_employees)
        .bind(record.total_eligible_employees)
        .bind(record.assignment_method.as_str())
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("appending history", e))?;
        row.try_into()
    }

    async fn history_on(&self, date: NaiveDate) -> Result<Vec<AssignmentHistory>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, assignment_date, test_id, assigned_employees, total_eligible_employees,
                   assignment_method, created_at
            FROM assignment_history
            WHERE assignment_date = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("loading history", e))?;
        convert_all(rows)
    }
}
