//! Program task queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::types::{NewTask, Task, UpdateTaskRequest};

const TASK_COLUMNS: &str = "id, workstream, deliverable, status, progress, phase, milestone, owner, \
     start_date, end_date, customer_name, created_at, updated_at";

/// List tasks ordered by id, optionally for one customer
pub async fn list_tasks(pool: &PgPool, customer_name: Option<&str>) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(&format!(
        r#"
        SELECT {TASK_COLUMNS}
        FROM tasks
        WHERE ($1::text IS NULL OR customer_name = $1)
        ORDER BY id ASC
        "#
    ))
    .bind(customer_name)
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

/// Apply a partial update. `scope` restricts the update to rows of that
/// customer; `None` when the caller may edit any row.
pub async fn update_task(
    pool: &PgPool,
    request: &UpdateTaskRequest,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    customer_name: Option<&str>,
    scope: Option<&str>,
) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(&format!(
        r#"
        UPDATE tasks SET
            workstream = COALESCE($2, workstream),
            deliverable = COALESCE($3, deliverable),
            status = COALESCE($4, status),
            progress = COALESCE($5, progress),
            phase = COALESCE($6, phase),
            milestone = COALESCE($7, milestone),
            owner = COALESCE($8, owner),
            start_date = COALESCE($9, start_date),
            end_date = COALESCE($10, end_date),
            customer_name = COALESCE($11, customer_name),
            updated_at = NOW()
        WHERE id = $1 AND ($12::text IS NULL OR customer_name = $12)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(request.id)
    .bind(&request.workstream)
    .bind(&request.deliverable)
    .bind(&request.status)
    .bind(request.progress)
    .bind(&request.phase)
    .bind(&request.milestone)
    .bind(&request.owner)
    .bind(start_date)
    .bind(end_date)
    .bind(customer_name)
    .bind(scope)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Delete every task of `scope`, or every task when unscoped
pub async fn delete_many(conn: &mut PgConnection, scope: Option<&str>) -> Result<u64> {
    let result = match scope {
        Some(customer) => {
            sqlx::query("DELETE FROM tasks WHERE customer_name = $1")
                .bind(customer)
                .execute(&mut *conn)
                .await?
        }
        None => sqlx::query("DELETE FROM tasks").execute(&mut *conn).await?,
    };

    Ok(result.rows_affected())
}

/// Bulk insert in a single statement
pub async fn create_many(conn: &mut PgConnection, rows: &[NewTask]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut workstreams = Vec::with_capacity(rows.len());
    let mut deliverables = Vec::with_capacity(rows.len());
    let mut statuses = Vec::with_capacity(rows.len());
    let mut progress = Vec::with_capacity(rows.len());
    let mut phases = Vec::with_capacity(rows.len());
    let mut milestones = Vec::with_capacity(rows.len());
    let mut owners = Vec::with_capacity(rows.len());
    let mut start_dates = Vec::with_capacity(rows.len());
    let mut end_dates = Vec::with_capacity(rows.len());
    let mut customers = Vec::with_capacity(rows.len());

    for row in rows {
        workstreams.push(row.workstream.clone());
        deliverables.push(row.deliverable.clone());
        statuses.push(row.status.clone());
        progress.push(row.progress);
        phases.push(row.phase.clone());
        milestones.push(row.milestone.clone());
        owners.push(row.owner.clone());
        start_dates.push(row.start_date);
        end_dates.push(row.end_date);
        customers.push(row.customer_name.clone());
    }

    let result = sqlx::query(
        r#"
        INSERT INTO tasks (
            workstream, deliverable, status, progress, phase, milestone, owner,
            start_date, end_date, customer_name
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::text[], $3::text[], $4::float8[], $5::text[], $6::text[], $7::text[],
            $8::timestamptz[], $9::timestamptz[], $10::text[]
        )
        "#,
    )
    .bind(&workstreams)
    .bind(&deliverables)
    .bind(&statuses)
    .bind(&progress)
    .bind(&phases)
    .bind(&milestones)
    .bind(&owners)
    .bind(&start_dates)
    .bind(&end_dates)
    .bind(&customers)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
