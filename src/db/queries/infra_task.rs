//! Infra task queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::types::{InfraTask, NewInfraTask, UpdateInfraTaskRequest};

const INFRA_TASK_COLUMNS: &str = "id, infra_phase, task_name, status, percent_complete, \
     start_date, end_date, owner, customer_name, created_at, updated_at";

/// List infra tasks ordered by id, optionally for one customer
pub async fn list_infra_tasks(pool: &PgPool, customer_name: Option<&str>) -> Result<Vec<InfraTask>> {
    let tasks = sqlx::query_as::<_, InfraTask>(&format!(
        r#"
        SELECT {INFRA_TASK_COLUMNS}
        FROM infra_tasks
        WHERE ($1::text IS NULL OR customer_name = $1)
        ORDER BY id ASC
        "#
    ))
    .bind(customer_name)
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

/// Apply a partial update, restricted to `scope` when given.
pub async fn update_infra_task(
    pool: &PgPool,
    request: &UpdateInfraTaskRequest,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    scope: Option<&str>,
) -> Result<Option<InfraTask>> {
    let task = sqlx::query_as::<_, InfraTask>(&format!(
        r#"
        UPDATE infra_tasks SET
            infra_phase = COALESCE($2, infra_phase),
            task_name = COALESCE($3, task_name),
            status = COALESCE($4, status),
            percent_complete = COALESCE($5, percent_complete),
            owner = COALESCE($6, owner),
            start_date = COALESCE($7, start_date),
            end_date = COALESCE($8, end_date),
            updated_at = NOW()
        WHERE id = $1 AND ($9::text IS NULL OR customer_name = $9)
        RETURNING {INFRA_TASK_COLUMNS}
        "#
    ))
    .bind(request.id)
    .bind(&request.infra_phase)
    .bind(&request.task_name)
    .bind(&request.status)
    .bind(request.percent_complete)
    .bind(&request.owner)
    .bind(start_date)
    .bind(end_date)
    .bind(scope)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Delete every infra task of `scope`, or all of them when unscoped
pub async fn delete_many(conn: &mut PgConnection, scope: Option<&str>) -> Result<u64> {
    let result = match scope {
        Some(customer) => {
            sqlx::query("DELETE FROM infra_tasks WHERE customer_name = $1")
                .bind(customer)
                .execute(&mut *conn)
                .await?
        }
        None => sqlx::query("DELETE FROM infra_tasks").execute(&mut *conn).await?,
    };

    Ok(result.rows_affected())
}

/// Bulk insert in a single statement
pub async fn create_many(conn: &mut PgConnection, rows: &[NewInfraTask]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let phases: Vec<String> = rows.iter().map(|r| r.infra_phase.clone()).collect();
    let names: Vec<String> = rows.iter().map(|r| r.task_name.clone()).collect();
    let statuses: Vec<String> = rows.iter().map(|r| r.status.clone()).collect();
    let percents: Vec<f64> = rows.iter().map(|r| r.percent_complete).collect();
    let start_dates: Vec<DateTime<Utc>> = rows.iter().map(|r| r.start_date).collect();
    let end_dates: Vec<DateTime<Utc>> = rows.iter().map(|r| r.end_date).collect();
    let owners: Vec<String> = rows.iter().map(|r| r.owner.clone()).collect();
    let customers: Vec<Option<String>> = rows.iter().map(|r| r.customer_name.clone()).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO infra_tasks (
            infra_phase, task_name, status, percent_complete,
            start_date, end_date, owner, customer_name
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::text[], $3::text[], $4::float8[],
            $5::timestamptz[], $6::timestamptz[], $7::text[], $8::text[]
        )
        "#,
    )
    .bind(&phases)
    .bind(&names)
    .bind(&statuses)
    .bind(&percents)
    .bind(&start_dates)
    .bind(&end_dates)
    .bind(&owners)
    .bind(&customers)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
