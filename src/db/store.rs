//! PostgreSQL-backed replace store

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use crate::db::queries;
use crate::services::ingest::{ReplaceStore, SheetRecord};
use crate::types::{NewInfraTask, NewTask, ReplaceCounts};

/// Table operations the replace transaction needs for one record family
#[async_trait]
pub trait ReplaceTable: SheetRecord {
    async fn delete_many(conn: &mut PgConnection, scope: Option<&str>) -> Result<u64>;
    async fn create_many(conn: &mut PgConnection, rows: &[Self]) -> Result<u64>;
}

#[async_trait]
impl ReplaceTable for NewTask {
    async fn delete_many(conn: &mut PgConnection, scope: Option<&str>) -> Result<u64> {
        queries::task::delete_many(conn, scope).await
    }

    async fn create_many(conn: &mut PgConnection, rows: &[Self]) -> Result<u64> {
        queries::task::create_many(conn, rows).await
    }
}

#[async_trait]
impl ReplaceTable for NewInfraTask {
    async fn delete_many(conn: &mut PgConnection, scope: Option<&str>) -> Result<u64> {
        queries::infra_task::delete_many(conn, scope).await
    }

    async fn create_many(conn: &mut PgConnection, rows: &[Self]) -> Result<u64> {
        queries::infra_task::create_many(conn, rows).await
    }
}

/// Runs scoped delete + bulk insert inside one transaction
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl<R: ReplaceTable> ReplaceStore<R> for PgTaskStore {
    async fn replace(&self, scope: Option<&str>, rows: Vec<R>) -> Result<ReplaceCounts> {
        // Dropping `tx` without commit rolls back, including on timeout.
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;

        let deleted_count = R::delete_many(&mut tx, scope)
            .await
            .with_context(|| format!("Failed to delete {} rows", R::ENTITY))?;
        let inserted_count = R::create_many(&mut tx, &rows)
            .await
            .with_context(|| format!("Failed to insert {} rows", R::ENTITY))?;

        tx.commit().await.context("Failed to commit replace")?;

        Ok(ReplaceCounts {
            deleted_count,
            inserted_count,
        })
    }
}

// Tests need a live PostgreSQL at DATABASE_URL; run with `--ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use uuid::Uuid;

    async fn test_pool() -> PgPool {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::db::create_pool(&url, 2, Duration::from_secs(5)).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    fn infra(task_name: &str) -> NewInfraTask {
        let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        NewInfraTask {
            infra_phase: "Network".to_string(),
            task_name: task_name.to_string(),
            status: "Planned".to_string(),
            percent_complete: 0.0,
            start_date: start,
            end_date: start,
            owner: String::new(),
            customer_name: None,
        }
    }

    fn scoped(rows: Vec<NewInfraTask>, scope: &str) -> Vec<NewInfraTask> {
        rows.into_iter()
            .map(|mut row| {
                row.customer_name = Some(scope.to_string());
                row
            })
            .collect()
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL"]
    async fn test_failed_insert_keeps_previous_rows() {
        let pool = test_pool().await;
        let store = PgTaskStore::new(pool.clone());
        let scope = format!("rollback-{}", Uuid::new_v4());

        let seeded = ReplaceStore::<NewInfraTask>::replace(
            &store,
            Some(&scope),
            scoped(vec![infra("old a"), infra("old b")], &scope),
        )
        .await
        .unwrap();
        assert_eq!(seeded.inserted_count, 2);

        // PostgreSQL text rejects NUL bytes, so the insert fails after the delete ran.
        let result = ReplaceStore::<NewInfraTask>::replace(
            &store,
            Some(&scope),
            scoped(vec![infra("new"), infra("bad\0name")], &scope),
        )
        .await;
        assert!(result.is_err());

        let rows = queries::infra_task::list_infra_tasks(&pool, Some(&scope)).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.task_name.as_str()).collect();
        assert_eq!(names, vec!["old a", "old b"]);

        let cleared = ReplaceStore::<NewInfraTask>::replace(&store, Some(&scope), vec![]).await.unwrap();
        assert_eq!(cleared.deleted_count, 2);
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL"]
    async fn test_scoped_replace_leaves_other_customers() {
        let pool = test_pool().await;
        let store = PgTaskStore::new(pool.clone());
        let ours = format!("ours-{}", Uuid::new_v4());
        let theirs = format!("theirs-{}", Uuid::new_v4());

        ReplaceStore::<NewInfraTask>::replace(&store, Some(&theirs), scoped(vec![infra("keep")], &theirs))
            .await
            .unwrap();
        ReplaceStore::<NewInfraTask>::replace(&store, Some(&ours), scoped(vec![infra("first")], &ours))
            .await
            .unwrap();
        let counts = ReplaceStore::<NewInfraTask>::replace(&store, Some(&ours), scoped(vec![infra("second")], &ours))
            .await
            .unwrap();

        assert_eq!(counts.deleted_count, 1);
        assert_eq!(counts.inserted_count, 1);
        let kept = queries::infra_task::list_infra_tasks(&pool, Some(&theirs)).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].task_name, "keep");

        for scope in [&ours, &theirs] {
            ReplaceStore::<NewInfraTask>::replace(&store, Some(scope.as_str()), vec![]).await.unwrap();
        }
    }
}
