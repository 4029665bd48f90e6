//! NATS message handlers

pub mod auth;
pub mod infra_task;
pub mod ping;
pub mod task;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::Client;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::select;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{queries, PgTaskStore};
use crate::services::ingest::row_parser::parse_date_text;
use crate::services::ingest::ReplaceOptions;
use crate::types::{NewInfraTask, NewTask};

use self::auth::RateLimiter;

const SUBJECT_PREFIX: &str = "tracker";
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// State shared by every authenticated handler
#[derive(Clone)]
pub struct HandlerContext {
    pub pool: PgPool,
    pub session_idle: Option<chrono::Duration>,
}

fn subject(name: &str) -> String {
    format!("{SUBJECT_PREFIX}.{name}")
}

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let ctx = HandlerContext {
        pool: pool.clone(),
        session_idle: config.session_idle,
    };
    let store = Arc::new(PgTaskStore::new(pool.clone()));
    let rate_limiter = Arc::new(RateLimiter::for_login());
    let replace_options = ReplaceOptions {
        max_upload_bytes: config.max_upload_bytes,
        store_timeout: config.store_timeout,
    };

    // Subscribe to all subjects
    let ping_sub = client.subscribe(subject("ping")).await?;
    let login_sub = client.subscribe(subject("auth.login")).await?;
    let logout_sub = client.subscribe(subject("auth.logout")).await?;
    let me_sub = client.subscribe(subject("auth.me")).await?;
    let customers_sub = client.subscribe(subject("auth.customers")).await?;

    let task_list_sub = client.subscribe(subject("task.list")).await?;
    let task_update_sub = client.subscribe(subject("task.update")).await?;
    let task_replace_sub = client.subscribe(subject("task.replace")).await?;

    let infra_list_sub = client.subscribe(subject("infra_task.list")).await?;
    let infra_update_sub = client.subscribe(subject("infra_task.update")).await?;
    let infra_replace_sub = client.subscribe(subject("infra_task.replace")).await?;

    info!("Subscribed to NATS subjects");

    let ping_handle = tokio::spawn(ping::handle_ping(client.clone(), ping_sub));
    let login_handle = tokio::spawn(auth::handle_login(client.clone(), login_sub, ctx.clone(), rate_limiter.clone()));
    let logout_handle = tokio::spawn(auth::handle_logout(client.clone(), logout_sub, ctx.clone()));
    let me_handle = tokio::spawn(auth::handle_me(client.clone(), me_sub, ctx.clone()));
    let customers_handle = tokio::spawn(auth::handle_customers(client.clone(), customers_sub, ctx.clone()));

    let task_list_handle = tokio::spawn(task::handle_list(client.clone(), task_list_sub, ctx.clone()));
    let task_update_handle = tokio::spawn(task::handle_update(client.clone(), task_update_sub, ctx.clone()));
    let task_replace_handle = tokio::spawn(upload::handle_replace::<NewTask, _>(
        client.clone(),
        task_replace_sub,
        ctx.clone(),
        store.clone(),
        replace_options,
    ));

    let infra_list_handle = tokio::spawn(infra_task::handle_list(client.clone(), infra_list_sub, ctx.clone()));
    let infra_update_handle = tokio::spawn(infra_task::handle_update(client.clone(), infra_update_sub, ctx.clone()));
    let infra_replace_handle = tokio::spawn(upload::handle_replace::<NewInfraTask, _>(
        client.clone(),
        infra_replace_sub,
        ctx.clone(),
        store.clone(),
        replace_options,
    ));

    let housekeeping_handle = tokio::spawn(run_housekeeping(pool, rate_limiter, config.session_idle));

    info!("All handlers started");

    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = login_handle => {
            error!("Login handler finished: {:?}", result);
        }
        result = logout_handle => {
            error!("Logout handler finished: {:?}", result);
        }
        result = me_handle => {
            error!("Me handler finished: {:?}", result);
        }
        result = customers_handle => {
            error!("Customers handler finished: {:?}", result);
        }
        result = task_list_handle => {
            error!("Task list handler finished: {:?}", result);
        }
        result = task_update_handle => {
            error!("Task update handler finished: {:?}", result);
        }
        result = task_replace_handle => {
            error!("Task replace handler finished: {:?}", result);
        }
        result = infra_list_handle => {
            error!("Infra task list handler finished: {:?}", result);
        }
        result = infra_update_handle => {
            error!("Infra task update handler finished: {:?}", result);
        }
        result = infra_replace_handle => {
            error!("Infra task replace handler finished: {:?}", result);
        }
        result = housekeeping_handle => {
            error!("Housekeeping task finished: {:?}", result);
        }
    }

    Ok(())
}

/// Periodically purge expired sessions and stale login attempts
async fn run_housekeeping(pool: PgPool, rate_limiter: Arc<RateLimiter>, session_idle: Option<chrono::Duration>) {
    let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    loop {
        interval.tick().await;
        rate_limiter.cleanup();
        match purge_expired_sessions(&pool, session_idle).await {
            Ok(0) => {}
            Ok(n) => debug!("Purged {} expired sessions", n),
            Err(e) => warn!("Failed to purge expired sessions: {}", e),
        }
    }
}

/// Without an idle timeout sessions never expire, whatever `expires_at` holds.
async fn purge_expired_sessions(pool: &PgPool, session_idle: Option<chrono::Duration>) -> Result<u64> {
    if session_idle.is_none() {
        return Ok(0);
    }
    queries::session::delete_expired_sessions(pool).await
}

/// Write an audit entry in the background; failures are only logged.
pub(crate) fn spawn_audit(
    pool: PgPool,
    user_id: Uuid,
    action: &'static str,
    entity: &'static str,
    entity_id: Option<String>,
    details: serde_json::Value,
) {
    tokio::spawn(async move {
        if let Err(e) =
            queries::audit::insert_audit_log(&pool, Some(user_id), action, entity, entity_id.as_deref(), &details).await
        {
            warn!("Failed to write audit log for {} {}: {}", action, entity, e);
        }
    });
}

/// Date field of an inline edit. Blank or absent leaves the value unchanged.
pub(crate) fn parse_optional_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_date_text(text)
            .map(Some)
            .ok_or_else(|| format!("Invalid date: {text}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_subjects_are_prefixed() {
        assert_eq!(subject("infra_task.replace"), "tracker.infra_task.replace");
    }

    #[tokio::test]
    async fn test_no_purge_without_idle_timeout() {
        // Lazy pool: any query would fail to connect.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();

        assert_eq!(purge_expired_sessions(&pool, None).await.unwrap(), 0);
        assert!(purge_expired_sessions(&pool, Some(chrono::Duration::minutes(30))).await.is_err());
    }

    #[test]
    fn test_parse_optional_date() {
        assert_eq!(parse_optional_date(None), Ok(None));
        assert_eq!(parse_optional_date(Some("  ")), Ok(None));
        assert_eq!(
            parse_optional_date(Some("2026-02-01")),
            Ok(Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()))
        );
        assert_eq!(
            parse_optional_date(Some("2026-02-01T10:15:00.000Z")),
            Ok(Some(Utc.with_ymd_and_hms(2026, 2, 1, 10, 15, 0).unwrap()))
        );
        assert!(parse_optional_date(Some("tomorrow")).is_err());
    }
}
