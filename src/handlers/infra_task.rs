//! Infra task message handlers

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth;
use crate::db::queries;
use crate::types::{ErrorResponse, Request, ScopedListRequest, SuccessResponse, UpdateInfraTaskRequest};

use super::{parse_optional_date, spawn_audit, HandlerContext};

/// Handle infra_task.list messages
pub async fn handle_list(client: Client, mut subscriber: Subscriber, ctx: HandlerContext) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received infra_task.list message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ScopedListRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse infra task list request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let scope = match auth::authenticate(&ctx.pool, &request, ctx.session_idle)
            .await
            .and_then(|info| info.data_scope(request.payload.customer_name.as_deref()))
        {
            Ok(scope) => scope,
            Err(e) => {
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queries::infra_task::list_infra_tasks(&ctx.pool, scope.as_deref()).await {
            Ok(tasks) => {
                debug!("Listed {} infra tasks for {:?}", tasks.len(), scope);
                let response = SuccessResponse::new(request.id, tasks);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list infra tasks: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle infra_task.update messages (inline edit)
pub async fn handle_update(client: Client, mut subscriber: Subscriber, ctx: HandlerContext) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received infra_task.update message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<UpdateInfraTaskRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse infra task update request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let auth_result = auth::authenticate(&ctx.pool, &request, ctx.session_idle)
            .await
            .and_then(|info| info.write_scope().map(|scope| (info, scope)));
        let (auth_info, scope) = match auth_result {
            Ok(pair) => pair,
            Err(e) => {
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let payload = &request.payload;

        let start_date = match parse_optional_date(payload.start_date.as_deref()) {
            Ok(date) => date,
            Err(message) => {
                let error = ErrorResponse::new(request.id, "VALIDATION_ERROR", message);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };
        let end_date = match parse_optional_date(payload.end_date.as_deref()) {
            Ok(date) => date,
            Err(message) => {
                let error = ErrorResponse::new(request.id, "VALIDATION_ERROR", message);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queries::infra_task::update_infra_task(&ctx.pool, payload, start_date, end_date, scope.as_deref()).await {
            Ok(Some(task)) => {
                debug!("Updated infra task {}", task.id);
                spawn_audit(
                    ctx.pool.clone(),
                    auth_info.user_id,
                    "update",
                    "InfraTask",
                    Some(task.id.to_string()),
                    serde_json::to_value(&task).unwrap_or_default(),
                );
                let response = SuccessResponse::new(request.id, task);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", format!("Infra task {} not found", payload.id));
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to update infra task {}: {}", payload.id, e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
