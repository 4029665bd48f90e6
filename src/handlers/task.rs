//! Program task message handlers

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth;
use crate::db::queries;
use crate::services::customer_name::normalize_customer_name;
use crate::types::{ErrorResponse, Request, ScopedListRequest, SuccessResponse, UpdateTaskRequest};

use super::{parse_optional_date, spawn_audit, HandlerContext};

/// Handle task.list messages
pub async fn handle_list(client: Client, mut subscriber: Subscriber, ctx: HandlerContext) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received task.list message");

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
                error!("Failed to parse task list request: {}", e);
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

        match queries::task::list_tasks(&ctx.pool, scope.as_deref()).await {
            Ok(tasks) => {
                debug!("Listed {} tasks for {:?}", tasks.len(), scope);
                let response = SuccessResponse::new(request.id, tasks);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list tasks: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle task.update messages (inline edit)
pub async fn handle_update(client: Client, mut subscriber: Subscriber, ctx: HandlerContext) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received task.update message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<UpdateTaskRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse task update request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let (auth_info, scope) = match auth::authenticate(&ctx.pool, &request, ctx.session_idle).await {
            Ok(info) => match info.write_scope() {
                Ok(scope) => (info, scope),
                Err(e) => {
                    let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                    continue;
                }
            },
            Err(e) => {
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let payload = &request.payload;

        let customer_name = normalize_customer_name(payload.customer_name.as_deref());
        if scope.is_some() && customer_name.is_some() && customer_name != scope {
            let error = ErrorResponse::new(request.id, "FORBIDDEN", "Customer accounts cannot move tasks to another customer");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let dates = parse_optional_date(payload.start_date.as_deref())
            .and_then(|start| Ok((start, parse_optional_date(payload.end_date.as_deref())?)));
        let (start_date, end_date) = match dates {
            Ok(dates) => dates,
            Err(message) => {
                let error = ErrorResponse::new(request.id, "VALIDATION_ERROR", message);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queries::task::update_task(&ctx.pool, payload, start_date, end_date, customer_name.as_deref(), scope.as_deref()).await {
            Ok(Some(task)) => {
                debug!("Updated task {}", task.id);
                spawn_audit(
                    ctx.pool.clone(),
                    auth_info.user_id,
                    "update",
                    "Task",
                    Some(task.id.to_string()),
                    serde_json::to_value(&task).unwrap_or_default(),
                );
                let response = SuccessResponse::new(request.id, task);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", format!("Task {} not found", payload.id));
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to update task {}: {}", payload.id, e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
