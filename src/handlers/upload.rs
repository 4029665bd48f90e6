//! Spreadsheet replace handlers (task.replace, infra_task.replace)

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::services::ingest::{self, IngestError, ReplaceOptions, ReplaceStore, SheetRecord};
use crate::types::{ErrorResponse, ReplaceUploadRequest, Request, SuccessResponse};

use super::{spawn_audit, HandlerContext};

/// Reply for a failed upload, with the conflicting names attached when the
/// sheet mixes customers.
pub fn ingest_error_response(request_id: Uuid, err: &IngestError) -> ErrorResponse {
    let response = ErrorResponse::new(request_id, err.code(), err.to_string());
    match err {
        IngestError::MultipleCustomers { names } => {
            response.with_details(serde_json::json!({ "customerNames": names }))
        }
        _ => response,
    }
}

/// Handle `<entity>.replace` messages for one record family
pub async fn handle_replace<R, S>(
    client: Client,
    mut subscriber: Subscriber,
    ctx: HandlerContext,
    store: Arc<S>,
    options: ReplaceOptions,
) -> Result<()>
where
    R: SheetRecord,
    S: ReplaceStore<R> + ?Sized,
{
    while let Some(msg) = subscriber.next().await {
        debug!("Received {} replace message", R::ENTITY);

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ReplaceUploadRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse replace request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let auth_info = match auth::authenticate(&ctx.pool, &request, ctx.session_idle)
            .await
            .and_then(|info| info.require_staff().map(|_| info))
        {
            Ok(info) => info,
            Err(e) => {
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        info!(
            entity = R::ENTITY,
            user = %auth_info.email,
            file = request.payload.file_name.as_deref().unwrap_or("<unnamed>"),
            "Replace upload received"
        );

        match ingest::replace_from_sheet::<R, S>(&*store, &request.payload, options, Utc::now()).await {
            Ok(summary) => {
                spawn_audit(
                    ctx.pool.clone(),
                    auth_info.user_id,
                    "replace",
                    R::ENTITY,
                    summary.customer_name.clone(),
                    serde_json::json!({
                        "fileName": request.payload.file_name,
                        "deletedCount": summary.deleted_count,
                        "insertedCount": summary.inserted_count,
                        "rowsRead": summary.rows_read,
                    }),
                );
                let response = SuccessResponse::new(request.id, summary);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                if e.is_client_error() {
                    warn!("Rejected {} upload: {}", R::ENTITY, e);
                } else {
                    error!("{} replace failed: {}", R::ENTITY, e);
                }
                let error = ingest_error_response(request.id, &e);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_customers_reply_lists_names() {
        let err = IngestError::MultipleCustomers {
            names: vec!["Acme".to_string(), "VIP".to_string()],
        };
        let value = serde_json::to_value(ingest_error_response(Uuid::nil(), &err)).unwrap();

        assert_eq!(value["error"]["code"], "MULTIPLE_CUSTOMERS");
        assert_eq!(value["error"]["details"]["customerNames"][1], "VIP");
    }

    #[test]
    fn test_other_errors_have_no_details() {
        let value = serde_json::to_value(ingest_error_response(Uuid::nil(), &IngestError::NoFile)).unwrap();

        assert_eq!(value["error"]["code"], "NO_FILE");
        assert_eq!(value["error"]["message"], "No file uploaded");
        assert!(value["error"].get("details").is_none());
    }
}
