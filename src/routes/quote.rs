use mongodb::bson::oid::ObjectId;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::db::DbConn;
use crate::guards::AuthGuard;
use crate::models::{ActorRole, CreateQuoteRequestDto, EngagementResponse, SendToWorkersDto};
use crate::services::{Notifier, QuoteRequestCoordinator};
use crate::utils::{ApiError, ApiResponse};

#[openapi(tag = "Quote")]
#[post("/quote/request", data = "<dto>")]
pub async fn create_quote_request(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<CreateQuoteRequestDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if auth.role != ActorRole::Customer {
        return Err(ApiError::forbidden("Only customers can request quotes"));
    }
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let record = QuoteRequestCoordinator::create_quote_request(db, auth.subject_id, &dto).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Quote request created".to_string(),
        serde_json::json!({
            "ancestry_id": record.id.map(|id| id.to_hex()),
            "reference": record.reference,
            "status": record.status,
        }),
    )))
}

#[openapi(tag = "Quote")]
#[post("/quote/<ancestry_id>/send", data = "<dto>")]
pub async fn send_quote_to_workers(
    db: &State<DbConn>,
    notifier: &State<Notifier>,
    auth: AuthGuard,
    ancestry_id: String,
    dto: Json<SendToWorkersDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if auth.role != ActorRole::Customer {
        return Err(ApiError::forbidden("Only customers can send quote requests"));
    }

    let ancestry_id = ObjectId::parse_str(&ancestry_id)
        .map_err(|_| ApiError::bad_request("Invalid quote request ID"))?;

    let worker_ids = dto
        .worker_ids
        .iter()
        .map(|id| ObjectId::parse_str(id).map_err(|_| ApiError::bad_request("Invalid worker ID")))
        .collect::<Result<Vec<_>, _>>()?;

    let records = QuoteRequestCoordinator::send_to_workers(
        db,
        notifier,
        ancestry_id,
        auth.subject_id,
        &worker_ids,
    )
    .await?;

    let engagements: Vec<EngagementResponse> =
        records.into_iter().map(EngagementResponse::from).collect();

    Ok(Json(ApiResponse::success_with_message(
        format!("Quote request sent to {} workers", engagements.len()),
        serde_json::json!({ "engagements": engagements }),
    )))
}
