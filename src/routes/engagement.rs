use mongodb::bson::oid::ObjectId;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::db::DbConn;
use crate::guards::AuthGuard;
use crate::models::{
    ActorRole, CreateQuoteRequestDto, EngagementResponse, RespondDto, TransitionDto,
};
use crate::services::{BookingStateMachine, Notifier, QuoteRequestCoordinator};
use crate::utils::{ApiError, ApiResponse};

#[openapi(tag = "Engagement")]
#[post("/engagement/book/<worker_id>", data = "<dto>")]
pub async fn book_worker(
    db: &State<DbConn>,
    notifier: &State<Notifier>,
    auth: AuthGuard,
    worker_id: String,
    dto: Json<CreateQuoteRequestDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if auth.role != ActorRole::Customer {
        return Err(ApiError::forbidden("Only customers can book workers"));
    }
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let worker_id = ObjectId::parse_str(&worker_id)
        .map_err(|_| ApiError::bad_request("Invalid worker ID"))?;

    let record =
        QuoteRequestCoordinator::book_worker(db, notifier, auth.subject_id, worker_id, &dto)
            .await?;

    Ok(Json(ApiResponse::success_with_message(
        "Booking created".to_string(),
        serde_json::json!(EngagementResponse::from(record)),
    )))
}

#[openapi(tag = "Engagement")]
#[post("/engagement/<engagement_id>/respond", data = "<dto>")]
pub async fn respond_to_engagement(
    db: &State<DbConn>,
    notifier: &State<Notifier>,
    auth: AuthGuard,
    engagement_id: String,
    dto: Json<RespondDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let engagement_id = ObjectId::parse_str(&engagement_id)
        .map_err(|_| ApiError::bad_request("Invalid engagement ID"))?;

    let record = BookingStateMachine::respond(
        db,
        notifier,
        engagement_id,
        auth.subject_id,
        auth.role,
        &dto,
    )
    .await?;

    Ok(Json(ApiResponse::success(serde_json::json!(
        EngagementResponse::from(record)
    ))))
}

#[openapi(tag = "Engagement")]
#[post("/engagement/<engagement_id>/transition", data = "<dto>")]
pub async fn transition_engagement(
    db: &State<DbConn>,
    notifier: &State<Notifier>,
    auth: AuthGuard,
    engagement_id: String,
    dto: Json<TransitionDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let engagement_id = ObjectId::parse_str(&engagement_id)
        .map_err(|_| ApiError::bad_request("Invalid engagement ID"))?;

    let record = BookingStateMachine::transition(
        db,
        notifier,
        engagement_id,
        auth.subject_id,
        auth.role,
        &dto,
    )
    .await?;

    Ok(Json(ApiResponse::success(serde_json::json!(
        EngagementResponse::from(record)
    ))))
}

/// The refresh path after a 409: re-read the record's current state.
#[openapi(tag = "Engagement")]
#[get("/engagement/<engagement_id>")]
pub async fn get_engagement(
    db: &State<DbConn>,
    auth: AuthGuard,
    engagement_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let engagement_id = ObjectId::parse_str(&engagement_id)
        .map_err(|_| ApiError::bad_request("Invalid engagement ID"))?;

    let record = BookingStateMachine::fetch(db, engagement_id).await?;

    // Only the parties (or an admin) may read an engagement.
    let allowed = match auth.role {
        ActorRole::Admin => true,
        ActorRole::Customer => record.customer_id == auth.subject_id,
        ActorRole::Worker => {
            let profile = db
                .collection::<crate::models::WorkerProfile>("worker_profiles")
                .find_one(
                    mongodb::bson::doc! { "user_id": auth.subject_id },
                    None,
                )
                .await
                .map_err(|e| ApiError::service_unavailable(e.to_string()))?;
            match (profile, record.worker_id) {
                (Some(profile), Some(worker_id)) => profile.id == Some(worker_id),
                _ => false,
            }
        }
    };
    if !allowed {
        return Err(ApiError::forbidden("Not a party on this engagement"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!(
        EngagementResponse::from(record)
    ))))
}
