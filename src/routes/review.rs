use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::options::FindOptions;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::db::{is_duplicate_key_error, DbConn};
use crate::guards::{AdminGuard, AuthGuard};
use crate::models::{
    CreateReviewDto, EngagementStatus, ModerateReviewDto, Review, UpdateReviewDto,
};
use crate::services::{
    notify::notify_async, BookingStateMachine, Notifier, NotifyEvent, RatingAggregator,
    RatingEvent,
};
use crate::utils::{ApiError, ApiResponse};

#[openapi(tag = "Review")]
#[post("/review/create", data = "<dto>")]
pub async fn create_review(
    db: &State<DbConn>,
    notifier: &State<Notifier>,
    auth: AuthGuard,
    dto: Json<CreateReviewDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let engagement_id = ObjectId::parse_str(&dto.engagement_id)
        .map_err(|_| ApiError::bad_request("Invalid engagement ID"))?;

    let engagement = BookingStateMachine::fetch(db, engagement_id).await?;

    if engagement.customer_id != auth.subject_id {
        return Err(ApiError::forbidden(
            "Only the customer on this engagement can review it",
        ));
    }
    if engagement.status != EngagementStatus::Completed {
        return Err(ApiError::bad_request(
            "Only completed engagements can be reviewed",
        ));
    }
    let worker_id = engagement
        .worker_id
        .ok_or_else(|| ApiError::internal_error("Completed engagement without worker"))?;

    let review = Review {
        id: None,
        engagement_id,
        worker_id,
        customer_id: auth.subject_id,
        rating: dto.rating,
        comment: dto.comment.clone(),
        is_visible: true,
        created_at: DateTime::now(),
        updated_at: DateTime::now(),
    };

    // The unique engagement_id index enforces one review per engagement.
    let result = db
        .collection::<Review>("reviews")
        .insert_one(&review, None)
        .await
        .map_err(|e| {
            if is_duplicate_key_error(&e) {
                ApiError::conflict("This engagement has already been reviewed")
            } else {
                ApiError::service_unavailable(e.to_string())
            }
        })?;

    let new_average =
        RatingAggregator::apply(db, worker_id, RatingEvent::Created { rating: dto.rating })
            .await?;

    let worker = db
        .collection::<crate::models::WorkerProfile>("worker_profiles")
        .find_one(doc! { "_id": worker_id }, None)
        .await
        .ok()
        .flatten();
    if let Some(worker) = worker {
        notify_async(
            notifier,
            worker.user_id,
            NotifyEvent::ReviewReceived,
            serde_json::json!({
                "engagement_id": engagement_id.to_hex(),
                "rating": dto.rating,
            }),
        );
    }

    Ok(Json(ApiResponse::success_with_message(
        "Review submitted successfully".to_string(),
        serde_json::json!({
            "review_id": result.inserted_id.as_object_id().map(|id| id.to_hex()),
            "new_worker_average": new_average,
        }),
    )))
}

#[openapi(tag = "Review")]
#[put("/review/<review_id>", data = "<dto>")]
pub async fn update_review(
    db: &State<DbConn>,
    auth: AuthGuard,
    review_id: String,
    dto: Json<UpdateReviewDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let object_id = ObjectId::parse_str(&review_id)
        .map_err(|_| ApiError::bad_request("Invalid review ID"))?;

    let review = db
        .collection::<Review>("reviews")
        .find_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Review not found"))?;

    if review.customer_id != auth.subject_id {
        return Err(ApiError::forbidden("Not authorized to edit this review"));
    }

    let mut update_doc = doc! {
        "rating": dto.rating,
        "updated_at": DateTime::now(),
    };
    if let Some(ref comment) = dto.comment {
        update_doc.insert("comment", comment);
    }

    db.collection::<Review>("reviews")
        .update_one(doc! { "_id": object_id }, doc! { "$set": update_doc }, None)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;

    // An edit changes a value already folded into the running mean, so the
    // aggregate is rebuilt from all currently-visible reviews.
    let new_average = RatingAggregator::apply(db, review.worker_id, RatingEvent::Edited).await?;

    Ok(Json(ApiResponse::success_with_message(
        "Review updated".to_string(),
        serde_json::json!({ "new_worker_average": new_average }),
    )))
}

#[openapi(tag = "Review")]
#[put("/review/<review_id>/visibility", data = "<dto>")]
pub async fn moderate_review(
    db: &State<DbConn>,
    _admin: AdminGuard,
    review_id: String,
    dto: Json<ModerateReviewDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&review_id)
        .map_err(|_| ApiError::bad_request("Invalid review ID"))?;

    let review = db
        .collection::<Review>("reviews")
        .find_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Review not found"))?;

    db.collection::<Review>("reviews")
        .update_one(
            doc! { "_id": object_id },
            doc! { "$set": {
                "is_visible": dto.is_visible,
                "updated_at": DateTime::now(),
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;

    let new_average =
        RatingAggregator::apply(db, review.worker_id, RatingEvent::VisibilityChanged).await?;

    Ok(Json(ApiResponse::success_with_message(
        if dto.is_visible {
            "Review restored".to_string()
        } else {
            "Review hidden".to_string()
        },
        serde_json::json!({ "new_worker_average": new_average }),
    )))
}

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct WorkerReviewsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Review")]
#[get("/review/worker/<worker_id>?<query..>")]
pub async fn get_worker_reviews(
    db: &State<DbConn>,
    worker_id: String,
    query: WorkerReviewsQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).min(100);
    let skip = (page - 1) * limit;

    let object_id = ObjectId::parse_str(&worker_id)
        .map_err(|_| ApiError::bad_request("Invalid worker ID"))?;

    let filter = doc! { "worker_id": object_id, "is_visible": true };

    let find_options = FindOptions::builder()
        .skip(skip as u64)
        .limit(limit)
        .sort(doc! { "created_at": -1 })
        .build();

    let mut cursor = db
        .collection::<Review>("reviews")
        .find(filter.clone(), find_options)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;

    let mut reviews = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?
    {
        let review = cursor
            .deserialize_current()
            .map_err(|e| ApiError::internal_error(format!("Deserialization error: {}", e)))?;
        reviews.push(review);
    }

    let total = db
        .collection::<Review>("reviews")
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "reviews": reviews,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": (total as f64 / limit as f64).ceil() as i64,
        }
    }))))
}
