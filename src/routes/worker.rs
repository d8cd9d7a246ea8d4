use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime};
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use validator::Validate;

use crate::db::DbConn;
use crate::guards::AuthGuard;
use crate::models::{
    ActorRole, CreateWorkerProfileDto, UpdateLocationDto, UpdateWorkerProfileDto, WorkerProfile,
    WorkerStatsResponse,
};
use crate::utils::{validate_coordinates, ApiError, ApiResponse};

#[openapi(tag = "Worker")]
#[post("/worker/profile", data = "<dto>")]
pub async fn create_worker_profile(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<CreateWorkerProfileDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if auth.role != ActorRole::Worker {
        return Err(ApiError::forbidden("Only workers can create a worker profile"));
    }
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if let (Some(latitude), Some(longitude)) = (dto.latitude, dto.longitude) {
        if !validate_coordinates(latitude, longitude) {
            return Err(ApiError::bad_request("Invalid coordinates"));
        }
    }

    let existing = db
        .collection::<WorkerProfile>("worker_profiles")
        .find_one(doc! { "user_id": auth.subject_id }, None)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;

    if existing.is_some() {
        return Err(ApiError::conflict("Worker profile already exists"));
    }

    let worker = WorkerProfile::new(auth.subject_id, &dto);

    let result = db
        .collection::<WorkerProfile>("worker_profiles")
        .insert_one(&worker, None)
        .await
        .map_err(|e| ApiError::service_unavailable(format!("Failed to create profile: {}", e)))?;

    Ok(Json(ApiResponse::success_with_message(
        "Worker profile created successfully".to_string(),
        serde_json::json!({
            "worker_id": result.inserted_id.as_object_id().map(|id| id.to_hex())
        }),
    )))
}

#[openapi(tag = "Worker")]
#[get("/worker/profile")]
pub async fn get_worker_profile(
    db: &State<DbConn>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let worker = db
        .collection::<WorkerProfile>("worker_profiles")
        .find_one(doc! { "user_id": auth.subject_id }, None)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Worker profile not found"))?;

    Ok(Json(ApiResponse::success(serde_json::json!(worker))))
}

#[openapi(tag = "Worker")]
#[get("/worker/profile/<worker_id>")]
pub async fn get_worker_profile_by_id(
    db: &State<DbConn>,
    worker_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let object_id = ObjectId::parse_str(&worker_id)
        .map_err(|_| ApiError::bad_request("Invalid worker ID"))?;

    let worker = db
        .collection::<WorkerProfile>("worker_profiles")
        .find_one(doc! { "_id": object_id }, None)
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Worker profile not found"))?;

    let stats = WorkerStatsResponse::from(&worker);

    Ok(Json(ApiResponse::success(serde_json::json!({
        "worker": worker,
        "stats": stats,
    }))))
}

#[openapi(tag = "Worker")]
#[put("/worker/profile", data = "<dto>")]
pub async fn update_worker_profile(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<UpdateWorkerProfileDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut update_doc = doc! {
        "updated_at": DateTime::now()
    };

    if let Some(ref display_name) = dto.display_name {
        update_doc.insert("display_name", display_name);
    }
    if let Some(ref categories) = dto.categories {
        update_doc.insert(
            "categories",
            to_bson(categories).map_err(|e| ApiError::internal_error(e.to_string()))?,
        );
    }
    if let Some(experience) = dto.experience_years {
        update_doc.insert("experience_years", experience);
    }
    if let Some(ref description) = dto.description {
        update_doc.insert("description", description);
    }
    if let Some(rate) = dto.hourly_rate {
        update_doc.insert("hourly_rate", rate);
    }
    if let Some(available) = dto.is_available {
        update_doc.insert("is_available", available);
    }

    let result = db
        .collection::<WorkerProfile>("worker_profiles")
        .update_one(
            doc! { "user_id": auth.subject_id },
            doc! { "$set": update_doc },
            None,
        )
        .await
        .map_err(|e| ApiError::service_unavailable(format!("Failed to update profile: {}", e)))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Worker profile not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Worker profile updated successfully"
    }))))
}

#[openapi(tag = "Worker")]
#[put("/worker/location", data = "<dto>")]
pub async fn update_worker_location(
    db: &State<DbConn>,
    auth: AuthGuard,
    dto: Json<UpdateLocationDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    if !validate_coordinates(dto.latitude, dto.longitude) {
        return Err(ApiError::bad_request("Invalid coordinates"));
    }

    let result = db
        .collection::<WorkerProfile>("worker_profiles")
        .update_one(
            doc! { "user_id": auth.subject_id },
            doc! { "$set": {
                "location": {
                    "type": "Point",
                    "coordinates": [dto.longitude, dto.latitude]
                },
                "updated_at": DateTime::now()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Worker profile not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Location updated"
    }))))
}
