use std::str::FromStr;

use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;

use crate::config::Config;
use crate::db::DbConn;
use crate::models::ServiceCategory;
use crate::services::matching::{MatchCriteria, Urgency, WorkerMatchScorer};
use crate::utils::{validate_coordinates, ApiError, ApiResponse};

#[derive(FromForm, serde::Deserialize, rocket_okapi::okapi::schemars::JsonSchema)]
pub struct MatchWorkersQuery {
    pub category: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub budget: Option<f64>,
    pub urgency: Option<String>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Matching")]
#[get("/match/workers?<query..>")]
pub async fn match_workers(
    db: &State<DbConn>,
    query: MatchWorkersQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let category = ServiceCategory::from_str(&query.category)
        .map_err(|e| ApiError::bad_request(e))?;

    let urgency = match query.urgency.as_deref() {
        None => None,
        Some("low") => Some(Urgency::Low),
        Some("normal") => Some(Urgency::Normal),
        Some("high") => Some(Urgency::High),
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "Unknown urgency: {}",
                other
            )));
        }
    };

    match (query.latitude, query.longitude) {
        (Some(latitude), Some(longitude)) => {
            if !validate_coordinates(latitude, longitude) {
                return Err(ApiError::bad_request("Invalid coordinates"));
            }
        }
        (None, None) => {}
        _ => {
            return Err(ApiError::bad_request(
                "latitude and longitude must be supplied together",
            ));
        }
    }

    if let Some(budget) = query.budget {
        if budget <= 0.0 {
            return Err(ApiError::bad_request("budget must be positive"));
        }
    }

    let criteria = MatchCriteria {
        category,
        latitude: query.latitude,
        longitude: query.longitude,
        budget: query.budget,
        urgency,
        limit: query.limit,
        radius_km: Config::match_radius_km(),
    };

    let outcome = WorkerMatchScorer::match_workers(db, &criteria).await?;

    Ok(Json(ApiResponse::success(serde_json::json!(outcome))))
}
