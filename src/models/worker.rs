use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::models::ServiceCategory;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeoLocation {
    #[serde(rename = "type")]
    pub geo_type: String, // "Point"
    pub coordinates: [f64; 2], // [longitude, latitude]
}

impl GeoLocation {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        GeoLocation {
            geo_type: String::from("Point"),
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Worker profile and the aggregate statistics the matching scorer reads.
///
/// The statistics block is only ever mutated through atomic per-document
/// updates (see services::ratings and services::booking); `rating_version`
/// is the compare-and-set token for serialized full recomputes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerProfile {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub display_name: String,
    pub categories: Vec<ServiceCategory>,
    pub experience_years: Option<i32>,
    pub description: Option<String>,
    pub hourly_rate: Option<f64>,
    pub is_active: bool,
    pub is_available: bool,

    // Aggregate statistics
    pub rating_avg: f64,
    pub rating_count: i32,
    pub rating_version: i64,
    pub total_jobs_completed: i32,
    pub offers_accepted: i32,
    pub offers_declined: i32,
    pub acceptance_rate: f64,
    pub response_time_minutes: Option<f64>,

    pub location: GeoLocation,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl WorkerProfile {
    pub fn new(user_id: ObjectId, dto: &CreateWorkerProfileDto) -> Self {
        let now = DateTime::now();
        WorkerProfile {
            id: None,
            user_id,
            display_name: dto.display_name.clone(),
            categories: dto.categories.clone(),
            experience_years: dto.experience_years,
            description: dto.description.clone(),
            hourly_rate: dto.hourly_rate,
            is_active: true,
            is_available: true,
            rating_avg: 0.0,
            rating_count: 0,
            rating_version: 0,
            total_jobs_completed: 0,
            offers_accepted: 0,
            offers_declined: 0,
            acceptance_rate: 0.0,
            response_time_minutes: None,
            location: GeoLocation::point(
                dto.longitude.unwrap_or(72.8311),
                dto.latitude.unwrap_or(21.1702),
            ),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateWorkerProfileDto {
    #[validate(length(min = 1, max = 120))]
    pub display_name: String,
    #[validate(length(min = 1))]
    pub categories: Vec<ServiceCategory>,
    #[validate(range(min = 0, max = 60))]
    pub experience_years: Option<i32>,
    pub description: Option<String>,
    #[validate(range(min = 0.0))]
    pub hourly_rate: Option<f64>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UpdateWorkerProfileDto {
    #[validate(length(min = 1, max = 120))]
    pub display_name: Option<String>,
    pub categories: Option<Vec<ServiceCategory>>,
    #[validate(range(min = 0, max = 60))]
    pub experience_years: Option<i32>,
    pub description: Option<String>,
    #[validate(range(min = 0.0))]
    pub hourly_rate: Option<f64>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateLocationDto {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WorkerStatsResponse {
    pub rating_avg: f64,
    pub rating_count: i32,
    pub total_jobs_completed: i32,
    pub acceptance_rate: f64,
    pub response_time_minutes: Option<f64>,
}

impl From<&WorkerProfile> for WorkerStatsResponse {
    fn from(worker: &WorkerProfile) -> Self {
        WorkerStatsResponse {
            rating_avg: worker.rating_avg,
            rating_count: worker.rating_count,
            total_jobs_completed: worker.total_jobs_completed,
            acceptance_rate: worker.acceptance_rate,
            response_time_minutes: worker.response_time_minutes,
        }
    }
}
