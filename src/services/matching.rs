use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use log::info;

use crate::db::DbConn;
use crate::models::{ServiceCategory, WorkerProfile};
use crate::services::error::CoreError;
use crate::services::geo;

// Weighted multi-factor heuristic for ranking candidate workers. Weights sum
// to 100; the proximity bonus and the urgency multiplier come on top. No
// candidate is excluded for a bad score.

const WEIGHT_RATING: f64 = 40.0;
const WEIGHT_EXPERIENCE: f64 = 20.0;
const WEIGHT_PRICE: f64 = 15.0;
const PRICE_NEUTRAL: f64 = 10.0;
const WEIGHT_RESPONSE: f64 = 10.0;
const RESPONSE_NEUTRAL: f64 = 5.0;
const WEIGHT_ACCEPTANCE: f64 = 10.0;
const WEIGHT_JOBS: f64 = 5.0;

const URGENCY_RADIUS_KM: f64 = 3.0;
const URGENCY_MULTIPLIER: f64 = 1.25;

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 50;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone)]
pub struct MatchCriteria {
    pub category: ServiceCategory,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub budget: Option<f64>,
    pub urgency: Option<Urgency>,
    pub limit: Option<i64>,
    pub radius_km: f64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WorkerMatch {
    pub worker_id: String,
    pub display_name: String,
    pub score: i64,
    pub distance_km: Option<f64>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct MatchOutcome {
    pub matches: Vec<WorkerMatch>,
    pub no_workers_available: bool,
}

pub struct WorkerMatchScorer;

impl WorkerMatchScorer {
    /// Ranks up to K available workers for the request. An empty candidate
    /// pool yields an empty ranked list with a marker, never an error.
    pub async fn match_workers(
        db: &DbConn,
        criteria: &MatchCriteria,
    ) -> Result<MatchOutcome, CoreError> {
        let limit = criteria.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;
        let urgent = criteria.urgency == Some(Urgency::High);

        let candidates = Self::candidate_pool(db, criteria).await?;
        if candidates.is_empty() {
            info!(
                "no workers available for category {}",
                criteria.category.as_str()
            );
            return Ok(MatchOutcome {
                matches: vec![],
                no_workers_available: true,
            });
        }

        let mut matches: Vec<WorkerMatch> = candidates
            .into_iter()
            .map(|(worker, distance_km)| {
                let (score, reasons) =
                    score_worker(&worker, distance_km, criteria.budget, urgent);
                WorkerMatch {
                    worker_id: worker.id.map(|id| id.to_hex()).unwrap_or_default(),
                    display_name: worker.display_name,
                    score,
                    distance_km,
                    reasons,
                }
            })
            .collect();

        // Stable sort: equally-scored candidates keep discovery order.
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        matches.truncate(limit);

        Ok(MatchOutcome {
            matches,
            no_workers_available: false,
        })
    }

    /// Active, available workers declaring the requested category. With a
    /// location the pool is pre-filtered to the configured radius via
    /// `$geoNear`, which also yields the distance used by the proximity tiers.
    async fn candidate_pool(
        db: &DbConn,
        criteria: &MatchCriteria,
    ) -> Result<Vec<(WorkerProfile, Option<f64>)>, CoreError> {
        let filter = doc! {
            "categories": criteria.category.as_str(),
            "is_active": true,
            "is_available": true,
        };

        let collection = db.collection::<Document>("worker_profiles");
        let mut pool = Vec::new();

        match (criteria.latitude, criteria.longitude) {
            (Some(latitude), Some(longitude)) => {
                let pipeline = vec![doc! {
                    "$geoNear": {
                        "near": {
                            "type": "Point",
                            "coordinates": [longitude, latitude]
                        },
                        "distanceField": "distance",
                        "maxDistance": criteria.radius_km * 1000.0,
                        "spherical": true,
                        "key": "location",
                        "query": filter
                    }
                }];

                let mut cursor = collection.aggregate(pipeline, None).await?;
                while cursor.advance().await? {
                    let document = cursor.deserialize_current()?;
                    let worker: WorkerProfile = mongodb::bson::from_document(document)
                        .map_err(|e| CoreError::TransientStore(e.to_string()))?;
                    let distance_km = Some(geo::distance_km(
                        latitude,
                        longitude,
                        worker.location.latitude(),
                        worker.location.longitude(),
                    ));
                    pool.push((worker, distance_km));
                }
            }
            _ => {
                let mut cursor = db
                    .collection::<WorkerProfile>("worker_profiles")
                    .find(filter, None)
                    .await?;
                while cursor.advance().await? {
                    let worker = cursor
                        .deserialize_current()
                        .map_err(|e| CoreError::TransientStore(e.to_string()))?;
                    pool.push((worker, None));
                }
            }
        }

        Ok(pool)
    }
}

/// Scores one candidate. Returns the rounded score and up to 3 reasons.
pub fn score_worker(
    worker: &WorkerProfile,
    distance_km: Option<f64>,
    budget: Option<f64>,
    urgent: bool,
) -> (i64, Vec<String>) {
    let mut score = 0.0;

    score += (worker.rating_avg / 5.0) * WEIGHT_RATING;

    let years = worker.experience_years.unwrap_or(0) as f64;
    score += (years / 10.0).min(1.0) * WEIGHT_EXPERIENCE;

    score += match (budget, worker.hourly_rate) {
        (Some(budget), Some(rate)) if budget > 0.0 => {
            (1.0 - rate / budget).max(0.0) * WEIGHT_PRICE
        }
        _ => PRICE_NEUTRAL,
    };

    score += match worker.response_time_minutes {
        Some(minutes) => (1.0 - minutes / 60.0).max(0.0) * WEIGHT_RESPONSE,
        None => RESPONSE_NEUTRAL,
    };

    score += (worker.acceptance_rate / 100.0) * WEIGHT_ACCEPTANCE;

    score += (worker.total_jobs_completed as f64 / 100.0).min(1.0) * WEIGHT_JOBS;

    if let Some(distance) = distance_km {
        score += proximity_bonus(distance);
        if urgent && distance < URGENCY_RADIUS_KM {
            score *= URGENCY_MULTIPLIER;
        }
    }

    (score.round() as i64, build_reasons(worker, distance_km, budget))
}

fn proximity_bonus(distance_km: f64) -> f64 {
    if distance_km < 5.0 {
        10.0
    } else if distance_km < 10.0 {
        5.0
    } else if distance_km < 20.0 {
        2.0
    } else {
        0.0
    }
}

fn build_reasons(
    worker: &WorkerProfile,
    distance_km: Option<f64>,
    budget: Option<f64>,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if worker.rating_avg >= 4.5 && worker.rating_count >= 5 {
        reasons.push(format!(
            "Highly rated ({:.1}/5 from {} reviews)",
            worker.rating_avg, worker.rating_count
        ));
    }

    if let Some(distance) = distance_km {
        if distance < 5.0 {
            reasons.push(format!("Nearby ({:.1} km away)", distance));
        }
    }

    if let (Some(budget), Some(rate)) = (budget, worker.hourly_rate) {
        if rate <= budget {
            reasons.push(format!("Fits your budget ({:.0}/hr)", rate));
        }
    }

    if let Some(years) = worker.experience_years {
        if years >= 5 {
            reasons.push(format!("{} years of experience", years));
        }
    }

    if let Some(minutes) = worker.response_time_minutes {
        if minutes <= 15.0 {
            reasons.push(format!("Responds in ~{:.0} min", minutes.max(1.0)));
        }
    }

    if worker.total_jobs_completed >= 50 {
        reasons.push(format!("{} jobs completed", worker.total_jobs_completed));
    }

    reasons.truncate(3);
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateWorkerProfileDto;
    use mongodb::bson::oid::ObjectId;

    fn worker(rating: f64, count: i32, rate: Option<f64>) -> WorkerProfile {
        let dto = CreateWorkerProfileDto {
            display_name: "Test Worker".into(),
            categories: vec![ServiceCategory::Plumbing],
            experience_years: None,
            description: None,
            hourly_rate: rate,
            longitude: None,
            latitude: None,
        };
        let mut w = WorkerProfile::new(ObjectId::new(), &dto);
        w.id = Some(ObjectId::new());
        w.rating_avg = rating;
        w.rating_count = count;
        w
    }

    #[test]
    fn neutral_contributions_without_signals() {
        // No budget, no response history, no jobs, no rating, no location:
        // flat 10 for price plus flat 5 for response time.
        let w = worker(0.0, 0, None);
        let (score, _) = score_worker(&w, None, None, false);
        assert_eq!(score, 15);
    }

    #[test]
    fn full_marks_candidate() {
        let mut w = worker(5.0, 50, Some(100.0));
        w.experience_years = Some(12);
        w.response_time_minutes = Some(0.0);
        w.acceptance_rate = 100.0;
        w.total_jobs_completed = 150;
        // budget far above rate -> price contribution close to 15
        let (score, _) = score_worker(&w, Some(1.0), Some(10_000.0), false);
        // 40 + 20 + ~14.85 + 10 + 10 + 5 + 10 proximity
        assert!(score >= 109 && score <= 110, "got {}", score);
    }

    #[test]
    fn budget_penalizes_expensive_worker() {
        let cheap = worker(4.0, 10, Some(500.0));
        let pricey = worker(4.0, 10, Some(2900.0));

        let (cheap_score, _) = score_worker(&cheap, Some(2.0), Some(3000.0), false);
        let (pricey_score, _) = score_worker(&pricey, Some(2.0), Some(3000.0), false);

        // Same rating, same proximity tier: the cheaper worker must rank higher.
        assert!(cheap_score > pricey_score);
    }

    #[test]
    fn rate_above_budget_floors_at_zero() {
        let w = worker(0.0, 0, Some(5000.0));
        let (score, _) = score_worker(&w, None, Some(1000.0), false);
        // price term is 0, response neutral 5
        assert_eq!(score, 5);
    }

    #[test]
    fn proximity_tiers() {
        assert_eq!(proximity_bonus(1.0), 10.0);
        assert_eq!(proximity_bonus(4.99), 10.0);
        assert_eq!(proximity_bonus(5.0), 5.0);
        assert_eq!(proximity_bonus(9.99), 5.0);
        assert_eq!(proximity_bonus(10.0), 2.0);
        assert_eq!(proximity_bonus(19.99), 2.0);
        assert_eq!(proximity_bonus(20.0), 0.0);
    }

    #[test]
    fn urgency_boosts_nearby_worker_past_better_far_one() {
        let near = worker(3.5, 10, None);
        let far = worker(4.5, 10, None);

        let (near_normal, _) = score_worker(&near, Some(2.0), None, false);
        let (far_normal, _) = score_worker(&far, Some(15.0), None, false);
        assert!(far_normal > near_normal - 10); // plausible without urgency

        let (near_urgent, _) = score_worker(&near, Some(2.0), None, true);
        let (far_urgent, _) = score_worker(&far, Some(15.0), None, true);
        // Only the worker inside 3 km is multiplied.
        assert!(near_urgent > near_normal);
        assert_eq!(far_urgent, far_normal);
        assert!(near_urgent > far_urgent);
    }

    #[test]
    fn urgency_ignored_outside_radius() {
        let w = worker(4.0, 10, None);
        let (normal, _) = score_worker(&w, Some(4.0), None, false);
        let (urgent, _) = score_worker(&w, Some(4.0), None, true);
        assert_eq!(normal, urgent);
    }

    #[test]
    fn reasons_capped_at_three() {
        let mut w = worker(4.9, 40, Some(100.0));
        w.experience_years = Some(10);
        w.response_time_minutes = Some(5.0);
        w.total_jobs_completed = 200;
        let (_, reasons) = score_worker(&w, Some(1.0), Some(1000.0), false);
        assert_eq!(reasons.len(), 3);
        assert!(reasons[0].starts_with("Highly rated"));
    }

    #[test]
    fn stable_order_for_equal_scores() {
        let a = worker(4.0, 10, None);
        let b = worker(4.0, 10, None);
        let (score_a, _) = score_worker(&a, None, None, false);
        let (score_b, _) = score_worker(&b, None, None, false);
        assert_eq!(score_a, score_b);

        let mut matches = vec![
            WorkerMatch {
                worker_id: "first".into(),
                display_name: "A".into(),
                score: score_a,
                distance_km: None,
                reasons: vec![],
            },
            WorkerMatch {
                worker_id: "second".into(),
                display_name: "B".into(),
                score: score_b,
                distance_km: None,
                reasons: vec![],
            },
        ];
        matches.sort_by(|x, y| y.score.cmp(&x.score));
        assert_eq!(matches[0].worker_id, "first");
        assert_eq!(matches[1].worker_id, "second");
    }
}
