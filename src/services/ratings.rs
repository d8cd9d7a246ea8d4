use log::warn;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument, UpdateModifications};

use crate::db::DbConn;
use crate::models::WorkerProfile;
use crate::services::error::CoreError;

/// Maintains `rating_avg`/`rating_count` on the worker document.
///
/// Creation folds the new rating in with a single store-side pipeline update
/// (never a caller-side read-modify-write). Edits and moderation changes
/// invalidate the running mean, so they trigger a full recompute over the
/// currently-visible reviews, serialized per worker by a compare-and-set on
/// `rating_version`.
pub struct RatingAggregator;

const MAX_RECOMPUTE_ATTEMPTS: usize = 5;

/// Which review mutation happened; selects the aggregation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingEvent {
    Created { rating: i32 },
    Edited,
    VisibilityChanged,
}

impl RatingAggregator {
    pub async fn apply(
        db: &DbConn,
        worker_id: ObjectId,
        event: RatingEvent,
    ) -> Result<f64, CoreError> {
        match event {
            RatingEvent::Created { rating } => Self::apply_review(db, worker_id, rating).await,
            RatingEvent::Edited | RatingEvent::VisibilityChanged => {
                Self::recompute(db, worker_id).await
            }
        }
    }

    /// `new_avg = (old_avg * old_count + rating) / (old_count + 1)`, applied
    /// atomically on the worker document. Returns the new average.
    pub async fn apply_review(
        db: &DbConn,
        worker_id: ObjectId,
        rating: i32,
    ) -> Result<f64, CoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = db
            .collection::<WorkerProfile>("worker_profiles")
            .find_one_and_update(
                doc! { "_id": worker_id },
                UpdateModifications::Pipeline(incremental_update_pipeline(rating)),
                options,
            )
            .await?
            .ok_or_else(|| CoreError::not_found("Worker not found"))?;

        Ok(updated.rating_avg)
    }

    /// Recomputes the mean over all currently-visible reviews. The write is
    /// conditioned on the `rating_version` observed before aggregating; a
    /// mismatch means a concurrent writer got there first and the recompute
    /// re-runs against fresh state.
    pub async fn recompute(db: &DbConn, worker_id: ObjectId) -> Result<f64, CoreError> {
        for _ in 0..MAX_RECOMPUTE_ATTEMPTS {
            let worker = db
                .collection::<WorkerProfile>("worker_profiles")
                .find_one(doc! { "_id": worker_id }, None)
                .await?
                .ok_or_else(|| CoreError::not_found("Worker not found"))?;
            let version = worker.rating_version;

            let (avg, count) = Self::visible_review_stats(db, worker_id).await?;

            let result = db
                .collection::<WorkerProfile>("worker_profiles")
                .update_one(
                    doc! { "_id": worker_id, "rating_version": version },
                    doc! {
                        "$set": {
                            "rating_avg": avg,
                            "rating_count": count,
                            "rating_version": version + 1,
                            "updated_at": DateTime::now(),
                        }
                    },
                    None,
                )
                .await?;

            if result.modified_count == 1 {
                return Ok(avg);
            }

            warn!(
                "rating recompute raced for worker {}, retrying",
                worker_id.to_hex()
            );
        }

        Err(CoreError::TransientStore(
            "rating recompute contention, retry".into(),
        ))
    }

    async fn visible_review_stats(
        db: &DbConn,
        worker_id: ObjectId,
    ) -> Result<(f64, i32), CoreError> {
        let pipeline = vec![
            doc! { "$match": { "worker_id": worker_id, "is_visible": true } },
            doc! { "$group": {
                "_id": null,
                "avg": { "$avg": "$rating" },
                "count": { "$sum": 1 },
            }},
        ];

        let mut cursor = db
            .collection::<Document>("reviews")
            .aggregate(pipeline, None)
            .await?;

        if cursor.advance().await? {
            let document = cursor.deserialize_current()?;
            let avg = document.get_f64("avg").unwrap_or(0.0);
            let count = document
                .get_i32("count")
                .unwrap_or_else(|_| document.get_i64("count").unwrap_or(0) as i32);
            Ok((avg, count))
        } else {
            // No visible reviews left
            Ok((0.0, 0))
        }
    }
}

/// Store-side increment-and-divide. All field references read the pre-update
/// document, so the count bump is spelled out explicitly where needed.
pub fn incremental_update_pipeline(rating: i32) -> Vec<Document> {
    vec![doc! {
        "$set": {
            "rating_avg": {
                "$divide": [
                    { "$add": [
                        { "$multiply": ["$rating_avg", "$rating_count"] },
                        rating as f64,
                    ]},
                    { "$add": ["$rating_count", 1] },
                ]
            },
            "rating_count": { "$add": ["$rating_count", 1] },
            "rating_version": { "$add": ["$rating_version", 1] },
            "updated_at": "$$NOW",
        }
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incremental_mean(old_avg: f64, old_count: i32, rating: i32) -> (f64, i32) {
        (
            (old_avg * old_count as f64 + rating as f64) / (old_count + 1) as f64,
            old_count + 1,
        )
    }

    #[test]
    fn incremental_mean_matches_running_formula() {
        // Worker at 4.0 over 10 reviews, a 5 arrives
        let (avg, count) = incremental_mean(4.0, 10, 5);
        assert!((avg - 45.0 / 11.0).abs() < 1e-9);
        assert_eq!(count, 11);
    }

    #[test]
    fn incremental_mean_from_empty() {
        let (avg, count) = incremental_mean(0.0, 0, 3);
        assert_eq!(avg, 3.0);
        assert_eq!(count, 1);
    }

    #[test]
    fn sequence_of_reviews_yields_arithmetic_mean() {
        let ratings = [5, 3, 4, 1, 5, 2];
        let (mut avg, mut count) = (0.0, 0);
        for r in ratings {
            (avg, count) = incremental_mean(avg, count, r);
        }
        let expected = ratings.iter().sum::<i32>() as f64 / ratings.len() as f64;
        assert!((avg - expected).abs() < 1e-9);
        assert_eq!(count as usize, ratings.len());
    }

    #[test]
    fn pipeline_is_single_atomic_stage() {
        let pipeline = incremental_update_pipeline(5);
        assert_eq!(pipeline.len(), 1);

        let set = pipeline[0].get_document("$set").unwrap();
        assert!(set.contains_key("rating_avg"));
        assert!(set.contains_key("rating_count"));
        assert!(set.contains_key("rating_version"));
    }

    #[test]
    fn pipeline_divides_by_bumped_count() {
        let pipeline = incremental_update_pipeline(4);
        let set = pipeline[0].get_document("$set").unwrap();
        let divide = set
            .get_document("rating_avg")
            .unwrap()
            .get_array("$divide")
            .unwrap();
        // Denominator is the pre-image count plus one, not the raw count.
        let denominator = divide[1].as_document().unwrap();
        assert!(denominator.contains_key("$add"));
    }
}
