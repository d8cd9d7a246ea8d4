use log::{info, warn};
use mongodb::bson::{doc, oid::ObjectId, DateTime};

use crate::db::{is_duplicate_key_error, DbConn};
use crate::models::{
    BudgetRange, CreateQuoteRequestDto, EngagementRecord, EngagementStatus, GeoLocation,
    ScheduleWindow, WorkerProfile,
};
use crate::services::error::CoreError;
use crate::services::notify::{notify_async, Notifier, NotifyEvent};
use crate::utils::{generate_reference_code, validate_coordinates, validate_image_url};

/// Fans a customer's quote request out into one independent engagement record
/// per selected worker, all sharing the ancestry record.
///
/// Fan-out is idempotent at the worker-id granularity: the claim on each id
/// is an atomic `$ne`-guarded `$push` into `sent_to_workers`, so concurrent
/// re-invocations cannot double-send, and a unique `(ancestry_id, worker_id)`
/// index swallows the remaining insert race. Partial failures are repaired on
/// re-invocation rather than rolled back.
pub struct QuoteRequestCoordinator;

impl QuoteRequestCoordinator {
    pub async fn create_quote_request(
        db: &DbConn,
        customer_id: ObjectId,
        dto: &CreateQuoteRequestDto,
    ) -> Result<EngagementRecord, CoreError> {
        let mut record = build_ancestry_record(customer_id, dto)?;

        let result = db
            .collection::<EngagementRecord>("engagements")
            .insert_one(&record, None)
            .await?;
        record.id = result.inserted_id.as_object_id();

        info!(
            "quote request {} created for customer {}",
            record.reference,
            customer_id.to_hex()
        );
        Ok(record)
    }

    pub async fn send_to_workers(
        db: &DbConn,
        notifier: &Notifier,
        ancestry_id: ObjectId,
        customer_id: ObjectId,
        worker_ids: &[ObjectId],
    ) -> Result<Vec<EngagementRecord>, CoreError> {
        if worker_ids.is_empty() {
            return Err(CoreError::validation("worker_ids must not be empty"));
        }

        let ancestry = db
            .collection::<EngagementRecord>("engagements")
            .find_one(doc! { "_id": ancestry_id }, None)
            .await?
            .ok_or_else(|| CoreError::not_found("Quote request not found"))?;

        if ancestry.customer_id != customer_id {
            return Err(CoreError::authorization("Not your quote request"));
        }
        if ancestry.ancestry_id.is_some() || ancestry.worker_id.is_some() {
            return Err(CoreError::validation(
                "Fan-out must target the original quote request",
            ));
        }
        if !matches!(
            ancestry.status,
            EngagementStatus::QuoteRequested | EngagementStatus::QuotesSent
        ) {
            return Err(CoreError::ForbiddenTransition {
                from: ancestry.status.as_str().into(),
                event: "fan_out".into(),
            });
        }

        let workers = Self::load_workers(db, worker_ids).await?;

        let requested = dedupe_preserving_order(worker_ids);
        let mut records = Vec::with_capacity(requested.len());

        for worker_id in requested {
            // Atomic per-id claim on the ancestry's sent set. Only the
            // invocation that wins the claim creates the record.
            let claim = db
                .collection::<EngagementRecord>("engagements")
                .update_one(
                    doc! { "_id": ancestry_id, "sent_to_workers": { "$ne": worker_id } },
                    doc! {
                        "$push": { "sent_to_workers": worker_id },
                        "$set": { "updated_at": DateTime::now() },
                    },
                    None,
                )
                .await?;

            let claimed = claim.modified_count == 1;
            let existing = if claimed {
                None
            } else {
                db.collection::<EngagementRecord>("engagements")
                    .find_one(
                        doc! { "ancestry_id": ancestry_id, "worker_id": worker_id },
                        None,
                    )
                    .await?
            };

            let record = match existing {
                Some(record) => record,
                // Claimed now, or claimed by an earlier invocation that died
                // before creating the record: create it here.
                None => {
                    let record =
                        Self::insert_engagement(db, derive_engagement(&ancestry, worker_id))
                            .await?;
                    if let Some(worker) = workers.iter().find(|w| w.id == Some(worker_id)) {
                        notify_async(
                            notifier,
                            worker.user_id,
                            NotifyEvent::QuoteReceived,
                            serde_json::json!({
                                "engagement_id": record.id.map(|id| id.to_hex()),
                                "reference": record.reference,
                                "category": record.category.as_str(),
                            }),
                        );
                    }
                    record
                }
            };
            records.push(record);
        }

        // Ancestry moves to quotes_sent once; later invocations are no-ops.
        db.collection::<EngagementRecord>("engagements")
            .update_one(
                doc! { "_id": ancestry_id, "status": EngagementStatus::QuoteRequested.as_str() },
                doc! { "$set": {
                    "status": EngagementStatus::QuotesSent.as_str(),
                    "updated_at": DateTime::now(),
                }},
                None,
            )
            .await?;

        Ok(records)
    }

    /// A customer books one specific worker directly, skipping fan-out.
    pub async fn book_worker(
        db: &DbConn,
        notifier: &Notifier,
        customer_id: ObjectId,
        worker_id: ObjectId,
        dto: &CreateQuoteRequestDto,
    ) -> Result<EngagementRecord, CoreError> {
        let workers = Self::load_workers(db, &[worker_id]).await?;
        let worker = &workers[0];

        let mut record = build_ancestry_record(customer_id, dto)?;
        record.status = EngagementStatus::Pending;
        record.worker_id = Some(worker_id);
        record.sent_to_workers = vec![worker_id];

        let record = Self::insert_engagement(db, record).await?;

        notify_async(
            notifier,
            worker.user_id,
            NotifyEvent::QuoteReceived,
            serde_json::json!({
                "engagement_id": record.id.map(|id| id.to_hex()),
                "reference": record.reference,
                "category": record.category.as_str(),
            }),
        );

        Ok(record)
    }

    async fn load_workers(
        db: &DbConn,
        worker_ids: &[ObjectId],
    ) -> Result<Vec<WorkerProfile>, CoreError> {
        let mut cursor = db
            .collection::<WorkerProfile>("worker_profiles")
            .find(doc! { "_id": { "$in": worker_ids }, "is_active": true }, None)
            .await?;

        let mut workers = Vec::new();
        while cursor.advance().await? {
            workers.push(
                cursor
                    .deserialize_current()
                    .map_err(|e| CoreError::TransientStore(e.to_string()))?,
            );
        }

        for worker_id in dedupe_preserving_order(worker_ids) {
            if !workers.iter().any(|w| w.id == Some(worker_id)) {
                return Err(CoreError::not_found(format!(
                    "Worker {} not found or inactive",
                    worker_id.to_hex()
                )));
            }
        }
        Ok(workers)
    }

    async fn insert_engagement(
        db: &DbConn,
        record: EngagementRecord,
    ) -> Result<EngagementRecord, CoreError> {
        let collection = db.collection::<EngagementRecord>("engagements");
        match collection.insert_one(&record, None).await {
            Ok(result) => {
                let mut record = record;
                record.id = result.inserted_id.as_object_id();
                Ok(record)
            }
            // Unique (ancestry_id, worker_id) index: a concurrent invocation
            // inserted this sibling first. Return theirs.
            Err(e) if is_duplicate_key_error(&e) => {
                warn!(
                    "duplicate engagement insert for ancestry {:?} worker {:?}",
                    record.ancestry_id, record.worker_id
                );
                collection
                    .find_one(
                        doc! {
                            "ancestry_id": record.ancestry_id,
                            "worker_id": record.worker_id,
                        },
                        None,
                    )
                    .await?
                    .ok_or_else(|| CoreError::TransientStore("engagement insert raced".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds the worker-less record representing the customer's request.
pub fn build_ancestry_record(
    customer_id: ObjectId,
    dto: &CreateQuoteRequestDto,
) -> Result<EngagementRecord, CoreError> {
    if let Some(max) = dto.budget_max {
        if max < dto.budget_min {
            return Err(CoreError::validation(
                "budget_max must not be below budget_min",
            ));
        }
    }

    let location = match (dto.latitude, dto.longitude) {
        (Some(latitude), Some(longitude)) => {
            if !validate_coordinates(latitude, longitude) {
                return Err(CoreError::validation("Invalid coordinates"));
            }
            Some(GeoLocation::point(longitude, latitude))
        }
        (None, None) => None,
        _ => {
            return Err(CoreError::validation(
                "latitude and longitude must be supplied together",
            ));
        }
    };

    let images = dto.images.clone().unwrap_or_default();
    if let Some(bad) = images.iter().find(|url| !validate_image_url(url)) {
        return Err(CoreError::validation(format!("Invalid image URL: {}", bad)));
    }

    let schedule = parse_schedule(dto.starts_after.as_deref(), dto.ends_before.as_deref())?;

    let now = DateTime::now();
    Ok(EngagementRecord {
        id: None,
        ancestry_id: None,
        reference: generate_reference_code(),
        customer_id,
        worker_id: None,
        category: dto.category,
        description: dto.description.clone(),
        images,
        location,
        schedule,
        budget: BudgetRange {
            min: dto.budget_min,
            max: dto.budget_max,
        },
        status: EngagementStatus::QuoteRequested,
        sent_to_workers: vec![],
        worker_response: None,
        quote: None,
        cancellation: None,
        progress_notes: vec![],
        completed_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// One per-worker copy of the ancestry's descriptive payload, ready to be
/// driven independently through the lifecycle.
pub fn derive_engagement(ancestry: &EngagementRecord, worker_id: ObjectId) -> EngagementRecord {
    let now = DateTime::now();
    EngagementRecord {
        id: None,
        ancestry_id: ancestry.id,
        reference: generate_reference_code(),
        customer_id: ancestry.customer_id,
        worker_id: Some(worker_id),
        category: ancestry.category,
        description: ancestry.description.clone(),
        images: ancestry.images.clone(),
        location: ancestry.location.clone(),
        schedule: ancestry.schedule.clone(),
        budget: ancestry.budget.clone(),
        status: EngagementStatus::Pending,
        sent_to_workers: vec![],
        worker_response: None,
        quote: None,
        cancellation: None,
        progress_notes: vec![],
        completed_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn parse_schedule(
    starts_after: Option<&str>,
    ends_before: Option<&str>,
) -> Result<Option<ScheduleWindow>, CoreError> {
    let parse = |value: &str| -> Result<DateTime, CoreError> {
        let parsed = chrono::DateTime::parse_from_rfc3339(value)
            .map_err(|_| CoreError::validation(format!("Invalid RFC 3339 timestamp: {}", value)))?;
        Ok(DateTime::from_millis(parsed.timestamp_millis()))
    };

    match (starts_after, ends_before) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(CoreError::validation(
            "ends_before requires starts_after",
        )),
        (Some(start), end) => {
            let starts_after = parse(start)?;
            let ends_before = end.map(parse).transpose()?;
            if let Some(ends) = ends_before {
                if ends.timestamp_millis() <= starts_after.timestamp_millis() {
                    return Err(CoreError::validation(
                        "ends_before must be after starts_after",
                    ));
                }
            }
            Ok(Some(ScheduleWindow {
                starts_after,
                ends_before,
            }))
        }
    }
}

pub fn dedupe_preserving_order(ids: &[ObjectId]) -> Vec<ObjectId> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(**id))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceCategory;

    fn dto() -> CreateQuoteRequestDto {
        CreateQuoteRequestDto {
            category: ServiceCategory::Plumbing,
            description: "Kitchen sink is leaking under the counter".into(),
            images: None,
            latitude: Some(21.1702),
            longitude: Some(72.8311),
            starts_after: None,
            ends_before: None,
            budget_min: 500.0,
            budget_max: Some(2000.0),
        }
    }

    #[test]
    fn ancestry_record_starts_worker_less() {
        let customer = ObjectId::new();
        let record = build_ancestry_record(customer, &dto()).unwrap();
        assert_eq!(record.status, EngagementStatus::QuoteRequested);
        assert!(record.ancestry_id.is_none());
        assert!(record.worker_id.is_none());
        assert!(record.sent_to_workers.is_empty());
        assert_eq!(record.customer_id, customer);
        assert!(record.reference.starts_with("BK-"));
    }

    #[test]
    fn unbounded_budget_is_legal() {
        let mut d = dto();
        d.budget_max = None;
        assert!(build_ancestry_record(ObjectId::new(), &d).is_ok());
    }

    #[test]
    fn inverted_budget_rejected() {
        let mut d = dto();
        d.budget_max = Some(100.0);
        let err = build_ancestry_record(ObjectId::new(), &d).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn half_supplied_location_rejected() {
        let mut d = dto();
        d.longitude = None;
        let err = build_ancestry_record(ObjectId::new(), &d).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn bad_schedule_rejected() {
        let mut d = dto();
        d.starts_after = Some("tomorrow-ish".into());
        assert!(build_ancestry_record(ObjectId::new(), &d).is_err());

        d.starts_after = Some("2026-08-10T09:00:00+05:30".into());
        d.ends_before = Some("2026-08-09T09:00:00+05:30".into());
        assert!(build_ancestry_record(ObjectId::new(), &d).is_err());

        d.ends_before = Some("2026-08-11T18:00:00+05:30".into());
        let record = build_ancestry_record(ObjectId::new(), &d).unwrap();
        assert!(record.schedule.is_some());
    }

    #[test]
    fn derived_engagement_copies_payload_and_goes_pending() {
        let mut ancestry = build_ancestry_record(ObjectId::new(), &dto()).unwrap();
        ancestry.id = Some(ObjectId::new());

        let worker = ObjectId::new();
        let derived = derive_engagement(&ancestry, worker);

        assert_eq!(derived.status, EngagementStatus::Pending);
        assert_eq!(derived.ancestry_id, ancestry.id);
        assert_eq!(derived.worker_id, Some(worker));
        assert_eq!(derived.customer_id, ancestry.customer_id);
        assert_eq!(derived.description, ancestry.description);
        assert_eq!(derived.budget.min, ancestry.budget.min);
        // Each sibling carries its own reference and clean lifecycle fields
        assert_ne!(derived.reference, ancestry.reference);
        assert!(derived.worker_response.is_none());
        assert!(derived.sent_to_workers.is_empty());
    }

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let c = ObjectId::new();
        let deduped = dedupe_preserving_order(&[a, b, a, c, b]);
        assert_eq!(deduped, vec![a, b, c]);
    }
}
