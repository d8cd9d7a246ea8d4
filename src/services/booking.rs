use log::info;
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime, Document};
use mongodb::options::UpdateModifications;

use crate::db::DbConn;
use crate::models::{
    ActorRole, Cancellation, CancellationKind, EngagementRecord, EngagementStatus, LifecycleEvent,
    ProgressNote, Quote, QuoteStatus, RespondDto, ResponseAction, TransitionDto, WorkerProfile,
    WorkerResponse,
};
use crate::services::error::CoreError;
use crate::services::notify::{notify_async, Notifier, NotifyEvent};

const DEFAULT_QUOTE_VALID_DAYS: i64 = 7;

/// Owns the lifecycle of a single engagement record.
///
/// Every status write is a compare-and-set on the status observed by this
/// request: the update filter carries the expected "from" status, and a
/// matched count of zero on an existing record surfaces as a conflict. Two
/// concurrent actors can never both succeed on contradictory transitions.
pub struct BookingStateMachine;

/// Target status for `(from, event)`, or `None` when the event is not legal
/// from that status. Terminal and frozen states (`completed`, `cancelled`,
/// `disputed`) admit nothing; ancestry statuses are driven by the quote
/// coordinator, not by lifecycle events.
pub fn legal_target(from: EngagementStatus, event: LifecycleEvent) -> Option<EngagementStatus> {
    use EngagementStatus::*;
    use LifecycleEvent::*;

    match (from, event) {
        (Pending, Accept) => Some(Accepted),
        (Pending, Decline) => Some(Cancelled),
        (Accepted, Start) => Some(InProgress),
        (Accepted | InProgress, Complete) => Some(Completed),
        (Pending | Accepted, Cancel) => Some(Cancelled),
        (Accepted | InProgress, Dispute) => Some(Disputed),
        _ => None,
    }
}

pub fn allowed_roles(event: LifecycleEvent) -> &'static [ActorRole] {
    use LifecycleEvent::*;
    match event {
        Accept | Decline | Start => &[ActorRole::Worker],
        Complete | Cancel | Dispute => &[ActorRole::Customer, ActorRole::Worker],
    }
}

/// Checks the transition table and the actor's role. Ownership (subject id
/// against the record's party) is checked separately by the state machine.
pub fn plan_transition(
    from: EngagementStatus,
    event: LifecycleEvent,
    role: ActorRole,
) -> Result<EngagementStatus, CoreError> {
    let target = legal_target(from, event).ok_or_else(|| CoreError::ForbiddenTransition {
        from: from.as_str().into(),
        event: event.as_str().into(),
    })?;

    if !allowed_roles(event).contains(&role) {
        return Err(CoreError::authorization(format!(
            "A {} cannot {} an engagement",
            role_name(role),
            event.as_str()
        )));
    }

    Ok(target)
}

fn role_name(role: ActorRole) -> &'static str {
    match role {
        ActorRole::Customer => "customer",
        ActorRole::Worker => "worker",
        ActorRole::Admin => "admin",
    }
}

/// Minutes between creation and response, floored at zero.
pub fn response_minutes(created_at: DateTime, responded_at: DateTime) -> i64 {
    ((responded_at.timestamp_millis() - created_at.timestamp_millis()) / 60_000).max(0)
}

impl BookingStateMachine {
    /// Worker answers a pending engagement with accept or decline.
    pub async fn respond(
        db: &DbConn,
        notifier: &Notifier,
        engagement_id: ObjectId,
        subject_id: ObjectId,
        role: ActorRole,
        dto: &RespondDto,
    ) -> Result<EngagementRecord, CoreError> {
        let record = Self::fetch(db, engagement_id).await?;

        let profile = Self::acting_worker_profile(db, subject_id).await?;
        if record.worker_id != profile.id {
            return Err(CoreError::authorization(
                "This engagement was not offered to you",
            ));
        }
        if record.worker_response.is_some() {
            return Err(CoreError::conflict("Engagement has already been answered"));
        }

        let event = match dto.action {
            ResponseAction::Accept => LifecycleEvent::Accept,
            ResponseAction::Decline => LifecycleEvent::Decline,
        };
        plan_transition(record.status, event, role)?;

        let now = DateTime::now();
        let minutes = response_minutes(record.created_at, now);
        let accepted = dto.action == ResponseAction::Accept;

        let response = WorkerResponse {
            action: dto.action,
            responded_at: now,
            response_minutes: minutes,
            message: dto.message.clone(),
        };

        let mut set = doc! {
            "status": if accepted { EngagementStatus::Accepted.as_str() } else { EngagementStatus::Cancelled.as_str() },
            "worker_response": to_bson(&response).map_err(|e| CoreError::TransientStore(e.to_string()))?,
            "updated_at": now,
        };

        if accepted {
            if let Some(amount) = dto.quote_amount {
                let valid_days = dto.quote_valid_days.unwrap_or(DEFAULT_QUOTE_VALID_DAYS);
                let quote = Quote {
                    amount,
                    valid_until: Some(DateTime::from_millis(
                        now.timestamp_millis() + valid_days * 24 * 60 * 60 * 1000,
                    )),
                    status: QuoteStatus::Offered,
                };
                set.insert(
                    "quote",
                    to_bson(&quote).map_err(|e| CoreError::TransientStore(e.to_string()))?,
                );
            }
        } else {
            let cancellation = Cancellation {
                by: ActorRole::Worker,
                kind: CancellationKind::Declined,
                reason: dto.message.clone(),
                at: now,
            };
            set.insert(
                "cancellation",
                to_bson(&cancellation).map_err(|e| CoreError::TransientStore(e.to_string()))?,
            );
        }

        Self::apply_cas(db, engagement_id, record.status, doc! { "$set": set }).await?;

        // Fold the response into the worker's aggregate in one atomic update.
        if let Some(worker_id) = profile.id {
            db.collection::<WorkerProfile>("worker_profiles")
                .update_one(
                    doc! { "_id": worker_id },
                    UpdateModifications::Pipeline(response_stats_pipeline(minutes as f64, accepted)),
                    None,
                )
                .await?;
        }

        let event_type = if accepted {
            NotifyEvent::EngagementAccepted
        } else {
            NotifyEvent::EngagementDeclined
        };
        notify_async(
            notifier,
            record.customer_id,
            event_type,
            serde_json::json!({
                "engagement_id": engagement_id.to_hex(),
                "reference": record.reference,
                "quote_amount": dto.quote_amount,
            }),
        );

        info!(
            "engagement {} {} by worker {} after {} min",
            engagement_id.to_hex(),
            if accepted { "accepted" } else { "declined" },
            subject_id.to_hex(),
            minutes
        );

        Self::fetch(db, engagement_id).await
    }

    /// Drives start, complete, cancel, and dispute events.
    pub async fn transition(
        db: &DbConn,
        notifier: &Notifier,
        engagement_id: ObjectId,
        subject_id: ObjectId,
        role: ActorRole,
        dto: &TransitionDto,
    ) -> Result<EngagementRecord, CoreError> {
        if matches!(dto.event, LifecycleEvent::Accept | LifecycleEvent::Decline) {
            return Err(CoreError::validation(
                "Use the respond endpoint to accept or decline",
            ));
        }

        let record = Self::fetch(db, engagement_id).await?;
        let target = plan_transition(record.status, dto.event, role)?;

        // Ownership: the actor must be a party on this record.
        match role {
            ActorRole::Worker => {
                let profile = Self::acting_worker_profile(db, subject_id).await?;
                if record.worker_id != profile.id {
                    return Err(CoreError::authorization(
                        "You are not the worker on this engagement",
                    ));
                }
            }
            ActorRole::Customer => {
                if record.customer_id != subject_id {
                    return Err(CoreError::authorization(
                        "You are not the customer on this engagement",
                    ));
                }
            }
            ActorRole::Admin => {
                return Err(CoreError::authorization(
                    "Admins do not drive engagement lifecycles",
                ));
            }
        };

        let now = DateTime::now();
        let mut update = doc! {
            "$set": { "status": target.as_str(), "updated_at": now }
        };

        match dto.event {
            LifecycleEvent::Start => {
                let note = ProgressNote {
                    note: dto.reason.clone().unwrap_or_else(|| "Work started".into()),
                    at: now,
                };
                // Starting work accepts the standing quote, if one was offered.
                if record.quote.is_some() {
                    update.get_document_mut("$set").unwrap().insert(
                        "quote.status",
                        to_bson(&QuoteStatus::Accepted)
                            .map_err(|e| CoreError::TransientStore(e.to_string()))?,
                    );
                }
                update.insert(
                    "$push",
                    doc! { "progress_notes": to_bson(&note).map_err(|e| CoreError::TransientStore(e.to_string()))? },
                );
            }
            LifecycleEvent::Complete => {
                update
                    .get_document_mut("$set")
                    .unwrap()
                    .insert("completed_at", now);
            }
            LifecycleEvent::Cancel => {
                let cancellation = Cancellation {
                    by: role,
                    kind: CancellationKind::Cancelled,
                    reason: dto.reason.clone(),
                    at: now,
                };
                update.get_document_mut("$set").unwrap().insert(
                    "cancellation",
                    to_bson(&cancellation).map_err(|e| CoreError::TransientStore(e.to_string()))?,
                );
            }
            LifecycleEvent::Dispute => {
                let note = ProgressNote {
                    note: format!(
                        "Dispute raised: {}",
                        dto.reason.clone().unwrap_or_else(|| "unspecified".into())
                    ),
                    at: now,
                };
                update.insert(
                    "$push",
                    doc! { "progress_notes": to_bson(&note).map_err(|e| CoreError::TransientStore(e.to_string()))? },
                );
            }
            LifecycleEvent::Accept | LifecycleEvent::Decline => unreachable!(),
        }

        Self::apply_cas(db, engagement_id, record.status, update).await?;

        // Terminal-transition side effects on the worker aggregate.
        if dto.event == LifecycleEvent::Complete {
            if let Some(worker_id) = record.worker_id {
                db.collection::<WorkerProfile>("worker_profiles")
                    .update_one(
                        doc! { "_id": worker_id },
                        UpdateModifications::Pipeline(completion_stats_pipeline()),
                        None,
                    )
                    .await?;
            }
        }

        Self::notify_transition(db, notifier, &record, dto.event, role).await;

        Self::fetch(db, engagement_id).await
    }

    pub async fn fetch(db: &DbConn, engagement_id: ObjectId) -> Result<EngagementRecord, CoreError> {
        db.collection::<EngagementRecord>("engagements")
            .find_one(doc! { "_id": engagement_id }, None)
            .await?
            .ok_or_else(|| CoreError::not_found("Engagement not found"))
    }

    /// The compare-and-set write: the filter pins the status this request
    /// observed. Zero matches on an existing record means another actor
    /// already transitioned it.
    async fn apply_cas(
        db: &DbConn,
        engagement_id: ObjectId,
        expected_from: EngagementStatus,
        update: Document,
    ) -> Result<(), CoreError> {
        let result = db
            .collection::<EngagementRecord>("engagements")
            .update_one(
                doc! { "_id": engagement_id, "status": expected_from.as_str() },
                update,
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(CoreError::conflict(
                "Engagement was updated concurrently, refresh and retry",
            ));
        }
        Ok(())
    }

    async fn acting_worker_profile(
        db: &DbConn,
        subject_id: ObjectId,
    ) -> Result<WorkerProfile, CoreError> {
        db.collection::<WorkerProfile>("worker_profiles")
            .find_one(doc! { "user_id": subject_id }, None)
            .await?
            .ok_or_else(|| CoreError::authorization("No worker profile for this account"))
    }

    async fn notify_transition(
        db: &DbConn,
        notifier: &Notifier,
        record: &EngagementRecord,
        event: LifecycleEvent,
        actor_role: ActorRole,
    ) {
        let event_type = match event {
            LifecycleEvent::Start => NotifyEvent::EngagementStarted,
            LifecycleEvent::Complete => NotifyEvent::EngagementCompleted,
            LifecycleEvent::Cancel => NotifyEvent::EngagementCancelled,
            LifecycleEvent::Dispute => NotifyEvent::DisputeRaised,
            LifecycleEvent::Accept | LifecycleEvent::Decline => return,
        };

        let payload = serde_json::json!({
            "engagement_id": record.id.map(|id| id.to_hex()),
            "reference": record.reference,
            "event": event.as_str(),
        });

        // The party who did not act gets told.
        match actor_role {
            ActorRole::Worker => notify_async(notifier, record.customer_id, event_type, payload),
            _ => {
                let worker_user = match record.worker_id {
                    Some(worker_id) => db
                        .collection::<WorkerProfile>("worker_profiles")
                        .find_one(doc! { "_id": worker_id }, None)
                        .await
                        .ok()
                        .flatten()
                        .map(|p| p.user_id),
                    None => None,
                };
                if let Some(user_id) = worker_user {
                    notify_async(notifier, user_id, event_type, payload);
                }
            }
        }
    }
}

/// Atomic worker-aggregate update for an accept/decline: folds the response
/// latency into the rolling mean and recomputes the acceptance rate, all
/// against the pre-update field values.
pub fn response_stats_pipeline(minutes: f64, accepted: bool) -> Vec<Document> {
    let responded = doc! { "$add": ["$offers_accepted", "$offers_declined"] };
    let accepted_inc: i32 = if accepted { 1 } else { 0 };
    let declined_inc: i32 = 1 - accepted_inc;

    vec![doc! {
        "$set": {
            "response_time_minutes": {
                "$cond": [
                    { "$eq": [responded.clone(), 0] },
                    minutes,
                    { "$divide": [
                        { "$add": [
                            { "$multiply": [{ "$ifNull": ["$response_time_minutes", 0.0] }, responded.clone()] },
                            minutes,
                        ]},
                        { "$add": [responded.clone(), 1] },
                    ]},
                ]
            },
            "offers_accepted": { "$add": ["$offers_accepted", accepted_inc] },
            "offers_declined": { "$add": ["$offers_declined", declined_inc] },
            "acceptance_rate": {
                "$multiply": [
                    { "$divide": [
                        { "$add": ["$offers_accepted", accepted_inc] },
                        { "$add": [responded, 1] },
                    ]},
                    100,
                ]
            },
            "updated_at": "$$NOW",
        }
    }]
}

/// Completion bumps the job counter and re-evaluates the acceptance rate from
/// the response counters in the same atomic update.
pub fn completion_stats_pipeline() -> Vec<Document> {
    let responded = doc! { "$add": ["$offers_accepted", "$offers_declined"] };

    vec![doc! {
        "$set": {
            "total_jobs_completed": { "$add": ["$total_jobs_completed", 1] },
            "acceptance_rate": {
                "$cond": [
                    { "$eq": [responded.clone(), 0] },
                    "$acceptance_rate",
                    { "$multiply": [{ "$divide": ["$offers_accepted", responded] }, 100] },
                ]
            },
            "updated_at": "$$NOW",
        }
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use EngagementStatus::*;
    use LifecycleEvent::*;

    #[test]
    fn pending_admits_only_responses_and_cancel() {
        assert_eq!(legal_target(Pending, Accept), Some(Accepted));
        assert_eq!(legal_target(Pending, Decline), Some(Cancelled));
        assert_eq!(legal_target(Pending, Cancel), Some(Cancelled));
        assert_eq!(legal_target(Pending, Start), None);
        assert_eq!(legal_target(Pending, Complete), None);
        assert_eq!(legal_target(Pending, Dispute), None);
    }

    #[test]
    fn accepted_admits_start_complete_cancel_dispute() {
        assert_eq!(legal_target(Accepted, Start), Some(InProgress));
        assert_eq!(legal_target(Accepted, Complete), Some(Completed));
        assert_eq!(legal_target(Accepted, Cancel), Some(Cancelled));
        assert_eq!(legal_target(Accepted, Dispute), Some(Disputed));
        assert_eq!(legal_target(Accepted, Accept), None);
    }

    #[test]
    fn in_progress_admits_complete_and_dispute_only() {
        assert_eq!(legal_target(InProgress, Complete), Some(Completed));
        assert_eq!(legal_target(InProgress, Dispute), Some(Disputed));
        assert_eq!(legal_target(InProgress, Cancel), None);
        assert_eq!(legal_target(InProgress, Start), None);
    }

    #[test]
    fn terminal_states_reject_everything() {
        for status in [Completed, Cancelled, Disputed] {
            for event in [Accept, Decline, Start, Complete, Cancel, Dispute] {
                assert_eq!(legal_target(status, event), None, "{:?} {:?}", status, event);
            }
        }
    }

    #[test]
    fn second_complete_is_forbidden() {
        let err = plan_transition(Completed, Complete, ActorRole::Customer).unwrap_err();
        assert!(matches!(err, CoreError::ForbiddenTransition { .. }));
    }

    #[test]
    fn ancestry_statuses_reject_lifecycle_events() {
        for status in [QuoteRequested, QuotesSent] {
            assert_eq!(legal_target(status, Accept), None);
            assert_eq!(legal_target(status, Cancel), None);
        }
    }

    #[test]
    fn role_checks_gate_events() {
        // A customer cannot accept on the worker's behalf
        let err = plan_transition(Pending, Accept, ActorRole::Customer).unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));

        // Both parties may complete
        assert!(plan_transition(Accepted, Complete, ActorRole::Customer).is_ok());
        assert!(plan_transition(InProgress, Complete, ActorRole::Worker).is_ok());

        // Admins are not parties
        let err = plan_transition(Accepted, Cancel, ActorRole::Admin).unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));
    }

    #[test]
    fn forbidden_transition_beats_role_check() {
        // Illegal event from this state reports ForbiddenTransition even for
        // a role that could never run it.
        let err = plan_transition(Completed, Start, ActorRole::Customer).unwrap_err();
        assert!(matches!(err, CoreError::ForbiddenTransition { .. }));
    }

    #[test]
    fn response_minutes_from_timestamps() {
        let created = DateTime::from_millis(1_700_000_000_000);
        let responded = DateTime::from_millis(1_700_000_000_000 + 45 * 60_000);
        assert_eq!(response_minutes(created, responded), 45);

        // Sub-minute responses floor to zero
        let fast = DateTime::from_millis(1_700_000_000_000 + 30_000);
        assert_eq!(response_minutes(created, fast), 0);

        // Clock skew never goes negative
        let before = DateTime::from_millis(1_700_000_000_000 - 60_000);
        assert_eq!(response_minutes(created, before), 0);
    }

    #[test]
    fn response_pipeline_bumps_the_right_counter() {
        let accept = response_stats_pipeline(30.0, true);
        let set = accept[0].get_document("$set").unwrap();
        let accepted_add = set
            .get_document("offers_accepted")
            .unwrap()
            .get_array("$add")
            .unwrap();
        assert_eq!(accepted_add[1].as_i32(), Some(1));
        let declined_add = set
            .get_document("offers_declined")
            .unwrap()
            .get_array("$add")
            .unwrap();
        assert_eq!(declined_add[1].as_i32(), Some(0));

        let decline = response_stats_pipeline(30.0, false);
        let set = decline[0].get_document("$set").unwrap();
        let declined_add = set
            .get_document("offers_declined")
            .unwrap()
            .get_array("$add")
            .unwrap();
        assert_eq!(declined_add[1].as_i32(), Some(1));
    }

    #[test]
    fn completion_pipeline_increments_jobs() {
        let pipeline = completion_stats_pipeline();
        assert_eq!(pipeline.len(), 1);
        let set = pipeline[0].get_document("$set").unwrap();
        assert!(set.contains_key("total_jobs_completed"));
        assert!(set.contains_key("acceptance_rate"));
    }
}
