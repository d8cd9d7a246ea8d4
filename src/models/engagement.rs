use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::models::{GeoLocation, ServiceCategory};

/// Role of the actor driving a lifecycle transition, taken from the verified
/// identity context.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Worker,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    QuoteRequested,
    QuotesSent,
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    Disputed,
}

impl EngagementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementStatus::QuoteRequested => "quote_requested",
            EngagementStatus::QuotesSent => "quotes_sent",
            EngagementStatus::Pending => "pending",
            EngagementStatus::Accepted => "accepted",
            EngagementStatus::InProgress => "in_progress",
            EngagementStatus::Completed => "completed",
            EngagementStatus::Cancelled => "cancelled",
            EngagementStatus::Disputed => "disputed",
        }
    }
}

/// Events a party can raise against an engagement after it reached `pending`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Accept,
    Decline,
    Start,
    Complete,
    Cancel,
    Dispute,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Accept => "accept",
            LifecycleEvent::Decline => "decline",
            LifecycleEvent::Start => "start",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::Dispute => "dispute",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseAction {
    Accept,
    Decline,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Offered,
    Accepted,
    Expired,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CancellationKind {
    Cancelled,
    Declined,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScheduleWindow {
    pub starts_after: DateTime,
    pub ends_before: Option<DateTime>,
}

/// Customer budget; `max: None` means unbounded.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct BudgetRange {
    pub min: f64,
    pub max: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerResponse {
    pub action: ResponseAction,
    pub responded_at: DateTime,
    pub response_minutes: i64,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Quote {
    pub amount: f64,
    pub valid_until: Option<DateTime>,
    pub status: QuoteStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Cancellation {
    pub by: ActorRole,
    pub kind: CancellationKind,
    pub reason: Option<String>,
    pub at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProgressNote {
    pub note: String,
    pub at: DateTime,
}

/// One customer-worker pairing for one job.
///
/// The ancestry record (`ancestry_id == None`, no worker) represents the
/// customer's request before fan-out; `sent_to_workers` only grows and is
/// meaningful on that record. Engagements are never deleted: declines and
/// cancellations are states.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngagementRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub ancestry_id: Option<ObjectId>,
    pub reference: String,

    pub customer_id: ObjectId,
    pub worker_id: Option<ObjectId>,

    pub category: ServiceCategory,
    pub description: String,
    pub images: Vec<String>,
    pub location: Option<GeoLocation>,
    pub schedule: Option<ScheduleWindow>,
    pub budget: BudgetRange,

    pub status: EngagementStatus,
    pub sent_to_workers: Vec<ObjectId>,
    pub worker_response: Option<WorkerResponse>,
    pub quote: Option<Quote>,
    pub cancellation: Option<Cancellation>,
    pub progress_notes: Vec<ProgressNote>,
    pub completed_at: Option<DateTime>,

    pub created_at: DateTime,
    pub updated_at: DateTime,
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct CreateQuoteRequestDto {
    pub category: ServiceCategory,
    #[validate(length(min = 10, max = 4000))]
    pub description: String,
    pub images: Option<Vec<String>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub starts_after: Option<String>, // RFC 3339
    pub ends_before: Option<String>,
    #[validate(range(min = 0.0))]
    pub budget_min: f64,
    #[validate(range(min = 0.0))]
    pub budget_max: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendToWorkersDto {
    pub worker_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct RespondDto {
    pub action: ResponseAction,
    #[validate(range(min = 0.0))]
    pub quote_amount: Option<f64>,
    #[validate(range(min = 1, max = 90))]
    pub quote_valid_days: Option<i64>,
    #[validate(length(max = 1000))]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct TransitionDto {
    pub event: LifecycleEvent,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct EngagementResponse {
    pub id: String,
    pub ancestry_id: Option<String>,
    pub reference: String,
    pub customer_id: String,
    pub worker_id: Option<String>,
    pub category: ServiceCategory,
    pub description: String,
    pub status: EngagementStatus,
    pub sent_to_workers: Vec<String>,
    pub budget_min: f64,
    pub budget_max: Option<f64>,
    pub quote_amount: Option<f64>,
    pub response_minutes: Option<i64>,
    pub cancellation_reason: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl From<EngagementRecord> for EngagementResponse {
    fn from(record: EngagementRecord) -> Self {
        EngagementResponse {
            id: record.id.map(|id| id.to_hex()).unwrap_or_default(),
            ancestry_id: record.ancestry_id.map(|id| id.to_hex()),
            reference: record.reference,
            customer_id: record.customer_id.to_hex(),
            worker_id: record.worker_id.map(|id| id.to_hex()),
            category: record.category,
            description: record.description,
            status: record.status,
            sent_to_workers: record
                .sent_to_workers
                .iter()
                .map(|id| id.to_hex())
                .collect(),
            budget_min: record.budget.min,
            budget_max: record.budget.max,
            quote_amount: record.quote.as_ref().map(|q| q.amount),
            response_minutes: record.worker_response.as_ref().map(|r| r.response_minutes),
            cancellation_reason: record
                .cancellation
                .as_ref()
                .and_then(|c| c.reason.clone()),
            completed_at: record
                .completed_at
                .map(|at| at.try_to_rfc3339_string().unwrap_or_default()),
            created_at: record
                .created_at
                .try_to_rfc3339_string()
                .unwrap_or_default(),
        }
    }
}
