use thiserror::Error;

use crate::utils::ApiError;

/// Domain errors raised by the booking core.
///
/// Conflict and forbidden-transition mean the caller's view of the record is
/// stale; the caller must re-fetch before retrying. TransientStore is safe to
/// retry with the same idempotency key.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    Conflict(String),

    #[error("event '{event}' is not allowed from status '{from}'")]
    ForbiddenTransition { from: String, event: String },

    #[error("store temporarily unavailable: {0}")]
    TransientStore(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        CoreError::Authorization(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }
}

impl From<mongodb::error::Error> for CoreError {
    fn from(err: mongodb::error::Error) -> Self {
        CoreError::TransientStore(err.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::Validation(msg) => ApiError::bad_request(msg.clone()),
            CoreError::NotFound(msg) => ApiError::not_found(msg.clone()),
            CoreError::Authorization(msg) => ApiError::forbidden(msg.clone()),
            CoreError::Conflict(msg) => ApiError::conflict(msg.clone()),
            CoreError::ForbiddenTransition { .. } => ApiError::unprocessable(err.to_string()),
            CoreError::TransientStore(_) => ApiError::service_unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    #[test]
    fn maps_to_http_statuses() {
        let cases: Vec<(CoreError, Status)> = vec![
            (CoreError::validation("bad"), Status::BadRequest),
            (CoreError::not_found("gone"), Status::NotFound),
            (CoreError::authorization("nope"), Status::Forbidden),
            (CoreError::conflict("raced"), Status::Conflict),
            (
                CoreError::ForbiddenTransition {
                    from: "completed".into(),
                    event: "complete".into(),
                },
                Status::UnprocessableEntity,
            ),
            (
                CoreError::TransientStore("timeout".into()),
                Status::ServiceUnavailable,
            ),
        ];

        for (err, status) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
        }
    }

    #[test]
    fn forbidden_transition_names_state_and_event() {
        let err = CoreError::ForbiddenTransition {
            from: "completed".into(),
            event: "accept".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("accept"));
    }
}
