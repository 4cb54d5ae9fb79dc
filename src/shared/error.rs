use crate::crm::client::CrmError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Failure taxonomy shared by the synchronization surfaces. Validation
/// failures map to 400, missing rows and credentials to 404, everything
/// that went wrong on our side or the CRM's to 500.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Precondition(String),
    #[error("Missing contact id in webhook payload")]
    MissingContactId,
    #[error("No active CRM connection")]
    NoActiveConnection,
    #[error("Lead is not linked to a CRM contact")]
    LeadNotCrmLinked,
    #[error("Lead not found")]
    LeadNotFound,
    #[error("CRM request failed with status {status}: {body}")]
    CrmRequest { status: u16, body: String },
    #[error("Database write failed: {0}")]
    Persistence(String),
    #[error("{0}")]
    Internal(String),
}

impl SyncError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Precondition(_) | Self::MissingContactId | Self::LeadNotCrmLinked => {
                StatusCode::BAD_REQUEST
            }
            Self::NoActiveConnection | Self::LeadNotFound => StatusCode::NOT_FOUND,
            Self::CrmRequest { .. } | Self::Persistence(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<CrmError> for SyncError {
    fn from(err: CrmError) -> Self {
        match err {
            CrmError::RequestFailed { status, body } => Self::CrmRequest { status, body },
            CrmError::Network(msg) => Self::Internal(format!("CRM unreachable: {msg}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SyncError::Precondition("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(SyncError::MissingContactId.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SyncError::LeadNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(SyncError::NoActiveConnection.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            SyncError::CrmRequest { status: 422, body: String::new() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_crm_error_carries_status_and_body() {
        let err: SyncError = CrmError::RequestFailed {
            status: 401,
            body: "{\"message\":\"invalid token\"}".to_string(),
        }
        .into();
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(text.contains("invalid token"));
    }
}
