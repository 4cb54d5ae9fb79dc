//! Delivery-status reconciliation sweep. The CRM's status string cached in
//! `crm_data` is authoritative; local `delivery_status` drifts when status
//! callbacks were missed. The sweep is idempotent and safe to re-run.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{extract::State, Json, Router};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::shared::models::{DeliveryStatus, MessageMeta};
use crate::shared::state::AppState;
use crate::shared::store;
use crate::shared::utils::DbPool;

const RECONCILE_BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub corrected: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("database connection failed: {0}")]
    DatabaseConnection(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("reconcile task failed: {0}")]
    TaskFailed(String),
}

impl IntoResponse for ReconcileError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Maps the CRM-reported status onto the local enumeration. The channel
/// only distinguishes "device confirmed" from "user opened", so every
/// terminal-looking string except "read" collapses to delivered.
pub fn corrected_status(crm_data: &Value) -> Option<DeliveryStatus> {
    let meta = MessageMeta::parse(crm_data);
    let status = meta.crm_status()?.trim().to_lowercase();
    match status.as_str() {
        "read" => Some(DeliveryStatus::Read),
        "completed" | "delivered" | "sent" => Some(DeliveryStatus::Delivered),
        _ => None,
    }
}

pub struct DeliveryReconciler {
    pool: DbPool,
}

impl DeliveryReconciler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// One full sweep over pending outgoing messages. A failed row update
    /// is counted and logged; it never aborts the remaining batches.
    pub fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| ReconcileError::DatabaseConnection(e.to_string()))?;

        let mut report = ReconcileReport::default();
        let mut after = None;

        loop {
            let batch = store::pending_outgoing_after(&mut conn, after, RECONCILE_BATCH_SIZE)
                .map_err(|e| ReconcileError::ScanFailed(e.to_string()))?;
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|m| m.id);

            for message in batch {
                report.scanned += 1;
                let Some(status) = corrected_status(&message.crm_data) else {
                    continue;
                };
                match store::correct_delivery_status(&mut conn, message.id, status) {
                    Ok(_) => {
                        report.corrected += 1;
                        debug!("Corrected message {} to {}", message.id, status);
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!("Failed to correct message {}: {e}", message.id);
                    }
                }
            }
        }

        info!(
            "Delivery reconciliation: scanned {}, corrected {}, failed {}",
            report.scanned, report.corrected, report.failed
        );
        Ok(report)
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/maintenance/reconcile-delivery",
        post(reconcile_handler),
    )
}

async fn reconcile_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileReport>, ReconcileError> {
    let pool = state.conn.clone();
    let report = tokio::task::spawn_blocking(move || DeliveryReconciler::new(pool).run())
        .await
        .map_err(|e| ReconcileError::TaskFailed(e.to_string()))??;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completed_maps_to_delivered() {
        let data = json!({ "status": "Completed" });
        assert_eq!(corrected_status(&data), Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_sent_and_delivered_map_to_delivered() {
        for s in ["sent", "SENT", "delivered", "Delivered"] {
            let data = json!({ "status": s });
            assert_eq!(corrected_status(&data), Some(DeliveryStatus::Delivered), "{s}");
        }
    }

    #[test]
    fn test_read_takes_precedence() {
        let data = json!({ "status": "READ" });
        assert_eq!(corrected_status(&data), Some(DeliveryStatus::Read));
    }

    #[test]
    fn test_unknown_or_absent_stays_pending() {
        assert_eq!(corrected_status(&json!({ "status": "failed" })), None);
        assert_eq!(corrected_status(&json!({ "status": "" })), None);
        assert_eq!(corrected_status(&json!({})), None);
        assert_eq!(
            corrected_status(&json!({ "media_type": "image", "media_url": "x" })),
            None
        );
    }

    #[test]
    fn test_status_found_on_media_message() {
        // Media message whose blob was merged with a status callback.
        let data = json!({
            "media_type": "voice",
            "media_url": "https://drive.example/v.ogg",
            "status": "sent",
        });
        assert_eq!(corrected_status(&data), Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_report_serialization() {
        let report = ReconcileReport {
            scanned: 12,
            corrected: 4,
            failed: 1,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scanned"], 12);
        assert_eq!(json["corrected"], 4);
        assert_eq!(json["failed"], 1);
    }
}
