//! Inbound CRM workflow webhooks. The upstream payload shape is not
//! contractually fixed, so everything is normalized into one canonical
//! event record before any lead state is touched. Replays are safe: the
//! only mutation is a last-write-wins timestamp update.

use axum::extract::State;
use axum::http::Method;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::info;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::shared::error::SyncError;
use crate::shared::state::AppState;
use crate::shared::store;

pub const ACTION_MAKLER_NOTIFIED: &str = "makler_notified";

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/webhooks/workflow-triggered",
        post(workflow_handler).get(workflow_handler),
    )
}

/// Canonical form of a workflow webhook, whatever spelling the CRM used.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowEvent {
    pub contact_id: String,
    pub location_id: Option<String>,
    pub action: String,
    pub timestamp: Option<DateTime<Utc>>,
}

fn string_field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| payload.get(key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl WorkflowEvent {
    pub fn from_value(payload: &Value) -> Result<Self, SyncError> {
        let contact_id = string_field(payload, &["contact_id", "contactId"])
            .or_else(|| {
                payload
                    .get("contact")
                    .and_then(|c| c.get("id"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            })
            .ok_or(SyncError::MissingContactId)?
            .to_string();

        let location_id =
            string_field(payload, &["location_id", "locationId"]).map(str::to_string);

        let action = string_field(payload, &["action", "type"])
            .unwrap_or(ACTION_MAKLER_NOTIFIED)
            .to_string();

        let timestamp = string_field(payload, &["timestamp", "createdAt", "created_at"])
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Self {
            contact_id,
            location_id,
            action,
            timestamp,
        })
    }
}

/// Case- and punctuation-insensitive action key.
fn normalize_action(action: &str) -> String {
    action
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn is_notify_action(action: &str) -> bool {
    matches!(
        normalize_action(action).as_str(),
        "maklernotified" | "maklerbenachrichtigt" | "notifymakler" | "notified"
    )
}

async fn workflow_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    body: Bytes,
) -> Result<Json<Value>, SyncError> {
    // Registration handshakes probe with GET/HEAD or an empty body and
    // expect a plain success acknowledgement.
    if method != Method::POST || body.is_empty() {
        return Ok(Json(probe_ack()));
    }
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return Ok(Json(probe_ack())),
    };

    let response = handle_event(&state, &payload).await?;
    Ok(Json(response))
}

fn probe_ack() -> Value {
    json!({ "success": true, "message": "Webhook endpoint ready" })
}

pub async fn handle_event(state: &AppState, payload: &Value) -> Result<Value, SyncError> {
    let event = WorkflowEvent::from_value(payload)?;

    let mut conn = state
        .conn
        .get()
        .map_err(|e| SyncError::Internal(format!("DB error: {e}")))?;
    let lead = store::find_lead_by_crm_contact(
        &mut conn,
        &event.contact_id,
        event.location_id.as_deref(),
    )
    .map_err(|e| SyncError::Persistence(e.to_string()))?
    .ok_or(SyncError::LeadNotFound)?;

    if !is_notify_action(&event.action) {
        info!(
            "Ignoring unknown workflow action '{}' for lead {}",
            event.action, lead.id
        );
        return Ok(json!({
            "success": false,
            "error": format!("Unknown action: {}", event.action),
        }));
    }

    let notified_at = event.timestamp.unwrap_or_else(Utc::now);
    store::mark_makler_notified(&mut conn, lead.id, notified_at)
        .map_err(|e| SyncError::Persistence(e.to_string()))?;

    info!(
        "Lead {} marked makler-notified at {}",
        lead.id, notified_at
    );
    Ok(json!({
        "success": true,
        "action": ACTION_MAKLER_NOTIFIED,
        "lead_id": lead.id,
        "lead_name": lead.name,
        "notified_at": notified_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_from_flat_snake_case() {
        let event = WorkflowEvent::from_value(&json!({
            "contact_id": "c1",
            "location_id": "loc1",
            "action": "makler_notified",
            "timestamp": "2026-03-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(event.contact_id, "c1");
        assert_eq!(event.location_id.as_deref(), Some("loc1"));
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn test_event_shape_tolerance() {
        let a = WorkflowEvent::from_value(&json!({ "contactId": "c1" })).unwrap();
        let b = WorkflowEvent::from_value(&json!({ "contact_id": "c1" })).unwrap();
        let c = WorkflowEvent::from_value(&json!({ "contact": { "id": "c1" } })).unwrap();
        assert_eq!(a.contact_id, "c1");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_event_defaults_action() {
        let event = WorkflowEvent::from_value(&json!({ "contactId": "c1" })).unwrap();
        assert_eq!(event.action, ACTION_MAKLER_NOTIFIED);

        let typed = WorkflowEvent::from_value(&json!({
            "contactId": "c1",
            "type": "Makler-Notified",
        }))
        .unwrap();
        assert_eq!(typed.action, "Makler-Notified");
    }

    #[test]
    fn test_event_missing_contact_id() {
        let err = WorkflowEvent::from_value(&json!({ "action": "makler_notified" })).unwrap_err();
        assert!(matches!(err, SyncError::MissingContactId));

        let blank = WorkflowEvent::from_value(&json!({ "contact_id": "  " })).unwrap_err();
        assert!(matches!(blank, SyncError::MissingContactId));
    }

    #[test]
    fn test_event_ignores_bad_timestamp() {
        let event = WorkflowEvent::from_value(&json!({
            "contactId": "c1",
            "timestamp": "yesterday",
        }))
        .unwrap();
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn test_normalize_action() {
        assert_eq!(normalize_action("Makler-Notified"), "maklernotified");
        assert_eq!(normalize_action("makler_notified"), "maklernotified");
        assert_eq!(normalize_action("MAKLER NOTIFIED"), "maklernotified");
    }

    #[test]
    fn test_notify_action_synonyms() {
        assert!(is_notify_action("makler_notified"));
        assert!(is_notify_action("Makler-Notified"));
        assert!(is_notify_action("notified"));
        assert!(is_notify_action("notify_makler"));
        assert!(!is_notify_action("foo"));
        assert!(!is_notify_action("contact_created"));
    }

    #[test]
    fn test_probe_ack_shape() {
        let ack = probe_ack();
        assert_eq!(ack["success"], true);
    }
}
