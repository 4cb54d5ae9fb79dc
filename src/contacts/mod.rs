//! Contact onboarding: create the CRM contact first, then the local lead.
//! A CRM failure leaves no local row; a local insert failure leaves an
//! orphan CRM contact, which is cheaper to clean up than a lost lead.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use log::{error, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::crm::client::NewCrmContact;
use crate::shared::error::SyncError;
use crate::shared::models::{Lead, LEAD_SOURCE_APP, LEAD_STATUS_NEW};
use crate::shared::state::AppState;
use crate::shared::store;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/contacts/create", post(create_contact_handler))
}

#[derive(Debug, Deserialize)]
pub struct CreateContactRequest {
    pub user_id: Uuid,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub objekt_id: Option<String>,
}

async fn create_contact_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateContactRequest>,
) -> Result<Json<Value>, SyncError> {
    let lead = create_contact(&state, request).await?;
    Ok(Json(json!({
        "success": true,
        "crm_contact_id": lead.crm_contact_id,
        "lead": lead,
    })))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn display_name(first_name: &str, last_name: Option<&str>) -> String {
    match last_name {
        Some(last) if !last.trim().is_empty() => format!("{} {}", first_name, last.trim()),
        _ => first_name.to_string(),
    }
}

pub async fn create_contact(
    state: &AppState,
    request: CreateContactRequest,
) -> Result<Lead, SyncError> {
    let first_name = request.first_name.trim().to_string();
    if first_name.is_empty() {
        return Err(SyncError::Precondition(
            "first_name must not be empty".to_string(),
        ));
    }
    if request.user_id.is_nil() {
        return Err(SyncError::Precondition(
            "user_id must not be empty".to_string(),
        ));
    }

    let mut conn = state
        .conn
        .get()
        .map_err(|e| SyncError::Internal(format!("DB error: {e}")))?;
    let connection = store::active_connection_for_user(&mut conn, request.user_id)
        .map_err(|e| SyncError::Persistence(e.to_string()))?
        .ok_or(SyncError::NoActiveConnection)?;
    drop(conn);

    let last_name = non_empty(request.last_name);
    let email = non_empty(request.email);
    let phone = non_empty(request.phone);

    let contact = NewCrmContact {
        first_name: first_name.clone(),
        last_name: last_name.clone(),
        email: email.clone(),
        phone: phone.clone(),
        location_id: connection.location_id.clone(),
        source: Some(LEAD_SOURCE_APP.to_string()),
    };

    // Not idempotent: a retry after an unconfirmed failure can duplicate
    // the CRM contact.
    let created = state
        .crm
        .create_contact(&connection.access_token, &contact)
        .await?;

    let now = Utc::now();
    let lead = Lead {
        id: Uuid::new_v4(),
        user_id: request.user_id,
        name: display_name(&first_name, last_name.as_deref()),
        email,
        phone,
        status: LEAD_STATUS_NEW.to_string(),
        source: LEAD_SOURCE_APP.to_string(),
        objekt_id: non_empty(request.objekt_id),
        crm_contact_id: Some(created.contact.id.clone()),
        crm_location_id: Some(connection.location_id),
        makler_notified_at: None,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state
        .conn
        .get()
        .map_err(|e| SyncError::Internal(format!("DB error: {e}")))?;
    store::insert_lead(&mut conn, &lead).map_err(|e| {
        error!(
            "Lead insert failed after CRM contact {} was created: {e}",
            created.contact.id
        );
        SyncError::Persistence(format!(
            "lead insert failed, orphan CRM contact {}: {e}",
            created.contact.id
        ))
    })?;

    info!(
        "Created lead {} linked to CRM contact {}",
        lead.id, created.contact.id
    );
    Ok(lead)
}
