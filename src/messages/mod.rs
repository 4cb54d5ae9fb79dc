//! Outbound media dispatch: upload to the drive, relay through the CRM,
//! persist exactly one message row whatever happened upstream. A degraded
//! CRM never loses the conversation, it only freezes the message at
//! pending.

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use log::{error, info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::crm::client::{OutboundCrmMessage, CHANNEL_WHATSAPP};
use crate::drive;
use crate::shared::error::SyncError;
use crate::shared::models::{DeliveryStatus, Message, MessageMeta, DIRECTION_OUTGOING};
use crate::shared::state::AppState;
use crate::shared::store;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/messages/send-media", post(send_media_handler))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Voice,
    Video,
    Image,
    Document,
}

impl MediaKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "voice" | "audio" | "voice_note" => Self::Voice,
            "video" => Self::Video,
            "image" | "photo" => Self::Image,
            _ => Self::Document,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "video",
            Self::Image => "image",
            Self::Document => "document",
        }
    }

    /// Transcript placeholder when the object never reached the CRM.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Voice => "🎤 Sprachnachricht gesendet",
            Self::Video => "🎥 Video gesendet",
            Self::Image => "📷 Bild gesendet",
            Self::Document => "📄 Dokument gesendet",
        }
    }
}

#[derive(Debug)]
pub struct SendMediaRequest {
    pub user_id: Uuid,
    pub lead_id: Uuid,
    pub media_kind: MediaKind,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug)]
pub struct SendMediaOutcome {
    pub delivered: bool,
    pub media_url: Option<String>,
    pub message_id: Uuid,
    pub crm_message_id: Option<String>,
    pub crm_error: Option<String>,
}

async fn send_media_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, SyncError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut user_id: Option<String> = None;
    let mut lead_id: Option<String> = None;
    let mut media_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SyncError::Precondition(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .unwrap_or("upload.bin")
                    .to_string();
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&file_name)
                            .first_or_octet_stream()
                            .to_string()
                    });
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| SyncError::Precondition(format!("Failed to read file: {e}")))?;
                file = Some((file_name, content_type, data));
            }
            "user_id" => user_id = field.text().await.ok(),
            "lead_id" => lead_id = field.text().await.ok(),
            "media_type" => media_type = field.text().await.ok(),
            _ => {}
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| SyncError::Precondition("Missing file field".to_string()))?;
    let user_id = user_id
        .as_deref()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| SyncError::Precondition("Missing or invalid user_id".to_string()))?;
    let lead_id = lead_id
        .as_deref()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| SyncError::Precondition("Missing or invalid lead_id".to_string()))?;
    let media_kind = MediaKind::parse(media_type.as_deref().unwrap_or_default());

    let outcome = send_media(
        &state,
        SendMediaRequest {
            user_id,
            lead_id,
            media_kind,
            file_name,
            content_type,
            data,
        },
    )
    .await?;

    // CRM failure stays HTTP 200: the message is saved locally and a client
    // retry storm would only duplicate CRM traffic.
    if outcome.delivered {
        Ok(Json(json!({
            "success": true,
            "message_id": outcome.message_id,
            "crm_message_id": outcome.crm_message_id,
            "media_url": outcome.media_url,
        })))
    } else {
        Ok(Json(json!({
            "success": false,
            "error": outcome.crm_error,
            "saved_locally": true,
            "message_id": outcome.message_id,
        })))
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned
    }
}

fn storage_key(lead_id: Uuid, file_name: &str) -> String {
    format!(
        "leads/{}/{}_{}",
        lead_id,
        Utc::now().timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

pub async fn send_media(
    state: &AppState,
    request: SendMediaRequest,
) -> Result<SendMediaOutcome, SyncError> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| SyncError::Internal(format!("DB error: {e}")))?;
    let lead = store::find_lead(&mut conn, request.lead_id)
        .map_err(|e| SyncError::Persistence(e.to_string()))?
        .ok_or(SyncError::LeadNotFound)?;
    let (contact_id, location_id) = match (&lead.crm_contact_id, &lead.crm_location_id) {
        (Some(contact), Some(location)) => (contact.clone(), location.clone()),
        _ => return Err(SyncError::LeadNotCrmLinked),
    };
    let connection = store::active_connection_for_location(&mut conn, &location_id)
        .map_err(|e| SyncError::Persistence(e.to_string()))?
        .ok_or(SyncError::NoActiveConnection)?;
    drop(conn);

    // Storage outages must not block CRM dispatch.
    let key = storage_key(lead.id, &request.file_name);
    let media_url = match drive::upload_media(
        state,
        &key,
        request.data.clone(),
        &request.content_type,
    )
    .await
    {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Media upload failed, dispatching without attachment: {e}");
            None
        }
    };

    let (content, attachments) = match &media_url {
        Some(url) => (String::new(), vec![url.clone()]),
        None => (request.media_kind.placeholder().to_string(), vec![]),
    };

    let outbound = OutboundCrmMessage {
        channel: CHANNEL_WHATSAPP.to_string(),
        contact_id,
        message: content.clone(),
        attachments,
    };
    let crm_result = state
        .crm
        .send_message(&connection.access_token, &outbound)
        .await;

    let now = Utc::now();
    let message_id = Uuid::new_v4();

    let (delivered, crm_message_id, crm_error, meta) = match crm_result {
        Ok(response) => (
            true,
            response.message_id,
            None,
            MessageMeta::Media {
                media_type: request.media_kind.as_str().to_string(),
                media_url: media_url.clone(),
            },
        ),
        Err(e) => {
            warn!(
                "CRM send failed for lead {}, saving message locally: {e}",
                lead.id
            );
            (
                false,
                None,
                Some(e.to_string()),
                MessageMeta::MediaError {
                    media_type: request.media_kind.as_str().to_string(),
                    media_url: media_url.clone(),
                    crm_error: e.to_string(),
                },
            )
        }
    };

    // The CRM status callback is authoritative for later transitions, so
    // even a confirmed send starts at the insertion default.
    let message = Message {
        id: message_id,
        lead_id: lead.id,
        user_id: request.user_id,
        direction: DIRECTION_OUTGOING.to_string(),
        content,
        delivery_status: DeliveryStatus::Pending.as_str().to_string(),
        crm_message_id: crm_message_id.clone(),
        crm_data: meta.to_value(),
        created_at: now,
        updated_at: now,
    };

    let mut conn = state
        .conn
        .get()
        .map_err(|e| SyncError::Internal(format!("DB error: {e}")))?;
    store::insert_message(&mut conn, &message).map_err(|e| {
        if delivered {
            error!(
                "Message {} reached the CRM but local persist failed: {e}",
                crm_message_id.as_deref().unwrap_or("?")
            );
        }
        SyncError::Persistence(e.to_string())
    })?;

    info!(
        "Media message {} for lead {} persisted (delivered: {})",
        message_id, lead.id, delivered
    );
    Ok(SendMediaOutcome {
        delivered,
        media_url,
        message_id,
        crm_message_id,
        crm_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse("voice"), MediaKind::Voice);
        assert_eq!(MediaKind::parse("AUDIO"), MediaKind::Voice);
        assert_eq!(MediaKind::parse("video"), MediaKind::Video);
        assert_eq!(MediaKind::parse("photo"), MediaKind::Image);
        assert_eq!(MediaKind::parse("pdf"), MediaKind::Document);
        assert_eq!(MediaKind::parse(""), MediaKind::Document);
    }

    #[test]
    fn test_placeholders_name_the_media_kind() {
        assert!(MediaKind::Voice.placeholder().contains("Sprachnachricht"));
        assert!(MediaKind::Video.placeholder().contains("Video"));
        assert!(MediaKind::Image.placeholder().contains("Bild"));
        assert!(MediaKind::Document.placeholder().contains("Dokument"));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("foto 1 (neu).jpg"), "foto_1__neu_.jpg");
        assert_eq!(sanitize_file_name("voice.ogg"), "voice.ogg");
        assert_eq!(sanitize_file_name(""), "upload.bin");
    }

    #[test]
    fn test_storage_key_is_scoped_to_lead() {
        let lead_id = Uuid::new_v4();
        let key = storage_key(lead_id, "nachricht.ogg");
        assert!(key.starts_with(&format!("leads/{}/", lead_id)));
        assert!(key.ends_with("_nachricht.ogg"));
    }
}
