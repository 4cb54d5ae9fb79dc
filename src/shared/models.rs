use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DIRECTION_INCOMING: &str = "incoming";
pub const DIRECTION_OUTGOING: &str = "outgoing";

pub const LEAD_STATUS_NEW: &str = "neu";
pub const LEAD_SOURCE_APP: &str = "app";

/// Confirmed handling state of an outgoing message. Transitions only move
/// forward along pending -> delivered -> read; a failed send stays pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub fn may_advance_to(&self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable, AsChangeset)]
#[diesel(table_name = schema::leads)]
pub struct Lead {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub source: String,
    pub objekt_id: Option<String>,
    pub crm_contact_id: Option<String>,
    pub crm_location_id: Option<String>,
    pub makler_notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable)]
#[diesel(table_name = schema::messages)]
pub struct Message {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub user_id: Uuid,
    pub direction: String,
    pub content: String,
    pub delivery_status: String,
    pub crm_message_id: Option<String>,
    pub crm_data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored per-user CRM credentials. Refreshed by an external collaborator;
/// read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = schema::crm_connections)]
pub struct CrmConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub location_id: String,
    pub access_token: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Typed view over the `crm_data` jsonb column. The blob is loose at the
/// storage boundary; everything in this crate converts it through here
/// before acting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageMeta {
    /// Media relayed to the CRM. `media_url` is absent when the blob store
    /// was unavailable at send time.
    Media {
        media_type: String,
        media_url: Option<String>,
    },
    /// Media that could not be relayed; the message is frozen at pending.
    MediaError {
        media_type: String,
        media_url: Option<String>,
        crm_error: String,
    },
    /// CRM-reported delivery status, written by the CRM's status callback.
    Status { status: String },
    Opaque(Value),
}

impl MessageMeta {
    pub fn parse(value: &Value) -> Self {
        let get = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let media_url = get("media_url").filter(|u| !u.is_empty());

        if let Some(status) = get("status").filter(|s| !s.is_empty()) {
            return Self::Status { status };
        }
        if let Some(media_type) = get("media_type") {
            return match get("crm_error") {
                Some(crm_error) => Self::MediaError {
                    media_type,
                    media_url,
                    crm_error,
                },
                None => Self::Media {
                    media_type,
                    media_url,
                },
            };
        }
        Self::Opaque(value.clone())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Media {
                media_type,
                media_url,
            } => serde_json::json!({
                "media_type": media_type,
                "media_url": media_url.as_deref().unwrap_or(""),
            }),
            Self::MediaError {
                media_type,
                media_url,
                crm_error,
            } => serde_json::json!({
                "media_type": media_type,
                "media_url": media_url.as_deref().unwrap_or(""),
                "crm_error": crm_error,
            }),
            Self::Status { status } => serde_json::json!({ "status": status }),
            Self::Opaque(value) => value.clone(),
        }
    }

    /// The CRM-reported status string, if this blob carries one.
    pub fn crm_status(&self) -> Option<&str> {
        match self {
            Self::Status { status } => Some(status),
            _ => None,
        }
    }
}

pub mod schema {
    diesel::table! {
        leads (id) {
            id -> Uuid,
            user_id -> Uuid,
            name -> Text,
            email -> Nullable<Text>,
            phone -> Nullable<Text>,
            status -> Text,
            source -> Text,
            objekt_id -> Nullable<Text>,
            crm_contact_id -> Nullable<Text>,
            crm_location_id -> Nullable<Text>,
            makler_notified_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        messages (id) {
            id -> Uuid,
            lead_id -> Uuid,
            user_id -> Uuid,
            direction -> Text,
            content -> Text,
            delivery_status -> Text,
            crm_message_id -> Nullable<Text>,
            crm_data -> Jsonb,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        crm_connections (id) {
            id -> Uuid,
            user_id -> Uuid,
            location_id -> Text,
            access_token -> Text,
            is_active -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::allow_tables_to_appear_in_same_query!(leads, messages, crm_connections);
}
