//! Thin HTTP wrapper over the GoHighLevel REST API. Every call carries the
//! per-location bearer token resolved by the caller; nothing is cached
//! between calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://services.leadconnectorhq.com";
pub const DEFAULT_API_VERSION: &str = "2021-07-28";

pub const CHANNEL_WHATSAPP: &str = "WhatsApp";

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },
    #[error("CRM network error: {0}")]
    Network(String),
}

#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCrmContact {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "locationId")]
    pub location_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrmContactResponse {
    pub contact: CrmContactBody,
}

#[derive(Debug, Deserialize)]
pub struct CrmContactBody {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundCrmMessage {
    #[serde(rename = "type")]
    pub channel: String,
    #[serde(rename = "contactId")]
    pub contact_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrmMessageResponse {
    #[serde(rename = "conversationId", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
}

impl CrmClient {
    pub fn new(base_url: &str, api_version: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
        }
    }

    pub async fn create_contact(
        &self,
        access_token: &str,
        contact: &NewCrmContact,
    ) -> Result<CrmContactResponse, CrmError> {
        let response = self
            .http
            .post(format!("{}/contacts/", self.base_url))
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Version", &self.api_version)
            .json(contact)
            .send()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::RequestFailed { status, body });
        }

        response
            .json::<CrmContactResponse>()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))
    }

    pub async fn send_message(
        &self,
        access_token: &str,
        message: &OutboundCrmMessage,
    ) -> Result<CrmMessageResponse, CrmError> {
        let response = self
            .http
            .post(format!("{}/conversations/messages", self.base_url))
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Version", &self.api_version)
            .json(message)
            .send()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::RequestFailed { status, body });
        }

        response
            .json::<CrmMessageResponse>()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contact() -> NewCrmContact {
        NewCrmContact {
            first_name: "Anna".to_string(),
            last_name: Some("Schmidt".to_string()),
            email: None,
            phone: Some("+4915112345678".to_string()),
            location_id: "loc_1".to_string(),
            source: Some("app".to_string()),
        }
    }

    #[test]
    fn test_contact_skips_empty_optionals() {
        let json = serde_json::to_value(sample_contact()).unwrap();
        assert_eq!(json["firstName"], "Anna");
        assert_eq!(json["lastName"], "Schmidt");
        assert_eq!(json["phone"], "+4915112345678");
        assert!(json.get("email").is_none());
    }

    #[test]
    fn test_message_skips_empty_attachments() {
        let message = OutboundCrmMessage {
            channel: CHANNEL_WHATSAPP.to_string(),
            contact_id: "c1".to_string(),
            message: "🎤 Sprachnachricht gesendet".to_string(),
            attachments: vec![],
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "WhatsApp");
        assert!(json.get("attachments").is_none());

        let with_url = OutboundCrmMessage {
            attachments: vec!["https://drive.example/x.jpg".to_string()],
            message: String::new(),
            ..message
        };
        let json = serde_json::to_value(&with_url).unwrap();
        assert_eq!(json["attachments"][0], "https://drive.example/x.jpg");
    }

    #[tokio::test]
    async fn test_create_contact_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/contacts/")
            .match_header("authorization", "Bearer token-1")
            .match_header("version", DEFAULT_API_VERSION)
            .with_status(201)
            .with_body(r#"{"contact":{"id":"ghl_c_42"}}"#)
            .create_async()
            .await;

        let client = CrmClient::new(&server.url(), DEFAULT_API_VERSION);
        let created = client
            .create_contact("token-1", &sample_contact())
            .await
            .unwrap();

        assert_eq!(created.contact.id, "ghl_c_42");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_contact_failure_captures_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/contacts/")
            .with_status(422)
            .with_body(r#"{"message":"phone invalid"}"#)
            .create_async()
            .await;

        let client = CrmClient::new(&server.url(), DEFAULT_API_VERSION);
        let err = client
            .create_contact("token-1", &sample_contact())
            .await
            .unwrap_err();

        match err {
            CrmError::RequestFailed { status, body } => {
                assert_eq!(status, 422);
                assert!(body.contains("phone invalid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/conversations/messages")
            .match_header("authorization", "Bearer token-1")
            .with_status(201)
            .with_body(r#"{"conversationId":"conv_1","messageId":"msg_9"}"#)
            .create_async()
            .await;

        let client = CrmClient::new(&server.url(), DEFAULT_API_VERSION);
        let message = OutboundCrmMessage {
            channel: CHANNEL_WHATSAPP.to_string(),
            contact_id: "ghl_c_42".to_string(),
            message: String::new(),
            attachments: vec!["https://drive.example/x.jpg".to_string()],
        };
        let sent = client.send_message("token-1", &message).await.unwrap();

        assert_eq!(sent.message_id.as_deref(), Some("msg_9"));
        assert_eq!(sent.conversation_id.as_deref(), Some("conv_1"));
    }

    #[tokio::test]
    async fn test_send_message_tolerates_missing_ids() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/conversations/messages")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = CrmClient::new(&server.url(), DEFAULT_API_VERSION);
        let message = OutboundCrmMessage {
            channel: CHANNEL_WHATSAPP.to_string(),
            contact_id: "ghl_c_42".to_string(),
            message: "hi".to_string(),
            attachments: vec![],
        };
        let sent = client.send_message("token-1", &message).await.unwrap();
        assert!(sent.message_id.is_none());
    }
}
