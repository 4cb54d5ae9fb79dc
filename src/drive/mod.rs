//! Blob relay against the S3-compatible drive. Uploads return the durable
//! public URL; callers decide whether a failed upload is fatal (for media
//! dispatch it is not).

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use log::info;
use thiserror::Error;

use crate::config::DriveConfig;
use crate::shared::state::AppState;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("object storage is not configured")]
    NotConfigured,
    #[error("upload failed: {0}")]
    Upload(String),
}

pub async fn init_drive(config: &DriveConfig) -> S3Client {
    let base_config = aws_config::defaults(BehaviorVersion::latest())
        .endpoint_url(&config.server)
        .region(aws_config::Region::new("auto"))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "static",
        ))
        .load()
        .await;

    let s3_config = S3ConfigBuilder::from(&base_config)
        .force_path_style(true)
        .build();

    S3Client::from_conf(s3_config)
}

pub async fn upload_media(
    state: &AppState,
    key: &str,
    data: Bytes,
    content_type: &str,
) -> Result<String, DriveError> {
    let client = state.drive.as_ref().ok_or(DriveError::NotConfigured)?;

    client
        .put_object()
        .bucket(&state.bucket_name)
        .key(key)
        .body(ByteStream::from(data.to_vec()))
        .content_type(content_type)
        .send()
        .await
        .map_err(|e| DriveError::Upload(e.to_string()))?;

    info!("Uploaded media {}/{}", state.bucket_name, key);
    Ok(public_url(&state.config.drive.server, &state.bucket_name, key))
}

pub fn public_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url_trims_trailing_slash() {
        assert_eq!(
            public_url("http://localhost:9000/", "lead-media", "leads/a/1_x.jpg"),
            "http://localhost:9000/lead-media/leads/a/1_x.jpg"
        );
        assert_eq!(
            public_url("https://drive.example", "b", "k"),
            "https://drive.example/b/k"
        );
    }
}
