use crate::config::AppConfig;
use crate::crm::client::CrmClient;
use crate::shared::utils::DbPool;
use aws_sdk_s3::Client as S3Client;

#[derive(Clone)]
pub struct AppState {
    pub conn: DbPool,
    pub drive: Option<S3Client>,
    pub bucket_name: String,
    pub crm: CrmClient,
    pub config: AppConfig,
}
