use anyhow::Context;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub drive: DriveConfig,
    pub crm: CrmConfig,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct DriveConfig {
    pub server: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone)]
pub struct CrmConfig {
    pub base_url: String,
    pub api_version: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let server = ServerConfig {
            host: env_or("SERVER_HOST", "127.0.0.1"),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        };

        let drive = DriveConfig {
            server: {
                let server = env_or("DRIVE_SERVER", "http://localhost:9000");
                if !server.starts_with("http://") && !server.starts_with("https://") {
                    format!("http://{}", server)
                } else {
                    server
                }
            },
            bucket: env_or("DRIVE_BUCKET", "lead-media"),
            access_key: env_or("DRIVE_ACCESSKEY", "minioadmin"),
            secret_key: env_or("DRIVE_SECRET", "minioadmin"),
        };

        let crm = CrmConfig {
            base_url: env_or("CRM_BASE_URL", crate::crm::client::DEFAULT_BASE_URL),
            api_version: env_or("CRM_API_VERSION", crate::crm::client::DEFAULT_API_VERSION),
        };

        Ok(AppConfig {
            server,
            database_url,
            drive,
            crm,
        })
    }
}
