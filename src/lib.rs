pub mod config;
pub mod contacts;
pub mod crm;
pub mod drive;
pub mod maintenance;
pub mod messages;
pub mod shared;
pub mod webhooks;
