pub mod auth;
pub mod client;
pub mod normalize;
pub mod webhook;

pub use {auth::Authenticator, client::AsaasClient, webhook::asaas_webhook_handler};
