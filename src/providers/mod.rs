mod hypixel;
pub mod request;

use crate::core::settings::Settings;
use async_trait::async_trait;
use request::RequestError;
use serde_json::Value;

pub use hypixel::HypixelApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Player,
    Status,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Player => "player",
            Endpoint::Status => "status",
        }
    }

    pub fn url(&self, base_url: &str, uuid: &str) -> String {
        format!("{}/{}?uuid={}", base_url.trim_end_matches('/'), self.path(), uuid)
    }
}

/// The remote player API. Settings are passed on every call so that a
/// changed key, base URL, timeout or retry limit applies to the next request.
#[async_trait]
pub trait PlayerApi: Send + Sync {
    async fn fetch(
        &self,
        endpoint: Endpoint,
        uuid: &str,
        settings: &Settings,
    ) -> Result<Value, RequestError>;
}
