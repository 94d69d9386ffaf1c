use crate::core::settings::Settings;
use crate::providers::request::{RequestClient, RequestError};
use crate::providers::{Endpoint, PlayerApi};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

pub struct HypixelApi {
    client: Client,
}

impl HypixelApi {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("player-poller/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self { client }
    }
}

impl Default for HypixelApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlayerApi for HypixelApi {
    async fn fetch(
        &self,
        endpoint: Endpoint,
        uuid: &str,
        settings: &Settings,
    ) -> Result<Value, RequestError> {
        let url = endpoint.url(&settings.api.base_url, uuid);
        let requests = RequestClient::new(self.client.clone(), settings.api.key.clone());

        let response = requests
            .fetch(
                &url,
                settings.polling.timeout(),
                settings.polling.retry_limit,
            )
            .await?;

        tracing::debug!(
            endpoint = endpoint.path(),
            uuid,
            status = response.status.as_u16(),
            "Fetched endpoint"
        );
        Ok(response.body)
    }
}
