use std::time::Duration;

use libexo_core::error::ExoError;
use libexo_utils::config::Config;

use crate::provider::JsonRpcClient;

#[derive(Debug, Clone, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct JsonRpcConfig {
    pub url: String,

    /// Interval between two receipt lookups while waiting for confirmation.
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
}

fn default_poll_interval_millis() -> u64 {
    2_000
}

impl Default for JsonRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            poll_interval_millis: default_poll_interval_millis(),
        }
    }
}

impl Config for JsonRpcConfig {
    fn section_name() -> &'static str {
        "jsonrpc"
    }
}

impl JsonRpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn chain_client(&self) -> Result<JsonRpcClient, ExoError> {
        JsonRpcClient::new(
            &self.url,
            Duration::from_millis(self.poll_interval_millis),
        )
    }
}
