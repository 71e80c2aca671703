use std::path::Path;

use serde::Deserialize;

use super::AppCore;

const DEFAULT_API_BASE_URL: &str = "https://api.bazar.app";
const DEFAULT_SOCKET_URL: &str = "wss://api.bazar.app/socket";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) disable_network: Option<bool>,
    pub(super) api_base_url: Option<String>,
    pub(super) socket_url: Option<String>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("bazar_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    serde_json::from_slice::<AppConfig>(&bytes).unwrap_or_default()
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("BAZAR_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(super) fn api_base_url(&self) -> String {
        self.config
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub(super) fn socket_url(&self) -> String {
        self.config
            .socket_url
            .clone()
            .unwrap_or_else(|| DEFAULT_SOCKET_URL.to_string())
    }
}
