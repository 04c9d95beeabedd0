use crate::config::AppConfig;
use reqwest::Client;

pub fn build_client(config: &AppConfig) -> Client {
    Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(config.http_connect_timeout)
        .user_agent(concat!("lbc-publisher/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}
