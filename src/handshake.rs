//! Connection parameter construction.
//!
//! A [`Handshake`] turns the configured (address, hub) pair into the socket
//! URL and upgrade headers. It runs once per `start()`.
//!
//! # SignalR negotiate
//!
//! [`NegotiateHandshake`] speaks the classic SignalR client protocol 1.5:
//!
//! ```text
//! GET {address}/negotiate?clientProtocol=1.5&connectionData=[{"name":"hub"}]
//!   -> {"ConnectionToken": "...", ...}
//!
//! {ws-address}/connect?transport=webSockets&clientProtocol=1.5
//!                     &connectionToken=...&connectionData=...
//! ```
//!
//! Cookies set by the negotiate response are replayed on the upgrade request
//! (load balancers pin the session with them).

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::Url;
use serde::Deserialize;

use crate::transport::ws::http_to_ws_scheme;
use crate::transport::ConnectParams;

/// Client protocol version sent on every request.
pub const CLIENT_PROTOCOL: &str = "1.5";

/// User agent for the negotiate and upgrade requests.
const DEFAULT_USER_AGENT: &str = concat!("signalr-async/", env!("CARGO_PKG_VERSION"));

/// Builds [`ConnectParams`] for a hub session.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Produce connection parameters for `hub` at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be built (bad address,
    /// failed negotiation).
    async fn build(&self, address: &str, hub: &str) -> Result<ConnectParams>;
}

/// Connects straight to `address`, only converting http(s) to ws(s).
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectHandshake;

#[async_trait]
impl Handshake for DirectHandshake {
    async fn build(&self, address: &str, _hub: &str) -> Result<ConnectParams> {
        Ok(ConnectParams::new(http_to_ws_scheme(address)))
    }
}

/// Negotiate response fields the client uses.
#[derive(Debug, Deserialize)]
struct NegotiateResponse {
    #[serde(rename = "ConnectionToken")]
    connection_token: String,
    #[serde(rename = "ProtocolVersion", default)]
    protocol_version: Option<String>,
}

/// SignalR negotiate request followed by the `/connect` WebSocket URL.
#[derive(Debug, Clone)]
pub struct NegotiateHandshake {
    http: reqwest::Client,
    user_agent: String,
}

impl Default for NegotiateHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiateHandshake {
    /// Handshake with a fresh HTTP client and the default user agent.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Override the user agent sent on both requests.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// `connectionData` query value naming the single hub of the session.
fn connection_data(hub: &str) -> String {
    serde_json::json!([{ "name": hub }]).to_string()
}

/// Append `segment` to the path of `address`.
fn endpoint(address: &str, segment: &str) -> Result<Url> {
    let base = format!("{}/{segment}", address.trim_end_matches('/'));
    Url::parse(&base).with_context(|| format!("invalid hub address: {address}"))
}

#[async_trait]
impl Handshake for NegotiateHandshake {
    async fn build(&self, address: &str, hub: &str) -> Result<ConnectParams> {
        let data = connection_data(hub);

        let mut negotiate_url = endpoint(address, "negotiate")?;
        negotiate_url
            .query_pairs_mut()
            .append_pair("clientProtocol", CLIENT_PROTOCOL)
            .append_pair("connectionData", &data);

        log::info!("[Negotiate] Requesting {negotiate_url}");
        let response = self
            .http
            .get(negotiate_url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .context("negotiate request failed")?
            .error_for_status()
            .context("negotiate rejected")?;

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| !pair.is_empty())
            .collect();

        let negotiated: NegotiateResponse = response
            .json()
            .await
            .context("negotiate response is not valid JSON")?;
        log::debug!(
            "[Negotiate] Server protocol {:?}, {} cookie(s)",
            negotiated.protocol_version,
            cookies.len()
        );

        let mut socket_url = endpoint(&http_to_ws_scheme(address), "connect")?;
        socket_url
            .query_pairs_mut()
            .append_pair("transport", "webSockets")
            .append_pair("clientProtocol", CLIENT_PROTOCOL)
            .append_pair("connectionToken", &negotiated.connection_token)
            .append_pair("connectionData", &data);

        let mut params =
            ConnectParams::new(socket_url.to_string()).header(USER_AGENT.as_str(), &self.user_agent);
        if !cookies.is_empty() {
            params = params.header(COOKIE.as_str(), cookies.join("; "));
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_data_names_hub() {
        assert_eq!(connection_data("c2"), r#"[{"name":"c2"}]"#);
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let url = endpoint("https://socket.example.com/signalr/", "negotiate").unwrap();
        assert_eq!(url.as_str(), "https://socket.example.com/signalr/negotiate");
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        assert!(endpoint("not a url", "negotiate").is_err());
    }

    #[tokio::test]
    async fn test_direct_handshake_converts_scheme() {
        let params = DirectHandshake
            .build("https://socket.example.com/hub", "c2")
            .await
            .unwrap();
        assert_eq!(params, ConnectParams::new("wss://socket.example.com/hub"));
    }
}
