//! Client for the chat-service HTTP API.
//!
//! Hands the resolver already-paginated conversation and message payloads;
//! all filtering and normalization happens upstream in `resolve::claude`.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

pub struct ClaudeClient {
    base_url: String,
    org_id: String,
    session_cookie: String,
    http: Client,
}

impl ClaudeClient {
    pub fn new(base_url: &str, org_id: &str, session_cookie: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            org_id: org_id.to_string(),
            session_cookie: session_cookie.to_string(),
            http,
        })
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .header("Cookie", format!("sessionKey={}", self.session_cookie))
            .send()
            .with_context(|| format!("request to {url} failed"))?;

        if !response.status().is_success() {
            return Err(anyhow!("{url} returned {}", response.status()));
        }

        response.json().context("response was not valid JSON")
    }

    /// List conversation summaries (`uuid`, `name`, `updated_at`, ...).
    pub fn list_conversations(&self) -> Result<Vec<Value>> {
        let url = format!(
            "{}/organizations/{}/chat_conversations",
            self.base_url, self.org_id
        );
        match self.get_json(&url)? {
            Value::Array(items) => Ok(items),
            other => Err(anyhow!(
                "unexpected conversation list shape: {}",
                match other {
                    Value::Object(_) => "object",
                    _ => "scalar",
                }
            )),
        }
    }

    /// Fetch one full conversation including its `chat_messages` array.
    pub fn fetch_conversation(&self, uuid: &str) -> Result<Value> {
        let url = format!(
            "{}/organizations/{}/chat_conversations/{}?tree=True&rendering_mode=messages&render_all_tools=true",
            self.base_url, self.org_id, uuid
        );
        self.get_json(&url)
    }
}
