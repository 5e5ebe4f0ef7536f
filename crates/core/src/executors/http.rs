//! A `ToolExecutor` backed by a REST tool service.
//!
//! The service exposes `GET {base}/tools?apps=a,b` returning `{"tools": [...]}`
//! and `POST {base}/tools/{name}/execute` taking the argument object and
//! returning the raw tool result.

use crate::tools::{ToolArguments, ToolDeclaration, ToolExecutor};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Deserialize)]
struct ToolListResponse {
    #[serde(default)]
    tools: Vec<ToolDeclaration>,
}

/// An implementation of `ToolExecutor` for an HTTP tool service.
pub struct HttpToolExecutor {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpToolExecutor {
    /// Creates a new executor.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root of the tool service, e.g. `http://localhost:9000/api`.
    /// * `api_key` - Optional bearer token sent with every request.
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    fn tools_url(&self) -> String {
        format!("{}/tools", self.base_url)
    }

    fn execute_url(&self, name: &str) -> String {
        format!("{}/tools/{}/execute", self.base_url, name)
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn get_tools(&self, apps: Option<Vec<String>>) -> Result<Vec<ToolDeclaration>> {
        let mut request = self.client.get(self.tools_url());
        if let Some(apps) = apps.filter(|apps| !apps.is_empty()) {
            request = request.query(&[("apps", apps.join(","))]);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .context("Failed to reach tool service")?
            .error_for_status()
            .context("Tool service rejected the tool listing request")?;
        let listing: ToolListResponse = response
            .json()
            .await
            .context("Tool service returned an unexpected tool listing")?;

        debug!(count = listing.tools.len(), "Fetched tool declarations");
        Ok(listing.tools)
    }

    async fn execute(&self, name: &str, params: ToolArguments) -> Result<Value> {
        let response = self
            .authorize(self.client.post(self.execute_url(name)).json(&params))
            .send()
            .await
            .context("Failed to reach tool service")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Tool '{}' failed with status {}: {}",
                name,
                status,
                body
            ));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_normalized() {
        let executor = HttpToolExecutor::new("http://localhost:9000/api/", None);
        assert_eq!(executor.tools_url(), "http://localhost:9000/api/tools");
        assert_eq!(
            executor.execute_url("GITHUB_STAR_REPO"),
            "http://localhost:9000/api/tools/GITHUB_STAR_REPO/execute"
        );
    }

    #[test]
    fn test_tool_listing_shape() {
        let listing: ToolListResponse = serde_json::from_str(
            r#"{"tools": [{"name": "a", "description": "first", "parameters": {"type": "object"}}, {"name": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(listing.tools.len(), 2);
        assert_eq!(listing.tools[0].description.as_deref(), Some("first"));
        assert!(listing.tools[1].parameters.is_none());

        let empty: ToolListResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.tools.is_empty());
    }
}
