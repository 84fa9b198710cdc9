//! REST provider adapter.
//!
//! Talks to any service exposing `POST /resources`, `PUT /resources/{id}` and
//! `DELETE /resources/{id}`. Requests are sent once; transient failures are
//! classified but never retried here.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::ProviderError;
use crate::graph::{PropertyBag, ResourceKind, ResourceNode};

use super::{Provider, ProviderHandle, ProviderResult};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fallback wait reported when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// HTTP provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL; resource paths are appended as segments.
    base_url: Url,
    /// Bearer token, if any.
    token: Option<String>,
}

/// Request body for create and update.
#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    id: &'a str,
    kind: ResourceKind,
    properties: &'a PropertyBag,
}

/// Response body for create and update.
#[derive(Debug, Deserialize)]
struct ResourceResponse {
    id: String,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
}

impl HttpProvider {
    /// Creates a new HTTP provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute URL or the HTTP
    /// client cannot be created.
    pub fn new(base_url: &str, token: Option<String>, timeout_secs: u64) -> ProviderResult<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ProviderError::rejected(format!("Invalid provider endpoint: {base_url}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Gets the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Builds `<base>/resources[/<id>]`, percent-encoding the id as one segment.
    fn resource_url(&self, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("resources");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    /// Sends a request and maps non-success statuses to errors.
    async fn send(&self, request: RequestBuilder, resource: &str) -> ProviderResult<Response> {
        let request = match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("Provider responded {status} for {resource}");

        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                Err(ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                })
            }
            401 | 403 => Err(ProviderError::AuthenticationFailed {
                message: response.text().await.unwrap_or_default(),
            }),
            404 => Err(ProviderError::NotFound {
                id: resource.to_string(),
            }),
            _ if !status.is_success() => Err(ProviderError::ApiRequestFailed {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
            _ => Ok(response),
        }
    }

    /// Parses a resource response into a handle.
    async fn handle_from(response: Response) -> ProviderResult<ProviderHandle> {
        let body: ResourceResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse response: {e}"),
                })?;

        Ok(ProviderHandle {
            id: body.id,
            outputs: body.outputs,
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, node: &ResourceNode) -> ProviderResult<ProviderHandle> {
        let url = self.resource_url(None);
        debug!("POST {url} for {node}");

        let body = ResourceRequest {
            id: &node.id,
            kind: node.kind,
            properties: &node.properties,
        };
        let response = self
            .send(self.client.post(url).json(&body), &node.id)
            .await?;
        Self::handle_from(response).await
    }

    async fn update(
        &self,
        node: &ResourceNode,
        handle: &ProviderHandle,
    ) -> ProviderResult<ProviderHandle> {
        let url = self.resource_url(Some(&handle.id));
        debug!("PUT {url} for {node}");

        let body = ResourceRequest {
            id: &node.id,
            kind: node.kind,
            properties: &node.properties,
        };
        let response = self.send(self.client.put(url).json(&body), &handle.id).await?;
        Self::handle_from(response).await
    }

    async fn delete(&self, node: &ResourceNode, handle: &ProviderHandle) -> ProviderResult<()> {
        let url = self.resource_url(Some(&handle.id));
        debug!("DELETE {url} for {node}");

        self.send(self.client.delete(url), &handle.id).await?;
        Ok(())
    }

    fn provider_type(&self) -> &'static str {
        "http"
    }
}
