//! HTTP adapter for the component-analysis service.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::capabilities::AnalysisGateway;
use crate::error::{GatewayError, GatewayResult};
use crate::http::{check_response, join_url};
use crate::types::{ComponentRecord, VulnerabilityRecord};

/// Analysis service API client.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl AnalysisClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }

    async fn get_items<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        operation: &str,
    ) -> GatewayResult<Vec<T>> {
        let url = join_url(&self.base_url, path);
        debug!(url = %url, "Analysis service request");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .query(query)
            .send()
            .await?;
        let response = check_response(response, operation).await?;

        let body: ItemsResponse<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(body.items)
    }
}

#[async_trait]
impl AnalysisGateway for AnalysisClient {
    async fn find_component(&self, external_id: &str) -> GatewayResult<Option<ComponentRecord>> {
        let items: Vec<ComponentRecord> = match self
            .get_items("/api/components", &[("q", external_id)], "find component")
            .await
        {
            Ok(items) => items,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        // Prefer an exact identifier match over the first fuzzy hit.
        let exact = items
            .iter()
            .position(|component| component.external_id == external_id);
        Ok(match exact {
            Some(index) => items.into_iter().nth(index),
            None => items.into_iter().next(),
        })
    }

    async fn find_vulnerabilities(
        &self,
        component_id: &str,
    ) -> GatewayResult<Vec<VulnerabilityRecord>> {
        self.get_items(
            &format!("/api/components/{component_id}/vulnerabilities"),
            &[],
            "find vulnerabilities",
        )
        .await
    }
}
