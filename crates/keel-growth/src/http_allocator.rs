//! HTTP transport for volume allocation.
//!
//! Storage nodes expose `POST /admin/assign_volume`, taking the request as a
//! form and answering with a JSON object whose `error` field is empty on
//! success.

use std::time::Duration;

use async_trait::async_trait;
use keel_core::AllocatorConfig;
use keel_topology::DataNodeInfo;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::allocator::{AllocateError, AllocateVolumeRequest, VolumeAllocator};

/// Path of the allocation endpoint on a storage node.
pub const ASSIGN_VOLUME_PATH: &str = "/admin/assign_volume";

#[derive(Debug, Default, Deserialize)]
struct AllocateVolumeResponse {
    #[serde(default)]
    error: String,
}

/// Allocates volumes by calling storage nodes over HTTP.
#[derive(Debug, Clone)]
pub struct HttpVolumeAllocator {
    client: Client,
    scheme: String,
}

impl HttpVolumeAllocator {
    /// Creates an allocator with the configured timeout and scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &AllocatorConfig) -> keel_core::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| keel_core::Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, scheme: config.scheme.clone() })
    }

    fn endpoint(&self, node: &DataNodeInfo) -> String {
        format!("{}://{}{}", self.scheme, node.url, ASSIGN_VOLUME_PATH)
    }
}

#[async_trait]
impl VolumeAllocator for HttpVolumeAllocator {
    async fn allocate_volume(
        &self,
        node: &DataNodeInfo,
        request: &AllocateVolumeRequest,
    ) -> Result<(), AllocateError> {
        let url = self.endpoint(node);
        debug!(%url, volume_id = %request.volume, "Sending allocate request");

        let response = self.client.post(&url).form(request).send().await.map_err(|e| {
            AllocateError::Transport { node: node.url.clone(), reason: e.to_string() }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AllocateError::Status { node: node.url.clone(), status: status.as_u16() });
        }

        let body: AllocateVolumeResponse = response.json().await.map_err(|e| {
            AllocateError::Transport { node: node.url.clone(), reason: e.to_string() }
        })?;
        if !body.error.is_empty() {
            return Err(AllocateError::Rejected { node: node.url.clone(), reason: body.error });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keel_core::{Ttl, VolumeId, VolumeInfo};
    use keel_topology::Topology;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn node_for(server: &MockServer) -> DataNodeInfo {
        let url = server.uri().trim_start_matches("http://").to_string();
        let topology = Topology::new();
        let dc = topology.add_data_center("dc1").unwrap();
        let rack = topology.add_rack(dc, "r1").unwrap();
        topology.add_data_node(rack, &url, "", 3).unwrap();
        topology.data_node(&url).unwrap()
    }

    fn request() -> AllocateVolumeRequest {
        let info = VolumeInfo::new(
            VolumeId::new(7),
            "pics",
            "001".parse().unwrap(),
            "1h".parse::<Ttl>().unwrap(),
        );
        AllocateVolumeRequest::new(&info, 0)
    }

    fn allocator() -> HttpVolumeAllocator {
        let config = AllocatorConfig { timeout_ms: 2_000, ..Default::default() };
        HttpVolumeAllocator::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_allocate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ASSIGN_VOLUME_PATH))
            .and(body_string_contains("volume=7"))
            .and(body_string_contains("collection=pics"))
            .and(body_string_contains("replication=001"))
            .and(body_string_contains("ttl=1h"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "error": "" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = allocator().allocate_volume(&node_for(&server), &request()).await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn test_allocate_rejected_by_node() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ASSIGN_VOLUME_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "error": "no space left" })),
            )
            .mount(&server)
            .await;

        let err = allocator().allocate_volume(&node_for(&server), &request()).await.unwrap_err();
        assert!(matches!(
            err,
            AllocateError::Rejected { ref reason, .. } if reason == "no space left"
        ));
    }

    #[tokio::test]
    async fn test_allocate_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ASSIGN_VOLUME_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = allocator().allocate_volume(&node_for(&server), &request()).await.unwrap_err();
        assert!(matches!(err, AllocateError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_allocate_unreadable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ASSIGN_VOLUME_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = allocator().allocate_volume(&node_for(&server), &request()).await.unwrap_err();
        assert!(matches!(err, AllocateError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_allocate_unreachable() {
        let server = MockServer::start().await;
        let node = node_for(&server);
        drop(server);

        let err = allocator().allocate_volume(&node, &request()).await.unwrap_err();
        assert!(matches!(err, AllocateError::Transport { .. }));
    }
}
