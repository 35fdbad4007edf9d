//! Read-only HTTP endpoints of the route-search server.

use std::collections::HashMap;

use reqwest::Client;
use routewatch_core_types::{EdgeId, LatLon, NodeId, Polyline};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkErrorKind};

/// Metadata of the loaded street graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphMeta {
    pub place: String,
    pub radius_m: f64,
    pub nodes_total: u64,
    pub edges_total: u64,
    /// `[min_lat, min_lon, max_lat, max_lon]`
    pub bbox: [f64; 4],
    pub graph_cache_version: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearestNode {
    pub node_id: NodeId,
    pub lat: f64,
    pub lon: f64,
}

impl NearestNode {
    pub fn position(&self) -> LatLon {
        LatLon(self.lat, self.lon)
    }
}

#[derive(Deserialize)]
struct EdgeSample {
    edges: HashMap<EdgeId, Polyline>,
}

#[derive(Clone, Debug)]
pub struct GraphApi {
    client: Client,
    base: Url,
}

impl GraphApi {
    pub fn new(config: &LinkConfig) -> Result<Self, LinkError> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(LinkError::from)?;
        Ok(Self {
            client,
            base: config.api_base()?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn graph_meta(&self) -> Result<GraphMeta, LinkError> {
        self.get_json("/api/graph-meta", &[]).await
    }

    /// Every `decimate`-th edge of the graph with its geometry.
    pub async fn edges_sample(&self, decimate: u32) -> Result<HashMap<EdgeId, Polyline>, LinkError> {
        let sample: EdgeSample = self
            .get_json("/api/edges-sample", &[("decimate", decimate.max(1).to_string())])
            .await?;
        Ok(sample.edges)
    }

    /// Graph node closest to a coordinate.
    pub async fn find_nearest(&self, lat: f64, lon: f64) -> Result<NearestNode, LinkError> {
        self.get_json(
            "/api/find-nearest",
            &[("lat", lat.to_string()), ("lon", lon.to_string())],
        )
        .await
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, LinkError> {
        let raw = format!("{}{}", self.base.as_str().trim_end_matches('/'), path);
        let mut url = Url::parse(&raw).map_err(|err| {
            LinkError::new(LinkErrorKind::Config).with_hint(format!("bad endpoint {path}: {err}"))
        })?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }
        Ok(url)
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, LinkError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path, query)?;
        debug!(target: "graph-api", %url, "GET");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LinkError::new(LinkErrorKind::Http)
                .with_hint(format!("{path} returned {status}: {}", detail.trim()))
                .retriable(status.is_server_error()));
        }
        Ok(response.json::<T>().await?)
    }
}
