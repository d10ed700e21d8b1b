//! HTTP client for the testbed backend.
//!
//! Every call is a single attempt. Failures come back as an [ApiError] whose display is the
//! message to show; nothing here retries.

use async_trait::async_trait;
use futures::future;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::{
    cfg::Config,
    error::ApiError,
    types::{
        AllParams, ChainKey, ChainParam, ChangeParamResponse, ChartName, LogsTail,
        MessageResponse,
    },
};

/// The operations the stores need from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn start_system(&self) -> Result<MessageResponse, ApiError>;

    async fn stop_system(&self) -> Result<MessageResponse, ApiError>;

    async fn change_param(
        &self,
        chain: ChainKey,
        param: ChainParam,
        value: &str,
    ) -> Result<ChangeParamResponse, ApiError>;

    async fn get_all_params(&self) -> Result<AllParams, ApiError>;

    /// The raw `/tx_details` record. Callers pick out the fields they want.
    async fn get_tx_details(&self, tx_hash: &str) -> Result<Map<String, Value>, ApiError>;

    async fn draw_chart(&self, chart: ChartName, params: &Value) -> Result<Value, ApiError>;

    async fn logs_tail(&self, limit: usize, token: Option<&str>) -> Result<Vec<String>, ApiError>;
}

/// Parameters for [Backend::draw_chart], either shared by every chart or given per chart.
#[derive(Clone, Debug)]
pub enum ChartParams {
    Shared(Value),
    PerChart(Map<String, Value>),
}

impl ChartParams {
    /// A JSON object keyed by chart name is treated as per-chart parameters; charts it does not
    /// mention fall back to the whole object.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) if ChartName::ALL.iter().any(|c| map.contains_key(c.as_str())) => {
                ChartParams::PerChart(map)
            }
            other => ChartParams::Shared(other),
        }
    }

    pub fn for_chart(&self, chart: ChartName) -> Value {
        match self {
            ChartParams::Shared(v) => v.clone(),
            ChartParams::PerChart(map) => map
                .get(chart.as_str())
                .cloned()
                .unwrap_or_else(|| Value::Object(map.clone())),
        }
    }
}

/// Ask the backend to draw all four charts at once. Fails if any of them fails.
pub async fn draw_all_charts<B: Backend + ?Sized>(
    backend: &B,
    params: &ChartParams,
) -> Result<Vec<(ChartName, Value)>, ApiError> {
    let per_chart: Vec<(ChartName, Value)> = ChartName::ALL
        .into_iter()
        .map(|c| (c, params.for_chart(c)))
        .collect();
    let results = future::try_join_all(
        per_chart
            .iter()
            .map(|(chart, p)| async move { Ok::<_, ApiError>((*chart, backend.draw_chart(*chart, p).await?)) }),
    )
    .await?;
    Ok(results)
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(config: &Config) -> anyhow::Result<ApiClient> {
        let client = Client::builder()
            .user_agent(concat!("ccpanel/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(ApiClient {
            client,
            base: config.base_url()?,
        })
    }

    /// Resolve `path` against the base URL, keeping any path prefix the base already has.
    pub fn url(&self, path: &str) -> Url {
        endpoint(&self.base, path)
    }

    async fn post_empty<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.url(path))
            .query(query)
            .send()
            .await
            .inspect_err(|e| warn!(%path, "request failed: {e}"))?;
        parse_json_or_default(path, response).await
    }
}

/// Join a path onto a base URL. Unlike [Url::join], a base without a trailing slash keeps its
/// last segment.
pub fn endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
    url
}

async fn error_from(response: Response) -> ApiError {
    let status = response.status();
    match response.bytes().await {
        Ok(body) => ApiError::from_response_body(status, &body),
        Err(_) => ApiError::Status(status),
    }
}

/// Decode a JSON body, treating an empty body as `T::default()`.
async fn parse_json_or_default<T: DeserializeOwned + Default>(
    path: &str,
    response: Response,
) -> Result<T, ApiError> {
    if !response.status().is_success() {
        let err = error_from(response).await;
        warn!(%path, "backend error: {err}");
        return Err(err);
    }
    let body = response.bytes().await?;
    debug!(%path, len = body.len(), "response");
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl Backend for ApiClient {
    async fn start_system(&self) -> Result<MessageResponse, ApiError> {
        self.post_empty("start", &[]).await
    }

    async fn stop_system(&self) -> Result<MessageResponse, ApiError> {
        self.post_empty("stop", &[]).await
    }

    async fn change_param(
        &self,
        chain: ChainKey,
        param: ChainParam,
        value: &str,
    ) -> Result<ChangeParamResponse, ApiError> {
        self.post_empty(
            "change_param",
            &[
                ("chain", chain.as_str()),
                ("param", param.as_str()),
                ("value", value),
            ],
        )
        .await
    }

    async fn get_all_params(&self) -> Result<AllParams, ApiError> {
        let response = self.client.get(self.url("get_all_params")).send().await?;
        parse_json_or_default("get_all_params", response).await
    }

    async fn get_tx_details(&self, tx_hash: &str) -> Result<Map<String, Value>, ApiError> {
        let response = self
            .client
            .get(self.url("tx_details"))
            .query(&[("tx_hash", tx_hash)])
            .send()
            .await?;
        parse_json_or_default("tx_details", response).await
    }

    async fn draw_chart(&self, chart: ChartName, params: &Value) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(self.url("draw"))
            .json(&json!({ "chart": chart, "params": params }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Draw {
                chart: chart.to_string(),
                status,
            });
        }
        // The body is informational only; an empty or garbled one is not a failure.
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body).unwrap_or_else(|_| Value::Object(Map::new())))
    }

    async fn logs_tail(&self, limit: usize, token: Option<&str>) -> Result<Vec<String>, ApiError> {
        let limit = limit.to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(token) = token {
            query.push(("token", token));
        }
        let response = self
            .client
            .get(self.url("logs_tail"))
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Backend {
                status,
                message: format!("HTTP {}", status.as_u16()),
            });
        }
        let tail: LogsTail = response.json().await?;
        Ok(tail.lines)
    }
}
