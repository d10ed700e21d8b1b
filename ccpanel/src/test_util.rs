use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};

use crate::{
    api::Backend,
    error::ApiError,
    types::{AllParams, ChainKey, ChainParam, ChangeParamResponse, ChartName, MessageResponse},
};

fn backend_error(message: &str) -> ApiError {
    ApiError::Backend {
        status: StatusCode::BAD_REQUEST,
        message: message.to_string(),
    }
}

/// A scriptable [Backend]. Each call succeeds unless its failure has been set, and every
/// parameter change is recorded.
#[derive(Default)]
pub struct FakeBackend {
    pub start_error: Mutex<Option<String>>,
    pub stop_error: Mutex<Option<String>>,
    pub param_error: Mutex<Option<String>>,
    pub changes: Mutex<Vec<(ChainKey, ChainParam, String)>>,
    pub tx_details: Mutex<Map<String, Value>>,
    pub tail: Mutex<Option<Vec<String>>>,
}

impl FakeBackend {
    pub fn fail_start(&self, message: &str) {
        *self.start_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_stop(&self, message: &str) {
        *self.stop_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_params(&self, message: &str) {
        *self.param_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_tx_details(&self, details: Value) {
        if let Value::Object(map) = details {
            *self.tx_details.lock().unwrap() = map;
        }
    }

    pub fn set_tail(&self, lines: Vec<String>) {
        *self.tail.lock().unwrap() = Some(lines);
    }

    pub fn fail_tail(&self) {
        *self.tail.lock().unwrap() = None;
    }

    pub fn changes(&self) -> Vec<(ChainKey, ChainParam, String)> {
        self.changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn start_system(&self) -> Result<MessageResponse, ApiError> {
        match self.start_error.lock().unwrap().as_deref() {
            Some(e) => Err(backend_error(e)),
            None => Ok(MessageResponse {
                message: Some("System started".to_string()),
            }),
        }
    }

    async fn stop_system(&self) -> Result<MessageResponse, ApiError> {
        match self.stop_error.lock().unwrap().as_deref() {
            Some(e) => Err(backend_error(e)),
            None => Ok(MessageResponse {
                message: Some("System stopped".to_string()),
            }),
        }
    }

    async fn change_param(
        &self,
        chain: ChainKey,
        param: ChainParam,
        value: &str,
    ) -> Result<ChangeParamResponse, ApiError> {
        if let Some(e) = self.param_error.lock().unwrap().as_deref() {
            return Err(backend_error(e));
        }
        self.changes
            .lock()
            .unwrap()
            .push((chain, param, value.to_string()));
        Ok(ChangeParamResponse {
            message: Some("parameter updated".to_string()),
            chain: Some(chain.to_string()),
            param: Some(param.to_string()),
            value: json!(value),
        })
    }

    async fn get_all_params(&self) -> Result<AllParams, ApiError> {
        Ok(AllParams::default())
    }

    async fn get_tx_details(&self, tx_hash: &str) -> Result<Map<String, Value>, ApiError> {
        let details = self.tx_details.lock().unwrap().clone();
        if details.is_empty() {
            return Err(backend_error(&format!("transaction {tx_hash} not found")));
        }
        Ok(details)
    }

    async fn draw_chart(&self, _chart: ChartName, _params: &Value) -> Result<Value, ApiError> {
        Ok(json!({}))
    }

    async fn logs_tail(&self, limit: usize, _token: Option<&str>) -> Result<Vec<String>, ApiError> {
        match self.tail.lock().unwrap().as_ref() {
            Some(lines) => Ok(lines.iter().rev().take(limit).rev().cloned().collect()),
            None => Err(ApiError::Status(StatusCode::SERVICE_UNAVAILABLE)),
        }
    }
}
