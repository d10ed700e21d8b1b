//! Run state of one experiment, and the actions that move it along.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    api::Backend,
    error::ApiError,
    types::{
        AllParams, ChainKey, ChainParam, ExperimentParams, ExperimentPoint, ParamDraft,
        RunStatus, TxTimestamps,
    },
};

/// What older backends print on the system stream once every transaction has been processed.
pub const COMPLETION_SENTINEL: &str = "All transactions are completed. Now to shut down.";

pub const MISSING_TX_HASH: &str = "missing transaction hash";

/// A completion signal seen on the system log stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemSignal {
    /// `{"status":"finished"}`.
    Finished,
    /// The legacy sentinel line.
    Sentinel,
}

impl SystemSignal {
    pub fn detect(line: &str) -> Option<SystemSignal> {
        #[derive(Deserialize)]
        struct StatusEvent {
            status: String,
        }
        if let Ok(event) = serde_json::from_str::<StatusEvent>(line.trim()) {
            if event.status.eq_ignore_ascii_case("finished") {
                return Some(SystemSignal::Finished);
            }
        }
        line.contains(COMPLETION_SENTINEL)
            .then_some(SystemSignal::Sentinel)
    }
}

pub struct ExperimentStore {
    backend: Arc<dyn Backend>,
    status: RunStatus,
    params: Option<ExperimentParams>,
    data: Vec<ExperimentPoint>,
    error: Option<String>,
    system_message: Option<String>,
    run_id: Option<String>,
    chain_params: Option<AllParams>,
    timestamps: Option<TxTimestamps>,
    timestamps_error: Option<String>,
    /// Parameter edits waiting to be sent.
    pub draft: ParamDraft,
}

impl ExperimentStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        ExperimentStore {
            backend,
            status: RunStatus::Idle,
            params: None,
            data: Vec::new(),
            error: None,
            system_message: None,
            run_id: None,
            chain_params: None,
            timestamps: None,
            timestamps_error: None,
            draft: ParamDraft::default(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn params(&self) -> Option<&ExperimentParams> {
        self.params.as_ref()
    }

    pub fn data(&self) -> &[ExperimentPoint] {
        &self.data
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn system_message(&self) -> Option<&str> {
        self.system_message.as_deref()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn chain_params(&self) -> Option<&AllParams> {
        self.chain_params.as_ref()
    }

    pub fn timestamps(&self) -> Option<&TxTimestamps> {
        self.timestamps.as_ref()
    }

    pub fn timestamps_error(&self) -> Option<&str> {
        self.timestamps_error.as_deref()
    }

    /// Start the backend. The status goes to running straight away and only changes again if
    /// the call fails.
    pub async fn start(&mut self, params: Option<ExperimentParams>) {
        self.status = RunStatus::Running;
        self.params = params;
        self.data.clear();
        self.error = None;
        self.system_message = None;
        self.run_id = Some("local".to_string());

        match self.backend.start_system().await {
            Ok(res) => {
                let message = res.message.unwrap_or_else(|| "System started".to_string());
                info!(%message, "system started");
                self.system_message = Some(message);
                self.status = RunStatus::Running;
            }
            Err(e) => {
                warn!("start failed: {e}");
                self.status = RunStatus::Error;
                self.error = Some(e.message());
            }
        }
    }

    pub fn push_point(&mut self, point: ExperimentPoint) {
        self.data.push(point);
    }

    /// Stop the backend.
    pub async fn finish(&mut self) {
        match self.backend.stop_system().await {
            Ok(res) => {
                let message = res.message.unwrap_or_else(|| "System stopped".to_string());
                info!(%message, "system stopped");
                self.system_message = Some(message);
                self.status = RunStatus::Finished;
            }
            Err(e) => {
                warn!("stop failed: {e}");
                self.status = RunStatus::Error;
                self.error = Some(e.message());
            }
        }
    }

    /// Change one chain parameter. Success leaves the run status alone; failure moves it to
    /// error. Returns whether the change was accepted.
    pub async fn update_chain_param(
        &mut self,
        chain: ChainKey,
        param: ChainParam,
        value: &str,
    ) -> bool {
        match self.backend.change_param(chain, param, value).await {
            Ok(res) => {
                let message = res
                    .message
                    .unwrap_or_else(|| "parameter updated".to_string());
                info!(%chain, %param, value, "parameter changed");
                self.system_message = Some(message);
                true
            }
            Err(e) => {
                warn!(%chain, %param, value, "parameter change failed: {e}");
                self.error = Some(e.message());
                self.status = RunStatus::Error;
                false
            }
        }
    }

    /// Send every filled-in draft field, in order, stopping at the first rejection. Returns the
    /// number of changes accepted.
    pub async fn apply_param_draft(&mut self) -> usize {
        let mut applied = 0;
        for change in self.draft.changes() {
            if !self
                .update_chain_param(change.chain, change.param, &change.value)
                .await
            {
                break;
            }
            applied += 1;
        }
        applied
    }

    pub async fn load_params(&mut self) -> Result<&AllParams, ApiError> {
        let params = self.backend.get_all_params().await?;
        Ok(self.chain_params.insert(params))
    }

    /// Look up the stage timestamps of a transaction.
    pub async fn fetch_timestamps(&mut self, tx_hash: &str) {
        let tx_hash = tx_hash.trim();
        if tx_hash.is_empty() {
            self.timestamps_error = Some(MISSING_TX_HASH.to_string());
            return;
        }
        match self.backend.get_tx_details(tx_hash).await {
            Ok(raw) => {
                self.timestamps = Some(TxTimestamps::from_raw(&raw));
                self.timestamps_error = None;
            }
            Err(e) => {
                warn!(%tx_hash, "failed to read transaction timestamps: {e}");
                self.timestamps = None;
                self.timestamps_error = Some(e.message());
            }
        }
    }

    /// Watch the system log for the backend announcing that the run is over. Returns true if
    /// this line finished the run.
    pub fn handle_system_log(&mut self, line: &str) -> bool {
        if line.is_empty() || self.status != RunStatus::Running {
            return false;
        }
        match SystemSignal::detect(line) {
            Some(signal) => {
                info!(?signal, "backend reported completion");
                self.status = RunStatus::Finished;
                self.system_message = Some("System self-stopped".to_string());
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.status = RunStatus::Idle;
        self.params = None;
        self.data.clear();
        self.error = None;
        self.system_message = None;
        self.run_id = None;
        self.timestamps = None;
        self.timestamps_error = None;
    }
}
