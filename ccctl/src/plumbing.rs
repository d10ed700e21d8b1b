//! Code for all the ccctl commands, so you can invoke it from your own programs.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use ccpanel::{
    api::{self, ApiClient, Backend as _, ChartParams},
    cfg::Config,
    experiment::ExperimentStore,
    logs::{Ingested, LogKind, LogStore, SseSource},
    types::{
        ChainKey, ChainParam, ChartName, ExperimentParams, ParamDraft, RunStatus,
        coerce_param_value,
    },
};
use serde_json::Value;
use tracing::{debug, info};

use crate::render;

/// Everything a command needs: the client and both stores.
pub struct Panel {
    pub config: Config,
    pub api: Arc<ApiClient>,
    pub experiment: ExperimentStore,
    pub logs: LogStore,
}

impl Panel {
    pub fn new(config: Config) -> Result<Panel> {
        let api = Arc::new(ApiClient::new(&config)?);
        let source = Arc::new(SseSource::new(&config)?);
        let experiment = ExperimentStore::new(api.clone());
        let logs = LogStore::new(api.clone(), source, &config);
        Ok(Panel {
            config,
            api,
            experiment,
            logs,
        })
    }

    fn report_status(&self) {
        let status = self.experiment.status();
        println!("status: {}", render::status_badge(status));
        if let Some(message) = self.experiment.system_message() {
            println!("message: {message}");
        }
        if let Some(error) = self.experiment.error() {
            println!("error: {error}");
        }
    }

    fn ensure_ok(&self) -> Result<()> {
        match self.experiment.status() {
            RunStatus::Error => Err(anyhow!(
                "{}",
                self.experiment.error().unwrap_or("experiment failed")
            )),
            _ => Ok(()),
        }
    }

    async fn apply_draft(&mut self, draft: ParamDraft) -> Result<()> {
        if draft.is_empty() {
            return Ok(());
        }
        self.experiment.draft = draft;
        let total = self.experiment.draft.changes().len();
        let applied = self.experiment.apply_param_draft().await;
        println!("applied {applied}/{total} parameter changes");
        self.ensure_ok()
    }

    /// Apply any parameter edits, then start the system.
    pub async fn start(&mut self, params: ExperimentParams) -> Result<()> {
        self.apply_draft(params.draft.clone()).await?;
        self.experiment.start(Some(params)).await;
        self.report_status();
        self.ensure_ok()
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.experiment.finish().await;
        self.report_status();
        self.ensure_ok()
    }

    pub async fn params_get(&mut self) -> Result<()> {
        let params = self
            .experiment
            .load_params()
            .await
            .map_err(|e| anyhow!("{}", e.message()))?;
        print!("{}", render::params_table(params));
        Ok(())
    }

    pub async fn params_set(&mut self, chain: ChainKey, param: ChainParam, value: &str) -> Result<()> {
        let value = coerce_param_value(value)
            .ok_or_else(|| anyhow!("a value for {param} is required"))?;
        self.experiment
            .update_chain_param(chain, param, &value)
            .await;
        self.report_status();
        self.ensure_ok()
    }

    pub async fn params_apply(&mut self, draft: ParamDraft) -> Result<()> {
        if draft.is_empty() {
            return Err(anyhow!("no parameter values given"));
        }
        self.apply_draft(draft).await
    }

    /// Show the stage timestamps of one transaction.
    pub async fn tx(&mut self, tx_hash: &str) -> Result<()> {
        self.experiment.fetch_timestamps(tx_hash).await;
        if let Some(error) = self.experiment.timestamps_error() {
            return Err(anyhow!("{error}"));
        }
        if let Some(ts) = self.experiment.timestamps() {
            print!("{}", render::timestamps_table(tx_hash.trim(), ts));
        }
        Ok(())
    }

    pub async fn draw(&self, chart: Option<ChartName>, params: Value) -> Result<()> {
        let params = ChartParams::from_value(params);
        let drawn = match chart {
            Some(chart) => {
                let body = self
                    .api
                    .draw_chart(chart, &params.for_chart(chart))
                    .await
                    .map_err(|e| anyhow!("{}", e.message()))?;
                vec![(chart, body)]
            }
            None => api::draw_all_charts(self.api.as_ref(), &params)
                .await
                .map_err(|e| anyhow!("{}", e.message()))?,
        };
        for (chart, body) in drawn {
            println!("{chart}: {body}");
        }
        Ok(())
    }

    pub async fn logs_tail(&mut self, limit: Option<usize>) -> Result<()> {
        self.logs.fetch_logs(limit).await;
        if let Some(error) = self.logs.logs_error() {
            return Err(anyhow!("{error}"));
        }
        for line in self.logs.logs().iter() {
            println!("{line}");
        }
        Ok(())
    }

    /// Print stream lines as they arrive until Ctrl-C.
    pub async fn logs_follow(&mut self, kinds: &[LogKind]) -> Result<()> {
        self.logs.start_sse(None)?;
        println!("following {} log streams, Ctrl-C to stop", self.logs.live_streams());
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                ingested = self.logs.next_ingested() => match ingested {
                    Some(Ingested::Line { kind, line, .. }) => {
                        if kinds.is_empty() || kinds.contains(&kind) {
                            println!("{line}");
                        }
                    }
                    Some(Ingested::Failed { message, .. }) => eprintln!("{message}"),
                    None => break,
                },
            }
        }
        self.logs.stop_sse();
        Ok(())
    }

    /// Start a run and follow it until the backend reports completion. Ctrl-C stops the system
    /// instead of waiting.
    pub async fn flow(&mut self, params: ExperimentParams) -> Result<()> {
        self.start(params).await?;
        self.logs.start_sse(None)?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping the system");
                    self.experiment.finish().await;
                    break;
                }
                ingested = self.logs.next_ingested() => match ingested {
                    Some(Ingested::Line { kind, raw, line }) => {
                        println!("{line}");
                        if kind == LogKind::System && self.experiment.handle_system_log(&raw) {
                            debug!("run completed");
                            break;
                        }
                    }
                    Some(Ingested::Failed { message, .. }) => eprintln!("{message}"),
                    None => break,
                },
            }
        }
        self.logs.stop_sse();
        self.report_status();
        println!(
            "collected {} lines ({} tx, {} node, {} system)",
            self.logs.logs().len(),
            self.logs.kind_logs(LogKind::Tx).len(),
            self.logs.kind_logs(LogKind::Node).len(),
            self.logs.kind_logs(LogKind::System).len(),
        );
        self.ensure_ok()
    }
}
