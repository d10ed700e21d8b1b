use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::serde_util;

/// Which side of the cross-chain pair a parameter applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainKey {
    #[serde(rename = "src_chain")]
    Src,
    #[serde(rename = "dst_chain")]
    Dst,
}

impl ChainKey {
    pub const ALL: [ChainKey; 2] = [ChainKey::Src, ChainKey::Dst];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKey::Src => "src_chain",
            ChainKey::Dst => "dst_chain",
        }
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChainKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "src_chain" | "src" => Ok(ChainKey::Src),
            "dst_chain" | "dst" => Ok(ChainKey::Dst),
            _ => Err(anyhow!("unknown chain {s:?} - expected src_chain or dst_chain")),
        }
    }
}

/// Chain parameters the backend allows to be changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainParam {
    #[serde(rename = "Block_Interval")]
    BlockInterval,
    #[serde(rename = "MaxBlockSize_global")]
    MaxBlockSize,
    #[serde(rename = "InjectSpeed")]
    InjectSpeed,
    #[serde(rename = "TotalDataSize")]
    TotalDataSize,
}

impl ChainParam {
    pub const ALL: [ChainParam; 4] = [
        ChainParam::BlockInterval,
        ChainParam::MaxBlockSize,
        ChainParam::InjectSpeed,
        ChainParam::TotalDataSize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainParam::BlockInterval => "Block_Interval",
            ChainParam::MaxBlockSize => "MaxBlockSize_global",
            ChainParam::InjectSpeed => "InjectSpeed",
            ChainParam::TotalDataSize => "TotalDataSize",
        }
    }
}

impl fmt::Display for ChainParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChainParam {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ChainParam::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                anyhow!(
                    "unknown parameter {s:?} - expected one of Block_Interval, MaxBlockSize_global, InjectSpeed, TotalDataSize"
                )
            })
    }
}

/// Current parameters of one chain, as reported by `/get_all_params`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainParams {
    #[serde(rename = "Block_Interval", with = "serde_util::lenient_f64", default)]
    pub block_interval: f64,
    #[serde(rename = "MaxBlockSize_global", with = "serde_util::lenient_f64", default)]
    pub max_block_size: f64,
    #[serde(rename = "TotalDataSize", with = "serde_util::lenient_f64", default)]
    pub total_data_size: f64,
    #[serde(rename = "InjectSpeed", with = "serde_util::lenient_f64", default)]
    pub inject_speed: f64,
}

impl ChainParams {
    pub fn get(&self, param: ChainParam) -> f64 {
        match param {
            ChainParam::BlockInterval => self.block_interval,
            ChainParam::MaxBlockSize => self.max_block_size,
            ChainParam::InjectSpeed => self.inject_speed,
            ChainParam::TotalDataSize => self.total_data_size,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AllParams {
    pub src_chain: ChainParams,
    pub dst_chain: ChainParams,
}

impl AllParams {
    pub fn chain(&self, chain: ChainKey) -> &ChainParams {
        match chain {
            ChainKey::Src => &self.src_chain,
            ChainKey::Dst => &self.dst_chain,
        }
    }
}

/// The only consensus the testbed runs on either side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consensus {
    #[default]
    #[serde(rename = "PoW")]
    Pow,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "CCP")]
    Ccp,
}

/// Parameters an experiment run was started with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentParams {
    pub src_chain: Consensus,
    pub dst_chain: Consensus,
    pub tx_count: u64,
    pub interval_ms: u64,
    pub protocol: Protocol,
    pub draft: ParamDraft,
}

/// The editable parameter fields of the start page. Empty fields are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDraft {
    pub block_interval_src: String,
    pub block_interval_dst: String,
    pub max_block_size_src: String,
    pub max_block_size_dst: String,
    pub inject_speed: String,
    pub total_data_size: String,
}

/// A single parameter change request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamChange {
    pub chain: ChainKey,
    pub param: ChainParam,
    pub value: String,
}

impl ParamDraft {
    /// Expand the non-empty fields into the changes to send. The inject speed only exists on the
    /// source chain; the total data size is shared by both chains.
    pub fn changes(&self) -> Vec<ParamChange> {
        let fields = [
            (&self.block_interval_src, ChainKey::Src, ChainParam::BlockInterval),
            (&self.block_interval_dst, ChainKey::Dst, ChainParam::BlockInterval),
            (&self.max_block_size_src, ChainKey::Src, ChainParam::MaxBlockSize),
            (&self.max_block_size_dst, ChainKey::Dst, ChainParam::MaxBlockSize),
            (&self.inject_speed, ChainKey::Src, ChainParam::InjectSpeed),
            (&self.total_data_size, ChainKey::Src, ChainParam::TotalDataSize),
            (&self.total_data_size, ChainKey::Dst, ChainParam::TotalDataSize),
        ];
        fields
            .into_iter()
            .filter_map(|(value, chain, param)| {
                let value = coerce_param_value(value)?;
                Some(ParamChange {
                    chain,
                    param,
                    value,
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changes().is_empty()
    }
}

/// Trim a user-entered value. Numbers are normalised (`"05000"` becomes `"5000"`); anything else
/// is passed through for the backend to judge.
pub fn coerce_param_value(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n.to_string());
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n.to_string()),
        _ => Some(raw.to_string()),
    }
}

/// One sample collected while an experiment runs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentPoint {
    pub t: u64,
    pub latency_ms: f64,
    pub success: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RunStatus::Idle => "idle",
                RunStatus::Running => "running",
                RunStatus::Finished => "finished",
                RunStatus::Error => "error",
            }
        )
    }
}

/// The timestamps recorded for each stage of a cross-chain transaction, in stage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TsField {
    #[serde(rename = "ccTIS")]
    Tis,
    #[serde(rename = "ccTL")]
    Tl,
    #[serde(rename = "ccTLC")]
    Tlc,
    #[serde(rename = "ccTLS")]
    Tls,
    #[serde(rename = "ccTSD")]
    Tsd,
    #[serde(rename = "ccTID")]
    Tid,
    #[serde(rename = "ccTM")]
    Tm,
    #[serde(rename = "ccTMC")]
    Tmc,
}

impl TsField {
    pub const ALL: [TsField; 8] = [
        TsField::Tis,
        TsField::Tl,
        TsField::Tlc,
        TsField::Tls,
        TsField::Tsd,
        TsField::Tid,
        TsField::Tm,
        TsField::Tmc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TsField::Tis => "ccTIS",
            TsField::Tl => "ccTL",
            TsField::Tlc => "ccTLC",
            TsField::Tls => "ccTLS",
            TsField::Tsd => "ccTSD",
            TsField::Tid => "ccTID",
            TsField::Tm => "ccTM",
            TsField::Tmc => "ccTMC",
        }
    }
}

impl fmt::Display for TsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The subset of `/tx_details` we display. Fields missing from the response are missing here too.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TxTimestamps {
    pub values: BTreeMap<TsField, f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    pub from: TsField,
    pub to: TsField,
    pub delta: f64,
}

impl TxTimestamps {
    /// Keep only the eight known timestamp fields, coercing each to a number.
    pub fn from_raw(raw: &Map<String, Value>) -> Self {
        let values = TsField::ALL
            .into_iter()
            .filter_map(|f| raw.get(f.as_str()).map(|v| (f, serde_util::coerce_f64(v))))
            .collect();
        TxTimestamps { values }
    }

    pub fn get(&self, field: TsField) -> Option<f64> {
        self.values.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Time spent between consecutive recorded stages.
    pub fn stages(&self) -> Vec<Stage> {
        let present: Vec<(TsField, f64)> = self.values.iter().map(|(k, v)| (*k, *v)).collect();
        present
            .windows(2)
            .map(|w| Stage {
                from: w[0].0,
                to: w[1].0,
                delta: w[1].1 - w[0].1,
            })
            .collect()
    }

    /// Time from the first recorded stage to the last.
    pub fn total(&self) -> Option<f64> {
        let first = self.values.values().next()?;
        let last = self.values.values().next_back()?;
        Some(last - first)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChartName {
    #[serde(rename = "tps_latency")]
    TpsLatency,
    #[serde(rename = "srt_tps")]
    SrtTps,
    #[serde(rename = "latency_CTXNum")]
    LatencyCtxNum,
    #[serde(rename = "avg_latency_tt")]
    AvgLatencyTt,
}

impl ChartName {
    pub const ALL: [ChartName; 4] = [
        ChartName::TpsLatency,
        ChartName::SrtTps,
        ChartName::LatencyCtxNum,
        ChartName::AvgLatencyTt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartName::TpsLatency => "tps_latency",
            ChartName::SrtTps => "srt_tps",
            ChartName::LatencyCtxNum => "latency_CTXNum",
            ChartName::AvgLatencyTt => "avg_latency_tt",
        }
    }
}

impl fmt::Display for ChartName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChartName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ChartName::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow!("unknown chart {s:?}"))
    }
}

/// `{message}` replies from `/start` and `/stop`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChangeParamResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub value: Value,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogsTail {
    #[serde(default)]
    pub lines: Vec<String>,
}
