use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One OHLCV bar of market data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OhlcvData {
    pub stock_code: String,
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_close: Option<f64>,
}

/// Payload of a FRAME_UPDATE: the next bar of a game or replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFrame {
    pub index: u64,
    pub timestamp: String,
    pub ohlcv: OhlcvData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicators: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl GameFrame {
    /// Returns `true` if the server flagged this frame as a decision point.
    pub fn is_keypoint(&self) -> bool {
        self.keypoint.unwrap_or(false)
    }
}
