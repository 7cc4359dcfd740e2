// Data structures shared by the feed, the resolver and the HTTP layer.
//
// `Train` is what the real-time feed produces; `TrainInfo` is the display-ready
// projection; `TrainStatus` is what consumers of the tracker observe.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TrackerError;

// ============================================================================
// Data Structures
// ============================================================================

/// One upcoming arrival of a train. `arrival_time` is in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationArrival {
    pub arrival_time: i64,
    pub station_id: String,
    pub destination_id: String,
}

impl StationArrival {
    pub fn new(arrival_time: i64, station_id: impl Into<String>, destination_id: impl Into<String>) -> Self {
        StationArrival {
            arrival_time,
            station_id: station_id.into(),
            destination_id: destination_id.into(),
        }
    }
}

/// A train as reported by the real-time feed.
///
/// `station_arrivals` is kept in feed order, which is the chronological order
/// of the upcoming stations. Entries with equal timestamps are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Train {
    pub id: String,
    pub route_id: String,
    pub station_arrivals: Vec<StationArrival>,
}

/// Every train currently known to the feed, keyed by train id.
pub type TrainSnapshot = HashMap<String, Train>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStation {
    pub station_id: String,
    pub station_name: String,
    pub arrival_time: i64,
}

/// Display-ready view of a single train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainInfo {
    pub line: String,
    pub line_color: String,
    pub destination: String,
    pub next_stations: Vec<NextStation>,
}

// ============================================================================
// Request State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainState {
    Idle,
    Loading,
    Ready {
        train: Train,
        train_info: Option<TrainInfo>,
    },
    Failed(TrackerError),
}

/// What a consumer of the tracker sees: data and error, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainStatus {
    pub train: Option<Train>,
    pub train_info: Option<TrainInfo>,
    pub loading: bool,
    pub error: Option<String>,
}

impl From<&TrainState> for TrainStatus {
    fn from(state: &TrainState) -> Self {
        match state {
            TrainState::Idle => TrainStatus {
                train: None,
                train_info: None,
                loading: false,
                error: None,
            },
            TrainState::Loading => TrainStatus {
                train: None,
                train_info: None,
                loading: true,
                error: None,
            },
            TrainState::Ready { train, train_info } => TrainStatus {
                train: Some(train.clone()),
                train_info: train_info.clone(),
                loading: false,
                error: None,
            },
            TrainState::Failed(err) => TrainStatus {
                train: None,
                train_info: None,
                loading: false,
                error: Some(err.to_string()),
            },
        }
    }
}

// ============================================================================
// Time helpers
// ============================================================================

pub fn format_timestamp_full(timestamp: i64, tz: Tz) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("Invalid timestamp: {}", timestamp),
    }
}

pub fn get_current_timestamp() -> i64 {
    Utc::now().timestamp()
}
