// Real-time acquisition: GTFS-Realtime TripUpdates → snapshot of trains.

use gtfs_rt::FeedMessage;
use prost::Message;
use std::future::Future;
use std::time::Duration;

use crate::error::FeedError;
use crate::metro_models::{StationArrival, Train, TrainSnapshot};

type Result<T> = std::result::Result<T, FeedError>;

/// Source of the full set of trains currently known.
pub trait TrainFeed {
    fn fetch_trains(&self) -> impl Future<Output = Result<TrainSnapshot>> + Send;
}

pub struct GtfsRtTrainFeed {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl GtfsRtTrainFeed {
    const API_KEY_HEADER: &'static str = "x-api-key";

    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(GtfsRtTrainFeed {
            client,
            url: url.into(),
            api_key,
        })
    }
}

impl TrainFeed for GtfsRtTrainFeed {
    async fn fetch_trains(&self) -> Result<TrainSnapshot> {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.header(Self::API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Network(format!("Failed to read feed response: {}", e)))?;

        let feed = FeedMessage::decode(&*body).map_err(|e| FeedError::Decode(e.to_string()))?;
        let snapshot = snapshot_from_feed(feed);
        log::debug!("🚆 Feed decoded: {} trains", snapshot.len());
        Ok(snapshot)
    }
}

/// Convert a decoded TripUpdates feed into trains keyed by id.
///
/// The train id is the vehicle id when present, else the trip id. Stop-time
/// updates without a stop id or a time are dropped; the rest keep feed order
/// and share the last retained stop as destination. If two entities resolve
/// to the same id the first one wins.
pub fn snapshot_from_feed(feed: FeedMessage) -> TrainSnapshot {
    let mut snapshot = TrainSnapshot::new();

    for entity in feed.entity {
        if entity.is_deleted.unwrap_or(false) {
            continue;
        }
        let Some(trip_update) = entity.trip_update else {
            continue;
        };

        let train_id = trip_update
            .vehicle
            .as_ref()
            .and_then(|v| v.id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| trip_update.trip.trip_id.clone().filter(|id| !id.is_empty()));

        let Some(train_id) = train_id else {
            log::debug!("Skipping trip update {} without vehicle or trip id", entity.id);
            continue;
        };

        if snapshot.contains_key(&train_id) {
            log::debug!("Duplicate trip update for train {}, keeping the first", train_id);
            continue;
        }

        let stops: Vec<(i64, String)> = trip_update
            .stop_time_update
            .iter()
            .filter_map(|stu| {
                let stop_id = stu.stop_id.clone()?;
                let time = stu
                    .arrival
                    .as_ref()
                    .and_then(|a| a.time)
                    .or_else(|| stu.departure.as_ref().and_then(|d| d.time))?;
                Some((time, stop_id))
            })
            .collect();

        let destination_id = stops.last().map(|(_, stop_id)| stop_id.clone()).unwrap_or_default();

        let station_arrivals = stops
            .into_iter()
            .map(|(time, stop_id)| StationArrival::new(time, stop_id, destination_id.clone()))
            .collect();

        snapshot.insert(
            train_id.clone(),
            Train {
                id: train_id,
                route_id: trip_update.trip.route_id.clone().unwrap_or_default(),
                station_arrivals,
            },
        );
    }

    snapshot
}
