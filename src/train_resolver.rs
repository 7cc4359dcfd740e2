// Train resolution: snapshot lookup, view projection, and the request slot
// that tracks the currently requested train.

use chrono_tz::Tz;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::TrackerError;
use crate::metro_feed::TrainFeed;
use crate::metro_models::{
    NextStation, Train, TrainInfo, TrainSnapshot, TrainState, TrainStatus, format_timestamp_full,
};
use crate::metro_reference::{LineColors, MetroReference, RouteLines, StationDirectory, UNKNOWN_STATION};

// ============================================================================
// Lookup & Projection
// ============================================================================

pub fn find_train(snapshot: &TrainSnapshot, train_id: &str) -> Result<Train, TrackerError> {
    snapshot
        .get(train_id)
        .cloned()
        .ok_or_else(|| TrackerError::TrainNotFound(train_id.to_string()))
}

/// Build the display view of `train`, or `None` if it has no upcoming arrivals.
///
/// Stations keep the exact order of `train.station_arrivals`.
pub fn project_train_info(
    train: &Train,
    routes: &RouteLines,
    colors: &LineColors,
    stations: &StationDirectory,
) -> Option<TrainInfo> {
    let line = routes.line_for_route(&train.route_id);
    let line_color = colors.color_for(&line).to_string();

    let first = train.station_arrivals.first()?;
    let destination = stations.station_name(&first.destination_id, "").to_string();

    let next_stations = train
        .station_arrivals
        .iter()
        .map(|arrival| NextStation {
            station_id: arrival.station_id.clone(),
            station_name: stations.station_name(&arrival.station_id, UNKNOWN_STATION).to_string(),
            arrival_time: arrival.arrival_time,
        })
        .collect();

    Some(TrainInfo {
        line,
        line_color,
        destination,
        next_stations,
    })
}

// ============================================================================
// Resolver
// ============================================================================

pub struct TrainResolver<F> {
    feed: F,
    reference: Arc<MetroReference>,
    timezone: Tz,
}

impl<F: TrainFeed> TrainResolver<F> {
    pub fn new(feed: F, reference: Arc<MetroReference>) -> Self {
        TrainResolver {
            feed,
            reference,
            timezone: chrono_tz::UTC,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn reference(&self) -> &MetroReference {
        &self.reference
    }

    /// Run acquisition → lookup → projection once for `train_id`.
    ///
    /// Errors are folded into `TrainState::Failed`; a missing or empty id
    /// fails without touching the feed.
    pub async fn resolve(&self, train_id: Option<&str>) -> TrainState {
        let Some(train_id) = train_id.filter(|id| !id.is_empty()) else {
            log::warn!("⚠️  Resolution requested without a train ID");
            return TrainState::Failed(TrackerError::MissingTrainId);
        };

        match self.load_train(train_id).await {
            Ok((train, train_info)) => {
                match train.station_arrivals.first() {
                    Some(next) => log::info!(
                        "🚆 Train {} resolved: {} upcoming stations, next at {}",
                        train_id,
                        train.station_arrivals.len(),
                        format_timestamp_full(next.arrival_time, self.timezone)
                    ),
                    None => log::info!("🚆 Train {} resolved with no upcoming stations", train_id),
                }
                TrainState::Ready { train, train_info }
            }
            Err(e) => {
                log::warn!("⚠️  Train {} could not be resolved: {}", train_id, e);
                TrainState::Failed(e)
            }
        }
    }

    async fn load_train(&self, train_id: &str) -> Result<(Train, Option<TrainInfo>), TrackerError> {
        let snapshot = self.feed.fetch_trains().await?;
        let train = find_train(&snapshot, train_id)?;
        let train_info = project_train_info(
            &train,
            &self.reference.routes,
            &self.reference.colors,
            &self.reference.stations,
        );
        Ok((train, train_info))
    }
}

// ============================================================================
// Tracker (single result slot)
// ============================================================================

struct TrackerSlot {
    generation: u64,
    state: TrainState,
}

/// Handle for one tracking request; only the newest ticket may write the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTicket {
    token: u64,
    train_id: Option<String>,
}

impl TrackingTicket {
    pub fn train_id(&self) -> Option<&str> {
        self.train_id.as_deref()
    }
}

pub struct TrainTracker<F> {
    resolver: Arc<TrainResolver<F>>,
    slot: Mutex<TrackerSlot>,
}

impl<F: TrainFeed> TrainTracker<F> {
    pub fn new(resolver: Arc<TrainResolver<F>>) -> Self {
        TrainTracker {
            resolver,
            slot: Mutex::new(TrackerSlot {
                generation: 0,
                state: TrainState::Idle,
            }),
        }
    }

    pub fn resolver(&self) -> &Arc<TrainResolver<F>> {
        &self.resolver
    }

    fn lock_slot(&self) -> MutexGuard<'_, TrackerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> TrainStatus {
        TrainStatus::from(&self.lock_slot().state)
    }

    /// Make `train_id` the active target and reset the slot.
    ///
    /// Prior results are dropped. A missing or empty id fails immediately;
    /// any other id puts the slot in `Loading` until `finish` is called with
    /// the returned ticket.
    pub fn begin(&self, train_id: Option<String>) -> TrackingTicket {
        let train_id = train_id.filter(|id| !id.is_empty());
        let mut slot = self.lock_slot();
        slot.generation += 1;
        slot.state = match train_id {
            Some(_) => TrainState::Loading,
            None => TrainState::Failed(TrackerError::MissingTrainId),
        };
        TrackingTicket {
            token: slot.generation,
            train_id,
        }
    }

    /// Store `state` if `ticket` is still the newest request; otherwise drop it.
    pub fn finish(&self, ticket: &TrackingTicket, state: TrainState) -> TrainStatus {
        let mut slot = self.lock_slot();
        if slot.generation == ticket.token {
            slot.state = state;
        } else {
            log::debug!(
                "Discarding superseded result for train {}",
                ticket.train_id.as_deref().unwrap_or("<none>")
            );
        }
        TrainStatus::from(&slot.state)
    }

    /// `begin` + resolve + `finish` in one call.
    pub async fn track(&self, train_id: Option<String>) -> TrainStatus {
        let ticket = self.begin(train_id);
        let Some(train_id) = ticket.train_id() else {
            return self.status();
        };
        let state = self.resolver.resolve(Some(train_id)).await;
        self.finish(&ticket, state)
    }
}
