use crate::*;
use crate::error::FeedError;
use crate::metro_models::{StationArrival, Train, TrainSnapshot};
use crate::metro_reference::{LineColors, RouteLines, StationDirectory};

use actix_web::test;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

struct FixedFeed(Result<TrainSnapshot, FeedError>);

impl TrainFeed for FixedFeed {
    async fn fetch_trains(&self) -> Result<TrainSnapshot, FeedError> {
        self.0.clone()
    }
}

/// Answers like `FixedFeed`, but only after a delay.
struct SlowFeed {
    delay: Duration,
    inner: FixedFeed,
}

impl TrainFeed for SlowFeed {
    async fn fetch_trains(&self) -> Result<TrainSnapshot, FeedError> {
        tokio::time::sleep(self.delay).await;
        self.inner.0.clone()
    }
}

/// Hands out snapshots only when the test releases them, in call order.
struct GatedFeed {
    gates: Arc<Mutex<Vec<oneshot::Receiver<TrainSnapshot>>>>,
}

impl TrainFeed for GatedFeed {
    async fn fetch_trains(&self) -> Result<TrainSnapshot, FeedError> {
        let gate = self.gates.lock().unwrap().remove(0);
        gate.await.map_err(|e| FeedError::Network(e.to_string()))
    }
}

fn pairs(items: &[(&str, &str)]) -> HashMap<String, String> {
    items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn app_state<F: TrainFeed>(feed: F) -> AppState<F> {
    let reference = MetroReference {
        stations: StationDirectory::new(pairs(&[("S1", "Alpha"), ("S2", "Beta"), ("S9", "Omega")])),
        routes: RouteLines::new(pairs(&[("R1", "Red")])),
        colors: LineColors::new(pairs(&[("Red", "#FF0000")])),
        cached_at: 0,
    };
    let resolver = Arc::new(TrainResolver::new(feed, Arc::new(reference)));
    AppState {
        tracker: Arc::new(TrainTracker::new(resolver)),
    }
}

fn scenario_train(id: &str) -> Train {
    Train {
        id: id.to_string(),
        route_id: "R1".to_string(),
        station_arrivals: vec![StationArrival::new(100, "S1", "S9"), StationArrival::new(200, "S2", "S9")],
    }
}

fn scenario_feed() -> FixedFeed {
    FixedFeed(Ok(HashMap::from([("T1".to_string(), scenario_train("T1"))])))
}

async fn response_status(resp: HttpResponse) -> TrainStatus {
    let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

macro_rules! init_app {
    ($feed:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(app_state($feed)))
                .configure(configure_api::<FixedFeed>),
        )
        .await
    };
}

#[actix_web::test]
async fn resolves_train_over_http() {
    let app = init_app!(scenario_feed());

    let req = test::TestRequest::get().uri("/api/trains/T1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["trainInfo"],
        serde_json::json!({
            "line": "Red",
            "lineColor": "#FF0000",
            "destination": "Omega",
            "nextStations": [
                {"stationId": "S1", "stationName": "Alpha", "arrivalTime": 100},
                {"stationId": "S2", "stationName": "Beta", "arrivalTime": 200}
            ]
        })
    );
    assert_eq!(body["train"]["routeId"], "R1");
    assert_eq!(body["loading"], false);
    assert!(body["error"].is_null());
}

#[actix_web::test]
async fn error_kinds_map_to_status_codes() {
    let app = init_app!(scenario_feed());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/trains/T404").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: TrainStatus = test::read_body_json(resp).await;
    assert_eq!(body.error.as_deref(), Some("Train T404 not found"));
    assert!(body.train.is_none());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/trains").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: TrainStatus = test::read_body_json(resp).await;
    assert_eq!(body.error.as_deref(), Some("No train ID provided"));

    let app = init_app!(FixedFeed(Err(FeedError::Status(503))));
    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/trains/T1").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: TrainStatus = test::read_body_json(resp).await;
    assert_eq!(body.error.as_deref(), Some("Train feed responded with status 503"));
}

#[actix_web::test]
async fn tracker_follows_latest_target() {
    let app = init_app!(scenario_feed());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/tracker").to_request()).await;
    let idle: TrainStatus = test::read_body_json(resp).await;
    assert_eq!(idle, TrainStatus::from(&TrainState::Idle));

    let resp = test::call_service(&app, test::TestRequest::put().uri("/api/tracker/T1").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let ready: TrainStatus = test::read_body_json(resp).await;
    assert_eq!(ready.train_info.map(|info| info.destination), Some("Omega".to_string()));

    let resp = test::call_service(&app, test::TestRequest::put().uri("/api/tracker").to_request()).await;
    let missing: TrainStatus = test::read_body_json(resp).await;
    assert_eq!(missing.error.as_deref(), Some("No train ID provided"));

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/tracker").to_request()).await;
    let current: TrainStatus = test::read_body_json(resp).await;
    assert_eq!(current, missing);
}

#[actix_web::test]
async fn reports_reference_stats_and_health() {
    let app = init_app!(scenario_feed());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/reference/stats").to_request()).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["stations"], 3);
    assert_eq!(body["data"]["routes"], 1);
    assert_eq!(body["data"]["line_colors"], 1);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
}

#[actix_web::test]
async fn dropped_tracking_request_still_settles_the_slot() {
    let state = app_state(SlowFeed {
        delay: Duration::from_millis(100),
        inner: scenario_feed(),
    });

    let dropped = tokio::time::timeout(Duration::from_millis(10), start_tracking(&state, Some("T1".into()))).await;
    assert!(dropped.is_err());
    assert!(state.tracker.status().loading);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = state.tracker.status();
    assert!(!status.loading);
    assert_eq!(status.train.map(|t| t.id), Some("T1".to_string()));
    assert!(status.error.is_none());
}

#[actix_web::test]
async fn overlapping_tracking_requests_keep_the_latest() {
    let (slow_tx, slow_rx) = oneshot::channel();
    let (fast_tx, fast_rx) = oneshot::channel();
    let gates = Arc::new(Mutex::new(vec![slow_rx, fast_rx]));
    let state = app_state(GatedFeed { gates: gates.clone() });
    let feed_pending = || gates.lock().unwrap().len();

    let first = actix_web::rt::spawn({
        let state = state.clone();
        async move { response_status(start_tracking(&state, Some("T1".into())).await).await }
    });
    while feed_pending() == 2 {
        tokio::task::yield_now().await;
    }

    let second = actix_web::rt::spawn({
        let state = state.clone();
        async move { response_status(start_tracking(&state, Some("T2".into())).await).await }
    });
    while feed_pending() > 0 {
        tokio::task::yield_now().await;
    }

    fast_tx.send(HashMap::from([("T2".to_string(), scenario_train("T2"))])).unwrap();
    let second = second.await.unwrap();
    assert_eq!(second.train.as_ref().map(|t| t.id.as_str()), Some("T2"));

    slow_tx.send(HashMap::from([("T1".to_string(), scenario_train("T1"))])).unwrap();
    let first = first.await.unwrap();

    assert_eq!(first, second);
    assert_eq!(state.tracker.status(), second);
}
