// Metro train tracker: resolves a single train from the real-time feed and
// serves a display-ready view of its upcoming stations.

use actix_cors::Cors;
use actix_files as fs;
use actix_web::http::StatusCode;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use serde::Serialize;
use std::sync::Arc;

mod config;
mod error;
mod metro_feed;
mod metro_models;
mod metro_reference;
mod train_resolver;
#[cfg(test)]
mod tests;

use config::TrackerConfig;
use error::TrackerError;
use metro_feed::{GtfsRtTrainFeed, TrainFeed};
use metro_models::{TrainState, TrainStatus, get_current_timestamp};
use metro_reference::MetroReference;
use train_resolver::{TrainResolver, TrainTracker};

const SERVICE_NAME: &str = "Metro Train Tracker";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

struct AppState<F> {
    tracker: Arc<TrainTracker<F>>,
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        AppState {
            tracker: self.tracker.clone(),
        }
    }
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: get_current_timestamp(),
        }
    }
}

fn state_response(state: &TrainState) -> HttpResponse {
    // One-shot resolution only ever ends in Ready or Failed.
    let status = match state {
        TrainState::Failed(e) => e.status_code(),
        _ => StatusCode::OK,
    };
    HttpResponse::build(status).json(TrainStatus::from(state))
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_train<F: TrainFeed + 'static>(
    state: web::Data<AppState<F>>,
    path: web::Path<String>,
) -> HttpResponse {
    let train_id = path.into_inner();
    let train_state = state.tracker.resolver().resolve(Some(&train_id)).await;
    state_response(&train_state)
}

async fn get_train_without_id<F: TrainFeed + 'static>(state: web::Data<AppState<F>>) -> HttpResponse {
    let train_state = state.tracker.resolver().resolve(None).await;
    state_response(&train_state)
}

async fn get_tracker_status<F: TrainFeed + 'static>(state: web::Data<AppState<F>>) -> HttpResponse {
    HttpResponse::Ok().json(state.tracker.status())
}

async fn track_train<F: TrainFeed + 'static>(
    state: web::Data<AppState<F>>,
    path: web::Path<String>,
) -> HttpResponse {
    start_tracking(&state, Some(path.into_inner())).await
}

async fn track_without_id<F: TrainFeed + 'static>(state: web::Data<AppState<F>>) -> HttpResponse {
    start_tracking(&state, None).await
}

/// Point the tracker at `train_id` and wait for the slot to settle.
///
/// Resolution and the slot update run together on a detached task, so a
/// dropped client connection still ends the request in Ready or Failed. The
/// body is the slot as seen after this request finished, which may belong to
/// a newer request.
async fn start_tracking<F: TrainFeed + 'static>(state: &AppState<F>, train_id: Option<String>) -> HttpResponse {
    let tracker = state.tracker.clone();
    let ticket = tracker.begin(train_id);

    let Some(train_id) = ticket.train_id().map(str::to_string) else {
        log::warn!("⚠️  Tracking requested without a train ID");
        return HttpResponse::Ok().json(tracker.status());
    };

    log::info!("🔄 Tracking train {}...", train_id);
    let task_tracker = tracker.clone();
    let tracking = actix_web::rt::spawn(async move {
        let resolver = task_tracker.resolver().clone();
        let outcome = actix_web::rt::spawn(async move { resolver.resolve(Some(&train_id)).await }).await;
        let train_state = outcome.unwrap_or_else(|e| {
            log::error!("❌ Tracking task panicked: {}", e);
            TrainState::Failed(TrackerError::Unknown)
        });
        task_tracker.finish(&ticket, train_state)
    });

    match tracking.await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => {
            log::error!("❌ Tracking task failed: {}", e);
            HttpResponse::Ok().json(tracker.status())
        }
    }
}

async fn get_reference_stats<F: TrainFeed + 'static>(state: web::Data<AppState<F>>) -> HttpResponse {
    let stats = state.tracker.resolver().reference().stats();
    HttpResponse::Ok().json(ApiResponse::success(stats))
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "timestamp": get_current_timestamp(),
    }))
}

fn configure_api<F: TrainFeed + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/api")
            .route("/trains", web::get().to(get_train_without_id::<F>))
            .route("/trains/{id}", web::get().to(get_train::<F>))
            .route("/tracker", web::get().to(get_tracker_status::<F>))
            .route("/tracker", web::put().to(track_without_id::<F>))
            .route("/tracker/{id}", web::put().to(track_train::<F>))
            .route("/reference/stats", web::get().to(get_reference_stats::<F>)),
    );
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(config: TrackerConfig, reference: MetroReference) -> std::io::Result<()> {
    let feed = GtfsRtTrainFeed::new(config.feed_url.clone(), config.feed_api_key.clone(), config.request_timeout)
        .map_err(std::io::Error::other)?;

    let resolver = Arc::new(TrainResolver::new(feed, Arc::new(reference)).with_timezone(config.timezone));
    let app_state = AppState {
        tracker: Arc::new(TrainTracker::new(resolver)),
    };

    log::info!("🌐 Server running on: http://{}:{}", config.bind_addr, config.port);
    log::info!("📡 Feed: {}", config.feed_url);
    log::info!("📍 Routes:");
    log::info!("   GET  /api/trains/{{id}}       - Resolve one train");
    log::info!("   PUT  /api/tracker/{{id}}      - Track a train");
    log::info!("   GET  /api/tracker            - Tracked train status");
    log::info!("   GET  /api/reference/stats    - Static reference counts");
    log::info!("   GET  /health                 - Health check");

    let static_dir = config.static_dir.clone();
    if let Some(dir) = &static_dir {
        log::info!("📱 Serving static files from {:?}", dir);
    }

    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(configure_api::<GtfsRtTrainFeed>);

        if let Some(dir) = &static_dir {
            app = app.service(fs::Files::new("/", dir).index_file("index.html"));
        }
        app
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging() {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder().parse_filters(&filters).init();
}

fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    log::info!("🚀 {} v{}", SERVICE_NAME, SERVICE_VERSION);

    let config = match TrackerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Blocking download, so it must run before the async runtime starts.
    log::info!("📡 Loading static reference data...");
    let reference = MetroReference::load(
        config.gtfs_source.as_deref(),
        config.reference_max_age_days,
        config.request_timeout,
    );

    actix_web::rt::System::new().block_on(run_server(config, reference))
}
