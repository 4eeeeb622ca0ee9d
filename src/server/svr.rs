use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, convert::Infallible, future::Future, io, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{broadcast::error::RecvError, watch},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::alias::AliasStore;
use crate::config::RuntimeSettings;
use crate::downloader::QueueEngine;
use crate::monitor::{ProgressReport, TICK};
use crate::server::observers::ObserverHub;
use crate::track::{RunStatus, TrackDescriptor};

const PROGRESS_EVENT: &str = "progress_status";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct AppState {
    engine: QueueEngine,
    aliases: Arc<AliasStore>,
    settings: watch::Sender<RuntimeSettings>,
    observers: Arc<ObserverHub>,
    // cancelled on shutdown, ends open event streams
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        engine: QueueEngine,
        aliases: Arc<AliasStore>,
        settings: watch::Sender<RuntimeSettings>,
        tick: Duration,
    ) -> Self {
        Self {
            observers: ObserverHub::new(engine.clone(), tick),
            engine,
            aliases,
            settings,
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CommandReply {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl CommandReply {
    fn success() -> Json<Self> {
        Json(Self {
            status: "Success".to_string(),
            data: None,
        })
    }

    fn error(code: StatusCode, message: impl Into<String>) -> Response {
        let reply = Self {
            status: "Error".to_string(),
            data: Some(message.into()),
        };
        (code, Json(reply)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    tracks: Vec<TrackDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AliasEntry {
    alias: String,
    artist: String,
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    status: RunStatus,
    observers: usize,
    monitoring: bool,
}

async fn service_info(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        status: state.engine.status(),
        observers: state.observers.observers(),
        monitoring: state.observers.monitoring(),
    })
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Json<ProgressReport> {
    Json(state.engine.snapshot().into())
}

async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut observer = state.observers.attach();
    let shutdown = state.shutdown.clone();
    debug!("Observer connected");

    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = observer.recv() => received,
            };
            match received {
                Ok(report) => match Event::default().event(PROGRESS_EVENT).json_data(&*report) {
                    Ok(event) => yield Ok(event),
                    Err(err) => warn!("Failed to encode progress report: {}", err),
                },
                Err(RecvError::Lagged(skipped)) => debug!("Observer skipped {} reports", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn download(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DownloadRequest>,
) -> Response {
    if request.tracks.is_empty() {
        return CommandReply::error(StatusCode::BAD_REQUEST, "No tracks provided");
    }

    let count = request.tracks.len();
    let queued = if state.engine.status() == RunStatus::Complete {
        state.engine.replace(request.tracks)
    } else {
        state.engine.enqueue(request.tracks);
        Ok(())
    };
    if let Err(err) = queued {
        return CommandReply::error(StatusCode::CONFLICT, err.to_string());
    }

    info!("Queued {} track(s)", count);
    state.engine.start();
    CommandReply::success().into_response()
}

async fn stop(State(state): State<Arc<AppState>>) -> Json<CommandReply> {
    state.engine.request_stop();
    CommandReply::success()
}

async fn reset(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.reset() {
        Ok(()) => CommandReply::success().into_response(),
        Err(err) => CommandReply::error(StatusCode::CONFLICT, err.to_string()),
    }
}

async fn clear(State(state): State<Arc<AppState>>) -> Json<CommandReply> {
    if !state.engine.clear() {
        debug!("Run still stopping, list is cleared when it ends");
    }
    CommandReply::success()
}

async fn remove_track(State(state): State<Arc<AppState>>, Path(position): Path<usize>) -> Response {
    match state.engine.remove(position) {
        Some(track) => Json(track).into_response(),
        None => CommandReply::error(StatusCode::NOT_FOUND, format!("No track at position {}", position)),
    }
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<RuntimeSettings> {
    Json(*state.settings.borrow())
}

async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<RuntimeSettings>,
) -> Json<RuntimeSettings> {
    info!("Sleep interval set to {}s", settings.sleep_interval);
    state.settings.send_replace(settings);
    Json(settings)
}

async fn list_aliases(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.aliases.entries())
}

async fn add_alias(
    State(state): State<Arc<AppState>>,
    Json(entry): Json<AliasEntry>,
) -> (StatusCode, Json<AliasEntry>) {
    state.aliases.add(entry.alias.clone(), entry.artist.clone());
    (StatusCode::CREATED, Json(entry))
}

async fn remove_alias(State(state): State<Arc<AppState>>, Path(alias): Path<String>) -> StatusCode {
    if state.aliases.remove(&alias) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

fn build_app(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/events", get(events))
        .route("/snapshot", get(snapshot))
        .route("/download", post(download))
        .route("/stop", post(stop))
        .route("/clear", post(clear))
        .route("/reset", post(reset))
        .route("/tracks/{position}", delete(remove_track))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/aliases", get(list_aliases).post(add_alias))
        .route("/aliases/{alias}", delete(remove_alias))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn startup(
    engine: QueueEngine,
    aliases: Arc<AliasStore>,
    settings: watch::Sender<RuntimeSettings>,
    address: String,
    port: u16,
) -> Result<(), ServerError> {
    let app_state = Arc::new(AppState::new(engine.clone(), aliases, settings, TICK));

    let addr = format!("{}:{}", address, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.clone(),
            source,
        })?;

    info!("Listening on http://{}", addr);

    serve(listener, app_state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    engine.request_stop();
    Ok(())
}

/// Serves until `signal` resolves, then closes event streams and drains connections.
async fn serve(
    listener: TcpListener,
    app_state: Arc<AppState>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let shutdown = app_state.shutdown.clone();
    axum::serve(listener, build_app(app_state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutting down");
            shutdown.cancel();
        })
        .await
}
