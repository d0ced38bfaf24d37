use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use gekitotsu_race_server::config::{ConfigError, ServerConfig};
use gekitotsu_race_server::constants::TICK_MS;
use gekitotsu_race_server::engine::{now_ms, LapProgress, RaceEngine};
use gekitotsu_race_server::server_protocol::{parse_client_message, ParsedClientMessage};
use gekitotsu_race_server::server_utils::{normalize_room, requested_player_id};
use gekitotsu_race_server::types::{GameMode, TelemetrySample};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Motion-controlled racing server")]
struct Cli {
    /// TOML config file; falls back to RACE_CONFIG, then built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    player_id: String,
    room: Option<String>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    engine: RaceEngine,
}

impl ServerState {
    fn new(engine: RaceEngine) -> Self {
        Self {
            clients: HashMap::new(),
            engine,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(rename = "playerId")]
    player_id: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_tracing(&cli);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "failed to load configuration");
            std::process::exit(2);
        }
    };

    let engine = RaceEngine::new(config.tuning.clone(), &config.course);
    info!(
        max_lap = config.tuning.max_lap,
        obstacles = config.course.len(),
        "race engine ready"
    );
    let state = Arc::new(Mutex::new(ServerState::new(engine)));
    start_tick_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/results", get(results_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir(config.static_dir.clone()) {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; serving the API only");
        app
    };

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, %bind_addr, "failed to bind server socket");
            std::process::exit(1);
        }
    };

    info!(port = config.port, "listening");
    if let Err(error) = axum::serve(listener, app).await {
        error!(%error, "server runtime failed");
        std::process::exit(1);
    }
}

fn setup_tracing(cli: &Cli) {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<ServerConfig, ConfigError> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("RACE_CONFIG").ok().map(PathBuf::from));
    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            ServerConfig::load(&path)?
        }
        None => ServerConfig::default(),
    };

    let env_port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok());
    if let Some(port) = cli.port.or(env_port) {
        config.port = port;
    }
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        config.static_dir = Some(PathBuf::from(raw));
    }
    Ok(config)
}

fn resolve_static_dir(configured: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.join("index.html").is_file() {
            return Some(path);
        }
        warn!(path = %path.display(), "configured static dir has no index.html");
    }

    let candidates = [PathBuf::from("public"), PathBuf::from("../public")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn results_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let mut guard = state.lock().await;
    Json(guard.engine.build_results())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let requested = requested_player_id(query.player_id.as_deref());
    ws.on_upgrade(move |socket| handle_socket(state, socket, requested))
}

async fn handle_socket(state: SharedState, socket: WebSocket, requested: Option<String>) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        let player_id = guard.engine.connect(requested.as_deref());
        info!(%client_id, %player_id, "client connected");
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                player_id: player_id.clone(),
                room: None,
            },
        );
        let max_lap = guard.engine.tuning.max_lap;
        send_to_client(
            &mut guard,
            &client_id,
            &json!({
                "type": "welcome",
                "playerId": player_id,
                "maxLap": max_lap,
            }),
            QueuePolicy::DisconnectOnFull,
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &client_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &client_id, text).await;
                } else {
                    send_error_to_client(&state, &client_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &client_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, client_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error_to_client(&state, client_id, "invalid message").await;
        return;
    };

    let mut guard = state.lock().await;
    let Some(player_id) = guard
        .clients
        .get(client_id)
        .map(|ctx| ctx.player_id.clone())
    else {
        return;
    };

    match message {
        ParsedClientMessage::Join { room, mode } => {
            handle_join(&mut guard, client_id, &player_id, room.as_deref(), mode);
        }
        ParsedClientMessage::Sensor(sample) => {
            handle_sensor(&mut guard, &player_id, sample);
        }
        ParsedClientMessage::Watch { room } => {
            handle_watch(&mut guard, client_id, room.as_deref());
        }
        ParsedClientMessage::Ping { t } => {
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "pong",
                    "t": t,
                }),
                QueuePolicy::DropOnFull,
            );
        }
    }
}

fn handle_join(
    state: &mut ServerState,
    client_id: &str,
    player_id: &str,
    requested_room: Option<&str>,
    mode: GameMode,
) {
    let room = normalize_room(requested_room);
    if let Err(error) = state.engine.join(player_id, &room, mode) {
        warn!(%error, "join ignored");
        return;
    }

    let previous_room = state
        .clients
        .get_mut(client_id)
        .and_then(|ctx| ctx.room.replace(room.clone()));

    broadcast_except(
        state,
        client_id,
        &json!({
            "type": "player_joined",
            "playerId": player_id,
            "room": room,
            "mode": mode,
        }),
    );

    if let Some(previous_room) = previous_room.filter(|previous| *previous != room) {
        broadcast_state(state, &previous_room);
    }
    broadcast_state(state, &room);
}

/// Subscribes the client to a room's broadcasts without joining the race.
fn handle_watch(state: &mut ServerState, client_id: &str, requested_room: Option<&str>) {
    let room = normalize_room(requested_room);
    debug!(%client_id, %room, "client watching room");
    if let Some(ctx) = state.clients.get_mut(client_id) {
        ctx.room = Some(room);
    }
    let snapshot = state.engine.build_snapshot();
    send_to_client(
        state,
        client_id,
        &json!({
            "type": "state",
            "snapshot": snapshot,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn handle_sensor(state: &mut ServerState, player_id: &str, sample: TelemetrySample) {
    let outcome = match state.engine.handle_sensor(player_id, sample, now_ms()) {
        Ok(outcome) => outcome,
        Err(error) => {
            debug!(%error, "sensor ignored");
            return;
        }
    };

    if outcome.lap == LapProgress::Finished {
        let rankings = state.engine.refresh_rankings();
        if let Some(entry) = rankings.iter().find(|entry| entry.player_id == player_id) {
            info!(player_id, rank = entry.final_rank, "racer crossed the finish line");
        }
    }

    if let Some(room) = state.engine.player_room(player_id).map(str::to_string) {
        broadcast_state(state, &room);
    }
}

async fn handle_disconnect(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, client_id);
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    let Some(context) = state.clients.remove(client_id) else {
        return;
    };
    let _ = context.tx.try_send(OutboundMessage::Close {
        code: 1000,
        reason: "bye".to_string(),
    });

    let player_room = state
        .engine
        .player_room(&context.player_id)
        .map(str::to_string);
    if !state.engine.disconnect(&context.player_id) {
        return;
    }
    info!(%client_id, player_id = %context.player_id, "client disconnected");

    broadcast_except(
        state,
        client_id,
        &json!({
            "type": "player_left",
            "playerId": context.player_id,
        }),
    );
    if let Some(room) = player_room {
        broadcast_state(state, &room);
    }
}

fn start_tick_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            tick_timers(&mut guard);
        }
    });
}

fn tick_timers(state: &mut ServerState) {
    let applied = state.engine.run_due_tasks(now_ms());
    if applied == 0 {
        return;
    }
    debug!(applied, "deferred tasks fired");

    let rooms: BTreeSet<String> = state
        .clients
        .values()
        .filter_map(|ctx| ctx.room.clone())
        .collect();
    for room in rooms {
        broadcast_state(state, &room);
    }
}

fn broadcast_state(state: &mut ServerState, room: &str) {
    let snapshot = state.engine.build_snapshot();
    broadcast_to_room(
        state,
        room,
        &json!({
            "type": "state",
            "snapshot": snapshot,
        }),
    );
}

fn send_to_client(state: &mut ServerState, client_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id);
    }
}

/// State snapshots supersede each other, so a full queue just drops one.
fn broadcast_to_room(state: &ServerState, room: &str, message: &Value) {
    let payload = message.to_string();
    for (client_id, client) in &state.clients {
        if client.room.as_deref() != Some(room) {
            continue;
        }
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
        {
            debug!(%client_id, "outbound queue full; state dropped");
        }
    }
}

fn broadcast_except(state: &ServerState, excluded_client_id: &str, message: &Value) {
    let payload = message.to_string();
    for (client_id, client) in &state.clients {
        if client_id == excluded_client_id {
            continue;
        }
        let _ = client.tx.try_send(OutboundMessage::Text(payload.clone()));
    }
}

async fn send_error_to_client(state: &SharedState, client_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_to_client(
        &mut guard,
        client_id,
        &json!({
            "type": "error",
            "message": message,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}
