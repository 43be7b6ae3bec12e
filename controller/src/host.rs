use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};
use tracing::{info, warn};

use jacuzzi_common::{
    config::NetworkConfig, ControlLoop, OperatorCommand, OperatorReply, PlantView,
    RemoteStateSync, RemoteUpdate, RuntimeConfig, Supervisor, SyncError, TelemetryValue,
    TopicLayout, TubConfig, TubStatus, PATH_MILLIS, STATUS_OFFLINE, STATUS_ONLINE,
};

use crate::{
    clock::uptime_ms,
    session::SessionFlags,
    sim::{self, SharedTub, SimRelays, SimSensors, SimTub},
};

const SIM_START_TEMP_C: f32 = 24.0;

type HostControlLoop = ControlLoop<SimSensors, SimRelays, MqttSync>;
type SharedSupervisor = Arc<Mutex<Supervisor>>;

#[derive(Clone)]
struct AppState {
    status: watch::Receiver<Option<TubStatus>>,
    tub: Arc<TubConfig>,
    mqtt: AsyncClient,
    topics: TopicLayout,
    supervisor: Option<SharedSupervisor>,
}

struct AppStore {
    runtime_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: String,
    #[serde(default)]
    temp: Option<f32>,
    #[serde(default)]
    admin: bool,
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    reply: OperatorReply,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OperatorStatus {
    view: PlantView,
    shutdown_in_ms: Option<u64>,
}

/// MQTT-backed remote state sync. The rumqttc event loop runs on its own task
/// and feeds desired-state updates through `inbox`.
struct MqttSync {
    client: AsyncClient,
    topics: TopicLayout,
    session: Arc<SessionFlags>,
    announced: u64,
    watch_state: bool,
    inbox: mpsc::UnboundedReceiver<RemoteUpdate>,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl RemoteStateSync for MqttSync {
    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn reconnect(&mut self) -> Result<(), SyncError> {
        // rumqttc redials on the next event loop poll; this only waits for it.
        for attempt in 1..=self.reconnect_attempts {
            if self.is_connected() {
                return Ok(());
            }
            info!(
                "waiting for mqtt session ({attempt}/{})",
                self.reconnect_attempts
            );
            thread::sleep(self.reconnect_delay);
        }

        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            })
        }
    }

    fn poll(&mut self) -> Vec<RemoteUpdate> {
        if self.session.claim_announcement(&mut self.announced) {
            if let Err(err) = announce_session(&self.client, &self.topics, self.watch_state) {
                warn!("mqtt session setup failed: {err:#}");
                self.announced = 0;
            }
        }

        let mut updates = Vec::new();
        while let Ok(update) = self.inbox.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn publish(&mut self, path: &str, value: &TelemetryValue) -> Result<(), SyncError> {
        self.client
            .try_publish(self.topics.state(path), QoS::AtLeastOnce, true, value.to_string())
            .map_err(|err| SyncError::Publish(err.to_string()))
    }

    fn log_error(&mut self, message: &str) -> Result<(), SyncError> {
        self.client
            .try_publish(self.topics.error_log(), QoS::AtLeastOnce, false, message)
            .map_err(|err| SyncError::Publish(err.to_string()))
    }
}

/// Routes inbound publishes to the control loop inbox, the simulated tub and
/// the supervisor.
struct MessageRouter {
    topics: TopicLayout,
    inbox: mpsc::UnboundedSender<RemoteUpdate>,
    tub: SharedTub,
    supervisor: Option<SharedSupervisor>,
    max_payload_bytes: usize,
}

impl MessageRouter {
    /// Returns the desired-state writes the supervisor wants published.
    fn route(&self, topic: &str, payload: &[u8], now_ms: u64) -> anyhow::Result<Vec<RemoteUpdate>> {
        if payload.len() > self.max_payload_bytes {
            warn!(
                "dropping oversized MQTT payload on topic {} ({} bytes)",
                topic,
                payload.len()
            );
            return Ok(Vec::new());
        }

        let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;

        if let Some(path) = self.topics.desired_path(topic) {
            if let Some(supervisor) = &self.supervisor {
                lock(supervisor).observe_desired(path, message);
            }
            self.inbox
                .send(RemoteUpdate::new(path, message))
                .context("control loop inbox closed")?;
        } else if let Some(path) = self.topics.state_path(topic) {
            if let Some(supervisor) = &self.supervisor {
                let mut supervisor = lock(supervisor);
                supervisor.observe_state(path, message);
                if path == PATH_MILLIS {
                    return Ok(supervisor.check(now_ms));
                }
            }
        } else if let Some(path) = self.topics.sim_path(topic) {
            if !sim::apply_sim_command(&self.tub, path, message) {
                warn!("unknown sim path `{path}`");
            }
        }

        Ok(Vec::new())
    }
}

/// Retained `offline` on the status topic, sent by the broker when the session drops.
fn offline_will(topics: &TopicLayout) -> LastWill {
    LastWill::new(topics.status(), STATUS_OFFLINE, QoS::AtLeastOnce, true)
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime.network);
    runtime.sanitize();

    let topics = TopicLayout::new(
        runtime.network.topic_root.clone(),
        runtime.network.device_id.clone(),
    );

    let mut mqtt_options = MqttOptions::new(
        format!("jacuzzi-{}", topics.device_id()),
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(10));
    mqtt_options.set_last_will(offline_will(&topics));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }
    if runtime.network.mqtt_tls {
        warn!("mqtt_tls is only honoured by ESP32 builds; host connects in plain text");
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let session = Arc::new(SessionFlags::default());
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

    let water_present = std::env::var("SIM_WATER_PRESENT")
        .map(|value| jacuzzi_common::command::parse_bool_payload(&value))
        .unwrap_or(true);
    let tub: SharedTub = Arc::new(Mutex::new(SimTub::new(water_present, SIM_START_TEMP_C)));

    let supervisor = runtime.supervisor.enabled.then(|| {
        info!("supervisor enabled");
        Arc::new(Mutex::new(Supervisor::new(runtime.supervisor.clone())))
    });

    let router = MessageRouter {
        topics: topics.clone(),
        inbox: inbox_tx,
        tub: tub.clone(),
        supervisor: supervisor.clone(),
        max_payload_bytes: runtime.tub.max_payload_bytes,
    };
    spawn_mqtt_loop(mqtt.clone(), eventloop, router, session.clone());

    let sync = MqttSync {
        client: mqtt.clone(),
        topics: topics.clone(),
        session,
        announced: 0,
        watch_state: supervisor.is_some(),
        inbox: inbox_rx,
        reconnect_attempts: runtime.tub.reconnect_attempts,
        reconnect_delay: Duration::from_millis(runtime.tub.reconnect_delay_ms),
    };
    let control = ControlLoop::new(
        runtime.tub.clone(),
        SimSensors::new(tub.clone()),
        SimRelays::new(tub),
        sync,
    );

    let (status_tx, status_rx) = watch::channel(None);
    spawn_control_loop(control, status_tx)?;

    let app_state = AppState {
        status: status_rx,
        tub: Arc::new(runtime.tub),
        mqtt,
        topics,
        supervisor,
    };
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/config", get(handle_get_config))
        .route("/api/operator", get(handle_get_operator))
        .route("/api/command", post(handle_post_command))
        .with_state(app_state);

    let port = std::env::var("JACUZZI_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("jacuzzi controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn apply_env_overrides(network: &mut NetworkConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Ok(device_id) = std::env::var("JACUZZI_DEVICE_ID") {
        network.device_id = device_id;
    }
}

fn spawn_mqtt_loop(
    mqtt: AsyncClient,
    mut eventloop: EventLoop,
    router: MessageRouter,
    session: Arc<SessionFlags>,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    match router.route(&message.topic, &message.payload, uptime_ms()) {
                        Ok(writes) => publish_desired(&mqtt, &router.topics, writes),
                        Err(err) => warn!("mqtt message handling error: {err:#}"),
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    session.mark_connected();
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    warn!("mqtt broker closed the session");
                    session.mark_disconnected();
                }
                Ok(_) => {}
                Err(err) => {
                    session.mark_disconnected();
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Subscribe and announce availability. Uses the non-blocking client calls so
/// the control thread never waits on the event loop.
fn announce_session(
    mqtt: &AsyncClient,
    topics: &TopicLayout,
    watch_state: bool,
) -> anyhow::Result<()> {
    mqtt.try_subscribe(topics.desired_wildcard(), QoS::AtLeastOnce)
        .context("failed to subscribe to desired state")?;
    mqtt.try_subscribe(topics.sim_wildcard(), QoS::AtMostOnce)
        .context("failed to subscribe to sim topics")?;
    if watch_state {
        mqtt.try_subscribe(topics.state_wildcard(), QoS::AtMostOnce)
            .context("failed to subscribe to tub state")?;
    }
    mqtt.try_publish(topics.status(), QoS::AtLeastOnce, true, STATUS_ONLINE)
        .context("failed to publish online status")?;
    Ok(())
}

fn publish_desired(mqtt: &AsyncClient, topics: &TopicLayout, writes: Vec<RemoteUpdate>) {
    for update in writes {
        if let Err(err) = mqtt.try_publish(
            topics.desired(&update.path),
            QoS::AtLeastOnce,
            true,
            update.payload,
        ) {
            warn!("supervisor write to {} failed: {err}", update.path);
        }
    }
}

fn spawn_control_loop(
    mut control: HostControlLoop,
    status_tx: watch::Sender<Option<TubStatus>>,
) -> anyhow::Result<()> {
    let tick_interval = Duration::from_millis(control.config().tick_interval_ms);

    thread::Builder::new()
        .name("control-loop".into())
        .spawn(move || loop {
            let now_ms = uptime_ms();
            control.tick(now_ms);
            status_tx.send_replace(Some(control.status(now_ms)));

            if !tick_interval.is_zero() {
                thread::sleep(tick_interval);
            }
        })
        .context("failed to spawn control loop thread")?;

    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = *state.status.borrow();
    match status {
        Some(status) => Json(status).into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Control loop has not completed a tick yet",
        ),
    }
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tub.as_ref().clone())
}

async fn handle_get_operator(State(state): State<AppState>) -> impl IntoResponse {
    let Some(supervisor) = state.supervisor.as_ref() else {
        return error_response(StatusCode::NOT_FOUND, "Supervisor is disabled");
    };

    let now_ms = uptime_ms();
    let supervisor = lock(supervisor);
    Json(OperatorStatus {
        view: *supervisor.view(),
        shutdown_in_ms: supervisor
            .shutdown_deadline_ms()
            .map(|deadline| deadline.saturating_sub(now_ms)),
    })
    .into_response()
}

async fn handle_post_command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    let Some(supervisor) = state.supervisor.as_ref() else {
        return error_response(StatusCode::NOT_FOUND, "Supervisor is disabled");
    };
    let Some(command) = OperatorCommand::from_menu(&request.command, request.temp) else {
        return error_response(StatusCode::BAD_REQUEST, "Unknown command");
    };

    let (reply, writes) = lock(supervisor).handle(command, request.admin, uptime_ms());

    for update in writes {
        if let Err(err) = state
            .mqtt
            .publish(
                state.topics.desired(&update.path),
                QoS::AtLeastOnce,
                true,
                update.payload,
            )
            .await
        {
            warn!("operator write to {} failed: {err}", update.path);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Broker unavailable");
        }
    }

    Json(CommandResponse {
        message: reply.to_string(),
        reply,
    })
    .into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("JACUZZI_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.jacuzzi"));

        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read_to_string(&self.runtime_path).await {
            Ok(raw) => Ok(RuntimeConfig::from_json(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn lock(supervisor: &SharedSupervisor) -> MutexGuard<'_, Supervisor> {
    supervisor.lock().unwrap_or_else(PoisonError::into_inner)
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
