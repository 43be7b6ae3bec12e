use core::convert::TryInto;
use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use anyhow::anyhow;
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, IOPin, Input, InputOutput, Output, OutputPin, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::{self, esp, EspError},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use one_wire_bus::{Address, OneWire};

use jacuzzi_common::{
    config::NetworkConfig, ActuatorGateway, ControlLoop, RemoteStateSync, RemoteUpdate,
    RuntimeConfig, SensorGateway, SyncError, TelemetryValue, TopicLayout, DISCONNECT_SENTINEL_C,
    STATUS_OFFLINE, STATUS_ONLINE,
};

use crate::{clock::uptime_ms, session::SessionFlags};

const NVS_NAMESPACE: &str = "jacuzzi";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const BUBBLES_RELAY_PIN: i32 = 5;
const HEATER_RELAY_PIN: i32 = 18;
const LEVEL_SENSOR_PIN: i32 = 16;
const DS18B20_PIN: i32 = 4;
const STATUS_LED_PIN: i32 = 2;

const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const MQTT_ERROR_BACKOFF: Duration = Duration::from_secs(2);

pub fn run() -> anyhow::Result<()> {
    sys::link_patches();
    EspLogger::initialize_default();

    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    // Relays are claimed first so they sit de-energized through the slow bring-up.
    let relays = EspRelays::new(pins.gpio5.downgrade_output(), pins.gpio18.downgrade_output())?;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = match nvs_store.load_runtime_config() {
        Ok(runtime) => runtime,
        Err(err) => {
            warn!("failed to load runtime config from NVS, using defaults: {err:#}");
            RuntimeConfig::default()
        }
    };
    ensure_network_defaults(&mut runtime);
    runtime.sanitize();

    let sensors = EspSensors::new(pins.gpio16.downgrade(), pins.gpio4.downgrade())?;
    let status_led = init_status_led(pins.gpio2.downgrade_output());

    let watchdog = TaskWatchdog::subscribe(WATCHDOG_TIMEOUT_SEC)?;

    let attempts = runtime.tub.reconnect_attempts;
    let retry_delay = Duration::from_millis(runtime.tub.reconnect_delay_ms);

    let mut wifi = configure_wifi(modem, sys_loop, nvs_partition, &runtime.network)?;
    if let Err(err) = connect_wifi(&mut wifi, attempts, retry_delay, watchdog) {
        warn!("{err:#}; the control loop keeps retrying with relays off");
    }
    if let Err(err) = esp!(unsafe { sys::esp_wifi_set_ps(sys::wifi_ps_type_t_WIFI_PS_NONE) }) {
        warn!("wifi power save left enabled: {err}");
    }

    let topics = TopicLayout::new(
        runtime.network.topic_root.as_str(),
        runtime.network.device_id.as_str(),
    );
    let (client, conn) = create_mqtt_client(&runtime.network, &topics)?;
    let client = Arc::new(Mutex::new(client));
    let session = Arc::new(SessionFlags::default());
    let (inbox_tx, inbox) = mpsc::channel();

    spawn_mqtt_receiver(
        conn,
        topics.clone(),
        session.clone(),
        inbox_tx,
        runtime.tub.max_payload_bytes,
    )?;

    let sync = EspMqttSync {
        wifi,
        client,
        topics,
        session,
        announced: 0,
        inbox,
        status_led,
        attempts,
        retry_delay,
        watchdog,
    };

    let tick_interval = Duration::from_millis(runtime.tub.tick_interval_ms);
    let mut control = ControlLoop::new(runtime.tub, sensors, relays, sync);
    info!(
        "jacuzzi controller running (bubbles GPIO{BUBBLES_RELAY_PIN}, heater GPIO{HEATER_RELAY_PIN}, level GPIO{LEVEL_SENSOR_PIN})"
    );

    loop {
        watchdog.feed();
        control.tick(uptime_ms());
        thread::sleep(tick_interval);
    }
}

fn ensure_network_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }
    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
    if let Some(host) = option_env!("MQTT_HOST") {
        if runtime.network.mqtt_host == NetworkConfig::default().mqtt_host {
            runtime.network.mqtt_host = host.to_string();
        }
    }
}

/// Active-low relay board: driving the pin low energizes the coil.
struct EspRelays {
    bubbles: PinDriver<'static, AnyOutputPin, Output>,
    heater: PinDriver<'static, AnyOutputPin, Output>,
}

impl EspRelays {
    fn new(bubbles_pin: AnyOutputPin, heater_pin: AnyOutputPin) -> anyhow::Result<Self> {
        let mut bubbles = PinDriver::output(bubbles_pin)?;
        bubbles.set_high()?;
        let mut heater = PinDriver::output(heater_pin)?;
        heater.set_high()?;

        Ok(Self { bubbles, heater })
    }

    fn drive(
        pin: &mut PinDriver<'static, AnyOutputPin, Output>,
        name: &str,
        energized: bool,
    ) {
        let result = if energized {
            pin.set_low()
        } else {
            pin.set_high()
        };
        if let Err(err) = result {
            warn!("failed to drive {name} relay: {err}");
        }
    }
}

impl ActuatorGateway for EspRelays {
    fn set_bubbles(&mut self, energized: bool) {
        Self::drive(&mut self.bubbles, "bubbles", energized);
    }

    fn set_heater(&mut self, energized: bool) {
        Self::drive(&mut self.heater, "heater", energized);
    }
}

struct EspSensors {
    level: PinDriver<'static, AnyIOPin, Input>,
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    ds18_address: Option<Address>,
    delay: Ets,
}

impl EspSensors {
    fn new(level_pin: AnyIOPin, ds18_pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut level = PinDriver::input(level_pin)?;
        level.set_pull(Pull::Up)?;

        let mut one_wire_pin = PinDriver::input_output_od(ds18_pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut sensors = Self {
            level,
            one_wire,
            ds18_address: None,
            delay: Ets,
        };
        sensors.refresh_ds18_address();
        Ok(sensors)
    }

    fn refresh_ds18_address(&mut self) {
        let mut found = None;
        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => {
                    found = Some(address);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        self.ds18_address = found;
        match found {
            Some(address) => info!("DS18B20 ready on GPIO{DS18B20_PIN} ({address:?})"),
            None => warn!("no DS18B20 found on GPIO{DS18B20_PIN}"),
        }
    }

    fn read_ds18b20(&mut self) -> Option<f32> {
        if self.ds18_address.is_none() {
            self.refresh_ds18_address();
        }

        let address = self.ds18_address?;
        let sensor = match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(sensor) => sensor,
            Err(err) => {
                warn!("invalid DS18B20 address {address:?}: {err:?}");
                self.ds18_address = None;
                return None;
            }
        };

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            warn!("failed to start DS18B20 conversion: {err:?}");
            self.ds18_address = None;
            return None;
        }

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);

        match sensor.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => Some(data.temperature),
            Err(err) => {
                warn!("failed to read DS18B20 data: {err:?}");
                self.ds18_address = None;
                None
            }
        }
    }
}

impl SensorGateway for EspSensors {
    fn water_present(&mut self) -> bool {
        self.level.is_low()
    }

    fn temperature_c(&mut self) -> f32 {
        self.read_ds18b20().unwrap_or(DISCONNECT_SENTINEL_C)
    }
}

struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl StatusLed {
    fn set(&mut self, lit: bool) {
        let result = if lit {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(err) = result {
            warn!("failed to drive status LED: {err}");
        }
    }
}

fn init_status_led(pin: AnyOutputPin) -> Option<StatusLed> {
    match PinDriver::output(pin) {
        Ok(pin) => {
            let mut led = StatusLed { pin };
            led.set(false);
            Some(led)
        }
        Err(err) => {
            warn!("status LED unavailable on GPIO{STATUS_LED_PIN}: {err}");
            None
        }
    }
}

struct EspMqttSync {
    wifi: BlockingWifi<EspWifi<'static>>,
    client: Arc<Mutex<EspMqttClient<'static>>>,
    topics: TopicLayout,
    session: Arc<SessionFlags>,
    announced: u64,
    inbox: Receiver<RemoteUpdate>,
    status_led: Option<StatusLed>,
    attempts: u32,
    retry_delay: Duration,
    watchdog: TaskWatchdog,
}

impl EspMqttSync {
    fn send(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SyncError> {
        if !self.session.is_connected() {
            return Err(SyncError::NotConnected);
        }
        lock(&self.client)
            .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes())
            .map(|_| ())
            .map_err(|err| SyncError::Publish(err.to_string()))
    }

    fn set_led(&mut self, lit: bool) {
        if let Some(led) = self.status_led.as_mut() {
            led.set(lit);
        }
    }
}

impl RemoteStateSync for EspMqttSync {
    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.session.is_connected()
    }

    fn reconnect(&mut self) -> Result<(), SyncError> {
        if !self.wifi.is_connected().unwrap_or(false) {
            warn!("wifi link down; re-associating");
            if let Err(err) =
                connect_wifi(&mut self.wifi, self.attempts, self.retry_delay, self.watchdog)
            {
                warn!("{err:#}");
                return Err(SyncError::ReconnectExhausted {
                    attempts: self.attempts,
                });
            }
        }

        // esp-mqtt redials on its own once the station has an address.
        for _ in 0..self.attempts {
            if self.session.is_connected() {
                return Ok(());
            }
            self.watchdog.feed();
            thread::sleep(self.retry_delay);
        }

        if self.session.is_connected() {
            Ok(())
        } else {
            Err(SyncError::ReconnectExhausted {
                attempts: self.attempts,
            })
        }
    }

    fn poll(&mut self) -> Vec<RemoteUpdate> {
        if self.session.claim_announcement(&mut self.announced) {
            if let Err(err) = announce_session(&self.client, &self.topics) {
                warn!("mqtt session setup failed: {err}");
                self.announced = 0;
            }
        }

        self.inbox.try_iter().collect()
    }

    fn publish(&mut self, path: &str, value: &TelemetryValue) -> Result<(), SyncError> {
        self.send(&self.topics.state(path), &value.to_string(), true)
    }

    fn publish_all(&mut self, entries: &[(&str, TelemetryValue)]) -> Result<(), SyncError> {
        self.set_led(true);
        let result = entries
            .iter()
            .try_for_each(|(path, value)| self.publish(path, value));
        self.set_led(false);
        result
    }

    fn log_error(&mut self, message: &str) -> Result<(), SyncError> {
        self.send(&self.topics.error_log(), message, false)
    }
}

fn lock(client: &Mutex<EspMqttClient<'static>>) -> MutexGuard<'_, EspMqttClient<'static>> {
    client.lock().unwrap_or_else(PoisonError::into_inner)
}

fn configure_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);
    Ok(wifi)
}

fn connect_wifi(
    wifi: &mut BlockingWifi<EspWifi<'static>>,
    attempts: u32,
    retry_delay: Duration,
    watchdog: TaskWatchdog,
) -> anyhow::Result<()> {
    for attempt in 1..=attempts {
        info!("wifi connect attempt {attempt}/{attempts}");
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    return Ok(());
                }
                Err(err) => warn!("wifi netif up failed on attempt {attempt}: {err:#}"),
            },
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        let _ = wifi.disconnect();
        watchdog.feed();
        thread::sleep(retry_delay);
    }

    Err(anyhow!("wifi not connected after {attempts} attempts"))
}

fn create_mqtt_client(
    network: &NetworkConfig,
    topics: &TopicLayout,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let scheme = if network.mqtt_tls { "mqtts" } else { "mqtt" };
    let url = format!("{scheme}://{}:{}", network.mqtt_host, network.mqtt_port);
    let client_id = format!("jacuzzi-{}", topics.device_id());
    let status_topic = topics.status();

    let conf = MqttClientConfiguration {
        client_id: Some(client_id.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        keep_alive_interval: Some(Duration::from_secs(10)),
        lwt: Some(LwtConfiguration {
            topic: status_topic.as_str(),
            payload: STATUS_OFFLINE.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        crt_bundle_attach: if network.mqtt_tls {
            Some(sys::esp_crt_bundle_attach)
        } else {
            None
        },
        ..Default::default()
    };

    info!("mqtt broker {url} as {client_id}");
    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

/// Runs on the control thread; the receiver must not call into the client
/// while it holds an event.
fn announce_session(
    client: &Mutex<EspMqttClient<'static>>,
    topics: &TopicLayout,
) -> Result<(), EspError> {
    let mut client = lock(client);
    client.subscribe(&topics.desired_wildcard(), QoS::AtLeastOnce)?;
    client.publish(
        &topics.status(),
        QoS::AtLeastOnce,
        true,
        STATUS_ONLINE.as_bytes(),
    )?;
    info!("subscribed to {}", topics.desired_wildcard());
    Ok(())
}

fn spawn_mqtt_receiver(
    mut conn: EspMqttConnection,
    topics: TopicLayout,
    session: Arc<SessionFlags>,
    inbox: Sender<RemoteUpdate>,
    max_payload_bytes: usize,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        session.mark_connected();
                    }
                    EventPayload::Disconnected => {
                        warn!("mqtt disconnected");
                        session.mark_disconnected();
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        if !matches!(details, Details::Complete) {
                            continue;
                        }
                        if data.len() > max_payload_bytes {
                            warn!(
                                "dropping oversized MQTT payload on {topic} ({} bytes)",
                                data.len()
                            );
                            continue;
                        }
                        let Some(path) = topics.desired_path(topic) else {
                            continue;
                        };
                        match core::str::from_utf8(data) {
                            Ok(payload) => {
                                if inbox.send(RemoteUpdate::new(path, payload)).is_err() {
                                    warn!("control loop gone; dropping update for {path}");
                                }
                            }
                            Err(err) => warn!("non UTF-8 payload on {topic}: {err}"),
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    session.mark_disconnected();
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(MQTT_ERROR_BACKOFF);
                }
            }
        })?;
    Ok(())
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(RuntimeConfig::from_json(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

/// Handle on the ESP-IDF task watchdog for the control task.
#[derive(Debug, Clone, Copy)]
struct TaskWatchdog;

impl TaskWatchdog {
    /// Configure the watchdog and register the calling task. Both steps accept
    /// an already-initialized watchdog.
    fn subscribe(timeout_sec: u32) -> anyhow::Result<Self> {
        let config = sys::esp_task_wdt_config_t {
            timeout_ms: timeout_sec.saturating_mul(1_000),
            idle_core_mask: 0,
            trigger_panic: true,
        };
        accept_invalid_state(esp!(unsafe { sys::esp_task_wdt_init(&config) }))
            .map_err(|err| anyhow!("task watchdog init failed: {err}"))?;
        accept_invalid_state(esp!(unsafe { sys::esp_task_wdt_add(core::ptr::null_mut()) }))
            .map_err(|err| anyhow!("task watchdog subscribe failed: {err}"))?;

        info!("task watchdog armed ({timeout_sec} s)");
        Ok(Self)
    }

    fn feed(self) {
        if let Err(err) = esp!(unsafe { sys::esp_task_wdt_reset() }) {
            warn!("task watchdog feed failed: {err}");
        }
    }
}

fn accept_invalid_state(result: Result<(), EspError>) -> Result<(), EspError> {
    match result {
        Err(err) if err.code() == sys::ESP_ERR_INVALID_STATE => Ok(()),
        other => other,
    }
}
