use std::{net::SocketAddr, thread, time::Duration};

use anyhow::Context;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use tokio::{net::TcpListener, runtime::Handle};
use tower::ServiceExt;
use tracing::{error, info, warn};

use lightnode_common::{
    ConnectionStatus, Delay, Display, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    Network, NodeConfig, NodeController, NodeError, NodeParts, OutputPin, TemperatureSensor,
};

use crate::mock::MockService;

const MAX_HTTP_BODY: usize = 4096;
const SIM_ENDPOINT: &str = "http://mock.lightnode";
const SIM_SSID: &str = "lightnode-sim";
const SIM_API_KEY: &str = "dev-key";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    let service = MockService::new(&config.service.api_key);
    let router = service.router();

    if let Some(port) = std::env::var("LIGHTNODE_MOCK_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        spawn_mock_listener(router.clone(), port).await?;
    }

    let drop_every = std::env::var("LIGHTNODE_SIM_DROP_EVERY")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0);

    let parts = NodeParts {
        network: SimulatedLink::new(drop_every),
        display: ConsoleDisplay::new(
            config.hardware.lcd_columns as usize,
            config.hardware.lcd_rows as usize,
        ),
        sensor: SimulatedSensor::default(),
        pin: SimulatedPin::default(),
        http: RouterTransport::new(router, Handle::current()),
        delay: ThreadDelay,
    };

    let outcome = tokio::task::spawn_blocking(move || {
        let mut controller = NodeController::new(config, parts);
        let config = controller.config();
        info!(
            "simulated node polling {} every {}ms",
            config.service.endpoint, config.timing.poll_interval_ms
        );
        controller.run()
    })
    .await
    .context("node loop panicked")?;

    match outcome {
        Ok(never) => match never {},
        Err(err) => {
            error!("node halted: {err}");
            Err(err).context("simulated node halted")
        }
    }
}

fn load_config() -> anyhow::Result<NodeConfig> {
    let base = match std::env::var("LIGHTNODE_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read node config {path}"))?;
            serde_json::from_str::<NodeConfig>(&raw)
                .with_context(|| format!("failed to parse node config {path}"))?
        }
        Err(_) => NodeConfig::default(),
    };

    resolve_config(base, |name| std::env::var(name).ok())
}

/// Layers environment overrides and simulation defaults over `base`, in that order.
fn resolve_config(
    mut config: NodeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<NodeConfig> {
    if let Some(ssid) = lookup("LIGHTNODE_WIFI_SSID") {
        config.network.wifi_ssid = ssid;
    }
    if let Some(pass) = lookup("LIGHTNODE_WIFI_PASS") {
        config.network.wifi_pass = pass;
    }
    if let Some(channel) = lookup("LIGHTNODE_WIFI_CHANNEL").and_then(|value| value.parse::<u8>().ok())
    {
        config.network.wifi_channel = Some(channel);
    }
    if let Some(endpoint) = lookup("LIGHTNODE_ENDPOINT") {
        config.service.endpoint = endpoint;
    }
    if let Some(api_key) = lookup("LIGHTNODE_API_KEY") {
        config.service.api_key = api_key;
    }

    if config.network.wifi_ssid.is_empty() {
        config.network.wifi_ssid = SIM_SSID.to_string();
    }
    if config.service.endpoint.is_empty() {
        config.service.endpoint = SIM_ENDPOINT.to_string();
    }
    if config.service.api_key.is_empty() {
        config.service.api_key = SIM_API_KEY.to_string();
    }

    config.sanitize();
    config.validate().context("invalid node configuration")?;
    Ok(config)
}

async fn spawn_mock_listener(router: Router, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind mock service at {addr}"))?;

    info!("mock service listening on http://{addr}");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            warn!("mock service stopped: {err}");
        }
    });
    Ok(())
}

/// Link that is up after a short join and optionally drops on a fixed cadence.
struct SimulatedLink {
    status: ConnectionStatus,
    join_checks_left: u32,
    drop_every: Option<u64>,
    checks: u64,
}

impl SimulatedLink {
    fn new(drop_every: Option<u64>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            join_checks_left: 0,
            drop_every,
            checks: 0,
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!("simulated wifi {}", status.as_str());
            self.status = status;
        }
    }
}

impl Network for SimulatedLink {
    fn begin(&mut self) -> Result<(), NodeError> {
        self.join_checks_left = 2;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        // Join checks never count toward the drop cadence.
        if self.join_checks_left > 0 {
            self.join_checks_left -= 1;
            if self.join_checks_left == 0 {
                self.set_status(ConnectionStatus::Connected);
                self.checks = 0;
            }
            return self.status.is_connected();
        }

        self.checks = self.checks.saturating_add(1);
        if self
            .drop_every
            .is_some_and(|every| self.checks % every == 0)
        {
            self.set_status(ConnectionStatus::Disconnected);
        }

        self.status.is_connected()
    }

    fn reconnect(&mut self) {
        self.join_checks_left = 1;
    }

    fn ip_address(&mut self) -> Option<String> {
        self.status
            .is_connected()
            .then(|| "127.0.0.1".to_string())
    }
}

struct ConsoleDisplay {
    lines: Vec<String>,
    columns: usize,
}

impl ConsoleDisplay {
    fn new(columns: usize, rows: usize) -> Self {
        Self {
            lines: vec![String::new(); rows],
            columns,
        }
    }
}

impl Display for ConsoleDisplay {
    fn clear(&mut self) -> Result<(), NodeError> {
        self.lines.iter_mut().for_each(String::clear);
        Ok(())
    }

    fn write_line(&mut self, row: u8, text: &str) -> Result<(), NodeError> {
        let line = self
            .lines
            .get_mut(row as usize)
            .ok_or_else(|| NodeError::Display(format!("row {row} out of range")))?;
        *line = text.chars().take(self.columns).collect();
        info!(target: "lcd", "[{row}] |{line}|");
        Ok(())
    }

    fn columns(&self) -> usize {
        self.columns
    }
}

#[derive(Default)]
struct SimulatedSensor {
    tick: u64,
}

impl TemperatureSensor for SimulatedSensor {
    fn read_celsius(&mut self) -> Result<f32, NodeError> {
        self.tick = self.tick.saturating_add(1);
        Ok(21.0 + (self.tick % 8) as f32 * 0.25)
    }
}

#[derive(Default)]
struct SimulatedPin {
    level: Option<bool>,
}

impl OutputPin for SimulatedPin {
    fn set_level(&mut self, high: bool) -> Result<(), NodeError> {
        if self.level != Some(high) {
            info!("output pin {}", if high { "HIGH" } else { "LOW" });
        }
        self.level = Some(high);
        Ok(())
    }
}

struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Sends requests straight into the mock router. Must be used off the async runtime.
struct RouterTransport {
    router: Router,
    runtime: Handle,
}

impl RouterTransport {
    fn new(router: Router, runtime: Handle) -> Self {
        Self { router, runtime }
    }
}

impl HttpTransport for RouterTransport {
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, NodeError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Put => Method::PUT,
        };

        let mut builder = Request::builder().method(method).uri(request.url);
        for (name, value) in request.headers {
            builder = builder.header(*name, *value);
        }
        let body = request
            .body
            .map(|body| Body::from(body.to_vec()))
            .unwrap_or_else(Body::empty);
        let http_request = builder
            .body(body)
            .map_err(|err| NodeError::Transport(err.to_string()))?;

        let router = self.router.clone();
        self.runtime.block_on(async move {
            let response = match router.oneshot(http_request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            let status = response.status().as_u16();
            let bytes = to_bytes(response.into_body(), MAX_HTTP_BODY)
                .await
                .map_err(|err| NodeError::Transport(err.to_string()))?;
            Ok(HttpResponse::new(
                status,
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use lightnode_common::{Iteration, Telemetry};

    use super::*;

    struct NoDelay;

    impl Delay for NoDelay {
        fn delay_ms(&mut self, _ms: u64) {}
    }

    fn sim_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.network.wifi_ssid = SIM_SSID.to_string();
        config.service.endpoint = SIM_ENDPOINT.to_string();
        config.service.api_key = SIM_API_KEY.to_string();
        config
    }

    #[test]
    fn simulated_link_joins_and_drops_on_cadence() {
        let mut link = SimulatedLink::new(Some(3));
        link.begin().unwrap();

        assert!(!link.is_connected());
        assert!(link.is_connected());
        assert!(link.is_connected());
        assert!(link.is_connected());
        assert!(!link.is_connected());
        assert!(!link.is_connected());

        link.reconnect();
        assert!(link.is_connected());
        assert!(link.is_connected());
    }

    #[test]
    fn env_overrides_file_and_sim_defaults_fill_gaps() {
        let mut base = NodeConfig::default();
        base.network.wifi_ssid = "file-ssid".to_string();
        base.service.endpoint = "https://file.example.com".to_string();
        base.timing.poll_interval_ms = 7_000;

        let config = resolve_config(base, |name| match name {
            "LIGHTNODE_ENDPOINT" => Some("https://env.example.com".to_string()),
            "LIGHTNODE_WIFI_CHANNEL" => Some("11".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.network.wifi_ssid, "file-ssid");
        assert_eq!(config.network.wifi_channel, Some(11));
        assert_eq!(config.service.endpoint, "https://env.example.com");
        assert_eq!(config.service.api_key, SIM_API_KEY);
        assert_eq!(config.timing.poll_interval_ms, 7_000);
    }

    #[test]
    fn empty_environment_falls_back_to_simulation() {
        let config = resolve_config(NodeConfig::default(), |_| None).unwrap();

        assert_eq!(config.network.wifi_ssid, SIM_SSID);
        assert_eq!(config.service.endpoint, SIM_ENDPOINT);
        assert_eq!(config.service.api_key, SIM_API_KEY);
    }

    #[test]
    fn invalid_endpoint_override_is_rejected() {
        let result = resolve_config(NodeConfig::default(), |name| {
            (name == "LIGHTNODE_ENDPOINT").then(|| "mock.lightnode".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn console_display_clips_to_width() {
        let mut display = ConsoleDisplay::new(4, 2);
        display.write_line(1, "abcdef").unwrap();

        assert_eq!(display.lines[1], "abcd");
        assert!(display.write_line(2, "x").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn node_round_trip_against_mock_service() {
        let service = MockService::new(SIM_API_KEY);
        service.set_light(true).await;
        let router = service.router();
        let runtime = Handle::current();

        let (iteration, pin, lines) = tokio::task::spawn_blocking(move || {
            let mut controller = NodeController::new(
                sim_config(),
                NodeParts {
                    network: SimulatedLink::new(None),
                    display: ConsoleDisplay::new(16, 2),
                    sensor: SimulatedSensor::default(),
                    pin: SimulatedPin::default(),
                    http: RouterTransport::new(router, runtime),
                    delay: NoDelay,
                },
            );
            controller.start().unwrap();
            let iteration = controller.step();
            let parts = controller.parts();
            (iteration, parts.pin.level, parts.display.lines.clone())
        })
        .await
        .unwrap();

        assert_eq!(
            iteration,
            Iteration::Completed {
                light: Ok(true),
                report: Ok(Telemetry {
                    temp_c: 21.25,
                    message: "ok".to_string(),
                }),
            }
        );
        assert_eq!(pin, Some(true));
        assert_eq!(lines[0].trim_end(), "Light: ON");
        assert_eq!(lines[1].trim_end(), "Temp: 21.25 ok");

        let state = service.snapshot().await;
        assert_eq!(state.last_temp_c, Some(21.25));
        assert_eq!(state.reports, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wrong_api_key_surfaces_as_http_error() {
        let service = MockService::new("server-key");
        let router = service.router();
        let runtime = Handle::current();

        let iteration = tokio::task::spawn_blocking(move || {
            let mut controller = NodeController::new(
                sim_config(),
                NodeParts {
                    network: SimulatedLink::new(None),
                    display: ConsoleDisplay::new(16, 2),
                    sensor: SimulatedSensor::default(),
                    pin: SimulatedPin::default(),
                    http: RouterTransport::new(router, runtime),
                    delay: NoDelay,
                },
            );
            controller.start().unwrap();
            controller.tick()
        })
        .await
        .unwrap();

        assert_eq!(
            iteration,
            Iteration::Completed {
                light: Err(NodeError::HttpStatus(401)),
                report: Err(NodeError::HttpStatus(401)),
            }
        );
        assert_eq!(service.snapshot().await.reports, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drop_cadence_applies_only_after_startup() {
        let service = MockService::new(SIM_API_KEY);
        let router = service.router();
        let runtime = Handle::current();

        let (started, iterations) = tokio::task::spawn_blocking(move || {
            let mut controller = NodeController::new(
                sim_config(),
                NodeParts {
                    network: SimulatedLink::new(Some(3)),
                    display: ConsoleDisplay::new(16, 2),
                    sensor: SimulatedSensor::default(),
                    pin: SimulatedPin::default(),
                    http: RouterTransport::new(router, runtime),
                    delay: NoDelay,
                },
            );
            let started = controller.start();
            let iterations: Vec<bool> = (0..4)
                .map(|_| matches!(controller.tick(), Iteration::Reconnecting))
                .collect();
            (started, iterations)
        })
        .await
        .unwrap();

        assert_eq!(started, Ok(()));
        assert_eq!(iterations, vec![false, false, true, false]);
        assert_eq!(service.snapshot().await.reports, 3);
    }
}
