use core::convert::Infallible;

use log::{error, info, warn};
use serde::de::DeserializeOwned;

use crate::{
    api::{self, CONTENT_TYPE_JSON, HEADER_API_KEY, HEADER_CONTENT_TYPE, PATH_LIGHT, PATH_TEMP},
    config::NodeConfig,
    error::NodeError,
    hal::{Delay, Display, HttpRequest, HttpTransport, Network, OutputPin, TemperatureSensor},
    sensor::checked_celsius,
    types::{HttpMethod, LightPayload, NodePhase, Telemetry, TempAck, TempReport},
};

/// Board resources owned by the controller for the life of the program.
pub struct NodeParts<N, D, S, P, H, C> {
    pub network: N,
    pub display: D,
    pub sensor: S,
    pub pin: P,
    pub http: H,
    pub delay: C,
}

/// What one pass of the main loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum Iteration {
    /// Link was down: a reconnect was requested and no request was issued.
    Reconnecting,
    Completed {
        light: Result<bool, NodeError>,
        report: Result<Telemetry, NodeError>,
    },
}

pub struct NodeController<N, D, S, P, H, C> {
    config: NodeConfig,
    parts: NodeParts<N, D, S, P, H, C>,
    phase: NodePhase,
}

impl<N, D, S, P, H, C> NodeController<N, D, S, P, H, C>
where
    N: Network,
    D: Display,
    S: TemperatureSensor,
    P: OutputPin,
    H: HttpTransport,
    C: Delay,
{
    pub fn new(config: NodeConfig, parts: NodeParts<N, D, S, P, H, C>) -> Self {
        Self {
            config,
            parts,
            phase: NodePhase::Connecting,
        }
    }

    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn parts(&self) -> &NodeParts<N, D, S, P, H, C> {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut NodeParts<N, D, S, P, H, C> {
        &mut self.parts
    }

    /// Joins the network and then polls forever. Returns only when the join fails.
    pub fn run(&mut self) -> Result<Infallible, NodeError> {
        self.start()?;
        loop {
            self.step();
        }
    }

    /// Startup sequence: drive the actuator low and wait for the join to complete.
    pub fn start(&mut self) -> Result<(), NodeError> {
        self.set_phase(NodePhase::Connecting);
        self.show("Connecting...", "");

        if let Err(err) = self.parts.pin.set_level(false) {
            warn!("failed to drive output pin low at startup: {err}");
        }

        if let Err(err) = self.parts.network.begin() {
            warn!("wifi join could not be started: {err}");
        }

        let attempts = self.config.timing.join_attempts;
        info!("connecting to wifi `{}`", self.config.network.wifi_ssid);

        let mut remaining = attempts;
        let mut connected = self.parts.network.is_connected();
        while !connected && remaining > 0 {
            self.parts.delay.delay_ms(self.config.timing.join_retry_ms);
            remaining -= 1;
            info!("wifi join pending ({}/{attempts})", attempts - remaining);
            connected = self.parts.network.is_connected();
        }

        if !connected {
            error!("wifi connection failed after {attempts} attempts");
            self.show("WiFi Failed!", "");
            self.set_phase(NodePhase::Halted);
            return Err(NodeError::WifiJoinTimeout { attempts });
        }

        match self.parts.network.ip_address() {
            Some(ip) => info!("wifi connected, ip {ip}"),
            None => info!("wifi connected"),
        }
        self.show("WiFi Connected!", "");
        self.parts
            .delay
            .delay_ms(self.config.timing.connected_splash_ms);

        self.set_phase(NodePhase::Polling);
        Ok(())
    }

    /// One iteration followed by the wait that precedes the next one.
    pub fn step(&mut self) -> Iteration {
        let iteration = self.tick();
        let wait_ms = match iteration {
            Iteration::Reconnecting => self.config.timing.reconnect_delay_ms,
            Iteration::Completed { .. } => self.config.timing.poll_interval_ms,
        };
        self.parts.delay.delay_ms(wait_ms);
        iteration
    }

    /// Connectivity check, actuator poll, then telemetry report.
    pub fn tick(&mut self) -> Iteration {
        if !self.parts.network.is_connected() {
            self.set_phase(NodePhase::Reconnecting);
            warn!("{}, reconnecting", NodeError::WifiDropped);
            self.show("WiFi Reconnecting...", "");
            self.parts.network.reconnect();
            return Iteration::Reconnecting;
        }

        self.set_phase(NodePhase::Polling);
        let light = self.poll_actuator();
        let report = self.report_temperature();
        Iteration::Completed { light, report }
    }

    /// `GET /api/light` and apply the result to the output pin.
    pub fn poll_actuator(&mut self) -> Result<bool, NodeError> {
        let url = api::light_url(&self.config.service.endpoint);
        let api_key = self.config.service.api_key.clone();
        let headers = [(HEADER_API_KEY, api_key.as_str())];

        info!("sending GET request to {PATH_LIGHT}");
        let outcome = self
            .exchange(HttpMethod::Get, &url, &headers, None)
            .and_then(|body| parse_json::<LightPayload>(&body))
            .and_then(|payload| {
                self.parts.pin.set_level(payload.light)?;
                Ok(payload.light)
            });

        match &outcome {
            Ok(light) => {
                let line = if *light { "Light: ON" } else { "Light: OFF" };
                info!("{line}");
                self.show(line, "");
            }
            Err(err) => {
                warn!("light poll failed: {err}");
                let (line0, line1) = poll_error_lines(err);
                self.show(line0, &line1);
            }
        }

        outcome
    }

    /// Read the sensor and `PUT /api/temp`. Nothing is sent if the reading is unusable.
    pub fn report_temperature(&mut self) -> Result<Telemetry, NodeError> {
        let temp_c = match self
            .parts
            .sensor
            .read_celsius()
            .and_then(checked_celsius)
        {
            Ok(temp_c) => temp_c,
            Err(err) => {
                warn!("skipping temperature report: {err}");
                self.show_line(1, "Sensor Error");
                return Err(err);
            }
        };

        let body = serde_json::to_vec(&TempReport { temp: temp_c })?;
        let url = api::temp_url(&self.config.service.endpoint);
        let api_key = self.config.service.api_key.clone();
        let headers = [
            (HEADER_API_KEY, api_key.as_str()),
            (HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON),
        ];

        info!("sending PUT request to {PATH_TEMP} ({temp_c:.2}C)");
        let outcome = self
            .exchange(HttpMethod::Put, &url, &headers, Some(&body))
            .and_then(|body| parse_json::<TempAck>(&body));

        match outcome {
            Ok(ack) => {
                self.show_line(1, &format!("Temp: {temp_c:.2} {}", ack.message));
                Ok(Telemetry {
                    temp_c,
                    message: ack.message,
                })
            }
            Err(err) => {
                warn!("temperature report failed: {err}");
                let line = report_error_line(&err);
                self.show_line(1, &line);
                Err(err)
            }
        }
    }

    fn set_phase(&mut self, phase: NodePhase) {
        if self.phase != phase {
            info!("node {} -> {}", self.phase.as_str(), phase.as_str());
            self.phase = phase;
        }
    }

    fn exchange(
        &mut self,
        method: HttpMethod,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<String, NodeError> {
        let request = HttpRequest {
            method,
            url,
            headers,
            body,
        };
        let response = self.parts.http.send(&request)?;

        if !response.is_ok() {
            warn!("HTTP error: {} {url} -> {}", method.as_str(), response.status);
            return Err(NodeError::HttpStatus(response.status));
        }

        info!("response: {}", response.body);
        Ok(response.body)
    }

    fn show(&mut self, line0: &str, line1: &str) {
        if let Err(err) = self.parts.display.clear() {
            warn!("display clear failed: {err}");
        }
        self.show_line(0, line0);
        if !line1.is_empty() {
            self.show_line(1, line1);
        }
    }

    fn show_line(&mut self, row: u8, text: &str) {
        let line = fit_line(text, self.parts.display.columns());
        if let Err(err) = self.parts.display.write_line(row, &line) {
            warn!("display write to row {row} failed: {err}");
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, NodeError> {
    serde_json::from_str(body).map_err(|err| {
        warn!("JSON parsing failed: {err}");
        NodeError::from(err)
    })
}

fn poll_error_lines(err: &NodeError) -> (&'static str, String) {
    match err {
        NodeError::HttpStatus(status) => ("HTTP Error:", status.to_string()),
        NodeError::Transport(_) => ("HTTP Error:", "no response".to_string()),
        NodeError::Json { category, .. } => ("JSON Error:", (*category).to_string()),
        NodeError::Pin(_) => ("Pin Error", String::new()),
        other => ("Error:", other.to_string()),
    }
}

fn report_error_line(err: &NodeError) -> String {
    match err {
        NodeError::HttpStatus(status) => format!("HTTP Error:{status}"),
        NodeError::Transport(_) => "HTTP Error:none".to_string(),
        NodeError::Json { .. } => "JSON Error:".to_string(),
        other => other.to_string(),
    }
}

/// Clips or pads `text` to exactly `columns` characters so a write replaces the whole row.
pub fn fit_line(text: &str, columns: usize) -> String {
    let mut line: String = text.chars().take(columns).collect();
    let len = line.chars().count();
    line.extend(core::iter::repeat(' ').take(columns - len));
    line
}
