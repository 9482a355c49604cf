use core::convert::TryInto;
use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{
        AnyIOPin, AnyOutputPin, IOPin, InputOutput, Output, OutputPin as _, Pin as _, PinDriver,
        Pull,
    },
    i2c::{I2cConfig, I2cDriver, I2C0},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::EspWifi,
};
use log::{error, info, warn};
use one_wire_bus::{Address, OneWire};

use lightnode_common::{
    sensor::celsius_to_fahrenheit, Delay, Display, HardwareConfig, HttpMethod, HttpRequest,
    HttpResponse, HttpTransport, Network, NetworkConfig, NodeConfig, NodeController, NodeError,
    NodeParts, OutputPin, TemperatureSensor,
};

use crate::lcd::CharLcd;

const MAX_HTTP_BODY: usize = 4096;
const HTTP_CHUNK_SIZE: usize = 512;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;

type Lcd = CharLcd<I2cDriver<'static>, Ets>;

struct EspLink {
    wifi: EspWifi<'static>,
    network: NetworkConfig,
}

struct EspHttp {
    timeout: Duration,
    accept_invalid_certs: bool,
}

struct Ds18b20Probe {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    gpio: i32,
    delay: Ets,
}

struct LedPin {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

struct WatchdogDelay;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = build_time_config();
    config.sanitize();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals {
        modem, i2c0, pins, ..
    } = Peripherals::take()?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    // Board wiring: LED GPIO2, DS18B20 GPIO4, LCD SDA GPIO21 / SCL GPIO22.
    let mut display = match init_lcd(
        i2c0,
        pins.gpio21.downgrade(),
        pins.gpio22.downgrade(),
        &config.hardware,
    ) {
        Ok(lcd) => Some(lcd),
        Err(err) => {
            warn!("continuing without display: {err:#}");
            None
        }
    };

    if let Err(err) = config.validate() {
        error!("{err}; set the LIGHTNODE_* variables and rebuild");
        if let Err(err) = display
            .clear()
            .and_then(|_| display.write_line(0, "Config Error"))
        {
            warn!("{err}");
        }
        halt();
    }

    let sensor = Ds18b20Probe::new(pins.gpio4.downgrade())
        .context("failed to initialize temperature sensor")?;
    let pin = LedPin::new(pins.gpio2.downgrade_output()).context("failed to initialize output pin")?;
    let network = EspLink::new(modem, sys_loop, nvs_partition, &config.network)
        .context("failed to initialize wifi driver")?;
    let http = EspHttp {
        timeout: Duration::from_millis(config.service.http_timeout_ms),
        accept_invalid_certs: config.service.accept_invalid_certs,
    };

    if config.service.accept_invalid_certs {
        warn!("server certificate verification is disabled");
    }

    let mut controller = NodeController::new(
        config,
        NodeParts {
            network,
            display,
            sensor,
            pin,
            http,
            delay: WatchdogDelay,
        },
    );

    match controller.run() {
        Ok(never) => match never {},
        Err(err) if err.is_fatal() => {
            error!("{err}; halted until reset");
            halt()
        }
        Err(err) => Err(err).context("node loop stopped unexpectedly"),
    }
}

fn build_time_config() -> NodeConfig {
    let mut config = NodeConfig::default();

    config.network.wifi_ssid = option_env!("LIGHTNODE_WIFI_SSID")
        .unwrap_or_default()
        .to_string();
    config.network.wifi_pass = option_env!("LIGHTNODE_WIFI_PASS")
        .unwrap_or_default()
        .to_string();
    config.network.wifi_channel = option_env!("LIGHTNODE_WIFI_CHANNEL").and_then(|value| {
        value
            .trim()
            .parse::<u8>()
            .map_err(|err| warn!("ignoring LIGHTNODE_WIFI_CHANNEL `{value}`: {err}"))
            .ok()
    });
    config.service.endpoint = option_env!("LIGHTNODE_ENDPOINT")
        .unwrap_or_default()
        .to_string();
    config.service.api_key = option_env!("LIGHTNODE_API_KEY")
        .unwrap_or_default()
        .to_string();

    config
}

fn init_lcd(
    i2c0: I2C0,
    sda: AnyIOPin,
    scl: AnyIOPin,
    hardware: &HardwareConfig,
) -> anyhow::Result<Lcd> {
    let i2c_config = I2cConfig::new().baudrate(Hertz(hardware.i2c_baudrate_hz));
    let i2c = I2cDriver::new(i2c0, sda, scl, &i2c_config)?;

    let mut lcd = CharLcd::new(
        i2c,
        Ets,
        hardware.lcd_i2c_address,
        hardware.lcd_columns,
        hardware.lcd_rows,
    );
    lcd.init()
        .map_err(|err| anyhow!("LCD at 0x{:02x} not responding: {err:?}", hardware.lcd_i2c_address))?;
    info!(
        "LCD {}x{} ready at 0x{:02x}",
        hardware.lcd_columns, hardware.lcd_rows, hardware.lcd_i2c_address
    );
    Ok(lcd)
}

fn halt() -> ! {
    loop {
        feed_watchdog();
        thread::sleep(Duration::from_secs(1));
    }
}

impl EspLink {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> anyhow::Result<Self> {
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
        Ok(Self {
            wifi,
            network: network.clone(),
        })
    }

    fn start_station(&mut self) -> anyhow::Result<()> {
        let auth_method = if self.network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: self
                    .network
                    .wifi_ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("wifi ssid too long"))?,
                password: self
                    .network
                    .wifi_pass
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("wifi password too long"))?,
                channel: self.network.wifi_channel,
                auth_method,
                ..Default::default()
            }))?;

        self.wifi.start()?;
        disable_wifi_power_save();

        match self.network.wifi_channel {
            Some(channel) => info!(
                "wifi started, joining `{}` on channel {channel}",
                self.network.wifi_ssid
            ),
            None => info!("wifi started, joining `{}`", self.network.wifi_ssid),
        }

        self.wifi.connect()?;
        Ok(())
    }
}

impl Network for EspLink {
    fn begin(&mut self) -> Result<(), NodeError> {
        self.start_station()
            .map_err(|err| NodeError::WifiDriver(format!("{err:#}")))
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.is_up().unwrap_or(false)
    }

    fn reconnect(&mut self) {
        let _ = self.wifi.disconnect();
        if let Err(err) = self.wifi.connect() {
            warn!("wifi reconnect request failed: {err}");
        }
    }

    fn ip_address(&mut self) -> Option<String> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }
}

impl EspHttp {
    fn exchange(&self, request: &HttpRequest<'_>) -> anyhow::Result<HttpResponse> {
        let conf = HttpClientConfiguration {
            timeout: Some(self.timeout),
            crt_bundle_attach: if self.accept_invalid_certs {
                None
            } else {
                Some(esp_idf_svc::sys::esp_crt_bundle_attach)
            },
            ..Default::default()
        };
        // One connection per exchange; dropping the client closes it.
        let mut client = HttpClient::wrap(EspHttpConnection::new(&conf)?);

        let method = match request.method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Put => Method::Put,
        };

        let content_length = request.body.map(|body| body.len().to_string());
        let mut headers = request.headers.to_vec();
        if let Some(length) = content_length.as_deref() {
            headers.push(("Content-Length", length));
        }

        let mut outgoing = client.request(method, request.url, &headers)?;
        if let Some(body) = request.body {
            outgoing.write_all(body).map_err(|e| anyhow!("{e:?}"))?;
            outgoing.flush().map_err(|e| anyhow!("{e:?}"))?;
        }
        let mut response = outgoing.submit().map_err(|e| anyhow!("{e:?}"))?;

        let status = response.status();
        let mut body = Vec::new();
        let mut chunk = [0_u8; HTTP_CHUNK_SIZE];
        loop {
            let read = response.read(&mut chunk).map_err(|e| anyhow!("{e:?}"))?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
            if body.len() > MAX_HTTP_BODY {
                return Err(anyhow!("response body exceeds {MAX_HTTP_BODY} bytes"));
            }
        }

        Ok(HttpResponse::new(
            status,
            String::from_utf8_lossy(&body).into_owned(),
        ))
    }
}

impl HttpTransport for EspHttp {
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, NodeError> {
        self.exchange(request).map_err(|err| {
            warn!(
                "{} {} failed before a status was received: {err:#}",
                request.method.as_str(),
                request.url
            );
            NodeError::Transport(format!("{err:#}"))
        })
    }
}

impl Ds18b20Probe {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let gpio = pin.pin();
        let mut one_wire_pin = PinDriver::input_output_od(pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut probe = Self {
            one_wire,
            address: None,
            gpio,
            delay: Ets,
        };

        probe.refresh_address();
        Ok(probe)
    }

    fn refresh_address(&mut self) {
        let mut first_ds18: Option<Address> = None;
        let mut device_count = 0_u32;

        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) => {
                    device_count = device_count.saturating_add(1);
                    if first_ds18.is_none() && address.family_code() == ds18b20::FAMILY_CODE {
                        first_ds18 = Some(address);
                    }
                }
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        self.address = first_ds18;

        match self.address {
            Some(address) => info!(
                "DS18B20 ready on GPIO{} ({} one-wire device(s), using {:?})",
                self.gpio, device_count, address
            ),
            None => warn!(
                "no DS18B20 found on GPIO{} ({} one-wire device(s) detected)",
                self.gpio, device_count
            ),
        }
    }
}

impl TemperatureSensor for Ds18b20Probe {
    fn read_celsius(&mut self) -> Result<f32, NodeError> {
        if self.address.is_none() {
            self.refresh_address();
        }

        let Some(address) = self.address else {
            return Err(NodeError::Sensor(format!(
                "no DS18B20 on GPIO{}",
                self.gpio
            )));
        };
        let sensor = Ds18b20::new::<core::convert::Infallible>(address).map_err(|err| {
            self.address = None;
            NodeError::Sensor(format!("invalid DS18B20 address {address:?}: {err:?}"))
        })?;

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            self.address = None;
            return Err(NodeError::Sensor(format!(
                "failed to start conversion: {err:?}"
            )));
        }

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);

        match sensor.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => {
                info!(
                    "[DS18B20] Temperature: {:.1}°C ({:.1}°F)",
                    data.temperature,
                    celsius_to_fahrenheit(data.temperature)
                );
                Ok(data.temperature)
            }
            Err(err) => {
                self.address = None;
                Err(NodeError::Sensor(format!("failed to read scratchpad: {err:?}")))
            }
        }
    }
}

impl LedPin {
    fn new(pin: AnyOutputPin) -> anyhow::Result<Self> {
        let gpio = pin.pin();
        let pin = PinDriver::output(pin)?;
        info!("output pin on GPIO{gpio}");
        Ok(Self { pin })
    }
}

impl OutputPin for LedPin {
    fn set_level(&mut self, high: bool) -> Result<(), NodeError> {
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|err| NodeError::Pin(err.to_string()))
    }
}

impl Delay for WatchdogDelay {
    fn delay_ms(&mut self, ms: u64) {
        let mut remaining = ms;
        while remaining > 0 {
            feed_watchdog();
            let slice = remaining.min(1_000);
            thread::sleep(Duration::from_millis(slice));
            remaining -= slice;
        }
        feed_watchdog();
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
