use core::convert::Infallible;
use embassy_time::Duration;
use heapless::String;
use embedded_hal::digital::{ErrorType, OutputPin};

/// Placeholder for a power pin that is not wired up, e.g. `client.begin::<NoPin>(None)`.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Tunables of the command pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) command_gap: Duration,
    pub(crate) blocking_timeout: Duration,
    pub(crate) default_timeout: Duration,
    pub(crate) loop_interval: Duration,
    pub(crate) probe_attempts: u8,
    pub(crate) init_attempts: u8,
    pub(crate) pin_retries: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Config {
            command_gap: Duration::from_millis(100),
            blocking_timeout: Duration::from_secs(30),
            default_timeout: Duration::from_millis(1000),
            loop_interval: Duration::from_millis(100),
            probe_attempts: 30,
            init_attempts: 3,
            pin_retries: 5,
        }
    }

    /// Minimum spacing between two transmitted AT commands.
    pub fn with_command_gap(self, command_gap: Duration) -> Self {
        Config {
            command_gap,
            ..self
        }
    }

    /// Ceiling after which a stuck WIFILOC/LBS exclusivity flag is force-cleared.
    pub fn with_blocking_timeout(self, blocking_timeout: Duration) -> Self {
        Config {
            blocking_timeout,
            ..self
        }
    }

    pub fn with_default_timeout(self, default_timeout: Duration) -> Self {
        Config {
            default_timeout,
            ..self
        }
    }

    pub fn with_loop_interval(self, loop_interval: Duration) -> Self {
        Config {
            loop_interval,
            ..self
        }
    }

    pub fn with_probe_attempts(self, probe_attempts: u8) -> Self {
        Config {
            probe_attempts,
            ..self
        }
    }

    pub fn with_init_attempts(self, init_attempts: u8) -> Self {
        Config {
            init_attempts,
            ..self
        }
    }

    pub fn with_pin_retries(self, pin_retries: u8) -> Self {
        Config {
            pin_retries,
            ..self
        }
    }

    pub fn command_gap(&self) -> Duration {
        self.command_gap
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn loop_interval(&self) -> Duration {
        self.loop_interval
    }
}

/// Positioning policy for the GNSS service, including the WiFi/LBS fallback.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub enable_gnss: bool,
    pub enable_fallback: bool,
    /// GNSS data older than this counts as a lost signal.
    pub gnss_timeout: Duration,
    pub wifi_interval: Duration,
    pub lbs_interval: Duration,
    pub prefer_wifi: bool,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            enable_gnss: true,
            enable_fallback: false,
            gnss_timeout: Duration::from_secs(15),
            wifi_interval: Duration::from_secs(120),
            lbs_interval: Duration::from_secs(60),
            prefer_wifi: true,
        }
    }
}

impl LocationConfig {
    pub fn with_fallback(self) -> Self {
        LocationConfig {
            enable_fallback: true,
            ..self
        }
    }

    pub fn prefer_lbs(self) -> Self {
        LocationConfig {
            prefer_wifi: false,
            ..self
        }
    }
}

/// Broker and session settings of the MQTT service.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub server: String<64>,
    pub port: u16,
    pub client_id: String<64>,
    pub username: String<64>,
    pub password: String<64>,
    pub keep_alive: Duration,
    /// How often the connection state is queried with `AT+MQTTSTATU`.
    pub status_interval: Duration,
    pub reconnect_interval: Duration,
    pub auto_reconnect: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 1883,
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            keep_alive: Duration::from_secs(60),
            status_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
            auto_reconnect: true,
        }
    }
}

impl MqttConfig {
    /// Settings for `server:port` with the given client id. Values that do not
    /// fit their buffers are left empty.
    pub fn new(server: &str, port: u16, client_id: &str) -> Self {
        Self {
            server: String::try_from(server).unwrap_or_default(),
            port,
            client_id: String::try_from(client_id).unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn with_credentials(self, username: &str, password: &str) -> Self {
        MqttConfig {
            username: String::try_from(username).unwrap_or_default(),
            password: String::try_from(password).unwrap_or_default(),
            ..self
        }
    }

    pub fn with_keep_alive(self, keep_alive: Duration) -> Self {
        MqttConfig { keep_alive, ..self }
    }

    pub fn without_auto_reconnect(self) -> Self {
        MqttConfig {
            auto_reconnect: false,
            ..self
        }
    }
}
