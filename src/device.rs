use embassy_time::Duration;
use embedded_hal::digital::OutputPin;
use embedded_io::{Read, ReadReady, Write};

use crate::client::{AtClient, Client};
use crate::clock::Clock;
use crate::config::{LocationConfig, MqttConfig};
use crate::error::Error;
use crate::services::gnss::Gnss;
use crate::services::http::Http;
use crate::services::mqtt::{Mqtt, MqttSession};
use crate::services::network::Network;
use crate::services::Interval;

const RESET_TIMEOUT: Duration = Duration::from_secs(5);
const RESET_RECOVERY: Duration = Duration::from_secs(3);

/// An Air780EG with its feature services, driven by [`Air780eg::poll`].
///
/// The [`Client`] and an optional [`MqttSession`] are owned by the caller so
/// that URC handlers can borrow them for as long as the device lives.
pub struct Air780eg<'a, 'h, S, C> {
    client: &'a Client<'h, S, C>,
    network: Network<'a, Client<'h, S, C>>,
    gnss: Gnss<'a, Client<'h, S, C>>,
    mqtt: Option<Mqtt<'a, Client<'h, S, C>>>,
    http: Http<'a, Client<'h, S, C>>,
    tick: Interval,
    started: bool,
}

impl<'a, 'h, S, C> Air780eg<'a, 'h, S, C>
where
    S: Read + Write + ReadReady,
    C: Clock,
{
    pub fn new(client: &'a Client<'h, S, C>, location: LocationConfig) -> Self {
        Self {
            client,
            network: Network::new(client),
            gnss: Gnss::new(client, location),
            mqtt: None,
            http: Http::new(client),
            tick: Interval::new(client.config().loop_interval()),
            started: false,
        }
    }

    /// Start the modem, then bring up the network and, if configured, the
    /// GNSS receiver. Feature failures are logged, only a modem that cannot
    /// be started is an error.
    pub fn begin<P: OutputPin>(&mut self, pwr_pin: Option<&mut P>) -> Result<(), Error> {
        info!("Initializing Air780EG v{}", crate::VERSION);
        self.client.begin(pwr_pin)?;
        self.started = true;

        if let Err(e) = self.network.enable() {
            warn!("Failed to enable network: {:?}", e);
        }
        if self.gnss.config().enable_gnss {
            if let Err(e) = self.gnss.enable() {
                warn!("Failed to enable GNSS: {:?}", e);
            }
        }
        Ok(())
    }

    /// Attach the MQTT service. `session` must already be registered with
    /// the client's URC dispatcher, see [`MqttSession::register`].
    pub fn enable_mqtt(
        &mut self,
        session: &'a MqttSession,
        config: MqttConfig,
    ) -> Result<(), Error> {
        let mut mqtt = Mqtt::new(self.client, session, config);
        mqtt.begin()?;
        self.mqtt = Some(mqtt);
        Ok(())
    }

    pub fn client(&self) -> &'a Client<'h, S, C> {
        self.client
    }

    pub fn network(&mut self) -> &mut Network<'a, Client<'h, S, C>> {
        &mut self.network
    }

    pub fn gnss(&mut self) -> &mut Gnss<'a, Client<'h, S, C>> {
        &mut self.gnss
    }

    pub fn mqtt(&mut self) -> Option<&mut Mqtt<'a, Client<'h, S, C>>> {
        self.mqtt.as_mut()
    }

    pub fn http(&mut self) -> &mut Http<'a, Client<'h, S, C>> {
        &mut self.http
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_initialized() && !self.client.is_reboot_detected()
    }

    pub fn set_loop_interval(&mut self, interval: Duration) {
        self.tick.set_period(interval);
    }

    pub fn loop_interval(&self) -> Duration {
        self.tick.period()
    }

    /// Main loop body, rate limited to the loop interval.
    ///
    /// Errors of the command pipeline are returned, those of the feature
    /// services are logged. A failed re-initialisation after a module reboot
    /// is retried on the next tick.
    pub fn poll(&mut self) -> Result<(), Error> {
        if !self.started {
            trace!("Device not started, skipping poll");
            return Ok(());
        }
        if !self.tick.tick(self.client.now()) {
            return Ok(());
        }

        self.client.process_commands()?;

        if let Err(e) = self.network.poll() {
            warn!("Network poll failed: {:?}", e);
        }
        if let Err(e) = self.gnss.poll() {
            warn!("GNSS poll failed: {:?}", e);
        }
        if let Some(mqtt) = self.mqtt.as_mut() {
            if let Err(e) = mqtt.poll() {
                warn!("MQTT poll failed: {:?}", e);
            }
        }
        Ok(())
    }

    /// Restart the modem with `AT+CFUN=1,1` and initialise it again.
    pub fn reset(&mut self) -> Result<(), Error> {
        info!("Resetting module...");
        if let Err(e) = self.client.send_command("AT+CFUN=1,1", RESET_TIMEOUT) {
            warn!("Reset command failed: {:?}", e);
        }
        self.client.delay(RESET_RECOVERY);
        self.client.init_modem()?;
        info!("Module reset");
        Ok(())
    }

    pub fn log_status(&self) {
        info!(
            "Air780EG v{}, initialized: {}, network: {}, GNSS: {}",
            crate::VERSION,
            self.client.is_initialized(),
            self.network.is_enabled(),
            self.gnss.is_enabled()
        );
        self.network.log_info();
        self.gnss.log_info();
        if let Some(mqtt) = self.mqtt.as_ref() {
            info!("MQTT: {}", mqtt.state().as_str());
        }
        let stats = self.client.urc_statistics();
        debug!(
            "URCs processed: {}, matched: {}, unmatched: {}, failed: {}",
            stats.processed,
            stats.matched,
            stats.unmatched,
            stats.failed
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Config, NoPin};
    use crate::services::mqtt::MqttState;
    use crate::test_helpers::{healthy_modem, init_logger, MockClock, MockSerial, MockWire};

    fn features(wire: &MockWire) {
        wire.respond("AT+CFUN=1", "OK\r\n");
        wire.respond("AT+CGSN", "862012345678901\r\nOK\r\n");
        wire.respond("AT+CIMI", "460001234567890\r\nOK\r\n");
        wire.respond("AT+CCID", "89860012345678901234\r\nOK\r\n");
        wire.respond("AT+CREG?", "+CREG: 0,1\r\nOK\r\n");
        wire.respond("AT+CSQ", "+CSQ: 20,99\r\nOK\r\n");
        wire.respond("AT+COPS?", "+COPS: 0,0,\"CHINA MOBILE\",7\r\nOK\r\n");
        wire.respond("AT+CNSMOD?", "+CNSMOD: 0,8\r\nOK\r\n");
        wire.respond("AT+CGNSPWR=1", "OK\r\n");
        wire.respond("AT+CGNSAID=31,1,1,1", "OK\r\n");
        wire.respond("AT+CGNSURC=0", "OK\r\n");
        wire.respond("AT+CGNSINF", "+CGNSINF: 1,0,,,,,,,,,,0\r\nOK\r\n");
    }

    #[test]
    fn begin_enables_features() {
        init_logger();
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        healthy_modem(&wire);
        features(&wire);

        let client = Client::new(serial, clock.clone(), Config::default());
        let mut device = Air780eg::new(&client, LocationConfig::default());
        device.begin::<NoPin>(None).unwrap();

        assert!(device.is_ready());
        assert!(device.network().is_enabled());
        assert!(device.gnss().is_enabled());
        assert_eq!(device.network().module_info().imei.as_str(), "862012345678901");
    }

    #[test]
    fn feature_failure_does_not_fail_begin() {
        init_logger();
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        healthy_modem(&wire);
        wire.respond_once("AT+CGNSPWR=1", "ERROR\r\n");
        features(&wire);

        let client = Client::new(serial, clock.clone(), Config::default());
        let mut device = Air780eg::new(&client, LocationConfig::default());
        device.begin::<NoPin>(None).unwrap();
        assert!(!device.gnss().is_enabled());
    }

    #[test]
    fn poll_is_rate_limited() {
        init_logger();
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        healthy_modem(&wire);
        features(&wire);

        let client = Client::new(serial, clock.clone(), Config::default());
        let mut device = Air780eg::new(&client, LocationConfig::default());
        device.begin::<NoPin>(None).unwrap();

        clock.advance(10_000);
        device.poll().unwrap();
        let after_first = wire.sent().len();
        assert!(after_first > 0);

        wire.clear_sent();
        clock.advance(50);
        device.poll().unwrap();
        assert!(wire.sent().is_empty());
    }

    #[test]
    fn mqtt_is_polled_once_attached() {
        init_logger();
        let session = MqttSession::new();
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        healthy_modem(&wire);
        features(&wire);
        wire.respond("AT+MQTTMODE=1", "OK\r\n");
        wire.respond("AT+MQTTSTATU", "+MQTTSTATU :1\r\nOK\r\n");

        let client = Client::new(serial, clock.clone(), Config::default());
        client.urc(|d| session.register(d)).unwrap();
        let mut device = Air780eg::new(&client, LocationConfig::default());
        device.begin::<NoPin>(None).unwrap();
        device
            .enable_mqtt(&session, MqttConfig::new("broker.example.com", 1883, "dev-1"))
            .unwrap();

        clock.advance(10_000);
        device.poll().unwrap();
        assert!(wire.sent().iter().any(|c| c == "AT+MQTTSTATU"));
        assert_eq!(session.state(), MqttState::Connected);
    }

    #[test]
    fn failed_reboot_recovery_is_retried() {
        init_logger();
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        wire.respond_once("AT+CPIN?", "+CPIN: READY\r\nOK\r\n");
        for _ in 0..5 {
            wire.respond_once("AT+CPIN?", "+CME ERROR: 14\r\n");
        }
        healthy_modem(&wire);
        features(&wire);

        let client = Client::new(serial, clock.clone(), Config::default());
        let mut device = Air780eg::new(&client, LocationConfig::default());
        device.begin::<NoPin>(None).unwrap();

        wire.push("boot.rom\r\n");
        let mut failures = 0;
        for _ in 0..20 {
            clock.advance(10_000);
            if device.poll().is_err() {
                failures += 1;
            }
            if client.is_initialized() && !client.is_reboot_detected() {
                break;
            }
        }

        assert_eq!(failures, 1);
        assert!(client.is_initialized());
        assert!(!client.is_reboot_detected());
        assert!(device.is_ready());
    }

    #[test]
    fn poll_before_begin_is_idle() {
        init_logger();
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        healthy_modem(&wire);

        let client = Client::new(serial, clock.clone(), Config::default());
        let mut device = Air780eg::new(&client, LocationConfig::default());
        clock.advance(10_000);
        device.poll().unwrap();
        assert!(wire.sent().is_empty());
    }

    #[test]
    fn reset_reinitializes() {
        init_logger();
        let clock = MockClock::new();
        let (serial, wire) = MockSerial::new(&clock);
        healthy_modem(&wire);
        features(&wire);
        wire.respond("AT+CFUN=1,1", "OK\r\n");

        let client = Client::new(serial, clock.clone(), Config::default());
        let mut device = Air780eg::new(&client, LocationConfig::default());
        device.begin::<NoPin>(None).unwrap();

        wire.clear_sent();
        device.reset().unwrap();
        let sent = wire.sent();
        assert_eq!(sent.first().map(|s| s.as_str()), Some("AT+CFUN=1,1"));
        assert!(sent.iter().any(|c| c == "AT+CPIN?"));
        assert!(device.is_ready());
    }
}
