//! MQTT client built into the module firmware.
//!
//! The broker connection lives in the module. The driver configures it with
//! `AT+MCONFIG`/`AT+MIPSTART`/`AT+MCONNECT`, publishes with `AT+MPUB` in HEX
//! mode and learns about inbound messages and connection changes from the
//! `+MSUB:` and `+MCONNECT:` URCs, which land in an [`MqttSession`].

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use heapless::{Deque, String, Vec};

use super::network::Network;
use super::{expect_ok, format_command, info_line, truncated, Interval};
use crate::client::AtClient;
use crate::command::{self, CmeError, MAX_COMMAND_LEN};
use crate::config::MqttConfig;
use crate::coordinator::CommandId;
use crate::error::Error;
use crate::hex::{decode_hex, encode_hex};
use crate::urc::{InboundMessage, UrcData, UrcDispatcher, UrcHandler};

pub const MAX_TOPIC_LEN: usize = 128;
pub const MAX_PAYLOAD_LEN: usize = 256;
pub const MAX_SUBSCRIPTIONS: usize = 20;
pub const MAX_CACHED_MESSAGES: usize = 10;

const MODE_TIMEOUT: Duration = Duration::from_secs(3);
const CONFIG_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between opening the TCP link and the MQTT handshake.
const LINK_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl MqttState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
            Self::Error => "ERROR",
        }
    }

    /// Whether the broker session is up as far as callbacks are concerned.
    fn link_up(self) -> bool {
        matches!(self, Self::Connected | Self::Disconnecting)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: String<MAX_PAYLOAD_LEN>,
    pub timestamp: Instant,
}

pub type MessageCallback = fn(topic: &str, payload: &str);
pub type ConnectionCallback = fn(connected: bool);

struct SessionState {
    state: MqttState,
    hex_payloads: bool,
    messages: Deque<MqttMessage, MAX_CACHED_MESSAGES>,
    on_message: Option<MessageCallback>,
    on_connection: Option<ConnectionCallback>,
}

/// Connection state and inbound messages, shared between the [`Mqtt`]
/// service and the URC dispatcher.
///
/// Register it with [`MqttSession::register`] so `+MSUB:` and `+MCONNECT:`
/// lines reach it. Callbacks run after the session lock has been released.
pub struct MqttSession {
    inner: Mutex<NoopRawMutex, RefCell<SessionState>>,
}

impl Default for MqttSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttSession {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(SessionState {
                state: MqttState::Disconnected,
                hex_payloads: false,
                messages: Deque::new(),
                on_message: None,
                on_connection: None,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        self.inner.lock(|s| f(&mut s.borrow_mut()))
    }

    pub fn register<'h>(&'h self, urc: &mut UrcDispatcher<'h>) -> Result<(), Error> {
        urc.on_mqtt_message(self)?;
        urc.on_mqtt_connection(self)
    }

    pub fn state(&self) -> MqttState {
        self.with(|s| s.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == MqttState::Connected
    }

    pub(crate) fn set_state(&self, state: MqttState) {
        let (previous, callback) = self.with(|s| {
            let previous = core::mem::replace(&mut s.state, state);
            (previous, s.on_connection)
        });
        if previous == state {
            return;
        }
        debug!("MQTT state {} -> {}", previous.as_str(), state.as_str());
        if previous.link_up() != state.link_up() {
            if let Some(callback) = callback {
                callback(state.link_up());
            }
        }
    }

    fn set_hex_payloads(&self, enabled: bool) {
        self.with(|s| s.hex_payloads = enabled)
    }

    pub fn set_message_callback(&self, callback: MessageCallback) {
        self.with(|s| s.on_message = Some(callback))
    }

    pub fn set_connection_callback(&self, callback: ConnectionCallback) {
        self.with(|s| s.on_connection = Some(callback))
    }

    pub fn has_messages(&self) -> bool {
        self.with(|s| !s.messages.is_empty())
    }

    pub fn message_count(&self) -> usize {
        self.with(|s| s.messages.len())
    }

    /// Oldest cached message.
    pub fn next_message(&self) -> Option<MqttMessage> {
        self.with(|s| s.messages.pop_front())
    }

    pub fn clear_messages(&self) {
        self.with(|s| s.messages.clear())
    }

    fn receive(&self, inbound: &InboundMessage<'_>, timestamp: Instant) {
        let hex = self.with(|s| s.hex_payloads);
        let decoded = if hex {
            decode_hex::<MAX_PAYLOAD_LEN>(inbound.payload)
                .ok()
                .and_then(|bytes| {
                    core::str::from_utf8(&bytes)
                        .ok()
                        .map(truncated::<MAX_PAYLOAD_LEN>)
                })
        } else {
            None
        };

        let message = MqttMessage {
            topic: truncated(inbound.topic),
            payload: decoded.unwrap_or_else(|| truncated(inbound.payload)),
            timestamp,
        };
        debug!(
            "MQTT message on {}: {}",
            message.topic.as_str(),
            message.payload.as_str()
        );

        let callback = self.with(|s| {
            if s.messages.is_full() {
                s.messages.pop_front();
            }
            // Cannot fail after making room.
            let _ = s.messages.push_back(message.clone());
            s.on_message
        });
        if let Some(callback) = callback {
            callback(&message.topic, &message.payload);
        }
    }
}

impl UrcHandler for MqttSession {
    fn handle(&self, urc: &UrcData<'_>) -> Result<(), Error> {
        match urc.prefix {
            "+MCONNECT:" => {
                let connected = urc.body().contains("1,0");
                info!("MQTT connection report: {}", urc.body());
                if connected {
                    self.set_state(MqttState::Connected);
                } else {
                    self.set_state(MqttState::Disconnected);
                }
                Ok(())
            }
            "+MSUB:" => {
                let inbound = InboundMessage::from_urc(urc).ok_or(Error::Parse)?;
                self.receive(&inbound, urc.timestamp);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

pub struct Mqtt<'a, T> {
    at: &'a T,
    session: &'a MqttSession,
    config: MqttConfig,
    subscriptions: Vec<(String<MAX_TOPIC_LEN>, QoS), MAX_SUBSCRIPTIONS>,
    /// Set by [`Mqtt::connect`], cleared by [`Mqtt::disconnect`]. Reconnects
    /// only happen while set.
    wanted: bool,
    status: Interval,
    reconnect: Interval,
}

impl<'a, T: AtClient> Mqtt<'a, T> {
    pub fn new(at: &'a T, session: &'a MqttSession, config: MqttConfig) -> Self {
        Self {
            at,
            session,
            status: Interval::new(config.status_interval),
            reconnect: Interval::new(config.reconnect_interval),
            config,
            subscriptions: Vec::new(),
            wanted: false,
        }
    }

    /// Switch the module to HEX payloads.
    pub fn begin(&mut self) -> Result<(), Error> {
        info!("Initializing MQTT...");
        match expect_ok(self.at, "AT+MQTTMODE=1", MODE_TIMEOUT) {
            Ok(_) => self.session.set_hex_payloads(true),
            Err(Error::Blocked) => return Err(Error::Blocked),
            Err(e) => warn!("Failed to set MQTT HEX mode: {:?}", e),
        }
        self.session.set_state(MqttState::Disconnected);
        Ok(())
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MqttConfig) {
        self.status.set_period(config.status_interval);
        self.reconnect.set_period(config.reconnect_interval);
        self.config = config;
    }

    pub fn session(&self) -> &'a MqttSession {
        self.session
    }

    pub fn state(&self) -> MqttState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn fail(&self, error: Error) -> Error {
        self.session.set_state(MqttState::Error);
        error
    }

    /// Open the broker session. Stored subscriptions are renewed afterwards.
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }
        if self.config.server.is_empty() {
            error!("MQTT server not configured");
            return Err(Error::ConnectFailed);
        }
        self.wanted = true;
        self.reconnect.mark(self.at.now());

        info!(
            "Connecting to MQTT broker {}:{}",
            self.config.server.as_str(),
            self.config.port
        );
        self.session.set_state(MqttState::Connecting);

        match Network::new(self.at).is_network_ready() {
            Ok(true) => {}
            Ok(false) => {
                error!("Network not ready for MQTT");
                return Err(self.fail(Error::NetworkNotReady));
            }
            Err(e) => return Err(self.fail(e)),
        }

        let setup = format_command(format_args!(
            "AT+MCONFIG={},{},{}",
            self.config.client_id.as_str(),
            self.config.username.as_str(),
            self.config.password.as_str()
        ))?;
        if let Err(e) = expect_ok(self.at, &setup, CONFIG_TIMEOUT) {
            error!("Failed to configure MQTT client: {:?}", e);
            return Err(self.fail(e));
        }

        let open = format_command(format_args!(
            "AT+MIPSTART=\"{}\",\"{}\"",
            self.config.server.as_str(),
            self.config.port
        ))?;
        let response = self
            .at
            .send_command_expecting_any(&open, &["CONNECT OK", "ALREADY CONNECT"], CONNECT_TIMEOUT)
            .map_err(|e| self.fail(e))?;
        if response.contains("ALREADY CONNECT") {
            info!("MQTT link already open");
            self.session.set_state(MqttState::Connected);
            return Ok(());
        }
        if !response.contains("CONNECT OK") {
            error!("Failed to open TCP link to broker: {}", response.as_str());
            return Err(self.fail(Error::ConnectFailed));
        }

        self.at.delay(LINK_SETTLE);

        let handshake = format_command(format_args!(
            "AT+MCONNECT=1,{}",
            self.config.keep_alive.as_secs()
        ))?;
        let response = self
            .at
            .send_command_expecting(&handshake, "CONNACK OK", CONNECT_TIMEOUT)
            .map_err(|e| self.fail(e))?;
        if !response.contains("CONNACK OK") {
            error!("MQTT handshake failed: {}", response.as_str());
            return Err(self.fail(Error::ConnectFailed));
        }

        self.session.set_state(MqttState::Connected);
        info!("MQTT connected");
        self.resubscribe();
        Ok(())
    }

    fn resubscribe(&self) {
        for (topic, qos) in self.subscriptions.iter() {
            if let Err(e) = self.send_subscribe(topic, *qos) {
                warn!("Failed to renew subscription {}: {:?}", topic.as_str(), e);
            }
        }
    }

    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.wanted = false;
        if !self.is_connected() {
            return Ok(());
        }

        info!("Disconnecting from MQTT broker");
        self.session.set_state(MqttState::Disconnecting);
        match expect_ok(self.at, "AT+MDISCONNECT", DISCONNECT_TIMEOUT) {
            Ok(_) => {
                self.session.set_state(MqttState::Disconnected);
                info!("MQTT disconnected");
                Ok(())
            }
            Err(e) => {
                error!("MQTT disconnect failed: {:?}", e);
                Err(self.fail(e))
            }
        }
    }

    fn publish_command(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<String<MAX_COMMAND_LEN>, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let hex =
            encode_hex::<MAX_COMMAND_LEN>(payload).map_err(|_| Error::CommandTooLong)?;
        format_command(format_args!(
            "AT+MPUB=\"{}\",{},{},\"{}\"",
            topic,
            qos as u8,
            retain as u8,
            hex.as_str()
        ))
    }

    /// Publish and wait for the module to accept the message.
    ///
    /// A rejected publish puts the session into [`MqttState::Error`], which
    /// the status poll resolves.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        let cmd = self.publish_command(topic, payload, qos, retain)?;
        let response = self.at.send_command(&cmd, PUBLISH_TIMEOUT)?;
        if command::is_error_response(&response) || !response.contains("OK") {
            error!("Publish to {} failed: {}", topic, response.as_str());
            return Err(self.fail(Error::Modem(CmeError::parse(&response))));
        }
        debug!("Published {} bytes to {}", payload.len(), topic);
        Ok(())
    }

    /// Queue a publish. The result is available through the command id.
    pub fn publish_async(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<CommandId, Error> {
        let cmd = self.publish_command(topic, payload, qos, retain)?;
        self.at.send_command_async(&cmd, PUBLISH_TIMEOUT)
    }

    fn send_subscribe(&self, topic: &str, qos: QoS) -> Result<(), Error> {
        let cmd = format_command(format_args!("AT+MSUB=\"{}\",{}", topic, qos as u8))?;
        let response = self
            .at
            .send_command_expecting(&cmd, "SUBACK", SUBSCRIBE_TIMEOUT)?;
        if response.contains("SUBACK") {
            Ok(())
        } else {
            Err(Error::Modem(CmeError::parse(&response)))
        }
    }

    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let known = self.subscriptions.iter().position(|(t, _)| t == topic);
        if known.is_none() && self.subscriptions.is_full() {
            return Err(Error::SubscriptionLimit);
        }
        let stored: String<MAX_TOPIC_LEN> =
            String::try_from(topic).map_err(|_| Error::CommandTooLong)?;

        self.send_subscribe(topic, qos).map_err(|e| {
            error!("Subscribe to {} failed: {:?}", topic, e);
            e
        })?;
        info!("Subscribed to {}", topic);

        match known {
            Some(idx) => self.subscriptions[idx].1 = qos,
            None => {
                // Capacity was checked above.
                let _ = self.subscriptions.push((stored, qos));
            }
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let cmd = format_command(format_args!("AT+MUNSUB=\"{}\"", topic))?;
        expect_ok(self.at, &cmd, SUBSCRIBE_TIMEOUT)?;
        self.subscriptions.retain(|(t, _)| t != topic);
        info!("Unsubscribed from {}", topic);
        Ok(())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|(t, _)| t == topic)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (&str, QoS)> {
        self.subscriptions.iter().map(|(t, q)| (t.as_str(), *q))
    }

    /// Query the connection state with `AT+MQTTSTATU`.
    ///
    /// The module answers 0 when offline, 1 when publishing is possible and
    /// 2 when the handshake still has to be done.
    pub fn update_status(&mut self) -> Result<MqttState, Error> {
        let response = self
            .at
            .send_command_until_complete("AT+MQTTSTATU", STATUS_TIMEOUT)?;
        let Some(value) = info_line(&response, "+MQTTSTATU") else {
            warn!("No MQTT status in response: {}", response.as_str());
            return Ok(self.state());
        };
        let value = value.trim_start_matches(':').trim();
        trace!("MQTT status {}", value);

        let state = if value == "1" {
            MqttState::Connected
        } else {
            MqttState::Disconnected
        };
        self.session.set_state(state);
        Ok(state)
    }

    /// Periodic work: status query and reconnection.
    pub fn poll(&mut self) -> Result<(), Error> {
        if self.at.is_blocking_command_active() {
            return Ok(());
        }
        let now = self.at.now();

        if self.status.tick(now) {
            if let Err(e) = self.update_status() {
                warn!("MQTT status query failed: {:?}", e);
            }
        }

        let lost = matches!(self.state(), MqttState::Disconnected | MqttState::Error);
        if lost && self.wanted && self.config.auto_reconnect && self.reconnect.is_due(now) {
            info!("Reconnecting to MQTT broker...");
            if let Err(e) = self.connect() {
                warn!("MQTT reconnect failed: {:?}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{ready_client, MockWire};
    use core::sync::atomic::{AtomicUsize, Ordering};

    const OPEN: &str = "AT+MIPSTART=\"broker.example.com\",\"1883\"";

    fn broker(wire: &MockWire) {
        wire.respond("AT+MQTTMODE=1", "OK\r\n");
        wire.respond("AT+CEREG?", "+CEREG: 1,1\r\nOK\r\n");
        wire.respond("AT+CGATT?", "+CGATT: 1\r\nOK\r\n");
        wire.respond("AT+MCONFIG=dev-1,user,secret", "OK\r\n");
    }

    fn config() -> MqttConfig {
        MqttConfig::new("broker.example.com", 1883, "dev-1").with_credentials("user", "secret")
    }

    fn accepting(wire: &MockWire) {
        broker(wire);
        wire.respond_after(OPEN, 200, "OK\r\n\r\nCONNECT OK\r\n");
        wire.respond_after("AT+MCONNECT=1,60", 300, "OK\r\n\r\nCONNACK OK\r\n");
    }

    fn mqtt_commands(wire: &MockWire) -> std::vec::Vec<std::string::String> {
        wire.sent()
            .into_iter()
            .filter(|c| c.starts_with("AT+M"))
            .collect()
    }

    #[test]
    fn connect_runs_handshake() {
        static UP: AtomicUsize = AtomicUsize::new(0);
        fn on_connection(connected: bool) {
            if connected {
                UP.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (client, wire, _clock) = ready_client();
        accepting(&wire);
        wire.clear_sent();

        let session = MqttSession::new();
        session.set_connection_callback(on_connection);
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.begin().unwrap();
        mqtt.connect().unwrap();

        assert!(mqtt.is_connected());
        assert_eq!(UP.load(Ordering::SeqCst), 1);
        assert_eq!(
            mqtt_commands(&wire),
            vec![
                "AT+MQTTMODE=1",
                "AT+MCONFIG=dev-1,user,secret",
                OPEN,
                "AT+MCONNECT=1,60"
            ]
        );

        // Already connected, nothing is sent.
        wire.clear_sent();
        mqtt.connect().unwrap();
        assert!(wire.sent().is_empty());
    }

    #[test]
    fn already_open_link_counts_as_connected() {
        let (client, wire, _clock) = ready_client();
        broker(&wire);
        wire.respond(OPEN, "OK\r\n\r\nALREADY CONNECT\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.connect().unwrap();
        assert!(mqtt.is_connected());
        assert!(!wire.sent().iter().any(|c| c.starts_with("AT+MCONNECT")));
    }

    #[test]
    fn connect_requires_network() {
        let (client, wire, _clock) = ready_client();
        wire.respond("AT+CEREG?", "+CEREG: 1,2\r\nOK\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        assert_eq!(mqtt.connect(), Err(Error::NetworkNotReady));
        assert_eq!(mqtt.state(), MqttState::Error);
        assert!(!wire.sent().iter().any(|c| c.starts_with("AT+MCONFIG")));
    }

    #[test]
    fn refused_link_is_an_error() {
        let (client, wire, _clock) = ready_client();
        broker(&wire);
        wire.respond(OPEN, "OK\r\n\r\nCONNECT FAIL\r\nERROR\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        assert_eq!(mqtt.connect(), Err(Error::ConnectFailed));
        assert_eq!(mqtt.state(), MqttState::Error);
    }

    #[test]
    fn publish_sends_hex_payload() {
        let (client, wire, _clock) = ready_client();
        accepting(&wire);
        wire.respond("AT+MPUB=\"t/1\",1,0,\"7b2261223a317d\"", "OK\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        assert_eq!(
            mqtt.publish("t/1", b"{\"a\":1}", QoS::AtLeastOnce, false),
            Err(Error::NotConnected)
        );

        mqtt.connect().unwrap();
        mqtt.publish("t/1", b"{\"a\":1}", QoS::AtLeastOnce, false)
            .unwrap();
        assert!(mqtt.is_connected());
    }

    #[test]
    fn rejected_publish_marks_error() {
        static DOWN: AtomicUsize = AtomicUsize::new(0);
        fn on_connection(connected: bool) {
            if !connected {
                DOWN.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (client, wire, _clock) = ready_client();
        accepting(&wire);
        wire.respond("AT+MPUB=\"t\",0,1,\"6869\"", "ERROR\r\n");

        let session = MqttSession::new();
        session.set_connection_callback(on_connection);
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.connect().unwrap();

        assert!(mqtt.publish("t", b"hi", QoS::AtMostOnce, true).is_err());
        assert_eq!(mqtt.state(), MqttState::Error);
        assert_eq!(DOWN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queued_publish() {
        let (client, wire, clock) = ready_client();
        accepting(&wire);
        wire.respond_after("AT+MPUB=\"t\",0,0,\"6869\"", 100, "OK\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.connect().unwrap();

        let id = mqtt.publish_async("t", b"hi", QoS::AtMostOnce, false).unwrap();
        for _ in 0..30 {
            client.process_commands().unwrap();
            clock.advance(10);
        }
        assert!(client.is_command_completed(id));
    }

    #[test]
    fn subscriptions_are_tracked_and_renewed() {
        let (client, wire, _clock) = ready_client();
        accepting(&wire);
        wire.respond("AT+MSUB=\"a/b\",1", "OK\r\n\r\nSUBACK\r\n");
        wire.respond("AT+MUNSUB=\"a/b\"", "OK\r\n");
        wire.respond("AT+MDISCONNECT", "OK\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.connect().unwrap();
        mqtt.subscribe("a/b", QoS::AtLeastOnce).unwrap();
        assert!(mqtt.is_subscribed("a/b"));

        mqtt.disconnect().unwrap();
        assert_eq!(mqtt.state(), MqttState::Disconnected);

        wire.clear_sent();
        mqtt.connect().unwrap();
        assert!(wire.sent().iter().any(|c| c == "AT+MSUB=\"a/b\",1"));

        mqtt.unsubscribe("a/b").unwrap();
        assert!(!mqtt.is_subscribed("a/b"));
    }

    #[test]
    fn subscription_table_is_bounded() {
        let (client, wire, _clock) = ready_client();
        accepting(&wire);
        for i in 0..=MAX_SUBSCRIPTIONS {
            wire.respond(&std::format!("AT+MSUB=\"t/{}\",0", i), "SUBACK\r\n");
        }

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.connect().unwrap();
        for i in 0..MAX_SUBSCRIPTIONS {
            mqtt.subscribe(&std::format!("t/{}", i), QoS::AtMostOnce)
                .unwrap();
        }
        assert_eq!(
            mqtt.subscribe("t/20", QoS::AtMostOnce),
            Err(Error::SubscriptionLimit)
        );
        // Renewing a known topic still works.
        mqtt.subscribe("t/3", QoS::AtMostOnce).unwrap();
        assert_eq!(mqtt.subscriptions().count(), MAX_SUBSCRIPTIONS);
    }

    #[test]
    fn inbound_messages_are_cached_and_decoded() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        fn on_message(topic: &str, payload: &str) {
            assert_eq!(topic, "mqtt/pub");
            assert!(payload.starts_with("msg"));
            SEEN.fetch_add(1, Ordering::SeqCst);
        }

        let session = MqttSession::new();
        let (client, wire, _clock) = ready_client();
        wire.respond("AT+MQTTMODE=1", "OK\r\n");
        session.set_message_callback(on_message);
        client.urc(|d| session.register(d)).unwrap();

        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.begin().unwrap();

        for i in 0..12u8 {
            let payload = std::format!("msg{}", i);
            let hex = encode_hex::<64>(payload.as_bytes()).unwrap();
            wire.push(&std::format!(
                "+MSUB: \"mqtt/pub\",{} byte,{}\r\n",
                payload.len(),
                hex
            ));
            client.process_commands().unwrap();
        }

        assert_eq!(SEEN.load(Ordering::SeqCst), 12);
        assert_eq!(session.message_count(), MAX_CACHED_MESSAGES);
        let oldest = session.next_message().unwrap();
        assert_eq!(oldest.topic.as_str(), "mqtt/pub");
        assert_eq!(oldest.payload.as_str(), "msg2");
    }

    #[test]
    fn plain_payload_kept_verbatim() {
        let session = MqttSession::new();
        let line = "+MSUB: \"mqtt/pub\",20 byte,data from tcp server";
        let urc = UrcData::parse(line, crate::urc::UrcCategory::MqttMessage, Instant::from_millis(0));
        session.handle(&urc).unwrap();
        assert_eq!(
            session.next_message().unwrap().payload.as_str(),
            "data from tcp server"
        );
    }

    #[test]
    fn connection_report_updates_state() {
        let session = MqttSession::new();
        let (client, wire, _clock) = ready_client();
        client.urc(|d| session.register(d)).unwrap();

        wire.push("+MCONNECT: 1,0\r\n");
        client.process_commands().unwrap();
        assert!(session.is_connected());

        wire.push("+MCONNECT: 1,5\r\n");
        client.process_commands().unwrap();
        assert_eq!(session.state(), MqttState::Disconnected);
    }

    #[test]
    fn poll_reconnects_after_drop() {
        let (client, wire, clock) = ready_client();
        accepting(&wire);
        wire.respond_once("AT+MQTTSTATU", "+MQTTSTATU :0\r\nOK\r\n");
        wire.respond("AT+MQTTSTATU", "+MQTTSTATU :1\r\nOK\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.connect().unwrap();

        clock.advance(5_000);
        wire.clear_sent();
        mqtt.poll().unwrap();

        let sent = mqtt_commands(&wire);
        assert_eq!(sent.first().map(|s| s.as_str()), Some("AT+MQTTSTATU"));
        assert!(sent.iter().any(|c| c == "AT+MCONNECT=1,60"));
        assert!(mqtt.is_connected());
    }

    #[test]
    fn no_reconnect_after_disconnect() {
        let (client, wire, clock) = ready_client();
        accepting(&wire);
        wire.respond("AT+MDISCONNECT", "OK\r\n");
        wire.respond("AT+MQTTSTATU", "+MQTTSTATU :0\r\nOK\r\n");

        let session = MqttSession::new();
        let mut mqtt = Mqtt::new(&client, &session, config());
        mqtt.connect().unwrap();
        mqtt.disconnect().unwrap();

        clock.advance(10_000);
        wire.clear_sent();
        mqtt.poll().unwrap();
        assert_eq!(mqtt_commands(&wire), vec!["AT+MQTTSTATU"]);
    }
}
