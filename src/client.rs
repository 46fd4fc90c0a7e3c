use core::cell::RefCell;

use atat::AtatCmd;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;
use embedded_io::{Read, ReadReady, Write};

use crate::{
    clock::Clock,
    command::{
        self, general::AT, general::DisableEcho, network_service::types::RegistrationUrc,
        network_service::SetEpsNetworkRegistrationUrc, CmeError, CommandKind,
    },
    config::Config,
    coordinator::{CommandId, Coordinator, Outcome},
    error::Error,
    module_timing, power,
    transport::{append_line, trimmed, Line, Response, Transport},
    urc::{self, is_unsolicited, UrcCategory, UrcDispatcher, UrcHandler, UrcStatistics},
};

/// The command surface feature modules are written against.
pub trait AtClient {
    /// Send `command` and wait for a generic terminal line: one ending in `OK`
    /// (`OK`, `CONNECT OK`, `CONNACK OK`), `SUBACK`, or an error line.
    ///
    /// An empty response means the modem did not answer within `timeout`.
    fn send_command(&self, command: &str, timeout: Duration) -> Result<Response, Error>;

    /// Send `command` and wait for a line ending in one of `expected`, or an error line.
    fn send_command_expecting_any(
        &self,
        command: &str,
        expected: &[&str],
        timeout: Duration,
    ) -> Result<Response, Error>;

    /// Send `command` and wait until the completion predicate of its kind holds.
    fn send_command_until_complete(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<Response, Error>;

    /// Queue `command` for execution by the client's tick.
    fn send_command_async(&self, command: &str, timeout: Duration) -> Result<CommandId, Error>;

    fn is_command_completed(&self, id: CommandId) -> bool;

    /// Take the outcome of a retired queued command.
    fn command_response(&self, id: CommandId) -> Option<Outcome>;

    fn is_blocking_command_active(&self) -> bool;

    fn now(&self) -> Instant;

    fn delay(&self, duration: Duration);

    fn send_command_expecting(
        &self,
        command: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<Response, Error> {
        self.send_command_expecting_any(command, &[expected], timeout)
    }

    /// Generic exchange that logs whether `expected` showed up.
    fn send_command_with_response(
        &self,
        command: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<Response, Error> {
        let response = self.send_command(command, timeout)?;
        if response.contains(expected) {
            debug!("Expected response found: {}", expected);
        } else {
            warn!(
                "Expected response not found. Expected: {}, Got: {}",
                expected,
                response.as_str()
            );
        }
        Ok(response)
    }

    /// True iff the response contains `OK`.
    fn send_command_bool(&self, command: &str, timeout: Duration) -> bool {
        match self.send_command(command, timeout) {
            Ok(response) if response.contains("OK") => true,
            Ok(response) => {
                warn!("Command failed: {}, Response: {}", command, response.as_str());
                false
            }
            Err(e) => {
                warn!("Command failed: {}, {:?}", command, e);
                false
            }
        }
    }

    /// Run a typed command and parse its information line.
    fn send<Cmd: AtatCmd>(&self, cmd: &Cmd) -> Result<Cmd::Response, Error> {
        let text = command::encode(cmd)?;
        let response = self.send_command(&text, Duration::from_millis(Cmd::MAX_TIMEOUT_MS.into()))?;
        command::decode(cmd, &response)
    }
}

#[derive(Clone, Copy)]
enum Terminal<'a> {
    Generic,
    Expecting(&'a [&'a str]),
    Complete(CommandKind),
}

impl Terminal<'_> {
    fn reached(&self, line: &str, response: &str) -> bool {
        match self {
            Self::Generic => {
                line.ends_with("OK") || line == "SUBACK" || command::is_error_line(line)
            }
            Self::Expecting(expected) => {
                expected.iter().any(|e| line.ends_with(e)) || command::is_error_line(line)
            }
            Self::Complete(kind) => kind.is_complete(response),
        }
    }
}

struct Shared {
    initialized: bool,
    reboot_detected: bool,
    coordinator: Coordinator,
}

/// AT command client for a single modem on a single serial port.
///
/// Synchronous exchanges block the caller until a terminal line arrives.
/// Queued commands are driven by [`Client::process_commands`], which must be
/// called periodically. Either way only one command is ever in flight and
/// unsolicited lines are routed to the registered URC handlers.
pub struct Client<'h, S, C> {
    transport: RefCell<Transport<S>>,
    clock: C,
    config: Config,
    shared: Mutex<NoopRawMutex, RefCell<Shared>>,
    urc: Mutex<NoopRawMutex, RefCell<UrcDispatcher<'h>>>,
}

impl<'h, S, C> Client<'h, S, C>
where
    S: Read + Write + ReadReady,
    C: Clock,
{
    pub fn new(serial: S, clock: C, config: Config) -> Self {
        Self {
            transport: RefCell::new(Transport::new(serial)),
            clock,
            config,
            shared: Mutex::new(RefCell::new(Shared {
                initialized: false,
                reboot_detected: false,
                coordinator: Coordinator::new(),
            })),
            urc: Mutex::new(RefCell::new(UrcDispatcher::new())),
        }
    }

    fn with_shared<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        self.shared.lock(|s| f(&mut s.borrow_mut()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn is_initialized(&self) -> bool {
        self.with_shared(|s| s.initialized)
    }

    /// The modem printed its boot banner since the last initialisation.
    pub fn is_reboot_detected(&self) -> bool {
        self.with_shared(|s| s.reboot_detected)
    }

    /// Bring up the modem: optional power sequence, settle, then initialise.
    pub fn begin<P: OutputPin>(&self, pwr_pin: Option<&mut P>) -> Result<(), Error> {
        match pwr_pin {
            Some(pin) => power::power_on(pin, &self.clock)?,
            None => debug!("Power pin not configured, serial should be initialized externally"),
        }

        self.clock.delay(module_timing::settle_time());
        self.transport.borrow_mut().discard_input()?;

        let mut attempt = 1;
        loop {
            match self.init_modem() {
                Ok(()) => break,
                Err(e) if attempt < self.config.init_attempts => {
                    warn!("Module init failed: {:?}, retry...", e);
                    attempt += 1;
                    self.clock.delay(module_timing::settle_time());
                }
                Err(e) => return Err(e),
            }
        }

        info!("Module initialized");
        Ok(())
    }

    /// Probe the AT interface, turn echo off, enable registration reports and
    /// wait for the SIM.
    pub fn init_modem(&self) -> Result<(), Error> {
        self.with_shared(|s| s.initialized = false);

        self.probe()?;
        self.transport.borrow_mut().discard_input()?;

        self.command(&DisableEcho)?;
        self.command(&SetEpsNetworkRegistrationUrc {
            n: RegistrationUrc::Enabled,
        })?;

        let mut sim_ready = false;
        for _ in 0..self.config.pin_retries {
            let response = self.exchange(
                "AT+CPIN?",
                self.config.default_timeout,
                Terminal::Expecting(&["READY"]),
            )?;
            if response.contains("READY") {
                sim_ready = true;
                break;
            }
            self.clock.delay(module_timing::pin_retry_delay());
        }
        if !sim_ready {
            error!("SIM PIN not ready");
            return Err(Error::SimNotReady);
        }
        info!("SIM ready");

        self.with_shared(|s| {
            s.initialized = true;
            s.reboot_detected = false;
        });
        Ok(())
    }

    fn probe(&self) -> Result<(), Error> {
        let at = command::encode(&AT)?;
        for _ in 0..self.config.probe_attempts {
            let response = self.exchange(&at, module_timing::probe_timeout(), Terminal::Generic)?;
            if response.contains("boot.rom") {
                info!("boot.rom still initializing, waiting...");
            } else if response.contains("OK") {
                info!("Module AT ready");
                return Ok(());
            } else {
                info!("Module not ready, retry...");
            }
            self.clock.delay(module_timing::probe_retry_delay());
        }
        Err(Error::BaudDetection)
    }

    /// Typed exchange that skips the readiness checks, used during initialisation.
    fn command<Cmd: AtatCmd>(&self, cmd: &Cmd) -> Result<Cmd::Response, Error> {
        let text = command::encode(cmd)?;
        let response = self.exchange(
            &text,
            Duration::from_millis(Cmd::MAX_TIMEOUT_MS.into()),
            Terminal::Generic,
        )?;
        command::decode(cmd, &response)
    }

    fn ensure_ready(&self, kind: CommandKind) -> Result<(), Error> {
        let now = self.clock.now();
        let ceiling = self.config.blocking_timeout;
        self.with_shared(|s| {
            if !s.initialized {
                return Err(Error::Uninitialized);
            }
            if s.reboot_detected {
                return Err(Error::RebootDetected);
            }
            s.coordinator.blocking_mut().expire(now, ceiling);
            if s.coordinator.blocking().rejects(kind) {
                return Err(Error::Blocked);
            }
            Ok(())
        })
    }

    fn checked_exchange(
        &self,
        text: &str,
        timeout: Duration,
        terminal: Terminal<'_>,
    ) -> Result<Response, Error> {
        let kind = CommandKind::classify(text);
        if let Err(e) = self.ensure_ready(kind) {
            warn!("Command rejected: {}, {:?}", text, e);
            return Err(e);
        }
        self.exchange(text, timeout, terminal)
    }

    /// One synchronous request/response exchange.
    fn exchange(
        &self,
        text: &str,
        timeout: Duration,
        terminal: Terminal<'_>,
    ) -> Result<Response, Error> {
        let kind = CommandKind::classify(text);

        self.finish_in_flight()?;
        self.drain_stale()?;

        let remaining = self.with_shared(|s| {
            s.coordinator
                .gap_remaining(self.clock.now(), self.config.command_gap)
        });
        if remaining > Duration::from_ticks(0) {
            self.clock.delay(remaining);
        }

        let now = self.clock.now();
        self.with_shared(|s| {
            s.coordinator.mark_transmitted(now);
            if kind.is_blocking() {
                s.coordinator.blocking_mut().activate(kind, now);
            }
        });

        let written = self.transport.borrow_mut().write_command(text);
        let result = written.and_then(|_| self.collect(kind, now, timeout, terminal));

        if kind.is_blocking() {
            self.with_shared(|s| s.coordinator.blocking_mut().clear());
        }

        let response = result?;
        if response.is_empty() {
            warn!("No response for command: {}", text);
        } else {
            trace!("< {}", response.as_str());
        }
        if let Some(e) = CmeError::parse(&response) {
            warn!("{}: {}", text, e.description());
        }
        Ok(response)
    }

    fn collect(
        &self,
        kind: CommandKind,
        start: Instant,
        timeout: Duration,
        terminal: Terminal<'_>,
    ) -> Result<Response, Error> {
        let mut response = Response::new();
        loop {
            loop {
                let next = self.transport.borrow_mut().next_line()?;
                let Some(line) = next else {
                    break;
                };
                if self.sift(&line, Some(kind)) {
                    continue;
                }
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                append_line(&mut response, &line);
                if terminal.reached(text, &response) {
                    return Ok(trimmed(&response));
                }
            }

            if self.clock.now().saturating_duration_since(start) >= timeout {
                return Ok(trimmed(&response));
            }
            self.clock.delay(module_timing::poll_interval());
        }
    }

    /// Note the reboot banner and hand unsolicited lines to the dispatcher.
    ///
    /// Returns true if the line was consumed as a URC.
    fn sift(&self, line: &Line, executing: Option<CommandKind>) -> bool {
        if line.contains("boot.rom") {
            warn!("Module reboot detected");
            self.with_shared(|s| s.reboot_detected = true);
        }
        if !is_unsolicited(line, executing) {
            return false;
        }
        self.dispatch(line);
        true
    }

    fn dispatch(&self, line: &str) -> bool {
        let route = self.urc.lock(|d| d.borrow_mut().route(line));
        let Some(route) = route else {
            return false;
        };
        if urc::invoke(&route, line, self.clock.now()).is_err() {
            self.urc.lock(|d| d.borrow_mut().record_failure());
        }
        true
    }

    /// Drop lines nobody is waiting for, dispatching the unsolicited ones.
    fn drain_stale(&self) -> Result<(), Error> {
        loop {
            let next = self.transport.borrow_mut().next_line()?;
            let Some(line) = next else {
                return Ok(());
            };
            if !self.sift(&line, None) && !line.trim().is_empty() {
                trace!("Dropping stray line: {}", line.trim());
            }
        }
    }

    /// Run the queued command that is currently in flight to completion.
    fn finish_in_flight(&self) -> Result<(), Error> {
        while self.in_flight().is_some() {
            self.service_current()?;
            if self.in_flight().is_some() {
                self.clock.delay(module_timing::poll_interval());
            }
        }
        Ok(())
    }

    /// Feed available lines to the in-flight command, then check its deadline.
    fn service_current(&self) -> Result<(), Error> {
        loop {
            let Some(kind) = self.with_shared(|s| s.coordinator.executing_kind()) else {
                return Ok(());
            };
            let next = self.transport.borrow_mut().next_line()?;
            let Some(line) = next else {
                break;
            };
            if self.sift(&line, Some(kind)) || line.trim().is_empty() {
                continue;
            }
            let done = self.with_shared(|s| {
                s.coordinator.append(&line);
                s.coordinator.try_complete().is_some()
            });
            if done {
                return Ok(());
            }
        }

        let now = self.clock.now();
        self.with_shared(|s| s.coordinator.try_expire(now));
        Ok(())
    }

    fn transmit_next(&self) -> Result<(), Error> {
        let now = self.clock.now();
        let gap = self.config.command_gap;
        let text = self.with_shared(|s| {
            if !s.coordinator.gap_elapsed(now, gap) {
                return None;
            }
            s.coordinator
                .start_next(now)
                .map(|active| active.command.text.clone())
        });

        if let Some(text) = text {
            if let Err(e) = self.transport.borrow_mut().write_command(&text) {
                self.with_shared(|s| s.coordinator.abort_current());
                return Err(e);
            }
        }
        Ok(())
    }

    /// One tick of the command pipeline.
    ///
    /// Re-initialises the modem if it rebooted, enforces the blocking ceiling,
    /// services the in-flight command and, once idle, handles URCs and
    /// transmits the next queued command.
    pub fn process_commands(&self) -> Result<(), Error> {
        if self.is_reboot_detected() {
            warn!("Reboot observed, re-initializing module");
            self.with_shared(|s| {
                s.coordinator.abort_current();
                s.coordinator.blocking_mut().clear();
            });
            self.init_modem()?;
        }

        let now = self.clock.now();
        let ceiling = self.config.blocking_timeout;
        self.with_shared(|s| s.coordinator.blocking_mut().expire(now, ceiling));

        if self.in_flight().is_some() {
            self.service_current()?;
        }

        if self.in_flight().is_none() {
            self.poll_urcs()?;
            self.transmit_next()?;
        }
        Ok(())
    }

    /// Dispatch pending unsolicited lines. Does nothing while a command is in flight.
    pub fn poll_urcs(&self) -> Result<(), Error> {
        if self.in_flight().is_some() {
            return Ok(());
        }
        self.drain_stale()
    }

    pub fn in_flight(&self) -> Option<CommandId> {
        self.with_shared(|s| s.coordinator.in_flight())
    }

    pub fn pending_commands(&self) -> usize {
        self.with_shared(|s| s.coordinator.pending())
    }

    pub fn set_blocking_command_active(&self, kind: CommandKind) {
        let now = self.clock.now();
        self.with_shared(|s| s.coordinator.blocking_mut().activate(kind, now));
    }

    pub fn clear_blocking_command(&self) {
        self.with_shared(|s| s.coordinator.blocking_mut().clear());
    }

    pub fn register_handler(
        &self,
        prefix: &'h str,
        category: UrcCategory,
        handler: &'h dyn UrcHandler,
        description: &'h str,
    ) -> Result<(), Error> {
        self.urc.lock(|d| {
            d.borrow_mut()
                .register(prefix, category, handler, description)
        })
    }

    pub fn unregister_handler(&self, prefix: &str) -> bool {
        self.urc.lock(|d| d.borrow_mut().unregister(prefix))
    }

    /// Dispatch `line` as a URC. Returns true if a handler was invoked.
    pub fn process_line(&self, line: &str) -> bool {
        self.dispatch(line)
    }

    pub fn urc_statistics(&self) -> UrcStatistics {
        self.urc.lock(|d| d.borrow().statistics())
    }

    /// Access the dispatcher, e.g. for the `on_*` registrations.
    ///
    /// Handlers must not be invoked from within `f`.
    pub fn urc<R>(&self, f: impl FnOnce(&mut UrcDispatcher<'h>) -> R) -> R {
        self.urc.lock(|d| f(&mut d.borrow_mut()))
    }
}

impl<'h, S, C> AtClient for Client<'h, S, C>
where
    S: Read + Write + ReadReady,
    C: Clock,
{
    fn send_command(&self, command: &str, timeout: Duration) -> Result<Response, Error> {
        self.checked_exchange(command, timeout, Terminal::Generic)
    }

    fn send_command_expecting_any(
        &self,
        command: &str,
        expected: &[&str],
        timeout: Duration,
    ) -> Result<Response, Error> {
        self.checked_exchange(command, timeout, Terminal::Expecting(expected))
    }

    fn send_command_until_complete(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<Response, Error> {
        let kind = CommandKind::classify(command);
        self.checked_exchange(command, timeout, Terminal::Complete(kind))
    }

    fn send_command_async(&self, command: &str, timeout: Duration) -> Result<CommandId, Error> {
        if !self.is_initialized() {
            return Err(Error::Uninitialized);
        }
        let now = self.clock.now();
        let ceiling = self.config.blocking_timeout;
        self.with_shared(|s| {
            s.coordinator.blocking_mut().expire(now, ceiling);
            s.coordinator.submit(command, timeout)
        })
    }

    fn is_command_completed(&self, id: CommandId) -> bool {
        self.with_shared(|s| s.coordinator.is_completed(id))
    }

    fn command_response(&self, id: CommandId) -> Option<Outcome> {
        self.with_shared(|s| s.coordinator.take_outcome(id))
    }

    fn is_blocking_command_active(&self) -> bool {
        self.with_shared(|s| s.coordinator.blocking().is_active())
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn delay(&self, duration: Duration) {
        self.clock.delay(duration)
    }
}
