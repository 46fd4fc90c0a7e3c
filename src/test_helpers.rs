//! Simulated time and serial line for unit tests.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::rc::Rc;
use std::string::{String, ToString};
use std::sync::Once;
use std::vec::Vec;

use embassy_time::{Duration, Instant};
use embedded_io::{ErrorType, Read, ReadReady, Write};

use crate::clock::Clock;
use crate::config::{Config, NoPin};
use crate::Client;

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .is_test(true)
            .init();
    });
}

/// Manually advanced clock. Delays advance it instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn millis(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.millis())
    }

    fn delay(&self, duration: Duration) {
        self.advance(duration.as_millis());
    }
}

struct Rule {
    command: String,
    response: String,
    delay: u64,
    once: bool,
}

#[derive(Default)]
struct Wire {
    /// Bytes towards the driver, each with the time it becomes readable.
    inbound: Vec<(u64, u8)>,
    partial: Vec<u8>,
    raw: Vec<u8>,
    sent: Vec<(u64, String)>,
    rules: Vec<Rule>,
}

impl Wire {
    fn schedule(&mut self, at: u64, data: &str) {
        let idx = self.inbound.partition_point(|(t, _)| *t <= at);
        self.inbound
            .splice(idx..idx, data.bytes().map(|b| (at, b)));
    }

    fn command_written(&mut self, now: u64, command: String) {
        if let Some(idx) = self.rules.iter().position(|r| r.command == command) {
            let at = now + self.rules[idx].delay;
            let response = self.rules[idx].response.clone();
            if self.rules[idx].once {
                self.rules.remove(idx);
            }
            self.schedule(at, &response);
        }
        self.sent.push((now, command));
    }
}

/// Driver side of the simulated serial line.
pub struct MockSerial {
    clock: MockClock,
    wire: Rc<RefCell<Wire>>,
}

/// Modem side of the simulated serial line.
///
/// Answers commands according to its rules, first matching rule wins.
#[derive(Clone)]
pub struct MockWire {
    clock: MockClock,
    wire: Rc<RefCell<Wire>>,
}

impl MockSerial {
    pub fn new(clock: &MockClock) -> (MockSerial, MockWire) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        (
            MockSerial {
                clock: clock.clone(),
                wire: wire.clone(),
            },
            MockWire {
                clock: clock.clone(),
                wire,
            },
        )
    }
}

impl ErrorType for MockSerial {
    type Error = Infallible;
}

impl ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        let now = self.clock.millis();
        Ok(matches!(self.wire.borrow().inbound.first(), Some((t, _)) if *t <= now))
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let now = self.clock.millis();
        let mut wire = self.wire.borrow_mut();
        let ready = wire
            .inbound
            .iter()
            .take(buf.len())
            .take_while(|(t, _)| *t <= now)
            .count();
        for (slot, (_, b)) in buf.iter_mut().zip(wire.inbound.drain(..ready)) {
            *slot = b;
        }
        Ok(ready)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let now = self.clock.millis();
        let mut wire = self.wire.borrow_mut();
        wire.raw.extend_from_slice(buf);
        for b in buf {
            wire.partial.push(*b);
            if wire.partial.ends_with(b"\r\n") {
                let line = core::mem::take(&mut wire.partial);
                let command = String::from_utf8_lossy(&line[..line.len() - 2]).to_string();
                wire.command_written(now, command);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl MockWire {
    pub fn respond(&self, command: &str, response: &str) {
        self.rule(command, response, 0, false);
    }

    pub fn respond_after(&self, command: &str, delay_ms: u64, response: &str) {
        self.rule(command, response, delay_ms, false);
    }

    pub fn respond_once(&self, command: &str, response: &str) {
        self.rule(command, response, 0, true);
    }

    fn rule(&self, command: &str, response: &str, delay: u64, once: bool) {
        self.wire.borrow_mut().rules.push(Rule {
            command: command.to_string(),
            response: response.to_string(),
            delay,
            once,
        });
    }

    /// Make `data` readable right away.
    pub fn push(&self, data: &str) {
        self.push_at(self.clock.millis(), data);
    }

    /// Make `data` readable from `at_ms` on.
    pub fn push_at(&self, at_ms: u64, data: &str) {
        self.wire.borrow_mut().schedule(at_ms, data);
    }

    /// Commands written so far, without line terminator.
    pub fn sent(&self) -> Vec<String> {
        self.wire
            .borrow()
            .sent
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn sent_at(&self) -> Vec<(u64, String)> {
        self.wire.borrow().sent.clone()
    }

    pub fn raw_sent(&self) -> Vec<u8> {
        self.wire.borrow().raw.clone()
    }

    pub fn clear_sent(&self) {
        let mut wire = self.wire.borrow_mut();
        wire.sent.clear();
        wire.raw.clear();
    }
}

/// Rules for the start-up sequence of a healthy module.
pub fn healthy_modem(wire: &MockWire) {
    wire.respond("AT", "OK\r\n");
    wire.respond("ATE0", "OK\r\n");
    wire.respond("AT+CEREG=1", "OK\r\n");
    wire.respond("AT+CPIN?", "+CPIN: READY\r\n\r\nOK\r\n");
}

/// A client that went through `begin` against a healthy module.
pub fn ready_client<'h>() -> (Client<'h, MockSerial, MockClock>, MockWire, MockClock) {
    init_logger();
    let clock = MockClock::new();
    let (serial, wire) = MockSerial::new(&clock);
    healthy_modem(&wire);

    let client = Client::new(serial, clock.clone(), Config::default());
    client
        .begin::<NoPin>(None)
        .expect("module should initialize");
    (client, wire, clock)
}
