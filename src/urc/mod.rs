//! Unsolicited result codes
//!
//! Lines the modem emits on its own share the `+PREFIX:` syntax with the
//! responses of regular commands. [`is_unsolicited`] decides which is which,
//! [`UrcDispatcher`] routes the unsolicited ones to registered handlers.

mod types;

pub use types::*;

use embassy_time::Instant;
use heapless::Vec;

use crate::command::CommandKind;
use crate::error::Error;

pub const MAX_HANDLERS: usize = 16;
pub const MAX_PARAMS: usize = 16;

/// Tokens that may introduce an unsolicited line.
const URC_TOKENS: &[&str] = &[
    "+",
    "RING",
    "NO CARRIER",
    "CMTI",
    "CLIP",
    "CGEV",
    "CMS ERROR",
    "CME ERROR",
];

/// Prefixes that are unsolicited even while a command is running.
const ALWAYS_UNSOLICITED: &[&str] = &["+MCONNECT:", "+MSUB:"];

/// Decide whether `line` is an unsolicited report or part of a response.
///
/// `executing` is the kind of the command currently awaiting its response, if any.
pub fn is_unsolicited(line: &str, executing: Option<CommandKind>) -> bool {
    let line = line.trim();
    if !URC_TOKENS.iter().any(|t| line.starts_with(t)) {
        return false;
    }

    let Some(kind) = executing else {
        return true;
    };

    if kind.response_prefixes().iter().any(|p| line.starts_with(p)) {
        trace!("Suppressing {} response line: {}", kind.as_str(), line);
        return false;
    }

    if ALWAYS_UNSOLICITED.iter().any(|p| line.starts_with(p)) {
        return true;
    }

    trace!("Treating as response: {}", line);
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UrcCategory {
    NetworkRegistration,
    SignalQuality,
    GnssInfo,
    MqttMessage,
    MqttConnection,
    SmsReceived,
    IncomingCall,
    PdpDeactivated,
    ErrorReport,
    Unknown,
}

impl UrcCategory {
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| line.starts_with(p));

        if starts(&["+CREG:", "+CGREG:", "+CEREG:"]) {
            Self::NetworkRegistration
        } else if starts(&["+CSQ:"]) {
            Self::SignalQuality
        } else if starts(&["+UGNSINF:", "+CGNSINF:"]) {
            Self::GnssInfo
        } else if starts(&["+MSUB:"]) {
            Self::MqttMessage
        } else if starts(&["+MCONNECT:"]) {
            Self::MqttConnection
        } else if starts(&["+CMTI:"]) {
            Self::SmsReceived
        } else if starts(&["RING", "+CLIP:"]) {
            Self::IncomingCall
        } else if starts(&["+CGEV:"]) {
            Self::PdpDeactivated
        } else if starts(&["+CME ERROR:", "+CMS ERROR:"]) {
            Self::ErrorReport
        } else {
            Self::Unknown
        }
    }
}

/// A parsed unsolicited line, borrowed from the line it was parsed from.
#[derive(Debug, Clone)]
pub struct UrcData<'l> {
    pub category: UrcCategory,
    /// Everything up to and including the first `:`, or the whole line if there is none.
    pub prefix: &'l str,
    pub raw: &'l str,
    pub params: Vec<&'l str, MAX_PARAMS>,
    pub timestamp: Instant,
}

impl<'l> UrcData<'l> {
    pub fn parse(line: &'l str, category: UrcCategory, timestamp: Instant) -> Self {
        let raw = line.trim();
        let (prefix, body) = match raw.find(':') {
            Some(idx) if idx > 0 => (&raw[..=idx], &raw[idx + 1..]),
            _ => (raw, ""),
        };

        Self {
            category,
            prefix,
            raw,
            params: split_params(body),
            timestamp,
        }
    }

    pub fn param(&self, idx: usize) -> Option<&'l str> {
        self.params.get(idx).copied()
    }

    /// Everything after the prefix, trimmed.
    pub fn body(&self) -> &'l str {
        self.raw[self.prefix.len()..].trim()
    }
}

/// Split on commas outside of double quotes. Pieces are trimmed, empty
/// pieces skipped and surrounding quotes removed.
pub fn split_params(body: &str) -> Vec<&str, MAX_PARAMS> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in body.char_indices().chain(core::iter::once((body.len(), ','))) {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes || i == body.len() => {
                let piece = body[start..i].trim();
                start = i + 1;
                if piece.is_empty() {
                    continue;
                }
                if params.push(unquote(piece)).is_err() {
                    warn!("URC has more than {} parameters", MAX_PARAMS);
                    break;
                }
            }
            _ => {}
        }
    }
    params
}

pub fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

pub trait UrcHandler {
    fn handle(&self, urc: &UrcData<'_>) -> Result<(), Error>;
}

impl<F> UrcHandler for F
where
    F: Fn(&UrcData<'_>) -> Result<(), Error>,
{
    fn handle(&self, urc: &UrcData<'_>) -> Result<(), Error> {
        self(urc)
    }
}

/// Pin down the signature of a closure so it can be registered as a handler.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&UrcData<'_>) -> Result<(), Error>,
{
    f
}

#[derive(Clone, Copy)]
pub struct Registration<'h> {
    pub prefix: &'h str,
    pub category: UrcCategory,
    pub handler: &'h dyn UrcHandler,
    pub enabled: bool,
    pub description: &'h str,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UrcStatistics {
    pub processed: u32,
    pub matched: u32,
    pub unmatched: u32,
    pub failed: u32,
}

/// Route picked for a line, see [`UrcDispatcher::route`].
#[derive(Clone, Copy)]
pub struct Route<'h> {
    pub category: UrcCategory,
    pub prefix: &'h str,
    pub handler: &'h dyn UrcHandler,
}

/// Prefix keyed table of URC handlers.
pub struct UrcDispatcher<'h> {
    registrations: Vec<Registration<'h>, MAX_HANDLERS>,
    processing_enabled: bool,
    stats: UrcStatistics,
}

impl<'h> Default for UrcDispatcher<'h> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> UrcDispatcher<'h> {
    pub const fn new() -> Self {
        Self {
            registrations: Vec::new(),
            processing_enabled: true,
            stats: UrcStatistics {
                processed: 0,
                matched: 0,
                unmatched: 0,
                failed: 0,
            },
        }
    }

    /// Register `handler` for lines starting with `prefix`, replacing an
    /// existing registration of the same prefix.
    pub fn register(
        &mut self,
        prefix: &'h str,
        category: UrcCategory,
        handler: &'h dyn UrcHandler,
        description: &'h str,
    ) -> Result<(), Error> {
        if let Some(existing) = self.registrations.iter_mut().find(|r| r.prefix == prefix) {
            existing.category = category;
            existing.handler = handler;
            existing.description = description;
            debug!("Updated handler for prefix: {}", prefix);
            return Ok(());
        }

        self.registrations
            .push(Registration {
                prefix,
                category,
                handler,
                enabled: true,
                description,
            })
            .map_err(|_| Error::HandlerTableFull)?;
        debug!("Registered handler for prefix: {} ({})", prefix, description);
        Ok(())
    }

    pub fn unregister(&mut self, prefix: &str) -> bool {
        match self.registrations.iter().position(|r| r.prefix == prefix) {
            Some(idx) => {
                self.registrations.remove(idx);
                debug!("Unregistered handler for prefix: {}", prefix);
                true
            }
            None => false,
        }
    }

    pub fn set_enabled(&mut self, prefix: &str, enabled: bool) -> bool {
        match self.registrations.iter_mut().find(|r| r.prefix == prefix) {
            Some(r) => {
                r.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn has_handler(&self, prefix: &str) -> bool {
        self.registrations.iter().any(|r| r.prefix == prefix)
    }

    pub fn handler_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &Registration<'h>> {
        self.registrations.iter()
    }

    pub fn clear(&mut self) {
        self.registrations.clear();
    }

    pub fn set_processing_enabled(&mut self, enabled: bool) {
        debug!(
            "URC processing {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.processing_enabled = enabled;
    }

    pub fn is_processing_enabled(&self) -> bool {
        self.processing_enabled
    }

    pub fn statistics(&self) -> UrcStatistics {
        self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = UrcStatistics::default();
    }

    /// Count `line` and look up the handler for it, without calling it.
    ///
    /// Lets the caller release its borrow of the dispatcher before running the handler.
    pub fn route(&mut self, line: &str) -> Option<Route<'h>> {
        let line = line.trim();
        if !self.processing_enabled || line.is_empty() {
            return None;
        }

        self.stats.processed += 1;
        match self
            .registrations
            .iter()
            .find(|r| r.enabled && line.starts_with(r.prefix))
        {
            Some(r) => {
                self.stats.matched += 1;
                Some(Route {
                    category: r.category,
                    prefix: r.prefix,
                    handler: r.handler,
                })
            }
            None => {
                self.stats.unmatched += 1;
                trace!("No handler for line: {}", line);
                None
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.stats.failed += 1;
    }

    /// Dispatch `line` to its handler. Returns true if a handler was invoked.
    pub fn process_line(&mut self, line: &str, now: Instant) -> bool {
        let Some(route) = self.route(line) else {
            return false;
        };
        if invoke(&route, line, now).is_err() {
            self.record_failure();
        }
        true
    }

    pub fn on_network_registration(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        let c = UrcCategory::NetworkRegistration;
        self.register("+CREG:", c, handler, "Network Registration")?;
        self.register("+CGREG:", c, handler, "GPRS Registration")?;
        self.register("+CEREG:", c, handler, "EPS Registration")
    }

    pub fn on_signal_quality(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        self.register("+CSQ:", UrcCategory::SignalQuality, handler, "Signal Quality")
    }

    pub fn on_gnss_info(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        self.register("+UGNSINF:", UrcCategory::GnssInfo, handler, "GNSS Info (URC)")?;
        self.register("+CGNSINF:", UrcCategory::GnssInfo, handler, "GNSS Info")
    }

    pub fn on_mqtt_message(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        self.register("+MSUB:", UrcCategory::MqttMessage, handler, "MQTT Message")
    }

    pub fn on_mqtt_connection(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        self.register(
            "+MCONNECT:",
            UrcCategory::MqttConnection,
            handler,
            "MQTT Connection",
        )
    }

    pub fn on_sms_received(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        self.register("+CMTI:", UrcCategory::SmsReceived, handler, "SMS Received")
    }

    pub fn on_incoming_call(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        self.register("RING", UrcCategory::IncomingCall, handler, "Incoming Call")?;
        self.register("+CLIP:", UrcCategory::IncomingCall, handler, "Caller ID")
    }

    pub fn on_pdp_deactivated(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        self.register(
            "+CGEV:",
            UrcCategory::PdpDeactivated,
            handler,
            "PDP Context Event",
        )
    }

    pub fn on_error_report(&mut self, handler: &'h dyn UrcHandler) -> Result<(), Error> {
        let c = UrcCategory::ErrorReport;
        self.register("+CME ERROR:", c, handler, "CME Error")?;
        self.register("+CMS ERROR:", c, handler, "CMS Error")
    }

    pub fn log_handlers(&self) {
        info!("URC handlers ({})", self.registrations.len());
        for r in self.registrations.iter() {
            info!(
                "{} - {} ({})",
                r.prefix,
                r.description,
                if r.enabled { "enabled" } else { "disabled" }
            );
        }
    }
}

/// Parse `line` and run the handler of `route` on it.
pub(crate) fn invoke(route: &Route<'_>, line: &str, now: Instant) -> Result<(), Error> {
    let data = UrcData::parse(line, route.category, now);
    route.handler.handle(&data).map_err(|e| {
        error!("URC handler for {} failed: {:?}", route.prefix, e);
        e
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<std::vec::Vec<(std::string::String, usize)>>,
    }

    impl UrcHandler for Recorder {
        fn handle(&self, urc: &UrcData<'_>) -> Result<(), Error> {
            self.seen
                .borrow_mut()
                .push((urc.prefix.to_string(), urc.params.len()));
            Ok(())
        }
    }

    #[test]
    fn idle_plus_lines_are_unsolicited() {
        assert!(is_unsolicited("+CEREG: 1", None));
        assert!(is_unsolicited("RING", None));
        assert!(!is_unsolicited("OK", None));
        assert!(!is_unsolicited("862012345678901", None));
    }

    #[test]
    fn command_responses_are_suppressed() {
        let gnss = Some(CommandKind::GnssInfo);
        assert!(!is_unsolicited("+CGNSINF: 1,1,20250710083000.000,31.2", gnss));
        assert!(is_unsolicited("+MSUB: \"t\",\"1234\"", gnss));
        assert!(is_unsolicited("+MCONNECT: 1,0", gnss));
        assert!(!is_unsolicited("+CREG: 0,1", gnss));

        let generic = Some(CommandKind::Generic);
        assert!(!is_unsolicited("+CSQ: 18,99", generic));
        assert!(!is_unsolicited("+CME ERROR: 767", generic));
    }

    #[test]
    fn params_respect_quotes() {
        let p = split_params(" \"a,b\", 2 ,, \"\" ,x ");
        assert_eq!(p.as_slice(), &["a,b", "2", "", "x"]);
    }

    #[test]
    fn parse_splits_prefix() {
        let data = UrcData::parse(
            "+MSUB: \"t\",\"1234\"\r",
            UrcCategory::MqttMessage,
            Instant::from_millis(5),
        );
        assert_eq!(data.prefix, "+MSUB:");
        assert_eq!(data.params.as_slice(), &["t", "1234"]);
        assert_eq!(data.body(), "\"t\",\"1234\"");

        let ring = UrcData::parse("RING", UrcCategory::IncomingCall, Instant::from_millis(0));
        assert_eq!(ring.prefix, "RING");
        assert!(ring.params.is_empty());
    }

    #[test]
    fn classify_categories() {
        assert_eq!(UrcCategory::classify("+CGREG: 5"), UrcCategory::NetworkRegistration);
        assert_eq!(UrcCategory::classify("+MCONNECT: 1,0"), UrcCategory::MqttConnection);
        assert_eq!(UrcCategory::classify("+CMS ERROR: 1"), UrcCategory::ErrorReport);
        assert_eq!(UrcCategory::classify("+FOO: 1"), UrcCategory::Unknown);
    }

    #[test]
    fn dispatch_to_matching_handler() {
        let rec = Recorder::default();
        let mut d = UrcDispatcher::new();
        d.on_mqtt_message(&rec).unwrap();

        assert!(d.process_line("+MSUB: \"t\",\"1234\"", Instant::from_millis(0)));
        assert!(!d.process_line("+CSQ: 18,99", Instant::from_millis(0)));

        assert_eq!(*rec.seen.borrow(), vec![("+MSUB:".to_string(), 2)]);
        assert_eq!(
            d.statistics(),
            UrcStatistics {
                processed: 2,
                matched: 1,
                unmatched: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn registration_is_idempotent() {
        let first = Recorder::default();
        let second = Recorder::default();
        let mut d = UrcDispatcher::new();

        d.register("+CSQ:", UrcCategory::SignalQuality, &first, "one").unwrap();
        d.register("+CSQ:", UrcCategory::SignalQuality, &second, "two").unwrap();
        assert_eq!(d.handler_count(), 1);

        d.process_line("+CSQ: 10,0", Instant::from_millis(0));
        assert!(first.seen.borrow().is_empty());
        assert_eq!(second.seen.borrow().len(), 1);
    }

    #[test]
    fn failing_handler_does_not_stop_dispatch() {
        let failing = handler_fn(|_| Err(Error::Parse));
        let rec = Recorder::default();
        let mut d = UrcDispatcher::new();
        d.on_signal_quality(&failing).unwrap();
        d.on_sms_received(&rec).unwrap();

        assert!(d.process_line("+CSQ: 10,0", Instant::from_millis(0)));
        assert!(d.process_line("+CMTI: \"SM\",3", Instant::from_millis(0)));

        assert_eq!(d.statistics().failed, 1);
        assert_eq!(rec.seen.borrow().len(), 1);
    }

    #[test]
    fn disabled_processing_and_handlers() {
        let rec = Recorder::default();
        let mut d = UrcDispatcher::new();
        d.on_incoming_call(&rec).unwrap();
        assert_eq!(d.handler_count(), 2);

        d.set_enabled("RING", false);
        assert!(!d.process_line("RING", Instant::from_millis(0)));

        d.set_processing_enabled(false);
        assert!(!d.process_line("+CLIP: \"123\",129", Instant::from_millis(0)));
        assert_eq!(d.statistics().processed, 1);

        d.set_processing_enabled(true);
        assert!(d.unregister("+CLIP:"));
        assert!(!d.has_handler("+CLIP:"));
        d.clear();
        assert_eq!(d.handler_count(), 0);
    }

    #[test]
    fn table_is_bounded() {
        const PREFIXES: [&str; 17] = [
            "+A0:", "+A1:", "+A2:", "+A3:", "+A4:", "+A5:", "+A6:", "+A7:", "+A8:", "+A9:",
            "+B0:", "+B1:", "+B2:", "+B3:", "+B4:", "+B5:", "+B6:",
        ];
        let rec = Recorder::default();
        let mut d = UrcDispatcher::new();
        for p in &PREFIXES[..MAX_HANDLERS] {
            d.register(p, UrcCategory::Unknown, &rec, "").unwrap();
        }
        assert_eq!(
            d.register(PREFIXES[16], UrcCategory::Unknown, &rec, ""),
            Err(Error::HandlerTableFull)
        );
    }
}
