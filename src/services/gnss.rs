//! GNSS positioning, with WiFi and cell based lookups as fallback.
//!
//! The module reports navigation data on request with `AT+CGNSINF`. When the
//! GNSS signal is lost the service can fall back to `AT+WIFILOC` or
//! `AT+CIPGSMLOC`. Those lookups take many seconds and hold the serial line
//! exclusively, so the periodic fallback goes through the command queue and is
//! picked up on a later poll.

use core::fmt;

use embassy_time::{Duration, Instant};

use super::{expect_ok, info_line, Interval};
use crate::client::AtClient;
use crate::command::gnss::types::GnssPower;
use crate::command::gnss::{SetGnssPower, SetGnssReport};
use crate::config::LocationConfig;
use crate::coordinator::{CommandId, Outcome};
use crate::error::Error;

const WIFI_LOOKUP: &str = "AT+WIFILOC=1,1";
const LBS_LOOKUP: &str = "AT+CIPGSMLOC=1,1";
const ENABLE_ASSISTANCE: &str = "AT+CGNSAID=31,1,1,1";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_WITH_FIX: Duration = Duration::from_secs(3);
const POLL_WITHOUT_FIX: Duration = Duration::from_secs(10);

/// Fields in a `+CGNSINF` report, up to the satellite count.
const NAV_FIELDS: usize = 12;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LocationSource {
    #[default]
    None,
    Gnss,
    Wifi,
    Lbs,
}

impl LocationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Gnss => "GNSS",
            Self::Wifi => "WIFI",
            Self::Lbs => "LBS",
        }
    }
}

/// UTC time reported by the receiver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

impl GpsTime {
    /// Parse `YYYYMMDDhhmmss[.sss]`.
    pub fn parse(stamp: &str) -> Option<Self> {
        let num = |range: core::ops::Range<usize>| stamp.get(range)?.parse::<u16>().ok();
        if stamp.len() < 14 {
            return None;
        }

        let millisecond = match stamp.get(14..) {
            Some(frac) if frac.len() > 1 && frac.starts_with('.') => {
                let digits = &frac[1..];
                if !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let (digits, scale) = match digits.len() {
                    1 => (digits, 100),
                    2 => (digits, 10),
                    _ => (digits.get(..3)?, 1),
                };
                digits.parse::<u16>().ok()? * scale
            }
            _ => 0,
        };

        Some(Self {
            year: num(0..4)?,
            month: num(4..6)? as u8,
            day: num(6..8)? as u8,
            hour: num(8..10)? as u8,
            minute: num(10..12)? as u8,
            second: num(12..14)? as u8,
            millisecond,
        })
    }

    /// Plausibility check, the receiver reports zeros or its epoch before the first fix.
    pub fn is_valid(&self) -> bool {
        (2020..=2030).contains(&self.year)
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && self.hour <= 23
            && self.minute <= 59
            && self.second <= 59
    }
}

impl fmt::Display for GpsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millisecond
        )
    }
}

/// One `+CGNSINF` report.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NavInfo {
    pub running: bool,
    pub fixed: bool,
    pub time: Option<GpsTime>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// km/h
    pub speed: f32,
    /// Degrees
    pub course: f32,
    pub hdop: f32,
    pub pdop: f32,
    pub vdop: f32,
    pub satellites: u8,
}

impl NavInfo {
    /// Parse the `+CGNSINF:` line of a response. Reports with fewer than
    /// twelve fields or non numeric values are rejected.
    pub fn parse(response: &str) -> Option<Self> {
        let body = info_line(response, "+CGNSINF:")?;
        let mut fields: heapless::Vec<&str, 24> = heapless::Vec::new();
        for field in body.split(',') {
            if fields.push(field.trim()).is_err() {
                break;
            }
        }
        if fields.len() < NAV_FIELDS {
            return None;
        }

        fn num<V: core::str::FromStr + Default>(field: &str) -> Option<V> {
            if field.is_empty() {
                Some(V::default())
            } else {
                field.parse().ok()
            }
        }

        Some(Self {
            running: fields[0] == "1",
            fixed: fields[1] == "1",
            time: GpsTime::parse(fields[2]),
            latitude: num(fields[3])?,
            longitude: num(fields[4])?,
            altitude: num(fields[5])?,
            speed: num(fields[6])?,
            course: num(fields[7])?,
            hdop: num(fields[8])?,
            pdop: num(fields[9])?,
            vdop: num(fields[10])?,
            satellites: num(fields[11])?,
        })
    }

    pub fn has_fix(&self) -> bool {
        self.running && self.fixed
    }
}

/// Parse the coordinates out of a `+WIFILOC:` or `+CIPGSMLOC:` response,
/// `<code>,<lat>,<lon>[,<date>,<time>]`.
fn parse_lookup(response: &str, prefix: &str) -> Option<(f64, f64)> {
    let mut fields = info_line(response, prefix)?.split(',').map(str::trim);
    let _code = fields.next()?;
    let lat = fields.next().filter(|f| !f.is_empty())?.parse().ok()?;
    let lon = fields.next().filter(|f| !f.is_empty())?.parse().ok()?;
    Some((lat, lon))
}

/// Cached position and receiver state.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GnssData {
    pub running: bool,
    pub fixed: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f32,
    pub course: f32,
    pub hdop: f32,
    pub pdop: f32,
    pub vdop: f32,
    pub satellites: u8,
    pub time: Option<GpsTime>,
    pub source: LocationSource,
    pub last_update: Option<Instant>,
}

impl GnssData {
    /// Fold a report in. The position is only replaced by a report with a fix,
    /// otherwise the previous one is kept.
    fn apply(&mut self, nav: &NavInfo, now: Instant) {
        self.running = nav.running;
        self.fixed = nav.fixed;
        self.satellites = nav.satellites;
        self.hdop = nav.hdop;
        if let Some(time) = nav.time {
            self.time = Some(time);
        }

        if nav.has_fix() {
            self.latitude = nav.latitude;
            self.longitude = nav.longitude;
            self.altitude = nav.altitude;
            self.speed = nav.speed;
            self.course = nav.course;
            self.pdop = nav.pdop;
            self.vdop = nav.vdop;
            self.source = LocationSource::Gnss;
        } else {
            debug!("No fix yet, keeping last position");
        }
        self.last_update = Some(now);
    }

    fn apply_lookup(&mut self, source: LocationSource, lat: f64, lon: f64, now: Instant) {
        self.latitude = lat;
        self.longitude = lon;
        self.altitude = 0.0;
        self.speed = 0.0;
        self.course = 0.0;
        self.hdop = 0.0;
        self.satellites = 0;
        self.fixed = true;
        self.source = source;
        self.last_update = Some(now);
    }

    pub fn has_fix(&self) -> bool {
        self.running && self.fixed
    }

    pub fn gps_time_valid(&self) -> bool {
        self.time.map_or(false, |t| t.is_valid())
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingLookup {
    id: CommandId,
    source: LocationSource,
    since: Instant,
}

pub struct Gnss<'a, T> {
    at: &'a T,
    config: LocationConfig,
    enabled: bool,
    data: GnssData,
    refresh: Interval,
    wifi: Interval,
    lbs: Interval,
    pending: Option<PendingLookup>,
}

impl<'a, T: AtClient> Gnss<'a, T> {
    pub fn new(at: &'a T, config: LocationConfig) -> Self {
        Self {
            at,
            refresh: Interval::new(POLL_WITHOUT_FIX),
            wifi: Interval::new(config.wifi_interval),
            lbs: Interval::new(config.lbs_interval),
            config,
            enabled: false,
            data: GnssData::default(),
            pending: None,
        }
    }

    /// Power the receiver, enable assisted positioning and turn the navigation URC off.
    pub fn enable(&mut self) -> Result<(), Error> {
        info!("Enabling GNSS...");
        self.at.send(&SetGnssPower {
            state: GnssPower::On,
        })?;
        expect_ok(self.at, ENABLE_ASSISTANCE, Duration::from_secs(1))?;
        self.at.send(&SetGnssReport { interval: 0 })?;
        self.at.delay(Duration::from_secs(1));

        self.enabled = true;
        info!("GNSS enabled");
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), Error> {
        self.at.send(&SetGnssPower {
            state: GnssPower::Off,
        })?;
        self.enabled = false;
        self.data.fixed = false;
        info!("GNSS disabled");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn data(&self) -> &GnssData {
        &self.data
    }

    pub fn config(&self) -> &LocationConfig {
        &self.config
    }

    /// Replace the fallback policy. Both lookups become due immediately.
    pub fn configure_fallback(&mut self, config: LocationConfig) {
        self.wifi = Interval::new(config.wifi_interval);
        self.lbs = Interval::new(config.lbs_interval);
        self.config = config;
    }

    /// Query the receiver once. Returns whether the report was usable.
    pub fn update(&mut self) -> Result<bool, Error> {
        let response = self.at.send_command("AT+CGNSINF", QUERY_TIMEOUT)?;
        if !response.contains("OK") {
            warn!("No response from GNSS query");
            return Ok(false);
        }
        let Some(nav) = NavInfo::parse(&response) else {
            warn!("Failed to parse GNSS response");
            return Ok(false);
        };

        self.data.apply(&nav, self.at.now());
        debug!(
            "GNSS updated - fix: {}, sats: {}, lat: {}, lon: {}",
            nav.has_fix(),
            nav.satellites,
            self.data.latitude,
            self.data.longitude
        );
        Ok(true)
    }

    /// Whether the position should come from somewhere else than the receiver.
    pub fn is_signal_lost(&self) -> bool {
        if !self.enabled || !self.data.has_fix() {
            return true;
        }
        let stale = self.data.last_update.map_or(true, |t| {
            self.at.now().saturating_duration_since(t) > self.config.gnss_timeout
        });
        stale || self.data.source != LocationSource::Gnss
    }

    /// Periodic work: pick up a finished lookup, query the receiver and start
    /// a fallback lookup when needed.
    pub fn poll(&mut self) -> Result<(), Error> {
        self.check_pending()?;

        if self.at.is_blocking_command_active() {
            return Ok(());
        }

        let now = self.at.now();
        self.refresh.set_period(if self.data.fixed {
            POLL_WITH_FIX
        } else {
            POLL_WITHOUT_FIX
        });
        if !self.refresh.tick(now) {
            return Ok(());
        }

        if self.enabled {
            if let Err(e) = self.update() {
                warn!("GNSS update failed: {:?}", e);
            }
        }

        if self.config.enable_fallback && self.pending.is_none() && self.is_signal_lost() {
            let preferred = if self.config.prefer_wifi {
                LocationSource::Wifi
            } else {
                LocationSource::Lbs
            };
            if self.lookup_interval(preferred).is_due(now) {
                self.start_lookup(preferred)?;
            }
        } else if !self.data.fixed {
            debug!("GNSS signal lost, WiFi/LBS lookup available on request");
        }
        Ok(())
    }

    fn lookup_interval(&mut self, source: LocationSource) -> &mut Interval {
        match source {
            LocationSource::Lbs => &mut self.lbs,
            _ => &mut self.wifi,
        }
    }

    fn start_lookup(&mut self, source: LocationSource) -> Result<(), Error> {
        let now = self.at.now();
        self.lookup_interval(source).mark(now);

        let command = match source {
            LocationSource::Lbs => LBS_LOOKUP,
            _ => WIFI_LOOKUP,
        };
        info!("Starting {} location lookup", source.as_str());
        let id = self.at.send_command_async(command, LOOKUP_TIMEOUT)?;
        self.pending = Some(PendingLookup {
            id,
            source,
            since: now,
        });
        Ok(())
    }

    fn check_pending(&mut self) -> Result<(), Error> {
        let Some(pending) = self.pending else {
            return Ok(());
        };
        let now = self.at.now();

        let Some(outcome) = self.at.command_response(pending.id) else {
            if now.saturating_duration_since(pending.since) > LOOKUP_TIMEOUT * 2 {
                warn!("{} lookup result lost", pending.source.as_str());
                self.pending = None;
            }
            return Ok(());
        };
        self.pending = None;

        let located = match outcome {
            Outcome::Response(response) => self.apply_lookup(pending.source, &response),
            Outcome::Timeout => false,
        };
        if located {
            return Ok(());
        }

        warn!("{} location lookup failed", pending.source.as_str());
        let other = match pending.source {
            LocationSource::Wifi => LocationSource::Lbs,
            _ => LocationSource::Wifi,
        };
        if self.config.enable_fallback && self.lookup_interval(other).is_due(now) {
            self.start_lookup(other)?;
        }
        Ok(())
    }

    fn apply_lookup(&mut self, source: LocationSource, response: &str) -> bool {
        let prefix = match source {
            LocationSource::Lbs => "+CIPGSMLOC:",
            _ => "+WIFILOC:",
        };
        match parse_lookup(response, prefix) {
            Some((lat, lon)) => {
                self.data.apply_lookup(source, lat, lon, self.at.now());
                info!("{} location: {}, {}", source.as_str(), lat, lon);
                true
            }
            None => {
                warn!("Unusable {} response: {}", source.as_str(), response);
                false
            }
        }
    }

    fn lookup(&mut self, source: LocationSource, command: &str) -> Result<bool, Error> {
        if self.at.is_blocking_command_active() {
            warn!("Another blocking command is active, skipping {} lookup", source.as_str());
            return Err(Error::Blocked);
        }
        let response = self.at.send_command_until_complete(command, LOOKUP_TIMEOUT)?;
        Ok(self.apply_lookup(source, &response))
    }

    /// Synchronous WiFi lookup. Blocks for up to 30 s.
    pub fn wifi_location(&mut self) -> Result<bool, Error> {
        self.lookup(LocationSource::Wifi, WIFI_LOOKUP)
    }

    /// Synchronous cell based lookup. Blocks for up to 30 s.
    pub fn lbs_location(&mut self) -> Result<bool, Error> {
        self.lookup(LocationSource::Lbs, LBS_LOOKUP)
    }

    pub fn log_info(&self) {
        let d = &self.data;
        info!(
            "GNSS fix: {}, source: {}, sats: {}",
            d.has_fix(),
            d.source.as_str(),
            d.satellites
        );
        info!(
            "lat: {}, lon: {}, alt: {} m, speed: {} km/h, course: {}, hdop: {}",
            d.latitude,
            d.longitude,
            d.altitude,
            d.speed,
            d.course,
            d.hdop
        );
    }
}
