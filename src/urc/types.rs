use super::{unquote, UrcData};
use crate::command::network_service::responses::SignalQuality;
use crate::registration::Status;

/// `+CREG`, `+CGREG` and `+CEREG`, both as URC and as read response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkRegistration {
    pub n: Option<u8>,
    pub status: Status,
    pub lac: Option<u32>,
    pub cell_id: Option<u32>,
    pub act: Option<u8>,
}

impl NetworkRegistration {
    /// The URC form leaves out `<n>`, the read response carries it. The two are
    /// told apart by the number of parameters.
    pub fn from_urc(urc: &UrcData<'_>) -> Option<Self> {
        let p = &urc.params;
        let num = |i: usize| p.get(i).and_then(|v| v.parse::<u8>().ok());
        let hex = |i: usize| p.get(i).and_then(|v| u32::from_str_radix(v, 16).ok());

        let (n, stat_idx) = match p.len() {
            0 => return None,
            1 | 3 | 4 => (None, 0),
            _ => (Some(num(0)?), 1),
        };
        let stat = num(stat_idx)?;

        Some(Self {
            n,
            status: Status::from(stat),
            lac: hex(stat_idx + 1),
            cell_id: hex(stat_idx + 2),
            act: num(stat_idx + 3),
        })
    }

    pub fn access_technology(&self) -> &'static str {
        match self.act {
            Some(0) => "GSM",
            Some(1) => "GSM Compact",
            Some(2) => "UTRAN",
            Some(3) => "GSM/GPRS with EDGE",
            Some(4) => "UTRAN with HSDPA",
            Some(5) => "UTRAN with HSUPA",
            Some(6) => "UTRAN with HSDPA and HSUPA",
            Some(7) => "E-UTRAN",
            _ => "Unknown",
        }
    }
}

impl SignalQuality {
    pub fn from_urc(urc: &UrcData<'_>) -> Option<Self> {
        Some(Self {
            rssi: urc.param(0)?.parse().ok()?,
            ber: urc.param(1)?.parse().ok()?,
        })
    }
}

/// A message received on a subscribed topic, `+MSUB:`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InboundMessage<'l> {
    pub topic: &'l str,
    pub payload: &'l str,
    /// Announced payload length, if the module sent one.
    pub len: Option<usize>,
}

impl<'l> InboundMessage<'l> {
    /// Accepts `"topic",<N> byte,<payload>` and `"topic","payload"`.
    ///
    /// The payload is taken verbatim up to the end of the line and may contain commas.
    pub fn from_urc(urc: &UrcData<'l>) -> Option<Self> {
        let body = urc.body();
        let (topic, rest) = match body.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => body.split_at(body.find(',')?),
        };
        let rest = rest.trim_start().strip_prefix(',')?.trim_start();

        let (len, payload) = match rest.split_once(" byte,") {
            Some((len, payload)) if len.trim().parse::<usize>().is_ok() => {
                (len.trim().parse().ok(), payload)
            }
            _ => (None, unquote(rest)),
        };

        if topic.is_empty() {
            return None;
        }
        Some(Self {
            topic,
            payload,
            len,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::urc::UrcCategory;
    use embassy_time::Instant;

    fn urc(line: &str) -> UrcData<'_> {
        UrcData::parse(line, UrcCategory::classify(line), Instant::from_millis(0))
    }

    #[test]
    fn registration_urc_forms() {
        let short = NetworkRegistration::from_urc(&urc("+CEREG: 5")).unwrap();
        assert_eq!(short.n, None);
        assert_eq!(short.status, Status::Roaming);

        let read = NetworkRegistration::from_urc(&urc("+CREG: 0,1")).unwrap();
        assert_eq!(read.n, Some(0));
        assert_eq!(read.status, Status::Home);

        let full = NetworkRegistration::from_urc(&urc("+CEREG: 2,1,\"1A2B\",\"00C3D4E5\",7")).unwrap();
        assert_eq!(full.lac, Some(0x1A2B));
        assert_eq!(full.cell_id, Some(0xC3D4E5));
        assert_eq!(full.access_technology(), "E-UTRAN");

        assert_eq!(NetworkRegistration::from_urc(&urc("+CEREG:")), None);
    }

    #[test]
    fn signal_quality_urc() {
        let sq = SignalQuality::from_urc(&urc("+CSQ: 18,99")).unwrap();
        assert_eq!(sq.dbm(), Some(-77));
        assert_eq!(SignalQuality { rssi: 99, ber: 99 }.dbm(), None);
    }

    #[test]
    fn inbound_message_with_length() {
        let u = urc("+MSUB: \"mqtt/pub\",20 byte,data from tcp, server");
        let msg = InboundMessage::from_urc(&u).unwrap();
        assert_eq!(msg.topic, "mqtt/pub");
        assert_eq!(msg.payload, "data from tcp, server");
        assert_eq!(msg.len, Some(20));
    }

    #[test]
    fn inbound_message_quoted() {
        let u = urc("+MSUB: \"t\",\"1234\"");
        let msg = InboundMessage::from_urc(&u).unwrap();
        assert_eq!(msg.topic, "t");
        assert_eq!(msg.payload, "1234");
        assert_eq!(msg.len, None);

        assert_eq!(InboundMessage::from_urc(&urc("+MSUB: garbage")), None);
    }
}
