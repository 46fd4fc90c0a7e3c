//! Cellular network service: registration, signal, operator and the PDP context.

use embassy_time::{Duration, Instant};
use heapless::String;

use super::{expect_ok, first_line, info_line, Interval};
use crate::client::AtClient;
use crate::command::network_service::types::Functionality;
use crate::command::network_service::{
    GetEpsNetworkRegistrationStatus, GetGprsAttached, GetNetworkMode,
    GetNetworkRegistrationStatus, GetOperatorSelection, GetSignalQuality,
    SetModuleFunctionality,
};
use crate::command::psn::types::{AuthenticationType, PdpContextStatus};
use crate::command::psn::{SetAuthParameters, SetPdpContextDefinition, SetPdpContextState};
use crate::error::Error;
use crate::registration::{NetworkType, Status};

const ATTACH_ATTEMPTS: u8 = 8;

/// Last known state of the cellular connection.
#[derive(Debug, Clone, Default)]
pub struct NetworkStatus {
    pub registration: Status,
    /// Received signal strength, `None` while unknown.
    pub signal_dbm: Option<i16>,
    pub operator: String<64>,
    pub network_type: NetworkType,
    pub last_update: Option<Instant>,
}

impl NetworkStatus {
    pub fn is_registered(&self) -> bool {
        self.last_update.is_some() && self.registration.registered()
    }
}

/// Identity of the module and its SIM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub imei: String<20>,
    pub imsi: String<20>,
    pub ccid: String<24>,
}

pub struct Network<'a, T> {
    at: &'a T,
    enabled: bool,
    status: NetworkStatus,
    info: ModuleInfo,
    refresh: Interval,
}

impl<'a, T: AtClient> Network<'a, T> {
    pub fn new(at: &'a T) -> Self {
        Self {
            at,
            enabled: false,
            status: NetworkStatus::default(),
            info: ModuleInfo::default(),
            refresh: Interval::new(Duration::from_secs(5)),
        }
    }

    /// Switch the radio to full functionality and take a first snapshot.
    pub fn enable(&mut self) -> Result<(), Error> {
        info!("Enabling network...");
        self.at.send(&SetModuleFunctionality {
            fun: Functionality::Full,
        })?;
        self.at.delay(Duration::from_secs(2));

        self.update_module_info()?;
        self.enabled = true;
        info!("Network enabled");

        self.update()
    }

    pub fn disable(&mut self) -> Result<(), Error> {
        info!("Disabling network...");
        self.at.send(&SetModuleFunctionality {
            fun: Functionality::Minimum,
        })?;
        self.enabled = false;
        self.status.last_update = None;
        info!("Network disabled");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Periodic refresh. Skipped while a location lookup holds the serial line.
    pub fn poll(&mut self) -> Result<(), Error> {
        if !self.enabled || self.at.is_blocking_command_active() {
            return Ok(());
        }
        if !self.refresh.tick(self.at.now()) {
            return Ok(());
        }
        self.update()
    }

    pub fn update(&mut self) -> Result<(), Error> {
        trace!("Updating network status...");
        self.update_registration()?;
        self.update_signal()?;
        self.update_operator()?;
        self.status.last_update = Some(self.at.now());

        debug!(
            "Network status updated - {}, signal: {} dBm",
            self.status.registration.as_str(),
            self.status.signal_dbm.unwrap_or(-999)
        );
        Ok(())
    }

    fn update_signal(&mut self) -> Result<(), Error> {
        let csq = self.at.send(&GetSignalQuality)?;
        self.status.signal_dbm = csq.dbm();
        Ok(())
    }

    fn update_registration(&mut self) -> Result<(), Error> {
        let creg = self.at.send(&GetNetworkRegistrationStatus)?;
        self.status.registration = Status::from(creg.stat);
        Ok(())
    }

    fn update_operator(&mut self) -> Result<(), Error> {
        let cops = self.at.send(&GetOperatorSelection)?;
        self.status.operator = cops.oper.unwrap_or_default();

        let mode = self.at.send(&GetNetworkMode)?;
        self.status.network_type = NetworkType::from(mode.mode);
        Ok(())
    }

    /// Read IMEI, IMSI and ICCID.
    pub fn update_module_info(&mut self) -> Result<&ModuleInfo, Error> {
        let timeout = Duration::from_secs(1);

        let response = expect_ok(self.at, "AT+CGSN", timeout)?;
        self.info.imei = first_line(&response)
            .and_then(|l| String::try_from(l).ok())
            .unwrap_or_default();

        let response = expect_ok(self.at, "AT+CIMI", timeout)?;
        self.info.imsi = first_line(&response)
            .and_then(|l| String::try_from(l).ok())
            .unwrap_or_default();

        let response = expect_ok(self.at, "AT+CCID", timeout)?;
        self.info.ccid = info_line(&response, "+CCID:")
            .or_else(|| first_line(&response))
            .and_then(|l| String::try_from(l).ok())
            .unwrap_or_default();

        info!(
            "IMEI: {}, IMSI: {}, ICCID: {}",
            self.info.imei.as_str(),
            self.info.imsi.as_str(),
            self.info.ccid.as_str()
        );
        Ok(&self.info)
    }

    pub fn module_info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn status(&self) -> &NetworkStatus {
        &self.status
    }

    pub fn is_registered(&self) -> bool {
        self.status.is_registered()
    }

    pub fn set_update_interval(&mut self, interval: Duration) {
        self.refresh.set_period(interval);
    }

    pub fn update_interval(&self) -> Duration {
        self.refresh.period()
    }

    /// Define PDP context 1. Credentials are only sent when one of them is set;
    /// a failure to set them is logged and otherwise ignored.
    pub fn set_apn(&mut self, apn: &str, username: &str, password: &str) -> Result<(), Error> {
        info!("Setting APN: {}", apn);
        self.at.send(&SetPdpContextDefinition {
            cid: 1,
            pdp_type: String::try_from("IP").map_err(|_| Error::CommandTooLong)?,
            apn: String::try_from(apn).map_err(|_| Error::CommandTooLong)?,
        })?;

        if !username.is_empty() || !password.is_empty() {
            let auth = SetAuthParameters {
                cid: 1,
                auth_type: AuthenticationType::Pap,
                password: String::try_from(password).map_err(|_| Error::CommandTooLong)?,
                username: String::try_from(username).map_err(|_| Error::CommandTooLong)?,
            };
            if let Err(e) = self.at.send(&auth) {
                warn!("Failed to set APN authentication: {:?}", e);
            }
        }
        Ok(())
    }

    pub fn activate_pdp(&mut self) -> Result<(), Error> {
        info!("Activating PDP context...");
        self.at.send(&SetPdpContextState {
            status: PdpContextStatus::Activated,
            cid: Some(1),
        })?;
        info!("PDP context activated");
        Ok(())
    }

    pub fn deactivate_pdp(&mut self) -> Result<(), Error> {
        info!("Deactivating PDP context...");
        self.at.send(&SetPdpContextState {
            status: PdpContextStatus::Deactivated,
            cid: Some(1),
        })?;
        Ok(())
    }

    /// Whether context 1 is active. The module lists every defined context.
    pub fn is_pdp_active(&self) -> Result<bool, Error> {
        let response = expect_ok(self.at, "AT+CGACT?", Duration::from_secs(1))?;
        Ok(response
            .lines()
            .filter_map(|l| l.trim().strip_prefix("+CGACT:"))
            .any(|l| {
                let mut fields = l.split(',').map(str::trim);
                fields.next() == Some("1") && fields.next() == Some("1")
            }))
    }

    /// EPS registered and packet domain attached, polling the attach state a
    /// few times before giving up.
    pub fn is_network_ready(&self) -> Result<bool, Error> {
        let cereg = self.at.send(&GetEpsNetworkRegistrationStatus)?;
        if !Status::from(cereg.stat).registered() {
            debug!("Network not registered, stat {}", cereg.stat);
            return Ok(false);
        }

        for attempt in 1..=ATTACH_ATTEMPTS {
            match self.at.send(&GetGprsAttached) {
                Ok(attached) if attached.state == 1 => return Ok(true),
                Ok(_) => debug!("Packet domain not attached ({}/{})", attempt, ATTACH_ATTEMPTS),
                Err(Error::Blocked) => return Err(Error::Blocked),
                Err(e) => warn!("Attach query failed: {:?}", e),
            }
            if attempt < ATTACH_ATTEMPTS {
                self.at.delay(Duration::from_secs(1));
            }
        }
        Ok(false)
    }

    pub fn log_info(&self) {
        info!(
            "IMEI: {}, IMSI: {}, ICCID: {}",
            self.info.imei.as_str(),
            self.info.imsi.as_str(),
            self.info.ccid.as_str()
        );
        info!(
            "{}, signal {} dBm, operator {}, {}",
            self.status.registration.as_str(),
            self.status.signal_dbm.unwrap_or(-999),
            self.status.operator.as_str(),
            self.status.network_type.as_str()
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::ready_client;

    #[test]
    fn update_reads_registration_signal_and_operator() {
        let (client, wire, _clock) = ready_client();
        wire.respond("AT+CREG?", "+CREG: 0,5\r\nOK\r\n");
        wire.respond("AT+CSQ", "+CSQ: 20,99\r\nOK\r\n");
        wire.respond("AT+COPS?", "+COPS: 0,0,\"CHINA MOBILE\",7\r\nOK\r\n");
        wire.respond("AT+CNSMOD?", "+CNSMOD: 0,8\r\nOK\r\n");

        let mut net = Network::new(&client);
        net.update().unwrap();

        let status = net.status();
        assert!(net.is_registered());
        assert_eq!(status.registration, Status::Roaming);
        assert_eq!(status.signal_dbm, Some(-73));
        assert_eq!(status.operator.as_str(), "CHINA MOBILE");
        assert_eq!(status.network_type, NetworkType::Lte);
    }

    #[test]
    fn module_identity() {
        let (client, wire, _clock) = ready_client();
        wire.respond("AT+CGSN", "\r\n862012345678901\r\n\r\nOK\r\n");
        wire.respond("AT+CIMI", "\r\n460001234567890\r\n\r\nOK\r\n");
        wire.respond("AT+CCID", "+CCID: 89860012345678901234\r\nOK\r\n");

        let mut net = Network::new(&client);
        let info = net.update_module_info().unwrap();
        assert_eq!(info.imei.as_str(), "862012345678901");
        assert_eq!(info.imsi.as_str(), "460001234567890");
        assert_eq!(info.ccid.as_str(), "89860012345678901234");
    }

    #[test]
    fn network_ready_waits_for_attach() {
        let (client, wire, _clock) = ready_client();
        wire.respond("AT+CEREG?", "+CEREG: 1,1\r\nOK\r\n");
        wire.respond_once("AT+CGATT?", "+CGATT: 0\r\nOK\r\n");
        wire.respond("AT+CGATT?", "+CGATT: 1\r\nOK\r\n");

        let net = Network::new(&client);
        assert!(net.is_network_ready().unwrap());
        assert_eq!(
            wire.sent().iter().filter(|c| c.as_str() == "AT+CGATT?").count(),
            2
        );
    }

    #[test]
    fn network_not_ready_when_searching() {
        let (client, wire, _clock) = ready_client();
        wire.respond("AT+CEREG?", "+CEREG: 1,2\r\nOK\r\n");

        let net = Network::new(&client);
        assert!(!net.is_network_ready().unwrap());
        assert!(!wire.sent().iter().any(|c| c.as_str() == "AT+CGATT?"));
    }

    #[test]
    fn apn_and_pdp() {
        let (client, wire, _clock) = ready_client();
        wire.respond("AT+CGDCONT=1,\"IP\",\"cmnet\"", "OK\r\n");
        wire.respond("AT+CGAUTH=1,1,\"secret\",\"user\"", "OK\r\n");
        wire.respond("AT+CGACT=1,1", "OK\r\n");
        wire.respond("AT+CGACT?", "+CGACT: 1,1\r\n+CGACT: 2,0\r\nOK\r\n");

        let mut net = Network::new(&client);
        net.set_apn("cmnet", "user", "secret").unwrap();
        net.activate_pdp().unwrap();
        assert!(net.is_pdp_active().unwrap());
    }

    #[test]
    fn poll_is_paced() {
        let (client, wire, clock) = ready_client();
        wire.respond("AT+CREG?", "+CREG: 0,1\r\nOK\r\n");
        wire.respond("AT+CSQ", "+CSQ: 20,99\r\nOK\r\n");
        wire.respond("AT+COPS?", "+COPS: 0\r\nOK\r\n");
        wire.respond("AT+CNSMOD?", "+CNSMOD: 0,1\r\nOK\r\n");

        let mut net = Network::new(&client);
        net.enabled = true;
        net.poll().unwrap();
        wire.clear_sent();

        clock.advance(1_000);
        net.poll().unwrap();
        assert!(wire.sent().is_empty());

        clock.advance(5_000);
        net.poll().unwrap();
        assert_eq!(wire.sent()[0], "AT+CREG?");
    }
}
