//! Device session: ownership of the open/closed serial link.
//!
//! The session is the only component that holds a live link handle. It is
//! generic over a [`Link`] trait object so the acquisition engine can be
//! exercised against a scripted in-memory link in tests, with
//! [`SerialOpener`] providing the real serialport-backed implementation.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{DataBits, DeviceConfig, FlowControlMode, Parity, StopBits};
use crate::errors::{OpenError, SessionError};

/// Default per-read timeout on the serial link. The sampling tick loops
/// reads against its own deadline, so this stays short.
const READ_TIMEOUT: Duration = Duration::from_millis(25);

/// Session lifecycle as observed by the GUI shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Open,
    Sampling,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Open => "open",
            SessionState::Sampling => "sampling",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Transport abstraction
// ============================================================================

/// An open byte link to the device, with in-place parameter updates.
pub trait Link: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Read available bytes, bounded by the link's own read timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), SessionError>;
    fn set_data_characteristics(
        &mut self,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<(), SessionError>;
    fn set_flow_control(
        &mut self,
        mode: FlowControlMode,
        char_on: u8,
        char_off: u8,
    ) -> Result<(), SessionError>;
}

/// Opens a [`Link`] for a config snapshot. Production code uses
/// [`SerialOpener`]; tests inject scripted links.
pub trait LinkOpener: Send {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn Link>, OpenError>;
}

struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl Link for SerialLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), SessionError> {
        self.port.set_baud_rate(baud).map_err(SessionError::from)
    }

    fn set_data_characteristics(
        &mut self,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<(), SessionError> {
        self.port.set_data_bits(data_bits.to_serial())?;
        self.port.set_stop_bits(stop_bits.to_serial())?;
        self.port.set_parity(parity.to_serial())?;
        Ok(())
    }

    fn set_flow_control(
        &mut self,
        mode: FlowControlMode,
        char_on: u8,
        char_off: u8,
    ) -> Result<(), SessionError> {
        // The serial driver only exposes the mode; XON/XOFF characters are
        // fixed at the standard 0x11/0x13 by the OS layer.
        if mode == FlowControlMode::XonXoff && (char_on != 0x11 || char_off != 0x13) {
            warn!(
                "custom flow-control characters {char_on:#04x}/{char_off:#04x} \
                 not supported by the driver, using standard XON/XOFF"
            );
        }
        self.port
            .set_flow_control(mode.to_serial())
            .map_err(SessionError::from)
    }
}

/// Opens serial links via the `serialport` crate.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    pub read_timeout: Duration,
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self {
            read_timeout: READ_TIMEOUT,
        }
    }
}

impl LinkOpener for SerialOpener {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn Link>, OpenError> {
        let port = serialport::new(&config.locator, config.baud_rate)
            .data_bits(config.data_bits.to_serial())
            .stop_bits(config.stop_bits.to_serial())
            .parity(config.parity.to_serial())
            .flow_control(config.flow_control.to_serial())
            .timeout(self.read_timeout)
            .open()
            .map_err(|source| OpenError::DeviceUnavailable {
                locator: config.locator.clone(),
                source,
            })?;
        Ok(Box::new(SerialLink { port }))
    }
}

// ============================================================================
// Device session
// ============================================================================

/// Owns the (possibly absent) link to one device.
pub struct DeviceSession {
    opener: Box<dyn LinkOpener>,
    link: Option<Box<dyn Link>>,
    locator: Option<String>,
}

impl DeviceSession {
    pub fn new(opener: Box<dyn LinkOpener>) -> Self {
        Self {
            opener,
            link: None,
            locator: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Attempt to open the link at the config's locator and parameters.
    ///
    /// Opening while already open on the same locator is a no-op; opening
    /// on a different locator fails with [`OpenError::Busy`] (callers must
    /// close first, since link identity cannot change on an open handle).
    pub fn open(&mut self, config: &DeviceConfig) -> Result<(), OpenError> {
        if config.locator.is_empty() {
            return Err(OpenError::InvalidLocator(config.locator.clone()));
        }
        if let Some(current) = &self.locator {
            if *current == config.locator {
                return Ok(());
            }
            return Err(OpenError::Busy {
                current: current.clone(),
                requested: config.locator.clone(),
            });
        }

        let link = self.opener.open(config)?;
        info!("opened device at '{}'", config.locator);
        self.link = Some(link);
        self.locator = Some(config.locator.clone());
        Ok(())
    }

    /// Close the link. Idempotent; always safe.
    pub fn close(&mut self) {
        if let Some(locator) = self.locator.take() {
            info!("closed device at '{locator}'");
        }
        self.link = None;
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let link = self.require_link("write")?;
        link.write_all(bytes).map_err(SessionError::from)
    }

    /// Read available bytes; a link-level timeout reads as zero bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        let link = self.require_link("read")?;
        match link.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => Err(SessionError::from(e)),
        }
    }

    pub fn set_baud_rate(&mut self, baud: u32) -> Result<(), SessionError> {
        debug!("updating baud rate to {baud}");
        self.require_link("set_baud_rate")?.set_baud_rate(baud)
    }

    pub fn set_data_characteristics(
        &mut self,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<(), SessionError> {
        debug!("updating data characteristics to {data_bits:?}/{stop_bits:?}/{parity:?}");
        self.require_link("set_data_characteristics")?
            .set_data_characteristics(data_bits, stop_bits, parity)
    }

    pub fn set_flow_control(
        &mut self,
        mode: FlowControlMode,
        char_on: u8,
        char_off: u8,
    ) -> Result<(), SessionError> {
        debug!("updating flow control to {mode:?}");
        self.require_link("set_flow_control")?
            .set_flow_control(mode, char_on, char_off)
    }

    fn require_link(&mut self, operation: &'static str) -> Result<&mut Box<dyn Link>, SessionError> {
        self.link.as_mut().ok_or(SessionError::InvalidState {
            operation,
            state: SessionState::Disconnected,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct NullLink;

    impl Link for NullLink {
        fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
        }
        fn set_baud_rate(&mut self, _baud: u32) -> Result<(), SessionError> {
            Ok(())
        }
        fn set_data_characteristics(
            &mut self,
            _data_bits: DataBits,
            _stop_bits: StopBits,
            _parity: Parity,
        ) -> Result<(), SessionError> {
            Ok(())
        }
        fn set_flow_control(
            &mut self,
            _mode: FlowControlMode,
            _char_on: u8,
            _char_off: u8,
        ) -> Result<(), SessionError> {
            Ok(())
        }
    }

    struct NullOpener;

    impl LinkOpener for NullOpener {
        fn open(&self, _config: &DeviceConfig) -> Result<Box<dyn Link>, OpenError> {
            Ok(Box::new(NullLink))
        }
    }

    fn config(locator: &str) -> DeviceConfig {
        DeviceConfig {
            locator: locator.to_string(),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn empty_locator_is_rejected() {
        let mut session = DeviceSession::new(Box::new(NullOpener));
        assert!(matches!(
            session.open(&config("")),
            Err(OpenError::InvalidLocator(_))
        ));
        assert!(!session.is_open());
    }

    #[test]
    fn reopen_on_same_locator_is_a_noop() {
        let mut session = DeviceSession::new(Box::new(NullOpener));
        session.open(&config("/dev/ttyUSB0")).unwrap();
        session.open(&config("/dev/ttyUSB0")).unwrap();
        assert!(session.is_open());
    }

    #[test]
    fn open_on_different_locator_is_busy() {
        let mut session = DeviceSession::new(Box::new(NullOpener));
        session.open(&config("/dev/ttyUSB0")).unwrap();
        assert!(matches!(
            session.open(&config("/dev/ttyUSB1")),
            Err(OpenError::Busy { .. })
        ));
    }

    #[test]
    fn close_is_idempotent_and_detaches_link() {
        let mut session = DeviceSession::new(Box::new(NullOpener));
        session.open(&config("/dev/ttyUSB0")).unwrap();
        session.close();
        session.close();
        assert!(!session.is_open());
        assert!(matches!(
            session.write(b"x"),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn link_timeout_reads_as_zero_bytes() {
        let mut session = DeviceSession::new(Box::new(NullOpener));
        session.open(&config("/dev/ttyUSB0")).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(session.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn parameter_updates_require_an_open_link() {
        let mut session = DeviceSession::new(Box::new(NullOpener));
        assert!(matches!(
            session.set_baud_rate(19200),
            Err(SessionError::InvalidState {
                operation: "set_baud_rate",
                ..
            })
        ));
    }
}
