//! # Serial Transport
//!
//! Byte-stream link to a printer exposed as a tty: a USB serial adapter
//! (`/dev/ttyUSB0`, `/dev/ttyACM0`) or a Bluetooth SPP printer bound to an
//! RFCOMM device (`/dev/rfcomm0`).
//!
//! ## Selector
//!
//! Either a device path, or a Bluetooth MAC address (`XX:XX:XX:XX:XX:XX`)
//! that is already bound with `rfcomm bind`; the bound device is looked up
//! in `/proc/net/rfcomm`.
//!
//! ## TTY Configuration
//!
//! The device is opened in raw mode so binary frames pass unmodified:
//!
//! - **No input processing**: IGNBRK, BRKINT, PARMRK, ISTRIP, ICRNL, ... off
//! - **No software flow control**: 0x11/0x13 appear in row data
//! - **No output processing**: OPOST off (no CR/LF translation)
//! - **8-bit characters**: CS8, no parity
//! - **Non-canonical, no echo**
//! - **Fixed baud rate** from [`SerialConfig`]
//!
//! The descriptor is non-blocking and registered with the tokio reactor, so
//! a read with a deadline never parks a runtime thread.
//!
//! An advisory `flock` keeps a second process from opening the same printer
//! while a job runs; that case surfaces as a busy device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{Transport, TransportKind};
use crate::config::SerialConfig;
use crate::error::EtiquetaError;

/// Read buffer size. Responses are short status frames.
const READ_CHUNK: usize = 256;

/// # Serial Printer Transport
///
/// ## Example
///
/// ```no_run
/// use std::time::Duration;
/// use etiqueta::config::SerialConfig;
/// use etiqueta::transport::{SerialTransport, Transport};
///
/// # async fn example() -> Result<(), etiqueta::EtiquetaError> {
/// let mut transport = SerialTransport::new(SerialConfig::default());
/// transport.connect("/dev/rfcomm0").await?;
/// transport.send(&[0x55, 0x55, 0xA3, 0x01, 0x01, 0xA3, 0xAA, 0xAA]).await?;
/// let reply = transport.receive(Duration::from_secs(3)).await?;
/// transport.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct SerialTransport {
    config: SerialConfig,
    device: Option<PathBuf>,
    port: Option<port::Port>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            device: None,
            port: None,
        }
    }

    /// Path of the open device, if connected.
    pub fn device(&self) -> Option<&Path> {
        self.device.as_deref()
    }

    fn port(&self) -> Result<&port::Port, EtiquetaError> {
        self.port
            .as_ref()
            .ok_or_else(|| EtiquetaError::Connection("serial port is not open".to_string()))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self, selector: &str) -> Result<(), EtiquetaError> {
        if self.port.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let path = resolve_selector(selector).await?;
        tracing::debug!("Opening {} at {} baud", path.display(), self.config.baud_rate);

        let port = port::Port::open(&path, self.config.baud_rate)?;
        tracing::info!("Connected to {}", path.display());

        self.port = Some(port);
        self.device = Some(path);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), EtiquetaError> {
        let port = self.port()?;
        port.write_all(data).await?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, EtiquetaError> {
        let port = self.port()?;
        let mut buf = vec![0u8; READ_CHUNK];

        let n = tokio::time::timeout(timeout, port.read(&mut buf))
            .await
            .map_err(|_| EtiquetaError::timeout(timeout, "serial data"))??;

        if n == 0 {
            return Err(EtiquetaError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "serial device closed",
            )));
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn disconnect(&mut self) {
        if let Some(port) = self.port.take() {
            if let Err(e) = port.close() {
                tracing::warn!("Error closing serial port: {}", e);
            }
            if let Some(path) = self.device.take() {
                tracing::info!("Disconnected from {}", path.display());
            }
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

/// Turn a selector into a device path.
async fn resolve_selector(selector: &str) -> Result<PathBuf, EtiquetaError> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(EtiquetaError::Connection("no serial device given".to_string()));
    }
    if !is_valid_mac(selector) {
        return Ok(PathBuf::from(selector));
    }

    let mac = selector.to_string();
    let found = tokio::task::spawn_blocking(move || find_rfcomm_for_mac(&mac))
        .await
        .map_err(|e| EtiquetaError::Connection(format!("rfcomm lookup failed: {}", e)))??;

    found.map(PathBuf::from).ok_or_else(|| {
        EtiquetaError::Connection(format!(
            "no RFCOMM device bound to {} (run `rfcomm bind 0 {}`)",
            selector.to_uppercase(),
            selector.to_uppercase()
        ))
    })
}

// ============================================================================
// RFCOMM HELPERS
// ============================================================================

/// Validate a Bluetooth MAC address format (XX:XX:XX:XX:XX:XX).
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }
    parts
        .iter()
        .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Find an existing RFCOMM device bound to the given MAC address.
///
/// Reads `/proc/net/rfcomm` (format: `rfcomm0: XX:XX:XX:XX:XX:XX channel N ...`).
#[cfg(unix)]
pub fn find_rfcomm_for_mac(mac: &str) -> Result<Option<String>, EtiquetaError> {
    match std::fs::read_to_string("/proc/net/rfcomm") {
        Ok(contents) => Ok(rfcomm_device_in(&contents, mac).filter(|p| Path::new(p).exists())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EtiquetaError::Connection(format!(
            "cannot read /proc/net/rfcomm: {}",
            e
        ))),
    }
}

#[cfg(not(unix))]
pub fn find_rfcomm_for_mac(_mac: &str) -> Result<Option<String>, EtiquetaError> {
    Ok(None)
}

/// Device path for `mac` in the contents of `/proc/net/rfcomm`.
fn rfcomm_device_in(contents: &str, mac: &str) -> Option<String> {
    let mac_upper = mac.to_uppercase();
    contents
        .lines()
        .filter(|line| line.to_uppercase().contains(&mac_upper))
        .filter_map(|line| line.split(':').next())
        .map(|dev| format!("/dev/{}", dev.trim()))
        .next()
}

// ============================================================================
// TTY
// ============================================================================

#[cfg(unix)]
mod port {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    use tokio::io::unix::AsyncFd;

    use crate::error::EtiquetaError;

    /// An open, raw-mode, non-blocking tty.
    pub(super) struct Port {
        fd: AsyncFd<File>,
    }

    impl Port {
        pub(super) fn open(path: &Path, baud: u32) -> Result<Self, EtiquetaError> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(path)
                .map_err(|e| open_error(path, e))?;

            let raw = file.as_raw_fd();
            lock_exclusive(raw).map_err(|e| open_error(path, e))?;
            configure_tty_raw(raw, baud)?;

            let fd = AsyncFd::new(file).map_err(|e| open_error(path, e))?;
            Ok(Self { fd })
        }

        pub(super) async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
            while !data.is_empty() {
                let mut guard = self.fd.writable().await?;
                match guard.try_io(|inner| {
                    let mut file = inner.get_ref();
                    file.write(data)
                }) {
                    Ok(Ok(0)) => {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "serial device accepted no bytes",
                        ));
                    }
                    Ok(Ok(n)) => data = &data[n..],
                    Ok(Err(e)) => return Err(e),
                    Err(_would_block) => continue,
                }
            }
            Ok(())
        }

        pub(super) async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                let mut guard = self.fd.readable().await?;
                match guard.try_io(|inner| {
                    let mut file = inner.get_ref();
                    file.read(&mut *buf)
                }) {
                    Ok(result) => return result,
                    Err(_would_block) => continue,
                }
            }
        }

        /// Wait for queued output to reach the device, then close.
        pub(super) fn close(self) -> io::Result<()> {
            let file = self.fd.into_inner();
            let result = unsafe { libc::tcdrain(file.as_raw_fd()) };
            if result != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    fn open_error(path: &Path, e: io::Error) -> EtiquetaError {
        let reason = match e.kind() {
            io::ErrorKind::NotFound => "device not found".to_string(),
            io::ErrorKind::PermissionDenied => {
                "permission denied (is the user in the dialout group?)".to_string()
            }
            io::ErrorKind::WouldBlock => "device busy".to_string(),
            _ if e.raw_os_error() == Some(libc::EBUSY) => "device busy".to_string(),
            _ => e.to_string(),
        };
        EtiquetaError::Connection(format!("{}: {}", path.display(), reason))
    }

    fn lock_exclusive(fd: i32) -> io::Result<()> {
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn baud_constant(baud: u32) -> Option<libc::speed_t> {
        let speed = match baud {
            9_600 => libc::B9600,
            19_200 => libc::B19200,
            38_400 => libc::B38400,
            57_600 => libc::B57600,
            115_200 => libc::B115200,
            230_400 => libc::B230400,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            460_800 => libc::B460800,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            921_600 => libc::B921600,
            _ => return None,
        };
        Some(speed)
    }

    /// Configure a file descriptor for raw TTY mode at `baud`.
    ///
    /// Note: IXON/IXOFF/IXANY disable XON/XOFF software flow control. This is
    /// required because 0x11 (XON) and 0x13 (XOFF) appear in row data.
    fn configure_tty_raw(fd: i32, baud: u32) -> Result<(), EtiquetaError> {
        use std::mem::MaybeUninit;

        let speed = baud_constant(baud).ok_or_else(|| {
            EtiquetaError::InvalidConfiguration(format!(
                "baud rate {} not supported on this platform",
                baud
            ))
        })?;

        let mut termios = MaybeUninit::uninit();
        let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
        if result != 0 {
            return Err(EtiquetaError::Connection(format!(
                "tcgetattr failed: {}",
                io::Error::last_os_error()
            )));
        }
        let mut termios = unsafe { termios.assume_init() };

        termios.c_iflag &= !(libc::IGNBRK
            | libc::BRKINT
            | libc::PARMRK
            | libc::ISTRIP
            | libc::INLCR
            | libc::IGNCR
            | libc::ICRNL
            | libc::IXON
            | libc::IXOFF
            | libc::IXANY);

        termios.c_oflag &= !libc::OPOST;

        termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);

        termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
        termios.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;

        // Reads return whatever is buffered; deadlines come from the reactor.
        termios.c_cc[libc::VMIN] = 0;
        termios.c_cc[libc::VTIME] = 0;

        let result = unsafe {
            libc::cfsetispeed(&mut termios, speed) | libc::cfsetospeed(&mut termios, speed)
        };
        if result != 0 {
            return Err(EtiquetaError::Connection(format!(
                "cannot set baud rate {}: {}",
                baud,
                io::Error::last_os_error()
            )));
        }

        let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
        if result != 0 {
            return Err(EtiquetaError::Connection(format!(
                "tcsetattr failed: {}",
                io::Error::last_os_error()
            )));
        }

        // Drop anything the device sent before we were listening.
        unsafe { libc::tcflush(fd, libc::TCIOFLUSH) };

        Ok(())
    }

}

#[cfg(not(unix))]
mod port {
    use std::io;
    use std::path::Path;

    use crate::error::EtiquetaError;

    pub(super) struct Port;

    impl Port {
        pub(super) fn open(path: &Path, _baud: u32) -> Result<Self, EtiquetaError> {
            Err(EtiquetaError::Connection(format!(
                "{}: serial transport not supported on this platform",
                path.display()
            )))
        }

        pub(super) async fn write_all(&self, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }

        pub(super) async fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }

        pub(super) fn close(self) -> io::Result<()> {
            Ok(())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
