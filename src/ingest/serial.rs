//! Serial line source.
//!
//! The motion sensor sits behind a serial link (typically a Bluetooth RFCOMM
//! device such as `/dev/rfcomm0`). On Linux the port is switched to raw mode
//! at the configured baud rate, with `VMIN = 0` and `VTIME` set from the read
//! timeout, so reads return at least once per timeout even when the sensor
//! is quiet. That lets the run loop notice shutdown requests.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use super::LineReader;

pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Configuration for the serial source.
#[derive(Clone, Debug)]
pub struct SerialSettings {
    pub device: PathBuf,
    pub baud_rate: u32,
    /// Transport-level read timeout. Rounded to tenths of a second, 0.1s..=25.5s.
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

pub fn validate_baud_rate(baud_rate: u32) -> Result<()> {
    if SUPPORTED_BAUD_RATES.contains(&baud_rate) {
        Ok(())
    } else {
        Err(anyhow!(
            "unsupported baud rate {}; expected one of {:?}",
            baud_rate,
            SUPPORTED_BAUD_RATES
        ))
    }
}

/// Opens the serial device and wraps it in a line reader.
///
/// A read that times out with no data is reported as idle rather than
/// end-of-stream, since a quiet tty and a closed one look alike. Idle reads
/// are paced at one per read timeout even when the device returns at once.
pub fn open_serial(settings: &SerialSettings) -> Result<LineReader<BufReader<File>>> {
    validate_baud_rate(settings.baud_rate)?;
    let file = open_device(settings)?;
    configure_port(&file, settings)?;
    Ok(LineReader::new(
        BufReader::new(file),
        format!("serial:{}", settings.device.display()),
    )
    .idle_on_eof(settings.read_timeout))
}

#[cfg(target_os = "linux")]
fn open_device(settings: &SerialSettings) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&settings.device)
        .with_context(|| format!("failed to open serial device {}", settings.device.display()))
}

#[cfg(not(target_os = "linux"))]
fn open_device(settings: &SerialSettings) -> Result<File> {
    File::open(&settings.device)
        .with_context(|| format!("failed to open serial device {}", settings.device.display()))
}

#[cfg(target_os = "linux")]
fn configure_port(file: &File, settings: &SerialSettings) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    if unsafe { libc::isatty(fd) } != 1 {
        log::warn!(
            "{} is not a tty; reading it as a plain file",
            settings.device.display()
        );
        return Ok(());
    }

    let speed = baud_constant(settings.baud_rate)?;
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::tcgetattr(fd, &mut tio) };
    if rc != 0 {
        return Err(anyhow!(std::io::Error::last_os_error())).context("serial: tcgetattr failed");
    }

    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = vtime_deciseconds(settings.read_timeout);

    let rc = unsafe { libc::cfsetispeed(&mut tio, speed) };
    if rc != 0 {
        return Err(anyhow!(std::io::Error::last_os_error())).context("serial: cfsetispeed failed");
    }
    let rc = unsafe { libc::cfsetospeed(&mut tio, speed) };
    if rc != 0 {
        return Err(anyhow!(std::io::Error::last_os_error())).context("serial: cfsetospeed failed");
    }
    let rc = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) };
    if rc != 0 {
        return Err(anyhow!(std::io::Error::last_os_error())).context("serial: tcsetattr failed");
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn configure_port(_file: &File, settings: &SerialSettings) -> Result<()> {
    log::warn!(
        "port configuration is only applied on linux; {} baud not set on {}",
        settings.baud_rate,
        settings.device.display()
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn baud_constant(baud_rate: u32) -> Result<libc::speed_t> {
    let speed = match baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        921600 => libc::B921600,
        other => return Err(anyhow!("unsupported baud rate {}", other)),
    };
    Ok(speed)
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn vtime_deciseconds(timeout: Duration) -> u8 {
    (timeout.as_millis() / 100).clamp(1, u8::MAX as u128) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{LineSource, ReadLine};
    use std::io::Write;
    use std::time::Instant;

    #[test]
    fn baud_rates_are_checked() {
        assert!(validate_baud_rate(9600).is_ok());
        assert!(validate_baud_rate(115200).is_ok());
        assert!(validate_baud_rate(9601).is_err());
    }

    #[test]
    fn read_timeout_maps_to_vtime() {
        assert_eq!(vtime_deciseconds(Duration::from_secs(1)), 10);
        assert_eq!(vtime_deciseconds(Duration::from_millis(10)), 1);
        assert_eq!(vtime_deciseconds(Duration::from_secs(60)), 255);
    }

    #[test]
    fn missing_device_fails_to_open() {
        let settings = SerialSettings {
            device: PathBuf::from("/nonexistent/rfcomm9"),
            ..SerialSettings::default()
        };
        let err = open_serial(&settings).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to open serial device"));
    }

    #[test]
    fn plain_file_is_read_line_by_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"EVENT:MOTION_STARTED\r\nEVENT:MOTION_ENDED\n").unwrap();

        let settings = SerialSettings {
            device: file.path().to_path_buf(),
            ..SerialSettings::default()
        };
        let mut reader = open_serial(&settings).unwrap();
        assert_eq!(
            reader.read_line().unwrap(),
            ReadLine::Line("EVENT:MOTION_STARTED".to_string())
        );
        assert_eq!(
            reader.read_line().unwrap(),
            ReadLine::Line("EVENT:MOTION_ENDED".to_string())
        );
        // Serial sources treat end of data as a quiet line, not a hang-up.
        assert_eq!(reader.read_line().unwrap(), ReadLine::Idle);
    }

    #[test]
    fn drained_device_does_not_spin() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let settings = SerialSettings {
            device: file.path().to_path_buf(),
            read_timeout: Duration::from_millis(100),
            ..SerialSettings::default()
        };
        let mut reader = open_serial(&settings).unwrap();

        let started = Instant::now();
        let mut idles = 0;
        while started.elapsed() < Duration::from_millis(300) {
            assert_eq!(reader.read_line().unwrap(), ReadLine::Idle);
            idles += 1;
        }
        assert!(idles <= 4, "{} idle reads in 300ms", idles);
    }
}
