//! Opening sessions over a real serial port.

use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{sleep, timeout},
};
use tokio_serial::{SerialPort, SerialStream};

use super::Session;

/// The USB vendor ID of official Arduino boards.
pub const ARDUINO_USB_VID: u16 = 0x2341;

/// The USB vendor ID of the CH340 serial bridge found on most clone boards.
pub const CH340_USB_VID: u16 = 0x1A86;

/// Baudrate the rover firmware configures its serial port for.
pub const ROVER_BAUDRATE: u32 = 9600;

/// How long the bootloader gets to run after a reset before the firmware
/// owns the port.
const RESET_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Serialport Error: {0}")]
    Serialport(#[from] tokio_serial::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for the firmware hello")]
    HelloTimeout,
}

/// Parameters for opening a serial session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Platform-specific port path, e.g. `/dev/ttyACM0`.
    pub path: String,
    pub baud_rate: u32,
    pub stop_bits: tokio_serial::StopBits,
    pub data_bits: tokio_serial::DataBits,
    pub read_timeout: Duration,
    /// How long to wait for the firmware's one-line hello after the reset
    /// handshake. `None` skips the wait entirely.
    pub hello_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: ROVER_BAUDRATE,
            stop_bits: tokio_serial::StopBits::One,
            data_bits: tokio_serial::DataBits::Eight,
            read_timeout: Duration::from_secs(1),
            hello_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl Session<SerialStream> {
    /// Opens the serial port, resets the microcontroller so both ends start
    /// from a synchronized state, and spawns the reader task.
    ///
    /// Any failure is returned; nothing panics across this boundary. The
    /// caller owns the retry policy.
    pub async fn open(config: &SessionConfig) -> Result<Self, ConnectError> {
        let mut port = SerialStream::open(
            &tokio_serial::new(&config.path, config.baud_rate)
                .parity(tokio_serial::Parity::None)
                .stop_bits(config.stop_bits)
                .data_bits(config.data_bits)
                .timeout(config.read_timeout),
        )?;

        reset_handshake(&mut port, config.hello_timeout).await?;

        Ok(Self::from_transport(port))
    }
}

/// Pulses DTR to reset the microcontroller, waits out its bootloader, and
/// flushes whatever stale bytes were sitting in the input buffer.
async fn reset_handshake(
    port: &mut SerialStream,
    hello_timeout: Option<Duration>,
) -> Result<(), ConnectError> {
    port.write_data_terminal_ready(false)?;
    sleep(Duration::from_millis(250)).await;
    port.write_data_terminal_ready(true)?;
    sleep(RESET_GRACE).await;
    port.clear(tokio_serial::ClearBuffer::Input)?;

    if let Some(limit) = hello_timeout {
        let mut hello = String::new();
        let mut reader = BufReader::new(port);
        match timeout(limit, reader.read_line(&mut hello)).await {
            Ok(Ok(_)) => debug!("Firmware hello: {}", hello.trim_end()),
            Ok(Err(e)) => return Err(ConnectError::Io(e)),
            Err(_) => return Err(ConnectError::HelloTimeout),
        }
    }

    Ok(())
}

/// A serial port that looks like it has the rover's microcontroller on the
/// other end.
#[derive(Clone, Debug)]
pub struct SerialDevice {
    pub port_name: String,
}

impl SerialDevice {
    /// A [`SessionConfig`] for this port with the default line parameters.
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(&self.port_name)
    }

    /// Opens a session on this port with the default line parameters.
    pub async fn open(&self) -> Result<Session<SerialStream>, ConnectError> {
        Session::open(&self.config()).await
    }
}

/// Finds all serial ports with a recognized microcontroller attached.
///
/// Matches on the USB vendor ID: official Arduino boards and the CH340
/// bridge chip used by most clones. Non-USB ports are skipped.
pub fn find_devices() -> Result<Vec<SerialDevice>, ConnectError> {
    let ports = tokio_serial::available_ports()?;

    let mut devices = Vec::new();
    for port in ports {
        let info = match port.port_type {
            tokio_serial::SerialPortType::UsbPort(info) => info,
            _ => continue,
        };

        if info.vid != ARDUINO_USB_VID && info.vid != CH340_USB_VID {
            continue;
        }

        debug!(
            "Found candidate device on {} (vid {:04x} pid {:04x})",
            port.port_name, info.vid, info.pid
        );
        devices.push(SerialDevice {
            port_name: port.port_name,
        });
    }

    Ok(devices)
}
