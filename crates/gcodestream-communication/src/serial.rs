//! Serial port connection
//!
//! Provides port enumeration and a line-oriented [`Connection`] over a USB or
//! RS-232 serial link to the printer firmware.

use crate::connection::Connection;
use gcodestream_core::{ConnectionError, Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that look like printer controllers
///
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => Ok(ports
            .iter()
            .filter(|port| is_printer_port(&port.port_name))
            .map(|port| {
                let info = SerialPortInfo::new(&port.port_name, port_description(port));
                match &port.port_type {
                    serialport::SerialPortType::UsbPort(usb_info) => {
                        let info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                        match &usb_info.manufacturer {
                            Some(mfg) => info.with_manufacturer(mfg),
                            None => info,
                        }
                    }
                    _ => info,
                }
            })
            .collect()),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

fn is_printer_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => format!(
            "USB {} {}",
            usb_info.manufacturer.as_deref().unwrap_or("Device"),
            usb_info.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Split complete lines off the front of `buffer`, leaving any partial line
pub(crate) fn take_lines(buffer: &mut String) -> Vec<String> {
    let Some(last_newline) = buffer.rfind('\n') else {
        return Vec::new();
    };
    let rest = buffer.split_off(last_newline + 1);
    let complete = std::mem::replace(buffer, rest);
    complete
        .split('\n')
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Printer connection over a serial port
pub struct SerialConnection {
    port_name: String,
    port: Box<dyn serialport::SerialPort>,
    buffer: String,
    connected: bool,
}

impl SerialConnection {
    /// Open `port_name` at `baud_rate`; `timeout` bounds each read
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port_name, e);
                match e.kind() {
                    serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
                        port: port_name.to_string(),
                    },
                    _ => ConnectionError::FailedToOpen {
                        port: port_name.to_string(),
                        reason: e.to_string(),
                    },
                }
            })?;

        tracing::info!("Connected to {} at {} baud", port_name, baud_rate);
        Ok(Self {
            port_name: port_name.to_string(),
            port,
            buffer: String::new(),
            connected: true,
        })
    }

    fn lost(&mut self, reason: impl Into<String>) -> Error {
        self.connected = false;
        let reason = reason.into();
        tracing::error!("Serial connection {} lost: {}", self.port_name, reason);
        ConnectionError::ConnectionLost { reason }.into()
    }
}

impl Connection for SerialConnection {
    fn name(&self) -> String {
        self.port_name.clone()
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        if !self.connected {
            return Err(ConnectionError::NotConnected.into());
        }
        let data = format!("{}\n", line);
        if let Err(e) = self.port.write_all(data.as_bytes()) {
            return Err(self.lost(e.to_string()));
        }
        tracing::trace!("-> {}", line);
        Ok(())
    }

    fn poll_responses(&mut self) -> Result<Vec<String>> {
        if !self.connected {
            return Err(ConnectionError::NotConnected.into());
        }

        let available = match self.port.bytes_to_read() {
            Ok(count) => count as usize,
            Err(e) => return Err(self.lost(e.to_string())),
        };
        if available > 0 {
            let mut bytes = vec![0u8; available];
            match self.port.read(&mut bytes) {
                Ok(read) => self
                    .buffer
                    .push_str(&String::from_utf8_lossy(&bytes[..read])),
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(self.lost(e.to_string())),
            }
        }

        let lines = take_lines(&mut self.buffer);
        for line in &lines {
            tracing::trace!("<- {}", line);
        }
        Ok(lines)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
