//! Serial transport for USB and RS-232 readers.
//!
//! This module provides serial port communication for readers connected
//! via USB or RS-232.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use super::{CloseHandler, DataHandler, DeliveryTargets, ErrorHandler, Transport, run_read_loop};
use crate::error::{Error, Result};
use crate::types::TransportKind;

/// Default baud rate for UHF desktop readers.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Port and line settings for a serial reader.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Creates a configuration at [`DEFAULT_BAUD_RATE`].
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }
}

/// Serial transport.
///
/// Uses split read/write halves so a background task can read while
/// commands are written.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<WriteHalf<SerialStream>>,
    read_task: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    targets: DeliveryTargets,
}

impl SerialTransport {
    /// Creates an unopened transport.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            read_task: None,
            connected: Arc::new(AtomicBool::new(false)),
            targets: DeliveryTargets::new(),
        }
    }

    /// Shorthand for a port at the default baud rate.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    fn teardown(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.is_connected() {
                return Ok(());
            }
            self.teardown();
            self.writer = None;

            tracing::info!(
                "opening serial port {} at {} baud",
                self.config.port,
                self.config.baud_rate
            );

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(|e| {
                    Error::connection(format!("failed to open serial port {}", self.config.port), e)
                })?;

            let (reader, writer) = tokio::io::split(stream);
            self.connected.store(true, Ordering::SeqCst);
            self.read_task = Some(tokio::spawn(run_read_loop(
                reader,
                "serial",
                Arc::clone(&self.connected),
                self.targets.clone(),
            )));
            self.writer = Some(writer);

            tracing::info!("connected to serial port {}", self.config.port);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.teardown();
            if self.writer.take().is_some() {
                tracing::info!("closed serial port {}", self.config.port);
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;

            tracing::trace!("serial sending {} bytes", data.len());
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn on_data(&mut self, handler: DataHandler) {
        self.targets.set_data(handler);
    }

    fn on_error(&mut self, handler: ErrorHandler) {
        self.targets.set_error(handler);
    }

    fn on_close(&mut self, handler: CloseHandler) {
        self.targets.set_close(handler);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// A serial port reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port path.
    pub name: String,
    /// USB manufacturer string, when the OS reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let manufacturer = match port.port_type {
                SerialPortType::UsbPort(usb) => usb.manufacturer,
                _ => None,
            };
            PortInfo {
                name: port.port_name,
                manufacturer,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_port_defaults_to_115200() {
        let config = SerialConfig::new("/dev/ttyACM0");
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(SerialConfig::new("COM4").baud_rate(57_600).baud_rate, 57_600);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let mut transport = SerialTransport::with_port("/dev/ttyUSB0");
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(Bytes::from_static(b"x")).await,
            Err(Error::NotConnected)
        ));
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_port_is_connection_error() {
        let mut transport = SerialTransport::with_port("/dev/rfid-reader-does-not-exist");
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[test]
    #[ignore = "enumerates host serial devices"]
    fn test_list_ports_reports_names() {
        for port in list_ports().unwrap() {
            assert!(!port.name.is_empty());
        }
    }
}
