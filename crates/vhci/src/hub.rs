//! Virtual hub: port allocation and device lifecycle
//!
//! The hub owns the bus-level table of virtual devices. Plugging parses
//! the host's plug request, allocates a free port, caches the
//! descriptors and binds the device to its transport by spawning the
//! reader pump and writer tasks. Unplugging is one-way: the device
//! refuses new submits, every queued request drains with
//! device-not-connected, and the port frees up once the bus lets go of
//! the device.

use std::sync::{Arc, Mutex, MutexGuard};

use common::usb::{ConfigurationView, DeviceDescriptor};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::device::VirtualDevice;
use crate::reader::run_reader;
use crate::writer::run_writer;

/// Number of ports a hub exposes by default
pub const DEFAULT_PORT_COUNT: usize = 8;

/// Reasons a plug request is refused
#[derive(Debug, Error)]
pub enum PlugError {
    #[error("invalid plug request: {0}")]
    InvalidRequest(String),

    #[error("no free port on the virtual hub")]
    NoFreePort,

    #[error("insufficient resources")]
    InsufficientResources,
}

/// Reasons an unplug request is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnplugError {
    #[error("no device on port {port}")]
    NoSuchPort { port: i32 },
}

/// Parsed plug request
///
/// Wire form: device id, the user-visible serial as a fixed field of 16
/// zero-padded UTF-16 units, the 18-byte device descriptor, then the
/// active configuration descriptor inline, its length carried by its own
/// `wTotalLength`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugRequest {
    /// Device id the server uses to address the physical device
    pub devid: u32,
    /// User-visible serial string
    pub serial: String,
    /// Raw 18-byte device descriptor
    pub device_descriptor: Vec<u8>,
    /// Raw configuration descriptor (`wTotalLength` bytes)
    pub configuration: Vec<u8>,
}

const SERIAL_UNITS: usize = 16;
const DEVID_OFFSET: usize = 0;
const SERIAL_OFFSET: usize = 4;
const DEVICE_DESCRIPTOR_OFFSET: usize = SERIAL_OFFSET + 2 * SERIAL_UNITS;
const CONFIGURATION_OFFSET: usize =
    DEVICE_DESCRIPTOR_OFFSET + common::usb::DESCRIPTOR_LEN_DEVICE;

impl PlugRequest {
    /// Size of the fixed part, which embeds the 9-byte configuration
    /// descriptor header
    pub const FIXED_SIZE: usize =
        CONFIGURATION_OFFSET + common::usb::DESCRIPTOR_LEN_CONFIGURATION;

    /// Parse and validate a plug request.
    ///
    /// The input length must equal
    /// `FIXED_SIZE + wTotalLength - DESCRIPTOR_LEN_CONFIGURATION`.
    pub fn parse(bytes: &[u8]) -> Result<Self, PlugError> {
        if bytes.len() < Self::FIXED_SIZE {
            return Err(PlugError::InvalidRequest(format!(
                "too small input length: {} < {}",
                bytes.len(),
                Self::FIXED_SIZE
            )));
        }

        let total_length = u16::from_le_bytes([
            bytes[CONFIGURATION_OFFSET + 2],
            bytes[CONFIGURATION_OFFSET + 3],
        ]) as usize;

        if total_length < common::usb::DESCRIPTOR_LEN_CONFIGURATION {
            return Err(PlugError::InvalidRequest(format!(
                "wTotalLength {} smaller than the configuration header",
                total_length
            )));
        }

        let expected = Self::FIXED_SIZE + total_length - common::usb::DESCRIPTOR_LEN_CONFIGURATION;
        if bytes.len() != expected {
            return Err(PlugError::InvalidRequest(format!(
                "invalid plug request format: {} != {}",
                bytes.len(),
                expected
            )));
        }

        let devid = u32::from_le_bytes([
            bytes[DEVID_OFFSET],
            bytes[DEVID_OFFSET + 1],
            bytes[DEVID_OFFSET + 2],
            bytes[DEVID_OFFSET + 3],
        ]);

        let units: Vec<u16> = (0..SERIAL_UNITS)
            .map(|i| {
                u16::from_le_bytes([
                    bytes[SERIAL_OFFSET + 2 * i],
                    bytes[SERIAL_OFFSET + 2 * i + 1],
                ])
            })
            .take_while(|&u| u != 0)
            .collect();
        let serial = String::from_utf16(&units)
            .map_err(|_| PlugError::InvalidRequest("serial is not valid UTF-16".to_string()))?;

        let mut configuration = Vec::new();
        configuration
            .try_reserve_exact(total_length)
            .map_err(|_| PlugError::InsufficientResources)?;
        configuration.extend_from_slice(&bytes[CONFIGURATION_OFFSET..]);

        Ok(Self {
            devid,
            serial,
            device_descriptor: bytes
                [DEVICE_DESCRIPTOR_OFFSET..DEVICE_DESCRIPTOR_OFFSET + DeviceDescriptor::SIZE]
                .to_vec(),
            configuration,
        })
    }

    /// Serialize into the wire form `parse` accepts.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            Self::FIXED_SIZE + self.configuration.len()
                - common::usb::DESCRIPTOR_LEN_CONFIGURATION,
        );
        bytes.extend_from_slice(&self.devid.to_le_bytes());

        let mut units = [0u16; SERIAL_UNITS];
        for (slot, unit) in units.iter_mut().zip(self.serial.encode_utf16()) {
            *slot = unit;
        }
        for unit in units {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }

        bytes.extend_from_slice(&self.device_descriptor);
        bytes.extend_from_slice(&self.configuration);
        bytes
    }
}

/// The virtual hub: a fixed range of ports, each optionally bound to a
/// device
pub struct VirtualHub {
    ports: Mutex<Vec<Option<Arc<VirtualDevice>>>>,
}

impl VirtualHub {
    pub fn new(num_ports: usize) -> Self {
        Self {
            ports: Mutex::new(vec![None; num_ports]),
        }
    }

    fn lock_ports(&self) -> MutexGuard<'_, Vec<Option<Arc<VirtualDevice>>>> {
        match self.ports.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Plug a device from its raw plug request.
    pub fn plug<T>(&self, request: &[u8], transport: T) -> Result<Arc<VirtualDevice>, PlugError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.plug_request(PlugRequest::parse(request)?, transport)
    }

    /// Plug a device: allocate a port, cache descriptors, bind the
    /// transport.
    ///
    /// Must run inside a tokio runtime; the reader pump and writer are
    /// spawned onto it.
    pub fn plug_request<T>(
        &self,
        request: PlugRequest,
        transport: T,
    ) -> Result<Arc<VirtualDevice>, PlugError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let descriptor = DeviceDescriptor::parse(&request.device_descriptor)
            .map_err(|e| PlugError::InvalidRequest(e.to_string()))?;
        let configuration = ConfigurationView::new(request.configuration)
            .map_err(|e| PlugError::InvalidRequest(e.to_string()))?;

        let mut ports = self.lock_ports();
        let slot = ports
            .iter()
            .position(|p| p.is_none())
            .ok_or(PlugError::NoFreePort)?;
        let port = (slot + 1) as u8;

        let device = VirtualDevice::new(port, request.devid, descriptor, configuration, request.serial);
        ports[slot] = Some(Arc::clone(&device));
        drop(ports);

        info!(
            port,
            devid = request.devid,
            speed = ?device.speed(),
            "plugged virtual device"
        );

        let (read_half, write_half) = tokio::io::split(transport);
        tokio::spawn(run_reader(Arc::clone(&device), read_half));
        tokio::spawn(run_writer(Arc::clone(&device), write_half));

        Ok(device)
    }

    /// Unplug one port, or every port when `port` is negative.
    pub fn unplug(&self, port: i32) -> Result<(), UnplugError> {
        if port < 0 {
            debug!("unplugging every port");
            let devices: Vec<_> = self.lock_ports().iter_mut().filter_map(Option::take).collect();
            for device in devices {
                device.mark_unplugged();
            }
            return Ok(());
        }

        let slot = (port as usize)
            .checked_sub(1)
            .ok_or(UnplugError::NoSuchPort { port })?;

        let device = {
            let mut ports = self.lock_ports();
            ports
                .get_mut(slot)
                .and_then(Option::take)
                .ok_or(UnplugError::NoSuchPort { port })?
        };

        device.mark_unplugged();
        Ok(())
    }

    /// Device bound to `port`, if any
    pub fn device(&self, port: u8) -> Option<Arc<VirtualDevice>> {
        let slot = (port as usize).checked_sub(1)?;
        self.lock_ports().get(slot)?.clone()
    }

    /// Every currently plugged device
    pub fn devices(&self) -> Vec<Arc<VirtualDevice>> {
        self.lock_ports().iter().flatten().cloned().collect()
    }

    pub fn num_ports(&self) -> usize {
        self.lock_ports().len()
    }
}

impl Default for VirtualHub {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_COUNT)
    }
}
