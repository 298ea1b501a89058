//! USB descriptor types and parsing
//!
//! Minimal chapter-9 descriptor handling: the 18-byte device descriptor,
//! a walk over the configuration descriptor hierarchy, and the device
//! speed grade derived from `bcdUSB`.

use crate::error::{Error, Result};

pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub const DESCRIPTOR_TYPE_STRING: u8 = 0x03;
pub const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
pub const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

pub const DESCRIPTOR_LEN_DEVICE: usize = 18;
pub const DESCRIPTOR_LEN_CONFIGURATION: usize = 9;
pub const DESCRIPTOR_LEN_INTERFACE: usize = 9;

/// USB device speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpeed {
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
}

impl DeviceSpeed {
    /// Derive the speed grade from the `bcdUSB` field of a device descriptor
    pub fn from_bcd_usb(bcd_usb: u16) -> Self {
        match bcd_usb {
            0x0310.. => DeviceSpeed::SuperPlus,
            0x0300.. => DeviceSpeed::Super,
            0x0200.. => DeviceSpeed::High,
            0x0110.. => DeviceSpeed::Full,
            _ => DeviceSpeed::Low,
        }
    }
}

/// Parsed 18-byte USB device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub bcd_usb: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Size of a device descriptor in bytes
    pub const SIZE: usize = DESCRIPTOR_LEN_DEVICE;

    /// Parse a device descriptor, validating `bLength` and
    /// `bDescriptorType`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::Descriptor(format!(
                "device descriptor too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] as usize != Self::SIZE || bytes[1] != DESCRIPTOR_TYPE_DEVICE {
            return Err(Error::Descriptor(format!(
                "not a device descriptor: bLength={}, bDescriptorType={}",
                bytes[0], bytes[1]
            )));
        }

        Ok(Self {
            bcd_usb: u16::from_le_bytes([bytes[2], bytes[3]]),
            class: bytes[4],
            subclass: bytes[5],
            protocol: bytes[6],
            max_packet_size0: bytes[7],
            vendor_id: u16::from_le_bytes([bytes[8], bytes[9]]),
            product_id: u16::from_le_bytes([bytes[10], bytes[11]]),
            bcd_device: u16::from_le_bytes([bytes[12], bytes[13]]),
            i_manufacturer: bytes[14],
            i_product: bytes[15],
            i_serial_number: bytes[16],
            num_configurations: bytes[17],
        })
    }

    /// Speed grade advertised by `bcdUSB`
    pub fn speed(&self) -> DeviceSpeed {
        DeviceSpeed::from_bcd_usb(self.bcd_usb)
    }
}

/// Interface descriptor fields relevant to device identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// View over a raw configuration descriptor including all embedded
/// interface and endpoint descriptors
///
/// Wraps the full `wTotalLength` byte range. Sub-descriptors are walked
/// lazily; a truncated or self-inconsistent hierarchy simply terminates
/// the walk early.
#[derive(Debug, Clone)]
pub struct ConfigurationView {
    bytes: Vec<u8>,
}

impl ConfigurationView {
    /// Validate and take ownership of a raw configuration descriptor.
    ///
    /// `bytes` must start with a 9-byte configuration descriptor header
    /// and contain exactly `wTotalLength` bytes.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < DESCRIPTOR_LEN_CONFIGURATION {
            return Err(Error::Descriptor(format!(
                "configuration descriptor too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[1] != DESCRIPTOR_TYPE_CONFIGURATION {
            return Err(Error::Descriptor(format!(
                "not a configuration descriptor: bDescriptorType={}",
                bytes[1]
            )));
        }

        let total_length = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        if total_length != bytes.len() {
            return Err(Error::Descriptor(format!(
                "wTotalLength {} does not match buffer length {}",
                total_length,
                bytes.len()
            )));
        }

        Ok(Self { bytes })
    }

    /// Raw descriptor bytes (header plus all sub-descriptors)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `wTotalLength`
    pub fn total_length(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    /// `bNumInterfaces`
    pub fn num_interfaces(&self) -> u8 {
        self.bytes[4]
    }

    /// `bConfigurationValue`
    pub fn configuration_value(&self) -> u8 {
        self.bytes[5]
    }

    /// Iterate over the embedded interface descriptors
    pub fn interfaces(&self) -> impl Iterator<Item = InterfaceDescriptor> + '_ {
        DescriptorIter {
            bytes: &self.bytes[DESCRIPTOR_LEN_CONFIGURATION..],
        }
        .filter_map(|d| {
            if d[1] == DESCRIPTOR_TYPE_INTERFACE && d.len() >= DESCRIPTOR_LEN_INTERFACE {
                Some(InterfaceDescriptor {
                    interface_number: d[2],
                    alternate_setting: d[3],
                    num_endpoints: d[4],
                    class: d[5],
                    subclass: d[6],
                    protocol: d[7],
                })
            } else {
                None
            }
        })
    }

    /// First interface descriptor in the configuration, if any
    pub fn first_interface(&self) -> Option<InterfaceDescriptor> {
        self.interfaces().next()
    }

    /// Find a specific interface / alternate setting pair
    pub fn find_interface(&self, number: u8, alternate: u8) -> Option<InterfaceDescriptor> {
        self.interfaces()
            .find(|i| i.interface_number == number && i.alternate_setting == alternate)
    }
}

/// Iterator over the length-prefixed descriptor blocks of a configuration
struct DescriptorIter<'a> {
    bytes: &'a [u8],
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.bytes.len() < 2 {
            return None;
        }
        let len = self.bytes[0] as usize;
        if len < 2 || len > self.bytes.len() {
            return None;
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Some(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_mock_config_descriptor, create_mock_device_descriptor};

    #[test]
    fn test_parse_device_descriptor() {
        let desc = DeviceDescriptor::parse(&create_mock_device_descriptor()).unwrap();

        assert_eq!(desc.bcd_usb, 0x0200);
        assert_eq!(desc.vendor_id, 0x1234);
        assert_eq!(desc.product_id, 0x5678);
        assert_eq!(desc.max_packet_size0, 64);
        assert_eq!(desc.num_configurations, 1);
        assert_eq!(desc.speed(), DeviceSpeed::High);
    }

    #[test]
    fn test_parse_device_descriptor_rejects_wrong_type() {
        let mut bytes = create_mock_device_descriptor();
        bytes[1] = DESCRIPTOR_TYPE_CONFIGURATION;

        assert!(DeviceDescriptor::parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_device_descriptor_rejects_short_input() {
        assert!(DeviceDescriptor::parse(&[0x12, 0x01]).is_err());
    }

    #[test]
    fn test_speed_from_bcd_usb() {
        assert_eq!(DeviceSpeed::from_bcd_usb(0x0100), DeviceSpeed::Low);
        assert_eq!(DeviceSpeed::from_bcd_usb(0x0110), DeviceSpeed::Full);
        assert_eq!(DeviceSpeed::from_bcd_usb(0x0200), DeviceSpeed::High);
        assert_eq!(DeviceSpeed::from_bcd_usb(0x0210), DeviceSpeed::High);
        assert_eq!(DeviceSpeed::from_bcd_usb(0x0300), DeviceSpeed::Super);
        assert_eq!(DeviceSpeed::from_bcd_usb(0x0310), DeviceSpeed::SuperPlus);
    }

    #[test]
    fn test_configuration_walk() {
        let view = ConfigurationView::new(create_mock_config_descriptor()).unwrap();

        assert_eq!(view.total_length(), 25);
        assert_eq!(view.num_interfaces(), 1);
        assert_eq!(view.configuration_value(), 1);

        let intf = view.first_interface().unwrap();
        assert_eq!(intf.interface_number, 0);
        assert_eq!(intf.alternate_setting, 0);
        assert_eq!(intf.class, 0xFF);
        assert_eq!(intf.num_endpoints, 1);
    }

    #[test]
    fn test_configuration_rejects_length_mismatch() {
        let mut bytes = create_mock_config_descriptor();
        bytes.push(0); // one trailing byte beyond wTotalLength

        assert!(ConfigurationView::new(bytes).is_err());
    }

    #[test]
    fn test_find_interface() {
        let view = ConfigurationView::new(create_mock_config_descriptor()).unwrap();

        assert!(view.find_interface(0, 0).is_some());
        assert!(view.find_interface(1, 0).is_none());
        assert!(view.find_interface(0, 1).is_none());
    }

    #[test]
    fn test_truncated_sub_descriptor_terminates_walk() {
        let mut bytes = create_mock_config_descriptor();
        // Claim a sub-descriptor longer than the remaining bytes
        bytes[9] = 0xF0;

        let view = ConfigurationView::new(bytes).unwrap();
        assert!(view.first_interface().is_none());
    }
}
