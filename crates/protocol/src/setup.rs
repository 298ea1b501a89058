//! USB setup packets and chapter-9 request constants
//!
//! Control transfers carry an 8-byte setup packet whose multi-byte fields
//! are little-endian, unlike the surrounding USB/IP header which is
//! big-endian. The constants below follow the USB 2.0 specification,
//! chapter 9.

/// Direction bit of `bmRequestType`: device-to-host
pub const USB_DIR_IN: u8 = 0x80;
/// Direction bit of `bmRequestType`: host-to-device
pub const USB_DIR_OUT: u8 = 0x00;

/// `bmRequestType` type field: standard request
pub const USB_TYPE_STANDARD: u8 = 0x00;
/// `bmRequestType` type field: class request
pub const USB_TYPE_CLASS: u8 = 0x20;
/// `bmRequestType` type field: vendor request
pub const USB_TYPE_VENDOR: u8 = 0x40;

/// `bmRequestType` recipient: device
pub const USB_RECIP_DEVICE: u8 = 0x00;
/// `bmRequestType` recipient: interface
pub const USB_RECIP_INTERFACE: u8 = 0x01;
/// `bmRequestType` recipient: endpoint
pub const USB_RECIP_ENDPOINT: u8 = 0x02;
/// `bmRequestType` recipient: other
pub const USB_RECIP_OTHER: u8 = 0x03;

/// `bmRequestType` for hub port requests (OUT | CLASS | OTHER)
pub const USB_RT_PORT: u8 = USB_DIR_OUT | USB_TYPE_CLASS | USB_RECIP_OTHER;

// Standard request codes
pub const USB_REQUEST_GET_STATUS: u8 = 0x00;
pub const USB_REQUEST_CLEAR_FEATURE: u8 = 0x01;
pub const USB_REQUEST_SET_FEATURE: u8 = 0x03;
pub const USB_REQUEST_SET_ADDRESS: u8 = 0x05;
pub const USB_REQUEST_GET_DESCRIPTOR: u8 = 0x06;
pub const USB_REQUEST_SET_DESCRIPTOR: u8 = 0x07;
pub const USB_REQUEST_GET_CONFIGURATION: u8 = 0x08;
pub const USB_REQUEST_SET_CONFIGURATION: u8 = 0x09;
pub const USB_REQUEST_GET_INTERFACE: u8 = 0x0a;
pub const USB_REQUEST_SET_INTERFACE: u8 = 0x0b;

/// Endpoint feature selector: ENDPOINT_HALT
pub const USB_FEATURE_ENDPOINT_HALT: u16 = 0x0000;
/// Hub port feature selector: PORT_RESET
pub const USB_PORT_FEAT_RESET: u16 = 0x0004;

/// 8-byte USB setup packet
///
/// `wValue`, `wIndex` and `wLength` are stored in host order here and
/// serialized little-endian per the USB specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket {
    /// bmRequestType: direction, type and recipient bits
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    /// Size of a setup packet in bytes
    pub const SIZE: usize = 8;

    /// Serialize to the 8-byte wire form
    pub fn to_bytes(&self) -> [u8; 8] {
        let [value_lo, value_hi] = self.value.to_le_bytes();
        let [index_lo, index_hi] = self.index.to_le_bytes();
        let [length_lo, length_hi] = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value_lo,
            value_hi,
            index_lo,
            index_hi,
            length_lo,
            length_hi,
        ]
    }

    /// Parse from the 8-byte wire form
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Direction encoded in bmRequestType
    pub fn is_direction_in(&self) -> bool {
        self.request_type & USB_DIR_IN != 0
    }

    /// Descriptor requests pack type and index into wValue
    pub fn descriptor_value(descriptor_type: u8, index: u8) -> u16 {
        (u16::from(descriptor_type) << 8) | u16::from(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_packet_roundtrip() {
        let pkt = SetupPacket {
            request_type: USB_DIR_IN | USB_TYPE_STANDARD | USB_RECIP_DEVICE,
            request: USB_REQUEST_GET_DESCRIPTOR,
            value: SetupPacket::descriptor_value(0x01, 0),
            index: 0,
            length: 18,
        };

        let bytes = pkt.to_bytes();
        assert_eq!(bytes, [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);

        let decoded = SetupPacket::from_bytes(&bytes);
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn test_direction_bit() {
        let out = SetupPacket {
            request_type: USB_DIR_OUT | USB_TYPE_STANDARD | USB_RECIP_DEVICE,
            request: USB_REQUEST_SET_CONFIGURATION,
            value: 1,
            index: 0,
            length: 0,
        };
        assert!(!out.is_direction_in());

        let inp = SetupPacket {
            request_type: USB_DIR_IN | USB_TYPE_STANDARD | USB_RECIP_DEVICE,
            request: USB_REQUEST_GET_STATUS,
            value: 0,
            index: 0,
            length: 2,
        };
        assert!(inp.is_direction_in());
    }

    #[test]
    fn test_descriptor_value() {
        // String descriptor 3
        assert_eq!(SetupPacket::descriptor_value(0x03, 3), 0x0303);
        // Device descriptor
        assert_eq!(SetupPacket::descriptor_value(0x01, 0), 0x0100);
    }

    #[test]
    fn test_port_request_type() {
        assert_eq!(USB_RT_PORT, 0x23);
    }
}
