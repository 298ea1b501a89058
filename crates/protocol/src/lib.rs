//! USB/IP wire protocol implementation
//!
//! This crate implements the USB/IP on-the-wire format used between a
//! virtual host controller and a remote USB/IP server: the fixed 48-byte
//! big-endian PDU header with its submit/unlink command bodies, the
//! reply bodies, isochronous packet descriptors, and the USB setup
//! packet carried by control transfers.
//!
//! The protocol is documented in the Linux kernel
//! (Documentation/usb/usbip_protocol.rst); compatibility with the
//! reference server implementation is byte-exact.
//!
//! # Example
//!
//! ```
//! use protocol::{
//!     USBIP_CMD_SUBMIT, USBIP_DIR_IN, UsbIpCmdSubmit, UsbIpCommand, UsbIpHeaderBasic,
//! };
//!
//! let cmd = UsbIpCommand::Submit {
//!     header: UsbIpHeaderBasic {
//!         command: USBIP_CMD_SUBMIT,
//!         seqnum: 1,
//!         devid: 2,
//!         direction: USBIP_DIR_IN,
//!         ep: 0,
//!     },
//!     body: UsbIpCmdSubmit {
//!         transfer_buffer_length: 18,
//!         ..Default::default()
//!     },
//! };
//!
//! let bytes = cmd.encode().unwrap();
//! assert_eq!(bytes.len(), UsbIpCommand::SIZE);
//! ```

pub mod error;
pub mod pdu;
pub mod setup;

pub use error::{ProtocolError, Result};
pub use pdu::{
    MAX_PAYLOAD_SIZE, URB_ISO_ASAP, URB_SHORT_NOT_OK, USBIP_CMD_SUBMIT, USBIP_CMD_UNLINK,
    USBIP_DIR_IN, USBIP_DIR_OUT, USBIP_RET_SUBMIT, USBIP_RET_UNLINK, USBIP_VERSION, UsbIpCmdSubmit,
    UsbIpCmdUnlink, UsbIpCommand, UsbIpHeaderBasic, UsbIpIsoPacketDescriptor, UsbIpReply,
    UsbIpRetSubmit, UsbIpRetUnlink,
};
pub use setup::SetupPacket;
