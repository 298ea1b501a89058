//! USB/IP PDU encoding and decoding
//!
//! Every USB/IP message begins with a fixed 48-byte header in network byte
//! order: a 20-byte basic header (command, seqnum, devid, direction,
//! endpoint) followed by a 28-byte command-specific body. Payload bytes,
//! when present, follow the header directly.
//!
//! The layouts mirror `usbip_header` in the Linux kernel
//! (drivers/usb/usbip/usbip_common.h); byte-exact compatibility with the
//! reference server is required.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{ProtocolError, Result};

/// USB/IP protocol version
pub const USBIP_VERSION: u16 = 0x0111;

/// Command code: submit an URB
pub const USBIP_CMD_SUBMIT: u32 = 0x0001;
/// Command code: unlink a previously submitted URB
pub const USBIP_CMD_UNLINK: u32 = 0x0002;
/// Reply code: reply for an URB submit
pub const USBIP_RET_SUBMIT: u32 = 0x0003;
/// Reply code: reply for an URB unlink
pub const USBIP_RET_UNLINK: u32 = 0x0004;

/// Transfer direction: host to device
pub const USBIP_DIR_OUT: u32 = 0;
/// Transfer direction: device to host
pub const USBIP_DIR_IN: u32 = 1;

/// URB transfer flag: treat a short IN transfer as an error
pub const URB_SHORT_NOT_OK: u32 = 0x0001;
/// URB transfer flag: schedule the isochronous transfer as soon as possible
pub const URB_ISO_ASAP: u32 = 0x0002;

/// Upper bound on a single reply payload. A server announcing more than
/// this is violating the protocol and the transport is torn down.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Basic header shared by all four PDU kinds (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbIpHeaderBasic {
    /// Command code (CMD_SUBMIT, CMD_UNLINK, RET_SUBMIT, RET_UNLINK)
    pub command: u32,
    /// Sequence number matching requests to replies
    pub seqnum: u32,
    /// Server-side device id
    pub devid: u32,
    /// Transfer direction: 0 = out, 1 = in
    pub direction: u32,
    /// Endpoint number
    pub ep: u32,
}

impl UsbIpHeaderBasic {
    /// Size of the basic header in bytes
    pub const SIZE: usize = 20;

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            command: reader.read_u32::<BigEndian>()?,
            seqnum: reader.read_u32::<BigEndian>()?,
            devid: reader.read_u32::<BigEndian>()?,
            direction: reader.read_u32::<BigEndian>()?,
            ep: reader.read_u32::<BigEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.command)?;
        writer.write_u32::<BigEndian>(self.seqnum)?;
        writer.write_u32::<BigEndian>(self.devid)?;
        writer.write_u32::<BigEndian>(self.direction)?;
        writer.write_u32::<BigEndian>(self.ep)?;
        Ok(())
    }
}

/// CMD_SUBMIT body (28 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbIpCmdSubmit {
    /// URB transfer flags understood by the server
    pub transfer_flags: u32,
    /// Length of the transfer buffer
    pub transfer_buffer_length: u32,
    /// Start frame for isochronous transfers
    pub start_frame: u32,
    /// Number of isochronous packets (0 for other transfers)
    pub number_of_packets: u32,
    /// Polling interval for interrupt/isochronous transfers
    pub interval: u32,
    /// Setup packet for control transfers, zeroed otherwise
    pub setup: [u8; 8],
}

impl UsbIpCmdSubmit {
    /// Size of the body in bytes
    pub const SIZE: usize = 28;

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let transfer_flags = reader.read_u32::<BigEndian>()?;
        let transfer_buffer_length = reader.read_u32::<BigEndian>()?;
        let start_frame = reader.read_u32::<BigEndian>()?;
        let number_of_packets = reader.read_u32::<BigEndian>()?;
        let interval = reader.read_u32::<BigEndian>()?;

        let mut setup = [0u8; 8];
        reader.read_exact(&mut setup)?;

        Ok(Self {
            transfer_flags,
            transfer_buffer_length,
            start_frame,
            number_of_packets,
            interval,
            setup,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.transfer_flags)?;
        writer.write_u32::<BigEndian>(self.transfer_buffer_length)?;
        writer.write_u32::<BigEndian>(self.start_frame)?;
        writer.write_u32::<BigEndian>(self.number_of_packets)?;
        writer.write_u32::<BigEndian>(self.interval)?;
        writer.write_all(&self.setup)?;
        Ok(())
    }
}

/// RET_SUBMIT body (20 bytes + 8 bytes padding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbIpRetSubmit {
    /// Linux errno: 0 on success, negative on error
    pub status: i32,
    /// Bytes actually transferred
    pub actual_length: u32,
    /// Start frame the isochronous transfer was scheduled at
    pub start_frame: u32,
    /// Number of isochronous packet descriptors following the payload
    pub number_of_packets: u32,
    /// Number of isochronous packets that completed with an error
    pub error_count: u32,
}

impl UsbIpRetSubmit {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let status = reader.read_i32::<BigEndian>()?;
        let actual_length = reader.read_u32::<BigEndian>()?;
        let start_frame = reader.read_u32::<BigEndian>()?;
        let number_of_packets = reader.read_u32::<BigEndian>()?;
        let error_count = reader.read_u32::<BigEndian>()?;

        let mut padding = [0u8; 8];
        reader.read_exact(&mut padding)?;

        Ok(Self {
            status,
            actual_length,
            start_frame,
            number_of_packets,
            error_count,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(self.status)?;
        writer.write_u32::<BigEndian>(self.actual_length)?;
        writer.write_u32::<BigEndian>(self.start_frame)?;
        writer.write_u32::<BigEndian>(self.number_of_packets)?;
        writer.write_u32::<BigEndian>(self.error_count)?;
        writer.write_all(&[0u8; 8])?;
        Ok(())
    }

    /// Payload size following this reply on the wire.
    ///
    /// Computed from the reply fields alone; the server is authoritative.
    /// IN transfers carry `actual_length` data bytes, isochronous replies
    /// additionally carry one descriptor per packet. OUT replies carry no
    /// data bytes but isochronous OUT replies still carry descriptors.
    pub fn payload_size(&self, direction: u32) -> usize {
        let data = if direction == USBIP_DIR_IN {
            self.actual_length as usize
        } else {
            0
        };
        data + self.number_of_packets as usize * UsbIpIsoPacketDescriptor::SIZE
    }
}

/// CMD_UNLINK body (4 bytes + 24 bytes padding)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbIpCmdUnlink {
    /// Sequence number of the submit to cancel
    pub unlink_seqnum: u32,
}

impl UsbIpCmdUnlink {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let unlink_seqnum = reader.read_u32::<BigEndian>()?;
        let mut padding = [0u8; 24];
        reader.read_exact(&mut padding)?;
        Ok(Self { unlink_seqnum })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.unlink_seqnum)?;
        writer.write_all(&[0u8; 24])?;
        Ok(())
    }
}

/// RET_UNLINK body (4 bytes + 24 bytes padding)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbIpRetUnlink {
    /// Linux errno: -ECONNRESET when the URB was unlinked, 0 when the
    /// server had already completed it
    pub status: i32,
}

impl UsbIpRetUnlink {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let status = reader.read_i32::<BigEndian>()?;
        let mut padding = [0u8; 24];
        reader.read_exact(&mut padding)?;
        Ok(Self { status })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(self.status)?;
        writer.write_all(&[0u8; 24])?;
        Ok(())
    }
}

/// Isochronous packet descriptor as it appears on the wire (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbIpIsoPacketDescriptor {
    /// Offset of this packet inside the transfer buffer
    pub offset: u32,
    /// Requested length of this packet
    pub length: u32,
    /// Length actually transferred (zero on submit)
    pub actual_length: u32,
    /// Per-packet status (zero on submit)
    pub status: u32,
}

impl UsbIpIsoPacketDescriptor {
    /// Size of one descriptor in bytes
    pub const SIZE: usize = 16;

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            offset: reader.read_u32::<BigEndian>()?,
            length: reader.read_u32::<BigEndian>()?,
            actual_length: reader.read_u32::<BigEndian>()?,
            status: reader.read_u32::<BigEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.offset)?;
        writer.write_u32::<BigEndian>(self.length)?;
        writer.write_u32::<BigEndian>(self.actual_length)?;
        writer.write_u32::<BigEndian>(self.status)?;
        Ok(())
    }
}

/// One outgoing PDU: CMD_SUBMIT or CMD_UNLINK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbIpCommand {
    Submit {
        header: UsbIpHeaderBasic,
        body: UsbIpCmdSubmit,
    },
    Unlink {
        header: UsbIpHeaderBasic,
        body: UsbIpCmdUnlink,
    },
}

impl UsbIpCommand {
    /// Total encoded size (basic header plus body)
    pub const SIZE: usize = 48;

    /// Encode into exactly 48 bytes of network byte order
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        match self {
            Self::Submit { header, body } => {
                header.write_to(&mut buf)?;
                body.write_to(&mut buf)?;
            }
            Self::Unlink { header, body } => {
                header.write_to(&mut buf)?;
                body.write_to(&mut buf)?;
            }
        }
        debug_assert_eq!(buf.len(), Self::SIZE);
        Ok(buf)
    }

    /// Decode a command PDU (the server-facing direction; used by test
    /// harnesses standing in for a server)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::TruncatedPdu {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let mut cursor = std::io::Cursor::new(bytes);
        let header = UsbIpHeaderBasic::read_from(&mut cursor)?;
        match header.command {
            USBIP_CMD_SUBMIT => Ok(Self::Submit {
                header,
                body: UsbIpCmdSubmit::read_from(&mut cursor)?,
            }),
            USBIP_CMD_UNLINK => Ok(Self::Unlink {
                header,
                body: UsbIpCmdUnlink::read_from(&mut cursor)?,
            }),
            USBIP_RET_SUBMIT | USBIP_RET_UNLINK => Err(ProtocolError::UnexpectedCommand {
                command: header.command,
            }),
            command => Err(ProtocolError::UnknownCommand { command }),
        }
    }

    pub fn header(&self) -> &UsbIpHeaderBasic {
        match self {
            Self::Submit { header, .. } | Self::Unlink { header, .. } => header,
        }
    }
}

/// One incoming PDU: RET_SUBMIT or RET_UNLINK
///
/// `decode` rejects every other command code; commands never arrive at the
/// client side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbIpReply {
    Submit {
        header: UsbIpHeaderBasic,
        body: UsbIpRetSubmit,
    },
    Unlink {
        header: UsbIpHeaderBasic,
        body: UsbIpRetUnlink,
    },
}

impl UsbIpReply {
    /// Total encoded size (basic header plus body)
    pub const SIZE: usize = 48;

    /// Decode a reply PDU from exactly 48 header bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::TruncatedPdu {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let mut cursor = std::io::Cursor::new(bytes);
        let header = UsbIpHeaderBasic::read_from(&mut cursor)?;
        match header.command {
            USBIP_RET_SUBMIT => Ok(Self::Submit {
                header,
                body: UsbIpRetSubmit::read_from(&mut cursor)?,
            }),
            USBIP_RET_UNLINK => Ok(Self::Unlink {
                header,
                body: UsbIpRetUnlink::read_from(&mut cursor)?,
            }),
            USBIP_CMD_SUBMIT | USBIP_CMD_UNLINK => Err(ProtocolError::UnexpectedCommand {
                command: header.command,
            }),
            command => Err(ProtocolError::UnknownCommand { command }),
        }
    }

    /// Encode into 48 bytes (used by test harnesses standing in for a server)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        match self {
            Self::Submit { header, body } => {
                header.write_to(&mut buf)?;
                body.write_to(&mut buf)?;
            }
            Self::Unlink { header, body } => {
                header.write_to(&mut buf)?;
                body.write_to(&mut buf)?;
            }
        }
        debug_assert_eq!(buf.len(), Self::SIZE);
        Ok(buf)
    }

    pub fn header(&self) -> &UsbIpHeaderBasic {
        match self {
            Self::Submit { header, .. } | Self::Unlink { header, .. } => header,
        }
    }

    pub fn seqnum(&self) -> u32 {
        self.header().seqnum
    }
}
