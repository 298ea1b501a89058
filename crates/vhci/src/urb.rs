//! URB model: the host-side request vocabulary of the broker
//!
//! A [`Urb`] is one host-submitted USB request block. Its [`UrbFunction`]
//! selects how the broker translates it to the wire; the dispatch set is
//! closed and known at build time, so it is a tagged enum rather than a
//! function table.

use protocol::SetupPacket;
use thiserror::Error;

use crate::translate::TranslateError;

/// Transfer direction as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    /// Wire encoding (0 = out, 1 = in)
    pub fn to_wire(self) -> u32 {
        match self {
            Direction::Out => protocol::USBIP_DIR_OUT,
            Direction::In => protocol::USBIP_DIR_IN,
        }
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

/// Opaque handle to one endpoint of the selected interface alternate
/// setting
///
/// Carries the endpoint address (direction bit included), the transfer
/// type and, for periodic endpoints, the polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipe {
    /// bEndpointAddress: number in bits 0-3, direction in bit 7
    pub endpoint_address: u8,
    /// Transfer type of the endpoint
    pub kind: PipeKind,
    /// Polling interval for interrupt/isochronous endpoints
    pub interval: u32,
}

impl Pipe {
    /// The default control endpoint every device has
    pub const EP0: Pipe = Pipe {
        endpoint_address: 0,
        kind: PipeKind::Control,
        interval: 0,
    };

    pub fn new(endpoint_address: u8, kind: PipeKind, interval: u32) -> Self {
        Self {
            endpoint_address,
            kind,
            interval,
        }
    }

    pub fn bulk_in(number: u8) -> Self {
        Self::new(number | 0x80, PipeKind::Bulk, 0)
    }

    pub fn bulk_out(number: u8) -> Self {
        Self::new(number & 0x0F, PipeKind::Bulk, 0)
    }

    pub fn interrupt_in(number: u8, interval: u32) -> Self {
        Self::new(number | 0x80, PipeKind::Interrupt, interval)
    }

    pub fn iso_in(number: u8, interval: u32) -> Self {
        Self::new(number | 0x80, PipeKind::Isochronous, interval)
    }

    pub fn iso_out(number: u8, interval: u32) -> Self {
        Self::new(number & 0x0F, PipeKind::Isochronous, interval)
    }

    /// Endpoint number without the direction bit
    pub fn number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    /// Direction encoded in the endpoint address
    pub fn direction(&self) -> Direction {
        if self.endpoint_address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// True for the bidirectional default control endpoint
    pub fn is_default_control(&self) -> bool {
        self.number() == 0 && self.kind == PipeKind::Control
    }
}

/// Recipient bits of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

impl Recipient {
    pub fn to_request_type_bits(self) -> u8 {
        match self {
            Recipient::Device => protocol::setup::USB_RECIP_DEVICE,
            Recipient::Interface => protocol::setup::USB_RECIP_INTERFACE,
            Recipient::Endpoint => protocol::setup::USB_RECIP_ENDPOINT,
            Recipient::Other => protocol::setup::USB_RECIP_OTHER,
        }
    }
}

/// The function of an URB, covering every request the upper layers may
/// hand to the broker
///
/// The first group maps to wire traffic. The second group is handled
/// entirely above the broker; receiving one here is an internal logic
/// error and fails without touching the transport. `Reserved` covers
/// codes with no assigned meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrbFunction {
    /// SET_CONFIGURATION; `None` selects the unconfigured state
    SelectConfiguration { configuration: Option<u8> },
    /// SET_INTERFACE
    SelectInterface { interface: u8, alternate: u8 },
    /// Control transfer with a verbatim setup packet
    ControlTransfer { setup: SetupPacket },
    /// Bulk or interrupt transfer on the URB's pipe
    BulkOrInterruptTransfer,
    /// Isochronous transfer; `offsets` is the per-packet offset table
    IsochronousTransfer { start_frame: u32, offsets: Vec<u32> },
    /// GET_DESCRIPTOR
    GetDescriptor {
        recipient: Recipient,
        descriptor_type: u8,
        index: u8,
        language_id: u16,
    },
    /// SET_DESCRIPTOR
    SetDescriptor {
        recipient: Recipient,
        descriptor_type: u8,
        index: u8,
        language_id: u16,
    },
    /// SET_FEATURE
    SetFeature {
        recipient: Recipient,
        selector: u16,
        index: u16,
    },
    /// CLEAR_FEATURE
    ClearFeature {
        recipient: Recipient,
        selector: u16,
        index: u16,
    },
    /// GET_STATUS (wLength is always 2)
    GetStatus { recipient: Recipient, index: u16 },
    /// GET_CONFIGURATION
    GetConfiguration,
    /// GET_INTERFACE
    GetInterface { interface: u16 },
    /// Vendor-defined request on EP0
    VendorRequest {
        recipient: Recipient,
        request: u8,
        value: u16,
        index: u16,
    },
    /// Class-defined request on EP0
    ClassRequest {
        recipient: Recipient,
        request: u8,
        value: u16,
        index: u16,
    },
    /// CLEAR_FEATURE(ENDPOINT_HALT) addressed at the URB's pipe
    ResetPipeAndClearStall,
    /// SET_FEATURE(PORT_RESET) as a hub class request
    ResetPort,
    /// GET_DESCRIPTOR issued on behalf of a node-connection query
    GetDescriptorFromNodeConnection { value: u16, index: u16, length: u16 },

    // Handled above the broker; must never reach the wire
    AbortPipe,
    GetCurrentFrameNumber,
    TakeFrameLengthControl,
    ReleaseFrameLengthControl,
    GetFrameLength,
    SetFrameLength,
    GetMsFeatureDescriptor,
    SyncResetPipe,
    SyncClearStall,
    OpenStaticStreams,
    CloseStaticStreams,
    GetIsochPipeTransferPathDelays,

    /// Function code with no assigned meaning
    Reserved { code: u16 },
}

impl UrbFunction {
    /// Functions the upper layer should have handled locally
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            UrbFunction::AbortPipe
                | UrbFunction::GetCurrentFrameNumber
                | UrbFunction::TakeFrameLengthControl
                | UrbFunction::ReleaseFrameLengthControl
                | UrbFunction::GetFrameLength
                | UrbFunction::SetFrameLength
                | UrbFunction::GetMsFeatureDescriptor
                | UrbFunction::SyncResetPipe
                | UrbFunction::SyncClearStall
                | UrbFunction::OpenStaticStreams
                | UrbFunction::CloseStaticStreams
                | UrbFunction::GetIsochPipeTransferPathDelays
        )
    }
}

/// The transfer buffer of an URB
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferBuffer {
    /// No data stage
    None,
    /// Host-to-device data
    Out(Vec<u8>),
    /// Device-to-host buffer of the given capacity
    In(usize),
}

impl TransferBuffer {
    /// Length of the data stage in either direction
    pub fn len(&self) -> usize {
        match self {
            TransferBuffer::None => 0,
            TransferBuffer::Out(data) => data.len(),
            TransferBuffer::In(capacity) => *capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One USB request block as submitted by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urb {
    pub function: UrbFunction,
    /// Target pipe; `Pipe::EP0` for control-style functions
    pub pipe: Pipe,
    /// Host's direction flag. The pipe is authoritative for non-default
    /// pipes; EP0 transfers use this flag.
    pub direction: Direction,
    /// Fail a short IN transfer instead of completing with fewer bytes
    pub short_not_ok: bool,
    pub buffer: TransferBuffer,
}

impl Urb {
    /// Control transfer with a verbatim setup packet on EP0
    pub fn control(setup: SetupPacket, buffer: TransferBuffer) -> Self {
        let direction = if setup.is_direction_in() {
            Direction::In
        } else {
            Direction::Out
        };
        Self {
            function: UrbFunction::ControlTransfer { setup },
            pipe: Pipe::EP0,
            direction,
            short_not_ok: false,
            buffer,
        }
    }

    /// Bulk or interrupt transfer on the given pipe
    pub fn bulk_or_interrupt(pipe: Pipe, buffer: TransferBuffer) -> Self {
        Self {
            function: UrbFunction::BulkOrInterruptTransfer,
            direction: pipe.direction(),
            pipe,
            short_not_ok: false,
            buffer,
        }
    }

    /// Isochronous transfer with the given per-packet offsets
    pub fn isochronous(
        pipe: Pipe,
        buffer: TransferBuffer,
        start_frame: u32,
        offsets: Vec<u32>,
    ) -> Self {
        Self {
            function: UrbFunction::IsochronousTransfer {
                start_frame,
                offsets,
            },
            direction: pipe.direction(),
            pipe,
            short_not_ok: false,
            buffer,
        }
    }

    /// EP0 request without a pipe of its own
    pub fn ep0(function: UrbFunction, direction: Direction, buffer: TransferBuffer) -> Self {
        Self {
            function,
            pipe: Pipe::EP0,
            direction,
            short_not_ok: false,
            buffer,
        }
    }
}

/// Exit condition of an URB as surfaced to the host
///
/// This is the complete set; no other codes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbStatus {
    Success,
    ShortTransfer,
    Stall,
    Disconnected,
    Cancelled,
    InvalidParameter,
    InsufficientResources,
    InternalError,
}

impl UrbStatus {
    /// Map a wire status (Linux errno, 0 or negative) to the host-facing
    /// exit condition
    pub fn from_errno(status: i32) -> Self {
        match status {
            0 => UrbStatus::Success,
            -32 => UrbStatus::Stall,                   // EPIPE
            -19 | -108 => UrbStatus::Disconnected,     // ENODEV, ESHUTDOWN
            -2 | -104 => UrbStatus::Cancelled,         // ENOENT, ECONNRESET
            -121 => UrbStatus::ShortTransfer,          // EREMOTEIO
            -12 => UrbStatus::InsufficientResources,   // ENOMEM
            -22 => UrbStatus::InvalidParameter,        // EINVAL
            _ => UrbStatus::InternalError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UrbStatus::Success)
    }
}

impl std::fmt::Display for UrbStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UrbStatus::Success => "success",
            UrbStatus::ShortTransfer => "short transfer",
            UrbStatus::Stall => "endpoint stalled",
            UrbStatus::Disconnected => "device not connected",
            UrbStatus::Cancelled => "cancelled",
            UrbStatus::InvalidParameter => "invalid parameter",
            UrbStatus::InsufficientResources => "insufficient resources",
            UrbStatus::InternalError => "internal error",
        };
        f.write_str(s)
    }
}

/// Per-packet result of an isochronous transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacketResult {
    /// Offset of the packet inside the transfer buffer
    pub offset: u32,
    /// Length requested at submit
    pub length: u32,
    /// Length actually transferred
    pub actual_length: u32,
    /// Per-packet wire status
    pub status: i32,
}

/// Completion delivered to the host, exactly once per submitted URB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: UrbStatus,
    /// Bytes actually transferred
    pub actual_length: usize,
    /// Received data for IN transfers; isochronous data sits at the
    /// submitted packet offsets
    pub data: Vec<u8>,
    /// Per-packet results for isochronous transfers
    pub iso_packets: Vec<IsoPacketResult>,
    /// Frame the isochronous transfer started at
    pub start_frame: u32,
    /// Number of isochronous packets that failed
    pub error_count: u32,
}

impl Completion {
    /// Completion with no data, carrying only an exit condition
    pub fn from_status(status: UrbStatus) -> Self {
        Self {
            status,
            actual_length: 0,
            data: Vec::new(),
            iso_packets: Vec::new(),
            start_frame: 0,
            error_count: 0,
        }
    }
}

/// Reasons a submit is refused before anything reaches the wire
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrbError {
    /// Device is unplugged or the transport is gone
    #[error("device not connected")]
    Disconnected,

    /// The translator rejected the URB
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

impl UrbError {
    /// The exit condition this error corresponds to
    pub fn status(&self) -> UrbStatus {
        match self {
            UrbError::Disconnected => UrbStatus::Disconnected,
            UrbError::Translate(e) => e.status(),
        }
    }
}
