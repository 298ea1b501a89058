//! URB to CMD_SUBMIT translation
//!
//! For every URB function the host may submit, builds the submit body,
//! resolves the wire direction and endpoint, and assembles the outgoing
//! payload. Rejections never touch the transport: unexpected functions
//! surface an internal error, reserved codes and malformed requests an
//! invalid parameter.

use protocol::setup::{
    SetupPacket, USB_DIR_IN, USB_DIR_OUT, USB_FEATURE_ENDPOINT_HALT, USB_PORT_FEAT_RESET,
    USB_REQUEST_CLEAR_FEATURE, USB_REQUEST_GET_CONFIGURATION, USB_REQUEST_GET_DESCRIPTOR,
    USB_REQUEST_GET_INTERFACE, USB_REQUEST_GET_STATUS, USB_REQUEST_SET_CONFIGURATION,
    USB_REQUEST_SET_DESCRIPTOR, USB_REQUEST_SET_FEATURE, USB_REQUEST_SET_INTERFACE,
    USB_RT_PORT, USB_TYPE_CLASS, USB_TYPE_STANDARD, USB_TYPE_VENDOR,
};
use protocol::{
    MAX_PAYLOAD_SIZE, URB_ISO_ASAP, URB_SHORT_NOT_OK, UsbIpCmdSubmit, UsbIpIsoPacketDescriptor,
};
use thiserror::Error;

use crate::urb::{Direction, PipeKind, Recipient, TransferBuffer, Urb, UrbFunction, UrbStatus};

/// Rejections raised while translating an URB
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// Function belongs to the upper layers; reaching the broker is a
    /// logic error
    #[error("URB function must not reach the broker")]
    UnexpectedFunction,

    /// Function code has no assigned meaning
    #[error("reserved URB function code {code:#06x}")]
    ReservedFunction { code: u16 },

    /// Direction in the setup packet contradicts the URB
    #[error("transfer direction differs between URB and setup packet")]
    DirectionMismatch,

    /// OUT transfer without outgoing data, or IN transfer with it
    #[error("transfer buffer does not match the transfer direction")]
    BufferMismatch,

    /// Pipe type does not fit the function
    #[error("wrong pipe type for this URB function")]
    WrongPipeType,

    /// Isochronous offset table is inconsistent with the buffer
    #[error("invalid isochronous packet layout")]
    BadIsoLayout,

    /// Request length does not fit the wire field
    #[error("transfer length {len} not representable")]
    LengthOverflow { len: usize },

    /// Buffer exceeds what a single request may carry
    #[error("transfer buffer of {len} bytes exceeds the payload limit")]
    BufferTooLarge { len: usize },
}

impl TranslateError {
    /// Exit condition surfaced to the submitter
    pub fn status(&self) -> UrbStatus {
        match self {
            TranslateError::UnexpectedFunction => UrbStatus::InternalError,
            TranslateError::BufferTooLarge { .. } => UrbStatus::InsufficientResources,
            _ => UrbStatus::InvalidParameter,
        }
    }
}

/// A translated submit, ready for sequence-number assignment and framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitFrame {
    /// CMD_SUBMIT body
    pub body: UsbIpCmdSubmit,
    /// Resolved wire direction
    pub direction: Direction,
    /// Target endpoint number
    pub ep: u32,
    /// Outgoing transfer buffer bytes (OUT transfers only)
    pub data: Vec<u8>,
    /// Outgoing isochronous packet descriptors
    pub iso_packets: Vec<UsbIpIsoPacketDescriptor>,
}

impl SubmitFrame {
    /// Bytes following the header on the wire
    pub fn payload_len(&self) -> usize {
        self.data.len() + self.iso_packets.len() * UsbIpIsoPacketDescriptor::SIZE
    }

    /// IN capacity the host reserved for the reply
    pub fn in_capacity(&self) -> usize {
        if self.direction == Direction::In {
            self.body.transfer_buffer_length as usize
        } else {
            0
        }
    }
}

/// Translate one URB into its submit frame
pub fn translate(urb: &Urb) -> Result<SubmitFrame, TranslateError> {
    if urb.function.is_unexpected() {
        return Err(TranslateError::UnexpectedFunction);
    }

    let len = urb.buffer.len();
    if len > MAX_PAYLOAD_SIZE {
        return Err(TranslateError::BufferTooLarge { len });
    }

    match &urb.function {
        UrbFunction::SelectConfiguration { configuration } => {
            let setup = standard_setup(
                USB_DIR_OUT,
                Recipient::Device,
                USB_REQUEST_SET_CONFIGURATION,
                u16::from(configuration.unwrap_or(0)),
                0,
                0,
            );
            ep0_no_data(urb, setup, Direction::Out)
        }

        UrbFunction::SelectInterface {
            interface,
            alternate,
        } => {
            let setup = standard_setup(
                USB_DIR_OUT,
                Recipient::Interface,
                USB_REQUEST_SET_INTERFACE,
                u16::from(*alternate),
                u16::from(*interface),
                0,
            );
            ep0_no_data(urb, setup, Direction::Out)
        }

        UrbFunction::ControlTransfer { setup } => {
            let direction = effective_direction(urb);
            let setup_direction = if setup.is_direction_in() {
                Direction::In
            } else {
                Direction::Out
            };
            if direction != setup_direction {
                return Err(TranslateError::DirectionMismatch);
            }

            transfer_frame(urb, *setup, direction, u32::from(urb.pipe.number()), 0)
        }

        UrbFunction::BulkOrInterruptTransfer => {
            if !matches!(urb.pipe.kind, PipeKind::Bulk | PipeKind::Interrupt) {
                return Err(TranslateError::WrongPipeType);
            }

            let direction = urb.pipe.direction();
            transfer_frame(
                urb,
                SetupPacket::default(),
                direction,
                u32::from(urb.pipe.number()),
                urb.pipe.interval,
            )
        }

        UrbFunction::IsochronousTransfer {
            start_frame,
            offsets,
        } => translate_isochronous(urb, *start_frame, offsets),

        UrbFunction::GetDescriptor {
            recipient,
            descriptor_type,
            index,
            language_id,
        } => {
            let setup = standard_setup(
                USB_DIR_IN,
                *recipient,
                USB_REQUEST_GET_DESCRIPTOR,
                SetupPacket::descriptor_value(*descriptor_type, *index),
                *language_id,
                request_length(len)?,
            );
            transfer_frame(urb, setup, Direction::In, 0, 0)
        }

        UrbFunction::SetDescriptor {
            recipient,
            descriptor_type,
            index,
            language_id,
        } => {
            let setup = standard_setup(
                USB_DIR_OUT,
                *recipient,
                USB_REQUEST_SET_DESCRIPTOR,
                SetupPacket::descriptor_value(*descriptor_type, *index),
                *language_id,
                request_length(len)?,
            );
            transfer_frame(urb, setup, Direction::Out, 0, 0)
        }

        UrbFunction::SetFeature {
            recipient,
            selector,
            index,
        } => {
            let setup = standard_setup(
                USB_DIR_OUT,
                *recipient,
                USB_REQUEST_SET_FEATURE,
                *selector,
                *index,
                0,
            );
            ep0_no_data(urb, setup, Direction::Out)
        }

        UrbFunction::ClearFeature {
            recipient,
            selector,
            index,
        } => {
            let setup = standard_setup(
                USB_DIR_OUT,
                *recipient,
                USB_REQUEST_CLEAR_FEATURE,
                *selector,
                *index,
                0,
            );
            ep0_no_data(urb, setup, Direction::Out)
        }

        UrbFunction::GetStatus { recipient, index } => {
            // wLength of GET_STATUS is fixed by chapter 9
            if len != 2 {
                return Err(TranslateError::LengthOverflow { len });
            }
            let setup = standard_setup(
                USB_DIR_IN,
                *recipient,
                USB_REQUEST_GET_STATUS,
                0,
                *index,
                2,
            );
            transfer_frame(urb, setup, Direction::In, 0, 0)
        }

        UrbFunction::GetConfiguration => {
            let setup = standard_setup(
                USB_DIR_IN,
                Recipient::Device,
                USB_REQUEST_GET_CONFIGURATION,
                0,
                0,
                request_length(len)?,
            );
            transfer_frame(urb, setup, Direction::In, 0, 0)
        }

        UrbFunction::GetInterface { interface } => {
            let setup = standard_setup(
                USB_DIR_IN,
                Recipient::Interface,
                USB_REQUEST_GET_INTERFACE,
                0,
                *interface,
                request_length(len)?,
            );
            transfer_frame(urb, setup, Direction::In, 0, 0)
        }

        UrbFunction::VendorRequest {
            recipient,
            request,
            value,
            index,
        } => vendor_class_frame(urb, USB_TYPE_VENDOR, *recipient, *request, *value, *index),

        UrbFunction::ClassRequest {
            recipient,
            request,
            value,
            index,
        } => vendor_class_frame(urb, USB_TYPE_CLASS, *recipient, *request, *value, *index),

        UrbFunction::ResetPipeAndClearStall => {
            let setup = standard_setup(
                USB_DIR_OUT,
                Recipient::Endpoint,
                USB_REQUEST_CLEAR_FEATURE,
                USB_FEATURE_ENDPOINT_HALT,
                u16::from(urb.pipe.endpoint_address),
                0,
            );
            ep0_no_data(urb, setup, Direction::Out)
        }

        UrbFunction::ResetPort => {
            let setup = SetupPacket {
                request_type: USB_RT_PORT,
                request: USB_REQUEST_SET_FEATURE,
                value: USB_PORT_FEAT_RESET,
                index: 0,
                length: 0,
            };
            ep0_no_data(urb, setup, Direction::Out)
        }

        UrbFunction::GetDescriptorFromNodeConnection {
            value,
            index,
            length,
        } => {
            let setup = standard_setup(
                USB_DIR_IN,
                Recipient::Device,
                USB_REQUEST_GET_DESCRIPTOR,
                *value,
                *index,
                *length,
            );
            transfer_frame(urb, setup, Direction::In, 0, 0)
        }

        UrbFunction::Reserved { code } => Err(TranslateError::ReservedFunction { code: *code }),

        // is_unexpected() filtered these above
        _ => Err(TranslateError::UnexpectedFunction),
    }
}

/// Direction the transfer actually uses: the pipe is authoritative except
/// on the bidirectional default control endpoint, where the URB's own
/// flag decides.
fn effective_direction(urb: &Urb) -> Direction {
    if urb.pipe.is_default_control() {
        urb.direction
    } else {
        urb.pipe.direction()
    }
}

fn standard_setup(
    direction: u8,
    recipient: Recipient,
    request: u8,
    value: u16,
    index: u16,
    length: u16,
) -> SetupPacket {
    SetupPacket {
        request_type: direction | USB_TYPE_STANDARD | recipient.to_request_type_bits(),
        request,
        value,
        index,
        length,
    }
}

fn request_length(len: usize) -> Result<u16, TranslateError> {
    u16::try_from(len).map_err(|_| TranslateError::LengthOverflow { len })
}

fn transfer_flags(direction: Direction, short_not_ok: bool) -> u32 {
    if direction == Direction::In && short_not_ok {
        URB_SHORT_NOT_OK
    } else {
        0
    }
}

/// OUT data stage bytes, or an empty vec for IN / no-data transfers.
/// An OUT transfer that announces data must carry it.
fn out_data(urb: &Urb, direction: Direction) -> Result<Vec<u8>, TranslateError> {
    match (&urb.buffer, direction) {
        (TransferBuffer::Out(data), Direction::Out) => Ok(data.clone()),
        (TransferBuffer::None, Direction::Out) => Ok(Vec::new()),
        (TransferBuffer::In(_), Direction::Out) => Err(TranslateError::BufferMismatch),
        (TransferBuffer::Out(_), Direction::In) => Err(TranslateError::BufferMismatch),
        (_, Direction::In) => Ok(Vec::new()),
    }
}

/// EP0 request with no data stage
fn ep0_no_data(
    urb: &Urb,
    setup: SetupPacket,
    direction: Direction,
) -> Result<SubmitFrame, TranslateError> {
    Ok(SubmitFrame {
        body: UsbIpCmdSubmit {
            transfer_flags: transfer_flags(direction, urb.short_not_ok),
            transfer_buffer_length: 0,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup: setup.to_bytes(),
        },
        direction,
        ep: 0,
        data: Vec::new(),
        iso_packets: Vec::new(),
    })
}

/// Transfer with an optional data stage
fn transfer_frame(
    urb: &Urb,
    setup: SetupPacket,
    direction: Direction,
    ep: u32,
    interval: u32,
) -> Result<SubmitFrame, TranslateError> {
    let data = out_data(urb, direction)?;
    Ok(SubmitFrame {
        body: UsbIpCmdSubmit {
            transfer_flags: transfer_flags(direction, urb.short_not_ok),
            transfer_buffer_length: urb.buffer.len() as u32,
            start_frame: 0,
            number_of_packets: 0,
            interval,
            setup: setup.to_bytes(),
        },
        direction,
        ep,
        data,
        iso_packets: Vec::new(),
    })
}

fn vendor_class_frame(
    urb: &Urb,
    request_kind: u8,
    recipient: Recipient,
    request: u8,
    value: u16,
    index: u16,
) -> Result<SubmitFrame, TranslateError> {
    let direction = effective_direction(urb);
    let direction_bit = match direction {
        Direction::In => USB_DIR_IN,
        Direction::Out => USB_DIR_OUT,
    };

    let setup = SetupPacket {
        request_type: direction_bit | request_kind | recipient.to_request_type_bits(),
        request,
        value,
        index,
        length: request_length(urb.buffer.len())?,
    };

    transfer_frame(urb, setup, direction, 0, 0)
}

/// Isochronous transfers carry their packet table on the wire: OUT sends
/// `[buffer][N descriptors]`, IN sends descriptors only. Packet lengths
/// derive from consecutive offsets; the table must tile the buffer
/// exactly.
fn translate_isochronous(
    urb: &Urb,
    start_frame: u32,
    offsets: &[u32],
) -> Result<SubmitFrame, TranslateError> {
    if urb.pipe.kind != PipeKind::Isochronous {
        return Err(TranslateError::WrongPipeType);
    }

    let direction = urb.pipe.direction();
    let buffer_len = urb.buffer.len() as u32;

    if offsets.is_empty() && buffer_len != 0 {
        return Err(TranslateError::BadIsoLayout);
    }

    let mut iso_packets = Vec::with_capacity(offsets.len());
    for (i, &offset) in offsets.iter().enumerate() {
        let next_offset = match offsets.get(i + 1) {
            Some(&next) => next,
            None => buffer_len,
        };

        if next_offset < offset || next_offset > buffer_len {
            return Err(TranslateError::BadIsoLayout);
        }

        iso_packets.push(UsbIpIsoPacketDescriptor {
            offset,
            length: next_offset - offset,
            actual_length: 0,
            status: 0,
        });
    }

    let data = out_data(urb, direction)?;

    Ok(SubmitFrame {
        body: UsbIpCmdSubmit {
            transfer_flags: transfer_flags(direction, urb.short_not_ok) | URB_ISO_ASAP,
            transfer_buffer_length: buffer_len,
            start_frame,
            number_of_packets: offsets.len() as u32,
            interval: urb.pipe.interval,
            setup: [0u8; 8],
        },
        direction,
        ep: u32::from(urb.pipe.number()),
        data,
        iso_packets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urb::{Pipe, Urb};

    fn setup_of(frame: &SubmitFrame) -> SetupPacket {
        SetupPacket::from_bytes(&frame.body.setup)
    }

    #[test]
    fn test_select_configuration() {
        let urb = Urb::ep0(
            UrbFunction::SelectConfiguration {
                configuration: Some(1),
            },
            Direction::Out,
            TransferBuffer::None,
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x00);
        assert_eq!(setup.request, USB_REQUEST_SET_CONFIGURATION);
        assert_eq!(setup.value, 1);
        assert_eq!(frame.ep, 0);
        assert_eq!(frame.direction, Direction::Out);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_select_configuration_unconfigured() {
        let urb = Urb::ep0(
            UrbFunction::SelectConfiguration {
                configuration: None,
            },
            Direction::Out,
            TransferBuffer::None,
        );
        let frame = translate(&urb).unwrap();
        assert_eq!(setup_of(&frame).value, 0);
    }

    #[test]
    fn test_select_interface() {
        let urb = Urb::ep0(
            UrbFunction::SelectInterface {
                interface: 2,
                alternate: 1,
            },
            Direction::Out,
            TransferBuffer::None,
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x01);
        assert_eq!(setup.request, USB_REQUEST_SET_INTERFACE);
        assert_eq!(setup.value, 1);
        assert_eq!(setup.index, 2);
    }

    #[test]
    fn test_control_transfer_verbatim_setup() {
        let setup = SetupPacket {
            request_type: 0x80,
            request: 0x06,
            value: 0x0100,
            index: 0,
            length: 18,
        };
        let urb = Urb::control(setup, TransferBuffer::In(18));
        let frame = translate(&urb).unwrap();

        assert_eq!(frame.body.setup, setup.to_bytes());
        assert_eq!(frame.body.transfer_buffer_length, 18);
        assert_eq!(frame.direction, Direction::In);
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_control_transfer_direction_mismatch() {
        // IN setup packet with an OUT direction flag
        let setup = SetupPacket {
            request_type: 0x80,
            request: 0x06,
            value: 0x0100,
            index: 0,
            length: 18,
        };
        let mut urb = Urb::control(setup, TransferBuffer::In(18));
        urb.direction = Direction::Out;

        assert_eq!(translate(&urb), Err(TranslateError::DirectionMismatch));
    }

    #[test]
    fn test_control_transfer_out_payload() {
        let setup = SetupPacket {
            request_type: 0x21,
            request: 0x09,
            value: 0x0200,
            index: 0,
            length: 4,
        };
        let urb = Urb::control(setup, TransferBuffer::Out(vec![1, 2, 3, 4]));
        let frame = translate(&urb).unwrap();

        assert_eq!(frame.direction, Direction::Out);
        assert_eq!(frame.data, vec![1, 2, 3, 4]);
        assert_eq!(frame.payload_len(), 4);
    }

    #[test]
    fn test_bulk_out() {
        let urb = Urb::bulk_or_interrupt(Pipe::bulk_out(2), TransferBuffer::Out(vec![0xAB; 512]));
        let frame = translate(&urb).unwrap();

        assert_eq!(frame.ep, 2);
        assert_eq!(frame.direction, Direction::Out);
        assert_eq!(frame.body.transfer_buffer_length, 512);
        assert_eq!(frame.body.setup, [0u8; 8]);
        assert_eq!(frame.data.len(), 512);
    }

    #[test]
    fn test_bulk_pipe_is_authoritative_over_flag() {
        let mut urb = Urb::bulk_or_interrupt(Pipe::bulk_in(1), TransferBuffer::In(64));
        // contradictory host flag; the pipe wins
        urb.direction = Direction::Out;

        let frame = translate(&urb).unwrap();
        assert_eq!(frame.direction, Direction::In);
    }

    #[test]
    fn test_interrupt_carries_interval() {
        let urb = Urb::bulk_or_interrupt(Pipe::interrupt_in(3, 8), TransferBuffer::In(8));
        let frame = translate(&urb).unwrap();
        assert_eq!(frame.body.interval, 8);
    }

    #[test]
    fn test_bulk_rejects_control_pipe() {
        let urb = Urb {
            function: UrbFunction::BulkOrInterruptTransfer,
            pipe: Pipe::EP0,
            direction: Direction::In,
            short_not_ok: false,
            buffer: TransferBuffer::In(8),
        };
        assert_eq!(translate(&urb), Err(TranslateError::WrongPipeType));
    }

    #[test]
    fn test_iso_out_layout() {
        let urb = Urb::isochronous(
            Pipe::iso_out(4, 1),
            TransferBuffer::Out(vec![0; 45]),
            0,
            vec![0, 10, 30],
        );
        let frame = translate(&urb).unwrap();

        assert_eq!(frame.body.number_of_packets, 3);
        assert_eq!(frame.body.transfer_flags & URB_ISO_ASAP, URB_ISO_ASAP);
        assert_eq!(frame.data.len(), 45);
        assert_eq!(frame.iso_packets.len(), 3);

        // Lengths derive from consecutive offsets; last runs to the end
        assert_eq!(frame.iso_packets[0].length, 10);
        assert_eq!(frame.iso_packets[1].length, 20);
        assert_eq!(frame.iso_packets[2].length, 15);

        let total: u32 = frame.iso_packets.iter().map(|p| p.length).sum();
        assert_eq!(total, 45);
        assert_eq!(frame.payload_len(), 45 + 3 * 16);
    }

    #[test]
    fn test_iso_in_sends_descriptors_only() {
        let urb = Urb::isochronous(
            Pipe::iso_in(4, 1),
            TransferBuffer::In(45),
            0,
            vec![0, 10, 30],
        );
        let frame = translate(&urb).unwrap();

        assert!(frame.data.is_empty());
        assert_eq!(frame.iso_packets.len(), 3);
        assert_eq!(frame.payload_len(), 3 * 16);
    }

    #[test]
    fn test_iso_rejects_decreasing_offsets() {
        let urb = Urb::isochronous(
            Pipe::iso_out(4, 1),
            TransferBuffer::Out(vec![0; 30]),
            0,
            vec![0, 20, 10],
        );
        assert_eq!(translate(&urb), Err(TranslateError::BadIsoLayout));
    }

    #[test]
    fn test_iso_rejects_offset_past_buffer() {
        let urb = Urb::isochronous(
            Pipe::iso_out(4, 1),
            TransferBuffer::Out(vec![0; 30]),
            0,
            vec![0, 40],
        );
        assert_eq!(translate(&urb), Err(TranslateError::BadIsoLayout));
    }

    #[test]
    fn test_iso_rejects_empty_packet_table() {
        let urb = Urb::isochronous(
            Pipe::iso_out(4, 1),
            TransferBuffer::Out(vec![0; 30]),
            0,
            vec![],
        );
        assert_eq!(translate(&urb), Err(TranslateError::BadIsoLayout));
    }

    #[test]
    fn test_get_descriptor() {
        let urb = Urb::ep0(
            UrbFunction::GetDescriptor {
                recipient: Recipient::Device,
                descriptor_type: 0x03,
                index: 2,
                language_id: 0x0409,
            },
            Direction::In,
            TransferBuffer::In(255),
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x80);
        assert_eq!(setup.request, USB_REQUEST_GET_DESCRIPTOR);
        assert_eq!(setup.value, 0x0302);
        assert_eq!(setup.index, 0x0409);
        assert_eq!(setup.length, 255);
    }

    #[test]
    fn test_set_descriptor_out_payload() {
        let urb = Urb::ep0(
            UrbFunction::SetDescriptor {
                recipient: Recipient::Device,
                descriptor_type: 0x03,
                index: 0,
                language_id: 0,
            },
            Direction::Out,
            TransferBuffer::Out(vec![4, 3, 0x41, 0x00]),
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x00);
        assert_eq!(setup.request, USB_REQUEST_SET_DESCRIPTOR);
        assert_eq!(frame.data.len(), 4);
    }

    #[test]
    fn test_feature_requests() {
        let urb = Urb::ep0(
            UrbFunction::SetFeature {
                recipient: Recipient::Device,
                selector: 1, // DEVICE_REMOTE_WAKEUP
                index: 0,
            },
            Direction::Out,
            TransferBuffer::None,
        );
        let frame = translate(&urb).unwrap();
        let setup = setup_of(&frame);
        assert_eq!(setup.request, USB_REQUEST_SET_FEATURE);
        assert_eq!(setup.value, 1);

        let urb = Urb::ep0(
            UrbFunction::ClearFeature {
                recipient: Recipient::Other,
                selector: 0x10, // C_PORT_CONNECTION
                index: 2,
            },
            Direction::Out,
            TransferBuffer::None,
        );
        let frame = translate(&urb).unwrap();
        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x03);
        assert_eq!(setup.request, USB_REQUEST_CLEAR_FEATURE);
        assert_eq!(setup.index, 2);
    }

    #[test]
    fn test_get_status() {
        let urb = Urb::ep0(
            UrbFunction::GetStatus {
                recipient: Recipient::Endpoint,
                index: 0x81,
            },
            Direction::In,
            TransferBuffer::In(2),
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x82);
        assert_eq!(setup.request, USB_REQUEST_GET_STATUS);
        assert_eq!(setup.index, 0x81);
        assert_eq!(setup.length, 2);
    }

    #[test]
    fn test_get_status_rejects_wrong_length() {
        let urb = Urb::ep0(
            UrbFunction::GetStatus {
                recipient: Recipient::Device,
                index: 0,
            },
            Direction::In,
            TransferBuffer::In(4),
        );
        assert!(matches!(
            translate(&urb),
            Err(TranslateError::LengthOverflow { len: 4 })
        ));
    }

    #[test]
    fn test_get_configuration_and_interface() {
        let urb = Urb::ep0(
            UrbFunction::GetConfiguration,
            Direction::In,
            TransferBuffer::In(1),
        );
        let setup = setup_of(&translate(&urb).unwrap());
        assert_eq!(setup.request, USB_REQUEST_GET_CONFIGURATION);
        assert_eq!(setup.length, 1);

        let urb = Urb::ep0(
            UrbFunction::GetInterface { interface: 3 },
            Direction::In,
            TransferBuffer::In(1),
        );
        let setup = setup_of(&translate(&urb).unwrap());
        assert_eq!(setup.request, USB_REQUEST_GET_INTERFACE);
        assert_eq!(setup.request_type, 0x81);
        assert_eq!(setup.index, 3);
    }

    #[test]
    fn test_vendor_request_in() {
        let urb = Urb::ep0(
            UrbFunction::VendorRequest {
                recipient: Recipient::Device,
                request: 0x42,
                value: 7,
                index: 9,
            },
            Direction::In,
            TransferBuffer::In(64),
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0xC0); // IN | VENDOR | DEVICE
        assert_eq!(setup.request, 0x42);
        assert_eq!(setup.value, 7);
        assert_eq!(setup.index, 9);
        assert_eq!(setup.length, 64);
    }

    #[test]
    fn test_class_request_out_with_payload() {
        let urb = Urb::ep0(
            UrbFunction::ClassRequest {
                recipient: Recipient::Interface,
                request: 0x09, // HID SET_REPORT
                value: 0x0200,
                index: 0,
            },
            Direction::Out,
            TransferBuffer::Out(vec![0; 8]),
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x21); // OUT | CLASS | INTERFACE
        assert_eq!(frame.data.len(), 8);
    }

    #[test]
    fn test_reset_pipe_clear_stall() {
        let urb = Urb {
            function: UrbFunction::ResetPipeAndClearStall,
            pipe: Pipe::bulk_in(2),
            direction: Direction::Out,
            short_not_ok: false,
            buffer: TransferBuffer::None,
        };
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x02); // OUT | STANDARD | ENDPOINT
        assert_eq!(setup.request, USB_REQUEST_CLEAR_FEATURE);
        assert_eq!(setup.value, USB_FEATURE_ENDPOINT_HALT);
        assert_eq!(setup.index, 0x82); // full endpoint address
        assert_eq!(frame.ep, 0); // the request itself goes to EP0
    }

    #[test]
    fn test_reset_port() {
        let urb = Urb::ep0(UrbFunction::ResetPort, Direction::Out, TransferBuffer::None);
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, USB_RT_PORT);
        assert_eq!(setup.request, USB_REQUEST_SET_FEATURE);
        assert_eq!(setup.value, USB_PORT_FEAT_RESET);
    }

    #[test]
    fn test_descriptor_from_node_connection() {
        let urb = Urb::ep0(
            UrbFunction::GetDescriptorFromNodeConnection {
                value: 0x0100,
                index: 0,
                length: 18,
            },
            Direction::In,
            TransferBuffer::In(18),
        );
        let frame = translate(&urb).unwrap();

        let setup = setup_of(&frame);
        assert_eq!(setup.request_type, 0x80);
        assert_eq!(setup.request, USB_REQUEST_GET_DESCRIPTOR);
        assert_eq!(setup.value, 0x0100);
        assert_eq!(setup.length, 18);
    }

    #[test]
    fn test_unexpected_functions_fail_internal() {
        for function in [
            UrbFunction::AbortPipe,
            UrbFunction::GetCurrentFrameNumber,
            UrbFunction::SyncResetPipe,
            UrbFunction::SyncClearStall,
            UrbFunction::OpenStaticStreams,
        ] {
            let urb = Urb::ep0(function, Direction::Out, TransferBuffer::None);
            let err = translate(&urb).unwrap_err();
            assert_eq!(err, TranslateError::UnexpectedFunction);
            assert_eq!(err.status(), UrbStatus::InternalError);
        }
    }

    #[test]
    fn test_reserved_function_fails_invalid_parameter() {
        let urb = Urb::ep0(
            UrbFunction::Reserved { code: 0x0016 },
            Direction::Out,
            TransferBuffer::None,
        );
        let err = translate(&urb).unwrap_err();
        assert_eq!(err, TranslateError::ReservedFunction { code: 0x0016 });
        assert_eq!(err.status(), UrbStatus::InvalidParameter);
    }

    #[test]
    fn test_out_transfer_with_in_buffer_rejected() {
        let setup = SetupPacket {
            request_type: 0x00,
            request: 0x07,
            value: 0,
            index: 0,
            length: 8,
        };
        let urb = Urb {
            function: UrbFunction::ControlTransfer { setup },
            pipe: Pipe::EP0,
            direction: Direction::Out,
            short_not_ok: false,
            buffer: TransferBuffer::In(8),
        };
        assert_eq!(translate(&urb), Err(TranslateError::BufferMismatch));
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let urb = Urb::bulk_or_interrupt(
            Pipe::bulk_in(1),
            TransferBuffer::In(MAX_PAYLOAD_SIZE + 1),
        );
        let err = translate(&urb).unwrap_err();
        assert!(matches!(err, TranslateError::BufferTooLarge { .. }));
        assert_eq!(err.status(), UrbStatus::InsufficientResources);
    }

    #[test]
    fn test_short_not_ok_flag() {
        let mut urb = Urb::bulk_or_interrupt(Pipe::bulk_in(1), TransferBuffer::In(64));
        urb.short_not_ok = true;

        let frame = translate(&urb).unwrap();
        assert_eq!(frame.body.transfer_flags & URB_SHORT_NOT_OK, URB_SHORT_NOT_OK);
    }
}
