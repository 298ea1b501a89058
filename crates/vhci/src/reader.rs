//! Transport reader pump
//!
//! One reader per virtual device, consuming the incoming byte stream in a
//! two-phase per-PDU loop: first the fixed 48-byte header, then — for a
//! RET_SUBMIT announcing data — exactly the payload the reply itself
//! sizes. Replies for records the host already cancelled are consumed
//! and discarded; the payload size always comes from the reply header,
//! never from host state.
//!
//! Any framing error, impossible length or mid-PDU loss of the socket is
//! terminal: every queued record of the device completes with
//! device-not-connected and no further traffic is accepted.

use std::sync::Arc;

use protocol::{
    MAX_PAYLOAD_SIZE, ProtocolError, USBIP_DIR_IN, UsbIpHeaderBasic, UsbIpIsoPacketDescriptor,
    UsbIpReply, UsbIpRetSubmit,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

use crate::device::VirtualDevice;
use crate::registry::UrbRecord;
use crate::urb::{Completion, Direction, IsoPacketResult, UrbStatus};

#[derive(Debug, Error)]
enum PumpError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Violation(&'static str),
}

pub(crate) async fn run_reader<R>(device: Arc<VirtualDevice>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    if let Err(e) = pump(&device, &mut reader).await {
        warn!(port = device.port(), "reader pump terminated: {}", e);
    }
    device.shut_down(UrbStatus::Disconnected);
    debug!(port = device.port(), "reader task stopped");
}

/// Per-PDU loop; returns only on a terminal transport condition.
async fn pump<R>(device: &Arc<VirtualDevice>, reader: &mut R) -> Result<(), PumpError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; UsbIpReply::SIZE];

    loop {
        reader.read_exact(&mut header_buf).await?;
        let reply = UsbIpReply::decode(&header_buf)?;

        match reply {
            UsbIpReply::Submit { header, body } => {
                handle_ret_submit(device, reader, header, body).await?;
            }
            UsbIpReply::Unlink { header, .. } => {
                // Completes the cancelled record if the unlink reply won
                // the race; a reply that lost is dropped on the floor.
                match device.match_reply(header.seqnum) {
                    Some(mut record) if record.awaits_completion() => {
                        trace!(seqnum = header.seqnum, "URB unlinked by server");
                        record.complete_with_status(UrbStatus::Cancelled);
                    }
                    _ => {
                        trace!(seqnum = header.seqnum, "RET_UNLINK discarded");
                    }
                }
            }
        }
    }
}

async fn handle_ret_submit<R>(
    device: &Arc<VirtualDevice>,
    reader: &mut R,
    header: UsbIpHeaderBasic,
    body: UsbIpRetSubmit,
) -> Result<(), PumpError>
where
    R: AsyncRead + Unpin,
{
    let payload_size = body.payload_size(header.direction);
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_size,
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }

    let Some(mut record) = device.match_reply(header.seqnum) else {
        // The host cancelled and the UNLINK already claimed the record;
        // the payload still occupies the stream and must be consumed.
        debug!(
            seqnum = header.seqnum,
            payload_size, "discarding reply for unknown seqnum"
        );
        discard(reader, payload_size).await?;
        return Ok(());
    };

    if payload_size > 0 {
        device.set_payload_seqnum(header.seqnum);
    }

    let result = read_completion(reader, &record, &header, &body).await;
    device.set_payload_seqnum(0);

    match result {
        Ok(completion) => {
            trace!(
                seqnum = header.seqnum,
                status = body.status,
                actual_length = body.actual_length,
                "completing URB"
            );
            record.complete(completion);
            Ok(())
        }
        Err(e) => {
            // The stream is no longer aligned on a PDU boundary; the
            // record in hand drains like the rest of the device.
            record.complete_with_status(UrbStatus::Disconnected);
            Err(e)
        }
    }
}

/// Phase 2: consume the reply payload and build the host completion.
async fn read_completion<R>(
    reader: &mut R,
    record: &UrbRecord,
    header: &UsbIpHeaderBasic,
    body: &UsbIpRetSubmit,
) -> Result<Completion, PumpError>
where
    R: AsyncRead + Unpin,
{
    let status = UrbStatus::from_errno(body.status);
    let submitted_packets = &record.frame.iso_packets;

    if body.number_of_packets as usize != submitted_packets.len() {
        return Err(PumpError::Violation("isochronous packet count mismatch"));
    }

    let is_in = header.direction == USBIP_DIR_IN;
    let data_len = if is_in { body.actual_length as usize } else { 0 };

    if submitted_packets.is_empty() {
        // Plain transfer: an IN reply carries the data verbatim.
        if data_len > record.frame.in_capacity() {
            return Err(PumpError::Violation("reply longer than the URB buffer"));
        }

        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data).await?;

        return Ok(Completion {
            status,
            actual_length: body.actual_length as usize,
            data,
            iso_packets: Vec::new(),
            start_frame: body.start_frame,
            error_count: body.error_count,
        });
    }

    // Isochronous: packed data (IN only), then one descriptor per packet.
    let mut packed = vec![0u8; data_len];
    reader.read_exact(&mut packed).await?;

    let mut descriptor_buf = vec![0u8; body.number_of_packets as usize * UsbIpIsoPacketDescriptor::SIZE];
    reader.read_exact(&mut descriptor_buf).await?;

    let mut cursor = std::io::Cursor::new(&descriptor_buf[..]);
    let mut iso_packets = Vec::with_capacity(submitted_packets.len());
    let capacity = record.frame.in_capacity();
    let mut data = vec![0u8; capacity];
    let mut consumed = 0usize;

    for submitted in submitted_packets {
        let reply = UsbIpIsoPacketDescriptor::read_from(&mut cursor)
            .map_err(|_| PumpError::Violation("truncated isochronous descriptor"))?;

        let actual = reply.actual_length as usize;
        if record.frame.direction == Direction::In && actual > 0 {
            // The server packs IN data back to back; scatter it out to
            // the offsets the URB asked for.
            let offset = submitted.offset as usize;
            if actual > submitted.length as usize
                || consumed + actual > packed.len()
                || offset + actual > capacity
            {
                return Err(PumpError::Violation("isochronous packet out of bounds"));
            }
            data[offset..offset + actual].copy_from_slice(&packed[consumed..consumed + actual]);
            consumed += actual;
        }

        iso_packets.push(IsoPacketResult {
            offset: submitted.offset,
            length: submitted.length,
            actual_length: reply.actual_length,
            status: reply.status as i32,
        });
    }

    Ok(Completion {
        status,
        actual_length: body.actual_length as usize,
        data,
        iso_packets,
        start_frame: body.start_frame,
        error_count: body.error_count,
    })
}

/// Consume and drop `len` payload bytes from the stream.
async fn discard<R>(reader: &mut R, len: usize) -> Result<(), PumpError>
where
    R: AsyncRead + Unpin,
{
    let mut remaining = len;
    let mut scratch = [0u8; 4096];

    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        reader.read_exact(&mut scratch[..chunk]).await?;
        remaining -= chunk;
    }

    Ok(())
}
