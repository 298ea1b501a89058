//! Per-device request registry
//!
//! Owns the three queues every virtual device carries: pending-submit
//! (translated, not yet on the wire), in-flight (transmitted, awaiting a
//! reply) and cancel-pending (an UNLINK is due). Sequence numbers are
//! drawn from the per-device counter at the moment a record leaves
//! pending-submit for the wire, so submits go out in assignment order.
//!
//! Completion is exactly-once by construction: the completion sender is
//! consumed the first time a path completes the record, and every path
//! removes the record from its queue before completing it.

use std::collections::VecDeque;

use protocol::{
    USBIP_CMD_SUBMIT, USBIP_CMD_UNLINK, UsbIpCmdUnlink, UsbIpCommand, UsbIpHeaderBasic,
};
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::translate::SubmitFrame;
use crate::urb::{Completion, UrbStatus};

pub(crate) type CompletionSender = oneshot::Sender<Completion>;

/// One URB still inside the broker
///
/// `seqnum` is zero until the record first goes on the wire. A non-zero
/// `unlink_seqnum` marks a record that has morphed into a cancellation:
/// its own seqnum then identifies the UNLINK command, while
/// `unlink_seqnum` names the submit being cancelled.
pub(crate) struct UrbRecord {
    /// Identity handle for cancel-by-record before a seqnum exists
    pub id: u64,
    pub seqnum: u32,
    pub unlink_seqnum: u32,
    pub frame: SubmitFrame,
    completion: Option<CompletionSender>,
}

impl UrbRecord {
    /// Deliver the completion to the host. A record completes at most
    /// once; later attempts find the sender gone and do nothing.
    pub fn complete(&mut self, completion: Completion) {
        if let Some(tx) = self.completion.take() {
            // The host may have dropped its handle; that is not an error.
            let _ = tx.send(completion);
        }
    }

    pub fn complete_with_status(&mut self, status: UrbStatus) {
        self.complete(Completion::from_status(status));
    }

    /// True while the host is still owed a completion
    pub fn awaits_completion(&self) -> bool {
        self.completion.is_some()
    }
}

/// Where a cancel found (or did not find) its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelOutcome {
    /// Record was still pending: completed as cancelled, nothing on the wire
    CompletedImmediately,
    /// Record was in flight: an UNLINK is now due
    UnlinkQueued,
    /// Record already completed, already cancelling, or never existed
    NotFound,
}

/// The queue state of one virtual device
///
/// Lives behind the device lock; none of these methods perform I/O.
pub(crate) struct DeviceQueues {
    devid: u32,
    pending: VecDeque<UrbRecord>,
    in_flight: VecDeque<UrbRecord>,
    cancel_pending: VecDeque<UrbRecord>,
    /// Seqnum whose reply payload the reader pump is currently consuming
    payload_seqnum: u32,
    next_seqnum: u32,
    next_id: u64,
}

impl DeviceQueues {
    pub fn new(devid: u32) -> Self {
        Self {
            devid,
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            cancel_pending: VecDeque::new(),
            payload_seqnum: 0,
            next_seqnum: 1,
            next_id: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty() && self.cancel_pending.is_empty()
    }

    fn next_seqnum(&mut self) -> u32 {
        let seqnum = self.next_seqnum;
        self.next_seqnum = self.next_seqnum.wrapping_add(1).max(1);
        seqnum
    }

    /// Append a translated submit to pending-submit.
    ///
    /// Returns the record id and the receiver the host awaits.
    pub fn enqueue_submit(&mut self, frame: SubmitFrame) -> (u64, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;

        self.pending.push_back(UrbRecord {
            id,
            seqnum: 0,
            unlink_seqnum: 0,
            frame,
            completion: Some(tx),
        });

        (id, rx)
    }

    /// Remove and return the next PDU due on the wire, fully encoded.
    ///
    /// Cancel-pending records go first: each is reclassified as an
    /// in-flight UNLINK under a fresh seqnum. Otherwise the oldest
    /// pending submit moves to in-flight. `None` when both are empty.
    pub fn take_next_outgoing(&mut self) -> Option<Vec<u8>> {
        loop {
            let (mut record, pdu) = if let Some(mut record) = self.cancel_pending.pop_front() {
                record.seqnum = self.next_seqnum();
                // UNLINK headers always carry OUT and endpoint zero
                let pdu = UsbIpCommand::Unlink {
                    header: UsbIpHeaderBasic {
                        command: USBIP_CMD_UNLINK,
                        seqnum: record.seqnum,
                        devid: self.devid,
                        direction: protocol::USBIP_DIR_OUT,
                        ep: 0,
                    },
                    body: UsbIpCmdUnlink {
                        unlink_seqnum: record.unlink_seqnum,
                    },
                };
                trace!(
                    seqnum = record.seqnum,
                    unlink_seqnum = record.unlink_seqnum,
                    "queueing UNLINK"
                );
                (record, pdu)
            } else if let Some(mut record) = self.pending.pop_front() {
                record.seqnum = self.next_seqnum();
                let pdu = UsbIpCommand::Submit {
                    header: UsbIpHeaderBasic {
                        command: USBIP_CMD_SUBMIT,
                        seqnum: record.seqnum,
                        devid: self.devid,
                        direction: record.frame.direction.to_wire(),
                        ep: record.frame.ep,
                    },
                    body: record.frame.body,
                };
                trace!(seqnum = record.seqnum, ep = record.frame.ep, "queueing submit");
                (record, pdu)
            } else {
                return None;
            };

            let is_submit = matches!(pdu, UsbIpCommand::Submit { .. });
            let encoded = pdu.encode().and_then(|mut bytes| {
                if is_submit {
                    bytes.extend_from_slice(&record.frame.data);
                    for descriptor in &record.frame.iso_packets {
                        descriptor.write_to(&mut bytes)?;
                    }
                }
                Ok(bytes)
            });

            match encoded {
                Ok(bytes) => {
                    self.in_flight.push_back(record);
                    return Some(bytes);
                }
                Err(e) => {
                    warn!("failed to encode outgoing PDU: {}", e);
                    record.complete_with_status(UrbStatus::InternalError);
                }
            }
        }
    }

    /// Remove the record a reply addresses, searching every queue.
    ///
    /// A RET_SUBMIT matches an in-flight submit by its own seqnum, a
    /// record waiting in cancel-pending, or a record that already morphed
    /// into an UNLINK but whose host is still owed a completion (the
    /// reply beat the unlink reply). A RET_UNLINK matches the UNLINK
    /// record by the seqnum the UNLINK was sent under.
    ///
    /// Removing a record from cancel-pending leaves a host-less UNLINK
    /// obligation behind so the UNLINK is still emitted afterwards.
    pub fn match_reply(&mut self, seqnum: u32) -> Option<UrbRecord> {
        if let Some(pos) = self.in_flight.iter().position(|r| {
            r.seqnum == seqnum
                || (r.unlink_seqnum != 0 && r.unlink_seqnum == seqnum && r.awaits_completion())
        }) {
            return self.in_flight.remove(pos);
        }

        if let Some(pos) = self
            .cancel_pending
            .iter()
            .position(|r| r.unlink_seqnum == seqnum && r.awaits_completion())
        {
            let record = self.cancel_pending.remove(pos)?;
            // The server answered the submit before the UNLINK went out.
            // The UNLINK is still owed; keep a host-less record for it.
            self.cancel_pending.insert(
                pos,
                UrbRecord {
                    id: record.id,
                    seqnum: 0,
                    unlink_seqnum: record.unlink_seqnum,
                    frame: SubmitFrame {
                        body: record.frame.body,
                        direction: record.frame.direction,
                        ep: record.frame.ep,
                        data: Vec::new(),
                        iso_packets: Vec::new(),
                    },
                    completion: None,
                },
            );
            return Some(record);
        }

        None
    }

    /// Arbitrate a host-side cancel against the record's position.
    pub fn cancel(&mut self, id: u64) -> CancelOutcome {
        if let Some(pos) = self.pending.iter().position(|r| r.id == id) {
            if let Some(mut record) = self.pending.remove(pos) {
                record.complete_with_status(UrbStatus::Cancelled);
            }
            return CancelOutcome::CompletedImmediately;
        }

        if let Some(pos) = self
            .in_flight
            .iter()
            .position(|r| r.id == id && r.unlink_seqnum == 0)
        {
            if let Some(mut record) = self.in_flight.remove(pos) {
                record.unlink_seqnum = record.seqnum;
                record.seqnum = 0;
                self.cancel_pending.push_back(record);
            }
            return CancelOutcome::UnlinkQueued;
        }

        CancelOutcome::NotFound
    }

    /// Complete every queued record with `status` and empty all queues.
    pub fn drain(&mut self, status: UrbStatus) {
        for mut record in self
            .pending
            .drain(..)
            .chain(self.in_flight.drain(..))
            .chain(self.cancel_pending.drain(..))
        {
            record.complete_with_status(status);
        }
        self.payload_seqnum = 0;
    }

    /// Mark the seqnum whose reply payload is being consumed (0 = none)
    pub fn set_payload_seqnum(&mut self, seqnum: u32) {
        self.payload_seqnum = seqnum;
    }

    pub fn payload_seqnum(&self) -> u32 {
        self.payload_seqnum
    }
}
