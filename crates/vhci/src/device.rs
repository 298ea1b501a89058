//! Virtual device state management
//!
//! A [`VirtualDevice`] is the local representation of one imported remote
//! USB device: the hub port it occupies, the server-side device id, the
//! cached descriptors, and the request queues the broker multiplexes over
//! the device's transport.
//!
//! One mutex guards the queue state and the lifecycle flags; it is never
//! held across a transport call. Descriptors are read-only after plug and
//! need no lock.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use common::usb::{ConfigurationView, DeviceDescriptor, DeviceSpeed};
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info};

use crate::registry::{CancelOutcome, DeviceQueues, UrbRecord};
use crate::translate::translate;
use crate::urb::{Completion, Urb, UrbError, UrbFunction, UrbStatus};

/// Queue state plus the lifecycle flags it must change atomically with
struct DeviceState {
    queues: DeviceQueues,
    /// One-way flag: set by unplug or transport loss, never cleared
    unplugged: bool,
    /// Interface number and alternate setting last selected
    current_interface: (u8, u8),
    /// bConfigurationValue last selected, if any
    active_configuration: Option<u8>,
}

/// One imported remote USB device
pub struct VirtualDevice {
    port: u8,
    devid: u32,
    speed: DeviceSpeed,
    descriptor: DeviceDescriptor,
    configuration: ConfigurationView,
    serial: String,
    /// Effective class triple; copied from the first interface when the
    /// device descriptor leaves all three zero
    class: u8,
    subclass: u8,
    protocol: u8,
    state: Mutex<DeviceState>,
    /// Wakes the writer when outgoing work appears or the device dies
    writer_wakeup: Notify,
}

impl VirtualDevice {
    pub(crate) fn new(
        port: u8,
        devid: u32,
        descriptor: DeviceDescriptor,
        configuration: ConfigurationView,
        serial: String,
    ) -> Arc<Self> {
        let (mut class, mut subclass, mut protocol) =
            (descriptor.class, descriptor.subclass, descriptor.protocol);

        // Many devices defer their class triple to the interface level.
        // The bus builds a compatible id from these, so resolve them here.
        if class == 0 && subclass == 0 && protocol == 0 {
            if let Some(intf) = configuration.first_interface() {
                class = intf.class;
                subclass = intf.subclass;
                protocol = intf.protocol;
            }
        }

        Arc::new(Self {
            port,
            devid,
            speed: descriptor.speed(),
            descriptor,
            configuration,
            serial,
            class,
            subclass,
            protocol,
            state: Mutex::new(DeviceState {
                queues: DeviceQueues::new(devid),
                unplugged: false,
                current_interface: (0, 0),
                active_configuration: None,
            }),
            writer_wakeup: Notify::new(),
        })
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn devid(&self) -> u32 {
        self.devid
    }

    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn configuration(&self) -> &ConfigurationView {
        &self.configuration
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Effective class/subclass/protocol triple for compatible-id
    /// construction
    pub fn class_triple(&self) -> (u8, u8, u8) {
        (self.class, self.subclass, self.protocol)
    }

    /// Interface number and alternate setting last selected
    pub fn current_interface(&self) -> (u8, u8) {
        self.lock_state().current_interface
    }

    /// bConfigurationValue last selected
    pub fn active_configuration(&self) -> Option<u8> {
        self.lock_state().active_configuration
    }

    pub fn is_unplugged(&self) -> bool {
        self.lock_state().unplugged
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        // A poisoned lock means a panicked broker task; queue state is
        // plain data and remains structurally sound.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Submit one URB.
    ///
    /// Translation happens before anything is queued, so a rejected URB
    /// fails here without generating wire traffic. The returned handle
    /// resolves to exactly one completion.
    pub fn submit(self: &Arc<Self>, urb: Urb) -> Result<SubmittedUrb, UrbError> {
        let frame = translate(&urb)?;

        let mut state = self.lock_state();
        if state.unplugged {
            return Err(UrbError::Disconnected);
        }

        // Selection requests update the cached device state the moment
        // they are accepted for transmission.
        match &urb.function {
            UrbFunction::SelectConfiguration { configuration } => {
                state.active_configuration = *configuration;
            }
            UrbFunction::SelectInterface {
                interface,
                alternate,
            } => {
                state.current_interface = (*interface, *alternate);
            }
            _ => {}
        }

        let (id, receiver) = state.queues.enqueue_submit(frame);
        drop(state);

        self.writer_wakeup.notify_one();

        Ok(SubmittedUrb {
            id,
            device: Arc::downgrade(self),
            receiver,
        })
    }

    /// Cancel a previously submitted URB. Non-blocking: either the record
    /// completes as cancelled right away, or an UNLINK is posted and the
    /// race is resolved by the reader pump.
    pub(crate) fn cancel_urb(&self, id: u64) {
        let outcome = self.lock_state().queues.cancel(id);
        debug!(port = self.port, id, ?outcome, "cancel URB");

        if outcome == CancelOutcome::UnlinkQueued {
            self.writer_wakeup.notify_one();
        }
    }

    /// Writer side: remove the next encoded PDU due on the wire.
    pub(crate) fn take_next_outgoing(&self) -> Option<Vec<u8>> {
        self.lock_state().queues.take_next_outgoing()
    }

    /// Writer side: park until new outgoing work may exist.
    pub(crate) async fn outgoing_ready(&self) {
        self.writer_wakeup.notified().await;
    }

    /// Reader side: claim the record a reply addresses.
    pub(crate) fn match_reply(&self, seqnum: u32) -> Option<UrbRecord> {
        let record = self.lock_state().queues.match_reply(seqnum);

        // A reply that claims a cancel-pending record leaves an UNLINK
        // obligation behind; make sure the writer picks it up.
        if record.as_ref().is_some_and(|r| r.unlink_seqnum != 0) {
            self.writer_wakeup.notify_one();
        }

        record
    }

    /// Reader side: publish the seqnum whose payload is streaming in
    /// (0 = expecting a header next).
    pub(crate) fn set_payload_seqnum(&self, seqnum: u32) {
        self.lock_state().queues.set_payload_seqnum(seqnum);
    }

    /// Seqnum whose reply payload is currently streaming in, 0 when the
    /// reader expects a header next
    pub fn pending_payload_seqnum(&self) -> u32 {
        self.lock_state().queues.payload_seqnum()
    }

    /// Refuse new submits and complete everything queued with `status`.
    pub(crate) fn shut_down(&self, status: UrbStatus) {
        let mut state = self.lock_state();
        let already = state.unplugged;
        state.unplugged = true;
        state.queues.drain(status);
        drop(state);

        if !already {
            info!(port = self.port, "virtual device detached ({})", status);
        }
        self.writer_wakeup.notify_one();
    }

    /// Unplug path: one-way transition, drains with device-not-connected.
    pub(crate) fn mark_unplugged(&self) {
        self.shut_down(UrbStatus::Disconnected);
    }

    /// True once the device is unplugged and no requests remain queued;
    /// only then may the bus release it.
    pub fn is_drained(&self) -> bool {
        let state = self.lock_state();
        state.unplugged && state.queues.is_empty()
    }
}

/// Handle the host holds while an URB is inside the broker
///
/// Dropping the handle abandons the completion but does not cancel the
/// transfer; call [`SubmittedUrb::cancel`] for that.
pub struct SubmittedUrb {
    id: u64,
    device: Weak<VirtualDevice>,
    receiver: oneshot::Receiver<Completion>,
}

impl SubmittedUrb {
    /// Request cancellation. Returns immediately; the completion reports
    /// the outcome of the race against the server's reply.
    pub fn cancel(&self) {
        if let Some(device) = self.device.upgrade() {
            device.cancel_urb(self.id);
        }
    }

    /// Wait for the URB's single completion.
    pub async fn completion(self) -> Completion {
        match self.receiver.await {
            Ok(completion) => completion,
            // The device vanished without draining; treat as unplug.
            Err(_) => Completion::from_status(UrbStatus::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urb::{Pipe, TransferBuffer};
    use common::test_utils::{
        create_mock_config_descriptor, create_mock_device_descriptor,
        create_mock_device_descriptor_with_class, create_mock_storage_config_descriptor,
    };

    fn device() -> Arc<VirtualDevice> {
        VirtualDevice::new(
            1,
            0x0001_0002,
            DeviceDescriptor::parse(&create_mock_device_descriptor()).unwrap(),
            ConfigurationView::new(create_mock_config_descriptor()).unwrap(),
            "SN000001".to_string(),
        )
    }

    #[test]
    fn test_class_triple_from_interface_when_device_is_zero() {
        let dev = VirtualDevice::new(
            1,
            1,
            DeviceDescriptor::parse(&create_mock_device_descriptor()).unwrap(),
            ConfigurationView::new(create_mock_storage_config_descriptor()).unwrap(),
            String::new(),
        );
        assert_eq!(dev.class_triple(), (0x08, 0x06, 0x50));
    }

    #[test]
    fn test_class_triple_from_device_descriptor_when_set() {
        let dev = VirtualDevice::new(
            1,
            1,
            DeviceDescriptor::parse(&create_mock_device_descriptor_with_class(0x09, 0, 1))
                .unwrap(),
            ConfigurationView::new(create_mock_storage_config_descriptor()).unwrap(),
            String::new(),
        );
        assert_eq!(dev.class_triple(), (0x09, 0x00, 0x01));
    }

    #[tokio::test]
    async fn test_submit_after_unplug_fails() {
        let dev = device();
        dev.mark_unplugged();

        let result = dev.submit(Urb::bulk_or_interrupt(
            Pipe::bulk_in(1),
            TransferBuffer::In(8),
        ));
        assert!(matches!(result, Err(UrbError::Disconnected)));
    }

    #[tokio::test]
    async fn test_translator_rejection_before_queueing() {
        let dev = device();
        let result = dev.submit(Urb::ep0(
            UrbFunction::AbortPipe,
            crate::urb::Direction::Out,
            TransferBuffer::None,
        ));

        let Err(err) = result else {
            panic!("expected rejection");
        };
        assert_eq!(err.status(), UrbStatus::InternalError);
        assert!(dev.take_next_outgoing().is_none());
    }

    #[tokio::test]
    async fn test_unplug_drains_submitted_urb() {
        let dev = device();
        let submitted = dev
            .submit(Urb::bulk_or_interrupt(
                Pipe::bulk_in(1),
                TransferBuffer::In(8),
            ))
            .unwrap();

        dev.mark_unplugged();
        let completion = submitted.completion().await;
        assert_eq!(completion.status, UrbStatus::Disconnected);
        assert!(dev.is_drained());
    }

    #[tokio::test]
    async fn test_cancel_pending_submit() {
        let dev = device();
        let submitted = dev
            .submit(Urb::bulk_or_interrupt(
                Pipe::bulk_in(1),
                TransferBuffer::In(8),
            ))
            .unwrap();

        submitted.cancel();
        let completion = submitted.completion().await;
        assert_eq!(completion.status, UrbStatus::Cancelled);
        // Nothing went on the wire
        assert!(dev.take_next_outgoing().is_none());
    }

    #[tokio::test]
    async fn test_selection_updates_cached_state() {
        let dev = device();

        let _ = dev
            .submit(Urb::ep0(
                UrbFunction::SelectConfiguration {
                    configuration: Some(1),
                },
                crate::urb::Direction::Out,
                TransferBuffer::None,
            ))
            .unwrap();
        assert_eq!(dev.active_configuration(), Some(1));

        let _ = dev
            .submit(Urb::ep0(
                UrbFunction::SelectInterface {
                    interface: 0,
                    alternate: 1,
                },
                crate::urb::Direction::Out,
                TransferBuffer::None,
            ))
            .unwrap();
        assert_eq!(dev.current_interface(), (0, 1));
    }
}
