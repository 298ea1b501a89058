//! Virtual host controller core: the URB to USB/IP request broker
//!
//! Exposes remotely attached USB devices to a local host by translating
//! host-submitted URBs into USB/IP submit PDUs, multiplexing submit and
//! unlink commands over one transport per device, matching replies back
//! to their pending requests, and arbitrating the cancel-vs-complete
//! race so every URB completes exactly once.
//!
//! # Architecture
//!
//! - [`hub::VirtualHub`] is the bus surface: plug and unplug of
//!   [`device::VirtualDevice`]s, each bound to a transport (any
//!   `AsyncRead + AsyncWrite`, typically the TCP stream a connection
//!   layer established).
//! - [`urb`] is the host vocabulary: [`urb::Urb`] in,
//!   [`urb::Completion`] out.
//! - [`translate`] maps each URB function onto the wire transaction it
//!   stands for; rejections fail the submit locally.
//! - Per device, a writer task drains pending submits and due UNLINKs in
//!   sequence-number order while the reader pump matches replies and
//!   delivers completions. Transport loss drains every queue with
//!   device-not-connected.
//!
//! # Example
//!
//! ```no_run
//! use vhci::{Pipe, TransferBuffer, Urb, VirtualHub};
//!
//! # async fn demo(plug_request: &[u8], tcp: tokio::net::TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let hub = VirtualHub::default();
//! let device = hub.plug(plug_request, tcp)?;
//!
//! let submitted = device.submit(Urb::bulk_or_interrupt(
//!     Pipe::bulk_in(1),
//!     TransferBuffer::In(512),
//! ))?;
//! let completion = submitted.completion().await;
//! println!("{}: {} bytes", completion.status, completion.actual_length);
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod hub;
pub mod translate;
pub mod urb;

mod reader;
mod registry;
mod writer;

pub use device::{SubmittedUrb, VirtualDevice};
pub use hub::{DEFAULT_PORT_COUNT, PlugError, PlugRequest, UnplugError, VirtualHub};
pub use translate::TranslateError;
pub use urb::{
    Completion, Direction, IsoPacketResult, Pipe, PipeKind, Recipient, TransferBuffer, Urb,
    UrbError, UrbFunction, UrbStatus,
};
