//! Transport writer task
//!
//! One writer per virtual device. Blocks on the registry for the next
//! outgoing PDU and transmits it; submit PDUs leave in sequence-number
//! order because assignment happens as each record is taken. The device
//! lock is released before any socket call.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace};

use crate::device::VirtualDevice;
use crate::urb::UrbStatus;

pub(crate) async fn run_writer<W>(device: Arc<VirtualDevice>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    loop {
        match device.take_next_outgoing() {
            Some(bytes) => {
                trace!(port = device.port(), len = bytes.len(), "writing PDU");

                let result = async {
                    writer.write_all(&bytes).await?;
                    writer.flush().await
                }
                .await;

                if let Err(e) = result {
                    error!(port = device.port(), "transport write failed: {}", e);
                    device.shut_down(UrbStatus::Disconnected);
                    break;
                }
            }
            None => {
                if device.is_unplugged() {
                    break;
                }
                device.outgoing_ready().await;
            }
        }
    }

    debug!(port = device.port(), "writer task stopped");
}
