//! Per-session decode task
//!
//! Turns the raw bytes of one client session into messages for the session
//! manager. Framing resynchronizes on the next frame start after an error, so
//! a bad frame only costs that frame. A client that keeps sending garbage
//! exhausts its decode budget and is disconnected.

use crate::client_manager::{ClientManager, Inbound};
use log::{debug, error, warn};
use shared::{decode, ClientId};
use std::sync::Weak;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;

/// Attempts made before the success ratio is enforced
pub const MIN_ATTEMPTS: u32 = 16;

/// Lowest tolerated share of successful decodes
pub const MIN_SUCCESS_RATIO: f64 = 2.0 / 3.0;

/// Success/failure bookkeeping of one session's decode attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeBudget {
    successes: u32,
    failures: u32,
}

impl DecodeBudget {
    pub fn record_success(&mut self) {
        self.successes = self.successes.saturating_add(1);
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn total(&self) -> u32 {
        self.successes.saturating_add(self.failures)
    }

    pub fn success_ratio(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.successes as f64 / total as f64,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.total() >= MIN_ATTEMPTS && self.success_ratio() < MIN_SUCCESS_RATIO
    }
}

/// Decodes frames from `reader` until the pipe closes or the budget runs out.
///
/// Decoded messages are stamped with `client_id` and forwarded to `inbound`.
/// `clients` is only used to tear the session down; it does not keep the
/// session table alive.
pub async fn run<R>(
    client_id: ClientId,
    mut reader: R,
    inbound: mpsc::UnboundedSender<Inbound>,
    clients: Weak<ClientManager>,
) -> DecodeBudget
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = DecodeBudget::default();

    loop {
        match decode(&mut reader).await {
            Ok(mut message) => {
                message.source = client_id;
                budget.record_success();
                if inbound.send(Inbound::Message(message)).is_err() {
                    error!("Session manager is gone, stopping decoder of client #{}", client_id);
                    break;
                }
            }
            Err(e) if e.is_closed() => break,
            Err(e) => {
                budget.record_failure();
                debug!("Client #{}: bad frame: {}", client_id, e);
            }
        }

        if budget.is_exhausted() {
            warn!(
                "Client #{} exceeded the decode error budget ({} of {} frames valid), disconnecting",
                client_id,
                budget.successes,
                budget.total()
            );
            if let Some(clients) = clients.upgrade() {
                clients.remove_client(client_id).await;
            }
            break;
        }
    }

    debug!("Decoder of client #{} finished", client_id);
    budget
}
