//! Client session table and outbound send primitives
//!
//! This module owns every live transport-level client session:
//! - ID allocation, monotonically increasing from 1
//! - The write end of each session's byte pipe, fed by the transport
//! - The outbound queue drained into each session's socket
//! - Teardown, which closes the pipe, the socket and the pending read
//!
//! Every send is best-effort. A failed write is logged and never reported
//! back to the caller as an error. A client whose outbound queue is full has
//! stopped reading its socket and is torn down.

use crate::decoder;
use crate::pipe::{pipe, PipeWriter};
use bytes::Bytes;
use log::{info, warn};
use shared::{ClientId, Message};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Events delivered to the session manager's dispatch loop
#[derive(Debug)]
pub enum Inbound {
    /// A decoded frame, `source` already stamped
    Message(Message),
    /// The client session was torn down
    ClientClosed(ClientId),
}

/// One accepted connection
///
/// Dropping the session closes its pipe, its outbound queue and cancels the
/// transport's pending read, which together close the socket.
#[derive(Debug)]
pub struct ClientSession {
    pub id: ClientId,
    pub addr: SocketAddr,
    /// Last time the client proved it is alive
    pub last_communication: Instant,
    pipe: PipeWriter,
    outbound: mpsc::Sender<Bytes>,
    _read_guard: DropGuard,
}

/// Outcome of queueing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    Closed,
    /// The queue is full because the peer stopped reading
    Stalled,
}

impl ClientSession {
    fn send(&self, frame: Bytes) -> Delivery {
        match self.outbound.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue of client #{} is full, peer {} stopped reading",
                    self.id, self.addr
                );
                Delivery::Stalled
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Failed to queue data for client #{}: socket closed", self.id);
                Delivery::Closed
            }
        }
    }
}

pub struct ClientManager {
    /// Live sessions indexed by client ID
    clients: RwLock<HashMap<ClientId, ClientSession>>,
    next_client_id: AtomicU32,
    inbound: mpsc::UnboundedSender<Inbound>,
    pipe_capacity: usize,
}

impl ClientManager {
    pub fn new(inbound: mpsc::UnboundedSender<Inbound>, pipe_capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_client_id: AtomicU32::new(1),
            inbound,
            pipe_capacity,
        }
    }

    /// Registers a freshly accepted connection and starts its decode task
    ///
    /// `outbound` is the queue the transport drains into the socket. The
    /// returned token is cancelled when the session is removed; the
    /// transport stops reading the socket at that point.
    pub async fn add_client(
        self: &Arc<Self>,
        addr: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
    ) -> (ClientId, CancellationToken) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (writer, reader) = pipe(self.pipe_capacity);
        let token = CancellationToken::new();

        let session = ClientSession {
            id: client_id,
            addr,
            last_communication: Instant::now(),
            pipe: writer,
            outbound,
            _read_guard: token.clone().drop_guard(),
        };
        self.clients.write().await.insert(client_id, session);

        tokio::spawn(decoder::run(
            client_id,
            reader,
            self.inbound.clone(),
            Arc::downgrade(self),
        ));

        (client_id, token)
    }

    /// Tears down a client session
    ///
    /// Returns false if the session was already gone, so concurrent removals
    /// from the transport and the decode task are harmless.
    pub async fn remove_client(&self, client_id: ClientId) -> bool {
        let Some(session) = self.clients.write().await.remove(&client_id) else {
            return false;
        };

        info!(
            "Client #{} from {} disconnected",
            session.id, session.addr
        );
        drop(session);

        if self.inbound.send(Inbound::ClientClosed(client_id)).is_err() {
            warn!("Session manager is gone, close of client #{} not reported", client_id);
        }
        true
    }

    /// Pushes bytes read from the socket into the session's pipe
    pub async fn feed(&self, client_id: ClientId, data: Bytes) {
        let clients = self.clients.read().await;
        if let Some(session) = clients.get(&client_id) {
            if let Err(e) = session.pipe.write(data) {
                warn!("Client #{}: {}", client_id, e);
            }
        }
    }

    pub async fn touch(&self, client_id: ClientId) {
        if let Some(session) = self.clients.write().await.get_mut(&client_id) {
            session.last_communication = Instant::now();
        }
    }

    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.clients.read().await.contains_key(&client_id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Removes sessions that stopped draining their outbound queue
    async fn drop_stalled(&self, stalled: Vec<ClientId>) {
        for client_id in stalled {
            self.remove_client(client_id).await;
        }
    }

    /// Sends an already encoded frame to one client
    pub async fn send_frame(&self, client_id: ClientId, frame: Bytes) -> bool {
        let delivery = match self.clients.read().await.get(&client_id) {
            Some(session) => session.send(frame),
            None => {
                warn!("Dropping frame for unknown client #{}", client_id);
                return false;
            }
        };

        if delivery == Delivery::Stalled {
            self.drop_stalled(vec![client_id]).await;
        }
        delivery == Delivery::Queued
    }

    pub async fn send_id(&self, client_id: ClientId, message: &Message) -> bool {
        self.send_frame(client_id, message.to_bytes()).await
    }

    /// Sends to the session connected from `addr`
    pub async fn send_addr(&self, addr: SocketAddr, message: &Message) -> bool {
        let client_id = self
            .clients
            .read()
            .await
            .values()
            .find(|session| session.addr == addr)
            .map(|session| session.id);

        match client_id {
            Some(client_id) => self.send_id(client_id, message).await,
            None => {
                warn!("Dropping frame for unknown peer {}", addr);
                false
            }
        }
    }

    pub async fn broadcast(&self, message: &Message) {
        self.broadcast_filtered(message, |_| true).await;
    }

    /// Sends to every client except the one that caused the message
    pub async fn broadcast_except(&self, except: ClientId, message: &Message) {
        self.broadcast_filtered(message, |client_id| client_id != except)
            .await;
    }

    async fn broadcast_filtered<F>(&self, message: &Message, include: F)
    where
        F: Fn(ClientId) -> bool,
    {
        let frame = message.to_bytes();
        let stalled: Vec<ClientId> = self
            .clients
            .read()
            .await
            .values()
            .filter(|session| include(session.id))
            .filter(|session| session.send(frame.clone()) == Delivery::Stalled)
            .map(|session| session.id)
            .collect();

        self.drop_stalled(stalled).await;
    }
}
