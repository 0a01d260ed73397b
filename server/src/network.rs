//! Server network layer handling TCP connections and task coordination

use crate::client_manager::{ClientManager, Inbound};
use crate::config::ServerConfig;
use crate::manager::Manager;
use bytes::Bytes;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use log::{debug, error, info, warn};
use shared::ClientId;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

/// Outcome of one socket read
#[derive(Debug)]
enum ReadEvent {
    Data(Bytes),
    Failed(io::Error),
    /// Peer closed the connection or the session was torn down
    Closed,
}

type ClientReads = BoxStream<'static, (ClientId, ReadEvent)>;

/// Accepts connections and moves bytes between sockets and client sessions
///
/// A single task waits on the listener and on every client socket at once,
/// so an idle connection never holds up the others.
pub struct Transport {
    listener: TcpListener,
    clients: Arc<ClientManager>,
    read_buffer_size: usize,
    outbound_capacity: usize,
    welcome_banner: Bytes,
}

impl Transport {
    pub async fn bind(config: &ServerConfig, clients: Arc<ClientManager>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            clients,
            read_buffer_size: config.read_buffer_size,
            outbound_capacity: config.outbound_capacity,
            welcome_banner: Bytes::from(config.welcome_banner.clone()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main transport loop. Runs until the task is dropped.
    pub async fn run(self) {
        let mut reads: SelectAll<ClientReads> = SelectAll::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, addr)) => reads.push(self.accept(socket, addr).await),
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some((client_id, event)) = reads.next(), if !reads.is_empty() => match event {
                    ReadEvent::Data(chunk) => self.clients.feed(client_id, chunk).await,
                    ReadEvent::Failed(e) => warn!("Read from client #{} failed: {}", client_id, e),
                    ReadEvent::Closed => {
                        self.clients.remove_client(client_id).await;
                    }
                },
            }
        }
    }

    /// Registers an accepted socket and returns the stream of its reads
    async fn accept(&self, socket: TcpStream, addr: SocketAddr) -> ClientReads {
        if let Err(e) = socket.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let (read_half, write_half) = socket.into_split();
        let (outbound, outbound_rx) = mpsc::channel(self.outbound_capacity.max(1));
        tokio::spawn(write_loop(write_half, outbound_rx));

        // the banner goes out before any protocol traffic
        let _ = outbound.try_send(self.welcome_banner.clone());
        let (client_id, cancelled) = self.clients.add_client(addr, outbound).await;
        info!(
            "Client connected: #{} from {} on port {}",
            client_id,
            addr.ip(),
            addr.port()
        );
        debug!("{} clients connected", self.clients.len().await);

        ReaderStream::with_capacity(read_half, self.read_buffer_size)
            .take_until(cancelled.cancelled_owned())
            .map(|read| match read {
                Ok(chunk) => ReadEvent::Data(chunk),
                Err(e) => ReadEvent::Failed(e),
            })
            .chain(stream::once(async { ReadEvent::Closed }))
            .map(move |event| (client_id, event))
            .boxed()
    }
}

/// Drains a session's outbound queue into its socket
async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Bytes>) {
    while let Some(data) = outbound.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            warn!("Failed to write to {:?}: {}", writer.peer_addr().ok(), e);
            break;
        }
    }

    let _ = writer.shutdown().await;
}

/// Main server coordinating the transport and the session manager
pub struct Server {
    transport: Transport,
    manager: Manager,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let clients = Arc::new(ClientManager::new(inbound_tx, config.pipe_capacity));
        let transport = Transport::bind(&config, Arc::clone(&clients)).await?;
        let manager = Manager::new(clients, config.arena.clone(), config.tick_rate);

        Ok(Self {
            transport,
            manager,
            inbound,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the transport and the session manager until either stops.
    pub async fn run(self) {
        let Server {
            transport,
            manager,
            inbound,
        } = self;

        let transport_handle = tokio::spawn(transport.run());
        let manager_handle = tokio::spawn(manager.run(inbound));

        info!("Server started successfully");

        tokio::select! {
            result = transport_handle => {
                if let Err(e) = result {
                    error!("Transport task panicked: {}", e);
                }
            }
            result = manager_handle => {
                if let Err(e) = result {
                    error!("Session manager task panicked: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    async fn start() -> SocketAddr {
        let config = ServerConfig::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    #[tokio::test]
    async fn test_banner_sent_on_connect() {
        let addr = start().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        let mut banner = vec![0u8; 24];
        timeout(Duration::from_secs(1), socket.read_exact(&mut banner))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(banner, b"Welcome to Pong server!\n");
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let addr = start().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        let mut banner = vec![0u8; 24];
        socket.read_exact(&mut banner).await.unwrap();

        socket.write_all(b"<id:7;rid:0;ty").await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.write_all(b"pe:1100;|>").await.unwrap();

        let mut reply = Vec::new();
        let mut buffer = [0u8; 128];
        while !reply.ends_with(b">") {
            let n = timeout(Duration::from_secs(1), socket.read(&mut buffer))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed early");
            reply.extend_from_slice(&buffer[..n]);
        }

        let mut bytes: &[u8] = &reply;
        let message = shared::decode(&mut bytes).await.unwrap();
        assert_eq!(message.rid, 7);
        assert_eq!(message.get("status"), Some("ok"));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let addr = start().await;
        let SocketAddr::V4(v4) = addr else {
            panic!("expected an IPv4 listener");
        };

        assert!(Server::bind(ServerConfig::new(v4)).await.is_err());
    }
}
