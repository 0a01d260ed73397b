//! Fixed-tick simulation task of one game session

use crate::actions::error_reply;
use crate::client_manager::ClientManager;
use crate::game::{GameId, GameState};
use log::{debug, info, warn};
use shared::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Ticks between two statistics lines
const STATS_INTERVAL: u64 = 300;

/// In-game messages a session queues before further input is refused.
/// The loop applies one per tick, so this bounds input lag to about a second.
pub const INBOX_CAPACITY: usize = 32;

/// Shared handle to a running match.
///
/// The session manager seats and removes players through `state`; the
/// game loop owns everything else that happens inside a tick.
#[derive(Debug)]
pub struct GameSession {
    pub id: GameId,
    pub state: RwLock<GameState>,
    inbox: mpsc::Sender<Message>,
    running: AtomicBool,
    pub tick_duration: Duration,
}

impl GameSession {
    /// Wraps `state` in a running session. The receiver is the in-game inbox
    /// the loop drains.
    pub fn new(state: GameState, tick_rate: u32) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (inbox, receiver) = mpsc::channel(INBOX_CAPACITY);
        let session = Arc::new(Self {
            id: state.id,
            state: RwLock::new(state),
            inbox,
            running: AtomicBool::new(true),
            tick_duration: Duration::from_millis(1000 / u64::from(tick_rate.max(1))),
        });
        (session, receiver)
    }

    /// Queues an in-game message for a later tick.
    ///
    /// Fails with `Full` while the inbox holds `INBOX_CAPACITY` messages and
    /// with `Closed` once the loop has exited.
    pub fn push(&self, message: Message) -> Result<(), TrySendError<Message>> {
        self.inbox.try_send(message)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Makes the loop exit before its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

pub fn spawn(
    session: Arc<GameSession>,
    inbox: mpsc::Receiver<Message>,
    clients: Arc<ClientManager>,
) -> JoinHandle<u64> {
    tokio::spawn(run(session, inbox, clients))
}

/// Runs ticks until the session is stopped. Returns the number of ticks run.
///
/// Ticks are scheduled on a fixed grid; a late loop runs the missed ticks
/// back to back instead of shifting the grid.
pub async fn run(
    session: Arc<GameSession>,
    mut inbox: mpsc::Receiver<Message>,
    clients: Arc<ClientManager>,
) -> u64 {
    let mut ticker = interval(session.tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let started = Instant::now();
    let mut ticks: u64 = 0;
    info!("Game {} loop started at {:?} per tick", session.id, session.tick_duration);

    while session.is_running() {
        ticker.tick().await;
        if !session.is_running() {
            break;
        }

        let input = inbox.try_recv().ok();

        let (snapshot, recipients, rejected) = {
            let mut state = session.state.write().await;
            let rejected = input.and_then(|message| match state.apply_input(&message) {
                Ok(()) => None,
                Err(e) => Some((message, e)),
            });
            state.step();
            (state.snapshot(), state.recipients(), rejected)
        };

        if let Some((message, e)) = rejected {
            warn!(
                "Game {}: rejected input from client #{}: {}",
                session.id, message.source, e
            );
            clients
                .send_id(message.source, &error_reply(&message, &e.to_string()))
                .await;
        }

        let frame = snapshot.to_bytes();
        for client_id in recipients {
            clients.send_frame(client_id, frame.clone()).await;
        }

        ticks += 1;
        if ticks % STATS_INTERVAL == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            debug!(
                "Game {}: {} ticks in {:.1}s ({:.1} tps)",
                session.id,
                ticks,
                elapsed,
                ticks as f64 / elapsed.max(f64::EPSILON)
            );
        }
    }

    info!("Game {} loop stopped after {} ticks", session.id, ticks);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::Inbound;
    use crate::game::Arena;
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{decode, MessageType};
    use tokio::time::timeout;

    async fn setup() -> (
        Arc<GameSession>,
        mpsc::Receiver<Message>,
        Arc<ClientManager>,
        mpsc::Receiver<Bytes>,
        mpsc::UnboundedReceiver<Inbound>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let clients = Arc::new(ClientManager::new(inbound_tx, 16));
        let (out_tx, out_rx) = mpsc::channel(1024);
        let (client_id, _) = clients
            .add_client("127.0.0.1:4000".parse().unwrap(), out_tx)
            .await;

        let mut state = GameState::with_rng(1, Arena::default(), StdRng::seed_from_u64(3));
        state.seat(10, Some(client_id));
        let (session, inbox) = GameSession::new(state, 100);

        (session, inbox, clients, out_rx, inbound_rx)
    }

    async fn next_frame(out: &mut mpsc::Receiver<Bytes>) -> Message {
        let frame = timeout(Duration::from_secs(1), out.recv())
            .await
            .unwrap()
            .unwrap();
        let mut bytes: &[u8] = &frame;
        decode(&mut bytes).await.unwrap()
    }

    #[test]
    fn test_tick_duration_from_rate() {
        let state = GameState::new(1, Arena::default());
        let (session, _inbox) = GameSession::new(state, 30);

        assert_eq!(session.tick_duration, Duration::from_millis(33));
        assert!(session.is_running());
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn test_inbox_is_bounded() {
        let state = GameState::new(1, Arena::default());
        let (session, mut inbox) = GameSession::new(state, 30);
        let update = || Message::new(MessageType::PlayerPositionUpdate).with("x", 60);

        for _ in 0..INBOX_CAPACITY {
            assert!(session.push(update()).is_ok());
        }
        assert!(matches!(session.push(update()), Err(TrySendError::Full(_))));

        // one applied tick frees one slot
        assert!(inbox.try_recv().is_ok());
        assert!(session.push(update()).is_ok());

        drop(inbox);
        assert!(matches!(session.push(update()), Err(TrySendError::Closed(_))));
    }

    #[tokio::test]
    async fn test_loop_sends_snapshots_in_sequence() {
        let (session, inbox, clients, mut out, _inbound) = setup().await;
        let handle = spawn(Arc::clone(&session), inbox, clients);

        let first = next_frame(&mut out).await;
        let second = next_frame(&mut out).await;
        assert_eq!(first.message_type(), Some(MessageType::GameState));
        assert_eq!(second.id, first.id + 1);
        assert_eq!(first.get("paused"), Some("true"));

        session.stop();
        let ticks = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(ticks >= 2);
    }

    #[tokio::test]
    async fn test_loop_applies_position_updates() {
        let (session, inbox, clients, mut out, _inbound) = setup().await;

        let mut update = Message::new(MessageType::PlayerPositionUpdate)
            .with("playerID", 10)
            .with("x", 415)
            .with("y", 300);
        update.source = 1;
        assert!(session.push(update).is_ok());

        let handle = spawn(Arc::clone(&session), inbox, clients);
        let snapshot = next_frame(&mut out).await;
        assert_eq!(snapshot.get("p1x"), Some("415.00"));
        assert_eq!(snapshot.get("p1y"), Some("25.00"));

        session.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_rejects_invalid_input() {
        let (session, inbox, clients, mut out, _inbound) = setup().await;

        let mut update = Message::new(MessageType::PlayerPositionUpdate)
            .with_id(8)
            .with("playerID", 10)
            .with("x", "nope")
            .with("y", 300);
        update.source = 1;
        session.push(update).unwrap();

        let handle = spawn(Arc::clone(&session), inbox, clients);
        let reply = next_frame(&mut out).await;
        assert_eq!(reply.rid, 8);
        assert_eq!(reply.get("status"), Some("error"));
        assert_eq!(
            reply.message_type(),
            Some(MessageType::PlayerPositionUpdate)
        );

        session.stop();
        handle.await.unwrap();
    }
}
