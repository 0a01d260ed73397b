//! Session and matchmaking manager
//!
//! A single task owns every player and game session and consumes the
//! inbound queue one event at a time. All membership changes are therefore
//! totally ordered: two joins racing for the last slot of a game are handled
//! one after the other and only the first one wins.

use crate::actions::{error_reply, ActionError, ActionTable};
use crate::client_manager::{ClientManager, Inbound};
use crate::game::{Arena, GameId};
use crate::game_loop::GameSession;
use crate::player::{Player, PlayerId};
use log::{debug, info, warn};
use shared::{ClientId, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub struct Manager {
    clients: Arc<ClientManager>,
    actions: Arc<ActionTable>,
    players: HashMap<PlayerId, Player>,
    /// Player bound to each live client session
    by_client: HashMap<ClientId, PlayerId>,
    games: HashMap<GameId, Arc<GameSession>>,
    next_player_id: PlayerId,
    next_game_id: GameId,
    arena: Arena,
    tick_rate: u32,
}

impl Manager {
    pub fn new(clients: Arc<ClientManager>, arena: Arena, tick_rate: u32) -> Self {
        Self {
            clients,
            actions: Arc::new(ActionTable::new()),
            players: HashMap::new(),
            by_client: HashMap::new(),
            games: HashMap::new(),
            next_player_id: 1,
            next_game_id: 1,
            arena,
            tick_rate,
        }
    }

    /// Processes inbound events until every sender is gone.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(event) = inbound.recv().await {
            self.process(event).await;
        }

        for session in self.games.values() {
            session.stop();
        }
        info!("Session manager stopped");
    }

    pub async fn process(&mut self, event: Inbound) {
        match event {
            Inbound::Message(message) => self.dispatch(message).await,
            Inbound::ClientClosed(client_id) => self.client_closed(client_id).await,
        }
    }

    async fn dispatch(&mut self, message: Message) {
        let player_id = match self.by_client.get(&message.source) {
            Some(player_id) => *player_id,
            None => {
                // frames still in flight when the socket went away
                if !self.clients.contains(message.source).await {
                    debug!("Dropping message from closed client #{}", message.source);
                    return;
                }
                self.create_player(message.source)
            }
        };

        let kind = message.message_type();
        let actions = Arc::clone(&self.actions);

        let result = match (kind.and_then(|kind| actions.get(kind)), kind) {
            (Some(action), _) => action.handle(self, &message).await,
            (None, Some(kind)) if kind.is_in_game() => {
                self.forward_in_game(player_id, &message).map(|()| None)
            }
            _ => {
                debug!(
                    "Unknown message type {} from client #{}",
                    message.kind, message.source
                );
                Err(ActionError::UnknownMessage)
            }
        };

        match result {
            Ok(Some(reply)) => {
                self.clients.send_id(message.source, &reply).await;
            }
            Ok(None) => {}
            Err(e) => {
                debug!(
                    "Request {} of type {} from client #{} failed: {}",
                    message.id, message.kind, message.source, e
                );
                self.clients
                    .send_id(message.source, &error_reply(&message, &e.to_string()))
                    .await;
            }
        }
    }

    /// Hands an in-game message to the sender's game loop.
    fn forward_in_game(&self, player_id: PlayerId, message: &Message) -> Result<(), ActionError> {
        let player = self.authenticated(player_id)?;
        let session = player
            .game_id
            .and_then(|game_id| self.games.get(&game_id))
            .ok_or(ActionError::NotInGame)?;

        match session.push(message.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Game {}: input queue of client #{} is full",
                    session.id, message.source
                );
                Err(ActionError::InputQueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(ActionError::NotInGame),
        }
    }

    fn create_player(&mut self, client_id: ClientId) -> PlayerId {
        let player_id = self.next_player_id;
        self.next_player_id += 1;

        self.players.insert(player_id, Player::new(player_id, client_id));
        self.by_client.insert(client_id, player_id);
        info!("Player {} created for client #{}", player_id, client_id);
        player_id
    }

    /// Unbinds the player of a closed session. The player itself survives.
    async fn client_closed(&mut self, client_id: ClientId) {
        let Some(player_id) = self.by_client.remove(&client_id) else {
            return;
        };
        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };

        player.detach();
        if let Some(session) = player.game_id.and_then(|game_id| self.games.get(&game_id)) {
            session.state.write().await.detach_client(client_id);
        }
        info!("Player {} detached from client #{}", player_id, client_id);
    }

    pub fn clients(&self) -> &Arc<ClientManager> {
        &self.clients
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Player bound to the session that sent `message`.
    pub fn sender_id(&self, message: &Message) -> Result<PlayerId, ActionError> {
        self.by_client
            .get(&message.source)
            .copied()
            .ok_or(ActionError::NoSession)
    }

    pub fn player(&self, player_id: PlayerId) -> Result<&Player, ActionError> {
        self.players
            .get(&player_id)
            .ok_or(ActionError::UnknownPlayer(player_id))
    }

    pub fn player_mut(&mut self, player_id: PlayerId) -> Result<&mut Player, ActionError> {
        self.players
            .get_mut(&player_id)
            .ok_or(ActionError::UnknownPlayer(player_id))
    }

    pub fn authenticated(&self, player_id: PlayerId) -> Result<&Player, ActionError> {
        let player = self.player(player_id)?;
        if player.is_authenticated() {
            Ok(player)
        } else {
            Err(ActionError::NotAuthenticated)
        }
    }

    /// Checks that `player_id` exists and is bound to the sender's session.
    pub fn owned_by_sender(&self, player_id: PlayerId, message: &Message) -> Result<(), ActionError> {
        if self.player(player_id)?.is_bound_to(message.source) {
            Ok(())
        } else {
            Err(ActionError::NotOwner(player_id))
        }
    }

    pub fn name_taken(&self, name: &str) -> bool {
        self.players.values().any(|player| player.name == name)
    }

    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&player_id)?;
        if let Some(client_id) = player.client_id {
            self.by_client.remove(&client_id);
        }
        Some(player)
    }

    pub fn players_len(&self) -> usize {
        self.players.len()
    }

    pub fn next_game_id(&mut self) -> GameId {
        let game_id = self.next_game_id;
        self.next_game_id += 1;
        game_id
    }

    pub fn insert_game(&mut self, session: Arc<GameSession>) {
        self.games.insert(session.id, session);
    }

    pub fn game(&self, game_id: GameId) -> Option<Arc<GameSession>> {
        self.games.get(&game_id).cloned()
    }

    pub fn games_len(&self) -> usize {
        self.games.len()
    }

    /// IDs of games with at least one empty slot, in ascending order.
    pub async fn open_games(&self) -> Vec<GameId> {
        let mut ids: Vec<GameId> = self.games.keys().copied().collect();
        ids.sort_unstable();

        let mut open = Vec::with_capacity(ids.len());
        for game_id in ids {
            if let Some(session) = self.games.get(&game_id) {
                if session.state.read().await.has_open_slot() {
                    open.push(game_id);
                }
            }
        }
        open
    }

    /// Takes `player_id` out of its game, reaping the game once it is empty.
    pub async fn leave_game(&mut self, player_id: PlayerId) -> Option<GameId> {
        let game_id = self.players.get_mut(&player_id)?.game_id.take()?;
        let session = self.game(game_id)?;

        let empty = {
            let mut state = session.state.write().await;
            state.vacate(player_id);
            state.is_empty()
        };

        if empty {
            self.remove_game(game_id);
        }
        Some(game_id)
    }

    pub fn remove_game(&mut self, game_id: GameId) {
        if let Some(session) = self.games.remove(&game_id) {
            session.stop();
            info!("Game {} removed", game_id);
        }
    }
}
