//! Global action handlers
//!
//! Every request type the session manager answers itself maps to one
//! [`Action`]. A handler validates the request against the sender's player
//! and game state, applies it, and returns the success reply. The dispatcher
//! turns an [`ActionError`] into the error reply, so every request gets
//! exactly one answer.

use crate::game::{GameId, GameState};
use crate::game_loop::{self, GameSession};
use crate::manager::Manager;
use crate::player::PlayerId;
use async_trait::async_trait;
use log::info;
use shared::{is_control, Message, MessageType};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a global action. The display text is sent as `msg`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be a number, got `{value}`")]
    InvalidNumber { field: &'static str, value: String },
    #[error("name must not be empty")]
    EmptyName,
    #[error("name must not contain control characters")]
    InvalidName,
    #[error("name `{0}` is already taken")]
    NameTaken(String),
    #[error("already registered")]
    AlreadyAuthenticated,
    #[error("not registered")]
    NotAuthenticated,
    #[error("no client session")]
    NoSession,
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("player {0} does not belong to this connection")]
    NotOwner(PlayerId),
    #[error("already in game {0}")]
    AlreadyInGame(GameId),
    #[error("not in a game")]
    NotInGame,
    #[error("unknown game {0}")]
    UnknownGame(GameId),
    #[error("full")]
    GameFull,
    #[error("input queue full")]
    InputQueueFull,
    #[error("unknown message")]
    UnknownMessage,
}

/// Builds a `status:ok` reply to `request`.
pub fn ok_reply(request: &Message, msg: &str) -> Message {
    Message::reply_to(request)
        .with("status", "ok")
        .with("msg", msg)
}

/// Builds a `status:error` reply to `request`.
pub fn error_reply(request: &Message, msg: &str) -> Message {
    Message::reply_to(request)
        .with("status", "error")
        .with("msg", msg)
}

fn required<'a>(message: &'a Message, field: &'static str) -> Result<&'a str, ActionError> {
    message.get(field).ok_or(ActionError::MissingField(field))
}

fn numeric<T: FromStr>(message: &Message, field: &'static str) -> Result<T, ActionError> {
    let value = required(message, field)?;
    value.trim().parse().map_err(|_| ActionError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Handler of one global request type.
#[async_trait]
pub trait Action: Send + Sync {
    /// Applies `message` and returns the reply to send.
    ///
    /// `Ok(None)` means the handler already answered the sender.
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError>;
}

/// Maps request types to their handlers.
pub struct ActionTable {
    actions: HashMap<MessageType, Box<dyn Action>>,
}

impl ActionTable {
    pub fn new() -> Self {
        let mut actions: HashMap<MessageType, Box<dyn Action>> = HashMap::new();
        actions.insert(MessageType::Register, Box::new(Register));
        actions.insert(MessageType::KeepAlive, Box::new(KeepAlive));
        actions.insert(MessageType::CreateGame, Box::new(CreateGame));
        actions.insert(MessageType::JoinGame, Box::new(JoinGame));
        actions.insert(MessageType::ListGames, Box::new(ListGames));
        actions.insert(MessageType::AbandonGame, Box::new(AbandonGame));
        actions.insert(MessageType::Disconnect, Box::new(Disconnect));
        Self { actions }
    }

    pub fn get(&self, kind: MessageType) -> Option<&dyn Action> {
        self.actions.get(&kind).map(Box::as_ref)
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Register;

#[async_trait]
impl Action for Register {
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError> {
        let name = required(message, "name")?;
        if name.trim().is_empty() {
            return Err(ActionError::EmptyName);
        }
        if name.bytes().any(|b| is_control(b) || b.is_ascii_control()) {
            return Err(ActionError::InvalidName);
        }

        let player_id = manager.sender_id(message)?;
        if manager.player(player_id)?.is_authenticated() {
            return Err(ActionError::AlreadyAuthenticated);
        }
        if !manager.clients().contains(message.source).await {
            return Err(ActionError::NoSession);
        }
        if manager.name_taken(name) {
            return Err(ActionError::NameTaken(name.to_string()));
        }

        manager.player_mut(player_id)?.name = name.to_string();
        info!("Player {} registered as {}", player_id, name);

        Ok(Some(
            ok_reply(message, "registered").with("playerID", player_id),
        ))
    }
}

pub struct KeepAlive;

#[async_trait]
impl Action for KeepAlive {
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError> {
        let player_id = manager.sender_id(message)?;
        manager.player_mut(player_id)?.touch();
        manager.clients().touch(message.source).await;

        Ok(Some(ok_reply(message, "alive")))
    }
}

pub struct CreateGame;

#[async_trait]
impl Action for CreateGame {
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError> {
        let player_id = manager.sender_id(message)?;
        let player = manager.authenticated(player_id)?;
        if let Some(game_id) = player.game_id {
            return Err(ActionError::AlreadyInGame(game_id));
        }

        let game_id = manager.next_game_id();
        let mut state = GameState::new(game_id, manager.arena().clone());
        state.seat(player_id, Some(message.source));

        let (session, inbox) = GameSession::new(state, manager.tick_rate());
        game_loop::spawn(Arc::clone(&session), inbox, Arc::clone(manager.clients()));
        manager.insert_game(session);
        manager.player_mut(player_id)?.game_id = Some(game_id);

        info!("Player {} created game {}", player_id, game_id);
        Ok(Some(ok_reply(message, "created").with("gameID", game_id)))
    }
}

pub struct JoinGame;

#[async_trait]
impl Action for JoinGame {
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError> {
        let player_id = manager.sender_id(message)?;
        let player = manager.authenticated(player_id)?;
        if let Some(game_id) = player.game_id {
            return Err(ActionError::AlreadyInGame(game_id));
        }

        let game_id: GameId = numeric(message, "gameID")?;
        let session = manager
            .game(game_id)
            .ok_or(ActionError::UnknownGame(game_id))?;

        let slot = session
            .state
            .write()
            .await
            .seat(player_id, Some(message.source))
            .ok_or(ActionError::GameFull)?;
        manager.player_mut(player_id)?.game_id = Some(game_id);

        info!(
            "Player {} joined game {} as player {}",
            player_id,
            game_id,
            slot.number()
        );
        Ok(Some(
            ok_reply(message, "joined")
                .with("gameID", game_id)
                .with("player", slot.number()),
        ))
    }
}

pub struct ListGames;

#[async_trait]
impl Action for ListGames {
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError> {
        let player_id = manager.sender_id(message)?;
        manager.authenticated(player_id)?;

        let open = manager.open_games().await;
        let mut reply = ok_reply(message, "games").with("gameCount", open.len());
        for (index, game_id) in open.iter().enumerate() {
            reply.insert(format!("gameID{}", index), game_id);
        }

        Ok(Some(reply))
    }
}

pub struct AbandonGame;

#[async_trait]
impl Action for AbandonGame {
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError> {
        let player_id: PlayerId = numeric(message, "playerID")?;
        manager.owned_by_sender(player_id, message)?;
        manager.authenticated(player_id)?;

        let game_id = manager
            .leave_game(player_id)
            .await
            .ok_or(ActionError::NotInGame)?;

        info!("Player {} abandoned game {}", player_id, game_id);
        Ok(Some(ok_reply(message, "abandoned").with("gameID", game_id)))
    }
}

pub struct Disconnect;

#[async_trait]
impl Action for Disconnect {
    async fn handle(
        &self,
        manager: &mut Manager,
        message: &Message,
    ) -> Result<Option<Message>, ActionError> {
        let player_id: PlayerId = numeric(message, "playerID")?;
        manager.owned_by_sender(player_id, message)?;

        manager.leave_game(player_id).await;

        // the acknowledgement is queued ahead of the socket shutdown
        manager
            .clients()
            .send_id(message.source, &ok_reply(message, "terminated"))
            .await;
        manager.clients().remove_client(message.source).await;
        manager.remove_player(player_id);

        info!("Player {} disconnected", player_id);
        Ok(None)
    }
}
