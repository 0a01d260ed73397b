//! Authoritative state of one Pong match
//!
//! `GameState` holds everything a match owns: the arena constants, up to two
//! paddles, the ball, both scores and the outbound snapshot counter. It is a
//! plain value type driven one tick at a time by the game loop, which keeps
//! the rules testable without any I/O.

use crate::physics::{Ball, Vector2, EPSILON};
use crate::player::PlayerId;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{ClientId, Message, MessageType};
use std::str::FromStr;
use thiserror::Error;

pub type GameId = u32;

/// Fixed dimensions and speeds of the playing field.
#[derive(Debug, Clone, PartialEq)]
pub struct Arena {
    pub width: f64,
    pub height: f64,
    pub paddle_width: f64,
    pub paddle_height: f64,
    /// Maximum horizontal travel of a paddle per applied update
    pub paddle_speed: f64,
    /// Distance between a paddle and its boundary
    pub paddle_gap: f64,
    pub ball_size: f64,
    pub ball_speed: i32,
    pub ball_max_speed: i32,
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            paddle_width: 100.0,
            paddle_height: 10.0,
            paddle_speed: 20.0,
            paddle_gap: 20.0,
            ball_size: 5.0,
            ball_speed: 5,
            ball_max_speed: 15,
        }
    }
}

impl Arena {
    pub fn center(&self) -> Vector2 {
        Vector2::new(self.width / 2.0, self.height / 2.0)
    }

    /// Vertical center of the paddle row for `slot`.
    pub fn paddle_row(&self, slot: Slot) -> f64 {
        match slot {
            Slot::One => self.paddle_gap + self.paddle_height / 2.0,
            Slot::Two => self.height - self.paddle_gap - self.paddle_height / 2.0,
        }
    }
}

/// Player slot of a match. Player1 defends the top boundary, Player2 the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    One,
    Two,
}

impl Slot {
    pub fn number(self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }
}

/// In-game transform of a seated player.
#[derive(Debug, Clone, PartialEq)]
pub struct Paddle {
    pub player_id: PlayerId,
    pub client_id: Option<ClientId>,
    /// Center of the paddle
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Paddle {
    pub fn new(player_id: PlayerId, client_id: Option<ClientId>, arena: &Arena, slot: Slot) -> Self {
        Self {
            player_id,
            client_id,
            x: arena.width / 2.0,
            y: arena.paddle_row(slot),
            width: arena.paddle_width,
            height: arena.paddle_height,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not a number: `{value}`")]
    InvalidNumber { field: &'static str, value: String },
    #[error("player {0} is not in this game")]
    UnknownPlayer(PlayerId),
    #[error("player {0} does not belong to this connection")]
    NotOwner(PlayerId),
    #[error("unexpected message type {0}")]
    UnexpectedType(i64),
}

fn numeric_field<T: FromStr>(message: &Message, field: &'static str) -> Result<T, InputError> {
    let value = message.get(field).ok_or(InputError::MissingField(field))?;
    value.trim().parse().map_err(|_| InputError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub id: GameId,
    pub arena: Arena,
    pub player1: Option<Paddle>,
    pub player2: Option<Paddle>,
    pub ball: Ball,
    pub score1: u32,
    pub score2: u32,
    pub paused: bool,
    /// Outbound snapshot counter, used as the `id` of each snapshot frame
    sequence: i64,
    rng: StdRng,
}

impl GameState {
    pub fn new(id: GameId, arena: Arena) -> Self {
        Self::with_rng(id, arena, StdRng::from_entropy())
    }

    /// Creates an empty, paused match drawing ball directions from `rng`.
    pub fn with_rng(id: GameId, arena: Arena, mut rng: StdRng) -> Self {
        let ball = Ball::new(
            arena.center(),
            arena.ball_speed,
            arena.ball_max_speed,
            arena.ball_size,
            &mut rng,
        );

        Self {
            id,
            arena,
            player1: None,
            player2: None,
            ball,
            score1: 0,
            score2: 0,
            paused: true,
            sequence: 0,
            rng,
        }
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    fn paddle_mut(&mut self, slot: Slot) -> &mut Option<Paddle> {
        match slot {
            Slot::One => &mut self.player1,
            Slot::Two => &mut self.player2,
        }
    }

    pub fn slot_of(&self, player_id: PlayerId) -> Option<Slot> {
        if self.player1.as_ref().is_some_and(|p| p.player_id == player_id) {
            Some(Slot::One)
        } else if self.player2.as_ref().is_some_and(|p| p.player_id == player_id) {
            Some(Slot::Two)
        } else {
            None
        }
    }

    pub fn has_open_slot(&self) -> bool {
        self.player1.is_none() || self.player2.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.player1.is_none() && self.player2.is_none()
    }

    /// Puts a player in the first empty slot, Player1 before Player2.
    ///
    /// Returns `None` without touching either slot when the match is full.
    /// Filling the last slot resumes play.
    pub fn seat(&mut self, player_id: PlayerId, client_id: Option<ClientId>) -> Option<Slot> {
        let slot = if self.player1.is_none() {
            Slot::One
        } else if self.player2.is_none() {
            Slot::Two
        } else {
            return None;
        };

        let paddle = Paddle::new(player_id, client_id, &self.arena, slot);
        *self.paddle_mut(slot) = Some(paddle);

        if !self.has_open_slot() {
            self.paused = false;
            info!("Game {} resumed", self.id);
        }

        Some(slot)
    }

    /// Clears the slot held by `player_id` and pauses the match.
    pub fn vacate(&mut self, player_id: PlayerId) -> Option<Slot> {
        let slot = self.slot_of(player_id)?;
        *self.paddle_mut(slot) = None;
        self.paused = true;
        Some(slot)
    }

    /// Forgets the connection of whichever paddle used `client_id`.
    pub fn detach_client(&mut self, client_id: ClientId) {
        for paddle in [&mut self.player1, &mut self.player2].into_iter().flatten() {
            if paddle.client_id == Some(client_id) {
                paddle.client_id = None;
            }
        }
    }

    /// Applies one in-game message sent by a client.
    pub fn apply_input(&mut self, message: &Message) -> Result<(), InputError> {
        match message.message_type() {
            Some(MessageType::PlayerPositionUpdate) => self.apply_position(message),
            // a poll is answered by the snapshot of this tick
            Some(MessageType::GameState) => Ok(()),
            _ => Err(InputError::UnexpectedType(message.kind)),
        }
    }

    fn apply_position(&mut self, message: &Message) -> Result<(), InputError> {
        let player_id: PlayerId = numeric_field(message, "playerID")?;
        let x: f64 = numeric_field(message, "x")?;
        // y is validated but the row is decided by the server
        let _: f64 = numeric_field(message, "y")?;

        if !x.is_finite() {
            return Err(InputError::InvalidNumber {
                field: "x",
                value: x.to_string(),
            });
        }

        let slot = self
            .slot_of(player_id)
            .ok_or(InputError::UnknownPlayer(player_id))?;
        let (width, max_step) = (self.arena.width, self.arena.paddle_speed);
        let Some(paddle) = self.paddle_mut(slot).as_mut() else {
            return Err(InputError::UnknownPlayer(player_id));
        };

        if paddle.client_id != Some(message.source) {
            return Err(InputError::NotOwner(player_id));
        }

        let half = paddle.width / 2.0;
        let target = x.clamp(half, width - half);
        let delta = (target - paddle.x).clamp(-max_step, max_step);
        paddle.x += delta;

        Ok(())
    }

    /// Moves every present paddle back onto its row.
    pub fn pin_paddles(&mut self) {
        let row1 = self.arena.paddle_row(Slot::One);
        let row2 = self.arena.paddle_row(Slot::Two);

        if let Some(paddle) = self.player1.as_mut() {
            paddle.y = row1;
        }
        if let Some(paddle) = self.player2.as_mut() {
            paddle.y = row2;
        }
    }

    /// Moves the ball by one tick.
    ///
    /// Returns the slot that scored, if any.
    pub fn advance_ball(&mut self) -> Option<Slot> {
        let velocity = self.ball.velocity();
        let size = self.ball.size;
        let width = self.arena.width;
        let height = self.arena.height;

        let next_x = self.ball.position.x + velocity.x;
        if velocity.x > EPSILON && next_x + size >= width {
            self.ball.position.x = width - size;
            self.ball.reflect_horizontal();
        } else if velocity.x < -EPSILON && next_x - size <= 0.0 {
            self.ball.position.x = size;
            self.ball.reflect_horizontal();
        } else {
            self.ball.position.x = next_x;
        }

        let x = self.ball.position.x;
        let y = self.ball.position.y;
        let next_y = y + velocity.y;

        if velocity.y < -EPSILON {
            match &self.player1 {
                Some(paddle) => {
                    let surface = paddle.y + paddle.height / 2.0;
                    if (x - paddle.x).abs() <= paddle.width / 2.0 + size
                        && y - size >= surface
                        && next_y - size <= surface
                    {
                        self.ball.position.y = surface + size;
                        self.ball.reflect_vertical();
                        self.ball.accelerate();
                        return None;
                    }
                }
                None if next_y - size <= 0.0 => {
                    self.ball.position.y = size;
                    self.ball.reflect_vertical();
                    return None;
                }
                None => {}
            }
        } else if velocity.y > EPSILON {
            match &self.player2 {
                Some(paddle) => {
                    let surface = paddle.y - paddle.height / 2.0;
                    if (x - paddle.x).abs() <= paddle.width / 2.0 + size
                        && y + size <= surface
                        && next_y + size >= surface
                    {
                        self.ball.position.y = surface - size;
                        self.ball.reflect_vertical();
                        self.ball.accelerate();
                        return None;
                    }
                }
                None if next_y + size >= height => {
                    self.ball.position.y = height - size;
                    self.ball.reflect_vertical();
                    return None;
                }
                None => {}
            }
        }

        self.ball.position.y = next_y;

        let scorer = if next_y < -size {
            self.score2 += 1;
            Slot::Two
        } else if next_y > height + size {
            self.score1 += 1;
            Slot::One
        } else {
            return None;
        };

        let center = self.arena.center();
        let speed = self.arena.ball_speed;
        self.ball.reset(center, speed, &mut self.rng);
        info!(
            "Game {}: player {} scored ({} - {})",
            self.id,
            scorer.number(),
            self.score1,
            self.score2
        );

        Some(scorer)
    }

    /// Runs one simulation step after an optional client input was applied.
    pub fn step(&mut self) -> Option<Slot> {
        self.pin_paddles();
        if self.paused {
            return None;
        }
        self.advance_ball()
    }

    /// Builds the next state snapshot frame.
    pub fn snapshot(&mut self) -> Message {
        self.sequence += 1;

        let mut message = Message::new(MessageType::GameState)
            .with_id(self.sequence)
            .with("score1", self.score1)
            .with("score2", self.score2)
            .with("ballX", format!("{:.2}", self.ball.position.x))
            .with("ballY", format!("{:.2}", self.ball.position.y))
            .with("ballSpeed", self.ball.speed)
            .with("ballRotation", self.ball.rotation)
            .with("paused", self.paused);

        if let Some(paddle) = &self.player1 {
            message.insert("p1x", format!("{:.2}", paddle.x));
            message.insert("p1y", format!("{:.2}", paddle.y));
        }
        if let Some(paddle) = &self.player2 {
            message.insert("p2x", format!("{:.2}", paddle.x));
            message.insert("p2y", format!("{:.2}", paddle.y));
        }

        message
    }

    /// Client sessions that receive this match's snapshots.
    pub fn recipients(&self) -> Vec<ClientId> {
        [&self.player1, &self.player2]
            .into_iter()
            .flatten()
            .filter_map(|paddle| paddle.client_id)
            .collect()
    }
}
