use crate::game::GameId;
use shared::ClientId;
use std::time::Instant;

pub type PlayerId = u32;

/// A participant known to the session manager.
///
/// A player exists from the first message its connection sends. It stays
/// unauthenticated until it registers a display name.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    /// Client session this player talks through, cleared when the socket goes away
    pub client_id: Option<ClientId>,
    /// Display name, empty while unauthenticated
    pub name: String,
    pub last_communication: Instant,
    /// Game session this player currently holds a slot in
    pub game_id: Option<GameId>,
}

impl Player {
    pub fn new(id: PlayerId, client_id: ClientId) -> Self {
        Self {
            id,
            client_id: Some(client_id),
            name: String::new(),
            last_communication: Instant::now(),
            game_id: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn touch(&mut self) {
        self.last_communication = Instant::now();
    }

    /// Drops the link to a closed client session.
    pub fn detach(&mut self) {
        self.client_id = None;
    }

    pub fn is_bound_to(&self, client_id: ClientId) -> bool {
        self.client_id == Some(client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_player_is_unauthenticated() {
        let player = Player::new(1, 7);

        assert_eq!(player.id, 1);
        assert!(player.is_bound_to(7));
        assert!(!player.is_authenticated());
        assert!(player.game_id.is_none());
    }

    #[test]
    fn test_detach_keeps_player() {
        let mut player = Player::new(1, 7);
        player.name = "Alice".to_string();
        player.detach();

        assert!(player.client_id.is_none());
        assert!(!player.is_bound_to(7));
        assert!(player.is_authenticated());
    }

    #[test]
    fn test_touch_refreshes_timestamp() {
        let mut player = Player::new(1, 7);
        player.last_communication = Instant::now() - Duration::from_secs(10);
        player.touch();

        assert!(player.last_communication.elapsed() < Duration::from_secs(1));
    }
}
