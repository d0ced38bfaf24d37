use std::collections::BTreeMap;

use crate::types::{GameMode, PlayerEffects, PlayerStatus, PlayerView, Vec3};

#[derive(Clone, Debug)]
pub struct Player {
    pub view: PlayerView,
    pub room: Option<String>,
    pub boost_until_ms: u64,
}

impl Player {
    fn new(id: String, base_speed: f32) -> Self {
        Self {
            view: PlayerView {
                id,
                position: Vec3::default(),
                speed: 0.0,
                base_speed,
                charge_force: 0.0,
                points: 0,
                lap: 0,
                status: PlayerStatus::Lobby,
                mode: GameMode::None,
                effects: PlayerEffects::default(),
                finish_time: None,
                final_rank: None,
                total_points: None,
            },
            room: None,
            boost_until_ms: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.view.id
    }

    pub fn is_playing(&self) -> bool {
        self.view.status == PlayerStatus::Playing
    }

    pub fn is_racing_multi(&self) -> bool {
        self.is_playing() && self.view.mode == GameMode::Multi
    }

    /// Starts a fresh race for this player.
    fn reset_for_race(&mut self, room: String, mode: GameMode, base_speed: f32) {
        let view = &mut self.view;
        view.position = Vec3::default();
        view.speed = 0.0;
        view.base_speed = base_speed;
        view.charge_force = 0.0;
        view.points = 0;
        view.lap = 0;
        view.status = PlayerStatus::Playing;
        view.mode = mode;
        view.effects = PlayerEffects::default();
        view.finish_time = None;
        view.final_rank = None;
        view.total_points = None;
        self.room = Some(room);
        self.boost_until_ms = 0;
    }
}

/// Players keyed by identifier. Only the engine mutates it.
#[derive(Clone, Debug, Default)]
pub struct PlayerStore {
    players: BTreeMap<String, Player>,
    next_id_counter: u64,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self {
            players: BTreeMap::new(),
            next_id_counter: 1,
        }
    }

    /// Registers a lobby player and returns its identifier. A requested id is
    /// honoured only when it is non-empty and not held by a connected player.
    pub fn connect(&mut self, requested_id: Option<&str>, base_speed: f32) -> String {
        let requested = requested_id
            .map(str::trim)
            .filter(|id| !id.is_empty() && !self.players.contains_key(*id))
            .map(str::to_string);
        let id = match requested {
            Some(id) => id,
            None => self.next_free_id(),
        };
        self.players
            .insert(id.clone(), Player::new(id.clone(), base_speed));
        id
    }

    fn next_free_id(&mut self) -> String {
        loop {
            let candidate = format!("player_{}", self.next_id_counter);
            self.next_id_counter += 1;
            if !self.players.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Resets and activates a player. Returns `false` for unknown ids.
    pub fn join(&mut self, player_id: &str, room: String, mode: GameMode, base_speed: f32) -> bool {
        let Some(player) = self.players.get_mut(player_id) else {
            return false;
        };
        player.reset_for_race(room, mode, base_speed);
        true
    }

    pub fn remove(&mut self, player_id: &str) -> Option<Player> {
        self.players.remove(player_id)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn get(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub fn get_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.get_mut(player_id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn views(&self) -> BTreeMap<String, PlayerView> {
        self.players
            .iter()
            .map(|(id, player)| (id.clone(), player.view.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_assigns_sequential_ids() {
        let mut store = PlayerStore::new();
        assert_eq!(store.connect(None, 2.0), "player_1");
        assert_eq!(store.connect(Some("   "), 2.0), "player_2");
        let player = store.get("player_1").expect("player exists");
        assert_eq!(player.view.status, PlayerStatus::Lobby);
        assert_eq!(player.view.mode, GameMode::None);
    }

    #[test]
    fn connect_honours_free_requested_id_only() {
        let mut store = PlayerStore::new();
        assert_eq!(store.connect(Some("phone-a"), 2.0), "phone-a");
        let second = store.connect(Some("phone-a"), 2.0);
        assert_ne!(second, "phone-a");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn generated_ids_skip_ids_taken_by_clients() {
        let mut store = PlayerStore::new();
        store.connect(Some("player_1"), 2.0);
        assert_eq!(store.connect(None, 2.0), "player_2");
    }

    #[test]
    fn join_resets_race_state() {
        let mut store = PlayerStore::new();
        let id = store.connect(None, 2.0);
        {
            let player = store.get_mut(&id).expect("player exists");
            player.view.position = Vec3 {
                x: 3.0,
                y: 0.0,
                z: -500.0,
            };
            player.view.lap = 2;
            player.view.points = 40;
            player.view.charge_force = 7.0;
            player.view.status = PlayerStatus::Finished;
            player.view.finish_time = Some(1_234);
            player.view.effects.double_speed = true;
            player.boost_until_ms = 99;
        }

        assert!(store.join(&id, "main".to_string(), GameMode::Multi, 2.0));
        let player = store.get(&id).expect("player exists");
        assert_eq!(player.view.position, Vec3::default());
        assert_eq!(player.view.lap, 0);
        assert_eq!(player.view.points, 0);
        assert_eq!(player.view.charge_force, 0.0);
        assert_eq!(player.view.status, PlayerStatus::Playing);
        assert_eq!(player.view.mode, GameMode::Multi);
        assert_eq!(player.view.finish_time, None);
        assert!(!player.view.effects.double_speed);
        assert_eq!(player.boost_until_ms, 0);
        assert_eq!(player.room.as_deref(), Some("main"));
    }

    #[test]
    fn join_unknown_player_is_noop() {
        let mut store = PlayerStore::new();
        assert!(!store.join("ghost", "main".to_string(), GameMode::Solo, 2.0));
        assert!(store.is_empty());
    }

    #[test]
    fn remove_drops_player() {
        let mut store = PlayerStore::new();
        let id = store.connect(None, 2.0);
        assert!(store.remove(&id).is_some());
        assert!(!store.contains(&id));
        assert!(store.remove(&id).is_none());
    }
}
