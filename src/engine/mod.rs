use chrono::{SecondsFormat, Utc};
use tracing::{debug, info};

use crate::config::RaceTuning;
use crate::error::EngineError;
use crate::obstacles::ObstacleRegistry;
use crate::players::PlayerStore;
use crate::ranking::compute_rankings;
use crate::types::{
    GameMode, ObstacleEffect, ObstacleKind, ObstacleSpec, PlayerStatus, PlayerView, RaceResults,
    RankingEntry, Snapshot, TelemetrySample,
};

mod collision_system;
mod input_system;
mod lap_system;
pub mod scheduler;
mod utils;

pub use self::collision_system::ObstacleHit;
pub use self::lap_system::LapProgress;
pub use self::utils::now_ms;

use self::scheduler::{Scheduler, TaskAction};
use self::utils::{finite_or_zero, planar_distance};

/// What one telemetry sample did to its player.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SensorOutcome {
    pub obstacle_hits: Vec<ObstacleHit>,
    pub bumped_players: Vec<String>,
    pub lap: LapProgress,
}

/// Owns every piece of mutable race state. Callers must feed it one event at
/// a time; nothing here is safe to interleave.
#[derive(Clone, Debug)]
pub struct RaceEngine {
    pub tuning: RaceTuning,
    players: PlayerStore,
    obstacles: ObstacleRegistry,
    scheduler: Scheduler,
}

impl RaceEngine {
    pub fn new(tuning: RaceTuning, course: &[ObstacleSpec]) -> Self {
        Self {
            tuning,
            players: PlayerStore::new(),
            obstacles: ObstacleRegistry::new(course),
            scheduler: Scheduler::new(),
        }
    }

    pub fn connect(&mut self, requested_id: Option<&str>) -> String {
        let player_id = self.players.connect(requested_id, self.tuning.base_speed);
        debug!(player_id = %player_id, "player connected");
        player_id
    }

    /// Starts a fresh race for the player in `room`.
    pub fn join(&mut self, player_id: &str, room: &str, mode: GameMode) -> Result<(), EngineError> {
        if !self
            .players
            .join(player_id, room.to_string(), mode, self.tuning.base_speed)
        {
            return Err(EngineError::UnknownPlayer {
                player_id: player_id.to_string(),
            });
        }
        info!(player_id, room, ?mode, "player joined race");
        Ok(())
    }

    /// Input, obstacle collisions, peer collisions and lap check for one
    /// sample, applied as a unit.
    pub fn handle_sensor(
        &mut self,
        player_id: &str,
        sample: TelemetrySample,
        now_ms: u64,
    ) -> Result<SensorOutcome, EngineError> {
        let Some(player) = self.players.get(player_id) else {
            return Err(EngineError::UnknownPlayer {
                player_id: player_id.to_string(),
            });
        };
        if !player.is_playing() {
            return Err(EngineError::NotPlaying {
                player_id: player_id.to_string(),
                status: player.view.status,
            });
        }

        self.apply_telemetry(player_id, &sample);
        let obstacle_hits = self.resolve_obstacle_collisions(player_id, now_ms);
        let bumped_players = self.resolve_player_collisions(player_id);
        let lap = self.check_lap(player_id, now_ms);

        match lap {
            LapProgress::LapCompleted => {
                let lap_count = self.players.get(player_id).map(|p| p.view.lap);
                debug!(player_id, ?lap_count, "lap completed");
            }
            LapProgress::Finished => info!(player_id, now_ms, "player finished"),
            LapProgress::None => {}
        }

        Ok(SensorOutcome {
            obstacle_hits,
            bumped_players,
            lap,
        })
    }

    /// Removes the player. Pending tasks that name it become no-ops.
    pub fn disconnect(&mut self, player_id: &str) -> bool {
        let removed = self.players.remove(player_id).is_some();
        if removed {
            debug!(player_id, "player removed");
        }
        removed
    }

    /// Fires every deferred task due at `now_ms` and returns how many of them
    /// changed state.
    pub fn run_due_tasks(&mut self, now_ms: u64) -> usize {
        let mut applied = 0;
        for task in self.scheduler.take_due(now_ms) {
            let changed = match &task.action {
                TaskAction::ReactivateObstacle { obstacle_id } => {
                    self.obstacles.reactivate(*obstacle_id)
                }
                TaskAction::ExpireBoost { player_id } => self.expire_boost(player_id, now_ms),
            };
            if changed {
                applied += 1;
            } else {
                debug!(action = ?task.action, "stale task skipped");
            }
        }
        applied
    }

    fn expire_boost(&mut self, player_id: &str, now_ms: u64) -> bool {
        let Some(player) = self.players.get_mut(player_id) else {
            return false;
        };
        if !player.view.effects.double_speed || now_ms < player.boost_until_ms {
            return false;
        }
        player.view.effects.double_speed = false;
        true
    }

    /// Recomputes rank and total points for multiplayer racers and stores
    /// them on the player records. Everyone else has the fields cleared.
    pub fn refresh_rankings(&mut self) -> Vec<RankingEntry> {
        let rankings = compute_rankings(
            self.players.iter().map(|player| &player.view),
            self.tuning.rank_point_unit,
        );
        for player in self.players.iter_mut() {
            player.view.final_rank = None;
            player.view.total_points = None;
        }
        for entry in &rankings {
            if let Some(player) = self.players.get_mut(&entry.player_id) {
                player.view.final_rank = Some(entry.final_rank);
                player.view.total_points = Some(entry.total_points);
            }
        }
        rankings
    }

    pub fn build_snapshot(&mut self) -> Snapshot {
        let rankings = self.refresh_rankings();
        Snapshot {
            players: self.players.views(),
            obstacles: self.obstacles.views(),
            max_lap: self.tuning.max_lap,
            rankings,
        }
    }

    pub fn build_results(&mut self) -> RaceResults {
        RaceResults {
            generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            max_lap: self.tuning.max_lap,
            rankings: self.refresh_rankings(),
        }
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerView> {
        self.players.get(player_id).map(|player| &player.view)
    }

    pub fn player_room(&self, player_id: &str) -> Option<&str> {
        self.players
            .get(player_id)
            .and_then(|player| player.room.as_deref())
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn pending_task_count(&self) -> usize {
        self.scheduler.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constants::default_course;
    use crate::types::Vec3;

    pub(crate) fn engine_with_course(course: Vec<ObstacleSpec>) -> RaceEngine {
        RaceEngine::new(RaceTuning::default(), &course)
    }

    pub(crate) fn start_racer(engine: &mut RaceEngine, mode: GameMode) -> String {
        let id = engine.connect(None);
        engine
            .join(&id, "main", mode)
            .expect("freshly connected player can join");
        id
    }

    fn idle() -> TelemetrySample {
        TelemetrySample::default()
    }

    fn box_at(z: f32, points: i32) -> ObstacleSpec {
        ObstacleSpec {
            kind: ObstacleKind::Box,
            position: Vec3 { x: 0.0, y: 0.0, z },
            size: 2.0,
            points,
            effect: None,
        }
    }

    fn bonus_at(z: f32) -> ObstacleSpec {
        ObstacleSpec {
            kind: ObstacleKind::Bonus,
            position: Vec3 { x: 0.0, y: 0.0, z },
            size: 1.0,
            points: 20,
            effect: Some(ObstacleEffect::DoubleSpeed),
        }
    }

    #[test]
    fn sensor_for_lobby_player_is_rejected_without_change() {
        let mut engine = engine_with_course(default_course());
        let id = engine.connect(None);
        let before = engine.player(&id).cloned().expect("player exists");

        let result = engine.handle_sensor(
            &id,
            TelemetrySample {
                roll: 90.0,
                pitch: 0.0,
                acceleration_z: 50.0,
            },
            10,
        );
        assert!(matches!(result, Err(EngineError::NotPlaying { .. })));
        let after = engine.player(&id).expect("player exists");
        assert_eq!(after.position, before.position);
        assert_eq!(after.charge_force, before.charge_force);
    }

    #[test]
    fn sensor_for_unknown_player_is_rejected() {
        let mut engine = engine_with_course(default_course());
        let result = engine.handle_sensor("missing", idle(), 0);
        assert_eq!(
            result,
            Err(EngineError::UnknownPlayer {
                player_id: "missing".to_string()
            })
        );
        assert_eq!(engine.player_count(), 0);
    }

    #[test]
    fn sensor_after_disconnect_is_noop() {
        let mut engine = engine_with_course(default_course());
        let id = start_racer(&mut engine, GameMode::Solo);
        assert!(engine.disconnect(&id));
        assert!(!engine.disconnect(&id));
        assert!(engine.handle_sensor(&id, idle(), 0).is_err());
        assert!(engine.player(&id).is_none());
    }

    #[test]
    fn join_unknown_player_fails() {
        let mut engine = engine_with_course(default_course());
        assert!(engine.join("nobody", "main", GameMode::Multi).is_err());
    }

    #[test]
    fn box_collision_through_full_update() {
        let mut engine = engine_with_course(vec![box_at(-2.0, 5)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        if let Some(player) = engine.players.get_mut(&id) {
            player.view.charge_force = 6.0;
        }

        let outcome = engine
            .handle_sensor(&id, idle(), 100)
            .expect("playing racer accepts telemetry");
        assert_eq!(outcome.obstacle_hits.len(), 1);

        let tuning = engine.tuning.clone();
        let pre_collision_speed = tuning.base_speed + 6.0 * tuning.charge_speed_factor;
        let view = engine.player(&id).expect("player exists");
        assert_eq!(view.points, 5);
        assert_eq!(view.charge_force, 0.0);
        assert!((view.speed - (pre_collision_speed + 6.0 * tuning.boost_factor)).abs() < 1e-4);
    }

    #[test]
    fn box_reactivates_after_delay() {
        let mut engine = engine_with_course(vec![box_at(-2.0, 5)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        engine
            .handle_sensor(&id, idle(), 0)
            .expect("playing racer accepts telemetry");
        assert!(engine.obstacles.get(0).map(|o| o.collided).unwrap_or(false));

        let delay = engine.tuning.box_reactivate_ms;
        assert_eq!(engine.run_due_tasks(delay - 1), 0);
        assert!(engine.obstacles.get(0).map(|o| o.collided).unwrap_or(false));
        assert_eq!(engine.run_due_tasks(delay), 1);
        assert!(!engine.obstacles.get(0).map(|o| o.collided).unwrap_or(true));
        assert_eq!(engine.pending_task_count(), 0);
    }

    #[test]
    fn boost_expires_and_stale_expiry_is_safe() {
        let mut engine = engine_with_course(vec![bonus_at(-2.0)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        engine
            .handle_sensor(&id, idle(), 0)
            .expect("playing racer accepts telemetry");
        assert!(engine.player(&id).map(|p| p.effects.double_speed).unwrap_or(false));

        let boosted = engine
            .handle_sensor(&id, idle(), 10)
            .expect("playing racer accepts telemetry");
        assert!(boosted.obstacle_hits.is_empty());
        let speed = engine.player(&id).map(|p| p.speed).unwrap_or_default();
        let boosted_speed = engine.tuning.base_speed * engine.tuning.boost_speed_multiplier;
        assert!((speed - boosted_speed).abs() < 1e-5);

        let duration = engine.tuning.boost_duration_ms;
        assert_eq!(engine.run_due_tasks(duration), 1);
        assert!(!engine.player(&id).map(|p| p.effects.double_speed).unwrap_or(true));
    }

    #[test]
    fn expiry_for_disconnected_player_is_noop() {
        let mut engine = engine_with_course(vec![bonus_at(-2.0)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        engine
            .handle_sensor(&id, idle(), 0)
            .expect("playing racer accepts telemetry");
        engine.disconnect(&id);

        assert_eq!(engine.run_due_tasks(u64::MAX), 0);
        assert_eq!(engine.pending_task_count(), 0);
        assert!(engine.player(&id).is_none());
    }

    #[test]
    fn older_expiry_does_not_cut_newer_boost_short() {
        let mut engine = engine_with_course(vec![bonus_at(-2.0), bonus_at(-500.0)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        engine
            .handle_sensor(&id, idle(), 0)
            .expect("playing racer accepts telemetry");
        if let Some(player) = engine.players.get_mut(&id) {
            player.view.position.z = -500.0;
        }
        let later = 1_000;
        assert_eq!(engine.resolve_obstacle_collisions(&id, later).len(), 1);

        let duration = engine.tuning.boost_duration_ms;
        assert_eq!(engine.run_due_tasks(duration), 0);
        assert!(engine.player(&id).map(|p| p.effects.double_speed).unwrap_or(false));
        assert_eq!(engine.run_due_tasks(later + duration), 1);
        assert!(!engine.player(&id).map(|p| p.effects.double_speed).unwrap_or(true));
    }

    #[test]
    fn rejoin_resets_state_and_clears_boost() {
        let mut engine = engine_with_course(vec![bonus_at(-2.0)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        engine
            .handle_sensor(&id, idle(), 0)
            .expect("playing racer accepts telemetry");
        engine
            .join(&id, "main", GameMode::Multi)
            .expect("known player can rejoin");

        let view = engine.player(&id).expect("player exists");
        assert_eq!(view.points, 0);
        assert_eq!(view.position, Vec3::default());
        assert!(!view.effects.double_speed);
        assert_eq!(view.mode, GameMode::Multi);
        assert_eq!(engine.run_due_tasks(u64::MAX), 0);
    }

    #[test]
    fn race_finishes_once_and_ignores_later_telemetry() {
        let mut engine = engine_with_course(Vec::new());
        let id = start_racer(&mut engine, GameMode::Multi);
        let max_lap = engine.tuning.max_lap;
        let mut now = 0;
        let mut laps_seen = Vec::new();
        while engine.player(&id).map(|p| p.status) == Some(PlayerStatus::Playing) {
            now += 50;
            let outcome = engine
                .handle_sensor(&id, idle(), now)
                .expect("playing racer accepts telemetry");
            if outcome.lap != LapProgress::None {
                laps_seen.push(engine.player(&id).map(|p| p.lap).unwrap_or_default());
            }
            assert!(now < 10_000_000, "race never finished");
        }
        let expected: Vec<u32> = (1..=max_lap).collect();
        assert_eq!(laps_seen, expected);

        let finished = engine.player(&id).cloned().expect("player exists");
        assert_eq!(finished.finish_time, Some(now));
        assert!(engine.handle_sensor(&id, idle(), now + 50).is_err());
        let after = engine.player(&id).expect("player exists");
        assert_eq!(after.finish_time, Some(now));
        assert_eq!(after.position, finished.position);
        assert_eq!(after.lap, max_lap);
    }

    #[test]
    fn peer_collision_is_counted_per_update() {
        let tuning = RaceTuning {
            base_speed: 0.0,
            ..RaceTuning::default()
        };
        let mut engine = RaceEngine::new(tuning, &[]);
        let a = start_racer(&mut engine, GameMode::Multi);
        let b = start_racer(&mut engine, GameMode::Multi);

        let outcome = engine
            .handle_sensor(&a, idle(), 0)
            .expect("playing racer accepts telemetry");
        assert_eq!(outcome.bumped_players, vec![b.clone()]);
        let gain = engine.tuning.player_collision_charge;
        assert_eq!(engine.player(&a).map(|p| p.charge_force), Some(gain));
        assert_eq!(engine.player(&b).map(|p| p.charge_force), Some(gain));

        let outcome = engine
            .handle_sensor(&b, idle(), 0)
            .expect("playing racer accepts telemetry");
        assert_eq!(outcome.bumped_players, vec![a.clone()]);
        assert_eq!(engine.player(&a).map(|p| p.charge_force), Some(gain * 2.0));
        assert_eq!(engine.player(&b).map(|p| p.charge_force), Some(gain * 2.0));
    }

    #[test]
    fn snapshot_carries_rankings_and_obstacles() {
        let mut engine = engine_with_course(default_course());
        let a = start_racer(&mut engine, GameMode::Multi);
        let b = start_racer(&mut engine, GameMode::Multi);
        let lobby = engine.connect(None);
        if let Some(player) = engine.players.get_mut(&b) {
            player.view.lap = 1;
        }

        let snapshot = engine.build_snapshot();
        assert_eq!(snapshot.max_lap, engine.tuning.max_lap);
        assert_eq!(snapshot.obstacles.len(), default_course().len());
        assert_eq!(snapshot.players.len(), 3);
        assert_eq!(snapshot.rankings[0].player_id, b);
        assert_eq!(snapshot.players[&b].final_rank, Some(1));
        assert_eq!(snapshot.players[&a].final_rank, Some(2));
        assert_eq!(snapshot.players[&lobby].final_rank, None);
        assert_eq!(snapshot.players[&a].total_points, Some(engine.tuning.rank_point_unit));
    }

    #[test]
    fn refresh_rankings_is_idempotent() {
        let mut engine = engine_with_course(Vec::new());
        for _ in 0..4 {
            start_racer(&mut engine, GameMode::Multi);
        }
        let first = engine.refresh_rankings();
        let second = engine.refresh_rankings();
        assert_eq!(first, second);
    }

    #[test]
    fn leaving_multi_clears_rank_fields() {
        let mut engine = engine_with_course(Vec::new());
        let id = start_racer(&mut engine, GameMode::Multi);
        engine.refresh_rankings();
        assert_eq!(engine.player(&id).and_then(|p| p.final_rank), Some(1));

        engine
            .join(&id, "main", GameMode::Solo)
            .expect("known player can rejoin");
        engine.refresh_rankings();
        assert_eq!(engine.player(&id).and_then(|p| p.final_rank), None);
    }

    #[test]
    fn results_include_timestamp() {
        let mut engine = engine_with_course(Vec::new());
        start_racer(&mut engine, GameMode::Multi);
        let results = engine.build_results();
        assert!(results.generated_at_iso.ends_with('Z'));
        assert_eq!(results.rankings.len(), 1);
    }

    #[test]
    fn invariants_hold_under_arbitrary_telemetry() {
        let mut engine = engine_with_course(default_course());
        let ids: Vec<String> = (0..3)
            .map(|_| start_racer(&mut engine, GameMode::Multi))
            .collect();
        let mut rng = crate::rng::Rng::new(42);
        let mut now = 0;
        for _ in 0..5_000 {
            now += 20;
            let id = &ids[rng.pick_index(ids.len())];
            let sample = TelemetrySample {
                roll: rng.range_f32(-400.0, 400.0),
                pitch: rng.range_f32(-90.0, 90.0),
                acceleration_z: rng.range_f32(-40.0, 40.0),
            };
            let lap_before = engine.player(id).map(|p| p.lap).unwrap_or_default();
            let _ = engine.handle_sensor(id, sample, now);
            engine.run_due_tasks(now);

            let tuning = &engine.tuning;
            for other in &ids {
                let view = engine.player(other).expect("player exists");
                assert!(view.charge_force >= 0.0 && view.charge_force <= tuning.charge_max);
                assert!(view.position.x.abs() <= tuning.track_width_x);
                assert!(view.lap <= tuning.max_lap);
            }
            let lap_after = engine.player(id).map(|p| p.lap).unwrap_or_default();
            assert!(lap_after == lap_before || lap_after == lap_before + 1);
        }
    }
}
