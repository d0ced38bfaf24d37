use super::*;

#[derive(Clone, Debug, PartialEq)]
pub struct ObstacleHit {
    pub obstacle_id: usize,
    pub kind: ObstacleKind,
    pub points_awarded: i32,
    pub boost_gained: f32,
}

impl RaceEngine {
    /// Checks the player against every available obstacle. The first player
    /// to reach an obstacle claims it for everyone until it reactivates.
    pub(super) fn resolve_obstacle_collisions(
        &mut self,
        player_id: &str,
        now_ms: u64,
    ) -> Vec<ObstacleHit> {
        let Some(player) = self.players.get(player_id) else {
            return Vec::new();
        };
        let (px, pz) = (player.view.position.x, player.view.position.z);
        let mut hits = Vec::new();

        for obstacle_id in self.obstacles.available_ids() {
            let Some(obstacle) = self.obstacles.get(obstacle_id) else {
                continue;
            };
            let distance = planar_distance(px, pz, obstacle.position.x, obstacle.position.z);
            if distance >= obstacle.hit_radius(&self.tuning) {
                continue;
            }
            let kind = obstacle.kind;
            let points = obstacle.points;
            let effect = obstacle.effect;

            let reactivate_at_ms = match kind {
                ObstacleKind::Box => Some(now_ms.saturating_add(self.tuning.box_reactivate_ms)),
                ObstacleKind::Bonus => None,
            };
            if !self.obstacles.claim(obstacle_id, reactivate_at_ms) {
                continue;
            }
            if let Some(fire_at_ms) = reactivate_at_ms {
                self.scheduler
                    .schedule(fire_at_ms, TaskAction::ReactivateObstacle { obstacle_id });
            }

            let Some(player) = self.players.get_mut(player_id) else {
                break;
            };
            let view = &mut player.view;
            let boost_gained = view.charge_force * self.tuning.boost_factor;
            view.speed += boost_gained;
            view.charge_force = 0.0;
            view.points += points;

            if kind == ObstacleKind::Bonus && effect == Some(ObstacleEffect::DoubleSpeed) {
                let expires_at_ms = now_ms.saturating_add(self.tuning.boost_duration_ms);
                view.effects.double_speed = true;
                player.boost_until_ms = player.boost_until_ms.max(expires_at_ms);
                self.scheduler.schedule(
                    expires_at_ms,
                    TaskAction::ExpireBoost {
                        player_id: player_id.to_string(),
                    },
                );
            }

            debug!(
                player_id,
                obstacle_id,
                ?kind,
                points,
                boost_gained,
                "obstacle collision"
            );
            hits.push(ObstacleHit {
                obstacle_id,
                kind,
                points_awarded: points,
                boost_gained,
            });
        }
        hits
    }

    /// Bumps between multiplayer racers, evaluated from the updating player's
    /// side only. The other racer registers the same encounter on its own
    /// update if the two are still close then.
    pub(super) fn resolve_player_collisions(&mut self, player_id: &str) -> Vec<String> {
        let Some(me) = self.players.get(player_id) else {
            return Vec::new();
        };
        if !me.is_racing_multi() {
            return Vec::new();
        }
        let (px, pz) = (me.view.position.x, me.view.position.z);
        let radius = self.tuning.player_collision_radius;

        let bumped: Vec<String> = self
            .players
            .iter()
            .filter(|other| other.id() != player_id && other.is_racing_multi())
            .filter(|other| {
                planar_distance(px, pz, other.view.position.x, other.view.position.z) < radius
            })
            .map(|other| other.id().to_string())
            .collect();

        let gain = self.tuning.player_collision_charge;
        let charge_max = self.tuning.charge_max;
        let penalty = self.tuning.player_collision_penalty;
        for other_id in &bumped {
            if let Some(other) = self.players.get_mut(other_id) {
                other.view.charge_force = (other.view.charge_force + gain).min(charge_max);
            }
            if let Some(me) = self.players.get_mut(player_id) {
                me.view.charge_force = (me.view.charge_force + gain).min(charge_max);
                me.view.speed *= penalty;
            }
            debug!(player_id, other_id = %other_id, "player collision");
        }
        bumped
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine_with_course, start_racer};
    use super::*;
    use crate::types::{ObstacleSpec, Vec3};

    fn box_spec(x: f32, z: f32, size: f32, points: i32) -> ObstacleSpec {
        ObstacleSpec {
            kind: ObstacleKind::Box,
            position: Vec3 { x, y: 0.0, z },
            size,
            points,
            effect: None,
        }
    }

    fn bonus_spec(x: f32, z: f32) -> ObstacleSpec {
        ObstacleSpec {
            kind: ObstacleKind::Bonus,
            position: Vec3 { x, y: 0.0, z },
            size: 1.0,
            points: 20,
            effect: Some(ObstacleEffect::DoubleSpeed),
        }
    }

    fn place(engine: &mut RaceEngine, id: &str, x: f32, z: f32) {
        if let Some(player) = engine.players.get_mut(id) {
            player.view.position.x = x;
            player.view.position.z = z;
        }
    }

    #[test]
    fn box_hit_converts_charge_and_awards_points() {
        let mut engine = engine_with_course(vec![box_spec(0.0, -10.0, 2.0, 5)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        place(&mut engine, &id, 0.0, -10.5);
        if let Some(player) = engine.players.get_mut(&id) {
            player.view.charge_force = 6.0;
            player.view.speed = 3.0;
        }

        let hits = engine.resolve_obstacle_collisions(&id, 1_000);
        assert_eq!(hits.len(), 1);
        let view = engine.player(&id).expect("player exists");
        assert_eq!(view.points, 5);
        assert_eq!(view.charge_force, 0.0);
        assert!((view.speed - (3.0 + 6.0 * engine.tuning.boost_factor)).abs() < 1e-5);

        let obstacle = engine.obstacles.get(0).expect("obstacle exists");
        assert!(obstacle.collided);
        assert_eq!(
            obstacle.reactivate_at_ms,
            Some(1_000 + engine.tuning.box_reactivate_ms)
        );
    }

    #[test]
    fn distance_at_threshold_does_not_trigger() {
        let mut engine = engine_with_course(vec![box_spec(0.0, -10.0, 2.0, 5)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        let threshold = engine.tuning.box_hit_radius + 1.0;
        place(&mut engine, &id, threshold, -10.0);
        assert!(engine.resolve_obstacle_collisions(&id, 0).is_empty());
    }

    #[test]
    fn claimed_obstacle_blocks_other_players() {
        let mut engine = engine_with_course(vec![box_spec(0.0, -10.0, 2.0, 5)]);
        let first = start_racer(&mut engine, GameMode::Multi);
        let second = start_racer(&mut engine, GameMode::Multi);
        place(&mut engine, &first, 0.0, -10.0);
        place(&mut engine, &second, 0.5, -10.0);

        assert_eq!(engine.resolve_obstacle_collisions(&first, 0).len(), 1);
        assert!(engine.resolve_obstacle_collisions(&second, 0).is_empty());
        assert!(engine.resolve_obstacle_collisions(&first, 10).is_empty());
        assert_eq!(engine.player(&second).map(|p| p.points), Some(0));
    }

    #[test]
    fn bonus_grants_boost_and_schedules_expiry_only() {
        let mut engine = engine_with_course(vec![bonus_spec(0.0, -20.0)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        place(&mut engine, &id, 0.0, -20.0);

        let hits = engine.resolve_obstacle_collisions(&id, 500);
        assert_eq!(hits[0].kind, ObstacleKind::Bonus);
        let view = engine.player(&id).expect("player exists");
        assert!(view.effects.double_speed);
        assert_eq!(view.points, 20);
        assert_eq!(engine.scheduler.len(), 1);
        assert_eq!(
            engine.scheduler.next_fire_at(),
            Some(500 + engine.tuning.boost_duration_ms)
        );
        assert_eq!(engine.obstacles.get(0).and_then(|o| o.reactivate_at_ms), None);
    }

    #[test]
    fn several_hits_in_one_update_drain_charge_once() {
        let mut engine = engine_with_course(vec![
            box_spec(0.0, -10.0, 2.0, 5),
            box_spec(0.5, -10.0, 2.0, 7),
        ]);
        let id = start_racer(&mut engine, GameMode::Solo);
        place(&mut engine, &id, 0.0, -10.0);
        if let Some(player) = engine.players.get_mut(&id) {
            player.view.charge_force = 4.0;
        }

        let hits = engine.resolve_obstacle_collisions(&id, 0);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].boost_gained > 0.0);
        assert_eq!(hits[1].boost_gained, 0.0);
        assert_eq!(engine.player(&id).map(|p| p.points), Some(12));
    }

    #[test]
    fn huge_timer_durations_saturate_instead_of_overflowing() {
        let tuning = RaceTuning {
            box_reactivate_ms: u64::MAX,
            boost_duration_ms: u64::MAX,
            ..RaceTuning::default()
        };
        let mut engine =
            RaceEngine::new(tuning, &[box_spec(0.0, -10.0, 2.0, 5), bonus_spec(0.0, -10.0)]);
        let id = start_racer(&mut engine, GameMode::Solo);
        place(&mut engine, &id, 0.0, -10.0);

        let hits = engine.resolve_obstacle_collisions(&id, 1_000);
        assert_eq!(hits.len(), 2);
        assert_eq!(
            engine.obstacles.get(0).and_then(|o| o.reactivate_at_ms),
            Some(u64::MAX)
        );
        assert_eq!(engine.scheduler.next_fire_at(), Some(u64::MAX));
    }

    #[test]
    fn player_bump_charges_both_and_slows_updater() {
        let mut engine = engine_with_course(Vec::new());
        let me = start_racer(&mut engine, GameMode::Multi);
        let other = start_racer(&mut engine, GameMode::Multi);
        place(&mut engine, &me, 0.0, -50.0);
        place(&mut engine, &other, 0.5, -50.5);
        if let Some(player) = engine.players.get_mut(&me) {
            player.view.speed = 4.0;
        }

        let bumped = engine.resolve_player_collisions(&me);
        assert_eq!(bumped, vec![other.clone()]);
        let gain = engine.tuning.player_collision_charge;
        assert_eq!(engine.player(&me).map(|p| p.charge_force), Some(gain));
        assert_eq!(engine.player(&other).map(|p| p.charge_force), Some(gain));
        let speed = engine.player(&me).map(|p| p.speed).unwrap_or_default();
        assert!((speed - 4.0 * engine.tuning.player_collision_penalty).abs() < 1e-5);
        assert_eq!(engine.player(&other).map(|p| p.speed), Some(0.0));
    }

    #[test]
    fn player_bump_respects_charge_cap() {
        let mut engine = engine_with_course(Vec::new());
        let me = start_racer(&mut engine, GameMode::Multi);
        let other = start_racer(&mut engine, GameMode::Multi);
        let cap = engine.tuning.charge_max;
        for id in [&me, &other] {
            if let Some(player) = engine.players.get_mut(id) {
                player.view.charge_force = cap - 0.5;
            }
        }
        engine.resolve_player_collisions(&me);
        assert_eq!(engine.player(&me).map(|p| p.charge_force), Some(cap));
        assert_eq!(engine.player(&other).map(|p| p.charge_force), Some(cap));
    }

    #[test]
    fn solo_and_finished_players_are_not_bumped() {
        let mut engine = engine_with_course(Vec::new());
        let me = start_racer(&mut engine, GameMode::Multi);
        let solo = start_racer(&mut engine, GameMode::Solo);
        let finished = start_racer(&mut engine, GameMode::Multi);
        if let Some(player) = engine.players.get_mut(&finished) {
            player.view.status = PlayerStatus::Finished;
        }

        assert!(engine.resolve_player_collisions(&me).is_empty());
        assert!(engine.resolve_player_collisions(&solo).is_empty());
        assert_eq!(engine.player(&solo).map(|p| p.charge_force), Some(0.0));
        assert_eq!(engine.player(&finished).map(|p| p.charge_force), Some(0.0));
    }

    #[test]
    fn distant_players_do_not_bump() {
        let mut engine = engine_with_course(Vec::new());
        let me = start_racer(&mut engine, GameMode::Multi);
        let other = start_racer(&mut engine, GameMode::Multi);
        let radius = engine.tuning.player_collision_radius;
        place(&mut engine, &other, radius, 0.0);
        assert!(engine.resolve_player_collisions(&me).is_empty());
    }
}
