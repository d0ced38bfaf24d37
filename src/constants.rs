use crate::types::{ObstacleEffect, ObstacleKind, ObstacleSpec, Vec3};

pub const TICK_RATE: u32 = 20;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

pub const MAX_LAP: u32 = 3;
pub const COURSE_LENGTH_Z: f32 = 1_000.0;
pub const TRACK_WIDTH_X: f32 = 8.0;

pub const CHARGE_MAX: f32 = 10.0;
pub const CHARGE_INCREMENT: f32 = 1.0;
pub const ACCEL_Z_THRESHOLD: f32 = 15.0;
pub const LATERAL_GAIN: f32 = 0.02;

pub const PLAYER_BASE_SPEED: f32 = 2.0;
pub const CHARGE_SPEED_FACTOR: f32 = 0.2;
pub const BOOST_FACTOR: f32 = 1.5;
pub const BOOST_SPEED_MULTIPLIER: f32 = 2.0;
pub const BOOST_DURATION_MS: u64 = 3_000;

pub const BOX_HIT_RADIUS: f32 = 1.0;
pub const BONUS_HIT_RADIUS: f32 = 1.2;
pub const BONUS_POINTS: i32 = 20;
pub const BOX_REACTIVATE_MS: u64 = 3_000;

pub const PLAYER_COLLISION_RADIUS: f32 = 1.5;
pub const PLAYER_COLLISION_CHARGE: f32 = 2.0;
pub const PLAYER_COLLISION_PENALTY: f32 = 0.5;

pub const RANK_POINT_UNIT: i32 = 10;

pub const DEFAULT_ROOM: &str = "main";

fn box_at(x: f32, z: f32, size: f32, points: i32) -> ObstacleSpec {
    ObstacleSpec {
        kind: ObstacleKind::Box,
        position: Vec3 { x, y: 0.0, z },
        size,
        points,
        effect: None,
    }
}

fn bonus_at(x: f32, z: f32) -> ObstacleSpec {
    ObstacleSpec {
        kind: ObstacleKind::Bonus,
        position: Vec3 { x, y: 0.0, z },
        size: 1.0,
        points: BONUS_POINTS,
        effect: Some(ObstacleEffect::DoubleSpeed),
    }
}

/// Course used when the config file does not list obstacles.
pub fn default_course() -> Vec<ObstacleSpec> {
    vec![
        box_at(0.0, -80.0, 2.0, 5),
        box_at(-4.0, -160.0, 2.0, 5),
        box_at(4.0, -240.0, 2.0, 5),
        bonus_at(0.0, -320.0),
        box_at(-6.0, -400.0, 3.0, 10),
        box_at(6.0, -400.0, 3.0, 10),
        box_at(0.0, -520.0, 4.0, 15),
        bonus_at(-5.0, -600.0),
        box_at(2.0, -700.0, 2.0, 5),
        box_at(-2.0, -780.0, 2.0, 5),
        bonus_at(5.0, -860.0),
        box_at(0.0, -940.0, 5.0, 20),
    ]
}
