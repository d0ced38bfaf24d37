//! Runtime configuration.
//!
//! Every gameplay constant can be overridden from an optional TOML file:
//!
//! ```toml
//! port = 8080
//!
//! [tuning]
//! max_lap = 5
//! course_length_z = 1500.0
//!
//! [[course]]
//! kind = "box"
//! position = { x = 0.0, z = -120.0 }
//! size = 2.0
//! points = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    default_course, ACCEL_Z_THRESHOLD, BONUS_HIT_RADIUS, BOOST_DURATION_MS, BOOST_FACTOR,
    BOOST_SPEED_MULTIPLIER, BOX_HIT_RADIUS, BOX_REACTIVATE_MS, CHARGE_INCREMENT, CHARGE_MAX,
    CHARGE_SPEED_FACTOR, COURSE_LENGTH_Z, LATERAL_GAIN, MAX_LAP, PLAYER_BASE_SPEED,
    PLAYER_COLLISION_CHARGE, PLAYER_COLLISION_PENALTY, PLAYER_COLLISION_RADIUS, RANK_POINT_UNIT,
    TRACK_WIDTH_X,
};
use crate::types::{ObstacleKind, ObstacleSpec};

/// Upper bound for configured timer durations (one hour).
pub const MAX_TIMER_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Gameplay parameters, process-wide for the lifetime of the server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RaceTuning {
    pub max_lap: u32,
    pub course_length_z: f32,
    pub track_width_x: f32,
    pub charge_max: f32,
    pub charge_increment: f32,
    pub accel_z_threshold: f32,
    pub lateral_gain: f32,
    pub base_speed: f32,
    pub charge_speed_factor: f32,
    pub boost_factor: f32,
    pub boost_speed_multiplier: f32,
    pub boost_duration_ms: u64,
    pub box_hit_radius: f32,
    pub bonus_hit_radius: f32,
    pub box_reactivate_ms: u64,
    pub player_collision_radius: f32,
    pub player_collision_charge: f32,
    pub player_collision_penalty: f32,
    pub rank_point_unit: i32,
}

impl Default for RaceTuning {
    fn default() -> Self {
        Self {
            max_lap: MAX_LAP,
            course_length_z: COURSE_LENGTH_Z,
            track_width_x: TRACK_WIDTH_X,
            charge_max: CHARGE_MAX,
            charge_increment: CHARGE_INCREMENT,
            accel_z_threshold: ACCEL_Z_THRESHOLD,
            lateral_gain: LATERAL_GAIN,
            base_speed: PLAYER_BASE_SPEED,
            charge_speed_factor: CHARGE_SPEED_FACTOR,
            boost_factor: BOOST_FACTOR,
            boost_speed_multiplier: BOOST_SPEED_MULTIPLIER,
            boost_duration_ms: BOOST_DURATION_MS,
            box_hit_radius: BOX_HIT_RADIUS,
            bonus_hit_radius: BONUS_HIT_RADIUS,
            box_reactivate_ms: BOX_REACTIVATE_MS,
            player_collision_radius: PLAYER_COLLISION_RADIUS,
            player_collision_charge: PLAYER_COLLISION_CHARGE,
            player_collision_penalty: PLAYER_COLLISION_PENALTY,
            rank_point_unit: RANK_POINT_UNIT,
        }
    }
}

impl RaceTuning {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_lap == 0 {
            return Err(ConfigError::Invalid("max_lap must be at least 1".to_string()));
        }
        let positive = [
            ("course_length_z", self.course_length_z),
            ("track_width_x", self.track_width_x),
            ("charge_max", self.charge_max),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        let non_negative = [
            ("charge_increment", self.charge_increment),
            ("accel_z_threshold", self.accel_z_threshold),
            ("base_speed", self.base_speed),
            ("charge_speed_factor", self.charge_speed_factor),
            ("boost_factor", self.boost_factor),
            ("box_hit_radius", self.box_hit_radius),
            ("bonus_hit_radius", self.bonus_hit_radius),
            ("player_collision_radius", self.player_collision_radius),
            ("player_collision_charge", self.player_collision_charge),
            ("player_collision_penalty", self.player_collision_penalty),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must not be negative")));
            }
        }
        if self.rank_point_unit < 0 {
            return Err(ConfigError::Invalid(
                "rank_point_unit must not be negative".to_string(),
            ));
        }
        let durations = [
            ("box_reactivate_ms", self.box_reactivate_ms),
            ("boost_duration_ms", self.boost_duration_ms),
        ];
        for (name, value) in durations {
            if value > MAX_TIMER_MS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_TIMER_MS}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub tuning: RaceTuning,
    pub course: Vec<ObstacleSpec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: None,
            tuning: RaceTuning::default(),
            course: default_course(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    pub fn parse(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tuning.validate()?;
        for (index, spec) in self.course.iter().enumerate() {
            if !spec.size.is_finite() || spec.size < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "course[{index}] size must not be negative"
                )));
            }
            if spec.points < 0 {
                return Err(ConfigError::Invalid(format!(
                    "course[{index}] points must not be negative"
                )));
            }
            if spec.kind == ObstacleKind::Bonus && spec.effect.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "course[{index}] bonus obstacle needs an effect"
                )));
            }
        }
        Ok(())
    }
}
