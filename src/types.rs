use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Lobby,
    Playing,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    None,
    Solo,
    Multi,
}

impl GameMode {
    /// Only the selectable modes parse; `none` is the pre-join state.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "solo" => Some(Self::Solo),
            "multi" => Some(Self::Multi),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    Box,
    Bonus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleEffect {
    DoubleSpeed,
}

/// Static course entry, either built in or read from the config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSpec {
    pub kind: ObstacleKind,
    pub position: Vec3,
    pub size: f32,
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub effect: Option<ObstacleEffect>,
}

/// One device-motion reading. Missing or non-numeric fields arrive as 0.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TelemetrySample {
    pub roll: f32,
    pub pitch: f32,
    pub acceleration_z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlayerEffects {
    #[serde(rename = "doubleSpeed")]
    pub double_speed: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    pub id: String,
    pub position: Vec3,
    pub speed: f32,
    #[serde(rename = "baseSpeed")]
    pub base_speed: f32,
    #[serde(rename = "chargeForce")]
    pub charge_force: f32,
    pub points: i32,
    pub lap: u32,
    pub status: PlayerStatus,
    pub mode: GameMode,
    pub effects: PlayerEffects,
    #[serde(rename = "finishTime")]
    pub finish_time: Option<u64>,
    #[serde(rename = "finalRank")]
    pub final_rank: Option<u32>,
    #[serde(rename = "totalPoints")]
    pub total_points: Option<i32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ObstacleView {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: ObstacleKind,
    pub position: Vec3,
    pub size: f32,
    pub points: i32,
    pub effect: Option<ObstacleEffect>,
    pub collided: bool,
    #[serde(rename = "reactivateAtMs")]
    pub reactivate_at_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankingEntry {
    #[serde(rename = "playerId")]
    pub player_id: String,
    #[serde(rename = "finalRank")]
    pub final_rank: u32,
    #[serde(rename = "totalPoints")]
    pub total_points: i32,
    pub points: i32,
    pub lap: u32,
    pub finished: bool,
    #[serde(rename = "finishTime")]
    pub finish_time: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub players: BTreeMap<String, PlayerView>,
    pub obstacles: Vec<ObstacleView>,
    #[serde(rename = "maxLap")]
    pub max_lap: u32,
    pub rankings: Vec<RankingEntry>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RaceResults {
    #[serde(rename = "generatedAtIso")]
    pub generated_at_iso: String,
    #[serde(rename = "maxLap")]
    pub max_lap: u32,
    pub rankings: Vec<RankingEntry>,
}
