use thiserror::Error;

use crate::types::PlayerStatus;

/// Reasons an event was skipped. Returning one never leaves partial state
/// behind; callers are free to log and carry on.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown player: {player_id}")]
    UnknownPlayer { player_id: String },

    #[error("player {player_id} is not racing (status {status:?})")]
    NotPlaying {
        player_id: String,
        status: PlayerStatus,
    },
}
