use super::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LapProgress {
    #[default]
    None,
    LapCompleted,
    Finished,
}

impl RaceEngine {
    /// Wraps `z` by one course length when the player passes the end of the
    /// course, keeping the overshoot.
    pub(super) fn check_lap(&mut self, player_id: &str, now_ms: u64) -> LapProgress {
        let course_length = self.tuning.course_length_z;
        let max_lap = self.tuning.max_lap;
        let Some(player) = self.players.get_mut(player_id) else {
            return LapProgress::None;
        };
        let view = &mut player.view;
        if view.position.z >= -course_length {
            return LapProgress::None;
        }

        view.lap += 1;
        view.position.z += course_length;
        if view.lap < max_lap {
            return LapProgress::LapCompleted;
        }

        view.status = PlayerStatus::Finished;
        if view.finish_time.is_none() {
            view.finish_time = Some(now_ms);
        }
        LapProgress::Finished
    }
}
