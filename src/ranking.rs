use std::cmp::Ordering;

use crate::types::{GameMode, PlayerStatus, PlayerView, RankingEntry};

/// Orders multiplayer racers that have left the lobby.
///
/// Finished racers come first by finish time, then unfinished racers by lap
/// (descending) and `z` (ascending, since progress runs toward negative z).
/// Remaining ties fall back to the player id so repeated passes agree.
pub fn compute_rankings<'a, I>(players: I, rank_point_unit: i32) -> Vec<RankingEntry>
where
    I: IntoIterator<Item = &'a PlayerView>,
{
    let mut participants: Vec<&PlayerView> = players
        .into_iter()
        .filter(|player| player.mode == GameMode::Multi && player.status != PlayerStatus::Lobby)
        .collect();
    participants.sort_by(|a, b| compare_progress(a, b));

    let count = participants.len() as i32;
    participants
        .into_iter()
        .enumerate()
        .map(|(index, player)| {
            let index = index as i32;
            RankingEntry {
                player_id: player.id.clone(),
                final_rank: (index + 1) as u32,
                total_points: player.points + (count - index) * rank_point_unit,
                points: player.points,
                lap: player.lap,
                finished: player.status == PlayerStatus::Finished,
                finish_time: player.finish_time,
            }
        })
        .collect()
}

fn compare_progress(a: &PlayerView, b: &PlayerView) -> Ordering {
    let a_finished = a.status == PlayerStatus::Finished;
    let b_finished = b.status == PlayerStatus::Finished;
    let by_progress = match (a_finished, b_finished) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a
            .finish_time
            .unwrap_or(u64::MAX)
            .cmp(&b.finish_time.unwrap_or(u64::MAX)),
        (false, false) => b.lap.cmp(&a.lap).then_with(|| {
            a.position
                .z
                .partial_cmp(&b.position.z)
                .unwrap_or(Ordering::Equal)
        }),
    };
    by_progress.then_with(|| a.id.cmp(&b.id))
}
