use crate::constants::DEFAULT_ROOM;

const MAX_ROOM_LEN: usize = 24;

pub fn normalize_room(raw: Option<&str>) -> String {
    let normalized: String = raw
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .chars()
        .take(MAX_ROOM_LEN)
        .collect();
    if normalized.is_empty() {
        return DEFAULT_ROOM.to_string();
    }
    normalized
}

/// Client-supplied ids come from the upgrade query string; blank ones mean
/// "assign one for me".
pub fn requested_player_id(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.chars().take(64).collect())
}

pub fn player_order_key(player_id: &str) -> u64 {
    player_id
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse::<u64>().ok())
        .unwrap_or(u64::MAX)
}
