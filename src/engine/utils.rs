use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    now as u64
}

/// Distance on the ground plane; height is ignored.
pub(super) fn planar_distance(ax: f32, az: f32, bx: f32, bz: f32) -> f32 {
    (ax - bx).hypot(az - bz)
}

pub(super) fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
