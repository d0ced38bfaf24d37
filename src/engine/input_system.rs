use super::*;

impl RaceEngine {
    /// Charge, steering and forward motion for one telemetry sample.
    pub(super) fn apply_telemetry(&mut self, player_id: &str, sample: &TelemetrySample) {
        let tuning = &self.tuning;
        let Some(player) = self.players.get_mut(player_id) else {
            return;
        };
        let roll = finite_or_zero(sample.roll);
        let acceleration_z = finite_or_zero(sample.acceleration_z);
        let view = &mut player.view;

        if acceleration_z.abs() > tuning.accel_z_threshold {
            view.charge_force =
                (view.charge_force + tuning.charge_increment).min(tuning.charge_max);
        }

        view.position.x = (view.position.x + roll * tuning.lateral_gain)
            .clamp(-tuning.track_width_x, tuning.track_width_x);

        // The bonus boost replaces the charge term while it lasts.
        view.speed = if view.effects.double_speed {
            view.base_speed * tuning.boost_speed_multiplier
        } else {
            view.base_speed + view.charge_force * tuning.charge_speed_factor
        };
        view.position.z -= view.speed;
    }
}
