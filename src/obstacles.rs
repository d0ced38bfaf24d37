use crate::config::RaceTuning;
use crate::types::{ObstacleEffect, ObstacleKind, ObstacleSpec, ObstacleView, Vec3};

#[derive(Clone, Debug)]
pub struct Obstacle {
    pub id: usize,
    pub kind: ObstacleKind,
    pub position: Vec3,
    pub size: f32,
    pub points: i32,
    pub effect: Option<ObstacleEffect>,
    pub collided: bool,
    pub reactivate_at_ms: Option<u64>,
}

impl Obstacle {
    pub fn hit_radius(&self, tuning: &RaceTuning) -> f32 {
        let base = match self.kind {
            ObstacleKind::Box => tuning.box_hit_radius,
            ObstacleKind::Bonus => tuning.bonus_hit_radius,
        };
        base + self.size / 2.0
    }

    fn view(&self) -> ObstacleView {
        ObstacleView {
            id: self.id,
            kind: self.kind,
            position: self.position,
            size: self.size,
            points: self.points,
            effect: self.effect,
            collided: self.collided,
            reactivate_at_ms: self.reactivate_at_ms,
        }
    }
}

/// Course hazards and bonuses. Built once; only the collision flags change.
///
/// `collided` is shared by every racer: the first player whose update reaches
/// an available obstacle claims it for everyone.
#[derive(Clone, Debug, Default)]
pub struct ObstacleRegistry {
    obstacles: Vec<Obstacle>,
}

impl ObstacleRegistry {
    pub fn new(course: &[ObstacleSpec]) -> Self {
        let obstacles = course
            .iter()
            .enumerate()
            .map(|(id, spec)| Obstacle {
                id,
                kind: spec.kind,
                position: spec.position,
                size: spec.size,
                points: spec.points,
                effect: spec.effect,
                collided: false,
                reactivate_at_ms: None,
            })
            .collect();
        Self { obstacles }
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Obstacle> {
        self.obstacles.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles.iter()
    }

    /// Ids of obstacles still able to trigger, in course order.
    pub fn available_ids(&self) -> Vec<usize> {
        self.obstacles
            .iter()
            .filter(|obstacle| !obstacle.collided)
            .map(|obstacle| obstacle.id)
            .collect()
    }

    /// Marks the obstacle as collided. Returns `false` when it was already
    /// claimed or does not exist, so at most one caller wins.
    pub fn claim(&mut self, id: usize, reactivate_at_ms: Option<u64>) -> bool {
        let Some(obstacle) = self.obstacles.get_mut(id) else {
            return false;
        };
        if obstacle.collided {
            return false;
        }
        obstacle.collided = true;
        obstacle.reactivate_at_ms = reactivate_at_ms;
        true
    }

    /// Clears the collided flag. No-op for unknown ids, obstacles that are
    /// already available, and bonus obstacles which never come back.
    pub fn reactivate(&mut self, id: usize) -> bool {
        let Some(obstacle) = self.obstacles.get_mut(id) else {
            return false;
        };
        if !obstacle.collided || obstacle.kind == ObstacleKind::Bonus {
            return false;
        }
        obstacle.collided = false;
        obstacle.reactivate_at_ms = None;
        true
    }

    pub fn views(&self) -> Vec<ObstacleView> {
        self.obstacles.iter().map(Obstacle::view).collect()
    }
}
