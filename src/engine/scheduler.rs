#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskAction {
    ReactivateObstacle { obstacle_id: usize },
    ExpireBoost { player_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledTask {
    pub fire_at_ms: u64,
    pub action: TaskAction,
}

/// Deferred actions keyed by target id rather than captured state. Tasks are
/// never cancelled; whoever runs them must check the target is still there.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn schedule(&mut self, fire_at_ms: u64, action: TaskAction) {
        self.tasks.push(ScheduledTask { fire_at_ms, action });
    }

    /// Removes and returns every task due at `now_ms`, earliest first. Tasks
    /// sharing a fire time keep their scheduling order.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<ScheduledTask> {
        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .tasks
            .drain(..)
            .partition(|task| task.fire_at_ms <= now_ms);
        self.tasks = pending;
        due.sort_by_key(|task| task.fire_at_ms);
        due
    }

    pub fn next_fire_at(&self) -> Option<u64> {
        self.tasks.iter().map(|task| task.fire_at_ms).min()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
