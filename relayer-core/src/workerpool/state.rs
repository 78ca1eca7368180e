/// Lifecycle state of a [`super::WorkerPool`].
///
/// `Idle -> Running` on start, `Running -> Stopping` on stop, and back to
/// `Idle` once every worker has exited. A pool whose job channel closes on its
/// own goes straight from `Running` to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolState {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Idle => "idle",
            PoolState::Running => "running",
            PoolState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
