//! Status views over the state store.

use serde::{Deserialize, Serialize};

use crate::domain::LifecycleState;

/// Number of tasks per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub active: usize,
    pub waiting: usize,
    pub retrying: usize,
    pub fallback: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn add(&mut self, state: LifecycleState) {
        let slot = match state {
            LifecycleState::Pending => &mut self.pending,
            LifecycleState::Active => &mut self.active,
            LifecycleState::Waiting => &mut self.waiting,
            LifecycleState::Retrying => &mut self.retrying,
            LifecycleState::Fallback => &mut self.fallback,
            LifecycleState::Completed => &mut self.completed,
            LifecycleState::Failed => &mut self.failed,
        };
        *slot += 1;
    }

    /// Tasks that have not reached a terminal state.
    pub fn running(&self) -> usize {
        self.pending + self.active + self.waiting + self.retrying + self.fallback
    }

    pub fn total(&self) -> usize {
        self.running() + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_split_running_and_terminal() {
        let mut counts = StateCounts::default();
        for state in [
            LifecycleState::Waiting,
            LifecycleState::Retrying,
            LifecycleState::Completed,
            LifecycleState::Failed,
            LifecycleState::Failed,
        ] {
            counts.add(state);
        }
        assert_eq!(counts.running(), 2);
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.total(), 5);
    }
}
