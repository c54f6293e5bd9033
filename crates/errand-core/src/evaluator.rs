//! Condition Evaluator.
//!
//! Snapshot-based triggers are decided locally from `snapshot_target`; every
//! other trigger is handed to the environment's `check_condition`. Both paths
//! are read-only and never take actor locks.

use crate::domain::Condition;
use crate::ports::{EnvError, EnvironmentContext};

pub async fn evaluate(
    condition: &Condition,
    env: &dyn EnvironmentContext,
) -> Result<bool, EnvError> {
    if !condition.trigger_type.is_snapshot_based() {
        return env.check_condition(condition).await;
    }
    let snapshot = env.snapshot_target(&condition.target).await?;
    // Handlers check step conditions first (`condition_param`), so this only
    // fires for callers that skip that check.
    condition
        .evaluate_snapshot(&snapshot)
        .map_err(|e| EnvError::Rejected(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TargetSnapshot, TriggerType};
    use crate::impls::InMemoryEnvironment;

    #[tokio::test]
    async fn snapshot_triggers_use_the_target_snapshot() {
        let env = InMemoryEnvironment::new();
        env.put_target(TargetSnapshot::new("gate", 1.0).with_flag("open"))
            .await;

        let open = Condition::new(TriggerType::FlagSet, "gate").with_param("flag", "open");
        assert!(evaluate(&open, &env).await.unwrap());

        let closed = Condition::new(TriggerType::FlagCleared, "gate").with_param("flag", "open");
        assert!(!evaluate(&closed, &env).await.unwrap());
    }

    #[tokio::test]
    async fn delegated_triggers_go_to_check_condition() {
        let env = InMemoryEnvironment::new();
        let dialog = Condition::new(TriggerType::External("dialog_finished".into()), "elder");
        assert!(!evaluate(&dialog, &env).await.unwrap());

        env.set_condition(&dialog, true).await;
        assert!(evaluate(&dialog, &env).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_targets_surface_as_environment_errors() {
        let env = InMemoryEnvironment::new();
        let condition =
            Condition::new(TriggerType::StateAtLeast, "nobody").with_param("threshold", 0.5);
        assert!(evaluate(&condition, &env).await.is_err());
    }

    #[tokio::test]
    async fn malformed_runtime_conditions_are_rejected() {
        let env = InMemoryEnvironment::new();
        env.put_target(TargetSnapshot::new("gate", 1.0)).await;
        let condition = Condition::new(TriggerType::StateAtLeast, "gate");
        assert!(matches!(
            evaluate(&condition, &env).await,
            Err(EnvError::Rejected(_))
        ));
    }
}
