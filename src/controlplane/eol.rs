//! Platform end-of-life gate
//!
//! Flags the operator as not upgradeable because oVirt support is going
//! away. The flag is written once and never retracted.

use crate::controlplane::conditions::{has_condition_status, set_condition};
use crate::controlplane::retry::{retry_on_conflict, ConflictRetry};
use crate::crd::ConditionStatus;
use crate::domain::ports::OperatorStatusStoreRef;
use crate::error::Result;
use tracing::{debug, info, instrument};

pub const EOL_CONDITION_TYPE: &str = "OvirtEOLControllerUpgradeable";
pub const EOL_REASON: &str = "EOL";
pub const EOL_MESSAGE: &str = "oVirt is no longer supported and will be removed in a future release";

/// Whether the upgrade block is present on the operator status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolState {
    NotFlagged,
    Flagged,
}

/// Marks the ClusterCSIDriver as not upgradeable
pub struct EolController {
    status: OperatorStatusStoreRef,
    conflict_retry: ConflictRetry,
}

impl EolController {
    pub const NAME: &'static str = "OvirtEOLController";

    pub fn new(status: OperatorStatusStoreRef) -> Self {
        Self {
            status,
            conflict_retry: ConflictRetry::default(),
        }
    }

    pub fn with_conflict_retry(mut self, conflict_retry: ConflictRetry) -> Self {
        self.conflict_retry = conflict_retry;
        self
    }

    #[instrument(skip(self), fields(controller = Self::NAME))]
    pub async fn sync(&self) -> Result<EolState> {
        let status = &self.status;
        retry_on_conflict(&self.conflict_retry, "flag end of life", move || async move {
            let Some(driver) = status.get().await? else {
                info!(
                    name = crate::crd::INSTANCE_NAME,
                    "No ClusterCSIDriver found, nothing to flag"
                );
                return Ok(EolState::NotFlagged);
            };

            let mut conditions = driver.conditions().to_vec();
            if has_condition_status(&conditions, EOL_CONDITION_TYPE, ConditionStatus::False) {
                debug!("Operator already flagged as not upgradeable");
                return Ok(EolState::Flagged);
            }

            set_condition(
                &mut conditions,
                EOL_CONDITION_TYPE,
                ConditionStatus::False,
                EOL_REASON,
                EOL_MESSAGE,
            );
            status.write_conditions(&driver, conditions).await?;
            info!("Flagged operator as not upgradeable due to oVirt end of life");
            Ok(EolState::Flagged)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::conditions::find_condition;
    use crate::crd::{ManagementState, OperatorCondition};
    use crate::error::Error;
    use crate::testutil::FakeCluster;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn controller(cluster: &std::sync::Arc<FakeCluster>) -> EolController {
        EolController::new(cluster.clone()).with_conflict_retry(ConflictRetry {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
    }

    #[tokio::test]
    async fn test_absent_driver_is_a_no_op() {
        let cluster = FakeCluster::new();

        assert_eq!(controller(&cluster).sync().await.unwrap(), EolState::NotFlagged);
        assert_eq!(cluster.write_count(), 0);
    }

    #[tokio::test]
    async fn test_flags_once_and_keeps_other_conditions() {
        let cluster = FakeCluster::new();
        cluster.set_driver(Some(ManagementState::Managed));
        cluster.set_conditions(vec![OperatorCondition::new(
            "Available",
            ConditionStatus::True,
            "AsExpected",
            "",
        )]);

        assert_eq!(controller(&cluster).sync().await.unwrap(), EolState::Flagged);

        let conditions = cluster.conditions();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, "Available");
        let eol = find_condition(&conditions, EOL_CONDITION_TYPE).unwrap();
        assert_eq!(eol.status, ConditionStatus::False);
        assert_eq!(eol.reason.as_deref(), Some("EOL"));
        assert_eq!(eol.message.as_deref(), Some(EOL_MESSAGE));
        assert!(eol.last_transition_time.is_some());
    }

    #[tokio::test]
    async fn test_repeated_syncs_leave_status_untouched() {
        let cluster = FakeCluster::new();
        cluster.set_driver(None);
        let eol = controller(&cluster);

        eol.sync().await.unwrap();
        let flagged = cluster.conditions();

        for _ in 0..3 {
            assert_eq!(eol.sync().await.unwrap(), EolState::Flagged);
        }
        assert_eq!(cluster.conditions(), flagged);
        assert_eq!(cluster.write_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_flag_means_no_write() {
        let cluster = FakeCluster::new();
        cluster.set_driver(None);
        cluster.set_conditions(vec![OperatorCondition::new(
            EOL_CONDITION_TYPE,
            ConditionStatus::False,
            "SomethingElse",
            "set by hand",
        )]);

        assert_eq!(controller(&cluster).sync().await.unwrap(), EolState::Flagged);
        assert_eq!(cluster.write_count(), 0);
    }

    #[tokio::test]
    async fn test_flag_behind_a_true_entry_of_same_type_means_no_write() {
        let cluster = FakeCluster::new();
        cluster.set_driver(None);
        let seeded = vec![
            OperatorCondition::new(EOL_CONDITION_TYPE, ConditionStatus::True, "AsExpected", ""),
            OperatorCondition::new(EOL_CONDITION_TYPE, ConditionStatus::False, EOL_REASON, EOL_MESSAGE),
        ];
        cluster.set_conditions(seeded.clone());

        assert_eq!(controller(&cluster).sync().await.unwrap(), EolState::Flagged);
        assert_eq!(cluster.write_count(), 0);
        assert_eq!(cluster.conditions(), seeded);
    }

    #[tokio::test]
    async fn test_true_condition_is_flipped_not_duplicated() {
        let cluster = FakeCluster::new();
        cluster.set_driver(None);
        cluster.set_conditions(vec![OperatorCondition::new(
            EOL_CONDITION_TYPE,
            ConditionStatus::True,
            "AsExpected",
            "",
        )]);

        controller(&cluster).sync().await.unwrap();

        let conditions = cluster.conditions();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_against_fresh_read() {
        let cluster = FakeCluster::new();
        cluster.set_driver(None);
        cluster.inject_status_conflicts(2);

        assert_eq!(controller(&cluster).sync().await.unwrap(), EolState::Flagged);
        assert_eq!(cluster.writes(), vec!["status ClusterCSIDriver"]);
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces() {
        let cluster = FakeCluster::new();
        cluster.set_driver(None);
        cluster.inject_status_conflicts(5);

        assert_matches!(
            controller(&cluster).sync().await,
            Err(Error::ClusterWriteConflict { .. })
        );
        assert_eq!(cluster.write_count(), 0);
    }
}
