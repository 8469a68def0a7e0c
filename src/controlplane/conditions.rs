//! Operator condition helpers

use crate::crd::{ConditionStatus, OperatorCondition};
use chrono::{SubsecRound, Utc};

/// Find a condition by type
pub fn find_condition<'a>(
    conditions: &'a [OperatorCondition],
    type_: &str,
) -> Option<&'a OperatorCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether any condition of the given type has the given status.
///
/// Lists written by other actors may repeat a type, so every entry counts.
pub fn has_condition_status(
    conditions: &[OperatorCondition],
    type_: &str,
    status: ConditionStatus,
) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == status)
}

/// Update or add a condition, returning whether anything changed.
///
/// The transition time moves only when the status flips; rewriting the same
/// status with a new reason or message keeps the original time.
pub fn set_condition(
    conditions: &mut Vec<OperatorCondition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) else {
        conditions.push(OperatorCondition::new(type_, status, reason, message));
        return true;
    };

    let status_changed = existing.status != status;
    let changed = status_changed
        || existing.reason.as_deref() != Some(reason)
        || existing.message.as_deref() != Some(message);

    if status_changed {
        existing.last_transition_time = Some(Utc::now().trunc_subsecs(0));
    }
    existing.status = status;
    existing.reason = Some(reason.to_string());
    existing.message = Some(message.to_string());

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn condition(type_: &str, status: ConditionStatus) -> OperatorCondition {
        OperatorCondition {
            type_: type_.into(),
            status,
            last_transition_time: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            reason: Some("Initial".into()),
            message: Some("initial".into()),
        }
    }

    #[test]
    fn test_find_and_status() {
        let conditions = vec![
            condition("Available", ConditionStatus::True),
            condition("Degraded", ConditionStatus::False),
        ];

        assert!(find_condition(&conditions, "Available").is_some());
        assert!(find_condition(&conditions, "Progressing").is_none());
        assert!(has_condition_status(&conditions, "Degraded", ConditionStatus::False));
        assert!(!has_condition_status(&conditions, "Degraded", ConditionStatus::True));
        assert!(!has_condition_status(&conditions, "Missing", ConditionStatus::True));
    }

    #[test]
    fn test_status_matches_any_entry_of_a_repeated_type() {
        let conditions = vec![
            condition("Upgradeable", ConditionStatus::True),
            condition("Upgradeable", ConditionStatus::False),
        ];

        assert!(has_condition_status(&conditions, "Upgradeable", ConditionStatus::True));
        assert!(has_condition_status(&conditions, "Upgradeable", ConditionStatus::False));
        assert!(!has_condition_status(&conditions, "Upgradeable", ConditionStatus::Unknown));
    }

    #[test]
    fn test_set_appends_new_condition() {
        let mut conditions = vec![condition("Available", ConditionStatus::True)];

        assert!(set_condition(
            &mut conditions,
            "Upgradeable",
            ConditionStatus::False,
            "EOL",
            "going away"
        ));
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, "Available");
        assert_eq!(conditions[1].reason.as_deref(), Some("EOL"));
    }

    #[test]
    fn test_set_identical_is_no_change() {
        let mut conditions = vec![condition("Degraded", ConditionStatus::False)];
        let before = conditions.clone();

        assert!(!set_condition(
            &mut conditions,
            "Degraded",
            ConditionStatus::False,
            "Initial",
            "initial"
        ));
        assert_eq!(conditions, before);
    }

    #[test]
    fn test_transition_time_moves_only_on_status_flip() {
        let mut conditions = vec![condition("Degraded", ConditionStatus::False)];
        let original = conditions[0].last_transition_time;

        assert!(set_condition(
            &mut conditions,
            "Degraded",
            ConditionStatus::False,
            "AsExpected",
            "fine"
        ));
        assert_eq!(conditions[0].last_transition_time, original);

        assert!(set_condition(
            &mut conditions,
            "Degraded",
            ConditionStatus::True,
            "SyncError",
            "boom"
        ));
        assert_ne!(conditions[0].last_transition_time, original);
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }
}
