use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Format of `deadline` in the assessment configuration.
pub const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One entry of `assessment_config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AssignmentDefinition {
    pub main_dir: String,
    pub deadline: String,
    pub deadline_utc_offset: i64,
    pub max_group_size: i64,
}

impl AssignmentDefinition {
    pub fn is_group_work(&self) -> bool {
        self.max_group_size > 1
    }

    /// Path of the group roster document inside the workspace repository.
    pub fn groups_path(&self) -> String {
        format!("{}/groups.json", self.main_dir.trim_end_matches('/'))
    }

    /// Deadline in UTC: the configured local time minus the UTC offset.
    pub fn deadline_utc(&self) -> Result<DateTime<Utc>, ValidationError> {
        let local = NaiveDateTime::parse_from_str(&self.deadline, DEADLINE_FORMAT)
            .map_err(|e| self.invalid_deadline(e.to_string()))?;
        let utc = local
            .checked_sub_signed(self.offset()?)
            .ok_or_else(|| self.invalid_deadline("deadline shifted by the offset is out of range"))?;
        Ok(utc.and_utc())
    }

    /// Converts a UTC instant back into the assessment's local time.
    pub fn to_local(&self, instant: DateTime<Utc>) -> Result<NaiveDateTime, ValidationError> {
        instant
            .naive_utc()
            .checked_add_signed(self.offset()?)
            .ok_or_else(|| self.invalid_deadline("local time is out of range"))
    }

    fn offset(&self) -> Result<TimeDelta, ValidationError> {
        TimeDelta::try_hours(self.deadline_utc_offset).ok_or_else(|| {
            self.invalid_deadline(format!(
                "utc offset of {} hours is out of range",
                self.deadline_utc_offset
            ))
        })
    }

    fn invalid_deadline(&self, reason: impl Into<String>) -> ValidationError {
        ValidationError::InvalidDeadline {
            value: self.deadline.clone(),
            reason: reason.into(),
        }
    }
}

pub type Definitions = BTreeMap<String, AssignmentDefinition>;
pub type StatusMap = BTreeMap<String, AssessmentState>;

/// Assessment names are stored with spaces replaced by underscores.
pub fn normalize_name(name: &str) -> String {
    name.replace(' ', "_")
}

/// Normalises every key. Two keys that end up with the same name are
/// rejected rather than one silently replacing the other.
pub fn normalize_definitions(defs: Definitions) -> Result<Definitions, ValidationError> {
    let mut normalized = Definitions::new();
    let mut sources: BTreeMap<String, String> = BTreeMap::new();

    for (name, def) in defs {
        let key = normalize_name(&name);
        if let Some(first) = sources.get(&key) {
            return Err(ValidationError::NameCollision {
                first: first.clone(),
                second: name,
                normalized: key,
            });
        }
        sources.insert(key.clone(), name);
        normalized.insert(key, def);
    }

    Ok(normalized)
}

/// Lifecycle state of one assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssessmentState {
    Unprepared,
    Prepared,
    Released,
    Closed,
    Forfeit,
}

/// Operator actions driving the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Prepare,
    Release,
    Update,
    Close,
    Forfeit,
}

impl AssessmentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unprepared => "Unprepared",
            Self::Prepared => "Prepared",
            Self::Released => "Released",
            Self::Closed => "Closed",
            Self::Forfeit => "Forfeit",
        }
    }

    /// State reached by applying `action`, or `None` when the transition is
    /// not allowed. Repeating an action from its own target state is allowed.
    /// `Update` never changes the state.
    pub const fn apply(self, action: Action) -> Option<Self> {
        use AssessmentState::{Closed, Forfeit, Prepared, Released, Unprepared};

        match (self, action) {
            (Unprepared | Prepared, Action::Prepare) => Some(Prepared),
            (Prepared | Released, Action::Release) => Some(Released),
            (Released | Closed, Action::Close) => Some(Closed),
            (Released | Closed | Forfeit, Action::Forfeit) => Some(Forfeit),
            (Unprepared, Action::Update) => None,
            (state, Action::Update) => Some(state),
            _ => None,
        }
    }
}

impl fmt::Display for AssessmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Release => "release",
            Self::Update => "update",
            Self::Close => "close",
            Self::Forfeit => "forfeit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository permission levels understood by the hosting API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Pull,
    Triage,
    Push,
    Maintain,
    Admin,
}

impl Permission {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Triage => "triage",
            Self::Push => "push",
            Self::Maintain => "maintain",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hw1() -> AssignmentDefinition {
        AssignmentDefinition {
            main_dir: "hw1".to_string(),
            deadline: "2024-01-01 23:59:59".to_string(),
            deadline_utc_offset: 10,
            max_group_size: 1,
        }
    }

    #[test]
    fn test_definition_uses_kebab_case_keys() {
        let json = r#"{"main-dir": "hw1", "deadline": "2024-01-01 23:59:59",
                       "deadline-utc-offset": 0, "max-group-size": 3}"#;
        let def: AssignmentDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.main_dir, "hw1");
        assert!(def.is_group_work());
    }

    #[test]
    fn test_definition_rejects_unknown_keys() {
        let json = r#"{"main-dir": "hw1", "deadline": "2024-01-01 23:59:59",
                       "deadline-utc-offset": 0, "max-group-size": 1, "colour": "red"}"#;
        assert!(serde_json::from_str::<AssignmentDefinition>(json).is_err());
    }

    #[test]
    fn test_deadline_converts_with_offset() {
        let def = hw1();
        let utc = def.deadline_utc().unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 1, 1, 13, 59, 59).unwrap());
        assert_eq!(def.to_local(utc).unwrap().format(DEADLINE_FORMAT).to_string(), def.deadline);
    }

    #[test]
    fn test_bad_deadline_is_a_validation_error() {
        let mut def = hw1();
        def.deadline = "tomorrow".to_string();
        assert!(matches!(
            def.deadline_utc(),
            Err(ValidationError::InvalidDeadline { .. })
        ));
    }

    #[test]
    fn test_unknown_state_string_is_rejected() {
        let parsed: Result<StatusMap, _> = serde_json::from_str(r#"{"hw1": "Graded"}"#);
        assert!(parsed.is_err());
        let parsed: StatusMap = serde_json::from_str(r#"{"hw1": "Released"}"#).unwrap();
        assert_eq!(parsed["hw1"], AssessmentState::Released);
    }

    #[test]
    fn test_forward_transitions() {
        use AssessmentState::*;
        assert_eq!(Unprepared.apply(Action::Prepare), Some(Prepared));
        assert_eq!(Prepared.apply(Action::Release), Some(Released));
        assert_eq!(Released.apply(Action::Close), Some(Closed));
        assert_eq!(Closed.apply(Action::Forfeit), Some(Forfeit));
        assert_eq!(Released.apply(Action::Forfeit), Some(Forfeit));
    }

    #[test]
    fn test_rerunning_an_action_is_allowed() {
        use AssessmentState::*;
        assert_eq!(Prepared.apply(Action::Prepare), Some(Prepared));
        assert_eq!(Released.apply(Action::Release), Some(Released));
        assert_eq!(Closed.apply(Action::Close), Some(Closed));
        assert_eq!(Forfeit.apply(Action::Forfeit), Some(Forfeit));
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        use AssessmentState::*;
        assert_eq!(Closed.apply(Action::Release), None);
        assert_eq!(Unprepared.apply(Action::Release), None);
        assert_eq!(Unprepared.apply(Action::Close), None);
        assert_eq!(Prepared.apply(Action::Forfeit), None);
        assert_eq!(Forfeit.apply(Action::Close), None);
        assert_eq!(Released.apply(Action::Prepare), None);
    }

    #[test]
    fn test_update_keeps_state_once_prepared() {
        use AssessmentState::*;
        assert_eq!(Unprepared.apply(Action::Update), None);
        assert_eq!(Released.apply(Action::Update), Some(Released));
    }

    #[test]
    fn test_normalize_replaces_spaces() {
        let mut defs = Definitions::new();
        defs.insert("home work 1".to_string(), hw1());
        let defs = normalize_definitions(defs).unwrap();
        assert!(defs.contains_key("home_work_1"));
    }

    #[test]
    fn test_colliding_names_are_rejected() {
        let mut other = hw1();
        other.main_dir = "other".to_string();
        let mut defs = Definitions::new();
        defs.insert("hw 1".to_string(), hw1());
        defs.insert("hw_1".to_string(), other);

        let err = normalize_definitions(defs).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NameCollision {
                first: "hw 1".to_string(),
                second: "hw_1".to_string(),
                normalized: "hw_1".to_string(),
            }
        );
    }

    #[test]
    fn test_huge_offset_is_a_validation_error() {
        let mut def = hw1();
        def.deadline_utc_offset = 1_000_000_000_000;
        assert!(matches!(
            def.deadline_utc(),
            Err(ValidationError::InvalidDeadline { .. })
        ));
        assert!(matches!(
            def.to_local(Utc::now()),
            Err(ValidationError::InvalidDeadline { .. })
        ));

        // In range for TimeDelta, but past the end of the calendar.
        def.deadline_utc_offset = -2_500_000_000;
        assert!(matches!(
            def.deadline_utc(),
            Err(ValidationError::InvalidDeadline { .. })
        ));
    }
}
