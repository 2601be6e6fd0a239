use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, ValidationError};

/// Field delimiter of the student mapping CSV.
pub const STUDENT_DELIMITER: u8 = b',';
/// Field delimiter of the group roster CSV; members are comma separated.
pub const GROUP_DELIMITER: u8 = b'|';

/// Login -> internal identifier, derived from `student_mapping.csv`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentMapping(BTreeMap<String, String>);

impl StudentMapping {
    /// Parses the mapping document. Column 0 holds the internal ID and
    /// column 1 the login; the first row is a header.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let rows = read_table(text, STUDENT_DELIMITER)?;
        let mut mapping = BTreeMap::new();

        for (idx, row) in rows.iter().enumerate().skip(1) {
            let (Some(id), Some(login)) = (row.first(), row.get(1)) else {
                return Err(ValidationError::MissingColumns { row: idx + 1, expected: 2 }.into());
            };
            if let Some(previous) = mapping.insert(login.clone(), id.clone()) {
                warn!("Login {} listed twice, {} replaces {}", login, id, previous);
            }
        }

        Ok(Self(mapping))
    }

    pub fn id_of(&self, login: &str) -> Option<&str> {
        self.0.get(login).map(String::as_str)
    }

    pub fn logins(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Group name -> ordered member logins for one assessment (`groups.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupRoster(BTreeMap<String, Vec<String>>);

impl GroupRoster {
    /// Builds a roster from the group CSV, checking every roster rule.
    /// The first violation aborts the whole import.
    pub fn from_csv(
        text: &str,
        students: &BTreeSet<String>,
        max_group_size: i64,
    ) -> Result<Self, AppError> {
        let rows = read_table(text, GROUP_DELIMITER)?;
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut grouped: BTreeSet<String> = BTreeSet::new();

        for (idx, row) in rows.iter().enumerate().skip(1) {
            let (Some(group), Some(members)) = (row.first(), row.get(1)) else {
                return Err(ValidationError::MissingColumns { row: idx + 1, expected: 2 }.into());
            };

            if groups.contains_key(group) {
                return Err(ValidationError::DuplicateGroup(group.clone()).into());
            }

            let members: Vec<String> = members
                .split(',')
                .map(str::trim)
                .filter(|login| !login.is_empty())
                .map(str::to_string)
                .collect();
            if members.is_empty() {
                return Err(ValidationError::EmptyGroup(group.clone()).into());
            }

            let mut in_group = BTreeSet::new();
            for login in &members {
                if !in_group.insert(login.as_str()) {
                    return Err(ValidationError::DuplicateMember {
                        group: group.clone(),
                        login: login.clone(),
                    }
                    .into());
                }
                if grouped.contains(login) {
                    return Err(ValidationError::MultipleGroups(login.clone()).into());
                }
                if !students.contains(login) {
                    return Err(ValidationError::NotStudent(login.clone()).into());
                }
            }

            if i64::try_from(members.len()).map_or(true, |size| size > max_group_size) {
                return Err(ValidationError::GroupTooLarge {
                    group: group.clone(),
                    size: members.len(),
                    max: max_group_size,
                }
                .into());
            }

            grouped.extend(members.iter().cloned());
            groups.insert(group.clone(), members);
        }

        Ok(Self(groups))
    }

    /// Every login that already belongs to a group.
    pub fn grouped_logins(&self) -> BTreeSet<String> {
        self.0.values().flatten().cloned().collect()
    }

    /// Adds a singleton group named after `login` for individual work.
    pub fn insert_individual(&mut self, login: &str) -> Result<(), AppError> {
        if let Some(members) = self.0.get(login) {
            return Err(AppError::Invariant(format!(
                "group {} already exists with members [{}] but {} is not grouped",
                login,
                members.join(", "),
                login
            )));
        }
        self.0.insert(login.to_string(), vec![login.to_string()]);
        Ok(())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(name, members)| (name.as_str(), members.as_slice()))
    }

    pub fn members(&self, group: &str) -> Option<&[String]> {
        self.0.get(group).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for GroupRoster {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reads a delimited table and checks that every row has the header's
/// column count. Blank lines are ignored.
pub fn read_table(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        let fields: Vec<String> = record.iter().map(str::to_string).collect();
        if let Some(header) = rows.first() {
            if header.len() != fields.len() {
                return Err(ValidationError::ColumnCount {
                    row: rows.len() + 1,
                    expected: header.len(),
                    found: fields.len(),
                }
                .into());
            }
        }
        rows.push(fields);
    }

    if rows.is_empty() {
        return Err(ValidationError::MissingHeader.into());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn students(logins: &[&str]) -> BTreeSet<String> {
        logins.iter().map(|s| s.to_string()).collect()
    }

    fn validation(err: AppError) -> ValidationError {
        match err {
            AppError::Validation(v) => v,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_student_mapping_reads_id_then_login() {
        let mapping = StudentMapping::parse("id,login\n1001,alice\n1002,bob\n").unwrap();
        assert_eq!(mapping.id_of("alice"), Some("1001"));
        assert_eq!(mapping.id_of("bob"), Some("1002"));
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_student_mapping_later_duplicate_wins() {
        let mapping = StudentMapping::parse("id,login\n1,alice\n2,alice\n").unwrap();
        assert_eq!(mapping.id_of("alice"), Some("2"));
    }

    #[test]
    fn test_uneven_columns_are_rejected() {
        let err = StudentMapping::parse("id,login\n1001,alice,extra\n").unwrap_err();
        assert_eq!(
            validation(err),
            ValidationError::ColumnCount { row: 2, expected: 2, found: 3 }
        );
    }

    #[test]
    fn test_single_column_mapping_is_rejected() {
        let err = StudentMapping::parse("login\nalice\n").unwrap_err();
        assert!(matches!(validation(err), ValidationError::MissingColumns { .. }));
    }

    #[test]
    fn test_empty_document_has_no_header() {
        let err = read_table("", b',').unwrap_err();
        assert_eq!(validation(err), ValidationError::MissingHeader);
    }

    #[test]
    fn test_group_csv_parses_members() {
        let csv = "group|members\nteam_a|alice, bob\nteam_b|carol\n";
        let roster = GroupRoster::from_csv(csv, &students(&["alice", "bob", "carol"]), 2).unwrap();
        assert_eq!(roster.members("team_a").unwrap(), ["alice", "bob"]);
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.grouped_logins(), students(&["alice", "bob", "carol"]));
    }

    #[test]
    fn test_group_csv_rejects_duplicate_group() {
        let csv = "group|members\nteam_a|alice\nteam_a|bob\n";
        let err = GroupRoster::from_csv(csv, &students(&["alice", "bob"]), 2).unwrap_err();
        assert_eq!(validation(err), ValidationError::DuplicateGroup("team_a".to_string()));
    }

    #[test]
    fn test_group_csv_rejects_member_in_two_groups() {
        let csv = "group|members\nteam_a|alice, bob\nteam_b|bob\n";
        let err = GroupRoster::from_csv(csv, &students(&["alice", "bob"]), 2).unwrap_err();
        assert_eq!(validation(err), ValidationError::MultipleGroups("bob".to_string()));
    }

    #[test]
    fn test_group_csv_rejects_non_student() {
        let csv = "group|members\nteam_a|alice, mallory\n";
        let err = GroupRoster::from_csv(csv, &students(&["alice"]), 2).unwrap_err();
        assert_eq!(validation(err), ValidationError::NotStudent("mallory".to_string()));
    }

    #[test]
    fn test_group_csv_rejects_oversized_group() {
        let csv = "group|members\nteam_a|alice, bob, carol\n";
        let err = GroupRoster::from_csv(csv, &students(&["alice", "bob", "carol"]), 2).unwrap_err();
        assert!(matches!(
            validation(err),
            ValidationError::GroupTooLarge { size: 3, max: 2, .. }
        ));
    }

    #[test]
    fn test_group_csv_uses_pipe_delimiter() {
        let csv = "group,members\nteam_a,alice\n";
        let err = GroupRoster::from_csv(csv, &students(&["alice"]), 2).unwrap_err();
        assert!(matches!(validation(err), ValidationError::MissingColumns { .. }));
    }

    #[test]
    fn test_insert_individual_detects_name_clash() {
        let mut roster: GroupRoster =
            [("alice".to_string(), vec!["bob".to_string()])].into_iter().collect();
        let err = roster.insert_individual("alice").unwrap_err();
        assert!(matches!(err, AppError::Invariant(_)));
        roster.insert_individual("carol").unwrap();
        assert_eq!(roster.members("carol").unwrap(), ["carol"]);
    }
}
