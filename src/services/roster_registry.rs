use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::info;

use crate::config::CourseConfig;
use crate::error::{AppError, ValidationError};
use crate::models::{AssignmentDefinition, GroupRoster, StudentMapping};
use crate::report::{Status, status};
use crate::repository::{Document, WorkspaceStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudentImport {
    pub students: usize,
    pub invited: usize,
    pub already_members: usize,
}

/// Owns the student mapping and the per-assessment group rosters.
pub struct RosterRegistry {
    store: WorkspaceStore,
    student_team: String,
    mapping: Document<String>,
    groups: BTreeMap<String, Document<GroupRoster>>,
}

impl RosterRegistry {
    pub fn new(store: WorkspaceStore, config: &CourseConfig) -> Self {
        Self {
            store,
            student_team: config.student_team.clone(),
            mapping: Document::new(config.student_mapping_path()),
            groups: BTreeMap::new(),
        }
    }

    /// Drops every cached roster and reloads the student mapping.
    pub async fn load(&mut self) -> Result<(), AppError> {
        self.groups.clear();
        if let Some(text) = self.mapping.reload(&self.store).await? {
            let mapping = StudentMapping::parse(text)?;
            info!("Loaded student mapping with {} students", mapping.len());
        }
        Ok(())
    }

    pub async fn student_mapping(&mut self) -> Result<StudentMapping, AppError> {
        match self.mapping.get(&self.store).await? {
            Some(text) => StudentMapping::parse(text),
            None => Ok(StudentMapping::default()),
        }
    }

    /// Validates and stores the student CSV, then invites every listed
    /// login to the student team.
    pub async fn import_student_mapping(&mut self, csv_text: &str) -> Result<StudentImport, AppError> {
        let mapping = StudentMapping::parse(csv_text).inspect_err(|e| {
            status(Status::Fail, format!("Student CSV rejected: {}", e));
        })?;

        self.mapping
            .commit(&self.store, csv_text.to_string())
            .await?;

        let mut report = StudentImport {
            students: mapping.len(),
            ..StudentImport::default()
        };
        for login in mapping.logins() {
            let sent = self
                .store
                .connector()
                .invite_to_team(&self.student_team, login)
                .await?;
            if sent {
                report.invited += 1;
            } else {
                report.already_members += 1;
            }
        }

        status(
            Status::Ok,
            format!("Imported {} students into {}", report.students, self.student_team),
        );
        Ok(report)
    }

    /// Active members of the student team.
    pub async fn students(&self) -> Result<BTreeSet<String>, AppError> {
        self.store
            .connector()
            .remote()
            .team_members(&self.student_team)
            .await
    }

    /// Roster of one assessment; empty when none was stored yet.
    pub async fn groups(
        &mut self,
        assessment: &str,
        definition: &AssignmentDefinition,
    ) -> Result<GroupRoster, AppError> {
        let store = self.store.clone();
        let doc = self.group_doc(assessment, definition);
        Ok(doc.get(&store).await?.cloned().unwrap_or_default())
    }

    /// Replaces the roster of a group assessment from CSV. Any rule
    /// violation rejects the whole import before anything is written.
    pub async fn import_group_roster(
        &mut self,
        assessment: &str,
        definition: Option<&AssignmentDefinition>,
        csv_text: &str,
    ) -> Result<GroupRoster, AppError> {
        let Some(definition) = definition else {
            status(
                Status::Fail,
                format!("Assessment {} has not been configured", assessment),
            );
            return Err(ValidationError::UnknownAssessment(assessment.to_string()).into());
        };
        if !definition.is_group_work() {
            status(
                Status::Fail,
                format!("Assessment {} is not configured for group work", assessment),
            );
            return Err(ValidationError::NotGroupWork(assessment.to_string()).into());
        }

        let students = self.students().await?;
        let roster = GroupRoster::from_csv(csv_text, &students, definition.max_group_size)
            .inspect_err(|e| {
                status(
                    Status::Fail,
                    format!("Group CSV for {} rejected, no changes made: {}", assessment, e),
                );
            })?;

        let store = self.store.clone();
        self.group_doc(assessment, definition)
            .commit(&store, roster)
            .await?;
        status(Status::Ok, format!("Stored groups for {}", assessment));
        self.group_doc(assessment, definition).reload(&store).await?;
        self.groups(assessment, definition).await
    }

    /// Puts every student team member without a group into a singleton
    /// group named after their login. Returns the newly allocated logins;
    /// nothing is written when there are none.
    pub async fn allocate_remaining(
        &mut self,
        assessment: &str,
        definition: &AssignmentDefinition,
    ) -> Result<Vec<String>, AppError> {
        let students = self.students().await?;
        let mut roster = self.groups(assessment, definition).await?;
        let grouped = roster.grouped_logins();

        let remaining: Vec<String> = students.difference(&grouped).cloned().collect();
        if remaining.is_empty() {
            status(
                Status::Skip,
                format!("Every student already has a group for {}", assessment),
            );
            return Ok(remaining);
        }

        for login in &remaining {
            roster.insert_individual(login)?;
        }

        let store = self.store.clone();
        self.group_doc(assessment, definition)
            .commit(&store, roster)
            .await?;
        status(
            Status::Ok,
            format!(
                "Allocated {} remaining students to individual work for {}",
                remaining.len(),
                assessment
            ),
        );
        Ok(remaining)
    }

    fn group_doc(
        &mut self,
        assessment: &str,
        definition: &AssignmentDefinition,
    ) -> &mut Document<GroupRoster> {
        self.groups
            .entry(assessment.to_string())
            .or_insert_with(|| Document::new(definition.groups_path()))
    }
}
