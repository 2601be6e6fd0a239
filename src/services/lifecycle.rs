use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Instrument, info, info_span};

use crate::config::CourseConfig;
use crate::error::AppError;
use crate::github::{NewIssue, RemoteService, TeamPrivacy};
use crate::models::{
    Action, AssessmentState, AssignmentDefinition, Definitions, GroupRoster, Permission, StatusMap,
    StudentMapping,
};
use crate::report::{Status, status};
use crate::repository::WorkspaceStore;
use crate::services::assessment_registry::AssessmentRegistry;
use crate::services::connector::{Connector, CopySummary, IssueOutcome, PullOutcome};
use crate::services::reports::{
    ReportRow, Submission, closing_report, closing_report_path, download_link, grading_dir,
    snapshot_name, view_link,
};
use crate::services::roster_registry::{RosterRegistry, StudentImport};

pub const GROUPS_FILE: &str = "groups.json";
pub const FORFEIT_TITLE: &str = "Assessment forfeit";
pub const FORFEIT_LABEL: &str = "ownership_change";

const FORFEIT_BODY: &str = concat!(
    "This item of assessment has been completed and ownership of the repository has been forfeit, ",
    "you now have admin rights.<br /><br />",
    "If you would like to keep a copy of your repository please navigate to the ",
    "<a href=\"../settings/\">settings</a> menu and follow the steps below. Note that only one ",
    "person can own the repository but multiple people can still collaborate, consider who will ",
    "take ownership if this was a group assessment.<br /><br />",
    "1. If you are not allowed private repositories set the repository to public, scroll to the ",
    "bottom of the settings menu and the \"Make Public\" option in the Danger Zone.<br /><br />",
    "2. In the Danger Zone, select Transfer ownership and follow the remaining steps. ",
);

pub fn update_title(assessment: &str) -> String {
    format!("An update to {}", assessment)
}

/// Summary of one lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub assessment: String,
    pub action: Action,
    pub state: AssessmentState,
    pub groups: usize,
}

/// Drives assessments through their lifecycle. One command runs at a
/// time and every remote call is awaited in order.
pub struct LifecycleController {
    config: CourseConfig,
    connector: Connector,
    store: WorkspaceStore,
    assessments: AssessmentRegistry,
    rosters: RosterRegistry,
}

impl LifecycleController {
    pub fn new(config: CourseConfig, remote: Arc<dyn RemoteService>) -> Self {
        let connector = Connector::new(remote, &config.admin_username, &config.main_branch);
        let store = WorkspaceStore::new(
            connector.clone(),
            &config.workspace_repo,
            &config.main_branch,
        );
        Self {
            assessments: AssessmentRegistry::new(store.clone(), &config),
            rosters: RosterRegistry::new(store.clone(), &config),
            config,
            connector,
            store,
        }
    }

    pub fn config(&self) -> &CourseConfig {
        &self.config
    }

    pub fn assessments(&mut self) -> &mut AssessmentRegistry {
        &mut self.assessments
    }

    pub fn rosters(&mut self) -> &mut RosterRegistry {
        &mut self.rosters
    }

    /// Reloads every mirrored document. Before the workspace exists this
    /// only reports that there is nothing to load.
    pub async fn load(&mut self) -> Result<(), AppError> {
        if !self
            .connector
            .remote()
            .repository_exists(&self.config.workspace_repo)
            .await?
        {
            status(
                Status::Note,
                format!(
                    "Nothing to load, {} has not been created yet",
                    self.config.workspace_repo
                ),
            );
            return Ok(());
        }
        self.assessments.load().await?;
        self.rosters.load().await?;
        Ok(())
    }

    /// Creates both teams and the private workspace repository.
    pub async fn init_course(&self) -> Result<(), AppError> {
        let gh = &self.connector;
        for team in [&self.config.instructor_team, &self.config.student_team] {
            gh.ensure_team(team, TeamPrivacy::Secret, Permission::Pull)
                .await?;
        }
        gh.ensure_repository(&self.config.workspace_repo, true)
            .await?;
        gh.add_team_to_repository(
            &self.config.instructor_team,
            &self.config.workspace_repo,
            Permission::Pull,
        )
        .await?;
        status(Status::Ok, "Course initialised");
        Ok(())
    }

    pub async fn configure(&mut self, definitions: Definitions) -> Result<StatusMap, AppError> {
        self.assessments.replace_definitions(definitions).await
    }

    pub async fn import_students(&mut self, csv_text: &str) -> Result<StudentImport, AppError> {
        self.rosters.import_student_mapping(csv_text).await
    }

    pub async fn import_groups(
        &mut self,
        assessment: &str,
        csv_text: &str,
    ) -> Result<GroupRoster, AppError> {
        let definition = self.assessments.definitions().await?.remove(assessment);
        self.rosters
            .import_group_roster(assessment, definition.as_ref(), csv_text)
            .await
    }

    /// Checks the transition before any side effect.
    async fn begin(
        &mut self,
        assessment: &str,
        action: Action,
    ) -> Result<(AssignmentDefinition, AssessmentState), AppError> {
        let definition = self.assessments.definition(assessment).await?;
        let from = self.assessments.state_of(assessment).await?;
        let Some(to) = from.apply(action) else {
            status(
                Status::Fail,
                format!("Cannot {} {} while it is {}", action, assessment, from),
            );
            return Err(AppError::InvalidTransition {
                assessment: assessment.to_string(),
                from,
                action,
            });
        };
        Ok((definition, to))
    }

    /// Stores the new state unless a group failed.
    async fn finish(
        &mut self,
        assessment: &str,
        action: Action,
        state: AssessmentState,
        groups: usize,
        failed: Vec<String>,
    ) -> Result<ActionReport, AppError> {
        if !failed.is_empty() {
            status(
                Status::Fail,
                format!(
                    "{} of {} left at its previous state, failed groups: {}",
                    action,
                    assessment,
                    failed.join(", ")
                ),
            );
            return Err(AppError::GroupsFailed {
                action,
                groups: failed,
            });
        }
        if action != Action::Update {
            self.assessments.set_status(assessment, state).await?;
        }
        status(Status::Ok, format!("{} of {} done", action, assessment));
        Ok(ActionReport {
            assessment: assessment.to_string(),
            action,
            state,
            groups,
        })
    }

    /// Creates and fills one repository per group.
    pub async fn prepare(&mut self, assessment: &str, overwrite: bool) -> Result<ActionReport, AppError> {
        let span = info_span!("prepare", assessment = %assessment);
        async move {
            let (definition, to) = self.begin(assessment, Action::Prepare).await?;
            self.rosters
                .allocate_remaining(assessment, &definition)
                .await?;
            let roster = self.rosters.groups(assessment, &definition).await?;

            let mut failed = Vec::new();
            for (group, _) in roster.groups() {
                let repo = self.config.group_repo(assessment, group);
                info!("Processing group {}", group);
                let main = self.config.main_branch.clone();
                if let Err(e) = self.prepare_group(&repo, &definition, &main, overwrite).await {
                    status(Status::Fail, format!("Group {}: {}", group, e));
                    failed.push(group.to_string());
                }
            }

            self.finish(assessment, Action::Prepare, to, roster.len(), failed)
                .await
        }
        .instrument(span)
        .await
    }

    async fn prepare_group(
        &self,
        repo: &str,
        definition: &AssignmentDefinition,
        target_branch: &str,
        overwrite: bool,
    ) -> Result<CopySummary, AppError> {
        let gh = &self.connector;
        let update_branch = &self.config.update_branch;

        gh.ensure_repository(repo, true).await?;
        gh.add_team_to_repository(&self.config.instructor_team, repo, Permission::Pull)
            .await?;

        if target_branch == update_branch.as_str() {
            gh.ensure_branch(repo, update_branch).await?;
        }
        let copied = gh
            .copy_directory(
                &self.config.workspace_repo,
                &definition.main_dir,
                &self.config.main_branch,
                repo,
                target_branch,
                overwrite,
                &[GROUPS_FILE],
            )
            .await?;

        gh.ensure_branch(repo, update_branch).await?;
        let rules = gh.update_branch_rules(&self.config.instructor_team);
        gh.ensure_protection(repo, update_branch, &rules).await?;
        Ok(copied)
    }

    /// Grants every member `permission` on their group repository.
    pub async fn release(
        &mut self,
        assessment: &str,
        permission: Permission,
    ) -> Result<ActionReport, AppError> {
        let span = info_span!("release", assessment = %assessment);
        async move {
            let (definition, to) = self.begin(assessment, Action::Release).await?;
            let roster = self.rosters.groups(assessment, &definition).await?;

            let mut failed = Vec::new();
            for (group, members) in roster.groups() {
                let repo = self.config.group_repo(assessment, group);
                if let Err(e) = self.grant_members(&repo, members, permission).await {
                    status(Status::Fail, format!("Group {}: {}", group, e));
                    failed.push(group.to_string());
                }
            }

            self.finish(assessment, Action::Release, to, roster.len(), failed)
                .await
        }
        .instrument(span)
        .await
    }

    async fn grant_members(
        &self,
        repo: &str,
        members: &[String],
        permission: Permission,
    ) -> Result<(), AppError> {
        for login in members {
            self.connector
                .add_collaborator(repo, login, permission)
                .await?;
        }
        Ok(())
    }

    /// Pushes the current assessment content to the update branch of every
    /// group repository and offers it as a pull request.
    pub async fn update(&mut self, assessment: &str) -> Result<ActionReport, AppError> {
        let span = info_span!("update", assessment = %assessment);
        async move {
            let (definition, state) = self.begin(assessment, Action::Update).await?;
            let roster = self.rosters.groups(assessment, &definition).await?;
            let title = update_title(assessment);

            let mut failed = Vec::new();
            for (group, members) in roster.groups() {
                let repo = self.config.group_repo(assessment, group);
                let body = format!(
                    "@{}: the instructor has updated this assessment, {} {}, since its original form. \
                     Navigate to the `Files changed` tab to see what changed. You may want to merge \
                     this Pull Request. This is an automatically generated message.",
                    members.join(", @"),
                    self.config.organisation,
                    assessment
                );
                if let Err(e) = self.update_group(&repo, &definition, &title, &body).await {
                    status(Status::Fail, format!("Group {}: {}", group, e));
                    failed.push(group.to_string());
                }
            }

            self.finish(assessment, Action::Update, state, roster.len(), failed)
                .await
        }
        .instrument(span)
        .await
    }

    async fn update_group(
        &self,
        repo: &str,
        definition: &AssignmentDefinition,
        title: &str,
        body: &str,
    ) -> Result<PullOutcome, AppError> {
        let update_branch = self.config.update_branch.clone();
        self.prepare_group(repo, definition, &update_branch, true)
            .await?;
        self.connector
            .open_or_refresh_pull_request(repo, title, body, &update_branch)
            .await
    }

    /// Revokes write access, archives the last commit before the deadline
    /// of every group and writes the grading report.
    pub async fn close(&mut self, assessment: &str, compress: bool) -> Result<ActionReport, AppError> {
        let span = info_span!("close", assessment = %assessment);
        async move {
            let (definition, to) = self.begin(assessment, Action::Close).await?;
            let deadline = definition.deadline_utc()?;
            let roster = self.rosters.groups(assessment, &definition).await?;
            let mapping = self.rosters.student_mapping().await?;

            let mut rows = Vec::with_capacity(roster.len());
            let mut failed = Vec::new();
            for (group, members) in roster.groups() {
                info!("Processing group {}", group);
                let submission = match self
                    .close_group(assessment, group, members, &definition, deadline, compress)
                    .await
                {
                    Ok(submission) => submission,
                    Err(e) => {
                        status(Status::Fail, format!("Group {}: {}", group, e));
                        failed.push(group.to_string());
                        Submission::Failed
                    }
                };
                rows.push(ReportRow {
                    group: group.to_string(),
                    members: members.to_vec(),
                    submission,
                });
            }

            self.write_closing_report(assessment, &definition, &rows, &mapping)
                .await?;
            self.finish(assessment, Action::Close, to, roster.len(), failed)
                .await
        }
        .instrument(span)
        .await
    }

    async fn close_group(
        &self,
        assessment: &str,
        group: &str,
        members: &[String],
        definition: &AssignmentDefinition,
        deadline: DateTime<Utc>,
        compress: bool,
    ) -> Result<Submission, AppError> {
        let repo = self.config.group_repo(assessment, group);
        self.grant_members(&repo, members, Permission::Pull).await?;

        let latest = self
            .connector
            .remote()
            .latest_commit_before(&repo, &self.config.main_branch, deadline)
            .await?;
        let Some(commit) = latest else {
            status(Status::Warn, format!("{} has no commits before the deadline", repo));
            return Ok(Submission::NoCommits);
        };

        let snapshot = snapshot_name(group, &commit, definition)?;
        let target = format!("{}/{}", grading_dir(assessment), snapshot);
        self.connector
            .archive_snapshot(&repo, &commit.sha, &self.config.workspace_repo, &target, compress)
            .await?;

        Ok(Submission::Archived {
            view: view_link(&repo, &commit.sha),
            download: download_link(&self.config.main_branch, assessment, &snapshot, compress),
        })
    }

    async fn write_closing_report(
        &self,
        assessment: &str,
        definition: &AssignmentDefinition,
        rows: &[ReportRow],
        mapping: &StudentMapping,
    ) -> Result<(), AppError> {
        let page = closing_report(&self.config.prefix, assessment, definition, rows, mapping);
        self.store
            .write(&closing_report_path(assessment), page.as_bytes())
            .await?;
        Ok(())
    }

    /// Hands every group repository over to its members.
    pub async fn forfeit(&mut self, assessment: &str) -> Result<ActionReport, AppError> {
        let span = info_span!("forfeit", assessment = %assessment);
        async move {
            let (definition, to) = self.begin(assessment, Action::Forfeit).await?;
            let roster = self.rosters.groups(assessment, &definition).await?;

            let mut failed = Vec::new();
            for (group, members) in roster.groups() {
                let repo = self.config.group_repo(assessment, group);
                if let Err(e) = self.forfeit_group(&repo, members).await {
                    status(Status::Fail, format!("Group {}: {}", group, e));
                    failed.push(group.to_string());
                }
            }

            self.finish(assessment, Action::Forfeit, to, roster.len(), failed)
                .await
        }
        .instrument(span)
        .await
    }

    async fn forfeit_group(&self, repo: &str, members: &[String]) -> Result<IssueOutcome, AppError> {
        self.grant_members(repo, members, Permission::Admin).await?;
        let issue = NewIssue {
            title: FORFEIT_TITLE.to_string(),
            body: FORFEIT_BODY.to_string(),
            labels: vec![FORFEIT_LABEL.to_string()],
            assignees: members.to_vec(),
        };
        self.connector
            .create_unique_issue(repo, FORFEIT_LABEL, &issue)
            .await
    }
}
