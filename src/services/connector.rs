use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::sync::Arc;

use serde::Serialize;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::AppError;
use crate::github::{
    BranchProtection, Membership, NewIssue, NewPullRequest, RemoteService, TeamPrivacy,
};
use crate::models::Permission;
use crate::report::{Status, status};

/// Result of a single file write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    /// The target already holds byte-identical content.
    Unchanged,
    /// The target holds other content and overwriting was not requested.
    Exists,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopySummary {
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl CopySummary {
    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => self.written += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
            WriteOutcome::Exists => self.skipped += 1,
        }
    }

    /// True when nothing was written.
    pub fn is_noop(&self) -> bool {
        self.written == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullOutcome {
    Created,
    Updated,
    Unchanged,
    NothingToMerge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueOutcome {
    Created,
    Exists,
}

/// Idempotent course operations on top of a [`RemoteService`]. Each call
/// reports its outcome through the status signal.
#[derive(Clone)]
pub struct Connector {
    remote: Arc<dyn RemoteService>,
    admin_username: String,
    main_branch: String,
}

impl Connector {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        admin_username: impl Into<String>,
        main_branch: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            admin_username: admin_username.into(),
            main_branch: main_branch.into(),
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.remote
    }

    /// Returns true when the team was created.
    pub async fn ensure_team(
        &self,
        team: &str,
        privacy: TeamPrivacy,
        permission: Permission,
    ) -> Result<bool, AppError> {
        if self.remote.team_exists(team).await? {
            status(Status::Skip, format!("Team {} already exists", team));
            return Ok(false);
        }
        self.remote.create_team(team, privacy, permission).await?;
        status(Status::Ok, format!("Created team {}", team));
        Ok(true)
    }

    /// Returns true when the repository was created.
    pub async fn ensure_repository(&self, repo: &str, private: bool) -> Result<bool, AppError> {
        if self.remote.repository_exists(repo).await? {
            status(Status::Skip, format!("Repository {} already exists", repo));
            return Ok(false);
        }
        self.remote.create_repository(repo, private).await?;
        status(Status::Ok, format!("Created repository {}", repo));
        Ok(true)
    }

    /// Writes one file unless it already holds `content`. Existing content
    /// is only replaced when `overwrite` is set. A write is read back and
    /// must hold the intended bytes.
    pub async fn write_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        branch: &str,
        overwrite: bool,
    ) -> Result<WriteOutcome, AppError> {
        let before = self.remote.get_file(repo, path, branch).await?;
        match before.as_deref() {
            Some(existing) if existing == content => {
                status(Status::Skip, format!("No new changes for {}:{}", repo, path));
                return Ok(WriteOutcome::Unchanged);
            }
            Some(_) if !overwrite => {
                status(
                    Status::Skip,
                    format!("{}:{} already exists and overwrite is off", repo, path),
                );
                return Ok(WriteOutcome::Exists);
            }
            _ => {}
        }

        let name = path.rsplit('/').next().unwrap_or(path);
        let message = format!("Update {}.", name);
        self.remote
            .put_file(repo, path, content, branch, &message)
            .await?;

        let after = self.remote.get_file(repo, path, branch).await?;
        if after.as_deref() != Some(content) {
            status(Status::Fail, format!("Write to {}:{} did not apply", repo, path));
            return Err(AppError::WriteNotApplied {
                repo: repo.to_string(),
                path: path.to_string(),
            });
        }

        status(Status::Ok, format!("Wrote {}:{}", repo, path));
        Ok(WriteOutcome::Written)
    }

    /// Copies every file below `dir` of `source_repo` at `git_ref` into the
    /// root of `target_repo` on `branch`. File names in `exclude` are
    /// skipped at any depth.
    #[allow(clippy::too_many_arguments)]
    pub async fn copy_directory(
        &self,
        source_repo: &str,
        dir: &str,
        git_ref: &str,
        target_repo: &str,
        branch: &str,
        overwrite: bool,
        exclude: &[&str],
    ) -> Result<CopySummary, AppError> {
        let files = self.remote.list_files(source_repo, dir, git_ref).await?;
        let mut summary = CopySummary::default();

        for (path, bytes) in &files {
            let name = path.rsplit('/').next().unwrap_or(path);
            if exclude.contains(&name) {
                continue;
            }
            let outcome = self
                .write_file(target_repo, path, bytes, branch, overwrite)
                .await?;
            summary.record(outcome);
        }

        if summary.is_noop() {
            status(
                Status::Skip,
                format!("{} already matches {}/{}", target_repo, source_repo, dir),
            );
        }
        Ok(summary)
    }

    /// Creates `branch` from the main branch tip. Returns true when created.
    pub async fn ensure_branch(&self, repo: &str, branch: &str) -> Result<bool, AppError> {
        if self.remote.branch_head(repo, branch).await?.is_some() {
            status(Status::Skip, format!("Branch {} already exists in {}", branch, repo));
            return Ok(false);
        }
        let Some(tip) = self.remote.branch_head(repo, &self.main_branch).await? else {
            status(
                Status::Fail,
                format!("{} has no {} branch to branch from", repo, self.main_branch),
            );
            return Err(AppError::NotFound(format!(
                "branch {} in {}",
                self.main_branch, repo
            )));
        };
        self.remote.create_branch(repo, branch, &tip).await?;
        status(Status::Ok, format!("Created branch {} in {}", branch, repo));
        Ok(true)
    }

    /// Applies `rules` unless the branch already carries exactly these.
    pub async fn ensure_protection(
        &self,
        repo: &str,
        branch: &str,
        rules: &BranchProtection,
    ) -> Result<bool, AppError> {
        if self.remote.branch_protection(repo, branch).await?.as_ref() == Some(rules) {
            status(Status::Skip, format!("{}:{} is already protected", repo, branch));
            return Ok(false);
        }
        self.remote.protect_branch(repo, branch, rules).await?;
        status(Status::Ok, format!("Protected {}:{}", repo, branch));
        Ok(true)
    }

    /// Push restricted to the admin user and the instructor team.
    pub fn update_branch_rules(&self, instructor_team: &str) -> BranchProtection {
        BranchProtection {
            push_users: BTreeSet::from([self.admin_username.clone()]),
            push_teams: BTreeSet::from([instructor_team.to_string()]),
            ..BranchProtection::default()
        }
    }

    /// Returns true when an invitation was sent; active and pending
    /// members are skipped.
    pub async fn invite_to_team(&self, team: &str, login: &str) -> Result<bool, AppError> {
        let membership = self.remote.team_membership(team, login).await?;
        if membership != Membership::None {
            status(Status::Skip, format!("{} is already invited to {}", login, team));
            return Ok(false);
        }
        if !self.remote.is_org_member(login).await? {
            status(
                Status::Note,
                format!("{} is not an organisation member yet, the invite covers both", login),
            );
        }
        self.remote.invite_to_team(team, login).await?;
        status(Status::Ok, format!("Invited {} to {}", login, team));
        Ok(true)
    }

    pub async fn add_collaborator(
        &self,
        repo: &str,
        login: &str,
        permission: Permission,
    ) -> Result<(), AppError> {
        if !self.remote.is_org_member(login).await? {
            status(
                Status::Warn,
                format!("{} is not an organisation member, {} may not be visible to them", login, repo),
            );
        }
        self.remote.add_collaborator(repo, login, permission).await?;
        status(
            Status::Ok,
            format!("{} has {} access to {}", login, permission, repo),
        );
        Ok(())
    }

    pub async fn add_team_to_repository(
        &self,
        team: &str,
        repo: &str,
        permission: Permission,
    ) -> Result<(), AppError> {
        self.remote
            .add_team_to_repository(team, repo, permission)
            .await?;
        status(
            Status::Ok,
            format!("Team {} has {} access to {}", team, permission, repo),
        );
        Ok(())
    }

    /// Opens a pull request from `head` into the main branch. An open one
    /// with the same title gets the new body unless it already has it.
    pub async fn open_or_refresh_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
    ) -> Result<PullOutcome, AppError> {
        if self.remote.branch_head(repo, head).await?.is_none() {
            status(Status::Fail, format!("Branch {} does not exist in {}", head, repo));
            return Err(AppError::NotFound(format!("branch {} in {}", head, repo)));
        }

        if self.remote.commits_ahead(repo, &self.main_branch, head).await? == 0 {
            status(
                Status::Skip,
                format!("{}:{} has nothing to merge into {}", repo, head, self.main_branch),
            );
            return Ok(PullOutcome::NothingToMerge);
        }

        let open = self.remote.open_pull_requests(repo).await?;
        if let Some(existing) = open.iter().find(|p| p.title == title && p.head_ref == head) {
            if existing.body == body {
                status(
                    Status::Skip,
                    format!("Pull request #{} in {} is up to date", existing.number, repo),
                );
                return Ok(PullOutcome::Unchanged);
            }
            self.remote
                .update_pull_request(repo, existing.number, title, body)
                .await?;
            status(
                Status::Ok,
                format!("Refreshed pull request #{} in {}", existing.number, repo),
            );
            return Ok(PullOutcome::Updated);
        }

        let pull = NewPullRequest {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: self.main_branch.clone(),
        };
        self.remote.create_pull_request(repo, &pull).await?;
        status(Status::Ok, format!("Opened pull request '{}' in {}", title, repo));
        Ok(PullOutcome::Created)
    }

    /// Creates `issue` unless any issue, open or closed, carries `label`.
    pub async fn create_unique_issue(
        &self,
        repo: &str,
        label: &str,
        issue: &NewIssue,
    ) -> Result<IssueOutcome, AppError> {
        if self.remote.issues_with_label(repo, label).await? > 0 {
            status(
                Status::Skip,
                format!("An issue labelled {} already exists in {}", label, repo),
            );
            return Ok(IssueOutcome::Exists);
        }
        self.remote.create_issue(repo, issue).await?;
        status(Status::Ok, format!("Created issue '{}' in {}", issue.title, repo));
        Ok(IssueOutcome::Created)
    }

    /// Stores the whole tree of `source_repo` at `git_ref` under
    /// `target_path` in `target_repo`. With `compress` the tree becomes a
    /// single `{target_path}.zip`.
    pub async fn archive_snapshot(
        &self,
        source_repo: &str,
        git_ref: &str,
        target_repo: &str,
        target_path: &str,
        compress: bool,
    ) -> Result<CopySummary, AppError> {
        let target_path = target_path.trim_end_matches('/');
        let files = self.remote.list_files(source_repo, "", git_ref).await?;
        let mut summary = CopySummary::default();

        if !compress {
            for (path, bytes) in &files {
                let target = format!("{}/{}", target_path, path);
                let outcome = self
                    .write_file(target_repo, &target, bytes, &self.main_branch, true)
                    .await?;
                summary.record(outcome);
            }
            return Ok(summary);
        }

        let archive = zip_files(files.iter().map(|(p, b)| (p.as_str(), b.as_slice())))?;
        let outcome = self
            .write_file(
                target_repo,
                &format!("{}.zip", target_path),
                &archive,
                &self.main_branch,
                true,
            )
            .await?;
        summary.record(outcome);
        Ok(summary)
    }
}

/// Deflated zip archive holding `files`.
pub fn zip_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Result<Vec<u8>, AppError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for (path, bytes) in files {
        writer.start_file(path, options)?;
        writer.write_all(bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}
