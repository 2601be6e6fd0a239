//! In-process implementation of [`RemoteService`].
//!
//! Keeps organisations, teams and repositories in memory with a linear
//! commit history per branch. Used by the test suite and for dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{
    BranchProtection, CommitInfo, Membership, NewIssue, NewPullRequest, PullRequest,
    RemoteService, TeamPrivacy, dir_prefix,
};
use crate::error::AppError;
use crate::models::Permission;

#[derive(Debug, Clone)]
struct Commit {
    sha: String,
    at: DateTime<Utc>,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct RepoState {
    private: bool,
    branches: BTreeMap<String, Vec<Commit>>,
    collaborators: BTreeMap<String, Permission>,
    teams: BTreeMap<String, Permission>,
    protections: BTreeMap<String, BranchProtection>,
    pulls: Vec<PullState>,
    issues: Vec<NewIssue>,
}

#[derive(Debug, Clone)]
struct PullState {
    number: u64,
    title: String,
    body: String,
    head: String,
    base: String,
}

#[derive(Debug)]
struct TeamState {
    privacy: TeamPrivacy,
    permission: Permission,
    members: BTreeSet<String>,
    pending: BTreeSet<String>,
}

#[derive(Debug)]
struct World {
    org_members: BTreeSet<String>,
    teams: BTreeMap<String, TeamState>,
    repos: BTreeMap<String, RepoState>,
    clock: DateTime<Utc>,
    next_sha: u64,
    writes: usize,
    failing: BTreeSet<String>,
    drop_writes: bool,
}

impl World {
    fn commit_id(&mut self) -> String {
        self.next_sha += 1;
        format!("{:040x}", self.next_sha)
    }

    fn check(&self, repo: &str) -> Result<(), AppError> {
        if self.failing.contains(repo) {
            return Err(AppError::Remote {
                status: 500,
                message: format!("injected failure for {}", repo),
            });
        }
        Ok(())
    }

    fn repo(&self, repo: &str) -> Result<&RepoState, AppError> {
        self.check(repo)?;
        self.repos
            .get(repo)
            .ok_or_else(|| AppError::NotFound(format!("repository {}", repo)))
    }

    fn repo_mut(&mut self, repo: &str) -> Result<&mut RepoState, AppError> {
        self.check(repo)?;
        self.repos
            .get_mut(repo)
            .ok_or_else(|| AppError::NotFound(format!("repository {}", repo)))
    }

    fn team(&self, team: &str) -> Result<&TeamState, AppError> {
        self.teams
            .get(team)
            .ok_or_else(|| AppError::NotFound(format!("team {}", team)))
    }
}

impl RepoState {
    /// History ending at `git_ref`, which is a branch name or a commit sha.
    fn history(&self, git_ref: &str) -> Option<&[Commit]> {
        if let Some(history) = self.branches.get(git_ref) {
            return Some(history);
        }
        self.branches.values().find_map(|history| {
            history
                .iter()
                .position(|c| c.sha == git_ref)
                .and_then(|idx| history.get(..=idx))
        })
    }

    fn snapshot(&self, git_ref: &str) -> Option<&Commit> {
        self.history(git_ref).and_then(<[Commit]>::last)
    }
}

pub struct InMemoryRemote {
    world: Mutex<World>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let clock = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            world: Mutex::new(World {
                org_members: BTreeSet::new(),
                teams: BTreeMap::new(),
                repos: BTreeMap::new(),
                clock,
                next_sha: 0,
                writes: 0,
                failing: BTreeSet::new(),
                drop_writes: false,
            }),
        }
    }

    fn world(&self) -> Result<MutexGuard<'_, World>, AppError> {
        self.world
            .lock()
            .map_err(|_| AppError::Invariant("in-memory remote lock poisoned".to_string()))
    }

    /// Adds `login` as an active member of `team` (and the organisation),
    /// creating the team when needed.
    pub fn add_team_member(&self, team: &str, login: &str) -> Result<(), AppError> {
        let mut world = self.world()?;
        world.org_members.insert(login.to_string());
        world
            .teams
            .entry(team.to_string())
            .or_insert_with(|| TeamState {
                privacy: TeamPrivacy::Secret,
                permission: Permission::Pull,
                members: BTreeSet::new(),
                pending: BTreeSet::new(),
            })
            .members
            .insert(login.to_string());
        Ok(())
    }

    pub fn set_clock(&self, at: DateTime<Utc>) -> Result<(), AppError> {
        self.world()?.clock = at;
        Ok(())
    }

    pub fn advance_clock(&self, by: Duration) -> Result<(), AppError> {
        let mut world = self.world()?;
        world.clock += by;
        Ok(())
    }

    /// Every later call that touches `repo` fails with a remote error.
    pub fn fail_repository(&self, repo: &str) -> Result<(), AppError> {
        self.world()?.failing.insert(repo.to_string());
        Ok(())
    }

    /// Accept writes without applying them.
    pub fn drop_writes(&self, drop: bool) -> Result<(), AppError> {
        self.world()?.drop_writes = drop;
        Ok(())
    }

    /// Number of accepted `put_file` calls so far.
    pub fn write_count(&self) -> Result<usize, AppError> {
        Ok(self.world()?.writes)
    }

    pub fn file(&self, repo: &str, git_ref: &str, path: &str) -> Result<Option<Vec<u8>>, AppError> {
        let world = self.world()?;
        Ok(world
            .repos
            .get(repo)
            .and_then(|r| r.snapshot(git_ref))
            .and_then(|c| c.files.get(path).cloned()))
    }

    pub fn file_paths(&self, repo: &str, git_ref: &str) -> Result<Vec<String>, AppError> {
        let world = self.world()?;
        Ok(world
            .repos
            .get(repo)
            .and_then(|r| r.snapshot(git_ref))
            .map(|c| c.files.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn repository_names(&self) -> Result<Vec<String>, AppError> {
        Ok(self.world()?.repos.keys().cloned().collect())
    }

    pub fn is_private(&self, repo: &str) -> Result<bool, AppError> {
        Ok(self.world()?.repo(repo)?.private)
    }

    pub fn collaborator(&self, repo: &str, login: &str) -> Result<Option<Permission>, AppError> {
        Ok(self.world()?.repo(repo)?.collaborators.get(login).copied())
    }

    pub fn team_access(&self, repo: &str, team: &str) -> Result<Option<Permission>, AppError> {
        Ok(self.world()?.repo(repo)?.teams.get(team).copied())
    }

    pub fn protection(&self, repo: &str, branch: &str) -> Result<Option<BranchProtection>, AppError> {
        Ok(self.world()?.repo(repo)?.protections.get(branch).cloned())
    }

    pub fn issues(&self, repo: &str) -> Result<Vec<NewIssue>, AppError> {
        Ok(self.world()?.repo(repo)?.issues.clone())
    }

    pub fn pull_request_titles(&self, repo: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .world()?
            .repo(repo)?
            .pulls
            .iter()
            .map(|p| p.title.clone())
            .collect())
    }

    pub fn pending_invites(&self, team: &str) -> Result<BTreeSet<String>, AppError> {
        Ok(self.world()?.team(team)?.pending.clone())
    }

    pub fn team_settings(&self, team: &str) -> Result<(TeamPrivacy, Permission), AppError> {
        let world = self.world()?;
        let team = world.team(team)?;
        Ok((team.privacy, team.permission))
    }

    /// Records a commit made by someone outside the tooling, e.g. a student.
    pub fn push_commit(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &[u8],
    ) -> Result<String, AppError> {
        let mut world = self.world()?;
        let sha = world.commit_id();
        let at = world.clock;
        let state = world.repo_mut(repo)?;
        let history = state.branches.entry(branch.to_string()).or_default();
        let mut files = history.last().map(|c| c.files.clone()).unwrap_or_default();
        files.insert(path.to_string(), content.to_vec());
        history.push(Commit {
            sha: sha.clone(),
            at,
            files,
        });
        Ok(sha)
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn get_file(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, AppError> {
        let world = self.world()?;
        world.check(repo)?;
        Ok(world
            .repos
            .get(repo)
            .and_then(|r| r.snapshot(git_ref))
            .and_then(|c| c.files.get(path.trim_start_matches('/')).cloned()))
    }

    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        branch: &str,
        _message: &str,
    ) -> Result<(), AppError> {
        let mut world = self.world()?;
        world.repo(repo)?;
        world.writes += 1;
        if world.drop_writes {
            return Ok(());
        }

        let sha = world.commit_id();
        let at = world.clock;
        let state = world.repo_mut(repo)?;
        if !state.branches.contains_key(branch) && !state.branches.is_empty() {
            return Err(AppError::NotFound(format!("branch {} in {}", branch, repo)));
        }
        let history = state.branches.entry(branch.to_string()).or_default();
        let mut files = history.last().map(|c| c.files.clone()).unwrap_or_default();
        files.insert(path.trim_start_matches('/').to_string(), content.to_vec());
        history.push(Commit { sha, at, files });
        Ok(())
    }

    async fn list_files(
        &self,
        repo: &str,
        dir: &str,
        git_ref: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, AppError> {
        let world = self.world()?;
        world.check(repo)?;
        let prefix = dir_prefix(dir);
        let Some(commit) = world.repos.get(repo).and_then(|r| r.snapshot(git_ref)) else {
            return Ok(BTreeMap::new());
        };
        Ok(commit
            .files
            .iter()
            .filter_map(|(path, bytes)| {
                path.strip_prefix(prefix.as_str())
                    .map(|relative| (relative.to_string(), bytes.clone()))
            })
            .collect())
    }

    async fn repository_exists(&self, repo: &str) -> Result<bool, AppError> {
        let world = self.world()?;
        world.check(repo)?;
        Ok(world.repos.contains_key(repo))
    }

    async fn create_repository(&self, repo: &str, private: bool) -> Result<(), AppError> {
        let mut world = self.world()?;
        world.check(repo)?;
        if world.repos.contains_key(repo) {
            return Err(AppError::Remote {
                status: 422,
                message: format!("repository {} already exists", repo),
            });
        }
        world.repos.insert(
            repo.to_string(),
            RepoState {
                private,
                ..RepoState::default()
            },
        );
        Ok(())
    }

    async fn team_exists(&self, team: &str) -> Result<bool, AppError> {
        Ok(self.world()?.teams.contains_key(team))
    }

    async fn create_team(
        &self,
        team: &str,
        privacy: TeamPrivacy,
        permission: Permission,
    ) -> Result<(), AppError> {
        let mut world = self.world()?;
        if world.teams.contains_key(team) {
            return Err(AppError::Remote {
                status: 422,
                message: format!("team {} already exists", team),
            });
        }
        world.teams.insert(
            team.to_string(),
            TeamState {
                privacy,
                permission,
                members: BTreeSet::new(),
                pending: BTreeSet::new(),
            },
        );
        Ok(())
    }

    async fn team_members(&self, team: &str) -> Result<BTreeSet<String>, AppError> {
        Ok(self.world()?.team(team)?.members.clone())
    }

    async fn team_membership(&self, team: &str, login: &str) -> Result<Membership, AppError> {
        let world = self.world()?;
        let team = world.team(team)?;
        Ok(if team.members.contains(login) {
            Membership::Active
        } else if team.pending.contains(login) {
            Membership::Pending
        } else {
            Membership::None
        })
    }

    async fn invite_to_team(&self, team: &str, login: &str) -> Result<(), AppError> {
        let mut world = self.world()?;
        let state = world
            .teams
            .get_mut(team)
            .ok_or_else(|| AppError::NotFound(format!("team {}", team)))?;
        if !state.members.contains(login) {
            state.pending.insert(login.to_string());
        }
        Ok(())
    }

    async fn is_org_member(&self, login: &str) -> Result<bool, AppError> {
        Ok(self.world()?.org_members.contains(login))
    }

    async fn add_team_to_repository(
        &self,
        team: &str,
        repo: &str,
        permission: Permission,
    ) -> Result<(), AppError> {
        let mut world = self.world()?;
        world.team(team)?;
        world
            .repo_mut(repo)?
            .teams
            .insert(team.to_string(), permission);
        Ok(())
    }

    async fn add_collaborator(
        &self,
        repo: &str,
        login: &str,
        permission: Permission,
    ) -> Result<(), AppError> {
        self.world()?
            .repo_mut(repo)?
            .collaborators
            .insert(login.to_string(), permission);
        Ok(())
    }

    async fn branch_head(&self, repo: &str, branch: &str) -> Result<Option<String>, AppError> {
        let world = self.world()?;
        Ok(world
            .repo(repo)?
            .branches
            .get(branch)
            .and_then(|h| h.last())
            .map(|c| c.sha.clone()))
    }

    async fn create_branch(&self, repo: &str, branch: &str, sha: &str) -> Result<(), AppError> {
        let mut world = self.world()?;
        let state = world.repo_mut(repo)?;
        if state.branches.contains_key(branch) {
            return Err(AppError::Remote {
                status: 422,
                message: format!("reference refs/heads/{} already exists", branch),
            });
        }
        let history = state
            .history(sha)
            .map(<[Commit]>::to_vec)
            .ok_or_else(|| AppError::NotFound(format!("commit {} in {}", sha, repo)))?;
        state.branches.insert(branch.to_string(), history);
        Ok(())
    }

    async fn branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, AppError> {
        Ok(self.world()?.repo(repo)?.protections.get(branch).cloned())
    }

    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        rules: &BranchProtection,
    ) -> Result<(), AppError> {
        let mut world = self.world()?;
        let state = world.repo_mut(repo)?;
        if !state.branches.contains_key(branch) {
            return Err(AppError::NotFound(format!("branch {} in {}", branch, repo)));
        }
        state.protections.insert(branch.to_string(), rules.clone());
        Ok(())
    }

    async fn open_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>, AppError> {
        let world = self.world()?;
        let state = world.repo(repo)?;
        Ok(state
            .pulls
            .iter()
            .map(|p| PullRequest {
                number: p.number,
                title: p.title.clone(),
                head_ref: p.head.clone(),
                body: p.body.clone(),
            })
            .collect())
    }

    async fn create_pull_request(&self, repo: &str, pull: &NewPullRequest) -> Result<(), AppError> {
        let mut world = self.world()?;
        let state = world.repo_mut(repo)?;
        for branch in [&pull.head, &pull.base] {
            if !state.branches.contains_key(branch.as_str()) {
                return Err(AppError::NotFound(format!("branch {} in {}", branch, repo)));
            }
        }
        let number = state.pulls.len() as u64 + state.issues.len() as u64 + 1;
        state.pulls.push(PullState {
            number,
            title: pull.title.clone(),
            body: pull.body.clone(),
            head: pull.head.clone(),
            base: pull.base.clone(),
        });
        Ok(())
    }

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let mut world = self.world()?;
        let pull = world
            .repo_mut(repo)?
            .pulls
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| AppError::NotFound(format!("pull request #{} in {}", number, repo)))?;
        pull.title = title.to_string();
        pull.body = body.to_string();
        Ok(())
    }

    async fn commits_ahead(&self, repo: &str, base: &str, head: &str) -> Result<u64, AppError> {
        let world = self.world()?;
        let state = world.repo(repo)?;
        let missing = |name: &str| AppError::NotFound(format!("branch {} in {}", name, repo));
        let base_history = state.history(base).ok_or_else(|| missing(base))?;
        let head_history = state.history(head).ok_or_else(|| missing(head))?;
        let known: BTreeSet<&str> = base_history.iter().map(|c| c.sha.as_str()).collect();
        Ok(head_history
            .iter()
            .filter(|c| !known.contains(c.sha.as_str()))
            .count() as u64)
    }

    async fn issues_with_label(&self, repo: &str, label: &str) -> Result<usize, AppError> {
        Ok(self
            .world()?
            .repo(repo)?
            .issues
            .iter()
            .filter(|i| i.labels.iter().any(|l| l == label))
            .count())
    }

    async fn create_issue(&self, repo: &str, issue: &NewIssue) -> Result<(), AppError> {
        self.world()?.repo_mut(repo)?.issues.push(issue.clone());
        Ok(())
    }

    async fn latest_commit_before(
        &self,
        repo: &str,
        branch: &str,
        until: DateTime<Utc>,
    ) -> Result<Option<CommitInfo>, AppError> {
        let world = self.world()?;
        let state = world.repo(repo)?;
        Ok(state
            .branches
            .get(branch)
            .into_iter()
            .flatten()
            .filter(|c| c.at <= until)
            .max_by_key(|c| c.at)
            .map(|c| CommitInfo {
                sha: c.sha.clone(),
                committed_at: c.at,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_file() {
        let remote = InMemoryRemote::new();
        remote.create_repository("repo", true).await.unwrap();
        remote
            .put_file("repo", "a/b.txt", b"hello", "master", "add")
            .await
            .unwrap();

        let bytes = remote.get_file("repo", "a/b.txt", "master").await.unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"hello"[..]));
        assert_eq!(remote.write_count().unwrap(), 1);

        let listed = remote.list_files("repo", "a", "master").await.unwrap();
        assert_eq!(listed.keys().collect::<Vec<_>>(), ["b.txt"]);
    }

    #[tokio::test]
    async fn test_branch_from_tip_and_commits_ahead() {
        let remote = InMemoryRemote::new();
        remote.create_repository("repo", true).await.unwrap();
        remote.put_file("repo", "f", b"1", "master", "m").await.unwrap();
        let tip = remote.branch_head("repo", "master").await.unwrap().unwrap();
        remote.create_branch("repo", "updates", &tip).await.unwrap();

        assert_eq!(remote.commits_ahead("repo", "master", "updates").await.unwrap(), 0);
        remote.put_file("repo", "f", b"2", "updates", "m").await.unwrap();
        assert_eq!(remote.commits_ahead("repo", "master", "updates").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_latest_commit_before_respects_time() {
        let remote = InMemoryRemote::new();
        remote.create_repository("repo", true).await.unwrap();
        let first = remote.push_commit("repo", "master", "f", b"1").unwrap();
        remote.advance_clock(Duration::days(2)).unwrap();
        remote.push_commit("repo", "master", "f", b"2").unwrap();

        let until = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let found = remote.latest_commit_before("repo", "master", until).await.unwrap();
        assert_eq!(found.map(|c| c.sha), Some(first));

        let before_all = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert!(remote
            .latest_commit_before("repo", "master", before_all)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_files_at_commit_sha() {
        let remote = InMemoryRemote::new();
        remote.create_repository("repo", true).await.unwrap();
        let first = remote.push_commit("repo", "master", "f", b"old").unwrap();
        remote.push_commit("repo", "master", "f", b"new").unwrap();

        let files = remote.list_files("repo", "", &first).await.unwrap();
        assert_eq!(files.get("f").map(Vec::as_slice), Some(&b"old"[..]));
    }

    #[tokio::test]
    async fn test_failing_repository() {
        let remote = InMemoryRemote::new();
        remote.create_repository("repo", true).await.unwrap();
        remote.fail_repository("repo").unwrap();
        assert!(matches!(
            remote.repository_exists("repo").await,
            Err(AppError::Remote { status: 500, .. })
        ));
    }
}
