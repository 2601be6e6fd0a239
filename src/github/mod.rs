pub mod dto;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CourseConfig;
use crate::error::AppError;
use crate::models::Permission;

pub use memory::InMemoryRemote;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "classroom-admin";
const PAGE_SIZE: usize = 100;

#[derive(Clone, Debug)]
pub struct GitHubConfig {
    pub api_url: String,
    pub api_token: String,
    pub organisation: String,
}

impl From<&CourseConfig> for GitHubConfig {
    fn from(config: &CourseConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            organisation: config.organisation.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamPrivacy {
    Secret,
    Closed,
}

impl TeamPrivacy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    None,
    Pending,
    Active,
}

/// Protection rules for one branch. Teams are identified by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchProtection {
    pub required_status_checks: Vec<String>,
    pub enforce_admins: bool,
    pub required_approving_reviews: Option<u32>,
    pub push_users: BTreeSet<String>,
    pub push_teams: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub head_ref: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub committed_at: DateTime<Utc>,
}

impl CommitInfo {
    pub fn short_sha(&self) -> &str {
        self.sha.get(..7).unwrap_or(&self.sha)
    }
}

/// The hosted repository service, reduced to the calls the course tooling
/// needs. Every repository and team lives in the configured organisation.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// File bytes at `path` on `git_ref`, or `None` when absent.
    async fn get_file(&self, repo: &str, path: &str, git_ref: &str)
    -> Result<Option<Vec<u8>>, AppError>;

    /// Creates or replaces one file with a single commit on `branch`.
    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        branch: &str,
        message: &str,
    ) -> Result<(), AppError>;

    /// All files below `dir` at `git_ref`, keyed by path relative to `dir`.
    /// An empty repository yields an empty map.
    async fn list_files(
        &self,
        repo: &str,
        dir: &str,
        git_ref: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, AppError>;

    async fn repository_exists(&self, repo: &str) -> Result<bool, AppError>;

    async fn create_repository(&self, repo: &str, private: bool) -> Result<(), AppError>;

    async fn team_exists(&self, team: &str) -> Result<bool, AppError>;

    async fn create_team(
        &self,
        team: &str,
        privacy: TeamPrivacy,
        permission: Permission,
    ) -> Result<(), AppError>;

    async fn team_members(&self, team: &str) -> Result<BTreeSet<String>, AppError>;

    async fn team_membership(&self, team: &str, login: &str) -> Result<Membership, AppError>;

    /// Invites `login` to the team, and to the organisation when needed.
    async fn invite_to_team(&self, team: &str, login: &str) -> Result<(), AppError>;

    async fn is_org_member(&self, login: &str) -> Result<bool, AppError>;

    async fn add_team_to_repository(
        &self,
        team: &str,
        repo: &str,
        permission: Permission,
    ) -> Result<(), AppError>;

    async fn add_collaborator(
        &self,
        repo: &str,
        login: &str,
        permission: Permission,
    ) -> Result<(), AppError>;

    /// Tip commit of `branch`, or `None` when the branch does not exist.
    async fn branch_head(&self, repo: &str, branch: &str) -> Result<Option<String>, AppError>;

    async fn create_branch(&self, repo: &str, branch: &str, sha: &str) -> Result<(), AppError>;

    async fn branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, AppError>;

    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        rules: &BranchProtection,
    ) -> Result<(), AppError>;

    async fn open_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>, AppError>;

    async fn create_pull_request(&self, repo: &str, pull: &NewPullRequest) -> Result<(), AppError>;

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<(), AppError>;

    /// Number of commits on `head` that `base` does not have.
    async fn commits_ahead(&self, repo: &str, base: &str, head: &str) -> Result<u64, AppError>;

    /// Number of issues, open or closed, carrying `label`.
    async fn issues_with_label(&self, repo: &str, label: &str) -> Result<usize, AppError>;

    async fn create_issue(&self, repo: &str, issue: &NewIssue) -> Result<(), AppError>;

    /// Most recent commit on `branch` committed at or before `until`.
    async fn latest_commit_before(
        &self,
        repo: &str,
        branch: &str,
        until: DateTime<Utc>,
    ) -> Result<Option<CommitInfo>, AppError>;
}

/// Normalises a directory into a path prefix: `""` for the root, otherwise
/// the directory with exactly one trailing slash.
pub fn dir_prefix(dir: &str) -> String {
    let trimmed = dir.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// URL slug GitHub derives from a team name.
pub fn team_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub struct GitHubHttpClient {
    client: Client,
    config: GitHubConfig,
}

impl GitHubHttpClient {
    pub fn new(config: GitHubConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Builds the client and checks that the token is accepted and can see
    /// the organisation.
    pub async fn connect(config: GitHubConfig) -> Result<Self, AppError> {
        let github = Self::new(config)?;

        let user: dto::Account = github
            .send(github.client.get(github.url("/user")))
            .await?
            .json()
            .await?;

        let org_url = github.url(&format!("/orgs/{}", github.config.organisation));
        let org = github
            .send_optional(github.client.get(org_url), &[StatusCode::NOT_FOUND])
            .await?;
        if org.is_none() {
            return Err(AppError::NotFound(format!(
                "organisation {}",
                github.config.organisation
            )));
        }

        tracing::info!("Authenticated to GitHub as {}", user.login);
        Ok(github)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    fn repo_url(&self, repo: &str, path: &str) -> String {
        self.url(&format!("/repos/{}/{}{}", self.config.organisation, repo, path))
    }

    fn team_url(&self, team: &str, path: &str) -> String {
        self.url(&format!(
            "/orgs/{}/teams/{}{}",
            self.config.organisation,
            team_slug(team),
            path
        ))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AppError> {
        let response = self.authorize(request).send().await?;
        check(response).await
    }

    /// Like `send`, but maps any of the `absent` statuses to `None`.
    async fn send_optional(
        &self,
        request: RequestBuilder,
        absent: &[StatusCode],
    ) -> Result<Option<Response>, AppError> {
        let response = self.authorize(request).send().await?;
        if absent.contains(&response.status()) {
            return Ok(None);
        }
        check(response).await.map(Some)
    }

    async fn get_all<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, AppError> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let page_str = page.to_string();
            let batch: Vec<T> = self
                .send(
                    self.client
                        .get(url)
                        .query(query)
                        .query(&[("per_page", "100"), ("page", page_str.as_str())]),
                )
                .await?
                .json()
                .await?;

            let count = batch.len();
            items.extend(batch);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn content_file(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<dto::ContentFile>, AppError> {
        let url = self.repo_url(repo, &format!("/contents/{}", path.trim_start_matches('/')));
        let Some(response) = self
            .send_optional(self.client.get(url).query(&[("ref", git_ref)]), &[StatusCode::NOT_FOUND])
            .await?
        else {
            return Ok(None);
        };

        // A directory comes back as an array.
        let value: serde_json::Value = response.json().await?;
        if !value.is_object() {
            return Ok(None);
        }
        let file: dto::ContentFile = serde_json::from_value(value)?;
        Ok((file.kind == "file").then_some(file))
    }

    async fn read_blob(&self, repo: &str, sha: &str) -> Result<Vec<u8>, AppError> {
        let url = self.repo_url(repo, &format!("/git/blobs/{}", sha));
        let blob: dto::BlobResponse = self.send(self.client.get(url)).await?.json().await?;
        if blob.encoding == "base64" {
            decode_base64(&blob.content)
        } else {
            Ok(blob.content.into_bytes())
        }
    }
}

/// Bytes carried inline by a contents response, or `None` when the file is
/// too large for the contents API and has to be read as a blob.
fn inline_content(file: &dto::ContentFile) -> Result<Option<Vec<u8>>, AppError> {
    match (file.encoding.as_deref(), file.content.as_deref()) {
        (Some("base64"), Some(content)) => decode_base64(content).map(Some),
        _ => Ok(None),
    }
}

async fn check(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(AppError::Authentication(body));
    }
    Err(AppError::Remote {
        status: status.as_u16(),
        message: body,
    })
}

fn decode_base64(content: &str) -> Result<Vec<u8>, AppError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64.decode(compact).map_err(|e| AppError::Remote {
        status: 200,
        message: format!("invalid base64 content: {}", e),
    })
}

#[async_trait]
impl RemoteService for GitHubHttpClient {
    async fn get_file(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, AppError> {
        let Some(file) = self.content_file(repo, path, git_ref).await? else {
            return Ok(None);
        };
        match inline_content(&file)? {
            Some(bytes) => Ok(Some(bytes)),
            None => self.read_blob(repo, &file.sha).await.map(Some),
        }
    }

    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        branch: &str,
        message: &str,
    ) -> Result<(), AppError> {
        // Updating an existing file requires its blob sha.
        let sha = self.content_file(repo, path, branch).await?.map(|file| file.sha);
        let body = dto::PutContentRequest {
            message,
            content: BASE64.encode(content),
            branch,
            sha,
        };
        let url = self.repo_url(repo, &format!("/contents/{}", path.trim_start_matches('/')));
        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn list_files(
        &self,
        repo: &str,
        dir: &str,
        git_ref: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, AppError> {
        let url = self.repo_url(repo, &format!("/git/trees/{}", git_ref));
        let Some(response) = self
            .send_optional(
                self.client.get(url).query(&[("recursive", "1")]),
                &[StatusCode::NOT_FOUND, StatusCode::CONFLICT],
            )
            .await?
        else {
            return Ok(BTreeMap::new());
        };

        let tree: dto::TreeResponse = response.json().await?;
        if tree.truncated {
            tracing::warn!("Tree of {} at {} is truncated, some files are missing", repo, git_ref);
        }

        let prefix = dir_prefix(dir);
        let mut files = BTreeMap::new();
        for entry in tree.tree {
            if entry.kind != "blob" {
                continue;
            }
            let Some(relative) = entry.path.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let bytes = self.read_blob(repo, &entry.sha).await?;
            files.insert(relative.to_string(), bytes);
        }

        Ok(files)
    }

    async fn repository_exists(&self, repo: &str) -> Result<bool, AppError> {
        let response = self
            .send_optional(self.client.get(self.repo_url(repo, "")), &[StatusCode::NOT_FOUND])
            .await?;
        Ok(response.is_some())
    }

    async fn create_repository(&self, repo: &str, private: bool) -> Result<(), AppError> {
        let url = self.url(&format!("/orgs/{}/repos", self.config.organisation));
        let body = dto::CreateRepoRequest {
            name: repo,
            private,
            auto_init: false,
        };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn team_exists(&self, team: &str) -> Result<bool, AppError> {
        let response = self
            .send_optional(self.client.get(self.team_url(team, "")), &[StatusCode::NOT_FOUND])
            .await?;
        Ok(response.is_some())
    }

    async fn create_team(
        &self,
        team: &str,
        privacy: TeamPrivacy,
        permission: Permission,
    ) -> Result<(), AppError> {
        let url = self.url(&format!("/orgs/{}/teams", self.config.organisation));
        let body = dto::CreateTeamRequest {
            name: team,
            privacy: privacy.as_str(),
            permission: permission.as_str(),
        };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn team_members(&self, team: &str) -> Result<BTreeSet<String>, AppError> {
        let members: Vec<dto::Account> = self.get_all(&self.team_url(team, "/members"), &[]).await?;
        Ok(members.into_iter().map(|m| m.login).collect())
    }

    async fn team_membership(&self, team: &str, login: &str) -> Result<Membership, AppError> {
        let url = self.team_url(team, &format!("/memberships/{}", login));
        let Some(response) = self
            .send_optional(self.client.get(url), &[StatusCode::NOT_FOUND])
            .await?
        else {
            return Ok(Membership::None);
        };
        let membership: dto::TeamMembership = response.json().await?;
        Ok(match membership.state.as_str() {
            "active" => Membership::Active,
            _ => Membership::Pending,
        })
    }

    async fn invite_to_team(&self, team: &str, login: &str) -> Result<(), AppError> {
        let url = self.team_url(team, &format!("/memberships/{}", login));
        let body = dto::MembershipRequest { role: "member" };
        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn is_org_member(&self, login: &str) -> Result<bool, AppError> {
        let url = self.url(&format!("/orgs/{}/members/{}", self.config.organisation, login));
        let response = self
            .send_optional(self.client.get(url), &[StatusCode::NOT_FOUND])
            .await?;
        Ok(response.is_some())
    }

    async fn add_team_to_repository(
        &self,
        team: &str,
        repo: &str,
        permission: Permission,
    ) -> Result<(), AppError> {
        let url = self.team_url(
            team,
            &format!("/repos/{}/{}", self.config.organisation, repo),
        );
        let body = dto::PermissionRequest {
            permission: permission.as_str(),
        };
        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn add_collaborator(
        &self,
        repo: &str,
        login: &str,
        permission: Permission,
    ) -> Result<(), AppError> {
        let url = self.repo_url(repo, &format!("/collaborators/{}", login));
        let body = dto::PermissionRequest {
            permission: permission.as_str(),
        };
        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn branch_head(&self, repo: &str, branch: &str) -> Result<Option<String>, AppError> {
        let url = self.repo_url(repo, &format!("/branches/{}", branch));
        let Some(response) = self
            .send_optional(self.client.get(url), &[StatusCode::NOT_FOUND])
            .await?
        else {
            return Ok(None);
        };
        let branch: dto::BranchResponse = response.json().await?;
        Ok(Some(branch.commit.sha))
    }

    async fn create_branch(&self, repo: &str, branch: &str, sha: &str) -> Result<(), AppError> {
        let body = dto::CreateRefRequest {
            git_ref: format!("refs/heads/{}", branch),
            sha,
        };
        self.send(self.client.post(self.repo_url(repo, "/git/refs")).json(&body))
            .await?;
        Ok(())
    }

    async fn branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, AppError> {
        let url = self.repo_url(repo, &format!("/branches/{}/protection", branch));
        let Some(response) = self
            .send_optional(self.client.get(url), &[StatusCode::NOT_FOUND])
            .await?
        else {
            return Ok(None);
        };
        let current: dto::ProtectionResponse = response.json().await?;
        let restrictions = current.restrictions;

        Ok(Some(BranchProtection {
            required_status_checks: current
                .required_status_checks
                .map(|checks| checks.contexts)
                .unwrap_or_default(),
            enforce_admins: current.enforce_admins.is_some_and(|e| e.enabled),
            required_approving_reviews: current
                .required_pull_request_reviews
                .and_then(|r| r.required_approving_review_count),
            push_users: restrictions
                .as_ref()
                .map(|r| r.users.iter().map(|u| u.login.clone()).collect())
                .unwrap_or_default(),
            push_teams: restrictions
                .as_ref()
                .map(|r| r.teams.iter().map(|t| t.name.clone()).collect())
                .unwrap_or_default(),
        }))
    }

    async fn protect_branch(
        &self,
        repo: &str,
        branch: &str,
        rules: &BranchProtection,
    ) -> Result<(), AppError> {
        let status_checks = (!rules.required_status_checks.is_empty()).then(|| {
            serde_json::json!({ "strict": false, "contexts": rules.required_status_checks })
        });
        let reviews = rules
            .required_approving_reviews
            .map(|count| serde_json::json!({ "required_approving_review_count": count }));
        let teams: Vec<String> = rules.push_teams.iter().map(|t| team_slug(t)).collect();

        let body = serde_json::json!({
            "required_status_checks": status_checks,
            "enforce_admins": rules.enforce_admins,
            "required_pull_request_reviews": reviews,
            "restrictions": { "users": rules.push_users, "teams": teams },
        });

        let url = self.repo_url(repo, &format!("/branches/{}/protection", branch));
        self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn open_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>, AppError> {
        let pulls: Vec<dto::PullResponse> = self
            .get_all(&self.repo_url(repo, "/pulls"), &[("state", "open")])
            .await?;
        Ok(pulls
            .into_iter()
            .map(|p| PullRequest {
                number: p.number,
                title: p.title,
                head_ref: p.head.git_ref,
                body: p.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_pull_request(&self, repo: &str, pull: &NewPullRequest) -> Result<(), AppError> {
        let body = dto::CreatePullRequest {
            title: &pull.title,
            head: &pull.head,
            base: &pull.base,
            body: &pull.body,
        };
        self.send(self.client.post(self.repo_url(repo, "/pulls")).json(&body))
            .await?;
        Ok(())
    }

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let url = self.repo_url(repo, &format!("/pulls/{}", number));
        let body = dto::UpdatePullRequest { title, body };
        self.send(self.client.patch(url).json(&body)).await?;
        Ok(())
    }

    async fn commits_ahead(&self, repo: &str, base: &str, head: &str) -> Result<u64, AppError> {
        let url = self.repo_url(repo, &format!("/compare/{}...{}", base, head));
        let comparison: dto::CompareResponse = self.send(self.client.get(url)).await?.json().await?;
        Ok(comparison.ahead_by)
    }

    async fn issues_with_label(&self, repo: &str, label: &str) -> Result<usize, AppError> {
        let issues: Vec<dto::IssueResponse> = self
            .get_all(
                &self.repo_url(repo, "/issues"),
                &[("labels", label), ("state", "all")],
            )
            .await?;
        Ok(issues.len())
    }

    async fn create_issue(&self, repo: &str, issue: &NewIssue) -> Result<(), AppError> {
        let body = dto::CreateIssueRequest {
            title: &issue.title,
            body: &issue.body,
            labels: &issue.labels,
            assignees: &issue.assignees,
        };
        self.send(self.client.post(self.repo_url(repo, "/issues")).json(&body))
            .await?;
        Ok(())
    }

    async fn latest_commit_before(
        &self,
        repo: &str,
        branch: &str,
        until: DateTime<Utc>,
    ) -> Result<Option<CommitInfo>, AppError> {
        let until = until.to_rfc3339_opts(SecondsFormat::Secs, true);
        let Some(response) = self
            .send_optional(
                self.client.get(self.repo_url(repo, "/commits")).query(&[
                    ("sha", branch),
                    ("until", until.as_str()),
                    ("per_page", "100"),
                ]),
                &[StatusCode::NOT_FOUND, StatusCode::CONFLICT],
            )
            .await?
        else {
            return Ok(None);
        };

        let commits: Vec<dto::CommitResponse> = response.json().await?;
        Ok(commits
            .into_iter()
            .filter_map(|c| {
                c.commit.committer.map(|s| CommitInfo {
                    sha: c.sha,
                    committed_at: s.date,
                })
            })
            .max_by_key(|c| c.committed_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_prefix() {
        assert_eq!(dir_prefix(""), "");
        assert_eq!(dir_prefix("/"), "");
        assert_eq!(dir_prefix("."), "");
        assert_eq!(dir_prefix("hw1"), "hw1/");
        assert_eq!(dir_prefix("/hw1/"), "hw1/");
    }

    #[test]
    fn test_team_slug() {
        assert_eq!(team_slug("cs101_staff"), "cs101_staff");
        assert_eq!(team_slug("CS 101 Staff"), "cs-101-staff");
        assert_eq!(team_slug("a..b!"), "a-b");
    }

    #[test]
    fn test_short_sha() {
        let commit = CommitInfo {
            sha: "0123456789abcdef".to_string(),
            committed_at: Utc::now(),
        };
        assert_eq!(commit.short_sha(), "0123456");
    }

    #[test]
    fn test_base64_content_with_newlines() {
        assert_eq!(decode_base64("aGVs\nbG8=\n").unwrap(), b"hello");
    }

    fn contents(encoding: Option<&str>, content: Option<&str>) -> dto::ContentFile {
        dto::ContentFile {
            kind: "file".to_string(),
            sha: "blobsha".to_string(),
            content: content.map(str::to_string),
            encoding: encoding.map(str::to_string),
        }
    }

    #[test]
    fn test_inline_content() {
        let small = contents(Some("base64"), Some("aGVsbG8=\n"));
        assert_eq!(inline_content(&small).unwrap(), Some(b"hello".to_vec()));

        let empty = contents(Some("base64"), Some(""));
        assert_eq!(inline_content(&empty).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_large_file_is_read_as_blob() {
        let large = contents(Some("none"), Some(""));
        assert_eq!(inline_content(&large).unwrap(), None);

        let missing = contents(None, None);
        assert_eq!(inline_content(&missing).unwrap(), None);
    }

    fn response(status: u16, body: &'static str) -> Response {
        Response::from(
            axum::http::Response::builder()
                .status(status)
                .body(body)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_unauthorized_is_an_authentication_error() {
        let err = check(response(401, "Bad credentials")).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(ref body) if body == "Bad credentials"));
    }

    #[tokio::test]
    async fn test_other_failures_keep_status_and_body() {
        let err = check(response(403, "too_large")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Remote { status: 403, ref message } if message == "too_large"
        ));

        assert!(check(response(200, "{}")).await.is_ok());
    }
}
