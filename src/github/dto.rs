use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ContentFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
    #[serde(default)]
    pub content: Option<String>,
    /// `none` for files over 1 MB, whose bytes only the blob API returns.
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PutContentRequest<'a> {
    pub message: &'a str,
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TreeResponse {
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct BlobResponse {
    pub content: String,
    pub encoding: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRepoRequest<'a> {
    pub name: &'a str,
    pub private: bool,
    pub auto_init: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateTeamRequest<'a> {
    pub name: &'a str,
    pub privacy: &'a str,
    pub permission: &'a str,
}

#[derive(Debug, Serialize)]
pub struct PermissionRequest<'a> {
    pub permission: &'a str,
}

#[derive(Debug, Serialize)]
pub struct MembershipRequest<'a> {
    pub role: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct TeamMembership {
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct BranchResponse {
    pub commit: CommitRef,
}

#[derive(Debug, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ProtectionResponse {
    #[serde(default)]
    pub required_status_checks: Option<StatusChecks>,
    #[serde(default)]
    pub enforce_admins: Option<Enabled>,
    #[serde(default)]
    pub required_pull_request_reviews: Option<PullRequestReviews>,
    #[serde(default)]
    pub restrictions: Option<Restrictions>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChecks {
    #[serde(default)]
    pub contexts: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Enabled {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestReviews {
    #[serde(default)]
    pub required_approving_review_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct Restrictions {
    #[serde(default)]
    pub users: Vec<Account>,
    #[serde(default)]
    pub teams: Vec<TeamRef>,
}

#[derive(Debug, Deserialize)]
pub struct TeamRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PullResponse {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub head: PullHead,
}

#[derive(Debug, Deserialize)]
pub struct PullHead {
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePullRequest<'a> {
    pub title: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Serialize)]
pub struct UpdatePullRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CompareResponse {
    pub ahead_by: u64,
}

#[derive(Debug, Deserialize)]
pub struct IssueResponse {
    pub number: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateIssueRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub labels: &'a [String],
    pub assignees: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
pub struct Signature {
    pub date: DateTime<Utc>,
}
