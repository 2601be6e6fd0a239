use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Course configuration file as written by the instructor.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseConfigFile {
    pub org: String,
    pub org_username: String,
    #[serde(default)]
    pub github_api_token: Option<String>,
    pub prefix: String,
    pub repo_instructors: String,
    pub repo_update_branch: String,
    pub team_instructors: String,
    pub team_students: String,
    pub repo_instructors_path_config: String,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
    #[serde(default)]
    pub api_url: Option<String>,
}

fn default_main_branch() -> String {
    "master".to_string()
}

/// Static course settings, loaded once and read-only afterwards.
#[derive(Debug, Clone)]
pub struct CourseConfig {
    pub organisation: String,
    pub admin_username: String,
    pub api_token: String,
    pub api_url: String,
    pub prefix: String,
    pub workspace_repo: String,
    pub update_branch: String,
    pub main_branch: String,
    pub instructor_team: String,
    pub student_team: String,
    pub config_dir: String,
}

impl CourseConfig {
    /// Loads the file named by `COURSE_CONFIG`. `GITHUB_TOKEN` overrides the
    /// token stored in the file.
    pub fn new_from_env() -> Result<Self, AppError> {
        let path = env::var("COURSE_CONFIG")
            .map_err(|_| AppError::Config("COURSE_CONFIG is not set".to_string()))?;
        let mut config = Self::from_file(&path)?;
        if let Ok(token) = env::var("GITHUB_TOKEN") {
            config.api_token = token;
        }
        if config.api_token.is_empty() {
            return Err(AppError::Config(
                "no API token: set github_api_token or GITHUB_TOKEN".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read course config {}: {}", path.display(), e))
        })?;
        let file: CourseConfigFile = serde_json::from_str(&text).map_err(|e| {
            AppError::Config(format!("invalid course config {}: {}", path.display(), e))
        })?;
        Ok(Self::from(file))
    }

    pub fn group_repo(&self, assessment: &str, group: &str) -> String {
        format!("{}_{}_{}", self.prefix, assessment, group)
    }

    pub fn assessment_config_path(&self) -> String {
        format!("{}/assessment_config.json", self.config_dir)
    }

    pub fn assessment_status_path(&self) -> String {
        format!("{}/assessment_status.json", self.config_dir)
    }

    pub fn student_mapping_path(&self) -> String {
        format!("{}/student_mapping.csv", self.config_dir)
    }
}

impl From<CourseConfigFile> for CourseConfig {
    fn from(file: CourseConfigFile) -> Self {
        let prefixed = |name: &str| format!("{}_{}", file.prefix, name);
        Self {
            workspace_repo: prefixed(&file.repo_instructors),
            instructor_team: prefixed(&file.team_instructors),
            student_team: prefixed(&file.team_students),
            organisation: file.org,
            admin_username: file.org_username,
            api_token: file.github_api_token.unwrap_or_default(),
            api_url: file.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            update_branch: file.repo_update_branch,
            main_branch: file.main_branch,
            config_dir: file.repo_instructors_path_config.trim_end_matches('/').to_string(),
            prefix: file.prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "org": "uni-course",
        "org_username": "course-admin",
        "github_api_token": "ghp_example",
        "prefix": "cs101",
        "repo_instructors": "instructors",
        "repo_update_branch": "updates",
        "team_instructors": "staff",
        "team_students": "students",
        "repo_instructors_path_config": "config/"
    }"#;

    fn sample() -> CourseConfig {
        let file: CourseConfigFile = serde_json::from_str(SAMPLE).unwrap();
        CourseConfig::from(file)
    }

    #[test]
    fn test_derived_names_carry_prefix() {
        let config = sample();
        assert_eq!(config.workspace_repo, "cs101_instructors");
        assert_eq!(config.instructor_team, "cs101_staff");
        assert_eq!(config.student_team, "cs101_students");
        assert_eq!(config.group_repo("hw1", "alice"), "cs101_hw1_alice");
    }

    #[test]
    fn test_document_paths() {
        let config = sample();
        assert_eq!(config.assessment_config_path(), "config/assessment_config.json");
        assert_eq!(config.assessment_status_path(), "config/assessment_status.json");
        assert_eq!(config.student_mapping_path(), "config/student_mapping.csv");
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        assert_eq!(config.main_branch, "master");
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = CourseConfig::from_file("/nonexistent/course.json").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
