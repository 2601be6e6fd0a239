//! Generated pages in the workspace repository.

use std::fmt::Write;

use crate::error::ValidationError;
use crate::github::CommitInfo;
use crate::models::{AssessmentState, AssignmentDefinition, StatusMap, StudentMapping};

pub const STATUS_PAGE_PATH: &str = "README.md";
pub const NO_COMMITS: &str = "No commits before deadline.";
pub const PROCESSING_FAILED: &str = "Processing failed.";

pub fn grading_dir(assessment: &str) -> String {
    format!("grading/{}", assessment)
}

pub fn closing_report_path(assessment: &str) -> String {
    format!("{}/README.md", grading_dir(assessment))
}

/// Markdown table, header first. Every cell is followed by a pipe.
pub fn markdown_table(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (idx, row) in rows.iter().enumerate() {
        out.push_str("\n|");
        if idx == 1 {
            for _ in row {
                out.push_str("---|");
            }
            out.push_str("\n|");
        }
        for cell in row {
            out.push_str(cell);
            out.push('|');
        }
    }
    out
}

/// The workspace `README.md`: one row per assessment, closed ones linking
/// to their grading report.
pub fn status_page(prefix: &str, status: &StatusMap) -> String {
    let mut rows = vec![vec!["Name".to_string(), "Status".to_string()]];
    for (name, state) in status {
        let cell = match state {
            AssessmentState::Closed => format!("[Closed]({})", closing_report_path(name)),
            other => other.to_string(),
        };
        rows.push(vec![name.clone(), cell]);
    }
    format!(
        "# {} - Instructors\n## Assessment status\n{}",
        prefix,
        markdown_table(&rows)
    )
}

/// `{group}_{YYYYmmdd_HHMMSS}_{sha7}` with the commit time in the
/// assessment's local time.
pub fn snapshot_name(
    group: &str,
    commit: &CommitInfo,
    definition: &AssignmentDefinition,
) -> Result<String, ValidationError> {
    let local = definition.to_local(commit.committed_at)?;
    Ok(format!(
        "{}_{}_{}",
        group,
        local.format("%Y%m%d_%H%M%S"),
        commit.short_sha()
    ))
}

/// Outcome for one group when closing an assessment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Archived { view: String, download: String },
    NoCommits,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub group: String,
    pub members: Vec<String>,
    pub submission: Submission,
}

impl ReportRow {
    fn students_cell(&self, mapping: &StudentMapping) -> String {
        self.members
            .iter()
            .map(|login| format!("{} ({})", login, mapping.id_of(login).unwrap_or("unknown")))
            .collect::<Vec<_>>()
            .join("<br />\n")
    }
}

pub fn closing_report(
    prefix: &str,
    assessment: &str,
    definition: &AssignmentDefinition,
    rows: &[ReportRow],
    mapping: &StudentMapping,
) -> String {
    let mut table = String::from(
        "<table><tr><th>Group Name</th><th>Students</th><th>View Submission</th><th>Download Submission</th></tr>",
    );

    for row in rows {
        let (view, download) = match &row.submission {
            Submission::Archived { view, download } => (view.as_str(), download.as_str()),
            Submission::NoCommits => (NO_COMMITS, NO_COMMITS),
            Submission::Failed => (PROCESSING_FAILED, PROCESSING_FAILED),
        };
        let _ = write!(
            table,
            "\n<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            row.group,
            row.students_cell(mapping),
            view,
            download
        );
    }
    table.push_str("\n</table>");

    format!(
        "# {} - Instructors\n## Assessment: {}\n### Deadline: {}\n{}",
        prefix, assessment, definition.deadline, table
    )
}

/// Link from the closing report to the group repository tree at `sha`.
pub fn view_link(group_repo: &str, sha: &str) -> String {
    format!("<a href=\"../../../../../{}/tree/{}\">View</a>", group_repo, sha)
}

/// Link from the closing report to the archived snapshot.
pub fn download_link(main_branch: &str, assessment: &str, snapshot: &str, compressed: bool) -> String {
    if compressed {
        format!(
            "<a href=\"../../../../raw/{}/grading/{}/{}.zip\">Download</a>",
            main_branch, assessment, snapshot
        )
    } else {
        format!(
            "<a href=\"../../../../tree/{}/grading/{}/{}\">Download</a>",
            main_branch, assessment, snapshot
        )
    }
}
