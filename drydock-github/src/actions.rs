//! Workflow file and workflow run endpoints

use reqwest::RequestBuilder;
use serde::Deserialize;

use crate::GitHubClient;
use crate::error::Result;

const WORKFLOW_DIR: &str = ".github/workflows";

/// Media type that makes the contents endpoint return the file itself
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

/// A workflow definition file and its raw YAML content
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl ContentEntry {
    fn is_workflow(&self) -> bool {
        self.kind == "file"
            && self.path.starts_with(WORKFLOW_DIR)
            && !self.path.contains("..")
            && (self.name.ends_with(".yml") || self.name.ends_with(".yaml"))
    }
}

#[derive(Debug, Deserialize)]
struct RunsPage {
    total_count: u32,
}

impl GitHubClient {
    // =============================================================================
    // Workflows
    // =============================================================================

    /// Fetch every workflow file of a repository
    ///
    /// A repository without a `.github/workflows` directory has no workflows; that is
    /// not an error.
    pub async fn list_workflow_files(&self, owner: &str, repo: &str) -> Result<Vec<WorkflowFile>> {
        let path = format!("repos/{}/{}/contents/{}", owner, repo, WORKFLOW_DIR);
        let entries: Vec<ContentEntry> = match self.get_json(&path).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries.into_iter().filter(ContentEntry::is_workflow) {
            let response = self.raw_file_request(owner, repo, &entry.path).send().await?;
            let content = self.handle_text_response(response).await?;
            files.push(WorkflowFile {
                name: entry.name,
                content,
            });
        }

        Ok(files)
    }

    /// Request for a file's raw content through the contents endpoint
    ///
    /// The file is read from the API host itself, never from the `download_url`
    /// the listing returns, so the token only ever goes to `base_url`.
    fn raw_file_request(&self, owner: &str, repo: &str, path: &str) -> RequestBuilder {
        let url = self.url(&format!("repos/{}/{}/contents/{}", owner, repo, path));
        self.authorized_as(self.client.get(url), RAW_MEDIA_TYPE)
    }

    // =============================================================================
    // Workflow Runs
    // =============================================================================

    /// Count workflow runs of a repository that are waiting for a runner
    ///
    /// `GET /repos/{owner}/{repo}/actions/runs?status=queued`
    pub async fn count_queued_runs(&self, owner: &str, repo: &str) -> Result<u32> {
        let path = format!(
            "repos/{}/{}/actions/runs?status=queued&per_page=1",
            owner, repo
        );
        let page: RunsPage = self.get_json(&path).await?;
        Ok(page.total_count)
    }
}
