//! Helm collaborator
//!
//! Wraps the external helm CLI for release deletion, chart repository
//! registration and boot Job submission. The submission command line is kept
//! verbatim so failures can be reproduced by an operator.

use std::path::PathBuf;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::requirements::RequirementsDocument;
use crate::{Error, Result};

/// Fixed release name of the boot Job chart
pub const BOOT_RELEASE: &str = "jx-boot";

/// Helm CLI client rooted at a working directory
pub struct HelmClient {
    bin: String,
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct HelmRepoEntry {
    name: String,
    url: String,
}

impl HelmClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: "helm".to_string(),
            dir: dir.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.bin)
            .args(args)
            .current_dir(&self.dir)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::command_failed(format!(
                "helm {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(stdout)
    }

    /// Delete a release by name
    pub async fn delete_release(&self, name: &str) -> Result<()> {
        self.run(&["delete", name]).await.map(|_| ())
    }

    /// Register a chart repository unless one with the same name or URL
    /// already exists. Returns whether the repository was added.
    pub async fn add_repo_if_missing(&self, name: &str, url: &str) -> Result<bool> {
        if self.repo_exists(name, url).await {
            debug!("chart repository {name} already registered");
            return Ok(false);
        }
        self.run(&["repo", "add", name, url])
            .await
            .map_err(|e| Error::ChartRepoAdd {
                repository: format!("{name} ({url})"),
                message: e.to_string(),
            })?;
        Ok(true)
    }

    async fn repo_exists(&self, name: &str, url: &str) -> bool {
        // `helm repo list` fails when no repositories are configured at all
        let Ok(out) = self.run(&["repo", "list", "-o", "json"]).await else {
            return false;
        };
        serde_json::from_str::<Vec<HelmRepoEntry>>(&out)
            .map(|repos| repos.iter().any(|r| r.name == name || r.url == url))
            .unwrap_or(false)
    }

    /// Refresh the chart repository indexes
    pub async fn update_repos(&self) -> Result<()> {
        self.run(&["repo", "update"]).await.map(|_| ())
    }
}

/// The installer-submission command with the resolved configuration, git URL,
/// chart name and version baked in as arguments.
pub struct BootJobCommand {
    name: String,
    args: Vec<String>,
    dir: PathBuf,
}

impl BootJobCommand {
    pub fn new(
        requirements: &RequirementsDocument,
        git_url: &str,
        chart: &str,
        version: &str,
        helm_log: Option<&str>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        let mut args: Vec<String> = ["install", BOOT_RELEASE, chart]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if !version.is_empty() {
            args.push("--version".to_string());
            args.push(version.to_string());
        }
        if let Some(level) = helm_log {
            args.push("-v".to_string());
            args.push(level.to_string());
        }

        args.push("--set".to_string());
        args.push(format!("boot.bootGitURL={git_url}"));

        let cluster_name = &requirements.cluster.cluster_name;
        if !cluster_name.is_empty() {
            args.push("--set".to_string());
            args.push(format!("boot.clusterName={cluster_name}"));
        }

        Self {
            name: "helm".to_string(),
            args,
            dir: dir.into(),
        }
    }

    /// The literal command line, for operator diagnosis
    pub fn command_line(&self) -> String {
        format!("{} {}", self.name, self.args.join(" "))
    }

    /// Execute the command, failing with the literal command line on error
    pub async fn execute(&self) -> Result<()> {
        let output = Command::new(&self.name)
            .args(&self.args)
            .current_dir(&self.dir)
            .output()
            .await
            .map_err(|e| Error::JobSubmission {
                command_line: self.command_line(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::JobSubmission {
                command_line: self.command_line(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::RequirementsDocument;

    fn requirements(cluster_name: &str) -> RequirementsDocument {
        let mut doc = RequirementsDocument::default();
        doc.cluster.cluster_name = cluster_name.to_string();
        doc
    }

    #[test]
    fn boot_job_command_bakes_in_all_arguments() {
        let cmd = BootJobCommand::new(
            &requirements("mycluster"),
            "https://github.com/myorg/environment-mycluster-dev.git",
            "jx-labs/jxl-boot",
            "1.2.3",
            None,
            ".",
        );

        let line = cmd.command_line();
        assert!(line.starts_with("helm install jx-boot jx-labs/jxl-boot"));
        assert!(line.contains("--version 1.2.3"));
        assert!(line
            .contains("boot.bootGitURL=https://github.com/myorg/environment-mycluster-dev.git"));
        assert!(line.contains("boot.clusterName=mycluster"));
    }

    #[test]
    fn boot_job_command_omits_empty_version() {
        let cmd = BootJobCommand::new(
            &requirements(""),
            "https://example.com/org/repo.git",
            "./charts/boot",
            "",
            None,
            ".",
        );

        let line = cmd.command_line();
        assert!(!line.contains("--version"));
        assert!(!line.contains("boot.clusterName"));
    }

    #[test]
    fn boot_job_command_passes_helm_log_level() {
        let cmd = BootJobCommand::new(
            &requirements("c"),
            "https://example.com/org/repo.git",
            "jx-labs/jxl-boot",
            "1.0.0",
            Some("9"),
            ".",
        );
        assert!(cmd.command_line().contains("-v 9"));
    }
}
