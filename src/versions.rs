//! Chart version resolution
//!
//! A version stream is a git repository pinning chart versions at a given
//! ref. Version pinning is skipped entirely for chart names that denote a
//! local filesystem path.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::requirements::VersionStreamRef;
use crate::{git, Error, Result};

/// Whether the chart name denotes a relative or absolute filesystem path,
/// for which version resolution is meaningless.
pub fn is_local_chart(name: &str) -> bool {
    name.is_empty()
        || name.starts_with('.')
        || name.starts_with('/')
        || name.starts_with('\\')
        || name.matches('/').count() > 1
}

/// Resolves a chart's pinned version from a version stream
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionStreamClient: Send + Sync {
    async fn chart_version(&self, chart: &str, url: &str, git_ref: &str) -> Result<String>;
}

/// `VersionStreamClient` that clones the stream repository and reads the
/// chart's version file (`charts/<chart>.yml`).
#[derive(Debug, Default)]
pub struct GitVersionStream;

#[derive(Debug, Deserialize)]
struct VersionEntry {
    #[serde(default)]
    version: String,
}

#[async_trait]
impl VersionStreamClient for GitVersionStream {
    async fn chart_version(&self, chart: &str, url: &str, git_ref: &str) -> Result<String> {
        let dir = tempfile::tempdir()?;
        git::clone_repo(url, dir.path(), None)?;
        if !git_ref.is_empty() {
            git::checkout_branch(dir.path(), git_ref)?;
        }

        let file = dir.path().join("charts").join(format!("{chart}.yml"));
        if !file.exists() {
            return Err(Error::validation(format!(
                "version stream has no entry for chart {chart}"
            )));
        }
        let entry: VersionEntry = serde_yaml::from_str(&std::fs::read_to_string(&file)?)?;
        if entry.version.is_empty() {
            return Err(Error::validation(format!(
                "version stream entry for chart {chart} has no version"
            )));
        }
        Ok(entry.version)
    }
}

/// The Version Resolver component
pub struct VersionResolver<'a> {
    client: &'a dyn VersionStreamClient,
}

impl<'a> VersionResolver<'a> {
    pub fn new(client: &'a dyn VersionStreamClient) -> Self {
        Self { client }
    }

    /// Resolve the chart's pinned version, or an empty version for local
    /// chart paths.
    pub async fn resolve(&self, chart: &str, stream: &VersionStreamRef) -> Result<String> {
        if is_local_chart(chart) {
            return Ok(String::new());
        }
        self.client
            .chart_version(chart, &stream.url, &stream.git_ref)
            .await
            .map_err(|e| Error::VersionResolution {
                chart: chart.to_string(),
                url: stream.url.clone(),
                git_ref: stream.git_ref.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> VersionStreamRef {
        VersionStreamRef {
            url: "https://github.com/jenkins-x/jenkins-x-versions.git".to_string(),
            git_ref: "master".to_string(),
        }
    }

    #[test]
    fn local_chart_predicate() {
        assert!(is_local_chart(""));
        assert!(is_local_chart("./charts/boot"));
        assert!(is_local_chart("../boot"));
        assert!(is_local_chart("/opt/charts/boot"));
        assert!(is_local_chart("\\charts\\boot"));
        assert!(is_local_chart("a/b/c"));
        assert!(!is_local_chart("jx-labs/jxl-boot"));
        assert!(!is_local_chart("jxl-boot"));
    }

    #[tokio::test]
    async fn local_chart_skips_the_stream_client() {
        let mut client = MockVersionStreamClient::new();
        client.expect_chart_version().times(0);

        let resolver = VersionResolver::new(&client);
        let version = resolver.resolve("./charts/boot", &stream()).await.unwrap();
        assert_eq!(version, "");
    }

    #[tokio::test]
    async fn resolves_via_stream_client() {
        let mut client = MockVersionStreamClient::new();
        client
            .expect_chart_version()
            .withf(|chart, url, git_ref| {
                chart == "jx-labs/jxl-boot"
                    && url == "https://github.com/jenkins-x/jenkins-x-versions.git"
                    && git_ref == "master"
            })
            .times(1)
            .returning(|_, _, _| Ok("0.0.42".to_string()));

        let resolver = VersionResolver::new(&client);
        let version = resolver.resolve("jx-labs/jxl-boot", &stream()).await.unwrap();
        assert_eq!(version, "0.0.42");
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let mut client = MockVersionStreamClient::new();
        client
            .expect_chart_version()
            .times(2)
            .returning(|_, _, _| Ok("0.0.42".to_string()));

        let resolver = VersionResolver::new(&client);
        let first = resolver.resolve("jx-labs/jxl-boot", &stream()).await.unwrap();
        let second = resolver.resolve("jx-labs/jxl-boot", &stream()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failure_names_chart_stream_and_ref() {
        let mut client = MockVersionStreamClient::new();
        client
            .expect_chart_version()
            .returning(|_, _, _| Err(Error::command_failed("clone failed")));

        let resolver = VersionResolver::new(&client);
        let err = resolver
            .resolve("jx-labs/jxl-boot", &stream())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("jx-labs/jxl-boot"));
        assert!(message.contains("jenkins-x-versions"));
        assert!(message.contains("master"));
    }
}
