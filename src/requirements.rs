//! The boot requirements document
//!
//! `jx-requirements.yml` is the canonical description of a cluster's desired
//! installation state. It is loaded from the cluster's dev environment, from
//! a git clone, or from local disk, and treated as an immutable value once
//! resolved.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File name of the requirements document inside a dev environment repository
pub const REQUIREMENTS_FILE_NAME: &str = "jx-requirements.yml";

/// Environment key identifying the development environment entry
pub const DEV_ENVIRONMENT_KEY: &str = "dev";

/// Cluster identity and git server settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster name
    #[serde(default)]
    pub cluster_name: String,
    /// Namespace the cluster must be booted in (empty means any)
    #[serde(default)]
    pub namespace: String,
    /// Git server URL hosting the environment repositories
    #[serde(default)]
    pub git_server: String,
    /// Git provider kind (github, gitea, ...)
    #[serde(default)]
    pub git_kind: String,
    /// Owner of the environment git repositories
    #[serde(default)]
    pub environment_git_owner: String,
}

/// An environment entry; the `dev` entry is the dev environment descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repository: String,
}

/// Version stream reference: a git repository pinning tool/chart versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionStreamRef {
    #[serde(default)]
    pub url: String,
    #[serde(rename = "ref", default)]
    pub git_ref: String,
}

/// The canonical requirements document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsDocument {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    #[serde(default)]
    pub version_stream: VersionStreamRef,
}

impl RequirementsDocument {
    /// Parse a requirements document from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load the requirements document from a directory.
    ///
    /// `override_file` replaces the default `jx-requirements.yml` lookup when
    /// supplied (the `--requirements` flag). Returns the document and the
    /// path it was loaded from.
    pub fn load(dir: &Path, override_file: Option<&Path>) -> Result<(Self, PathBuf)> {
        let file = match override_file {
            Some(path) => path.to_path_buf(),
            None => dir.join(REQUIREMENTS_FILE_NAME),
        };
        if !file.exists() {
            return Err(Error::resolution(format!(
                "no requirements file {} found",
                file.display()
            )));
        }
        let content = std::fs::read_to_string(&file)?;
        Ok((Self::from_yaml(&content)?, file))
    }

    /// The dev environment descriptor, if the document declares one
    pub fn dev_environment(&self) -> Option<&EnvironmentConfig> {
        self.environments
            .iter()
            .find(|e| e.key == DEV_ENVIRONMENT_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cluster:
  clusterName: mycluster
  namespace: jx
  gitServer: https://github.com
  gitKind: github
  environmentGitOwner: myorg
environments:
- key: dev
  owner: myorg
  repository: environment-mycluster-dev
- key: staging
versionStream:
  url: https://github.com/jenkins-x/jenkins-x-versions.git
  ref: master
"#;

    #[test]
    fn parses_sample_document() {
        let doc = RequirementsDocument::from_yaml(SAMPLE).unwrap();
        assert_eq!(doc.cluster.cluster_name, "mycluster");
        assert_eq!(doc.cluster.namespace, "jx");
        assert_eq!(doc.cluster.git_kind, "github");
        assert_eq!(doc.version_stream.git_ref, "master");
        assert_eq!(doc.environments.len(), 2);
    }

    #[test]
    fn dev_environment_finds_dev_entry() {
        let doc = RequirementsDocument::from_yaml(SAMPLE).unwrap();
        let dev = doc.dev_environment().unwrap();
        assert_eq!(dev.owner, "myorg");
        assert_eq!(dev.repository, "environment-mycluster-dev");
    }

    #[test]
    fn dev_environment_none_when_missing() {
        let doc = RequirementsDocument::from_yaml("environments:\n- key: staging\n").unwrap();
        assert!(doc.dev_environment().is_none());
    }

    #[test]
    fn missing_fields_default() {
        let doc = RequirementsDocument::from_yaml("{}").unwrap();
        assert!(doc.cluster.cluster_name.is_empty());
        assert!(doc.environments.is_empty());
        assert!(doc.version_stream.url.is_empty());
    }

    #[test]
    fn load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REQUIREMENTS_FILE_NAME), SAMPLE).unwrap();

        let (doc, file) = RequirementsDocument::load(dir.path(), None).unwrap();
        assert_eq!(doc.cluster.cluster_name, "mycluster");
        assert!(file.ends_with(REQUIREMENTS_FILE_NAME));
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = RequirementsDocument::load(dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn load_with_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let override_path = dir.path().join("custom-requirements.yml");
        std::fs::write(&override_path, SAMPLE).unwrap();

        let (doc, file) = RequirementsDocument::load(dir.path(), Some(&override_path)).unwrap();
        assert_eq!(doc.cluster.namespace, "jx");
        assert_eq!(file, override_path);
    }
}
