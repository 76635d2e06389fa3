//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{message}")]
    Resolution { message: String },

    #[error("you are currently in the {current} namespace but this cluster needs to be booted in namespace {required}. please use 'jx ns {required}' to switch namespace")]
    NamespaceMismatch { current: String, required: String },

    #[error("boot secret {name} not found in namespace {namespace}. are you sure you are running this command in the right namespace and cluster")]
    MissingSecret { name: String, namespace: String },

    #[error("failed to look for boot secret {name} in namespace {namespace}: {message}")]
    SecretRead {
        name: String,
        namespace: String,
        message: String,
    },

    #[error("null boot secret {name} found in namespace {namespace}. are you sure you are running this command in the right namespace and cluster")]
    NullSecret { name: String, namespace: String },

    #[error("boot secret {name} in namespace {namespace} does not contain key: {key}")]
    SecretKeyMissing {
        name: String,
        namespace: String,
        key: String,
    },

    #[error("failed to find version of chart {chart} in version stream {url} ref {git_ref}: {message}")]
    VersionResolution {
        chart: String,
        url: String,
        git_ref: String,
        message: String,
    },

    #[error("failed to add chart repository {repository}: {message}")]
    ChartRepoAdd { repository: String, message: String },

    #[error("failed to run command {command_line}: {message}")]
    JobSubmission {
        command_line: String,
        message: String,
    },

    #[error("no pod found for namespace {namespace} with selector {selector}")]
    NoPodFound { namespace: String, selector: String },

    #[error("failed to get pod {pod} in namespace {namespace}: {message}")]
    PodFetch {
        pod: String,
        namespace: String,
        message: String,
    },

    #[error("failed to create repository {owner}/{name}: {message}")]
    RepositoryCreation {
        owner: String,
        name: String,
        message: String,
    },

    #[error("failed to push to the git repository: {message}")]
    Push { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn resolution(message: impl Into<String>) -> Self {
        Error::Resolution {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    pub fn push(message: impl Into<String>) -> Self {
        Error::Push {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_key_missing_names_the_key() {
        let err = Error::SecretKeyMissing {
            name: "jx-boot".to_string(),
            namespace: "jx".to_string(),
            key: "secrets.yaml".to_string(),
        };
        assert!(err.to_string().contains("does not contain key: secrets.yaml"));
    }

    #[test]
    fn namespace_mismatch_names_both_namespaces() {
        let err = Error::NamespaceMismatch {
            current: "default".to_string(),
            required: "jx".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("default"));
        assert!(message.contains("jx ns jx"));
    }

    #[test]
    fn job_submission_includes_command_line() {
        let err = Error::JobSubmission {
            command_line: "helm install jx-boot jx-labs/jxl-boot".to_string(),
            message: "exit status 1".to_string(),
        };
        assert!(err.to_string().contains("helm install jx-boot jx-labs/jxl-boot"));
    }
}
