//! Run command - trigger the boot Job and tail it to completion
//!
//! This command boots up a GitOps installation by:
//! 1. Resolving the canonical requirements document and git URL from the
//!    cluster, explicit overrides, local disk or the ambient git checkout
//! 2. Verifying the boot secret preconditions
//! 3. Submitting the boot Job chart via helm
//! 4. Supervising the Job's pod until it completes

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use clap::Args;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cluster::{DevEnvironmentSource, JobWatcher, KubeControlPlane, SecretSource};
use crate::helm::{BootJobCommand, HelmClient, BOOT_RELEASE};
use crate::requirements::{RequirementsDocument, VersionStreamRef};
use crate::versions::{GitVersionStream, VersionResolver, VersionStreamClient};
use crate::{git, Error, Result};

/// Default chart installing the boot Job
pub const DEFAULT_CHART_NAME: &str = "jx-labs/jxl-boot";

/// Chart repository hosting the default boot chart
pub const LABS_CHART_REPOSITORY: &str = "https://storage.googleapis.com/jenkinsxio-labs/charts";

/// Local name the labs chart repository is registered under
pub const LABS_CHART_REPOSITORY_NAME: &str = "jx-labs";

/// Bootstrap version stream repository, used until the requirements document
/// declares its own
pub const DEFAULT_VERSIONS_URL: &str = "https://github.com/jenkins-x/jenkins-x-versions.git";

/// Bootstrap version stream ref
pub const DEFAULT_VERSIONS_REF: &str = "master";

/// Name of the credential bundle expected in the target namespace
pub const BOOT_SECRET_NAME: &str = "jx-boot";

/// Required data key inside the boot secret
pub const BOOT_SECRET_KEY: &str = "secrets.yaml";

/// Name of the boot Job; its pods carry this value in the `job-name` label
pub const BOOT_JOB_NAME: &str = "jx-boot";

/// Container inside the boot Job pod whose logs are tailed
pub const BOOT_CONTAINER_NAME: &str = "boot";

const JOB_NAME_LABEL: &str = "job-name";

/// Trigger the boot Job for a cluster and tail it to completion
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory to look for the requirements file and charts
    #[arg(short = 'd', long, default_value = ".")]
    pub dir: PathBuf,

    /// Override the git clone URL of the dev environment repository,
    /// ignoring the cluster state. Normally specified with --git-ref as well
    #[arg(short = 'u', long = "git-url")]
    pub git_url: Option<String>,

    /// Git ref to use when cloning the --git-url override
    #[arg(long = "git-ref", default_value = "master")]
    pub git_ref: String,

    /// Chart name to use to install the boot Job
    #[arg(short = 'c', long = "chart", default_value = DEFAULT_CHART_NAME)]
    pub chart: String,

    /// Bootstrap URL for the versions repo, used until the requirements
    /// document declares one
    #[arg(long = "versions-repo", default_value = DEFAULT_VERSIONS_URL)]
    pub versions_repo: String,

    /// Bootstrap ref for the versions repo
    #[arg(long = "versions-ref", default_value = DEFAULT_VERSIONS_REF)]
    pub versions_ref: String,

    /// Helm logging level from 0 to 9, passed to helm via '-v'
    #[arg(short = 'v', long = "helm-log")]
    pub helm_log: Option<String>,

    /// Requirements file which overrides the default requirements lookup
    #[arg(short = 'r', long = "requirements")]
    pub requirements: Option<PathBuf>,

    /// Run in batch mode without prompting for user input
    #[arg(short = 'b', long = "batch-mode", env = "JX_BATCH_MODE")]
    pub batch_mode: bool,

    /// Create the boot Job even when already running inside the cluster
    #[arg(long)]
    pub job: bool,
}

/// Whether this invocation runs inside the target cluster.
///
/// Computed once at entry and passed down; components never re-detect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub in_cluster: bool,
}

impl ExecutionContext {
    /// Detect from the in-cluster service environment
    pub fn detect() -> Self {
        let in_cluster = std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
            && std::env::var_os("KUBERNETES_SERVICE_PORT").is_some();
        Self { in_cluster }
    }
}

/// How the installation executes, decided exactly once at entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Run the boot engine locally in this process's environment
    LocalRun,
    /// Submit the boot Job to the cluster and supervise it
    SupervisedJobRun,
}

impl BootMode {
    pub fn choose(job_mode: bool, context: ExecutionContext) -> Self {
        if job_mode || !context.in_cluster {
            BootMode::SupervisedJobRun
        } else {
            BootMode::LocalRun
        }
    }
}

/// Fetches a requirements document from a git URL
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequirementsFetcher: Send + Sync {
    async fn fetch(&self, git_url: &str) -> Result<RequirementsDocument>;
}

/// `RequirementsFetcher` that clones the URL at a ref into a temporary
/// directory and reads the requirements file from it.
pub struct GitRequirementsFetcher {
    pub git_ref: String,
}

#[async_trait]
impl RequirementsFetcher for GitRequirementsFetcher {
    async fn fetch(&self, git_url: &str) -> Result<RequirementsDocument> {
        let dir = tempfile::tempdir()?;
        git::clone_repo(git_url, dir.path(), None)?;
        if !self.git_ref.is_empty() {
            git::checkout_branch(dir.path(), &self.git_ref)?;
        }
        let (doc, _) = RequirementsDocument::load(dir.path(), None)?;
        Ok(doc)
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let context = ExecutionContext::detect();
    run_with_context(args, context).await
}

pub async fn run_with_context(args: RunArgs, context: ExecutionContext) -> Result<()> {
    match BootMode::choose(args.job, context) {
        BootMode::LocalRun => run_local(&args).await,
        BootMode::SupervisedJobRun => {
            let control_plane = KubeControlPlane::connect().await?;
            let fetcher = GitRequirementsFetcher {
                git_ref: args.git_ref.clone(),
            };
            let versions = GitVersionStream;
            let helm = HelmClient::new(&args.dir);
            let namespace = control_plane.namespace().to_string();

            let runner = BootRunner {
                args: &args,
                namespace,
                dev_env: &control_plane,
                secrets: &control_plane,
                watcher: &control_plane,
                fetcher: &fetcher,
                versions: &versions,
                helm,
            };
            runner.run_boot_job().await
        }
    }
}

/// Run the external boot engine locally, streaming its output
async fn run_local(args: &RunArgs) -> Result<()> {
    let mut command = Command::new("jx");
    command.arg("boot").arg("--dir").arg(&args.dir);
    if args.batch_mode {
        command.arg("--batch-mode");
    }
    command.stdout(Stdio::piped()).stderr(Stdio::inherit());

    let mut child = command.spawn()?;
    if let Some(stdout) = child.stdout.take() {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            info!("{}", line);
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(Error::command_failed("jx boot failed"));
    }
    Ok(())
}

/// Launches the boot Job and hands off to the supervisor.
///
/// All collaborators are injected fully constructed.
struct BootRunner<'a> {
    args: &'a RunArgs,
    namespace: String,
    dev_env: &'a dyn DevEnvironmentSource,
    secrets: &'a dyn SecretSource,
    watcher: &'a dyn JobWatcher,
    fetcher: &'a dyn RequirementsFetcher,
    versions: &'a dyn VersionStreamClient,
    helm: HelmClient,
}

impl BootRunner<'_> {
    async fn run_boot_job(&self) -> Result<()> {
        let (requirements, git_url) = find_requirements_and_git_url(
            self.dev_env,
            self.fetcher,
            &self.args.dir,
            self.args.git_url.as_deref(),
            self.args.requirements.as_deref(),
        )
        .await?;

        info!(
            "running the boot Job for cluster {} with git URL {}",
            requirements.cluster.cluster_name, git_url
        );

        // Absence of a prior release is the common case
        debug!("deleting any previous {BOOT_RELEASE} release ...");
        if let Err(e) = self.helm.delete_release(BOOT_RELEASE).await {
            debug!("failed to delete the old {BOOT_RELEASE} release: {e}");
        }

        verify_boot_secret(self.secrets, &requirements).await?;

        self.helm
            .add_repo_if_missing(LABS_CHART_REPOSITORY_NAME, LABS_CHART_REPOSITORY)
            .await?;
        if let Err(e) = self.helm.update_repos().await {
            warn!("failed to update helm repositories: {e}");
        }

        let stream = effective_version_stream(self.args, &requirements);
        let version = VersionResolver::new(self.versions)
            .resolve(&self.args.chart, &stream)
            .await?;

        let command = BootJobCommand::new(
            &requirements,
            &git_url,
            &self.args.chart,
            &version,
            self.args.helm_log.as_deref(),
            &self.args.dir,
        );
        info!("running the command:\n\n{}\n", command.command_line());
        command.execute().await?;

        tail_job_logs(self.watcher, &self.namespace).await
    }
}

/// The version stream to resolve chart versions against: the requirements
/// document's stream when declared, otherwise the bootstrap flags.
fn effective_version_stream(args: &RunArgs, requirements: &RequirementsDocument) -> VersionStreamRef {
    let mut stream = requirements.version_stream.clone();
    if stream.url.is_empty() {
        stream.url = args.versions_repo.clone();
    }
    if stream.git_ref.is_empty() {
        stream.git_ref = args.versions_ref.clone();
    }
    stream
}

/// Resolve the canonical `(requirements, git URL)` pair.
///
/// Sources are consulted in fixed precedence order: cluster dev environment
/// record, explicit override, local on-disk configuration, and finally the
/// ambient git checkout's upstream remote.
pub(crate) async fn find_requirements_and_git_url(
    dev_env: &dyn DevEnvironmentSource,
    fetcher: &dyn RequirementsFetcher,
    dir: &Path,
    git_url_override: Option<&str>,
    requirements_file: Option<&Path>,
) -> Result<(RequirementsDocument, String)> {
    let mut requirements: Option<RequirementsDocument> = None;
    let mut git_url = String::new();

    if let Some(record) = dev_env.dev_environment().await? {
        git_url = record.source_url.clone();
        if let Some(yaml) = &record.boot_requirements {
            match RequirementsDocument::from_yaml(yaml) {
                Ok(doc) => requirements = Some(doc),
                // Non-fatal: later sources may still yield a document
                Err(e) => debug!("failed to load requirements from team settings: {e}"),
            }
        }
    }

    if let Some(override_url) = git_url_override {
        if !override_url.is_empty() {
            git_url = override_url.to_string();
            if requirements.is_none() {
                let doc = fetcher.fetch(&git_url).await.map_err(|e| {
                    Error::resolution(format!(
                        "failed to get requirements from git URL {git_url}: {e}"
                    ))
                })?;
                requirements = Some(doc);
            }
        }
    }

    let requirements = match requirements {
        Some(doc) => doc,
        None => RequirementsDocument::load(dir, requirements_file)?.0,
    };

    if git_url.is_empty() {
        git_url = find_git_url_from_dir(dir).map_err(|e| {
            Error::resolution(format!(
                "your cluster has not been booted before and you are not inside a git clone \
                 of your dev environment repository so you need to pass in the URL of the git \
                 repository as --git-url: {e}"
            ))
        })?;
    }

    if git_url.is_empty() {
        return Err(Error::resolution(
            "no git URL could be resolved: please pass --git-url",
        ));
    }

    Ok((requirements, git_url))
}

fn find_git_url_from_dir(dir: &Path) -> Result<String> {
    let config_dir = git::find_git_config_dir(dir)?;
    if config_dir.is_none() {
        return Err(Error::resolution(format!(
            "no .git directory could be found from dir {}",
            dir.display()
        )));
    }
    git::discover_upstream_url(dir)
}

/// Check that the boot secret exists and is well-formed before any remote
/// action is taken. Read-only apart from log output.
pub(crate) async fn verify_boot_secret(
    secrets: &dyn SecretSource,
    requirements: &RequirementsDocument,
) -> Result<()> {
    let namespace = secrets.namespace();
    let required = &requirements.cluster.namespace;
    if !required.is_empty() && required != &namespace {
        return Err(Error::NamespaceMismatch {
            current: namespace,
            required: required.clone(),
        });
    }

    let secret = match secrets.get_secret(BOOT_SECRET_NAME).await {
        Ok(Some(secret)) => secret,
        Ok(None) => {
            warn_no_secret(&namespace, BOOT_SECRET_NAME);
            return Err(Error::MissingSecret {
                name: BOOT_SECRET_NAME.to_string(),
                namespace,
            });
        }
        Err(e) => {
            warn_no_secret(&namespace, BOOT_SECRET_NAME);
            return Err(Error::SecretRead {
                name: BOOT_SECRET_NAME.to_string(),
                namespace,
                message: e.to_string(),
            });
        }
    };

    let Some(data) = secret.data else {
        return Err(Error::NullSecret {
            name: BOOT_SECRET_NAME.to_string(),
            namespace,
        });
    };

    let has_key = data
        .get(BOOT_SECRET_KEY)
        .map(|value| !value.0.is_empty())
        .unwrap_or(false);
    if !has_key {
        return Err(Error::SecretKeyMissing {
            name: BOOT_SECRET_NAME.to_string(),
            namespace,
            key: BOOT_SECRET_KEY.to_string(),
        });
    }
    Ok(())
}

fn warn_no_secret(namespace: &str, name: &str) {
    warn!("boot secret {name} not found in namespace {namespace}");
    info!("Are you running in the correct namespace and cluster?");
    info!("Did you remember to import or edit the secrets before running boot?");
}

/// Supervise the boot Job pod to a terminal outcome.
///
/// Pods may be recreated or rescheduled, so each iteration rediscovers the
/// pod by label selector rather than trusting a previously seen identity.
pub(crate) async fn tail_job_logs(watcher: &dyn JobWatcher, namespace: &str) -> Result<()> {
    let selector = format!("{JOB_NAME_LABEL}={BOOT_JOB_NAME}");
    loop {
        let pod = watcher.wait_for_ready_pod(&selector).await?;
        if pod.is_empty() {
            return Err(Error::NoPodFound {
                namespace: namespace.to_string(),
                selector,
            });
        }

        if let Err(e) = watcher.tail_logs(&pod, BOOT_CONTAINER_NAME).await {
            // A stream error is treated the same as end of logs; the job
            // outcome is never inferred from the stream itself.
            debug!("log stream for pod {pod} ended with an error: {e}");
            return Ok(());
        }

        let observation = watcher
            .get_pod(&pod)
            .await
            .map_err(|e| Error::PodFetch {
                pod: pod.clone(),
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;

        if observation.completed {
            info!("the boot Job pod {pod} has completed successfully");
            return Ok(());
        }
        warn!(
            "boot Job pod {pod} is not completed but has status: {}",
            observation.status
        );
    }
}
