//! Container runtime capability and its Docker CLI backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{CodeAidError, Result};
use crate::process::{CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor};

/// One isolated container invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRun {
    /// Container name, used to force-remove it after a timeout.
    pub name: String,
    pub image: String,
    /// Host directory mounted at `/workspace`.
    pub mount: PathBuf,
    pub command: Vec<String>,
    pub memory: String,
    pub cpus: f64,
    pub network: String,
    pub timeout_secs: u64,
}

impl ContainerRun {
    fn argv(&self, bin: &str) -> Vec<String> {
        let mut argv = vec![
            bin.to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--memory".to_string(),
            self.memory.clone(),
            "--cpus".to_string(),
            self.cpus.to_string(),
            "--network".to_string(),
            self.network.clone(),
            "-v".to_string(),
            format!("{}:/workspace", self.mount.display()),
            self.image.clone(),
        ];
        argv.extend(self.command.iter().cloned());
        argv
    }
}

/// Operations the sandbox and the deployment pipeline need from a container runtime.
///
/// Command-style operations return the captured output even on non-zero exit;
/// `Err` means the runtime could not be driven at all (missing binary,
/// timeout, cancellation).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, run: &ContainerRun, cancel: &CancellationToken) -> Result<CommandOutput>;

    async fn build(
        &self,
        tag: &str,
        dockerfile: &Path,
        context: &Path,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput>;

    async fn tag(
        &self,
        source: &str,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput>;

    async fn push(&self, image: &str, cancel: &CancellationToken) -> Result<CommandOutput>;

    /// Locally cached images as `repository:tag` references.
    async fn list_images(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Remove a cached image (never forced).
    async fn remove_image(&self, image: &str, cancel: &CancellationToken) -> Result<()>;

    /// Force-remove a container by name; missing containers are not an error.
    async fn remove_container(&self, name: &str, cancel: &CancellationToken) -> Result<()>;
}

/// Docker CLI driven through a [`CommandExecutor`].
pub struct DockerCli<E: CommandExecutor = ProcessExecutor> {
    bin: String,
    executor: E,
    command_timeout_secs: u64,
}

impl DockerCli<ProcessExecutor> {
    pub fn new(bin: impl Into<String>, command_timeout_secs: u64) -> Self {
        Self::with_executor(bin, ProcessExecutor::new(), command_timeout_secs)
    }
}

impl<E: CommandExecutor> DockerCli<E> {
    pub fn with_executor(bin: impl Into<String>, executor: E, command_timeout_secs: u64) -> Self {
        Self {
            bin: bin.into(),
            executor,
            command_timeout_secs,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = std::iter::once(self.bin.clone()).chain(args.into_iter().map(Into::into));
        CommandSpec::new(argv, self.command_timeout_secs)
    }
}

#[async_trait]
impl<E: CommandExecutor> ContainerRuntime for DockerCli<E> {
    async fn run(&self, run: &ContainerRun, cancel: &CancellationToken) -> Result<CommandOutput> {
        let spec = CommandSpec::new(run.argv(&self.bin), run.timeout_secs);
        self.executor.execute(&spec, cancel).await
    }

    async fn build(
        &self,
        tag: &str,
        dockerfile: &Path,
        context: &Path,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let mut spec = self.command([
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            ".".to_string(),
        ]);
        spec.timeout_secs = timeout_secs;
        self.executor.execute(&spec.in_dir(context), cancel).await
    }

    async fn tag(
        &self,
        source: &str,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let spec = self.command(["tag", source, target]);
        self.executor.execute(&spec, cancel).await
    }

    async fn push(&self, image: &str, cancel: &CancellationToken) -> Result<CommandOutput> {
        let spec = self.command(["push", image]);
        self.executor.execute(&spec, cancel).await
    }

    async fn list_images(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let spec = self.command(["images", "--format", "{{.Repository}}:{{.Tag}}"]);
        let output = self.executor.execute(&spec, cancel).await?;
        if !output.success() {
            return Err(CodeAidError::Housekeeping(format!(
                "'{}' exited with {:?}: {}",
                output.command,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.contains("<none>"))
            .map(str::to_string)
            .collect())
    }

    async fn remove_image(&self, image: &str, cancel: &CancellationToken) -> Result<()> {
        let spec = self.command(["rmi", image]);
        let output = self.executor.execute(&spec, cancel).await?;
        if output.success() {
            Ok(())
        } else {
            Err(CodeAidError::Housekeeping(format!(
                "could not remove {}: {}",
                image,
                output.stderr.trim()
            )))
        }
    }

    async fn remove_container(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let spec = self.command(["rm", "-f", name]);
        let output = self.executor.execute(&spec, cancel).await?;
        if !output.success() && !output.stderr.contains("No such container") {
            tracing::warn!(container = %name, stderr = %output.stderr.trim(), "Container removal failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingExecutor;

    fn container_run() -> ContainerRun {
        ContainerRun {
            name: "codeaid-run1-0".into(),
            image: "python:3.12".into(),
            mount: PathBuf::from("/tmp/work"),
            command: vec!["python".into(), "/workspace/output.py".into()],
            memory: "512m".into(),
            cpus: 1.0,
            network: "none".into(),
            timeout_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_run_renders_isolated_invocation() {
        let docker = DockerCli::with_executor("docker", RecordingExecutor::succeeding("hi\n"), 30);
        let out = docker
            .run(&container_run(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.success());

        let calls = docker.executor().calls();
        assert_eq!(calls.len(), 1);
        let argv = &calls[0].argv;
        assert_eq!(&argv[..3], &["docker", "run", "--rm"]);
        assert!(argv.windows(2).any(|w| w == ["--network", "none"]));
        assert!(argv.windows(2).any(|w| w == ["-v", "/tmp/work:/workspace"]));
        assert_eq!(argv.last().map(String::as_str), Some("/workspace/output.py"));
        assert_eq!(calls[0].timeout_secs, 60);
    }

    #[tokio::test]
    async fn test_build_runs_in_context_with_build_timeout() {
        let docker = DockerCli::with_executor("docker", RecordingExecutor::succeeding(""), 30);
        docker
            .build(
                "svc:latest",
                Path::new("Dockerfile"),
                Path::new("/tmp/svc"),
                600,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let calls = docker.executor().calls();
        assert_eq!(calls[0].display(), "docker build -t svc:latest -f Dockerfile .");
        assert_eq!(calls[0].working_dir.as_deref(), Some(Path::new("/tmp/svc")));
        assert_eq!(calls[0].timeout_secs, 600);
    }

    #[tokio::test]
    async fn test_list_images_skips_dangling() {
        let docker = DockerCli::with_executor(
            "docker",
            RecordingExecutor::succeeding("python:3.12\n<none>:<none>\nopenjdk:17\n"),
            30,
        );
        let images = docker.list_images(&CancellationToken::new()).await.unwrap();
        assert_eq!(images, vec!["python:3.12", "openjdk:17"]);
    }

    #[tokio::test]
    async fn test_remove_image_failure_is_housekeeping_error() {
        let docker = DockerCli::with_executor(
            "docker",
            RecordingExecutor::failing(1, "image is being used"),
            30,
        );
        let err = docker
            .remove_image("python:3.12", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CodeAidError::Housekeeping(_)));
        assert_eq!(
            docker.executor().calls()[0].display(),
            "docker rmi python:3.12"
        );
    }
}
