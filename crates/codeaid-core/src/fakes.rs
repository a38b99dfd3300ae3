//! In-memory fakes of the external capabilities, for tests and dry runs.
//!
//! Each fake records every call so tests can assert on how many round trips
//! happened and with which arguments.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{CodeAidError, Result};
use crate::llm::TextGenerator;
use crate::process::{CommandExecutor, CommandOutput, CommandSpec};
use crate::sandbox::{ContainerRun, ContainerRuntime};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn output(command: String, exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        command,
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration_ms: 1,
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Text generator that replays a fixed sequence of replies.
///
/// Once the script is exhausted every further call fails with a
/// `Generator` error.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    /// Queue a transport-style failure.
    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.replies).push_back(Err(message.into()));
    }

    /// Every `(developer_instruction, user_content)` pair received so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, developer_instruction: &str, user_content: &str) -> Result<String> {
        lock(&self.calls).push((developer_instruction.to_string(), user_content.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(CodeAidError::Generator(message)),
            None => Err(CodeAidError::Generator("script exhausted".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeContainerRuntime
// ---------------------------------------------------------------------------

/// Scripted outcome of one `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunScript {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout,
    Cancelled,
    /// The runtime itself could not be driven.
    Unavailable(String),
}

impl RunScript {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        RunScript::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// A recorded image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCall {
    pub tag: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub timeout_secs: u64,
}

/// Container runtime that never touches a daemon.
///
/// `run` replays queued [`RunScript`]s (a clean exit once the queue is empty)
/// and captures the source files mounted into the container. Build, tag and
/// push succeed unless told to fail.
#[derive(Debug, Default)]
pub struct FakeContainerRuntime {
    run_script: Mutex<VecDeque<RunScript>>,
    runs: Mutex<Vec<ContainerRun>>,
    seen_sources: Mutex<Vec<String>>,
    images: Mutex<Vec<String>>,
    removed_images: Mutex<Vec<String>>,
    removed_containers: Mutex<Vec<String>>,
    operations: Mutex<Vec<String>>,
    builds: Mutex<Vec<BuildCall>>,
    list_calls: AtomicUsize,
    fail_build: Option<String>,
    fail_tag: Option<String>,
    fail_push: Option<String>,
    fail_image_removal: bool,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the local image cache.
    pub fn with_images<I, S>(self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.images).extend(images.into_iter().map(Into::into));
        self
    }

    pub fn failing_build(mut self, stderr: &str) -> Self {
        self.fail_build = Some(stderr.to_string());
        self
    }

    pub fn failing_tag(mut self, stderr: &str) -> Self {
        self.fail_tag = Some(stderr.to_string());
        self
    }

    pub fn failing_push(mut self, stderr: &str) -> Self {
        self.fail_push = Some(stderr.to_string());
        self
    }

    pub fn failing_image_removal(mut self) -> Self {
        self.fail_image_removal = true;
        self
    }

    pub fn script_run(&self, script: RunScript) {
        lock(&self.run_script).push_back(script);
    }

    pub fn runs(&self) -> Vec<ContainerRun> {
        lock(&self.runs).clone()
    }

    /// Contents of the files mounted into each run, in order.
    pub fn seen_sources(&self) -> Vec<String> {
        lock(&self.seen_sources).clone()
    }

    pub fn removed_images(&self) -> Vec<String> {
        lock(&self.removed_images).clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        lock(&self.removed_containers).clone()
    }

    /// Build, tag and push calls as `"<op> <args>"` strings.
    pub fn operations(&self) -> Vec<String> {
        lock(&self.operations).clone()
    }

    pub fn builds(&self) -> Vec<BuildCall> {
        lock(&self.builds).clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn capture_sources(&self, mount: &Path) {
        let Ok(entries) = std::fs::read_dir(mount) else {
            return;
        };
        for entry in entries.flatten() {
            if let Ok(contents) = std::fs::read_to_string(entry.path()) {
                lock(&self.seen_sources).push(contents);
            }
        }
    }

    fn command_result(command: String, failure: &Option<String>) -> CommandOutput {
        match failure {
            Some(stderr) => output(command, 1, "", stderr),
            None => output(command, 0, "ok\n", ""),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn run(&self, run: &ContainerRun, cancel: &CancellationToken) -> Result<CommandOutput> {
        lock(&self.runs).push(run.clone());
        if cancel.is_cancelled() {
            return Err(CodeAidError::Cancelled {
                operation: "docker".to_string(),
            });
        }
        self.capture_sources(&run.mount);
        lock(&self.images).push(run.image.clone());

        let script = lock(&self.run_script)
            .pop_front()
            .unwrap_or_else(|| RunScript::exit(0, "", ""));
        let command = format!("docker run {} {}", run.image, run.command.join(" "));
        match script {
            RunScript::Exit {
                code,
                stdout,
                stderr,
            } => Ok(output(command, code, &stdout, &stderr)),
            RunScript::Timeout => Err(CodeAidError::Timeout {
                operation: "docker".to_string(),
                limit_secs: run.timeout_secs,
            }),
            RunScript::Cancelled => Err(CodeAidError::Cancelled {
                operation: "docker".to_string(),
            }),
            RunScript::Unavailable(reason) => Err(CodeAidError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                reason,
            ))),
        }
    }

    async fn build(
        &self,
        tag: &str,
        dockerfile: &Path,
        context: &Path,
        timeout_secs: u64,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        lock(&self.builds).push(BuildCall {
            tag: tag.to_string(),
            dockerfile: dockerfile.to_path_buf(),
            context: context.to_path_buf(),
            timeout_secs,
        });
        let command = format!("docker build -t {} -f {} .", tag, dockerfile.display());
        lock(&self.operations).push(command.clone());
        Ok(Self::command_result(command, &self.fail_build))
    }

    async fn tag(
        &self,
        source: &str,
        target: &str,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let command = format!("docker tag {} {}", source, target);
        lock(&self.operations).push(command.clone());
        Ok(Self::command_result(command, &self.fail_tag))
    }

    async fn push(&self, image: &str, _cancel: &CancellationToken) -> Result<CommandOutput> {
        let command = format!("docker push {}", image);
        lock(&self.operations).push(command.clone());
        Ok(Self::command_result(command, &self.fail_push))
    }

    async fn list_images(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.images).clone())
    }

    async fn remove_image(&self, image: &str, _cancel: &CancellationToken) -> Result<()> {
        if self.fail_image_removal {
            return Err(CodeAidError::Housekeeping(format!(
                "image {} is in use",
                image
            )));
        }
        lock(&self.images).retain(|i| i != image);
        lock(&self.removed_images).push(image.to_string());
        Ok(())
    }

    async fn remove_container(&self, name: &str, _cancel: &CancellationToken) -> Result<()> {
        lock(&self.removed_containers).push(name.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingExecutor
// ---------------------------------------------------------------------------

/// Scripted outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedCommand {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout,
}

impl ScriptedCommand {
    pub fn ok(stdout: &str) -> Self {
        ScriptedCommand::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        ScriptedCommand::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Command executor that records specs and replays scripted outcomes.
///
/// Queued outcomes are consumed first; afterwards every command gets the
/// fallback outcome.
#[derive(Debug)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    script: Mutex<VecDeque<ScriptedCommand>>,
    fallback: ScriptedCommand,
}

impl RecordingExecutor {
    pub fn new(fallback: ScriptedCommand) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback,
        }
    }

    pub fn succeeding(stdout: &str) -> Self {
        Self::new(ScriptedCommand::ok(stdout))
    }

    pub fn failing(code: i32, stderr: &str) -> Self {
        Self::new(ScriptedCommand::fail(code, stderr))
    }

    pub fn with_script<I>(self, script: I) -> Self
    where
        I: IntoIterator<Item = ScriptedCommand>,
    {
        lock(&self.script).extend(script);
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        lock(&self.calls).push(spec.clone());
        if cancel.is_cancelled() {
            return Err(CodeAidError::Cancelled {
                operation: spec.program().to_string(),
            });
        }
        let next = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match next {
            ScriptedCommand::Exit {
                code,
                stdout,
                stderr,
            } => Ok(output(spec.display(), code, &stdout, &stderr)),
            ScriptedCommand::Timeout => Err(CodeAidError::Timeout {
                operation: spec.program().to_string(),
                limit_secs: spec.timeout_secs,
            }),
        }
    }
}
