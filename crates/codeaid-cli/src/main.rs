//! CodeAid CLI
//!
//! The `codeaid` command turns a source file plus a free-text instruction into
//! a validated artifact or a running workload.
//!
//! ## Commands
//!
//! - `detect`: Print the language a source file is written in
//! - `repair`: Generate, execute and repair code for one task
//! - `deploy`: Build, push and roll out a source file
//! - `request`: Process an inbound `{prompt, file?, filename?}` request

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codeaid_core::{
    build_repair_loop, detect_language, ApiEnvelope, CancellationToken, CodeRequest, CodeResponse,
    DockerCli, Language, OpenAiChat, OpenAiConfig, RepairLoop, SandboxConfig, TaskVariant,
    TextGenerator,
};
use codeaid_deploy::{DeployConfig, DeploymentPipeline, Kubectl};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "codeaid")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate, validate, repair and deploy code", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Route {
    Repair,
    Deploy,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected language of a source file
    Detect {
        /// Source file
        path: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Generate code for a task, run it in the sandbox and repair it until it runs
    Repair {
        /// Source file
        path: PathBuf,

        /// Task: version-upgrade, translate, optimize or bug-fix
        #[arg(short, long)]
        task: TaskVariant,

        /// Free-text instruction
        #[arg(short, long, default_value = "")]
        prompt: String,

        /// Text-generation model
        #[arg(long, env = "CODEAID_MODEL")]
        model: Option<String>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Build, push and roll out a source file
    Deploy {
        /// Source file
        path: PathBuf,

        /// Free-text instruction
        #[arg(short, long, default_value = "")]
        prompt: String,

        /// Text-generation model
        #[arg(long, env = "CODEAID_MODEL")]
        model: Option<String>,

        /// Directory holding per-service build contexts
        #[arg(long, env = "CODEAID_DEPLOY_ROOT")]
        deploy_root: Option<PathBuf>,

        /// Fail when the workload is observed but not Running/Completed
        #[arg(long)]
        require_healthy: bool,

        /// Append a generated summary to the report
        #[arg(long)]
        narrate: bool,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Process a request JSON file (`-` reads stdin)
    Request {
        /// Request JSON: {"prompt": ..., "file": ..., "filename": ...}
        path: PathBuf,

        #[arg(long, value_enum)]
        route: Route,

        /// Task, required for the repair route
        #[arg(short, long)]
        task: Option<TaskVariant>,

        /// Text-generation model
        #[arg(long, env = "CODEAID_MODEL")]
        model: Option<String>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    codeaid_core::init_tracing(cli.json, level);

    let cancel = cancel_on_ctrl_c();

    let succeeded = match cli.command {
        Commands::Detect { path, format } => cmd_detect(&path, format)?,
        Commands::Repair {
            path,
            task,
            prompt,
            model,
            format,
        } => {
            let request = load_source(&path, &prompt)?;
            let repair = repair_loop(model.as_deref())?;
            cmd_repair(&repair, &request, task, format, &cancel).await?
        }
        Commands::Deploy {
            path,
            prompt,
            model,
            deploy_root,
            require_healthy,
            narrate,
            format,
        } => {
            let request = load_source(&path, &prompt)?;
            let mut config = DeployConfig::from_env();
            if let Some(root) = deploy_root {
                config = config.with_deploy_root(root);
            }
            config.require_healthy = require_healthy;
            config.narrate_report = narrate;
            let pipeline = deployment_pipeline(config, model.as_deref())?;
            cmd_deploy(&pipeline, &request, format, &cancel).await?
        }
        Commands::Request {
            path,
            route,
            task,
            model,
            format,
        } => {
            let request = load_request(&path)?;
            match route {
                Route::Repair => {
                    let task = task.context("--task is required for the repair route")?;
                    let repair = repair_loop(model.as_deref())?;
                    cmd_repair(&repair, &request, task, format, &cancel).await?
                }
                Route::Deploy => {
                    let pipeline = deployment_pipeline(DeployConfig::from_env(), model.as_deref())?;
                    cmd_deploy(&pipeline, &request, format, &cancel).await?
                }
            }
        }
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Token cancelled on the first ctrl-c.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the in-flight run");
            child.cancel();
        }
    });
    token
}

fn text_generator(model: Option<&str>) -> Result<(Arc<dyn TextGenerator>, u64)> {
    let mut config = OpenAiConfig::from_env();
    if let Some(model) = model {
        config = config.with_model(model);
    }
    let timeout_secs = config.timeout_secs;
    let chat = OpenAiChat::new(config).context("Failed to construct text-generation client")?;
    Ok((Arc::new(chat), timeout_secs))
}

fn repair_loop(model: Option<&str>) -> Result<RepairLoop> {
    let (text, timeout_secs) = text_generator(model)?;
    let sandbox = SandboxConfig::from_env();
    let runtime = Arc::new(DockerCli::new(
        sandbox.docker_bin.clone(),
        sandbox.command_timeout_secs,
    ));
    Ok(build_repair_loop(text, runtime, timeout_secs, sandbox))
}

fn deployment_pipeline(config: DeployConfig, model: Option<&str>) -> Result<DeploymentPipeline> {
    let (text, _) = text_generator(model)?;
    if !config.registry.is_configured() {
        warn!("GCP_ARTIFACT_REGISTRY is not set; images will be pushed by bare name");
    }
    let runtime = Arc::new(DockerCli::new(
        config.docker_bin.clone(),
        config.command_timeout_secs,
    ));
    let orchestrator = Arc::new(Kubectl::new(
        config.kubectl_bin.clone(),
        config.namespace.clone(),
        config.command_timeout_secs,
    ));
    Ok(DeploymentPipeline::new(text, runtime, orchestrator, config))
}

/// Request built from a source file; the file's base name becomes `filename`.
fn load_source(path: &Path, prompt: &str) -> Result<CodeRequest> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file {:?}", path))?;
    let mut request = CodeRequest::new(prompt).with_source(source);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        request = request.with_filename(name);
    }
    Ok(request)
}

fn load_request(path: &Path) -> Result<CodeRequest> {
    let json = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file {:?}", path))?
    };
    serde_json::from_str(&json).context("Request is not valid {prompt, file?, filename?} JSON")
}

fn cmd_detect(path: &Path, format: Format) -> Result<bool> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file {:?}", path))?;
    let language = detect_language(&source);
    let detected = language != Language::Unknown;

    match format {
        Format::Text => println!("{}", language),
        Format::Json => {
            let envelope = if detected {
                ApiEnvelope::success(
                    "Language detected",
                    serde_json::json!({ "language": language }),
                )
            } else {
                ApiEnvelope::error("Could not determine the programming language")
            };
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
    }
    Ok(detected)
}

async fn cmd_repair(
    repair: &RepairLoop,
    request: &CodeRequest,
    task: TaskVariant,
    format: Format,
    cancel: &CancellationToken,
) -> Result<bool> {
    let run = repair.run(request, task, cancel).await;
    info!(
        run_id = %run.run_id,
        outcome = ?run.outcome,
        repairs = run.repairs_used(),
        "Repair run finished"
    );
    print_response(&run.response, format)?;
    Ok(run.succeeded())
}

async fn cmd_deploy(
    pipeline: &DeploymentPipeline,
    request: &CodeRequest,
    format: Format,
    cancel: &CancellationToken,
) -> Result<bool> {
    let run = pipeline.run(request, cancel).await;
    info!(
        service = %run.service_name,
        failed_stage = ?run.failed_stage,
        record = ?run.record_path,
        "Deployment run finished"
    );
    print_response(&run.response, format)?;
    Ok(run.succeeded())
}

fn print_response(response: &CodeResponse, format: Format) -> Result<()> {
    match format {
        Format::Text => print!("{}", render_response(response)),
        Format::Json => println!("{}", serde_json::to_string_pretty(&response.to_body())?),
    }
    Ok(())
}

fn render_response(response: &CodeResponse) -> String {
    format!(
        "=== File ===\n{}\n=== Filename ===\n{}\n=== Success Message ===\n{}\n=== Error Message ===\n{}\n=== Status ===\n{}\n",
        response.file,
        response.filename,
        response.success_msg().unwrap_or_default(),
        response.error_msg().unwrap_or_default(),
        response.status
    )
}
