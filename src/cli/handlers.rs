//! Command handlers; each returns the process exit code
//!
//! 0 on success, 1 when validation, the build or the probe fails, 2 for usage
//! and configuration errors.

use super::commands::{
    BuildArgs, ImportArgs, InitArgs, ProbeArgs, RenderArgs, ShowArgs, ValidateArgs,
};
use super::output::{OutputFormat, OutputFormatter};
use crate::builder::{BuildEngine, BuildSession, DockerEngine, PlanOnlyEngine};
use crate::config::RunpackConfig;
use crate::descriptor::{parse_dockerfile, ImageDescriptor};
use crate::fs::RealFileSystem;
use crate::launcher::{ContractProbe, ProbeOptions};
use crate::progress::{LoggingHandler, NoOpHandler, ProgressHandler};
use crate::scaffold::Scaffolder;
use crate::validation::{ValidationContext, ValidationReport, Validator};

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

fn load_config() -> Result<RunpackConfig, i32> {
    match RunpackConfig::from_env() {
        Ok(config) => {
            debug!("{}", config);
            Ok(config)
        }
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("\nPlease check your RUNPACK_* environment variables.");
            Err(EXIT_USAGE)
        }
    }
}

fn load_descriptor(path: &Path) -> Result<ImageDescriptor, i32> {
    if !path.exists() {
        error!("Descriptor not found: {}", path.display());
        eprintln!("\nRun `runpack init` to scaffold one.");
        return Err(EXIT_USAGE);
    }
    ImageDescriptor::load(path).map_err(|e| {
        error!("{:#}", e);
        EXIT_FAILURE
    })
}

/// Build context: the explicit `--source`, else the descriptor's directory
fn source_root(source: Option<&PathBuf>, descriptor: &Path) -> PathBuf {
    if let Some(source) = source {
        return source.clone();
    }
    match descriptor.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn emit(content: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn run_validation(
    descriptor: &ImageDescriptor,
    root: &Path,
    config: &RunpackConfig,
    strict_ports: bool,
) -> ValidationReport {
    let fs = RealFileSystem::new();
    let ctx = ValidationContext::new(&fs)
        .with_source_root(root)
        .with_platform_port(config.platform_port)
        .with_port_env_var(config.port_env_var.clone())
        .with_strict_ports(strict_ports || config.strict_ports);
    Validator::new().report(descriptor, &ctx)
}

pub fn handle_init(args: &InitArgs) -> i32 {
    let config = match load_config() {
        Ok(c) => c,
        Err(code) => return code,
    };

    let path = match args.path.clone().map(Ok).unwrap_or_else(env::current_dir) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to get current directory: {}", e);
            return EXIT_USAGE;
        }
    };
    if !path.is_dir() {
        error!("Application path is not a directory: {}", path.display());
        return EXIT_USAGE;
    }
    let path = match path.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to canonicalize application path: {}", e);
            return EXIT_USAGE;
        }
    };

    let descriptor = match Scaffolder::detect(&RealFileSystem::new(), &path, &config) {
        Ok(d) => d,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_FAILURE;
        }
    };

    let formatter = OutputFormatter::new(args.format.into());
    let result = formatter
        .format_descriptor(&descriptor)
        .and_then(|content| emit(&content, args.output.as_ref()));
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    }
}

pub fn handle_validate(args: &ValidateArgs) -> i32 {
    let config = match load_config() {
        Ok(c) => c,
        Err(code) => return code,
    };
    let descriptor = match load_descriptor(&args.descriptor) {
        Ok(d) => d,
        Err(code) => return code,
    };

    let root = source_root(args.source.as_ref(), &args.descriptor);
    debug!(source = %root.display(), "Validating descriptor");
    let report = run_validation(&descriptor, &root, &config, args.strict_ports);

    match OutputFormatter::new(args.format.into()).format_report(&report) {
        Ok(output) => print!("{}", output),
        Err(e) => {
            error!("{:#}", e);
            return EXIT_FAILURE;
        }
    }

    if report.is_ok() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

pub fn handle_render(args: &RenderArgs) -> i32 {
    let descriptor = match load_descriptor(&args.descriptor) {
        Ok(d) => d,
        Err(code) => return code,
    };

    let result = descriptor
        .render_dockerfile()
        .map_err(anyhow::Error::from)
        .and_then(|dockerfile| emit(&dockerfile, args.output.as_ref()));
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    }
}

pub fn handle_import(args: &ImportArgs) -> i32 {
    let text = match fs::read_to_string(&args.dockerfile) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to read {}: {}", args.dockerfile.display(), e);
            return EXIT_USAGE;
        }
    };

    let result = parse_dockerfile(&text)
        .map_err(anyhow::Error::from)
        .and_then(|directives| ImageDescriptor::from_directives(&directives).map_err(Into::into))
        .and_then(|descriptor| OutputFormatter::new(args.format.into()).format_descriptor(&descriptor))
        .and_then(|content| emit(&content, args.output.as_ref()));
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!("Cannot import {}: {:#}", args.dockerfile.display(), e);
            EXIT_FAILURE
        }
    }
}

pub fn handle_show(args: &ShowArgs) -> i32 {
    let descriptor = match load_descriptor(&args.descriptor) {
        Ok(d) => d,
        Err(code) => return code,
    };

    let result = descriptor
        .plan()
        .map_err(anyhow::Error::from)
        .and_then(|plan| OutputFormatter::new(args.format.into()).format_summary(&descriptor, &plan));
    match result {
        Ok(output) => {
            print!("{}", output);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    }
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    let config = match load_config() {
        Ok(c) => c,
        Err(code) => return code,
    };
    let descriptor = match load_descriptor(&args.descriptor) {
        Ok(d) => d,
        Err(code) => return code,
    };
    let root = source_root(args.source.as_ref(), &args.descriptor);
    if !root.is_dir() {
        error!("Build context is not a directory: {}", root.display());
        return EXIT_USAGE;
    }

    let report = run_validation(&descriptor, &root, &config, args.strict_ports);
    for warning in report.warnings() {
        info!("{}", warning);
    }
    if !report.is_ok() {
        for finding in report.errors() {
            eprintln!("{}", finding);
        }
        error!("Descriptor failed validation; nothing was built");
        return EXIT_FAILURE;
    }

    let plan = match descriptor.plan() {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            return EXIT_FAILURE;
        }
    };

    let engine: Box<dyn BuildEngine> = if args.dry_run {
        Box::new(PlanOnlyEngine)
    } else {
        let engine = match DockerEngine::connect() {
            Ok(e) => e.with_no_cache(args.no_cache),
            Err(e) => {
                error!("{}", e);
                return EXIT_FAILURE;
            }
        };
        if let Err(e) = engine.ping().await {
            error!("{}", e);
            eprintln!("\nIs the container engine running? Set DOCKER_HOST for a remote engine.");
            return EXIT_FAILURE;
        }
        Box::new(engine)
    };

    let progress: Arc<dyn ProgressHandler> = if quiet {
        Arc::new(NoOpHandler)
    } else {
        Arc::new(LoggingHandler)
    };
    let session = BuildSession::new(plan, progress);

    match session.run(engine.as_ref(), &root, &args.tag).await {
        Ok(image) => match OutputFormatter::new(args.format.into()).format_built(&image) {
            Ok(output) => {
                print!("{}", output);
                EXIT_SUCCESS
            }
            Err(e) => {
                error!("{:#}", e);
                EXIT_FAILURE
            }
        },
        Err(e) => {
            error!(state = %session.state(), "Build failed");
            eprintln!("{}", e);
            EXIT_FAILURE
        }
    }
}

pub async fn handle_probe(args: &ProbeArgs) -> i32 {
    let config = match load_config() {
        Ok(c) => c,
        Err(code) => return code,
    };
    let descriptor = match load_descriptor(&args.descriptor) {
        Ok(d) => d,
        Err(code) => return code,
    };
    let contract = match descriptor.contract() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return EXIT_FAILURE;
        }
    };

    let options = ProbeOptions {
        startup_timeout: args
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.startup_timeout()),
        also_check: args.also_check.clone(),
        port_env_var: config.port_env_var.clone(),
        ..ProbeOptions::default()
    };

    let probe = match ContractProbe::connect() {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            return EXIT_FAILURE;
        }
    };

    let report = match probe.verify(&args.image, &contract, &options).await {
        Ok(r) => r,
        Err(e) => {
            error!("Probe failed: {}", e);
            return EXIT_FAILURE;
        }
    };

    match OutputFormatter::new(OutputFormat::Human).format_probe(&report) {
        Ok(output) => print!("{}", output),
        Err(e) => {
            error!("{:#}", e);
            return EXIT_FAILURE;
        }
    }

    if report.is_satisfied() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}
