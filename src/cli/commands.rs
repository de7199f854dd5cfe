use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_DESCRIPTOR: &str = "runpack.yaml";

/// Build descriptors for HTTP services on managed container platforms
#[derive(Parser, Debug)]
#[command(
    name = "runpack",
    about = "Build descriptors for HTTP services on managed container platforms",
    version,
    author,
    long_about = "runpack owns the container build descriptor of a Python HTTP service: it \
                  scaffolds and validates the descriptor, renders it to a Dockerfile, drives \
                  the image build stage by stage and verifies that the built image serves on \
                  the declared port."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Scaffold a descriptor for an application directory",
        long_about = "Inspects a Python application directory and writes a descriptor for it.\n\n\
                      Examples:\n  \
                      runpack init\n  \
                      runpack init ./service -o service/runpack.yaml\n  \
                      runpack init --format json"
    )]
    Init(InitArgs),

    #[command(
        about = "Validate a descriptor against its source tree",
        long_about = "Checks required fields, the base image pin, the build plan and that the \
                      application binds the declared port.\n\n\
                      Examples:\n  \
                      runpack validate\n  \
                      runpack validate runpack.yaml --source . --strict-ports"
    )]
    Validate(ValidateArgs),

    #[command(about = "Render the descriptor as a Dockerfile")]
    Render(RenderArgs),

    #[command(about = "Convert an existing Dockerfile into a descriptor")]
    Import(ImportArgs),

    #[command(about = "Summarize a descriptor and its fingerprint")]
    Show(ShowArgs),

    #[command(
        about = "Build the image",
        long_about = "Validates the descriptor, plans the build and runs it through the local \
                      container engine. A failing stage stops the build and no tag is produced.\n\n\
                      Examples:\n  \
                      runpack build --tag myapp:1.0\n  \
                      runpack build runpack.yaml --tag myapp:1.0 --source ./app\n  \
                      runpack build --tag myapp:1.0 --dry-run"
    )]
    Build(BuildArgs),

    #[command(
        about = "Run an image and check it serves on the declared port",
        long_about = "Starts the image the way the platform does, with the port variable set, and \
                      waits for the declared port to answer.\n\n\
                      Examples:\n  \
                      runpack probe --image myapp:1.0\n  \
                      runpack probe --image myapp:1.0 --also-check 5000,8000"
    )]
    Probe(ProbeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    #[arg(value_name = "PATH", help = "Application directory (defaults to current directory)")]
    pub path: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "FILE", help = "Write the descriptor to a file")]
    pub output: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "yaml", help = "Descriptor format")]
    pub format: DescriptorFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(value_name = "DESCRIPTOR", default_value = DEFAULT_DESCRIPTOR)]
    pub descriptor: PathBuf,

    #[arg(
        short = 's',
        long,
        value_name = "DIR",
        help = "Source tree to check (defaults to the descriptor's directory)"
    )]
    pub source: Option<PathBuf>,

    #[arg(long, help = "Fail when the bind port cannot be determined")]
    pub strict_ports: bool,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    #[arg(value_name = "DESCRIPTOR", default_value = DEFAULT_DESCRIPTOR)]
    pub descriptor: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", help = "Write the Dockerfile to a file")]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct ImportArgs {
    #[arg(value_name = "DOCKERFILE")]
    pub dockerfile: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", help = "Write the descriptor to a file")]
    pub output: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "yaml", help = "Descriptor format")]
    pub format: DescriptorFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ShowArgs {
    #[arg(value_name = "DESCRIPTOR", default_value = DEFAULT_DESCRIPTOR)]
    pub descriptor: PathBuf,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(value_name = "DESCRIPTOR", default_value = DEFAULT_DESCRIPTOR)]
    pub descriptor: PathBuf,

    #[arg(short = 't', long, value_name = "TAG", help = "Image tag to produce")]
    pub tag: String,

    #[arg(
        short = 's',
        long,
        value_name = "DIR",
        help = "Build context (defaults to the descriptor's directory)"
    )]
    pub source: Option<PathBuf>,

    #[arg(long, help = "Plan and report the steps without a container engine")]
    pub dry_run: bool,

    #[arg(long, help = "Do not reuse cached layers")]
    pub no_cache: bool,

    #[arg(long, help = "Fail when the bind port cannot be determined")]
    pub strict_ports: bool,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    #[arg(short = 'i', long, value_name = "IMAGE", help = "Image to run")]
    pub image: String,

    #[arg(value_name = "DESCRIPTOR", default_value = DEFAULT_DESCRIPTOR)]
    pub descriptor: PathBuf,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Startup timeout (defaults to RUNPACK_STARTUP_TIMEOUT)"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long,
        value_name = "PORTS",
        value_delimiter = ',',
        help = "Ports that must stay closed, comma-separated"
    )]
    pub also_check: Vec<u16>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormatArg {
    Yaml,
    Json,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

impl From<DescriptorFormatArg> for super::output::OutputFormat {
    fn from(arg: DescriptorFormatArg) -> Self {
        match arg {
            DescriptorFormatArg::Json => super::output::OutputFormat::Json,
            DescriptorFormatArg::Yaml => super::output::OutputFormat::Yaml,
        }
    }
}
