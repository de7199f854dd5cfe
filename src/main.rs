use runpack::cli::commands::{CliArgs, Commands};
use runpack::cli::handlers::{
    handle_build, handle_import, handle_init, handle_probe, handle_render, handle_show,
    handle_validate,
};
use runpack::util::logging::{config_from_env, init_logging, parse_level};
use runpack::{NAME, VERSION};

use clap::Parser;
use std::process;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Init(init_args) => handle_init(init_args),
        Commands::Validate(validate_args) => handle_validate(validate_args),
        Commands::Render(render_args) => handle_render(render_args),
        Commands::Import(import_args) => handle_import(import_args),
        Commands::Show(show_args) => handle_show(show_args),
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Probe(probe_args) => handle_probe(probe_args).await,
    };

    process::exit(exit_code);
}

/// Command-line flags win over `RUNPACK_LOG_LEVEL`
fn init_logging_from_args(args: &CliArgs) {
    let mut config = config_from_env();
    if let Some(level_str) = &args.log_level {
        config.level = parse_level(level_str);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }
    init_logging(config);
}
