pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{
    BuildArgs, CliArgs, Commands, ImportArgs, InitArgs, ProbeArgs, RenderArgs, ShowArgs,
    ValidateArgs,
};
pub use output::{OutputFormat, OutputFormatter};
