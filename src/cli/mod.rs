mod args;

pub use args::{
    CliArgs, CommandKind, CompletionsArgs, InitArgs, JobArgs, OutputFlags, build_cli,
};

pub fn parse() -> CliArgs {
    args::parse_args()
}
