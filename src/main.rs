use std::io::{self, IsTerminal, Write};

use clusterdiff::cli::{self, CliArgs};
use clusterdiff::commands;
use clusterdiff::error;
use clusterdiff::output::json;
use owo_colors::OwoColorize;

const EXIT_FATAL: i32 = 1;

fn main() {
    let args = cli::parse();
    init_logging(&args);

    match commands::dispatch(&args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let message = format!("{:#}", err);
            let kind = error::classify_error(&err);
            if args.output.json {
                let payload = json::error_json(&message, kind.as_str());
                if let Ok(body) = json::emit_json_value(&payload, true) {
                    let _ = writeln!(io::stderr(), "{}", body);
                }
            } else {
                print_error(&message);
            }
            std::process::exit(EXIT_FATAL);
        }
    }
}

fn init_logging(args: &CliArgs) {
    let filter = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info,tiberius=error,mysql_async=warn",
            1 => "debug,tiberius=warn,mysql_async=warn",
            _ => "trace",
        }
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(should_color_stderr())
        .try_init();
}

fn print_error(message: &str) {
    if should_color_stderr() {
        let line = format!("Error: {}", message);
        let _ = writeln!(io::stderr(), "{}", line.red());
    } else {
        let _ = writeln!(io::stderr(), "Error: {}", message);
    }
}

fn should_color_stderr() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    io::stderr().is_terminal()
}
