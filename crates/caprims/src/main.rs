mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Backend, Command, Global};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "caprims", version, about = "EPICS Channel Access primitives CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Channel Access backend.
    #[arg(long, value_name = "BACKEND", default_value = "loopback", global = true)]
    backend: Backend,

    /// Connect and IO timeout (e.g. 5s, 500ms).
    #[arg(
        long,
        value_name = "DURATION",
        env = "CAPRIMS_TIMEOUT",
        default_value = "1s",
        global = true
    )]
    timeout: String,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = cmd::parse_timeout(&cli.timeout).and_then(|timeout| {
        let global = Global {
            format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
            backend: cli.backend,
            timeout,
        };
        cmd::run(cli.command, &global)
    });

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
