use std::time::Duration;

use caprims_client::{Context, ContextConfig};
use caprims_dbr::DbrType;
use caprims_native::{EventMask, LoopbackServer, NativeBackend};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{ca_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod get;
pub mod info;
pub mod monitor;
pub mod put;
pub mod size;
pub mod status;
pub mod types;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the DBR type catalog.
    Types(TypesArgs),
    /// Print the buffer size of a DBR type and element count.
    Size(SizeArgs),
    /// Describe a Channel Access status code.
    Status(StatusArgs),
    /// Read process variables.
    Get(GetArgs),
    /// Write a process variable and read it back.
    Put(PutArgs),
    /// Print updates of process variables until stopped.
    Monitor(MonitorArgs),
    /// Print connection details of process variables.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Where channels are served from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process demo records (`catest`, `cabo`, `cawave`, ...).
    #[default]
    Loopback,
    /// The EPICS client library (requires the `libca` feature).
    Libca,
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Global {
    pub format: OutputFormat,
    pub backend: Backend,
    pub timeout: Duration,
}

pub fn run(command: Command, global: &Global) -> CliResult<i32> {
    match command {
        Command::Types(args) => types::run(args, global),
        Command::Size(args) => size::run(args, global),
        Command::Status(args) => status::run(args, global),
        Command::Get(args) => get::run(args, global),
        Command::Put(args) => put::run(args, global),
        Command::Monitor(args) => monitor::run(args, global),
        Command::Info(args) => info::run(args, global),
        Command::Version(args) => version::run(args, global),
    }
}

#[derive(Args, Debug)]
pub struct TypesArgs {
    /// Only list identifiers of this scalar kind (e.g. double, string).
    #[arg(long)]
    pub kind: Option<String>,
}

#[derive(Args, Debug)]
pub struct SizeArgs {
    /// DBR type name (DBR_TIME_DOUBLE, time_double) or identifier.
    pub dbr_type: String,
    /// Element count.
    #[arg(long, short = 'n', default_value = "1", allow_negative_numbers = true)]
    pub count: i64,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Status codes as returned by the client library.
    #[arg(required = true)]
    pub codes: Vec<i32>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Process variable names.
    #[arg(required = true)]
    pub pvs: Vec<String>,
    /// Request type (default: the native type).
    #[arg(long = "type", short = 't')]
    pub dbr_type: Option<DbrType>,
    /// Element count (default: the native count).
    #[arg(long, short = 'n')]
    pub count: Option<i64>,
    /// Decode numeric arrays into contiguous vectors.
    #[arg(long)]
    pub numeric_array: bool,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Process variable name.
    pub pv: String,
    /// Value, or several values for an array.
    #[arg(required = true, allow_negative_numbers = true)]
    pub values: Vec<String>,
    /// Write type (default: the native type).
    #[arg(long = "type", short = 't')]
    pub dbr_type: Option<DbrType>,
    /// Fail instead of truncating when more values than elements are given.
    #[arg(long)]
    pub reject_long: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Process variable names.
    #[arg(required = true)]
    pub pvs: Vec<String>,
    /// Update type (default: the native type with a time stamp).
    #[arg(long = "type", short = 't')]
    pub dbr_type: Option<DbrType>,
    /// Trigger mask, e.g. value,alarm.
    #[arg(long, value_parser = parse_mask)]
    pub mask: Option<EventMask>,
    /// Exit after printing N updates.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit after this long (e.g. 5s, 500ms).
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Process variable names.
    #[arg(required = true)]
    pub pvs: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_mask(input: &str) -> Result<EventMask, String> {
    input
        .parse()
        .map_err(|_| format!("invalid event mask: {input} (value, log, alarm, property)"))
}

/// Create the native backend selected on the command line.
pub fn backend(kind: Backend) -> CliResult<Box<dyn NativeBackend>> {
    match kind {
        Backend::Loopback => Ok(Box::new(LoopbackServer::with_demo_records())),
        #[cfg(feature = "libca")]
        Backend::Libca => Ok(Box::new(caprims_native::Libca)),
        #[cfg(not(feature = "libca"))]
        Backend::Libca => Err(CliError::new(
            USAGE,
            "the libca backend requires building with --features libca",
        )),
    }
}

/// A context on the selected backend, owned by the calling thread.
pub struct Session {
    pub ctx: Context,
    _backend: Box<dyn NativeBackend>,
}

impl Session {
    pub fn open(global: &Global, config: ContextConfig) -> CliResult<Self> {
        let backend = backend(global.backend)?;
        let ctx = Context::create(backend.as_ref(), config.with_pend_timeout(global.timeout))
            .map_err(|err| ca_error("context create failed", err))?;
        Ok(Self {
            ctx,
            _backend: backend,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ctx.destroy();
    }
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("bad").is_err());
        assert!(parse_timeout("").is_err());
    }

    #[test]
    fn mask_names_parse() {
        assert_eq!(parse_mask("value,alarm").unwrap(), EventMask::default());
        assert!(parse_mask("bogus").is_err());
    }

    #[cfg(not(feature = "libca"))]
    #[test]
    fn libca_backend_needs_the_feature() {
        let err = backend(Backend::Libca).err().unwrap();
        assert_eq!(err.code, USAGE);
    }
}
