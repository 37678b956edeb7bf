use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "havoc-dbg",
    about = "Replay and debug recorded Havoc testcases",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "HAVOC_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "HAVOC_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve recorded testcases over the debug HTTP API
    Serve(ServeArgs),
    /// Open a debugging session and drive it from a prompt or script
    Attach(AttachArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(
        long,
        env = "HAVOC_LISTEN_ADDR",
        default_value = "127.0.0.1:4080",
        help = "Address to bind the HTTP listener to"
    )]
    pub listen: String,

    #[arg(
        long = "fixture",
        value_name = "PATH",
        help = "Fixture TOML to serve; repeatable. The built-in demo is served when omitted"
    )]
    pub fixtures: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    #[arg(
        long,
        env = "HAVOC_SERVER",
        default_value = "http://127.0.0.1:4080",
        help = "Base URL of the replay server"
    )]
    pub server: String,

    #[arg(
        long,
        env = "HAVOC_TOKEN",
        hide_env_values = true,
        help = "Bearer token sent with every request"
    )]
    pub token: Option<String>,

    #[arg(long, default_value = "demo")]
    pub project: String,

    #[arg(long = "run", default_value_t = 1)]
    pub run_id: u64,

    #[arg(long)]
    pub testcase: String,

    #[arg(
        long,
        value_name = "PATH",
        help = "Read debugger commands from a file instead of stdin"
    )]
    pub script: Option<PathBuf>,
}
