//! Command line arguments

use clap::{error::ErrorKind, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "llmserve", version, about = "Serve a pre-loaded LLM session over HTTP")]
pub struct Cli {
    /// Model configuration file (JSON)
    pub config: PathBuf,

    /// Server settings file (TOML, JSON or YAML)
    #[arg(long, env = "LLMSERVE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the bind port
    #[arg(long)]
    pub port: Option<u16>,
}

/// Outcome of argument parsing that does not start the server.
#[derive(Debug)]
pub enum CliExit {
    /// The config path is missing; print the usage line and exit with 1.
    Usage(String),
    /// Help, version or a malformed flag, handled by clap.
    Clap(clap::Error),
}

/// One-line usage message for `program`.
pub fn usage(program: &str) -> String {
    format!("Usage: {} config.json", program)
}

/// Parse `args`, the first item being the program name.
pub fn parse_from<I, T>(args: I) -> Result<Cli, CliExit>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    match Cli::try_parse_from(&args) {
        Ok(cli) => Ok(cli),
        Err(e) if e.kind() == ErrorKind::MissingRequiredArgument => {
            let program = args
                .first()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "llmserve".to_string());
            Err(CliExit::Usage(usage(&program)))
        }
        Err(e) => Err(CliExit::Clap(e)),
    }
}
