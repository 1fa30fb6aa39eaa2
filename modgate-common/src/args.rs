//! Command line shared by gateway binaries.

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

#[derive(Parser, Debug, Clone)]
#[command(about = "modgate protocol gateway", version)]
pub struct GatewayArgs {
    /// JSON5 configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Log level or filter directive, overrides `logging.level`
    #[arg(long)]
    pub log_level: Option<String>,
}

impl GatewayArgs {
    /// Parse the process arguments, using `default_config` when `--config` is absent.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::try_parse_from_with_default(std::env::args_os(), default_config)
            .unwrap_or_else(|e| e.exit())
    }

    /// Like [`parse_with_default`](Self::parse_with_default) over explicit arguments.
    pub fn try_parse_from_with_default<I, T>(
        args: I,
        default_config: &'static str,
    ) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .try_get_matches_from(args)?;

        Self::from_arg_matches(&matches)
    }
}
