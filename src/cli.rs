pub mod api;

use std::path::PathBuf;

use clap::Parser;

use crate::api_defaults;

use self::api::{ApiCommand, ApiOptions};

#[derive(Parser)]
#[command(about = "A Basecamp command line client", version)]
pub(crate) struct Args {
    #[clap(subcommand)]
    pub command: Command,
    /// Verbose mode. Logs requests, rate limiting and retries
    #[clap(long, short, global = true)]
    pub verbose: bool,
    /// Path to the config file. Defaults to $HOME/.config/bc/api
    #[clap(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Config profile to use
    #[clap(long, global = true, default_value = api_defaults::DEFAULT_PROFILE)]
    pub profile: String,
}

#[derive(Parser)]
pub(crate) enum Command {
    #[clap(name = "api", about = "Raw requests against the Basecamp API")]
    Api(ApiCommand),
}

/// Options shared by every command.
pub struct CliArgs {
    pub verbose: bool,
    pub config: Option<PathBuf>,
    pub profile: String,
}

pub enum CliOptions {
    Api(ApiOptions),
}

pub struct OptionArgs {
    pub cli_options: CliOptions,
    pub cli_args: CliArgs,
}

impl From<Args> for OptionArgs {
    fn from(args: Args) -> Self {
        let cli_options = match args.command {
            Command::Api(sub_matches) => CliOptions::Api(sub_matches.into()),
        };
        OptionArgs {
            cli_options,
            cli_args: CliArgs {
                verbose: args.verbose,
                config: args.config,
                profile: args.profile,
            },
        }
    }
}

pub fn parse_cli() -> OptionArgs {
    Args::parse().into()
}
