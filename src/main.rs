use std::{path::PathBuf, sync::Arc};

use bc::{
    backoff::{Backoff, RetryConfig},
    basecamp::Basecamp,
    cli::{parse_cli, CliOptions},
    cmds,
    config::read_config,
    error,
    http::{ratelimit::RateLimiter, Client},
    Result,
};
use env_logger::Env;

const CONFIG_PATH: &str = ".config/bc/api";

fn main() -> Result<()> {
    let option_args = parse_cli();
    let cli_args = option_args.cli_args;
    if cli_args.verbose {
        let env = Env::default().default_filter_or("info");
        env_logger::init_from_env(env);
    }
    let config_file = match cli_args.config {
        Some(path) => path,
        None => {
            let home_dir = std::env::var("HOME")
                .map_err(|_| error::gen("HOME is not set. Use --config to point to a config file"))?;
            PathBuf::from(home_dir).join(CONFIG_PATH)
        }
    };
    let config = read_config(&config_file, &cli_args.profile)?;
    let limiter = Arc::new(RateLimiter::with_config(&config));
    limiter.set_debug(cli_args.verbose);
    let runner = Arc::new(Backoff::new(
        Arc::new(Client::default()),
        RetryConfig::with_config(&config),
    ));
    let client = Basecamp::new(&config, runner, limiter);
    match option_args.cli_options {
        CliOptions::Api(options) => cmds::api::execute(options, &client),
    }
}
