use clap::Parser;

use crate::cmds::api::{ApiCliArgs, Pagination};

#[derive(Parser)]
pub struct ApiCommand {
    #[clap(subcommand)]
    subcommand: ApiSubCommand,
}

#[derive(Parser)]
enum ApiSubCommand {
    #[clap(about = "GET a path relative to the account")]
    Get(GetPath),
    #[clap(about = "POST a JSON payload")]
    Post(SendPath),
    #[clap(about = "PUT a JSON payload")]
    Put(SendPath),
    #[clap(about = "DELETE a path relative to the account")]
    Delete(DeletePath),
}

#[derive(Parser)]
struct GetPath {
    /// Path relative to the account, e.g. /projects.json
    #[clap()]
    path: String,
    /// Follow Link headers and gather every page
    #[clap(long, conflicts_with = "page")]
    all: bool,
    /// Fetch this page only
    #[clap(long, value_name = "N")]
    page: Option<u32>,
}

#[derive(Parser)]
struct SendPath {
    /// Path relative to the account, e.g. /buckets/1/todolists/2/todos.json
    #[clap()]
    path: String,
    /// JSON payload
    #[clap(long, value_name = "JSON")]
    data: Option<String>,
}

#[derive(Parser)]
struct DeletePath {
    /// Path relative to the account
    #[clap()]
    path: String,
}

impl From<ApiCommand> for ApiOptions {
    fn from(cmd: ApiCommand) -> Self {
        match cmd.subcommand {
            ApiSubCommand::Get(options) => {
                let pagination = match (options.all, options.page) {
                    (true, _) => Pagination::All,
                    (false, Some(page)) => Pagination::Page(page),
                    (false, None) => Pagination::Single,
                };
                ApiOptions::Get(
                    ApiCliArgs::builder()
                        .path(options.path)
                        .pagination(pagination)
                        .build()
                        .unwrap(),
                )
            }
            ApiSubCommand::Post(options) => ApiOptions::Post(options.into()),
            ApiSubCommand::Put(options) => ApiOptions::Put(options.into()),
            ApiSubCommand::Delete(options) => ApiOptions::Delete(
                ApiCliArgs::builder().path(options.path).build().unwrap(),
            ),
        }
    }
}

impl From<SendPath> for ApiCliArgs {
    fn from(options: SendPath) -> Self {
        ApiCliArgs::builder()
            .path(options.path)
            .data(options.data)
            .build()
            .unwrap()
    }
}

pub enum ApiOptions {
    Get(ApiCliArgs),
    Post(ApiCliArgs),
    Put(ApiCliArgs),
    Delete(ApiCliArgs),
}
