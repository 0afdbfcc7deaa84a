use std::io::Write;

use serde_json::Value;

use crate::{
    basecamp::Basecamp,
    cli::api::ApiOptions,
    error::{AddContext, BCError},
    io::{HttpRunner, Response},
    Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Pagination {
    #[default]
    Single,
    All,
    Page(u32),
}

#[derive(Builder)]
pub struct ApiCliArgs {
    pub path: String,
    #[builder(default)]
    pub pagination: Pagination,
    #[builder(default)]
    pub data: Option<String>,
}

impl ApiCliArgs {
    pub fn builder() -> ApiCliArgsBuilder {
        ApiCliArgsBuilder::default()
    }
}

pub fn execute<R: HttpRunner<Response = Response>>(
    options: ApiOptions,
    client: &Basecamp<R>,
) -> Result<()> {
    run(options, client, std::io::stdout())
}

pub fn run<R: HttpRunner<Response = Response>, W: Write>(
    options: ApiOptions,
    client: &Basecamp<R>,
    mut writer: W,
) -> Result<()> {
    let result = match options {
        ApiOptions::Get(args) => match args.pagination {
            Pagination::Single => client.get::<Value>(&args.path)?,
            Pagination::All => Value::Array(client.fetch_all_pages(&args.path)?),
            Pagination::Page(page) => Value::Array(client.get_page(&args.path, page)?),
        },
        ApiOptions::Post(args) => {
            let payload = payload(&args)?;
            client.post(&args.path, payload.as_ref())?
        }
        ApiOptions::Put(args) => {
            let payload = payload(&args)?;
            client.put(&args.path, payload.as_ref())?
        }
        ApiOptions::Delete(args) => {
            client.delete(&args.path)?;
            Value::Null
        }
    };
    print(&mut writer, &result)
}

fn payload(args: &ApiCliArgs) -> Result<Option<Value>> {
    args.data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| {
            BCError::ValidationError {
                field: "--data".to_string(),
                message: format!("not valid JSON, {}", err),
            }
            .into()
        })
}

// Empty responses, like the 204 of a delete, print nothing.
fn print<W: Write>(writer: &mut W, value: &Value) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    let output =
        serde_json::to_string_pretty(value).err_context("Failed to format response as JSON")?;
    writeln!(writer, "{}", output)?;
    Ok(())
}
