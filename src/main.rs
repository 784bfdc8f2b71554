//! Command-line driver: load rows, replay an edit script through the
//! buffering provider and print what a consumer would see.

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use stagedata::script::{parse_script, ScriptRunner};
use stagedata::{
    AttributeFilter, BufferingDataProvider, EditItem, FetchByOffsetParameters,
    FetchListParameters, Item, MemoryDataSource, ProviderConfig, ProviderEvent, SortCriterion,
};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stagedata", about = "Replay staged edits over a JSON dataset", version)]
struct Cli {
    /// JSON array of row objects
    #[arg(short, long, env = "STAGEDATA_DATA")]
    data: PathBuf,

    /// JSON edit script to replay
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Attribute holding each row's key
    #[arg(short, long, default_value = "id")]
    key: String,

    /// Rows per page (falls back to STAGEDATA_PAGE_SIZE)
    #[arg(short, long)]
    page_size: Option<usize>,

    /// Sort criterion `attr` or `attr:desc`; repeat for tie-breakers
    #[arg(long)]
    sort: Vec<String>,

    /// Filter `attr:op:value`, e.g. `age:$gt:30`
    #[arg(short, long)]
    filter: Option<String>,

    /// Submit remaining edits after the script
    #[arg(long)]
    submit: bool,

    /// Print one offset window instead of iterating
    #[arg(short, long)]
    offset: Option<usize>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Line<'a> {
    Page {
        index: usize,
        items: &'a [Item<String, Value>],
        done: bool,
        total: Option<usize>,
    },
    Window {
        offset: usize,
        items: &'a [Item<String, Value>],
        done: bool,
        total: Option<usize>,
    },
    Submittable {
        edits: &'a [EditItem<String, Value>],
    },
    Event {
        event: &'a ProviderEvent<String, Value>,
    },
}

fn emit(line: &Line<'_>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}

fn parse_sort(expression: &str) -> anyhow::Result<SortCriterion> {
    match expression.split_once(':') {
        None => Ok(SortCriterion::ascending(expression)),
        Some((attribute, "asc")) => Ok(SortCriterion::ascending(attribute)),
        Some((attribute, "desc")) => Ok(SortCriterion::descending(attribute)),
        Some((_, direction)) => bail!("unknown sort direction '{}' in '{}'", direction, expression),
    }
}

fn drain_events(receiver: &mut broadcast::Receiver<ProviderEvent<String, Value>>) -> anyhow::Result<()> {
    loop {
        match receiver.try_recv() {
            Ok(event) => emit(&Line::Event { event: &event })?,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event output lagged");
            }
            Err(_) => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagedata=info,stagedata_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = ProviderConfig::from_env();
    if let Some(page_size) = cli.page_size {
        if page_size == 0 {
            bail!("--page-size must be positive");
        }
        config.page_size = page_size;
    }

    let raw = std::fs::read_to_string(&cli.data)
        .with_context(|| format!("reading {}", cli.data.display()))?;
    let rows: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array", cli.data.display()))?;
    let source = MemoryDataSource::from_values(&cli.key, rows)?.with_page_size(config.page_size);
    tracing::info!(rows = source.len(), page_size = config.page_size, "dataset loaded");

    let provider = BufferingDataProvider::with_config(source, config.clone()).with_uuid_keys();
    let mut events = provider.subscribe();
    let mut runner = ScriptRunner::new(provider.clone(), cli.key.clone());

    if let Some(path) = &cli.script {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let steps = parse_script(&text).with_context(|| format!("parsing {}", path.display()))?;
        let report = runner.run(&steps).await?;
        tracing::info!(
            steps = report.steps,
            submitted = report.submitted.len(),
            rejected = report.rejected.len(),
            "script replayed"
        );
    }
    if cli.submit {
        let report = runner.submit_all().await?;
        tracing::info!(submitted = report.submitted.len(), "remaining edits submitted");
    }
    drain_events(&mut events)?;

    let sort = cli
        .sort
        .iter()
        .map(|expression| parse_sort(expression))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let filter = cli.filter.as_deref().map(AttributeFilter::parse).transpose()?;

    match cli.offset {
        Some(offset) => {
            let mut params = FetchByOffsetParameters::window(offset, config.page_size);
            params.sort_criteria = sort;
            if let Some(filter) = filter {
                params = params.with_filter(filter);
            }
            let window = provider.fetch_by_offset(params).await?;
            emit(&Line::Window {
                offset,
                items: &window.results,
                done: window.done,
                total: window.total_filtered_row_count,
            })?;
        }
        None => {
            let mut params = FetchListParameters::default().with_size(config.page_size);
            params.sort_criteria = sort;
            if let Some(filter) = filter {
                params = params.with_filter(filter);
            }
            let mut iter = provider.fetch_first(params)?;
            let mut index = 0;
            loop {
                let page = iter.next().await?;
                emit(&Line::Page {
                    index,
                    items: &page.items,
                    done: page.done,
                    total: page.total_filtered_row_count,
                })?;
                if page.done {
                    break;
                }
                index += 1;
            }
        }
    }

    emit(&Line::Submittable {
        edits: &provider.submittable_items()?,
    })?;
    drain_events(&mut events)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_specs_parse_direction() {
        assert_eq!(parse_sort("age").unwrap(), SortCriterion::ascending("age"));
        assert_eq!(parse_sort("age:desc").unwrap(), SortCriterion::descending("age"));
        assert!(parse_sort("age:sideways").is_err());
    }

    #[test]
    fn cli_accepts_repeated_sorts() {
        let cli = Cli::try_parse_from([
            "stagedata", "--data", "rows.json", "--sort", "team", "--sort", "age:desc",
            "--filter", "age:$gt:30", "--submit",
        ])
        .unwrap();
        assert_eq!(cli.sort, vec!["team", "age:desc"]);
        assert_eq!(cli.filter.as_deref(), Some("age:$gt:30"));
        assert!(cli.submit);
        assert_eq!(cli.key, "id");
    }
}
