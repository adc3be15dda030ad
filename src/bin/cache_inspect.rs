use anyhow::{Context, Result, bail};
use hexpresso_lib::AppConfig;
use hexpresso_lib::application::ports::KeyValueStore;
use hexpresso_lib::infrastructure::{ConnectionPool, SqliteKeyValueStore};
use hexpresso_lib::infrastructure::storage::KvEntry;
use serde_json::Value;
use std::env;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Default)]
struct CliOptions {
    database_url: Option<String>,
    namespace: Option<String>,
    clear: bool,
    pretty: bool,
}

#[derive(Debug, serde::Serialize)]
struct EntryReport {
    namespace: String,
    key: String,
    updated_at_ms: i64,
    /// JSON として解釈できない値は文字列のまま出す
    value: Value,
    entries: Option<usize>,
}

fn usage() -> &'static str {
    "Usage: cache_inspect [--database-url <url>] [--namespace <name>] [--clear] [--pretty]"
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_args(args)?;

    let runtime = Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run(options))
}

async fn run(options: CliOptions) -> Result<()> {
    let mut config = AppConfig::from_env();
    if let Some(url) = options.database_url.clone() {
        config.database.url = url;
    }

    let pool = ConnectionPool::from_config(&config.database)
        .await
        .with_context(|| format!("Failed to open {}", config.database.url))?;
    pool.migrate().await.context("Failed to run migrations")?;
    let store = SqliteKeyValueStore::new(pool.clone());

    if options.clear {
        let Some(namespace) = options.namespace.as_deref() else {
            bail!("--clear requires --namespace\n{}", usage());
        };
        store.clear(namespace).await?;
        println!("Cleared namespace {namespace}");
        pool.close().await;
        return Ok(());
    }

    let entries = store.entries(options.namespace.as_deref()).await?;
    let reports: Vec<EntryReport> = entries.into_iter().map(to_report).collect();
    let payload = if options.pretty {
        serde_json::to_string_pretty(&reports)?
    } else {
        serde_json::to_string(&reports)?
    };
    println!("{payload}");

    pool.close().await;
    Ok(())
}

fn to_report(entry: KvEntry) -> EntryReport {
    let value = serde_json::from_str::<Value>(&entry.value)
        .unwrap_or_else(|_| Value::String(entry.value.clone()));
    let entries = value.as_array().map(Vec::len);
    EntryReport {
        namespace: entry.namespace,
        key: entry.key,
        updated_at_ms: entry.updated_at,
        value,
        entries,
    }
}

fn parse_args<I>(args: I) -> Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions::default();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--database-url" => {
                let value = iter.next().ok_or_else(|| {
                    anyhow::anyhow!("--database-url requires a value\n{}", usage())
                })?;
                options.database_url = Some(value);
            }
            "-n" | "--namespace" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--namespace requires a value\n{}", usage()))?;
                options.namespace = Some(value);
            }
            "--clear" => {
                options.clear = true;
            }
            "--pretty" => {
                options.pretty = true;
            }
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other => {
                bail!("Unknown argument: {other}\n{}", usage());
            }
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_known_flags() {
        let options = parse_args(args(&[
            "--database-url",
            "sqlite::memory:",
            "--namespace",
            "signs_data",
            "--pretty",
        ]))
        .unwrap();
        assert_eq!(options.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(options.namespace.as_deref(), Some("signs_data"));
        assert!(options.pretty);
        assert!(!options.clear);
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(parse_args(args(&["--verbose"])).is_err());
        assert!(parse_args(args(&["--namespace"])).is_err());
    }

    #[test]
    fn report_counts_array_entries() {
        let report = to_report(KvEntry {
            namespace: "signs_data".to_string(),
            key: "signs_data".to_string(),
            value: "[\"A\",\"B\"]".to_string(),
            updated_at: 1,
        });
        assert_eq!(report.entries, Some(2));

        let report = to_report(KvEntry {
            namespace: "theme_preferences".to_string(),
            key: "theme".to_string(),
            value: "dark".to_string(),
            updated_at: 1,
        });
        assert_eq!(report.value, Value::String("dark".to_string()));
        assert_eq!(report.entries, None);
    }
}
