use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use quark_autosave::config::{AppConfig, Settings};
use quark_autosave::mirror::MirrorEngine;
use quark_autosave::notify::LogNotifier;
use quark_autosave::records::RecordStore;
use quark_autosave::remote::QuarkRemote;
use quark_autosave::runner::{self, Runner};
use quark_core::QuarkClient;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run {
        config: Option<PathBuf>,
        task: Option<usize>,
    },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut task = None;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--task" => {
                let value = args.next().context("--task needs a number")?;
                let number = value
                    .parse::<usize>()
                    .with_context(|| format!("invalid task number: {value}"))?;
                task = Some(number);
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Run { config, task })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config_override, only) = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: quark-autosave [--config PATH] [--task N]");
            println!("  --config PATH  Config file (default quark_config.json or $QUARK_CONFIG)");
            println!("  --task N       Run only task number N (1-based)");
            return Ok(());
        }
        CliMode::Run { config, task } => (config, task),
    };

    let settings = Settings::from_env(config_override);
    let mut config = AppConfig::load(&settings.config_path)
        .with_context(|| format!("failed to load config from {:?}", settings.config_path))?;
    let cookie = settings
        .accounts(&config)
        .first()
        .map(|cookie| cookie.to_string())
        .context("no cookie configured")?;

    let client = QuarkClient::new(cookie)?.with_timeout(settings.http_timeout)?;
    let remote = Arc::new(QuarkRemote::new(client));
    let engine = MirrorEngine::new(
        remote.clone(),
        config.rename_engine(),
        config.mirror_options(&settings),
    );
    let mut runner = Runner::new(engine, Arc::new(LogNotifier));
    match RecordStore::open(&settings.record_db).await {
        Ok(records) => runner = runner.with_records(records),
        Err(err) => warn!(path = ?settings.record_db, error = %err, "transfer records disabled"),
    }

    runner::prepare(&remote, &runner, &config.tasklist).await?;
    let outcome = runner.run(&mut config.tasklist, only).await?;
    config
        .save(&settings.config_path)
        .context("failed to write config back")?;

    info!(
        tasks = outcome.reports.len(),
        failed = outcome.failed.len(),
        "run finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("quark-autosave")
            .chain(values.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(args(&[])).unwrap();
        assert_eq!(
            mode,
            CliMode::Run {
                config: None,
                task: None
            }
        );
    }

    #[test]
    fn parse_cli_mode_reads_config_and_task() {
        let mode = parse_cli_mode(args(&["--config", "/etc/q.json", "--task", "2"])).unwrap();
        assert_eq!(
            mode,
            CliMode::Run {
                config: Some(PathBuf::from("/etc/q.json")),
                task: Some(2)
            }
        );
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        assert_eq!(parse_cli_mode(args(&["--help"])).unwrap(), CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_bad_input() {
        assert!(parse_cli_mode(args(&["--task"])).is_err());
        assert!(parse_cli_mode(args(&["--task", "two"])).is_err());
        assert!(parse_cli_mode(args(&["--verbose"])).is_err());
    }
}
