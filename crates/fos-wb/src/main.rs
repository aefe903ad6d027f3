//! fOS-WB: Zero-Bloat Web Browser
//!
//! Main entry point. Initializes the global allocator, sets up logging,
//! brings up malicious site protection and checks the URLs given on the
//! command line.
//!
//! Usage:
//!   fos-wb --dataset <dataset.json> [--config <protection.toml>]
//!          [--remote <feature.json>] <url>...

mod remote;

use anyhow::{bail, Context, Result};
use fos_malsite::{
    EscalationOutcome, InMemoryRepository, MaliciousSiteDetector, PageScope, ProtectionConfig,
    RemoteFeatureConfig, SettingsState, UpdateTrigger, Verdict,
};
use remote::{FileRemoteConfig, StaticRemoteConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Command line options
struct Options {
    dataset: PathBuf,
    config: Option<PathBuf>,
    remote: Option<PathBuf>,
    urls: Vec<String>,
}

impl Options {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self> {
        let mut dataset = None;
        let mut config = None;
        let mut remote = None;
        let mut urls = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--dataset" => dataset = Some(next_path(&mut args, "--dataset")?),
                "--config" => config = Some(next_path(&mut args, "--config")?),
                "--remote" => remote = Some(next_path(&mut args, "--remote")?),
                flag if flag.starts_with("--") => bail!("unknown option {}", flag),
                _ => urls.push(arg),
            }
        }

        let Some(dataset) = dataset else {
            bail!("usage: fos-wb --dataset <dataset.json> [--config <protection.toml>] [--remote <feature.json>] <url>...");
        };

        Ok(Self {
            dataset,
            config,
            remote,
            urls,
        })
    }
}

fn next_path<I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<PathBuf> {
    args.next()
        .map(PathBuf::from)
        .with_context(|| format!("{} needs a path", flag))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .compact()
        .init();

    info!("fOS-WB starting...");
    info!("Using mimalloc allocator");

    let options = Options::parse(std::env::args().skip(1))?;

    let config = match &options.config {
        Some(path) => ProtectionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProtectionConfig::default(),
    };

    let repository = Arc::new(
        InMemoryRepository::load_json(&options.dataset)
            .with_context(|| format!("loading {}", options.dataset.display()))?,
    );

    let remote: Arc<dyn RemoteFeatureConfig> = match &options.remote {
        Some(path) => Arc::new(FileRemoteConfig::new(path.clone())),
        None => Arc::new(StaticRemoteConfig::enabled()),
    };

    let settings = Arc::new(SettingsState::with_settings(config.default_settings()));
    let trigger = UpdateTrigger::new(remote, Arc::clone(&settings), Handle::current());
    if let Some(load) = trigger.start(true) {
        load.await.context("initial settings load")?;
    }

    let detector = MaliciousSiteDetector::new(repository, Arc::clone(&settings), config, Handle::current());
    info!(
        "Malicious site protection ready (enabled: {})",
        settings.is_feature_enabled()
    );

    for raw in &options.urls {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping {}: {}", raw, e);
                continue;
            }
        };

        let page = PageScope::new();
        let verdict = match detector.check(&url, &page.token()) {
            Verdict::Safe => "safe",
            Verdict::Malicious => "malicious",
            Verdict::Pending(escalation) => match escalation.outcome().await {
                EscalationOutcome::Confirmed => "malicious (confirmed late)",
                EscalationOutcome::NotConfirmed => "safe (candidate)",
                EscalationOutcome::Cancelled => "unknown (cancelled)",
                EscalationOutcome::Failed => "unknown (lookup failed)",
            },
        };
        println!("{}\t{}", url, verdict);
    }

    info!("fOS-WB shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_options() {
        let options = Options::parse(args(&[
            "--dataset",
            "data.json",
            "https://a.test/",
            "--config",
            "p.toml",
            "https://b.test/",
        ]))
        .unwrap();

        assert_eq!(options.dataset, PathBuf::from("data.json"));
        assert_eq!(options.config, Some(PathBuf::from("p.toml")));
        assert_eq!(options.remote, None);
        assert_eq!(options.urls, vec!["https://a.test/", "https://b.test/"]);
    }

    #[test]
    fn test_parse_requires_dataset() {
        assert!(Options::parse(args(&["https://a.test/"])).is_err());
        assert!(Options::parse(args(&["--dataset"])).is_err());
        assert!(Options::parse(args(&["--dataset", "d.json", "--verbose"])).is_err());
    }
}
