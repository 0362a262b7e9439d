use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use pipeline_core::{Job, JobStatus, QueueSnapshot};
use pipeline_engine::{
    export_job, BrowserAutomation, ClientFactory, DohResolver, FetchEscalationChain,
    PipelineConfig, ProxySwitch, QueueStore,
};
use pipeline_logging::pipeline_info;
use url::Url;

use crate::cli::{Cli, Command};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load(&cli.config);
    match cli.command {
        Command::Fetch {
            url,
            base_url,
            selector,
            proxy,
        } => fetch(&config, &url, base_url, selector.as_deref(), proxy).await,
        Command::Queue => queue(&config),
        Command::Export { chapter_url } => export(&config, &chapter_url),
        Command::Resolve { host } => resolve(&config, &host).await,
    }
}

async fn fetch(
    config: &PipelineConfig,
    url: &str,
    base_url: Option<String>,
    selector: Option<&str>,
    use_proxy: bool,
) -> anyhow::Result<()> {
    let base_url = match base_url {
        Some(base_url) => base_url,
        None => Url::parse(url)
            .with_context(|| format!("invalid url {url}"))?
            .origin()
            .ascii_serialization(),
    };

    let proxy = Arc::new(ProxySwitch::new(config.proxy_address.clone(), config.proxy_port));
    proxy.set_running(use_proxy);
    let factory = ClientFactory::new(config.client_settings(), proxy)?;
    let browser = browser(config);
    let chain = FetchEscalationChain::new(
        Arc::new(factory),
        browser.clone(),
        base_url,
        config.escalation_settings(),
    );

    let result = match selector {
        Some(selector) => chain.fetch_with_selector(url, selector).await,
        None => chain.fetch_detailed(url).await.map(|fetched| {
            pipeline_info!("Fetched {} via {:?}", url, fetched.tier);
            fetched.body
        }),
    };
    browser.shutdown().await;

    println!("{}", result?);
    Ok(())
}

#[cfg(feature = "chrome")]
fn browser(config: &PipelineConfig) -> Arc<dyn BrowserAutomation> {
    Arc::new(pipeline_engine::ChromeBrowser::new(config.browser_settings()))
}

#[cfg(not(feature = "chrome"))]
fn browser(_config: &PipelineConfig) -> Arc<dyn BrowserAutomation> {
    Arc::new(pipeline_engine::NoBrowser)
}

fn load_snapshot(config: &PipelineConfig) -> QueueSnapshot {
    QueueStore::new(config.snapshot_path())
        .load()
        .unwrap_or_default()
}

fn queue(config: &PipelineConfig) -> anyhow::Result<()> {
    let snapshot = load_snapshot(config);
    let jobs = snapshot
        .history
        .iter()
        .chain(snapshot.active.iter())
        .chain(snapshot.queue.iter());
    let mut count = 0;
    for job in jobs {
        count += 1;
        println!("{}", describe(job));
    }
    if count == 0 {
        println!("Queue is empty ({})", config.snapshot_path().display());
    }
    Ok(())
}

fn describe(job: &Job) -> String {
    let mut line = format!(
        "{:<16} {:>3}%  {} / {}",
        job.status.to_string(),
        job.progress,
        job.manga.title,
        job.chapter.name
    );
    if let Some(error) = &job.error {
        line.push_str(&format!("  ({error})"));
    }
    line
}

fn completed_job<'a>(snapshot: &'a QueueSnapshot, chapter_url: &str) -> Option<&'a Job> {
    snapshot
        .history
        .iter()
        .rev()
        .find(|job| job.chapter.url == chapter_url && job.status == JobStatus::Completed)
}

fn export(config: &PipelineConfig, chapter_url: &str) -> anyhow::Result<()> {
    let snapshot = load_snapshot(config);
    let job = completed_job(&snapshot, chapter_url)
        .ok_or_else(|| anyhow!("no completed download for {chapter_url}"))?;
    let summary = export_job(job, &config.download_root, &config.export_dir)?;
    println!(
        "Wrote {} ({} pages)",
        summary.archive.display(),
        summary.pages
    );
    Ok(())
}

async fn resolve(config: &PipelineConfig, host: &str) -> anyhow::Result<()> {
    let resolver = DohResolver::new(
        config.doh_providers.clone(),
        Duration::from_secs(config.doh_timeout_secs),
    )?;
    let resolution = resolver.lookup_detailed(host).await?;
    for addr in &resolution.addrs {
        println!("{addr}");
    }
    println!("via {:?}", resolution.via);
    Ok(())
}
