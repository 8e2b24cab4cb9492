//! Backend switcher CLI.
//!
//! ```text
//! backend-switcher inspect <url>            which backend serves <url>
//! backend-switcher probe <url>              which backends serve the domain
//! backend-switcher switch <url> <backend>   reload until <backend> answers
//! ```
//!
//! `switch` drives the full loop through a headless browser: a tab is
//! opened on `<url>`, cookies are cleared and the page reloaded until the
//! response header names `<backend>` or the retry budget runs out.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use url::Url;

use backend_switcher::config::{load_config, ConfigWatcher, SwitcherConfig};
use backend_switcher::detection::HeaderNames;
use backend_switcher::observability::{logging, metrics};
use backend_switcher::probe::HostProber;
use backend_switcher::registry::DomainRegistry;
use backend_switcher::switch::{event_channel, SwitcherService, UserAction, UserRequest};
use backend_switcher::types::{domain_of, BackendId, TabId};
use backend_switcher::{HeadlessBrowser, Shutdown, Switcher, SwitcherEvent};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "backend-switcher", version)]
#[command(about = "Detect and switch the load-balanced backend serving a site", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes
    #[arg(long, global = true)]
    watch: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a page once and print the backend that served it
    Inspect { url: Url },
    /// Probe a page concurrently and print every backend seen
    Probe { url: Url },
    /// Reload a page until the given backend serves it
    Switch {
        url: Url,
        backend: String,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SwitcherConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "backend-switcher starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    match cli.command {
        Commands::Inspect { url } => inspect(&config, &url).await,
        Commands::Probe { url } => probe(&config, &url).await,
        Commands::Switch {
            url,
            backend,
            timeout_secs,
        } => {
            let watch = if cli.watch { cli.config } else { None };
            switch(config, watch, url, BackendId::new(backend), Duration::from_secs(timeout_secs)).await
        }
    }
}

async fn inspect(config: &SwitcherConfig, url: &Url) -> CliResult<()> {
    let prober = HostProber::new(&config.probe, HeaderNames::parse(&config.header_names))?;
    match prober.inspect(url).await? {
        Some(backend) => println!("{backend}"),
        None => {
            let names: Vec<&str> = prober.header_names().iter().collect();
            println!("no backend header ({}) in response", names.join(", "));
        }
    }
    Ok(())
}

async fn probe(config: &SwitcherConfig, url: &Url) -> CliResult<()> {
    let domain = domain_of(url).ok_or("URL has no host")?;
    let prober = HostProber::new(&config.probe, HeaderNames::parse(&config.header_names))?;
    let registry = DomainRegistry::new();

    let epoch = registry.begin_probe(&domain);
    let backends = prober.probe(url, None, config.seek_requests).await;
    registry.replace_known_backends(&domain, epoch, backends);

    let snapshot = registry.get_or_create(&domain);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn switch(
    config: SwitcherConfig,
    watch: Option<PathBuf>,
    url: Url,
    target: BackendId,
    timeout: Duration,
) -> CliResult<()> {
    let domain = domain_of(&url).ok_or("URL has no host")?;

    let (events, queue) = event_channel();
    let browser = HeadlessBrowser::new(&config.probe, events.clone())?;
    let switcher = Switcher::new(config, Arc::new(browser.clone()))?;
    let mut bus = switcher.subscribe();

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown.clone().trigger_on_ctrl_c());

    // The watcher stops when dropped; keep it for the whole run.
    let (_watcher, config_updates) = match watch {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            (Some(watcher.run()?), Some(updates))
        }
        None => (None, None),
    };

    let service = tokio::spawn(SwitcherService::new(switcher, queue).run(shutdown.subscribe(), config_updates));

    let tab = browser.open_tab(url.clone());
    let mut stop = shutdown.subscribe();

    let drive = async {
        wait_for_domain(&mut bus, &domain).await?;
        tracing::info!(tab = %tab, domain = %domain, target = %target, "Page loaded, requesting switch");

        let request = UserRequest {
            tab,
            url: url.clone(),
            action: UserAction::SwitchHost(target.clone()),
        };
        if events.request(request).await.is_none() {
            tracing::debug!(tab = %tab, "Switch request produced no reply");
        }
        wait_for_end(&mut bus, tab).await
    };

    let result = tokio::select! {
        outcome = tokio::time::timeout(timeout, drive) => outcome.map_err(|_| "timed out waiting for the switch to finish"),
        _ = stop.recv() => Err("interrupted"),
    };

    shutdown.trigger();
    let _ = service.await;

    let event = result??;
    println!("{}", serde_json::to_string_pretty(&event)?);
    match event {
        SwitcherEvent::Switched { .. } => Ok(()),
        SwitcherEvent::Exhausted { retries, .. } => {
            Err(format!("{target} not reached after {retries} retries").into())
        }
        SwitcherEvent::Aborted { reason, .. } => Err(format!("switch aborted: {reason}").into()),
        SwitcherEvent::Status(_) => Err("unexpected status event".into()),
    }
}

/// Wait until the first navigation on `domain` commits.
async fn wait_for_domain(bus: &mut broadcast::Receiver<SwitcherEvent>, domain: &str) -> CliResult<()> {
    loop {
        match bus.recv().await {
            Ok(SwitcherEvent::Status(snapshot)) if snapshot.domain == domain => return Ok(()),
            Ok(SwitcherEvent::Aborted { reason, .. }) => return Err(reason.into()),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return Err("notification bus closed".into()),
        }
    }
}

/// Wait for the event that ends the loop on `tab`.
async fn wait_for_end(bus: &mut broadcast::Receiver<SwitcherEvent>, tab: TabId) -> CliResult<SwitcherEvent> {
    loop {
        match bus.recv().await {
            Ok(event) => {
                let ends_loop = match &event {
                    SwitcherEvent::Switched { tab: t, .. }
                    | SwitcherEvent::Exhausted { tab: t, .. }
                    | SwitcherEvent::Aborted { tab: t, .. } => *t == tab,
                    SwitcherEvent::Status(_) => false,
                };
                if ends_loop {
                    return Ok(event);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Notification receiver lagged");
            }
            Err(RecvError::Closed) => return Err("notification bus closed".into()),
        }
    }
}
