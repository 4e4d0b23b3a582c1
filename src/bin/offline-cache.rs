use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use offline_cache::server::{AppState, run_server, run_sync_ticker};
use offline_cache::{
    ActiveRecord, AppConfig, CacheStorage, DiskCacheStorage, FileQueue, HttpNetwork, LoggingHost,
    MemoryCacheStorage, MemoryQueue, OfflineWorker, PushPresenter, Registration, Scope,
    SubmissionQueue, WorkerHost,
};
use tokio_util::sync::CancellationToken;

struct CliConfig {
    config_path: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    origin: Option<String>,
    memory: bool,
}

fn print_usage() {
    eprintln!("Usage: offline-cache [OPTIONS]");
    eprintln!();
    eprintln!("Serves a site through a versioned offline cache.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>     Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  --host <ADDR>       Bind address (overrides [server] host)");
    eprintln!("  --port <N>          Listen port (overrides [server] port)");
    eprintln!("  --origin <URL>      Site origin (overrides [worker] origin)");
    eprintln!("  --memory            Keep caches and queued submissions in memory only");
    eprintln!("  -h, --help          Show this help");
}

fn value(args: &[String], i: usize, flag: &str) -> String {
    args.get(i).cloned().unwrap_or_else(|| {
        eprintln!("Error: {flag} requires a value");
        std::process::exit(1);
    })
}

fn parse_args() -> CliConfig {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut cli = CliConfig {
        config_path: AppConfig::default_path(),
        host: None,
        port: None,
        origin: None,
        memory: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                cli.config_path = PathBuf::from(value(&args, i, "--config"));
            }
            "--host" => {
                i += 1;
                cli.host = Some(value(&args, i, "--host"));
            }
            "--port" => {
                i += 1;
                let raw = value(&args, i, "--port");
                cli.port = Some(raw.parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid port: {raw}");
                    std::process::exit(1);
                }));
            }
            "--origin" => {
                i += 1;
                cli.origin = Some(value(&args, i, "--origin"));
            }
            "--memory" => cli.memory = true,
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown option: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    cli
}

async fn serve<S: CacheStorage + 'static>(
    config: AppConfig,
    storage: Arc<S>,
    queue: Arc<dyn SubmissionQueue>,
) -> offline_cache::Result<()> {
    let host: Arc<dyn WorkerHost> = Arc::new(LoggingHost::new());
    let network = Arc::new(HttpNetwork::new(&config.network, Scope::from_config(&config.worker)?)?);

    let registration = Arc::new(
        Registration::new(Arc::clone(&network))
            .with_record_path(config.paths.state_dir.join(ActiveRecord::FILE_NAME)),
    );

    // Serve whatever the last run left on disk before trying the network.
    let last_version = match registration.recorded().await {
        Ok(Some(record)) => record.version,
        Ok(None) => config.worker.version.clone(),
        Err(e) => {
            log::warn!("Ignoring unreadable active version record: {e}");
            config.worker.version.clone()
        }
    };
    let previous = OfflineWorker::new(
        config.worker.clone().with_version(last_version),
        Arc::clone(&storage),
        Arc::clone(&network),
        Arc::clone(&queue),
        Arc::clone(&host),
    )?;
    match registration.restore(previous).await {
        Ok(Some(worker)) => log::info!("Serving {} from the existing cache", worker.cache_name()),
        Ok(None) => {}
        Err(e) => log::warn!("Cannot restore the previous version: {e}"),
    }

    let worker = OfflineWorker::new(
        config.worker.clone(),
        storage,
        network,
        queue,
        Arc::clone(&host),
    )?;
    if let Err(e) = registration.update(worker).await {
        match registration.active().await {
            Some(active) => log::warn!(
                "Install of {} failed, {} keeps serving: {e}",
                config.worker.cache_name(),
                active.cache_name()
            ),
            None => log::error!(
                "Install of {} failed, serving from network only: {e}",
                config.worker.cache_name()
            ),
        }
    }

    let push = Arc::new(PushPresenter::new(config.push.clone(), &config.worker, host)?);
    let state = AppState::new(Arc::clone(&registration), push, &config.worker)?;

    let shutdown = CancellationToken::new();
    let ticker = tokio::spawn(run_sync_ticker(
        registration,
        config.worker.sync_tag.clone(),
        Duration::from_secs(config.server.sync_interval_secs.max(1)),
        shutdown.clone(),
    ));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT");
        }
        signal.cancel();
    });

    let served = run_server(&config.server, state, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = ticker.await {
        log::warn!("Sync ticker stopped abnormally: {e}");
    }
    served
}

#[tokio::main]
async fn main() -> offline_cache::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = parse_args();
    let mut config = AppConfig::load_or_create(&cli.config_path)?;
    log::info!("Loaded config from {}", cli.config_path.display());

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(origin) = cli.origin {
        config.worker.origin = origin;
    }
    config.worker.validate()?;

    if cli.memory {
        log::info!("Using in-memory cache and queue");
        serve(config, Arc::new(MemoryCacheStorage::new()), Arc::new(MemoryQueue::new())).await
    } else {
        log::info!("Cache directory: {}", config.paths.cache_dir.display());
        let storage = Arc::new(DiskCacheStorage::new(config.paths.cache_dir.clone()));
        let queue = Arc::new(FileQueue::in_dir(&config.paths.state_dir));
        serve(config, storage, queue).await
    }
}
