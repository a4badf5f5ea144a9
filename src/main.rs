// herakles-proc-sampler - version 0.1.0
// Cached per-process telemetry sampler with tracing logging
use axum::{routing::get, Router};
use clap::Parser;
use herakles_proc_sampler::config::{
    load_config, validate_effective_config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use herakles_proc_sampler::{Config, ConfigError, Sampler};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal, time::interval};
use tracing::{debug, error, info, level_filters::LevelFilter};

mod cli;
mod commands;
mod handlers;
mod health_stats;
mod metrics;
mod state;

use cli::{Args, Commands, ConfigFormat};
use handlers::{health_handler, metrics_handler, process_handler, processes_handler};
use state::AppState;

/// Merges CLI flags over the config file over built-in defaults.
fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    // Override with CLI args
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(level) = &args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }

    // Sampling
    if args.staleness_ms.is_some() {
        config.staleness_ms = args.staleness_ms;
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    if args.entry_ttl_ms.is_some() {
        config.entry_ttl_ms = args.entry_ttl_ms;
    }
    if args.max_entries.is_some() {
        config.max_entries = args.max_entries;
    }
    if args.no_privileges {
        config.request_privileges = Some(false);
    }
    if args.proc_root.is_some() {
        config.proc_root = args.proc_root.clone();
    }

    // TLS
    if args.tls_cert.is_some() {
        config.tls_cert = args.tls_cert.clone();
    }
    if args.tls_key.is_some() {
        config.tls_key = args.tls_key.clone();
    }

    Ok(config)
}

/// Shows configuration in requested format
fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    let output = commands::config::render_config(config, format, false)?;
    println!("{output}");
    Ok(())
}

/// Initializes the tracing subscriber. Logs go to stderr so that watch output
/// on stdout stays machine readable.
fn setup_logging(config: &Config) {
    let level = config
        .log_level
        .as_deref()
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    debug!("Logging initialized with level: {}", level);
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Runs the HTTP surface until a shutdown signal arrives.
async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting herakles-proc-sampler");

    let sampler = Arc::new(Sampler::new(config.sampler_config())?);
    let policy = sampler.cache_policy();
    info!(
        "Sampler ready: {} workers, staleness {}ms, ttl {}ms, max {} entries",
        sampler.stats().pool.workers,
        policy.staleness_ms,
        policy.entry_ttl_ms,
        policy.max_entries
    );

    let state = Arc::new(AppState::new(Arc::clone(&sampler))?);

    // Queries only sweep opportunistically; keep idle caches bounded too.
    let sweep_sampler = Arc::clone(&sampler);
    let sweep_every = Duration::from_millis((policy.entry_ttl_ms / 4).max(policy.staleness_ms));
    let sweeper = tokio::spawn(async move {
        let mut ticker = interval(sweep_every);
        loop {
            ticker.tick().await;
            let evicted = sweep_sampler.evict_expired();
            if evicted > 0 {
                debug!("Background sweep evicted {} entries", evicted);
            }
        }
    });

    let bind_ip = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{}:{}", bind_ip, port).parse()?;

    let app = Router::new()
        .route("/process/{pid}", get(process_handler))
        .route("/processes", get(processes_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let result = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
            });

            info!("herakles-proc-sampler listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        _ => {
            let listener = TcpListener::bind(addr).await?;
            info!("herakles-proc-sampler listening on http://{}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        }
    };

    // Cleanup: stop the sweeper and the refresh workers before exit
    sweeper.abort();
    let _ = sweeper.await;
    sampler.shutdown();

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("herakles-proc-sampler stopped gracefully");
    Ok(())
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = resolve_config(&args)?;

    // Early exit for show/check modes
    if args.check_config {
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
        println!("✅ Configuration is valid");
        return Ok(());
    }
    if args.show_config {
        return show_config(&config, args.config_format.clone());
    }

    // The config subcommand writes defaults and does not need a valid effective config.
    if let Some(Commands::Config {
        output,
        format,
        commented,
    }) = &args.command
    {
        return commands::command_config(output.clone(), format.clone(), *commented);
    }

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&config);

    match args.command {
        Some(Commands::Watch {
            pids,
            interval_ms,
            iterations,
            format,
        }) => {
            commands::command_watch(pids, interval_ms, iterations, format, config.sampler_config())
                .await
        }
        Some(Commands::Check { pid }) => {
            if !commands::command_check(pid, &config)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Config { .. }) => Ok(()),
        Some(Commands::Serve) | None => serve(config).await,
    }
}
