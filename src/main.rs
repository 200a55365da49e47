mod alert;
mod cancel;
mod config;
mod metrics;
mod probe_loop;
mod prober;
mod timestamp;
mod util;
mod window;

use alert::sink_from_config;
use cancel::CancelToken;
use config::{AppConfig, LogFormat};
use metrics::initialize_metrics;
use probe_loop::{ProbeLoop, StopReason};
use prober::icmp::RawIcmpTransport;

use std::process::ExitCode;
use tokio::io::BufReader;
use tracing::{info, warn, error};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<ExitCode> {
    // Load config first to get log level
    let config_path = AppConfig::path_from_env();
    let loaded = AppConfig::load(&config_path).await;
    let config = loaded.config;
    let log_level = config.get_tracing_level()?;

    // Init tracing with configured log level
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("ping_sentinel={}", log_level.as_str().to_lowercase()).parse()?);
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    for warning in &loaded.warnings {
        warn!(path = %config_path, "{}", warning);
    }

    initialize_metrics(config.enable_latency_history);
    if let Some(addr) = config.metrics_listen {
        tokio::spawn(metrics::serve_metrics(addr));
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let host = util::prompt_line("Enter host ip address:", &mut stdin, &mut stdout).await?;
    let addr = util::resolve_host_to_ipv4(&host).await?;

    let sink = sink_from_config(&config);
    info!(%addr, sink = sink.name(), window_size = config.probe.window_size,
          window_seconds = config.probe.window_seconds, "monitor configured");

    let cancel = CancelToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    let probe = ProbeLoop::new(host, RawIcmpTransport::new(addr), sink, config.probe.clone(), cancel);
    match tokio::task::spawn_blocking(move || probe.run()).await? {
        Ok(StopReason::Cancelled) => Ok(ExitCode::SUCCESS),
        Err(e) if e.is_fatal() => {
            error!("{}", e);
            eprintln!("{}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Waits for Ctrl-C (or SIGTERM on unix) and cancels the probe loop.
async fn watch_signals(cancel: CancelToken) {
    let name = wait_for_signal().await;
    println!("Got signal: {}", name);
    info!(signal = name, "shutting down");
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("cannot listen for SIGTERM: {}", e);
            return match tokio::signal::ctrl_c().await {
                Ok(()) => "interrupt",
                Err(_) => std::future::pending().await,
            };
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => "interrupt",
            Err(e) => {
                error!("cannot listen for Ctrl-C: {}", e);
                term.recv().await;
                "terminated"
            }
        },
        _ = term.recv() => "terminated",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "interrupt",
        Err(e) => {
            error!("cannot listen for Ctrl-C: {}", e);
            std::future::pending().await
        }
    }
}
