// aswarm: CLI entry point
//
// One binary, one subcommand per component: sentinel, pheromone, microact,
// and a one-shot fast-path send for drills.

use anyhow::{anyhow, Context, Result};
use aswarm_control::{ControlPlane, MemoryControlPlane};
use aswarm_fastpath::{
    http::serve_http, AnomalyData, FastPathListener, FastPathSender, KeyTable, ListenerConfig,
    SenderConfig,
};
use aswarm_microact::{MicroActCatalog, MicroActConfig, Ring};
use aswarm_pheromone::{PheromoneWatcher, QuorumConfig};
use aswarm_sentinel::{Sentinel, SentinelConfig, SimulatedSource};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "aswarm",
    version,
    about = "A-SWARM autonomic defense: quorum detection, bounded containment, signed certificates"
)]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the per-node sentinel telemetry loop
    Sentinel {
        /// Node identity (NODE_NAME env or hostname when unset)
        #[arg(long, env = "NODE_NAME")]
        node_name: Option<String>,
        /// Signal cadence in milliseconds
        #[arg(long, default_value_t = 50)]
        cadence_ms: u64,
        /// Run duration in seconds (infinite when unset)
        #[arg(long)]
        duration: Option<u64>,
        /// Run identifier for scoping
        #[arg(long)]
        run_id: Option<String>,
        /// Make the next N ticks look like an active scan
        #[arg(long)]
        trigger_anomaly: Option<u32>,
        /// UDP fast-path target host
        #[arg(long)]
        fastpath_host: Option<String>,
        #[arg(long, default_value_t = 8888)]
        fastpath_port: u16,
        /// Disable the UDP fast path
        #[arg(long)]
        no_fastpath: bool,
    },

    /// Run the pheromone aggregator with the UDP fast-path listener
    Pheromone {
        /// Sliding window in milliseconds
        #[arg(long, default_value_t = 80)]
        window_ms: u64,
        /// Minimum witnesses for elevation
        #[arg(long, default_value_t = 3)]
        quorum: usize,
        /// Mean-score threshold for hysteresis elevation
        #[arg(long, default_value_t = 0.7)]
        node_score_threshold: f64,
        /// p95 threshold for single-window elevation
        #[arg(long, default_value_t = 0.90)]
        fast_path_score: f64,
        /// UDP bind address
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 8888)]
        udp_port: u16,
        /// Health and metrics port
        #[arg(long, default_value_t = 9000, env = "ASWARM_HTTP_PORT")]
        http_port: u16,
        /// Allowed source CIDRs (repeatable)
        #[arg(long = "allow-cidr")]
        allow_cidrs: Vec<String>,
        /// Ring buffer size for burst control
        #[arg(long, default_value_t = 10_000)]
        ring_buffer_size: usize,
        /// Worker thread count (2x CPU capped at 32 when unset)
        #[arg(long)]
        workers: Option<usize>,
        /// Max packet age in seconds (payload wall clock)
        #[arg(long, default_value_t = 60)]
        stale_window: u64,
        /// Disable the UDP fast path
        #[arg(long)]
        no_fastpath: bool,
    },

    /// List or execute micro-containment actions
    Microact {
        /// List available actions
        #[arg(long)]
        list: bool,
        /// Filter listing by ring number
        #[arg(long)]
        ring: Option<u8>,
        /// Execute an action by id
        #[arg(long)]
        execute: Option<String>,
        /// JSON parameter object for execution
        #[arg(long)]
        params: Option<String>,
        /// Override the ASWARM_DRY_RUN setting
        #[arg(long)]
        dry_run: Option<bool>,
        /// Directory where action certificates are written
        #[arg(long, default_value = "ActionCertificates")]
        certificate_dir: std::path::PathBuf,
        /// HMAC key for certificate signatures (raw, hex:, or base64:)
        #[arg(long, env = "ACTION_CERT_DEMO_KEY")]
        signing_key: Option<String>,
    },

    /// Send one fast-path elevation datagram
    Send {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 8888)]
        port: u16,
        /// Key id (1-255)
        #[arg(long, default_value_t = 1, env = "ASWARM_FASTPATH_KEY_ID")]
        key_id: u8,
        /// One-off HMAC key (raw, hex:, or base64:)
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = 3)]
        dupes: u8,
        #[arg(long, default_value_t = 6)]
        gap_ms: u64,
        #[arg(long, default_value_t = 3)]
        protocol_version: u8,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        score: Option<f64>,
        #[arg(long)]
        selector: Option<String>,
        #[arg(long)]
        witness_count: Option<u32>,
        /// Override node identity for the stable src_id
        #[arg(long)]
        node_id: Option<String>,
    },
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let ctrl_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = ctrl_tx.send(true);
        }
    });
    (tx, rx)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Sentinel {
            node_name,
            cadence_ms,
            duration,
            run_id,
            trigger_anomaly,
            fastpath_host,
            fastpath_port,
            no_fastpath,
        } => {
            let fastpath = match (&fastpath_host, no_fastpath) {
                (Some(host), false) => Some(SenderConfig {
                    host: host.clone(),
                    port: fastpath_port,
                    ..SenderConfig::default()
                }),
                _ => {
                    if !no_fastpath {
                        warn!("fast path disabled: no --fastpath-host given");
                    }
                    None
                }
            };

            let mut source = SimulatedSource::new();
            if let Some(ticks) = trigger_anomaly {
                source.trigger_anomaly(ticks);
                info!(ticks, "anomaly simulation triggered");
            }

            let cp = MemoryControlPlane::new();
            let mut sentinel = Sentinel::new(
                cp,
                SentinelConfig {
                    node_name,
                    cadence_ms,
                    run_id,
                    fastpath,
                },
                Box::new(source),
            )?;

            let (_tx, rx) = shutdown_channel();
            sentinel
                .run(duration.map(Duration::from_secs), rx)
                .await?;
        }

        Command::Pheromone {
            window_ms,
            quorum,
            node_score_threshold,
            fast_path_score,
            bind,
            udp_port,
            http_port,
            allow_cidrs,
            ring_buffer_size,
            workers,
            stale_window,
            no_fastpath,
        } => {
            let cp = MemoryControlPlane::new();
            let watcher = PheromoneWatcher::new(
                cp as Arc<dyn ControlPlane>,
                QuorumConfig {
                    window_ms,
                    quorum_threshold: quorum,
                    node_score_threshold,
                    fast_path_score,
                    ..QuorumConfig::default()
                },
            );

            let (tx, rx) = shutdown_channel();

            let listener = if no_fastpath {
                None
            } else {
                let keys = Arc::new(KeyTable::from_env().context("loading fast-path keys")?);
                let callback = watcher.fastpath_callback(tokio::runtime::Handle::current());
                let config = ListenerConfig {
                    bind_addr: bind,
                    port: udp_port,
                    ring_capacity: ring_buffer_size,
                    num_workers: workers.unwrap_or_else(aswarm_fastpath::listener::default_workers),
                    stale_window_secs: stale_window,
                    allow_cidrs,
                    ..ListenerConfig::default()
                };
                let listener = Arc::new(FastPathListener::new(config, keys, callback)?);
                listener.start();

                let http_addr: SocketAddr = format!("0.0.0.0:{}", http_port)
                    .parse()
                    .context("http bind address")?;
                let http_listener = Arc::clone(&listener);
                tokio::spawn(async move {
                    if let Err(e) = serve_http(http_listener, http_addr).await {
                        warn!(error = %e, "health/metrics server exited");
                    }
                });

                // SIGHUP reloads the key table without restart.
                #[cfg(unix)]
                {
                    let reload = Arc::clone(&listener);
                    tokio::spawn(async move {
                        let Ok(mut hangup) = tokio::signal::unix::signal(
                            tokio::signal::unix::SignalKind::hangup(),
                        ) else {
                            return;
                        };
                        while hangup.recv().await.is_some() {
                            reload.reload_keys();
                        }
                    });
                }

                Some(listener)
            };

            // The watcher surfaces only stream termination; reconnect with
            // backoff.
            let mut backoff_ms = 500u64;
            loop {
                match watcher.run(rx.clone()).await {
                    Ok(()) => break,
                    Err(e) => {
                        if *rx.borrow() {
                            break;
                        }
                        warn!(error = %e, backoff_ms, "watch stream lost, reconnecting");
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = (backoff_ms * 2).min(10_000);
                    }
                }
            }

            if let Some(listener) = listener {
                listener.stop();
            }
            drop(tx);
        }

        Command::Microact {
            list,
            ring,
            execute,
            params,
            dry_run,
            certificate_dir,
            signing_key,
        } => {
            let mut config = MicroActConfig::default().from_env();
            if let Some(dry) = dry_run {
                config.dry_run = dry;
            }
            config.certificate_dir = certificate_dir;
            config.signing_key = signing_key
                .as_deref()
                .map(aswarm_fastpath::keys::parse_keyval)
                .transpose()
                .context("parsing --signing-key")?;
            if config.signing_key.is_none() {
                warn!("no certificate signing key configured, certificates will be unsigned");
            }
            let mode = if config.dry_run { "DRY RUN" } else { "LIVE" };
            println!("[Mode: {}] [Max Ring: {}]", mode, config.max_ring);

            let catalog = MicroActCatalog::new(config);

            if list {
                let ring = match ring {
                    Some(value) => Some(
                        Ring::from_value(value)
                            .ok_or_else(|| anyhow!("Invalid ring: {}", value))?,
                    ),
                    None => None,
                };
                let actions = catalog.list(ring);
                println!("Available micro-acts ({} total):", actions.len());
                for action in actions {
                    println!("[Ring {}] {}", action.ring.value(), action.id);
                    println!("  Name: {}", action.name);
                    println!("  Desc: {}", action.description);
                    println!("  TTL:  {}s", action.ttl_seconds);
                    if !action.requires_params.is_empty() {
                        println!("  Required: {}", action.requires_params.join(", "));
                    }
                    if !action.optional_params.is_empty() {
                        println!("  Optional: {}", action.optional_params.join(", "));
                    }
                }
            } else if let Some(action_id) = execute {
                let raw = params.ok_or_else(|| anyhow!("--params required for execution"))?;
                let params: BTreeMap<String, serde_json::Value> =
                    serde_json::from_str(&raw).context("parsing --params")?;

                let result = catalog.execute(&action_id, &params).await;
                println!("Execution result:");
                println!("  Success: {}", result.success);
                println!("  Message: {}", result.message);
                if let Some(handle) = &result.revert_handle {
                    println!("  Revert:  {}", handle);
                }
                if let Some(expires) = &result.expires_at {
                    println!("  Expires: {}", expires.to_rfc3339());
                }
                if let Some(proof) = &result.proof {
                    println!("  Proof:   {}", serde_json::to_string_pretty(proof)?);
                }
                if let Some(certificate) = &result.certificate {
                    println!("  Certificate: {}", certificate.json_path.display());
                    match &certificate.signature {
                        Some(signature) => println!("  Signature:   {}", signature),
                        None => println!("  Signature:   (unsigned)"),
                    }
                }

                if result.success && result.probe_endpoint.is_some() {
                    let probe = catalog.probe(&result).await;
                    println!("Probe: {}", serde_json::to_string_pretty(&probe)?);
                }

                if !result.success {
                    std::process::exit(1);
                }
            } else {
                return Err(anyhow!("use --list or --execute"));
            }
        }

        Command::Send {
            host,
            port,
            key_id,
            key,
            dupes,
            gap_ms,
            protocol_version,
            run_id,
            score,
            selector,
            witness_count,
            node_id,
        } => {
            let sender = FastPathSender::new(SenderConfig {
                host,
                port,
                shared_key: key,
                key_id,
                dupes,
                gap_ms,
                protocol_version,
                node_id,
            })?;

            let anomaly = AnomalyData {
                score: score.unwrap_or(0.0),
                witness_count: witness_count.unwrap_or(0),
                selector: selector.unwrap_or_default(),
                ..AnomalyData::default()
            };

            let stats = sender.send_elevation(&anomaly, run_id.as_deref()).await?;
            eprintln!(
                "Sent {}B in {:.1}ms ({} dupes, {} failed)",
                stats.bytes, stats.send_ms_first, stats.dupes, stats.dropped_exceptions
            );
            if stats.dropped_exceptions > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
