//! graphcalld - serves a built-in object graph over the graphcall protocol.

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use graphcall::config::Settings;
use graphcall::error::RpcError;
use graphcall::graph::{CallArgs, Namespace, RemoteObject};
use graphcall::session::{ServerSession, SessionOptions, SessionState, StopHandle};
use graphcall::socket::{AcceptOptions, ConnectionMetrics, Listener};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");
const DEFAULT_CONFIG_PATH: &str = "/etc/graphcall/graphcalld.toml";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let (settings, source) = match load_settings(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration: {}", source);
    info!(
        "Listening address: {}:{}",
        settings.listener.bind_address, settings.listener.port
    );
    info!("Log level: {}", settings.logging.level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings, args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon failed");
            ExitCode::FAILURE
        }
    }
}

/// Async main function.
async fn async_main(settings: Settings, args: Vec<String>) -> Result<(), RpcError> {
    let listener = Listener::bind_with_config(&settings.listener).await?;
    let metrics = listener.metrics();
    let root = system_root(Instant::now());

    let mut accept_options = AcceptOptions::from_settings(&settings)?;
    let mut session_options = SessionOptions::from_settings(&settings);
    let mut sessions: Vec<StopHandle> = Vec::new();

    info!(
        address = %listener.local_addr(),
        authenticated = accept_options.authenticator.is_some(),
        "Waiting for connections..."
    );

    loop {
        let session_root = Arc::clone(&root);
        let options = session_options.clone();

        tokio::select! {
            accepted = listener.accept(
                move |conn| ServerSession::with_options(conn, session_root, options),
                &accept_options,
            ) => {
                match accepted? {
                    Some(session) => {
                        sessions.retain(|handle| handle.state() != SessionState::Closed);
                        sessions.push(session.stop_handle());
                        serve(session, Arc::clone(&metrics));
                    }
                    // Accept budget elapsed; keep listening.
                    None => continue,
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping sessions...");
                for handle in &sessions {
                    handle.request_stop();
                }

                let drain_timeout = Duration::from_secs(30);
                match tokio::time::timeout(drain_timeout, listener.wait_for_drain()).await {
                    Ok(()) => info!("Graceful shutdown complete"),
                    Err(_) => warn!(
                        "Shutdown timeout after {}s, some sessions may be terminated",
                        drain_timeout.as_secs()
                    ),
                }
                break;
            }
            _ = reload_signal() => {
                info!("Reload signal received, reloading configuration...");
                match load_settings(&args).and_then(|(new_settings, _)| {
                    let accept = AcceptOptions::from_settings(&new_settings)?;
                    Ok((accept, SessionOptions::from_settings(&new_settings)))
                }) {
                    Ok((accept, session)) => {
                        accept_options = accept;
                        session_options = session;
                        info!("Configuration reloaded for new connections");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to reload configuration, keeping existing settings");
                    }
                }
            }
        }
    }

    info!(
        accepted = metrics.accepted(),
        rejected = metrics.rejected(),
        "Daemon stopped"
    );
    Ok(())
}

/// Run one session to completion on its own task.
fn serve(mut session: ServerSession, metrics: Arc<ConnectionMetrics>) {
    metrics.session_started();
    tokio::spawn(async move {
        let peer = session.peer_addr();
        let result = match session.start() {
            Ok(()) => session.wait().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(peer = %peer, error = %e, "Session failed");
        }
        metrics.session_finished();
    });
}

/// Object graph exposed by the daemon.
fn system_root(started: Instant) -> Arc<dyn RemoteObject> {
    let system = Namespace::new("System")
        .with_value("name", NAME)
        .with_method("ping", |args: CallArgs| {
            args.expect_none()?;
            Ok(json!("pong"))
        })
        .with_method("version", |_args| Ok(json!(VERSION)))
        .with_method("uptime_seconds", move |_args| {
            Ok(json!(started.elapsed().as_secs()))
        })
        .with_method("echo", |args: CallArgs| {
            Ok(json!({
                "args": args.args(),
                "kwargs": Value::Object(args.kwargs().clone()),
            }))
        });

    Arc::new(Namespace::new("Root").with_object("system", Arc::new(system)))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a reload signal (SIGHUP).
#[cfg(unix)]
async fn reload_signal() {
    match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            std::future::pending::<()>().await;
        }
    }
}

/// No-op reload signal for non-Unix platforms.
#[cfg(not(unix))]
async fn reload_signal() {
    std::future::pending::<()>().await;
}

/// Print help message.
fn print_help() {
    println!(
        r#"{} {}
Serves an object graph to remote callers over TCP.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: {}, built-in defaults if absent]
    -h, --help             Print help information
    -V, --version          Print version information
"#,
        NAME, VERSION, NAME, DEFAULT_CONFIG_PATH
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> Option<String> {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Load settings from the explicit path, the default path, or defaults.
fn load_settings(args: &[String]) -> Result<(Settings, String), RpcError> {
    match get_config_path(args) {
        Some(path) => Ok((Settings::load(&path)?, path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Ok((Settings::load(DEFAULT_CONFIG_PATH)?, DEFAULT_CONFIG_PATH.to_string()))
        }
        None => Ok((Settings::default(), "built-in defaults".to_string())),
    }
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
