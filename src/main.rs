//! Binary entry point: loads configuration, wires the pipeline together, serves the subscriber
//! WebSocket and health endpoints, and waits for `ctrl_c` before triggering a graceful shutdown.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tickforge::config::{AppConfig, CliOverrides};
use tickforge::hub::Hub;
use tickforge::supervisor::Supervisor;
use tracing::{error, info, warn};
use warp::ws::{Message, WebSocket};
use warp::Filter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = CliOverrides::parse();
    let config = match AppConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let supervisor = Supervisor::new(&config);
    let hub = supervisor.hub.clone();
    let ingestor = supervisor.ingestor.clone();
    let analyzer_counters = supervisor.analyzer_counters();
    let cancel = supervisor.cancellation_token();

    let bind_addr: std::net::SocketAddr = config
        .health_bind_addr
        .clone()
        .unwrap_or_else(|| "0.0.0.0:8080".to_string())
        .parse()
        .expect("health_bind_addr must be a valid socket address");

    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(with_hub(hub.clone()))
        .map(|ws: warp::ws::Ws, hub: std::sync::Arc<Hub>| ws.on_upgrade(move |socket| handle_subscriber(socket, hub)));

    let health_route = tickforge::health::health_route(
        ingestor.clone(),
        analyzer_counters,
        hub.clone(),
        supervisor.log.clone(),
    );
    let routes = ws_route.or(health_route);

    let (_addr, server) = warp::serve(routes).bind_with_graceful_shutdown(bind_addr, {
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    });

    let server_handle = tokio::spawn(server);
    info!(%bind_addr, "serving subscriber websocket and health endpoint");

    let supervisor_handle = tokio::spawn(supervisor.run());

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
    info!("shutdown signal received");
    cancel.cancel();

    if let Err(e) = supervisor_handle.await {
        warn!(error = %e, "supervisor task ended abnormally");
    }
    if let Err(e) = server_handle.await {
        warn!(error = %e, "subscriber server task ended abnormally");
    }
}

fn with_hub(
    hub: std::sync::Arc<Hub>,
) -> impl Filter<Extract = (std::sync::Arc<Hub>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

/// Forwards a newly attached subscriber's JSON and binary mailboxes onto its WebSocket frame by
/// frame until either side disconnects (SPEC_FULL.md §6).
async fn handle_subscriber(socket: WebSocket, hub: std::sync::Arc<Hub>) {
    let (mut sink, mut stream) = socket.split();
    let (id, mut json_rx, mut bin_rx) = hub.attach();
    info!(subscriber_id = id, "subscriber connected");

    loop {
        tokio::select! {
            msg = json_rx.recv() => {
                match msg {
                    Some(message) => {
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "failed to encode subscriber message");
                                continue;
                            }
                        };
                        if sink.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            audio = bin_rx.recv() => {
                match audio {
                    Some(bytes) => {
                        if sink.send(Message::binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(msg)) if msg.is_close() => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    hub.detach(id);
    info!(subscriber_id = id, "subscriber disconnected");
}
