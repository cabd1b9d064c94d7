//! ==============================================================================
//! main.rs - swarm host entry point
//! ==============================================================================
//!
//! purpose:
//!     listens for sensor datagrams from the swarm, works out which node is
//!     acting as master, and keeps the derived views (30s window, downsampled
//!     led matrix trend, per-node master durations) up to date. a button
//!     press (or POST /api/reset) clears everything and tells every node to
//!     reset as well.
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                    swarm host (this file)                     │
//!     │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐ │
//!     │  │ ingest   │ │ flush    │ │ button   │ │ dashboard        │ │
//!     │  │ (udp)    │ │ (4s)     │ │ (100ms)  │ │ (port 3000)      │ │
//!     │  └────┬─────┘ └────┬─────┘ └────┬─────┘ └────────┬─────────┘ │
//!     │       │            │            │                │           │
//!     │       └────────────┴─────┬──────┴────────────────┘           │
//!     │                    ┌─────┴─────┐                             │
//!     │                    │  engine   │ <- one RwLock, engine.rs     │
//!     │                    └─────┬─────┘                             │
//!     └──────────────────────────┼───────────────────────────────────┘
//!                 ┌──────────────┼──────────────┐
//!                 ▼              ▼              ▼
//!            telemetry      led matrix      master logs
//!
//! relationships:
//!     - uses: runtime.rs (worker loops), reset.rs (reset protocol)
//!     - reads: config/host.toml (via config.rs)
//!
//! ==============================================================================

mod config;
mod display;
mod domain;
mod downsample;
mod election;
mod engine;
mod gpio;
mod hal;
mod persistence;
mod protocol;
mod reset;
mod runtime;
mod telemetry;
mod window;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::display::{DisplayGeometry, DisplaySink, PixelGrid};
use crate::domain::{EngineSnapshot, Phase};
use crate::engine::{EngineSettings, SwarmEngine};
use crate::persistence::LogRotator;
use crate::reset::{ResetCoordinator, ResetOutcome, UdpBroadcaster};
use crate::runtime::SwarmRuntime;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let config = config::HostConfig::load_or_default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("===========================================================");
    println!("  Swarm Host - master election & reading aggregator");
    println!("===========================================================");
    config.print_summary();

    let cancel = CancellationToken::new();

    // step 2: transport - listen and broadcast on the same port
    let bind: SocketAddr = format!("{}:{}", config.network.bind_address, config.network.port)
        .parse()
        .context("invalid network.bind_address")?;
    let broadcast: SocketAddr = format!("{}:{}", config.network.broadcast_address, config.network.port)
        .parse()
        .context("invalid network.broadcast_address")?;
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("failed to bind udp {}", bind))?;
    socket.set_broadcast(true).context("failed to enable broadcast")?;
    let socket = Arc::new(socket);
    info!("[STARTUP] ✓ Listening on udp {}", bind);

    // step 3: hardware, display, telemetry, persistence
    let hal = hal::default_provider().context("failed to initialise hardware")?;
    let geometry = DisplayGeometry::from(&config.display);
    let display = build_display(hal.clone());

    let (telemetry, telemetry_task) = if config.telemetry.enabled {
        let (handle, rx) = telemetry::channel(config.telemetry.queue_depth);
        let publisher = telemetry::TelemetryPublisher::new(config.telemetry.clone());
        (handle, Some(tokio::spawn(publisher.run(rx, cancel.clone()))))
    } else {
        (telemetry::TelemetryHandle::disabled(), None)
    };

    let rotator = if config.persistence.enabled {
        match LogRotator::new(&config.persistence.directory) {
            Ok(r) => Some(Arc::new(Mutex::new(r))),
            Err(e) => {
                warn!("[STARTUP] ⚠ Log rotation disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    // step 4: engine and reset coordinator
    let engine = SwarmEngine::new(&EngineSettings::from_config(&config));
    let coordinator = Arc::new(ResetCoordinator::new(
        engine.clone(),
        Arc::new(UdpBroadcaster::new(socket.clone(), broadcast)),
        telemetry.clone(),
        gpio::ResetIndicator::new(hal.clone(), config.gpio.indicator_pin),
        display.clone(),
        geometry,
        rotator.clone(),
        config.dwell(),
        cancel.clone(),
    ));
    let runtime = SwarmRuntime::new(engine.clone(), coordinator, telemetry, display, geometry, cancel.clone())
        .with_frame_logging(config.logging.show_frames);
    runtime.render(&runtime.display_frame().await);

    // step 5: workers
    let mut workers = vec![
        tokio::spawn(runtime.clone().run_ingest(
            socket.clone(),
            config.network.max_datagram,
            config.telemetry_interval(),
        )),
        tokio::spawn(runtime.clone().run_flush(config.slice_interval())),
        tokio::spawn(runtime.clone().run_durations(config.telemetry_interval())),
    ];

    let button_runtime = runtime.clone();
    workers.push(tokio::spawn(gpio::monitor_button(
        hal.clone(),
        config.gpio.button_pin,
        std::time::Duration::from_millis(config.gpio.poll_ms),
        cancel.clone(),
        move || button_runtime.spawn_reset(),
    )));

    if config.dashboard.enabled {
        let web_runtime = runtime.clone();
        let bind = config.dashboard.bind.clone();
        let web_cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            if let Err(e) = run_server(web_runtime, &bind, web_cancel).await {
                error!("[ERROR] Web server error: {:#}", e);
            }
        }));
    }

    // step 6: run until ctrl-c
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[ERROR] Failed to listen for ctrl-c: {}", e);
    }
    info!("[SHUTDOWN] Stopping workers...");
    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    runtime.wait_for_resets().await;
    if let Some(task) = telemetry_task {
        let _ = task.await;
    }

    if let Some(rotator) = rotator {
        let archive = engine.archive().await;
        let rotator = rotator.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = rotator.save(&archive) {
            warn!("[SHUTDOWN] ⚠ Failed to save logs: {:#}", e);
        }
    }
    info!("[SHUTDOWN] Shutdown complete");
    Ok(())
}

#[cfg(feature = "hardware")]
fn build_display(hal: Arc<dyn hal::HardwareProvider>) -> Arc<dyn DisplaySink> {
    match display::Max7219Display::new(hal, 4) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            warn!("[STARTUP] ⚠ LED matrix unavailable, logging frames instead: {:#}", e);
            Arc::new(display::LogDisplay)
        }
    }
}

#[cfg(not(feature = "hardware"))]
fn build_display(_hal: Arc<dyn hal::HardwareProvider>) -> Arc<dyn DisplaySink> {
    Arc::new(display::LogDisplay)
}

// ==============================================================================
// web server
// ==============================================================================

async fn run_server(runtime: SwarmRuntime, bind: &str, cancel: CancellationToken) -> Result<()> {
    let app = Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/display", get(display_handler))
        .route("/api/reset", post(reset_handler))
        .layer(CorsLayer::permissive())
        .with_state(runtime);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("[STARTUP] ✓ Dashboard live at http://{}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn dashboard_handler(State(runtime): State<SwarmRuntime>) -> Html<String> {
    let snapshot = runtime.engine().snapshot().await;
    Html(render_dashboard(&snapshot))
}

/// json api endpoint for programmatic access
/// returns one consistent engine snapshot
async fn api_handler(State(runtime): State<SwarmRuntime>) -> Json<EngineSnapshot> {
    Json(runtime.engine().snapshot().await)
}

async fn display_handler(State(runtime): State<SwarmRuntime>) -> Json<PixelGrid> {
    Json(runtime.display_frame().await)
}

/// POST /api/reset - same path as the physical button.
/// answers once the dwell period is over; the reset finishes even if the
/// client hangs up first.
async fn reset_handler(State(runtime): State<SwarmRuntime>) -> Json<serde_json::Value> {
    match runtime.request_reset().await {
        ResetOutcome::Completed { cleared_nodes } => {
            Json(serde_json::json!({"status": "ok", "action": "reset", "cleared_nodes": cleared_nodes}))
        }
        ResetOutcome::AlreadyInProgress => {
            Json(serde_json::json!({"status": "ignored", "reason": "reset in progress"}))
        }
        ResetOutcome::Failed => Json(serde_json::json!({"status": "error", "reason": "reset task failed"})),
    }
}

fn render_dashboard(snapshot: &EngineSnapshot) -> String {
    let mut body = String::new();

    let master = match &snapshot.current_master {
        Some(id) => format!(
            r#"<span style="color: {};">{}</span> ({} s)"#,
            snapshot.master_color.css(),
            html_escape(id),
            snapshot.master_seconds
        ),
        None => "none".to_string(),
    };
    let _ = writeln!(body, "<h1>Master: {}</h1>", master);
    if snapshot.phase == Phase::Resetting {
        body.push_str("<p><strong>Reset in progress</strong></p>\n");
    }

    body.push_str("<h2>Master durations</h2>\n<table>\n");
    for node in &snapshot.nodes {
        let _ = writeln!(
            body,
            r#"<tr><td style="color: {};">{}</td><td>{}</td></tr>"#,
            node.color.css(),
            html_escape(&node.id),
            node.master_seconds
        );
    }
    body.push_str("</table>\n");

    let _ = writeln!(body, "<h2>Readings (last {} entries)</h2>\n<table>", snapshot.window.len());
    for reading in snapshot.window.iter().rev() {
        let ago = (snapshot.taken_at - reading.timestamp).num_milliseconds() as f64 / 1000.0;
        let _ = writeln!(
            body,
            "<tr><td>{:.1}s ago</td><td>{}</td><td>{}</td></tr>",
            ago,
            html_escape(&reading.node_id),
            reading.value
        );
    }
    body.push_str("</table>\n");

    let ring: Vec<String> = snapshot.ring.iter().map(|v| v.to_string()).collect();
    let _ = writeln!(body, "<h2>Display ring</h2>\n<p>{}</p>", ring.join(" "));

    format!(
        r#"<!doctype html>
<html>
<head><title>swarm host</title><meta http-equiv="refresh" content="1"></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
{}<p style="color: #888;">updated {}</p>
</body>
</html>"#,
        body,
        Utc::now().format("%H:%M:%S")
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
     .replace('<', "&lt;")
     .replace('>', "&gt;")
     .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_dashboard_escapes_node_ids() {
        let mut state = engine::EngineState::new(&EngineSettings::default());
        let src = IpAddr::V4(Ipv4Addr::LOCALHOST);
        state.ingest(b"+++<script>,512***", src, Utc::now());

        let html = render_dashboard(&state.snapshot(Utc::now()));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("color: red;"));
    }

    #[test]
    fn test_dashboard_without_master() {
        let state = engine::EngineState::new(&EngineSettings::default());
        let html = render_dashboard(&state.snapshot(Utc::now()));
        assert!(html.contains("Master: none"));
        assert!(html.contains("0 0 0 0 0 0 0 0"));
    }
}
