//! Prometheus metrics for the press.
//!
//! Gauges mirror the latest telemetry; counters track operator commands.

use crate::protocol::TELEMETRY_TAGS;
use press_core::{TaskState, Telemetry};
use prometheus::{Encoder, Gauge, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn register_gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

// ============================================================================
// Process State
// ============================================================================

/// One gauge per scalar telemetry tag, in `TELEMETRY_TAGS` order.
pub static TELEMETRY_GAUGES: LazyLock<Vec<Gauge>> = LazyLock::new(|| {
    TELEMETRY_TAGS
        .iter()
        .map(|tag| register_gauge(tag.metric, tag.help))
        .collect()
});

/// Total corrections issued by the regulator, per direction.
pub static ACTUATIONS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "press_actuations",
            "Corrections issued by the regulator since start",
        ),
        &["action"],
    )
    .expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
});

// ============================================================================
// Tasks
// ============================================================================

/// Task state (0=stopped,1=running,2=paused)
pub static TASK_STATE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("press_task_state", "Task state (0=stopped,1=running,2=paused)"),
        &["task"],
    )
    .expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
});

pub static TASK_TICKS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(Opts::new("press_task_ticks", "Ticks run per task"), &["task"])
        .expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
});

pub static TASK_FAILURES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("press_task_failures", "Failed ticks per task"),
        &["task"],
    )
    .expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
});

// ============================================================================
// Commands
// ============================================================================

pub static COMMANDS: LazyLock<IntCounter> =
    LazyLock::new(|| register_counter("press_commands_total", "Operator commands received"));

pub static COMMAND_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_counter(
        "press_command_failures_total",
        "Operator commands rejected or failed",
    )
});

fn task_state_value(state: TaskState) -> i64 {
    match state {
        TaskState::Stopped => 0,
        TaskState::Running => 1,
        TaskState::Paused => 2,
    }
}

/// Copy one telemetry snapshot into the gauges.
pub fn record_telemetry(telemetry: &Telemetry) {
    for (tag, gauge) in TELEMETRY_TAGS.iter().zip(TELEMETRY_GAUGES.iter()) {
        if let Some(value) = telemetry.scalar(tag) {
            gauge.set(value);
        }
    }

    let counts = telemetry.actuations;
    ACTUATIONS.with_label_values(&["up"]).set(counts.up as i64);
    ACTUATIONS.with_label_values(&["down"]).set(counts.down as i64);
    ACTUATIONS.with_label_values(&["hold"]).set(counts.hold as i64);

    for (name, task) in [
        ("status", &telemetry.status_task),
        ("control", &telemetry.control_task),
        ("record", &telemetry.record_task),
    ] {
        TASK_STATE
            .with_label_values(&[name])
            .set(task_state_value(task.state));
        TASK_TICKS
            .with_label_values(&[name])
            .set(task.stats.ticks as i64);
        TASK_FAILURES
            .with_label_values(&[name])
            .set(task.stats.failures as i64);
    }
}

/// Prometheus text exposition of every registered metric.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let buffer = match render() {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            tracing::warn!("Failed to encode metrics: {}", e);
                            let _ = request.respond(
                                Response::from_string("Internal Server Error")
                                    .with_status_code(500),
                            );
                            continue;
                        }
                    };
                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the sensor has been polled
                    let polled = TASK_TICKS.with_label_values(&["status"]).get();
                    if polled > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = TELEMETRY_GAUGES.len();
    let _ = ACTUATIONS.with_label_values(&["up"]).get();
    let _ = TASK_STATE.with_label_values(&["status"]).get();
    let _ = TASK_TICKS.with_label_values(&["status"]).get();
    let _ = TASK_FAILURES.with_label_values(&["status"]).get();
    let _ = COMMANDS.get();
    let _ = COMMAND_FAILURES.get();
}
