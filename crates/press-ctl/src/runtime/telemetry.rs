use press_core::Press;
use press_io::metrics::{init_metrics, record_telemetry, serve_metrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Copy press telemetry into the metric gauges until `stop` is set.
pub fn start_metrics_updater(press: Arc<Press>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            record_telemetry(&press.telemetry());
            thread::sleep(Duration::from_millis(200));
        }
        record_telemetry(&press.telemetry());
    })
}
