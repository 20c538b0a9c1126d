// crates/playout-cli/src/metrics_server.rs
//
// A minimal blocking TCP responder: every connection gets the current
// metrics snapshot rendered as text, then the connection closes. No HTTP
// parsing, no keep-alive — SPEC_FULL.md §6 only asks that the text format be
// observable without an external scraper, not that this speak real HTTP.

use std::io::Write;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use playout_engine::PipelineMetrics;

pub fn serve(port: u16, metrics: Arc<Mutex<PipelineMetrics>>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .map_err(|e| anyhow::anyhow!("bind metrics port {port}: {e}"))?;
    log::info!("metrics endpoint listening on 127.0.0.1:{port}");

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("metrics connection accept failed: {e}");
                continue;
            }
        };
        let text = metrics.lock().unwrap().generate_prometheus_text();
        if let Err(e) = stream.write_all(text.as_bytes()) {
            log::warn!("metrics write failed: {e}");
        }
    }
    Ok(())
}
