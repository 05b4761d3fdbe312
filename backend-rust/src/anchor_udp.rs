//! # anchor_udp
//!
//! UDP ingest: anchors (or the simulator) send one JSON ingest frame per datagram.
//!
//! Runs as its own Tokio task next to the HTTP server. Datagrams are parsed and handed
//! to the pipeline queue; nothing here touches pipeline state. Malformed datagrams,
//! unknown anchors and a full queue are logged and skipped. Receive errors never stop
//! the listener.

use std::net::SocketAddr;

use rssi_types::IngestFrame;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::pipeline::{IngestHandle, SubmitReport};

const MAX_DATAGRAM: usize = 4096;

/// Bind `0.0.0.0:port` and forward datagrams until the process exits.
/// A failed bind is logged and the hub keeps serving HTTP/WebSocket ingest.
pub async fn start_udp_listener(port: u16, ingest: IngestHandle) {
    let addr = format!("0.0.0.0:{port}");
    let socket = match UdpSocket::bind(&addr).await {
        Ok(s) => {
            info!("📡 Anchor UDP listening on {addr}");
            s
        }
        Err(e) => {
            warn!("Anchor UDP: could not bind {addr}: {e} (UDP ingest disabled)");
            return;
        }
    };

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                process_datagram(&buf[..len], src, &ingest);
            }
            Err(e) => {
                warn!("Anchor UDP: recv error: {e}");
            }
        }
    }
}

fn process_datagram(data: &[u8], src: SocketAddr, ingest: &IngestHandle) -> SubmitReport {
    let frame = match IngestFrame::parse(data) {
        Ok(f) => f,
        Err(e) => {
            debug!("Anchor UDP: malformed datagram from {src}: {e}");
            return SubmitReport::default();
        }
    };
    let report = ingest.submit_frame(frame);
    if report.rejected > 0 {
        debug!("Anchor UDP: {src} → {} accepted, {} rejected", report.accepted, report.rejected);
    }
    report
}
