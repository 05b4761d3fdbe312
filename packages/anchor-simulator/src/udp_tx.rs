//! udp_tx.rs — UDP transmitter for anchor samples
//!
//! One datagram per sample, sent to the hub's anchor UDP port. Two encodings:
//!   - `{"anchorId": "rssi1", "rssi": -61}` (default)
//!   - `{"rssi1": -61}` (legacy keyed frame, `--keyed`)
//!
//! Send errors are logged but never stop the simulator.

use std::net::UdpSocket;

use rssi_types::AnchorSample;
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub struct UdpTransmitter {
    socket: UdpSocket,
    hub_addr: String,
    keyed: bool,
}

impl UdpTransmitter {
    pub fn new(hub_addr: &str, keyed: bool) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { socket, hub_addr: hub_addr.to_string(), keyed })
    }

    pub fn send_sample(&self, sample: &AnchorSample) {
        let bytes = match encode(sample, self.keyed) {
            Ok(b) => b,
            Err(e) => {
                warn!("UDP: serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, &self.hub_addr) {
            warn!("UDP: send to {} failed: {e}", self.hub_addr);
        } else {
            debug!("UDP → {} {}={:.0}dBm", self.hub_addr, sample.anchor_id, sample.rssi);
        }
    }
}

fn encode(sample: &AnchorSample, keyed: bool) -> Result<Vec<u8>, serde_json::Error> {
    if keyed {
        let mut map = Map::new();
        map.insert(sample.anchor_id.clone(), Value::from(sample.rssi));
        serde_json::to_vec(&map)
    } else {
        serde_json::to_vec(sample)
    }
}
