//! # rssi-types
//!
//! Wire structures shared by the hub and the anchor simulator.
//!
//! These types are used by:
//! - `backend-rust`: parsing anchor frames (HTTP, WebSocket, UDP) and emitting payloads
//! - `packages/anchor-simulator`: producing anchor frames
//! - browser observers: consuming the JSON payloads on `/ws/client`
//!
//! ## Ingest frames
//! Three shapes are accepted on every transport:
//! - single sample: `{"anchorId": "rssi1", "rssi": -63.0}`
//! - batch: `[{"anchorId": "rssi1", "rssi": -63.0}, ...]`
//! - keyed (legacy ESP32 firmware): `{"rssi1": -63.0, "rssi2": "-70"}`
//!
//! ## Payloads
//! Observers receive a synced payload when every anchor is fresh, otherwise a degraded
//! payload carrying raw values only. All keys are camelCase.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Keys that mark an object as a (malformed) single sample rather than a keyed frame.
const SAMPLE_KEYS: [&str; 3] = ["anchorId", "anchor_id", "id"];

// ── Ingest ────────────────────────────────────────────────────────────────────

/// One RSSI report from one anchor. Arrival time is assigned by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorSample {
    #[serde(alias = "anchor_id", alias = "id")]
    pub anchor_id: String,
    /// Number or numeric string
    #[serde(deserialize_with = "rssi_value")]
    pub rssi: f64,
}

impl AnchorSample {
    pub fn new(anchor_id: impl Into<String>, rssi: f64) -> Self {
        Self { anchor_id: anchor_id.into(), rssi }
    }
}

/// Any frame an anchor (or a relay) may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IngestFrame {
    Sample(AnchorSample),
    Batch(Vec<AnchorSample>),
    /// `{"<anchor id>": <rssi>}`, several anchors multiplexed in one message
    Keyed(Map<String, Value>),
}

impl IngestFrame {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Flatten into samples. Keyed entries whose value is neither a number nor a
    /// numeric string are skipped.
    pub fn into_samples(self) -> Vec<AnchorSample> {
        match self {
            IngestFrame::Sample(s) => vec![s],
            IngestFrame::Batch(v) => v,
            // An object naming its anchor that failed to parse as a sample is dropped whole
            IngestFrame::Keyed(map) if SAMPLE_KEYS.iter().any(|k| map.contains_key(*k)) => vec![],
            IngestFrame::Keyed(map) => map
                .into_iter()
                .filter_map(|(k, v)| keyed_rssi(&v).map(|rssi| AnchorSample { anchor_id: k, rssi }))
                .collect(),
        }
    }
}

fn rssi_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let v = Value::deserialize(deserializer)?;
    keyed_rssi(&v).ok_or_else(|| serde::de::Error::custom(format!("rssi must be a number or numeric string, got {v}")))
}

fn keyed_rssi(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReading {
    pub id: String,
    /// Last raw RSSI; `null` until the anchor has reported once
    pub raw: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Every anchor fresh: full chain result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedPayload {
    pub anchor_readings: Vec<AnchorReading>,
    /// Sanitized distance per anchor, same order as `anchor_readings`
    pub distances: Vec<f64>,
    pub position: Position,
    pub residual_norm: f64,
    /// false when the position came from the grid-search fallback
    pub success: bool,
    pub epoch_ms: u64,
}

/// At least one anchor stale: raw values only, no derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedPayload {
    pub anchor_readings: Vec<AnchorReading>,
    pub epoch_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Synced(SyncedPayload),
    Degraded(DegradedPayload),
}

impl Payload {
    pub fn is_synced(&self) -> bool {
        matches!(self, Payload::Synced(_))
    }

    pub fn anchor_readings(&self) -> &[AnchorReading] {
        match self {
            Payload::Synced(p) => &p.anchor_readings,
            Payload::Degraded(p) => &p.anchor_readings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_sample() {
        let frame = IngestFrame::parse(br#"{"anchorId":"rssi2","rssi":-67.5}"#).unwrap();
        assert_eq!(frame.into_samples(), vec![AnchorSample::new("rssi2", -67.5)]);
    }

    #[test]
    fn accepts_snake_case_anchor_id() {
        let frame = IngestFrame::parse(br#"{"anchor_id":"rssi1","rssi":-60}"#).unwrap();
        assert_eq!(frame.into_samples(), vec![AnchorSample::new("rssi1", -60.0)]);
    }

    #[test]
    fn single_sample_accepts_numeric_string() {
        let frame = IngestFrame::parse(br#"{"anchorId":"rssi1","rssi":"-60"}"#).unwrap();
        assert_eq!(frame, IngestFrame::Sample(AnchorSample::new("rssi1", -60.0)));
    }

    #[test]
    fn malformed_single_sample_yields_nothing() {
        let frame = IngestFrame::parse(br#"{"anchorId":"rssi1","rssi":"loud"}"#).unwrap();
        assert!(matches!(frame, IngestFrame::Keyed(_)));
        assert!(frame.into_samples().is_empty());
    }

    #[test]
    fn parses_batch() {
        let frame = IngestFrame::parse(br#"[{"anchorId":"a","rssi":-1},{"anchorId":"b","rssi":-2}]"#).unwrap();
        assert_eq!(frame.into_samples().len(), 2);
    }

    #[test]
    fn parses_keyed_legacy_frame() {
        let frame = IngestFrame::parse(br#"{"rssi1": -61, "rssi3": " -70.5 ", "note": "hi", "rssi2": null}"#).unwrap();
        let samples = frame.into_samples();
        assert_eq!(
            samples,
            vec![AnchorSample::new("rssi1", -61.0), AnchorSample::new("rssi3", -70.5)]
        );
    }

    #[test]
    fn rejects_non_json() {
        assert!(IngestFrame::parse(b"rssi1=-60").is_err());
    }

    #[test]
    fn degraded_payload_has_no_derived_fields() {
        let payload = Payload::Degraded(DegradedPayload {
            anchor_readings: vec![
                AnchorReading { id: "rssi1".into(), raw: Some(-60.0), filtered: None },
                AnchorReading { id: "rssi2".into(), raw: None, filtered: None },
            ],
            epoch_ms: 1,
        });
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            v,
            json!({
                "anchorReadings": [{"id": "rssi1", "raw": -60.0}, {"id": "rssi2", "raw": null}],
                "epochMs": 1
            })
        );
        assert!(!payload.is_synced());
    }

    #[test]
    fn synced_payload_shape() {
        let payload = Payload::Synced(SyncedPayload {
            anchor_readings: vec![AnchorReading { id: "rssi1".into(), raw: Some(-60.0), filtered: Some(-61.0) }],
            distances: vec![1.2],
            position: Position { x: 1.0, y: 2.0 },
            residual_norm: 0.01,
            success: true,
            epoch_ms: 5,
        });
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["anchorReadings"][0]["filtered"], json!(-61.0));
        assert_eq!(v["position"], json!({"x": 1.0, "y": 2.0}));
        assert_eq!(v["residualNorm"], json!(0.01));
        assert_eq!(v["success"], json!(true));

        let back: Payload = serde_json::from_value(v).unwrap();
        assert!(back.is_synced());
    }
}
