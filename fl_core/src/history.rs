use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// `serde_json` writes non-finite floats as `null`; read them back as
/// `NaN` so a committed document always deserializes.
fn null_as_nan<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
}

/// Map-valued counterpart of [`null_as_nan`].
fn null_as_nan_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<f32>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| (key, value.unwrap_or(f32::NAN)))
        .collect())
}

/// Train/validation losses a client reported for one round.
///
/// `NaN` means the client contributed nothing (empty train mask, empty
/// validation mask, or a failed local fit).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientLosses {
    #[serde(deserialize_with = "null_as_nan")]
    pub train_loss: f32,
    #[serde(deserialize_with = "null_as_nan")]
    pub val_loss: f32,
}

impl ClientLosses {
    /// The no-contribution marker.
    pub fn skipped() -> Self {
        Self {
            train_loss: f32::NAN,
            val_loss: f32::NAN,
        }
    }
}

/// One round's outcome, appended to the run's ordered history.
///
/// The serialized form is exactly `{round, global_loss, client_divergence}`
/// as stored in `_divergence_metrics.json`; the per-client losses are an
/// in-memory companion that the streaming path surfaces separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round number.
    pub round: usize,
    /// Mean of all clients' latest validation losses, ignoring NaN.
    /// NaN itself when no client ever validated.
    #[serde(deserialize_with = "null_as_nan")]
    pub global_loss: f32,
    /// Per-client, per-layer divergence of local weights against the
    /// freshly aggregated global weights. Keyed by `client_<n>`.
    pub client_divergence: BTreeMap<String, BTreeMap<String, f32>>,
    /// Losses reported this round, keyed by `client_<n>`.
    #[serde(skip)]
    pub client_losses: BTreeMap<String, ClientLosses>,
}

/// The metadata document committed alongside a run's model files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainMetadata {
    pub num_clients: usize,
    pub num_rounds: usize,
    /// ISO-8601 completion timestamp.
    pub last_training_time: String,
    pub run_id: Option<String>,
}

/// Compact per-round progress object emitted in streaming mode.
///
/// Client maps are keyed by the 1-based client id as a string, matching
/// the wire format consumers already parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub round: usize,
    #[serde(deserialize_with = "null_as_nan")]
    pub global_loss: f32,
    #[serde(deserialize_with = "null_as_nan_map")]
    pub client_val: BTreeMap<String, f32>,
    #[serde(deserialize_with = "null_as_nan_map")]
    pub client_train: BTreeMap<String, f32>,
    pub run_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_record_serializes_without_losses() {
        let mut divergence = BTreeMap::new();
        divergence.insert(
            "client_1".to_string(),
            BTreeMap::from([("out.weight".to_string(), 0.25_f32)]),
        );
        let record = RoundRecord {
            round: 1,
            global_loss: 0.5,
            client_divergence: divergence,
            client_losses: BTreeMap::from([(
                "client_1".to_string(),
                ClientLosses {
                    train_loss: 0.7,
                    val_loss: 0.6,
                },
            )]),
        };

        let json = serde_json::to_value(&record).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert!(object.contains_key("round"));
        assert!(object.contains_key("global_loss"));
        assert!(object.contains_key("client_divergence"));
        assert!(!object.contains_key("client_losses"));
    }

    #[test]
    fn test_nan_losses_survive_a_json_round_trip() {
        let record = RoundRecord {
            round: 1,
            global_loss: f32::NAN,
            client_divergence: BTreeMap::new(),
            client_losses: BTreeMap::new(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"global_loss\":null"));
        let back: RoundRecord = serde_json::from_str(&json).unwrap();
        assert!(back.global_loss.is_nan());

        let progress = ProgressRecord {
            round: 1,
            global_loss: f32::NAN,
            client_val: BTreeMap::from([("1".to_string(), f32::NAN)]),
            client_train: BTreeMap::from([("1".to_string(), 0.7_f32)]),
            run_id: None,
        };
        let json = serde_json::to_string(&progress).unwrap();
        let back: ProgressRecord = serde_json::from_str(&json).unwrap();
        assert!(back.global_loss.is_nan());
        assert!(back.client_val["1"].is_nan());
        assert_eq!(back.client_train["1"], 0.7);
    }

    #[test]
    fn test_metadata_round_trip() {
        let meta = TrainMetadata {
            num_clients: 3,
            num_rounds: 2,
            last_training_time: "2026-01-01T00:00:00+00:00".to_string(),
            run_id: Some("run_20260101_000000".to_string()),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: TrainMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
