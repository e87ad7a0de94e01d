use crate::engine::{RunState, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of `POST /api/start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartRequest {
    pub shard: usize,
    pub total_shards: usize,
}

/// Body of `GET /api/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    pub state: RunState,
    /// Always present on the wire; an empty string means no error
    #[serde(default, with = "empty_as_none")]
    pub err: Option<String>,
}

impl From<RunStatus> for StatusResponse {
    fn from(status: RunStatus) -> Self {
        Self {
            state: status.state,
            err: status.err,
        }
    }
}

/// Body of `GET /api/results`: each aggregator's local result as produced by
/// its own `to_json`, base64-encoded on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultsResponse {
    #[serde(with = "base64_map")]
    pub serialized_results: BTreeMap<String, Vec<u8>>,
}

mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(err: &Option<String>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(err.as_deref().unwrap_or_default())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        let err = Option::<String>::deserialize(de)?;
        Ok(err.filter(|e| !e.is_empty()))
    }
}

mod base64_map {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_map(map.iter().map(|(k, v)| (k, STANDARD.encode(v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(de)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v.as_bytes())
                    .map(|bytes| (k, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
