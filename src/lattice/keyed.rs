//! Serde adapter for maps keyed by [`MeasureSet`].
//!
//! JSON object keys must be strings, so these maps are written as an array
//! of `[measure_set, value]` pairs.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeSeq};

use crate::lattice::MeasureSet;

pub fn serialize<V, S>(map: &BTreeMap<MeasureSet, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    V: Serialize,
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(map.len()))?;
    for entry in map {
        seq.serialize_element(&entry)?;
    }
    seq.end()
}

pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<MeasureSet, V>, D::Error>
where
    V: Deserialize<'de>,
    D: Deserializer<'de>,
{
    let entries: Vec<(MeasureSet, V)> = Vec::deserialize(deserializer)?;
    Ok(entries.into_iter().collect())
}
