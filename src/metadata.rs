use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parsed archive metadata.
///
/// The JSON metadata region is an open-ended object; the well-known fields
/// get typed accessors and everything else lands in `extra`, so no
/// information is lost when re-serializing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Human-readable archive name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Attribution string, possibly HTML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    /// Dataset version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Layer descriptions for vector archives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_layers: Option<serde_json::Value>,
    /// Everything else from the metadata object.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Metadata {
    /// Parse metadata from decompressed JSON bytes.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_and_extra_fields() {
        let raw = br#"{
            "name": "firenze",
            "attribution": "ODbL",
            "planetiler:version": "0.5",
            "vector_layers": [{"id": "water"}]
        }"#;
        let metadata = Metadata::from_json(raw).unwrap();
        assert_eq!(metadata.name.as_deref(), Some("firenze"));
        assert_eq!(metadata.attribution.as_deref(), Some("ODbL"));
        assert!(metadata.vector_layers.is_some());
        assert_eq!(
            metadata.extra.get("planetiler:version"),
            Some(&serde_json::json!("0.5"))
        );
    }

    #[test]
    fn empty_object_parses() {
        let metadata = Metadata::from_json(b"{}").unwrap();
        assert_eq!(metadata, Metadata::default());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(Metadata::from_json(b"not json").is_err());
    }
}
