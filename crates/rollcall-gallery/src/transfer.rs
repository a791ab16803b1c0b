//! Versioned gallery interchange schema.
//!
//! A gallery built under encoder version N must never be silently matched
//! against version N+1, so every export pins both a schema version and the
//! encoder version; import refuses anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current interchange schema version.
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// A full gallery snapshot in interchange form.
///
/// Identities are keyed in a `BTreeMap` so serialized output is stable
/// across exports of the same gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryExport {
    pub schema_version: u32,
    /// Encoder version every embedding in this export was produced under.
    pub encoder_version: String,
    pub exported_at: DateTime<Utc>,
    pub identities: BTreeMap<String, ExportedIdentity>,
}

/// One identity in interchange form. Embedding vectors are raw values; the
/// encoder version is carried once at the top level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedIdentity {
    pub name: String,
    pub embeddings: Vec<Vec<f32>>,
    /// RFC 3339 enrollment timestamp, preserved verbatim.
    pub enrolled_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GalleryExport {
        let mut identities = BTreeMap::new();
        identities.insert(
            "E002".to_string(),
            ExportedIdentity {
                name: "Priya Nair".into(),
                embeddings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
                enrolled_at: "2026-03-01T10:00:00Z".into(),
            },
        );
        identities.insert(
            "E001".to_string(),
            ExportedIdentity {
                name: "Asha Rao".into(),
                embeddings: vec![vec![1.0, 0.0]],
                enrolled_at: "2026-01-15T08:30:00Z".into(),
            },
        );
        GalleryExport {
            schema_version: EXPORT_SCHEMA_VERSION,
            encoder_version: "w600k_r50".into(),
            exported_at: "2026-08-01T12:00:00Z".parse().unwrap(),
            identities,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let export = sample();
        let json = serde_json::to_string_pretty(&export).unwrap();
        let back: GalleryExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schema_version, EXPORT_SCHEMA_VERSION);
        assert_eq!(back.encoder_version, "w600k_r50");
        assert_eq!(back.identities.len(), 2);
        assert_eq!(back.identities["E002"].embeddings.len(), 2);
    }

    #[test]
    fn keys_serialize_in_stable_order() {
        let json = serde_json::to_string(&sample()).unwrap();
        let e001 = json.find("E001").unwrap();
        let e002 = json.find("E002").unwrap();
        assert!(e001 < e002);
    }
}
