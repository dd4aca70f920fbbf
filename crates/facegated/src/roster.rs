//! Startup seeding of the embedding store.
//!
//! Identities come from the authorization service's roster, or, when that
//! yields nothing, from a single local reference image.

use crate::enroll::Enroller;
use crate::verifier::AuthorityClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::path::Path;

/// Label given to the local reference image.
pub const REFERENCE_LABEL: &str = "enrolled_user";

/// One identity as listed by the authorization service.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "faceId", default)]
    pub face_id: Option<String>,
    /// Base64 image, optionally as a `data:` URL.
    #[serde(default)]
    pub photo: Option<String>,
}

impl RosterEntry {
    /// The label to enroll under, and whether it was generated here.
    pub fn label(&self) -> (String, bool) {
        match self.face_id.as_deref().filter(|f| !f.is_empty()) {
            Some(face_id) => (face_id.to_string(), false),
            None => (format!("face-{}", self.id), true),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

/// Decode a base64 photo, stripping a `data:image/...;base64,` prefix.
pub fn decode_photo(photo: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match photo.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
        None => photo,
    };
    STANDARD.decode(payload.trim())
}

/// Load every usable identity. Returns the number loaded; never fails.
pub async fn seed_store(
    authority: Option<&AuthorityClient>,
    reference_image: Option<&Path>,
    enroller: &Enroller,
) -> usize {
    let mut loaded = 0;

    if let Some(authority) = authority {
        match authority.fetch_roster().await {
            Ok(entries) => loaded = load_roster(authority, entries, enroller).await,
            Err(e) => tracing::warn!(error = %e, "could not fetch roster"),
        }
    }

    if loaded == 0 {
        if let Some(path) = reference_image {
            loaded += load_reference(path, enroller).await;
        }
    }

    tracing::info!(loaded, "known faces loaded");
    loaded
}

async fn load_roster(authority: &AuthorityClient, entries: Vec<RosterEntry>, enroller: &Enroller) -> usize {
    let total = entries.len();
    // Entries sharing a label overwrite each other; count identities, not entries.
    let mut loaded = BTreeSet::new();

    for entry in entries {
        let (label, generated) = entry.label();
        let Some(photo) = entry.photo.as_deref().filter(|p| !p.is_empty()) else {
            tracing::debug!(id = %entry.id, "roster entry has no photo");
            continue;
        };

        let bytes = match decode_photo(photo) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(id = %entry.id, error = %e, "skipping roster entry with malformed photo");
                continue;
            }
        };

        if let Err(e) = enroller.enroll_reference(Bytes::from(bytes), &label).await {
            tracing::warn!(id = %entry.id, label = %label, error = %e, "skipping roster entry");
            continue;
        }
        loaded.insert(label.clone());

        if generated {
            if let Err(e) = authority.link_face_id(&entry.id, &label).await {
                tracing::warn!(id = %entry.id, label = %label, error = %e, "could not record face id");
            }
        }
    }

    tracing::info!(loaded = loaded.len(), total, "roster processed");
    loaded.len()
}

async fn load_reference(path: &Path, enroller: &Enroller) -> usize {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read reference image");
            return 0;
        }
    };

    match enroller.enroll_reference(Bytes::from(bytes), REFERENCE_LABEL).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), label = REFERENCE_LABEL, "reference image loaded");
            1
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "reference image not usable");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EmbeddingStore;
    use crate::testutil::{basis, png_bytes, spawn_http, ScriptedAnalyzer};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn enroller() -> (Enroller, Arc<EmbeddingStore>) {
        let store = Arc::new(EmbeddingStore::new(4));
        (
            Enroller::new(Arc::new(ScriptedAnalyzer::default()), Arc::clone(&store)),
            store,
        )
    }

    fn photo(faces: u8, seed: u8) -> String {
        STANDARD.encode(png_bytes(faces, seed))
    }

    fn authority(base: &str) -> AuthorityClient {
        AuthorityClient::new(base, Duration::from_millis(500), Duration::from_millis(500))
    }

    /// Fake authority serving `roster` and recording face-id write-backs.
    async fn fake_authority(roster: serde_json::Value) -> (String, Arc<Mutex<Vec<serde_json::Value>>>) {
        let linked = Arc::new(Mutex::new(Vec::new()));
        let linked_in = Arc::clone(&linked);
        let router = Router::new()
            .route("/api/hardware/enrolled-faces", get(move || async move { Json(roster) }))
            .route(
                "/api/hardware/update-face-id",
                put(move |Json(body): Json<serde_json::Value>| {
                    let linked = Arc::clone(&linked_in);
                    async move {
                        linked.lock().push(body);
                        Json(serde_json::json!({"success": true}))
                    }
                }),
            );
        (spawn_http(router).await, linked)
    }

    #[test]
    fn test_decode_photo_with_and_without_data_url() {
        let raw = b"hello";
        let b64 = STANDARD.encode(raw);
        assert_eq!(decode_photo(&b64).unwrap(), raw);
        assert_eq!(decode_photo(&format!("data:image/jpeg;base64,{b64}")).unwrap(), raw);
        assert!(decode_photo("%%% not base64").is_err());
    }

    #[test]
    fn test_entry_label() {
        let entry: RosterEntry = serde_json::from_value(serde_json::json!({"id": 42})).unwrap();
        assert_eq!(entry.label(), ("face-42".to_string(), true));

        let entry: RosterEntry =
            serde_json::from_value(serde_json::json!({"id": "s1", "faceId": "face-abc"})).unwrap();
        assert_eq!(entry.label(), ("face-abc".to_string(), false));

        let entry: RosterEntry = serde_json::from_value(serde_json::json!({"id": "s1", "faceId": ""})).unwrap();
        assert_eq!(entry.label(), ("face-s1".to_string(), true));
    }

    #[tokio::test]
    async fn test_roster_skips_bad_entries_and_links_generated_labels() {
        let (base, linked) = fake_authority(serde_json::json!([
            {"id": "s1", "faceId": "face-s1", "photo": photo(1, 0)},
            {"id": "s2", "photo": format!("data:image/png;base64,{}", photo(2, 1))},
            {"id": "s3", "photo": "!!!"},
            {"id": "s4", "photo": photo(0, 0)},
            {"id": "s5", "photo": STANDARD.encode(b"not an image")},
            {"id": "s6", "photo": null}
        ]))
        .await;
        let (enroller, store) = enroller();

        let loaded = seed_store(Some(&authority(&base)), None, &enroller).await;
        assert_eq!(loaded, 2);
        assert_eq!(store.snapshot()["face-s1"], basis(0));
        assert_eq!(store.snapshot()["face-s2"], basis(1));
        assert_eq!(
            linked.lock().as_slice(),
            &[serde_json::json!({"studentId": "s2", "faceId": "face-s2"})]
        );
    }

    #[tokio::test]
    async fn test_duplicate_face_ids_count_once() {
        let (base, linked) = fake_authority(serde_json::json!([
            {"id": "s1", "faceId": "face-dup", "photo": photo(1, 0)},
            {"id": "s2", "faceId": "face-dup", "photo": photo(1, 2)}
        ]))
        .await;
        let (enroller, store) = enroller();

        let loaded = seed_store(Some(&authority(&base)), None, &enroller).await;
        assert_eq!(loaded, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()["face-dup"], basis(2));
        assert!(linked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_roster_falls_back_to_reference_image() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.png");
        std::fs::write(&path, png_bytes(1, 3)).unwrap();

        let (enroller, store) = enroller();
        let loaded = seed_store(Some(&authority(&format!("http://{addr}"))), Some(&path), &enroller).await;
        assert_eq!(loaded, 1);
        assert_eq!(store.snapshot()[REFERENCE_LABEL], basis(3));
    }

    #[tokio::test]
    async fn test_empty_roster_falls_back_to_reference_image() {
        let (base, _) = fake_authority(serde_json::json!([])).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.png");
        std::fs::write(&path, png_bytes(1, 2)).unwrap();

        let (enroller, store) = enroller();
        assert_eq!(seed_store(Some(&authority(&base)), Some(&path), &enroller).await, 1);
        assert!(store.snapshot().contains_key(REFERENCE_LABEL));
    }

    #[tokio::test]
    async fn test_nothing_configured_loads_nothing() {
        let (enroller, store) = enroller();
        let missing = Path::new("/nonexistent/facegate/reference.jpg");
        assert_eq!(seed_store(None, Some(missing), &enroller).await, 0);
        assert_eq!(seed_store(None, None, &enroller).await, 0);
        assert!(store.is_empty());
    }
}
