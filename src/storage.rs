//! Audio publishing: upload a synthesized clip and hand back a public URL.
//!
//! Uploads never overwrite. Keys combine the owner, a millisecond timestamp
//! and 64 random bits, and a key collision is reported as an error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::info;

use crate::error::{check_status, PublishError, UpstreamError};
use crate::supabase::SupabaseClient;
use crate::voice::AUDIO_CONTENT_TYPE;

/// Duration reported to the platform for every clip. Not measured from the
/// audio; the platform only uses it for display.
pub const PLACEHOLDER_DURATION_MS: u64 = 5_000;

/// A durable object store with public read URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `key`. An existing object is never replaced: writing to a
    /// taken key fails with [`PublishError::AlreadyExists`].
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), PublishError>;

    fn public_url(&self, key: &str) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedAudio {
    pub url: String,
    pub duration_ms: u64,
}

/// Build a collision-resistant object key for a clip owned by `owner_id`.
pub fn object_key(owner_id: &str, at: DateTime<Utc>, nonce: u64) -> String {
    let owner: String = owner_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let owner = if owner.is_empty() {
        "anonymous".to_string()
    } else {
        owner
    };
    format!("{owner}/{}-{nonce:016x}.mp3", at.timestamp_millis())
}

pub struct AudioPublisher {
    store: Arc<dyn ObjectStore>,
}

impl AudioPublisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn publish(
        &self,
        owner_id: &str,
        audio: Vec<u8>,
    ) -> Result<PublishedAudio, PublishError> {
        let key = object_key(owner_id, Utc::now(), rand::random());
        let size = audio.len();
        self.store
            .put_object(&key, audio, AUDIO_CONTENT_TYPE)
            .await?;

        let url = self.store.public_url(&key);
        info!("Published {size} bytes of audio as {key}");
        Ok(PublishedAudio {
            url,
            duration_ms: PLACEHOLDER_DURATION_MS,
        })
    }
}

const SERVICE: &str = "supabase-storage";

/// Supabase Storage bucket with public objects.
pub struct SupabaseStorage {
    client: SupabaseClient,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(client: SupabaseClient, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), PublishError> {
        let resp = self
            .client
            .post(&format!("storage/v1/object/{}/{key}", self.bucket))
            .header("content-type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;

        // Storage answers a duplicate key with 409, or 400 carrying a 409 body.
        let status = resp.status();
        if status == StatusCode::CONFLICT {
            return Err(PublishError::AlreadyExists(key.to_string()));
        }
        match check_status(SERVICE, resp).await {
            Ok(_) => Ok(()),
            Err(UpstreamError::Status { body, .. })
                if status == StatusCode::BAD_REQUEST && body.contains("Duplicate") =>
            {
                Err(PublishError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        self.client
            .url(&format!("storage/v1/object/public/{}/{key}", self.bucket))
    }
}
