//! # Object-Store Adapter
//!
//! Typed access to the whitelist bucket. The adapter owns everything the
//! backend should not have to care about: bucket and key naming rules, the
//! payload size bound, overwrite protection via the backend's
//! `if-none-match` precondition, and the post-delete wait until the object
//! is observably absent.
//!
//! Naming rules follow the hosted provider's published grammar, including
//! its reserved prefixes and suffixes — names that merely *look* valid but
//! collide with provider features are rejected up front, where the error
//! message can still say something useful.

use std::sync::Arc;

use tokio::time::{sleep, Instant};

use crate::config::{DELETE_WAIT_POLL, DELETE_WAIT_TIMEOUT, MAX_OBJECT_KEY_LEN, MAX_WHITELIST_BYTES};

use super::{ObjectBackend, ObjectError};

/// Bucket names may not start with these.
const RESERVED_BUCKET_PREFIXES: [&str; 4] =
    ["xn--", "sthree-", "sthree-configurator", "amzn-s3-demo-"];

/// Bucket names may not end with these.
const RESERVED_BUCKET_SUFFIXES: [&str; 4] = ["-s3alias", "--ol-s3", ".mrap", "--x-s3"];

/// Validates a bucket name: 3..=63 chars of `[0-9a-z-]`, starting and
/// ending alphanumeric, and free of reserved affixes.
pub fn validate_bucket_name(name: &str) -> Result<(), ObjectError> {
    let invalid = |reason: &str| Err(ObjectError::InvalidBucket(format!("{name:?}: {reason}")));

    if name.len() < 3 || name.len() > 63 {
        return invalid("length must be 3-63");
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return invalid("must start and end with a lowercase letter or digit");
    }
    if !bytes.iter().all(|&b| alnum(b) || b == b'-') {
        return invalid("only lowercase letters, digits and '-' are allowed");
    }
    if RESERVED_BUCKET_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return invalid("uses a reserved prefix");
    }
    if RESERVED_BUCKET_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return invalid("uses a reserved suffix");
    }
    Ok(())
}

/// Validates an object key: 1..=1024 chars of `[0-9A-Za-z!\-_.'()]`.
pub fn validate_object_key(key: &str) -> Result<(), ObjectError> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(ObjectError::InvalidKey(format!(
            "{key:?}: length must be 1-{MAX_OBJECT_KEY_LEN}"
        )));
    }
    let allowed = |b: u8| {
        b.is_ascii_alphanumeric() || matches!(b, b'!' | b'-' | b'_' | b'.' | b'\'' | b'(' | b')')
    };
    if !key.bytes().all(allowed) {
        return Err(ObjectError::InvalidKey(format!(
            "{key:?}: contains a character outside [0-9A-Za-z!-_.'()]"
        )));
    }
    Ok(())
}

/// The whitelist-bucket adapter.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn ObjectBackend>,
    bucket: String,
}

impl ObjectStore {
    /// Binds the adapter to a backend and a validated bucket name.
    pub fn new(backend: Arc<dyn ObjectBackend>, bucket: impl Into<String>) -> Result<Self, ObjectError> {
        let bucket = bucket.into();
        validate_bucket_name(&bucket)?;
        Ok(Self { backend, bucket })
    }

    /// The bucket this adapter is bound to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Reads an object in full. Absence is [`ObjectError::NotFound`].
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectError> {
        validate_object_key(key)?;
        self.backend
            .get_object(&self.bucket, key)
            .await?
            .ok_or_else(|| ObjectError::NotFound(key.to_string()))
    }

    /// Writes an object. With `allow_overwrite` false, an existing object
    /// surfaces as [`ObjectError::Exists`] — enforced by the backend's
    /// `if-none-match` precondition, not by a racy read-then-write here.
    pub async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        allow_overwrite: bool,
    ) -> Result<(), ObjectError> {
        validate_object_key(key)?;
        if bytes.len() > MAX_WHITELIST_BYTES {
            return Err(ObjectError::TooLarge {
                size: bytes.len(),
                limit: MAX_WHITELIST_BYTES,
            });
        }
        self.backend
            .put_object(&self.bucket, key, bytes, content_type, !allow_overwrite)
            .await
    }

    /// Deletes an object, then polls until it is observably absent (the
    /// hosted provider acknowledges deletes before every replica agrees).
    /// Gives up after [`DELETE_WAIT_TIMEOUT`].
    pub async fn delete(&self, key: &str) -> Result<(), ObjectError> {
        validate_object_key(key)?;
        self.backend.delete_object(&self.bucket, key).await?;

        let deadline = Instant::now() + DELETE_WAIT_TIMEOUT;
        loop {
            if !self.backend.object_exists(&self.bucket, key).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ObjectError::DeleteTimeout(DELETE_WAIT_TIMEOUT));
            }
            sleep(DELETE_WAIT_POLL).await;
        }
    }
}
