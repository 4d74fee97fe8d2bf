//! Upload endpoint configuration and device identity.
//!
//! The device uploads to one of two configured endpoints (production or an
//! alternate used for staging/fallback); which one a given upload targets is
//! the caller's choice. Both URLs and the provisioned device id live in the
//! `local_settings` table.

use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::UploadError;

const SETTING_CATEGORY: &str = "upload";
const KEY_PRODUCTION_URL: &str = "production_url";
const KEY_ALTERNATE_URL: &str = "alternate_url";

const DEVICE_CATEGORY: &str = "device";
const KEY_DEVICE_ID: &str = "device_id";

/// Which configured upload endpoint a call should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    Production,
    Alternate,
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise an upload endpoint URL:
/// - strip surrounding whitespace and trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_endpoint_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Endpoint configuration
// ---------------------------------------------------------------------------

/// Persist the production and alternate upload endpoints.
pub fn set_endpoints(db: &DbState, production: &str, alternate: &str) -> Result<(), UploadError> {
    let production = normalize_endpoint_url(production);
    let alternate = normalize_endpoint_url(alternate);
    if production.is_empty() {
        return Err(UploadError::Configuration(
            "production upload URL must not be empty".into(),
        ));
    }

    db::local_setting_set(db, SETTING_CATEGORY, KEY_PRODUCTION_URL, &production)?;
    db::local_setting_set(db, SETTING_CATEGORY, KEY_ALTERNATE_URL, &alternate)?;
    info!(production = %production, alternate = %alternate, "upload endpoints configured");
    Ok(())
}

/// Resolve the URL for the requested target.
///
/// An unset alternate endpoint falls back to production; an unset production
/// endpoint is a configuration error.
pub fn upload_url(db: &DbState, target: UploadTarget) -> Result<String, UploadError> {
    let production = db::local_setting_get(db, SETTING_CATEGORY, KEY_PRODUCTION_URL)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match target {
        UploadTarget::Production => production.ok_or_else(|| {
            UploadError::Configuration("production upload URL is not configured".into())
        }),
        UploadTarget::Alternate => db::local_setting_get(db, SETTING_CATEGORY, KEY_ALTERNATE_URL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or(production)
            .ok_or_else(|| {
                UploadError::Configuration("no upload URL is configured".into())
            }),
    }
}

// ---------------------------------------------------------------------------
// Device identity
// ---------------------------------------------------------------------------

/// Return the identifier of this device, provisioning one on first call.
///
/// The id is generated once (UUID v4) and persisted; every order uploaded
/// from this device carries it as the originating-device marker.
pub fn current_device_id(db: &DbState) -> Result<String, UploadError> {
    if let Some(id) = db::local_setting_get(db, DEVICE_CATEGORY, KEY_DEVICE_ID) {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    db::local_setting_set(db, DEVICE_CATEGORY, KEY_DEVICE_ID, &id)?;
    info!(device_id = %id, "provisioned new device identity");
    Ok(id)
}

// ===========================================================================
// Tests
// ===========================================================================
