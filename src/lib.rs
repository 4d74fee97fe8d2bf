//! Offline-first order capture and encrypted upload pipeline.
//!
//! A point-of-sale device running this crate captures sales while offline,
//! queues them in a local SQLite store, and later uploads each order to a
//! remote commerce endpoint in a fixed hybrid-encryption wire format
//! (AES-256-CBC payload, RSA-OAEP/SHA-1 wrapped key). Uploads run one order
//! at a time, either singly or as a cancellable batch with shared progress
//! reporting; an order's `sync_status` flips to `synced` only after the
//! endpoint acknowledged it.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod logging;
pub mod orders;
pub mod progress;
pub mod transport;
pub mod upload;

pub use config::UploadTarget;
pub use crypto::{EncryptedEnvelope, EncryptionSession, OrderCipher};
pub use db::DbState;
pub use error::UploadError;
pub use orders::{LineItem, Order, OrderDraft, OrderStatus, SyncStatus};
pub use progress::{ProgressSink, SharedProgress, UploadProgress};
pub use transport::{EnvelopeTransport, HttpTransport};
pub use upload::{BatchResult, OrderUploader};

// Cancellation is cooperative: the batch polls this token between orders.
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
pub(crate) fn test_db() -> db::DbState {
    use rusqlite::Connection;

    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    db::run_migrations_for_test(&conn);
    db::DbState {
        conn: std::sync::Mutex::new(conn),
        db_path: std::path::PathBuf::from(":memory:"),
    }
}
