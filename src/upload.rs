//! Single-order and batch upload controllers.
//!
//! The single path uploads one order end-to-end with a fresh encryption
//! session. The batch path walks every eligible order sequentially with one
//! shared session, counting per-order failures without aborting, publishing
//! progress after each completed attempt, and honoring cooperative
//! cancellation between orders.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config;
use crate::crypto::{EncryptionSession, OrderCipher};
use crate::db::DbState;
use crate::error::UploadError;
use crate::orders::{self, Order, OrderStatus};
use crate::progress::ProgressSink;
use crate::transport::EnvelopeTransport;

/// Outcome of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub success_count: usize,
    pub fail_count: usize,
    pub cancelled: bool,
}

/// Uploads captured orders to the commerce endpoint.
pub struct OrderUploader {
    cipher: OrderCipher,
    transport: Box<dyn EnvelopeTransport>,
}

impl OrderUploader {
    /// Uploader over the build-time-fixed recipient key.
    pub fn new(transport: Box<dyn EnvelopeTransport>) -> Result<Self, UploadError> {
        Ok(Self {
            cipher: OrderCipher::fixed()?,
            transport,
        })
    }

    /// Uploader over an explicit cipher. Used by tests and staging tools
    /// that target a different recipient key.
    pub fn with_cipher(cipher: OrderCipher, transport: Box<dyn EnvelopeTransport>) -> Self {
        Self { cipher, transport }
    }

    // -----------------------------------------------------------------------
    // Single order
    // -----------------------------------------------------------------------

    /// Upload exactly one order and reflect the outcome locally.
    ///
    /// On success the order becomes `synced` (idempotently); on failure its
    /// `sync_status` is untouched and the typed error propagates. Retry is a
    /// manual re-invocation by the caller; nothing retries here.
    pub async fn upload_order(
        &self,
        db: &DbState,
        order_id: i64,
        url: &str,
    ) -> Result<(), UploadError> {
        let order = orders::get_order(db, order_id)?
            .ok_or_else(|| UploadError::Ineligible(format!("order {order_id} not found")))?;
        if order.status == OrderStatus::Voided {
            return Err(UploadError::Ineligible(format!(
                "order {order_id} is voided"
            )));
        }

        let session = self.cipher.create_session()?;
        let device_id = config::current_device_id(db)?;

        match self
            .upload_with_session(db, &order, &session, url, &device_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(order_id, kind = e.kind(), error = %e, "order upload failed");
                Err(e)
            }
        }
    }

    /// Encrypt and deliver one order under an existing session, then mark it
    /// synced. `sync_status` flips if and only if the transport reported
    /// application-level success.
    async fn upload_with_session(
        &self,
        db: &DbState,
        order: &Order,
        session: &EncryptionSession,
        url: &str,
        device_id: &str,
    ) -> Result<(), UploadError> {
        let payload = build_upload_payload(order, device_id, Utc::now());
        let envelope = self.cipher.encrypt_with_session(&payload, session)?;

        self.transport.post(url, &envelope).await?;

        if orders::mark_synced(db, order.id)? {
            info!(order_id = order.id, "order uploaded and marked synced");
        } else {
            debug!(order_id = order.id, "order was already synced");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Batch
    // -----------------------------------------------------------------------

    /// Upload every eligible order (completed + pending, ascending local id)
    /// sequentially.
    ///
    /// One shared session covers the whole batch. A per-order failure is
    /// counted and the loop continues; only a store failure while listing
    /// eligible orders aborts before any attempt. The cancellation token is
    /// polled between orders only, so an in-flight order always completes.
    ///
    /// At most one batch may run at a time; callers gate on the shared
    /// progress record's `is_uploading()` before invoking.
    pub async fn upload_pending(
        &self,
        db: &DbState,
        url: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<BatchResult, UploadError> {
        let eligible = orders::list_eligible_for_upload(db)?;
        let total = eligible.len();

        // A dead crypto provider aborts before any progress is published.
        let session = self.cipher.create_session()?;
        let device_id = config::current_device_id(db)?;

        progress.start(total);
        info!(total, "order upload batch started");

        let mut success = 0usize;
        let mut fail = 0usize;
        let mut processed = 0usize;
        let mut cancelled = false;

        for order in &eligible {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            match self
                .upload_with_session(db, order, &session, url, &device_id)
                .await
            {
                Ok(()) => success += 1,
                Err(e) => {
                    fail += 1;
                    warn!(
                        order_id = order.id,
                        kind = e.kind(),
                        error = %e,
                        "batch order upload failed"
                    );
                }
            }

            processed += 1;
            progress.update(processed, success, fail);
        }

        if cancelled {
            progress.cancel();
        } else {
            progress.complete();
        }
        info!(
            success_count = success,
            fail_count = fail,
            cancelled,
            "order upload batch finished"
        );

        Ok(BatchResult {
            success_count: success,
            fail_count: fail,
            cancelled,
        })
    }
}

// ---------------------------------------------------------------------------
// Payload assembly
// ---------------------------------------------------------------------------

/// Assemble the canonical plaintext payload for one order.
///
/// `uuid` is the uniqueness token the server deduplicates on (device id +
/// order id + request time); `nonce` is fresh per request.
fn build_upload_payload(order: &Order, device_id: &str, now: DateTime<Utc>) -> Value {
    let uniqueness = format!("{device_id}:{}:{}", order.id, now.timestamp_millis());
    let uuid = format!("{:x}", md5::compute(uniqueness.as_bytes()));
    let nonce = Uuid::new_v4().simple().to_string();

    serde_json::json!({
        "order_id": order.id,
        "uuid": uuid,
        "nonce": nonce,
        "request_time": now.timestamp(),
        "staff_id": order.staff_id,
        "timestamp": order.created_at,
        "products": order.items,
        "products_total": order.products_total,
        "misc": order.misc,
        "total_amount": order.total_amount,
        "discount": order.discount,
        "net_amount": order.net_amount,
        "net_received": order.net_received,
        "change_amount": order.change_amount,
        "payment_reference": order.payment_reference,
        "status": order.status.as_str(),
        "is_override": if order.is_override { 1 } else { 0 },
        "payment_method": order.payment_method,
        "uploadDevice": device_id,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptedEnvelope;
    use crate::orders::{LineItem, OrderDraft, SyncStatus};
    use crate::progress::SharedProgress;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy)]
    enum Outcome {
        Succeed,
        NetworkFail,
        ServerReject,
        AuthReject,
    }

    /// Transport stand-in driven by a per-call script. Missing script
    /// entries succeed.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Outcome>>,
        calls: Arc<AtomicUsize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedTransport {
        fn always_ok() -> Self {
            Self::with_script(vec![])
        }

        fn with_script(script: Vec<Outcome>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Arc::new(AtomicUsize::new(0)),
                cancel_after: None,
            }
        }

        fn cancelling_after(calls: usize, token: CancellationToken) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                calls: Arc::new(AtomicUsize::new(0)),
                cancel_after: Some((calls, token)),
            }
        }

        /// Counter handle that stays valid after the transport is boxed.
        fn call_counter(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl EnvelopeTransport for ScriptedTransport {
        async fn post(
            &self,
            _url: &str,
            envelope: &EncryptedEnvelope,
        ) -> Result<Value, UploadError> {
            assert!(!envelope.key.is_empty());
            assert!(!envelope.data.is_empty());
            assert_eq!(envelope.delay, 0);

            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, token)) = &self.cancel_after {
                if n == *after {
                    token.cancel();
                }
            }

            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Outcome::Succeed);
            match outcome {
                Outcome::Succeed => Ok(serde_json::json!({"msg": "ok"})),
                Outcome::NetworkFail => {
                    Err(UploadError::Network("connection refused".into()))
                }
                Outcome::ServerReject => {
                    Err(UploadError::Application("duplicate order".into()))
                }
                Outcome::AuthReject => {
                    Err(UploadError::Authorization("unknown device".into()))
                }
            }
        }
    }

    fn uploader(transport: ScriptedTransport) -> OrderUploader {
        OrderUploader::new(Box::new(transport)).unwrap()
    }

    fn seed_order(db: &DbState, staff: &str, total: f64) -> i64 {
        orders::create_order(
            db,
            &OrderDraft {
                staff_id: staff.to_string(),
                items: vec![LineItem {
                    sku: "SKU-1".into(),
                    name: "Americano".into(),
                    quantity: 1.0,
                    unit_price: total,
                }],
                products_total: total,
                total_amount: total,
                net_amount: total,
                net_received: total,
                payment_method: "cash".into(),
                ..OrderDraft::default()
            },
        )
        .unwrap()
    }

    const URL: &str = "https://commerce.example.com/orders";

    #[test]
    fn test_payload_shape() {
        let db = crate::test_db();
        let id = seed_order(&db, "staff-3", 9.0);
        let order = orders::get_order(&db, id).unwrap().unwrap();

        let now = Utc::now();
        let payload = build_upload_payload(&order, "dev-1", now);

        assert_eq!(payload["order_id"], id);
        assert_eq!(payload["request_time"], now.timestamp());
        assert_eq!(payload["staff_id"], "staff-3");
        assert_eq!(payload["uploadDevice"], "dev-1");
        assert_eq!(payload["is_override"], 0);
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["products"][0]["unitPrice"], 9.0);
        // MD5 uniqueness token: 32 lowercase hex chars
        let uuid = payload["uuid"].as_str().unwrap();
        assert_eq!(uuid.len(), 32);
        assert!(uuid.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(payload["nonce"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_upload_order_success_marks_synced_only() {
        let db = crate::test_db();
        let id = seed_order(&db, "staff-1", 10.0);
        let before = orders::get_order(&db, id).unwrap().unwrap();

        uploader(ScriptedTransport::always_ok())
            .upload_order(&db, id, URL)
            .await
            .unwrap();

        let after = orders::get_order(&db, id).unwrap().unwrap();
        assert_eq!(after.sync_status, SyncStatus::Synced);
        // No other field changed
        assert_eq!(
            Order {
                sync_status: before.sync_status,
                ..after.clone()
            },
            before
        );
    }

    #[tokio::test]
    async fn test_upload_order_failure_leaves_status_pending() {
        let db = crate::test_db();
        let id = seed_order(&db, "staff-1", 10.0);

        let err = uploader(ScriptedTransport::with_script(vec![Outcome::NetworkFail]))
            .upload_order(&db, id, URL)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");

        let order = orders::get_order(&db, id).unwrap().unwrap();
        assert_eq!(order.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_upload_order_rejects_voided() {
        let db = crate::test_db();
        let id = seed_order(&db, "staff-1", 10.0);
        orders::void_order(&db, id).unwrap();

        let transport = ScriptedTransport::always_ok();
        let err = uploader(transport)
            .upload_order(&db, id, URL)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ineligible");
    }

    #[tokio::test]
    async fn test_upload_order_unknown_id() {
        let db = crate::test_db();
        let err = uploader(ScriptedTransport::always_ok())
            .upload_order(&db, 404, URL)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ineligible");
    }

    #[tokio::test]
    async fn test_batch_all_succeed() {
        let db = crate::test_db();
        let ids: Vec<i64> = (0..3).map(|i| seed_order(&db, "s", i as f64 + 1.0)).collect();

        let progress = SharedProgress::new();
        let result = uploader(ScriptedTransport::always_ok())
            .upload_pending(&db, URL, &CancellationToken::new(), &progress)
            .await
            .unwrap();

        assert_eq!(
            result,
            BatchResult {
                success_count: 3,
                fail_count: 0,
                cancelled: false
            }
        );
        for id in ids {
            assert_eq!(
                orders::get_order(&db, id).unwrap().unwrap().sync_status,
                SyncStatus::Synced
            );
        }
        let snap = progress.snapshot();
        assert!(!snap.is_uploading);
        assert_eq!(snap.current, 3);
        assert_eq!(snap.success_count, 3);
    }

    #[tokio::test]
    async fn test_batch_counts_mixed_failures_without_aborting() {
        let db = crate::test_db();
        let a = seed_order(&db, "s", 1.0);
        let b = seed_order(&db, "s", 2.0);
        let c = seed_order(&db, "s", 3.0);

        // Middle order fails on a network error; the loop keeps going
        let result = uploader(ScriptedTransport::with_script(vec![
            Outcome::Succeed,
            Outcome::NetworkFail,
            Outcome::Succeed,
        ]))
        .upload_pending(
            &db,
            URL,
            &CancellationToken::new(),
            &SharedProgress::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            result,
            BatchResult {
                success_count: 2,
                fail_count: 1,
                cancelled: false
            }
        );
        assert_eq!(
            orders::get_order(&db, a).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
        assert_eq!(
            orders::get_order(&db, b).unwrap().unwrap().sync_status,
            SyncStatus::Pending
        );
        assert_eq!(
            orders::get_order(&db, c).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn test_batch_all_fail() {
        let db = crate::test_db();
        for i in 0..3 {
            seed_order(&db, "s", i as f64 + 1.0);
        }

        let result = uploader(ScriptedTransport::with_script(vec![
            Outcome::ServerReject,
            Outcome::AuthReject,
            Outcome::NetworkFail,
        ]))
        .upload_pending(
            &db,
            URL,
            &CancellationToken::new(),
            &SharedProgress::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            result,
            BatchResult {
                success_count: 0,
                fail_count: 3,
                cancelled: false
            }
        );
        assert_eq!(orders::pending_upload_count(&db).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_batch_cancellation_between_orders() {
        let db = crate::test_db();
        let ids: Vec<i64> = (0..5).map(|i| seed_order(&db, "s", i as f64 + 1.0)).collect();

        let token = CancellationToken::new();
        let transport = ScriptedTransport::cancelling_after(2, token.clone());
        let progress = SharedProgress::new();

        let result = uploader(transport)
            .upload_pending(&db, URL, &token, &progress)
            .await
            .unwrap();

        // Cancellation lands after the second in-flight order completes
        assert_eq!(
            result,
            BatchResult {
                success_count: 2,
                fail_count: 0,
                cancelled: true
            }
        );
        assert_eq!(
            orders::get_order(&db, ids[1]).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
        for id in &ids[2..] {
            assert_eq!(
                orders::get_order(&db, *id).unwrap().unwrap().sync_status,
                SyncStatus::Pending
            );
        }
        let snap = progress.snapshot();
        assert!(!snap.is_uploading);
        assert_eq!(snap.current, 2);
    }

    #[tokio::test]
    async fn test_batch_pre_cancelled_processes_nothing() {
        let db = crate::test_db();
        seed_order(&db, "s", 1.0);

        let token = CancellationToken::new();
        token.cancel();

        let transport = ScriptedTransport::always_ok();
        let calls = transport.call_counter();
        let result = uploader(transport)
            .upload_pending(&db, URL, &token, &SharedProgress::new())
            .await
            .unwrap();

        assert_eq!(
            result,
            BatchResult {
                success_count: 0,
                fail_count: 0,
                cancelled: true
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(orders::pending_upload_count(&db).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_skips_voided_and_synced_orders() {
        let db = crate::test_db();
        let voided = seed_order(&db, "s", 1.0);
        let synced = seed_order(&db, "s", 2.0);
        let pending = seed_order(&db, "s", 3.0);
        orders::void_order(&db, voided).unwrap();
        orders::mark_synced(&db, synced).unwrap();

        let result = uploader(ScriptedTransport::always_ok())
            .upload_pending(
                &db,
                URL,
                &CancellationToken::new(),
                &SharedProgress::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(
            orders::get_order(&db, pending).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
        // The voided order is untouched
        assert_eq!(
            orders::get_order(&db, voided).unwrap().unwrap().sync_status,
            SyncStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let db = crate::test_db();
        let progress = SharedProgress::new();
        let result = uploader(ScriptedTransport::always_ok())
            .upload_pending(&db, URL, &CancellationToken::new(), &progress)
            .await
            .unwrap();

        assert_eq!(
            result,
            BatchResult {
                success_count: 0,
                fail_count: 0,
                cancelled: false
            }
        );
        assert!(!progress.is_uploading());
        assert_eq!(progress.snapshot().total, 0);
    }
}
