//! Order model and the local order store operations the upload pipeline
//! consumes.
//!
//! Orders are captured when a sale completes, queued locally with
//! `sync_status = 'pending'`, and flipped to `'synced'` only after the
//! upload endpoint acknowledged them. Voided orders keep their row but are
//! never upload-eligible. Nothing in this subsystem deletes an order.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config;
use crate::db::DbState;
use crate::error::UploadError;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Lifecycle state of a captured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Completed,
    Voided,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Completed => "completed",
            OrderStatus::Voided => "voided",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "voided" => OrderStatus::Voided,
            _ => OrderStatus::Completed,
        }
    }
}

/// Upload state of a captured order. Transitions only pending -> synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "synced" => SyncStatus::Synced,
            _ => SyncStatus::Pending,
        }
    }
}

/// One sold line on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    #[serde(default)]
    pub name: String,
    pub quantity: f64,
    #[serde(rename = "unitPrice")]
    pub unit_price: f64,
}

/// A locally captured sales transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: i64,
    pub staff_id: String,
    pub items: Vec<LineItem>,
    pub products_total: f64,
    pub misc: f64,
    pub discount: f64,
    pub total_amount: f64,
    pub net_amount: f64,
    pub net_received: f64,
    pub change_amount: f64,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub status: OrderStatus,
    pub sync_status: SyncStatus,
    pub is_override: bool,
    pub device_id: String,
    pub created_at: String,
}

/// Input for capturing a new order at the point of sale.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderDraft {
    pub staff_id: String,
    pub items: Vec<LineItem>,
    pub products_total: f64,
    pub misc: f64,
    pub discount: f64,
    pub total_amount: f64,
    pub net_amount: f64,
    pub net_received: f64,
    pub change_amount: f64,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub is_override: bool,
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

const ORDER_COLUMNS: &str = "id, staff_id, items, products_total, misc, discount, total_amount,
        net_amount, net_received, change_amount, payment_method, payment_reference,
        status, sync_status, is_override, device_id, created_at";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let items_str: String = row.get(2)?;
    let items: Vec<LineItem> = serde_json::from_str(&items_str).unwrap_or_default();
    let status_str: String = row.get(12)?;
    let sync_str: String = row.get(13)?;

    Ok(Order {
        id: row.get(0)?,
        staff_id: row.get(1)?,
        items,
        products_total: row.get(3)?,
        misc: row.get(4)?,
        discount: row.get(5)?,
        total_amount: row.get(6)?,
        net_amount: row.get(7)?,
        net_received: row.get(8)?,
        change_amount: row.get(9)?,
        payment_method: row.get(10)?,
        payment_reference: row.get(11)?,
        status: OrderStatus::parse(&status_str),
        sync_status: SyncStatus::parse(&sync_str),
        is_override: row.get::<_, i64>(14)? != 0,
        device_id: row.get(15)?,
        created_at: row.get(16)?,
    })
}

/// Capture a completed sale locally. Returns the assigned local order id.
pub fn create_order(db: &DbState, draft: &OrderDraft) -> Result<i64, UploadError> {
    let device_id = config::current_device_id(db)?;
    let now = Utc::now().to_rfc3339();
    let items =
        serde_json::to_string(&draft.items).unwrap_or_else(|_| "[]".to_string());

    let conn = db
        .conn
        .lock()
        .map_err(|e| UploadError::Configuration(format!("store lock poisoned: {e}")))?;

    conn.execute(
        "INSERT INTO orders (
            staff_id, items, products_total, misc, discount, total_amount,
            net_amount, net_received, change_amount, payment_method,
            payment_reference, status, sync_status, is_override, device_id,
            created_at, updated_at
         ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, 'completed', 'pending', ?12, ?13,
            ?14, ?14
         )",
        params![
            &draft.staff_id,
            &items,
            &draft.products_total,
            &draft.misc,
            &draft.discount,
            &draft.total_amount,
            &draft.net_amount,
            &draft.net_received,
            &draft.change_amount,
            &draft.payment_method,
            &draft.payment_reference,
            &(if draft.is_override { 1_i64 } else { 0_i64 }),
            &device_id,
            &now,
        ],
    )?;

    let order_id = conn.last_insert_rowid();
    info!(order_id, "Order captured and queued for upload");
    Ok(order_id)
}

/// Get a single order by local id.
pub fn get_order(db: &DbState, order_id: i64) -> Result<Option<Order>, UploadError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| UploadError::Configuration(format!("store lock poisoned: {e}")))?;
    let order = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
            params![order_id],
            order_from_row,
        )
        .optional()?;
    Ok(order)
}

/// List the orders a batch upload must process: completed and still pending,
/// oldest first (ascending local id).
pub fn list_eligible_for_upload(db: &DbState) -> Result<Vec<Order>, UploadError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| UploadError::Configuration(format!("store lock poisoned: {e}")))?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders
         WHERE status = 'completed' AND sync_status = 'pending'
         ORDER BY id ASC"
    ))?;

    let rows = stmt.query_map([], order_from_row)?;

    let mut orders = Vec::new();
    for row in rows {
        match row {
            Ok(order) => orders.push(order),
            Err(e) => warn!("skipping malformed order row: {e}"),
        }
    }
    Ok(orders)
}

/// Count orders still waiting for upload.
pub fn pending_upload_count(db: &DbState) -> Result<i64, UploadError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| UploadError::Configuration(format!("store lock poisoned: {e}")))?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE status = 'completed' AND sync_status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Mark an order as acknowledged by the upload endpoint.
///
/// Returns `true` when the order transitioned pending -> synced, `false`
/// when it was already synced (re-marking is a no-op). The guard in the
/// WHERE clause is what makes the transition one-way.
pub fn mark_synced(db: &DbState, order_id: i64) -> Result<bool, UploadError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| UploadError::Configuration(format!("store lock poisoned: {e}")))?;
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE orders
         SET sync_status = 'synced', last_synced_at = ?1, updated_at = ?1
         WHERE id = ?2 AND sync_status = 'pending'",
        params![now, order_id],
    )?;
    Ok(changed > 0)
}

/// Void an order. A voided order keeps its row and its `sync_status`, but
/// stops being upload-eligible immediately.
pub fn void_order(db: &DbState, order_id: i64) -> Result<(), UploadError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| UploadError::Configuration(format!("store lock poisoned: {e}")))?;
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE orders SET status = 'voided', updated_at = ?1 WHERE id = ?2",
        params![now, order_id],
    )?;
    if changed == 0 {
        return Err(UploadError::Ineligible(format!(
            "order {order_id} not found"
        )));
    }
    info!(order_id, "Order voided");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
