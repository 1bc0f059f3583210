use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the COD store dimension. Every observed store lands here;
/// `crm_qualified` gates visibility through the cross-functional view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDim {
    pub unique_store_id: String,
    pub store_id: String,
    pub country: String,
    pub customer_id: String,
    pub store_name: String,
    pub street: String,
    pub house_number: String,
    pub zip_code: String,
    pub city: String,
    pub banner_name: String,
    pub crm_qualified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Retailer SKU mapped onto the canonical reference SKU. Unmapped SKUs carry
/// an `UNMAPPED_` placeholder and are flagged for curation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDim {
    pub retailer_sku: String,
    pub reference_sku: String,
    pub unmapped: bool,
}

/// Canonical week representation. Week 53 never reaches this table when the
/// collapse rule is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeDim {
    pub week_key: String,
    pub iso_year: i32,
    pub iso_week: u32,
}

/// One fact row per (store, product, week, provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRow {
    pub fact_id: String,
    pub unique_store_id: String,
    pub retailer_sku: String,
    pub reference_sku: String,
    pub week_key: String,
    pub data_provider: String,
    pub volume: f64,
    pub value: f64,
    pub volume_promo: f64,
    pub volume_non_promo: f64,
    pub value_promo: f64,
    pub value_non_promo: f64,
    pub currency: Option<String>,
}

/// File-level outcome recorded in the audit trail and returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Success,
    Partial,
    Failed,
    SkippedDuplicate,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Partial => "PARTIAL",
            AuditStatus::Failed => "FAILED",
            AuditStatus::SkippedDuplicate => "SKIPPED_DUPLICATE",
        }
    }
}

/// File-level audit record, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAudit {
    pub file_name: String,
    pub fingerprint: String,
    pub country: String,
    pub file_type: String,
    pub customer_id: String,
    pub status: AuditStatus,
    pub records_total: usize,
    pub records_accepted: usize,
    pub records_rejected: usize,
}
