use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata parsed from the file name plus the content fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub file_name: String,
    pub country: String,
    pub file_type: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub customer_id: String,
    pub fingerprint: String,
}

/// One retailer line, as handed over by the input adapter. Everything is
/// optional; records without a store_id do not survive top-line validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub store_id: Option<String>,
    pub store_name: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub banner_name: Option<String>,
    pub retailer_sku: Option<String>,
    pub transaction_date: Option<String>,
    pub volume: Option<String>,
    pub value: Option<String>,
    pub promo_flag: Option<String>,
    pub currency: Option<String>,
}

impl RawRecord {
    /// Builds a record from an adapter field map, probing the header aliases
    /// seen across retailer files.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let get = |names: &[&str]| -> Option<String> {
            for name in names {
                if let Some(v) = fields.get(*name) {
                    let v = v.trim();
                    if !v.is_empty() {
                        return Some(v.to_string());
                    }
                }
            }
            None
        };

        Self {
            store_id: get(&["Store_ID", "store_id", "StoreId"]),
            store_name: get(&["Store_Name", "store_name", "Name"]),
            street: get(&["Street", "street"]),
            house_number: get(&["House_Number", "house_number", "House_No"]),
            zip_code: get(&["Post_Code", "Zip_Code", "zip_code", "PostalCode"]),
            city: get(&["City", "city"]),
            banner_name: get(&["Banner", "banner_name", "Banner_Name"]),
            retailer_sku: get(&["SKU", "retailer_sku", "Retailer_SKU", "Article_ID"]),
            transaction_date: get(&["Transaction_Date", "transaction_date", "Date"]),
            volume: get(&["Volume", "volume"]),
            value: get(&["Value", "value"]),
            promo_flag: get(&["Promo_Flag", "promo_flag", "Promo"]),
            currency: get(&["Currency", "currency"]),
        }
    }

    pub fn has_store_id(&self) -> bool {
        self.store_id.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
    }
}

/// A parsed input file: naming metadata plus the ordered raw records.
/// Immutable once built; stages derive their own views from it.
#[derive(Debug, Clone)]
pub struct Batch {
    pub metadata: SourceMetadata,
    pub records: Vec<RawRecord>,
}

/// Outcome of a single named check. The ordered sequence accumulated across
/// stages is the audit trail of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub check_name: String,
    pub passed: bool,
    pub details: serde_json::Value,
}

impl ValidationResult {
    pub fn new(check_name: &str, passed: bool, details: serde_json::Value) -> Self {
        Self {
            check_name: check_name.to_string(),
            passed,
            details,
        }
    }
}
