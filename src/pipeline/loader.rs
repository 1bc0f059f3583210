use crate::domain::{AuditStatus, FactRow, FileAudit, ProductDim, TimeDim};
use crate::error::Result;
use crate::pipeline::batch::{SourceMetadata, ValidationResult};
use crate::pipeline::harmonize::HarmonizedRecord;
use crate::pipeline::quality::StoreDraft;
use crate::store::CdmStore;
use chrono::Utc;
use rusqlite::{params, Transaction};
use std::collections::BTreeMap;
use tracing::info;

/// Record counts carried into the audit trail.
#[derive(Debug, Clone, Copy)]
pub struct LoadCounts {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// Applies the dual-dimension load strategy: every observed store is
/// upserted into `dim_store`; qualification only controls visibility
/// through the `dim_store_crm` projection. One batch = one transaction.
pub struct CdmLoader;

impl CdmLoader {
    /// Loads an accepted batch atomically: store/product/time upserts,
    /// idempotent fact inserts, audit rows, fingerprint registration and the
    /// volume baseline for the next run. Rolls back wholesale on any error.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        store: &mut CdmStore,
        meta: &SourceMetadata,
        stores: &[StoreDraft],
        records: &[HarmonizedRecord],
        validations: &[ValidationResult],
        status: AuditStatus,
        counts: LoadCounts,
        data_provider: &str,
    ) -> Result<()> {
        let facts = aggregate_facts(records, data_provider);
        let audit = FileAudit {
            file_name: meta.file_name.clone(),
            fingerprint: meta.fingerprint.clone(),
            country: meta.country.clone(),
            file_type: meta.file_type.clone(),
            customer_id: meta.customer_id.clone(),
            status,
            records_total: counts.total,
            records_accepted: counts.accepted,
            records_rejected: counts.rejected,
        };

        let tx = store.conn_mut().transaction()?;
        let now = Utc::now().to_rfc3339();

        upsert_stores(&tx, stores, &now)?;
        upsert_products(&tx, records)?;
        upsert_time(&tx, records)?;
        insert_facts(&tx, &facts, &now)?;
        write_file_audit(&tx, &audit, &now)?;
        append_check_audits(&tx, &meta.fingerprint, validations, &now)?;

        tx.execute(
            "INSERT OR IGNORE INTO file_fingerprints (fingerprint, file_name, loaded_at)
             VALUES (?1, ?2, ?3)",
            params![meta.fingerprint, meta.file_name, now],
        )?;

        let total_volume: f64 = records.iter().map(|r| r.volume).sum();
        tx.execute(
            "INSERT INTO load_baseline (country, file_type, customer_id, total_volume)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(country, file_type, customer_id)
             DO UPDATE SET total_volume=excluded.total_volume",
            params![meta.country, meta.file_type, meta.customer_id, total_volume],
        )?;

        tx.commit()?;
        info!(
            file = %meta.file_name,
            stores = stores.len(),
            facts = facts.len(),
            status = status.as_str(),
            "batch committed"
        );
        Ok(())
    }

    /// Records a FAILED file-level audit (plus whatever check results exist)
    /// without touching dimensions or facts. Used after aborts and after a
    /// rolled-back load.
    pub fn record_failed(
        store: &mut CdmStore,
        file_name: &str,
        fingerprint: &str,
        meta: Option<&SourceMetadata>,
        validations: &[ValidationResult],
        counts: LoadCounts,
    ) -> Result<()> {
        let audit = FileAudit {
            file_name: file_name.to_string(),
            fingerprint: fingerprint.to_string(),
            country: meta.map(|m| m.country.clone()).unwrap_or_default(),
            file_type: meta.map(|m| m.file_type.clone()).unwrap_or_default(),
            customer_id: meta.map(|m| m.customer_id.clone()).unwrap_or_default(),
            status: AuditStatus::Failed,
            records_total: counts.total,
            records_accepted: counts.accepted,
            records_rejected: counts.rejected,
        };
        let tx = store.conn_mut().transaction()?;
        let now = Utc::now().to_rfc3339();
        write_file_audit(&tx, &audit, &now)?;
        append_check_audits(&tx, fingerprint, validations, &now)?;
        tx.commit()?;
        Ok(())
    }
}

/// One fact row per (store, product, week, provider). Rows sharing a key
/// within the batch are summed first; the deterministic fact_id plus
/// INSERT OR IGNORE makes a re-run of an unchanged batch a no-op.
fn aggregate_facts(records: &[HarmonizedRecord], data_provider: &str) -> Vec<FactRow> {
    let mut aggregated: BTreeMap<String, FactRow> = BTreeMap::new();
    for record in records {
        let fact_id = format!(
            "{}|{}|{}|{}",
            record.unique_store_id, record.retailer_sku, record.week_key, data_provider
        );
        aggregated
            .entry(fact_id.clone())
            .and_modify(|fact| {
                fact.volume += record.volume;
                fact.value += record.value;
                fact.volume_promo += record.volume_promo;
                fact.volume_non_promo += record.volume_non_promo;
                fact.value_promo += record.value_promo;
                fact.value_non_promo += record.value_non_promo;
            })
            .or_insert_with(|| FactRow {
                fact_id,
                unique_store_id: record.unique_store_id.clone(),
                retailer_sku: record.retailer_sku.clone(),
                reference_sku: record.reference_sku.clone(),
                week_key: record.week_key.clone(),
                data_provider: data_provider.to_string(),
                volume: record.volume,
                value: record.value,
                volume_promo: record.volume_promo,
                volume_non_promo: record.volume_non_promo,
                value_promo: record.value_promo,
                value_non_promo: record.value_non_promo,
                currency: record.currency.clone(),
            });
    }
    aggregated.into_values().collect()
}

fn upsert_stores(tx: &Transaction<'_>, stores: &[StoreDraft], now: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO dim_store (unique_store_id, store_id, country, customer_id, store_name,
                                street, house_number, zip_code, city, banner_name,
                                crm_qualified, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
         ON CONFLICT(unique_store_id) DO UPDATE SET
             store_name=excluded.store_name,
             street=excluded.street,
             house_number=excluded.house_number,
             zip_code=excluded.zip_code,
             city=excluded.city,
             banner_name=excluded.banner_name,
             crm_qualified=excluded.crm_qualified,
             updated_at=excluded.updated_at",
    )?;
    for store in stores {
        stmt.execute(params![
            store.unique_store_id,
            store.store_id,
            store.country,
            store.customer_id,
            store.store_name,
            store.street,
            store.house_number,
            store.zip_code,
            store.city,
            store.banner_name,
            store.crm_qualified as i64,
            now,
        ])?;
    }
    Ok(())
}

fn upsert_products(tx: &Transaction<'_>, records: &[HarmonizedRecord]) -> Result<()> {
    let mut products: BTreeMap<String, ProductDim> = BTreeMap::new();
    for record in records {
        products
            .entry(record.retailer_sku.clone())
            .or_insert_with(|| ProductDim {
                retailer_sku: record.retailer_sku.clone(),
                reference_sku: record.reference_sku.clone(),
                unmapped: record.sku_unmapped,
            });
    }
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO dim_product (retailer_sku, reference_sku, unmapped)
         VALUES (?1, ?2, ?3)",
    )?;
    for product in products.values() {
        stmt.execute(params![
            product.retailer_sku,
            product.reference_sku,
            product.unmapped as i64,
        ])?;
    }
    Ok(())
}

fn upsert_time(tx: &Transaction<'_>, records: &[HarmonizedRecord]) -> Result<()> {
    let mut weeks: BTreeMap<String, TimeDim> = BTreeMap::new();
    for record in records {
        weeks.entry(record.week_key.clone()).or_insert_with(|| TimeDim {
            week_key: record.week_key.clone(),
            iso_year: record.iso_year,
            iso_week: record.iso_week,
        });
    }
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO dim_time (week_key, iso_year, iso_week) VALUES (?1, ?2, ?3)",
    )?;
    for week in weeks.values() {
        stmt.execute(params![week.week_key, week.iso_year, week.iso_week])?;
    }
    Ok(())
}

fn insert_facts(tx: &Transaction<'_>, facts: &[FactRow], now: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO fact_offtake
             (fact_id, unique_store_id, retailer_sku, reference_sku, week_key, data_provider,
              volume, value, volume_promo, volume_non_promo, value_promo, value_non_promo,
              currency, loaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )?;
    for fact in facts {
        stmt.execute(params![
            fact.fact_id,
            fact.unique_store_id,
            fact.retailer_sku,
            fact.reference_sku,
            fact.week_key,
            fact.data_provider,
            fact.volume,
            fact.value,
            fact.volume_promo,
            fact.volume_non_promo,
            fact.value_promo,
            fact.value_non_promo,
            fact.currency,
            now,
        ])?;
    }
    Ok(())
}

fn write_file_audit(tx: &Transaction<'_>, audit: &FileAudit, now: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO audit_file (file_name, fingerprint, country, file_type, customer_id,
                                 status, records_total, records_accepted, records_rejected, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            audit.file_name,
            audit.fingerprint,
            audit.country,
            audit.file_type,
            audit.customer_id,
            audit.status.as_str(),
            audit.records_total as i64,
            audit.records_accepted as i64,
            audit.records_rejected as i64,
            now
        ],
    )?;
    Ok(())
}

fn append_check_audits(
    tx: &Transaction<'_>,
    fingerprint: &str,
    validations: &[ValidationResult],
    now: &str,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO audit_check (fingerprint, seq, check_name, passed, details, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (seq, validation) in validations.iter().enumerate() {
        stmt.execute(params![
            fingerprint,
            seq as i64,
            validation.check_name,
            validation.passed as i64,
            validation.details.to_string(),
            now,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(store_id: &str, sku: &str, week: &str, volume: f64) -> HarmonizedRecord {
        HarmonizedRecord {
            store_id: store_id.to_string(),
            unique_store_id: format!("AT_REWE1_{store_id}"),
            retailer_sku: sku.to_string(),
            reference_sku: format!("REF-{sku}"),
            week_key: week.to_string(),
            iso_year: 2025,
            iso_week: 3,
            volume,
            value: volume * 2.0,
            volume_non_promo: volume,
            value_non_promo: volume * 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn facts_sharing_a_key_are_summed() {
        let rows = vec![
            record("ST001", "4711", "2025-W03", 10.0),
            record("ST001", "4711", "2025-W03", 5.0),
            record("ST001", "4712", "2025-W03", 7.0),
        ];
        let facts = aggregate_facts(&rows, "COD");
        assert_eq!(facts.len(), 2);
        let merged = facts.iter().find(|f| f.retailer_sku == "4711").unwrap();
        assert_eq!(merged.volume, 15.0);
        assert_eq!(merged.value, 30.0);
        assert!((merged.volume_promo + merged.volume_non_promo - merged.volume).abs() < 1e-6);
    }

    #[test]
    fn fact_id_is_a_deterministic_composite() {
        let rows = vec![record("ST001", "4711", "2025-W03", 10.0)];
        let a = aggregate_facts(&rows, "COD");
        let b = aggregate_facts(&rows, "COD");
        assert_eq!(a[0].fact_id, "AT_REWE1_ST001|4711|2025-W03|COD");
        assert_eq!(a[0].fact_id, b[0].fact_id);
    }
}
