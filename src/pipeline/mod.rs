pub mod batch;
pub mod harmonize;
pub mod identity;
pub mod loader;
pub mod quality;
pub mod topline;

use crate::config::Config;
use crate::domain::{AuditStatus, StoreDim};
use crate::error::{EtlError, Result};
use crate::store::CdmStore;
use batch::{Batch, RawRecord, ValidationResult};
use harmonize::Harmonizer;
use identity::FileIdentity;
use loader::{CdmLoader, LoadCounts};
use quality::QualityValidator;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use topline::ToplineValidator;
use tracing::{info, warn};

/// Shared reference state for one pipeline run, loaded from the store at run
/// start. Passed in explicitly so runs stay independently testable and
/// replayable.
#[derive(Debug, Default)]
pub struct RefState {
    /// Known store rows for the batch's (country, customer), keyed by
    /// unique_store_id.
    pub known_stores: HashMap<String, StoreDim>,
    /// Curated retailer SKU → reference SKU mapping.
    pub sku_map: HashMap<String, String>,
    /// Total volume of the last accepted load for the same
    /// (country, file_type, customer) key.
    pub volume_baseline: Option<f64>,
}

/// Structured result of one `process_batch` call. Expected rule failures are
/// reported here, never thrown past the pipeline boundary.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub file_name: String,
    pub status: AuditStatus,
    pub records_total: usize,
    pub records_accepted: usize,
    pub records_rejected: usize,
    pub validations: Vec<ValidationResult>,
}

/// Sequences identity → top-line validation → harmonization → quality gate →
/// load, short-circuiting on fatal failures and aggregating the audit trail.
pub struct Pipeline {
    config: Config,
    topline: ToplineValidator,
    harmonizer: Harmonizer,
    quality: QualityValidator,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            topline: ToplineValidator::standard(),
            harmonizer: Harmonizer::standard(),
            quality: QualityValidator::standard(),
        }
    }

    /// Processes one parsed batch end to end. The adapter owns delimiter and
    /// quoting concerns; this takes the file name, the raw bytes (for the
    /// fingerprint) and the already-split field maps.
    pub fn process_batch(
        &self,
        store: &mut CdmStore,
        file_name: &str,
        content: &[u8],
        rows: Vec<HashMap<String, String>>,
    ) -> Result<BatchOutcome> {
        // Stage 1: identity. A bad name aborts with a FAILED audit and no
        // dimension or fact writes.
        let meta = match FileIdentity::parse(file_name, content) {
            Ok(meta) => meta,
            Err(EtlError::InvalidNamingConvention(_)) => {
                warn!(file = %file_name, "invalid naming convention, batch aborted");
                let validation = ValidationResult::new(
                    "file_identity",
                    false,
                    json!({ "reason": "invalid naming convention" }),
                );
                let counts = LoadCounts {
                    total: rows.len(),
                    accepted: 0,
                    rejected: 0,
                };
                CdmLoader::record_failed(
                    store,
                    file_name,
                    &FileIdentity::fingerprint(content),
                    None,
                    std::slice::from_ref(&validation),
                    counts,
                )?;
                return Ok(BatchOutcome {
                    file_name: file_name.to_string(),
                    status: AuditStatus::Failed,
                    records_total: rows.len(),
                    records_accepted: 0,
                    records_rejected: 0,
                    validations: vec![validation],
                });
            }
            Err(e) => return Err(e),
        };

        // Stage 2: delta-load gate. An exact duplicate is a no-op skip with
        // zero writes of any kind.
        if store.fingerprint_seen(&meta.fingerprint)? {
            info!(file = %file_name, fingerprint = %meta.fingerprint, "duplicate delta load, skipping");
            return Ok(BatchOutcome {
                file_name: file_name.to_string(),
                status: AuditStatus::SkippedDuplicate,
                records_total: rows.len(),
                records_accepted: 0,
                records_rejected: 0,
                validations: vec![ValidationResult::new(
                    "delta_load",
                    true,
                    json!({ "duplicate_of": meta.fingerprint }),
                )],
            });
        }

        let state = store.reference_state(&meta)?;
        let records: Vec<RawRecord> = rows.iter().map(RawRecord::from_fields).collect();
        let records_total = records.len();
        let batch = Batch {
            metadata: meta.clone(),
            records,
        };

        // Stage 3: top-line validation over the raw batch.
        let mut validations = self.topline.run(&batch, &state, &self.config.pipeline);

        if self.config.pipeline.volume_check_fatal {
            if let Some(vc) = validations
                .iter()
                .find(|v| v.check_name == "volume_consistency")
            {
                if !vc.passed {
                    warn!(file = %file_name, "volume consistency breach is configured fatal, batch aborted");
                    let counts = LoadCounts {
                        total: records_total,
                        accepted: 0,
                        rejected: 0,
                    };
                    CdmLoader::record_failed(
                        store,
                        file_name,
                        &meta.fingerprint,
                        Some(&meta),
                        &validations,
                        counts,
                    )?;
                    return Ok(BatchOutcome {
                        file_name: file_name.to_string(),
                        status: AuditStatus::Failed,
                        records_total,
                        records_accepted: 0,
                        records_rejected: 0,
                        validations,
                    });
                }
            }
        }

        // Records without a store_id drop out here: counted, reported, not
        // fatal to the batch.
        let survivors: Vec<RawRecord> = batch
            .records
            .iter()
            .filter(|r| r.has_store_id())
            .cloned()
            .collect();
        let missing_store_id = records_total - survivors.len();
        let surviving_batch = Batch {
            metadata: meta.clone(),
            records: survivors,
        };

        // Stage 4: harmonization.
        let (harmonized, row_rejections, harmonize_result) =
            self.harmonizer
                .harmonize(&surviving_batch, &state, &self.config.pipeline);
        validations.push(harmonize_result);

        // Stage 5: quality gate (advisory, routes dimension visibility).
        let (store_drafts, quality_results) = self.quality.run(&harmonized);
        validations.extend(quality_results);

        let records_rejected = missing_store_id + row_rejections.len();
        let records_accepted = harmonized.len();
        let status = if records_rejected > 0 {
            AuditStatus::Partial
        } else {
            AuditStatus::Success
        };
        let counts = LoadCounts {
            total: records_total,
            accepted: records_accepted,
            rejected: records_rejected,
        };

        // Stage 6: transactional load. Any failure rolls the whole batch
        // back and leaves only a FAILED audit record.
        if let Err(e) = CdmLoader::load(
            store,
            &meta,
            &store_drafts,
            &harmonized,
            &validations,
            status,
            counts,
            &self.config.pipeline.data_provider,
        ) {
            warn!(file = %file_name, error = %e, "load failed, batch rolled back");
            CdmLoader::record_failed(
                store,
                file_name,
                &meta.fingerprint,
                Some(&meta),
                &validations,
                counts,
            )?;
            return Err(e);
        }

        Ok(BatchOutcome {
            file_name: file_name.to_string(),
            status,
            records_total,
            records_accepted,
            records_rejected,
            validations,
        })
    }

    /// Records the FAILED audit for a file whose name parsed but whose
    /// content could not be read as a record batch.
    pub fn fail_unreadable(
        &self,
        store: &mut CdmStore,
        file_name: &str,
        content: &[u8],
        reason: &str,
    ) -> Result<BatchOutcome> {
        let meta = FileIdentity::parse(file_name, content).ok();
        let validation = ValidationResult::new(
            "file_content",
            false,
            json!({ "reason": reason }),
        );
        let counts = LoadCounts {
            total: 0,
            accepted: 0,
            rejected: 0,
        };
        CdmLoader::record_failed(
            store,
            file_name,
            &FileIdentity::fingerprint(content),
            meta.as_ref(),
            std::slice::from_ref(&validation),
            counts,
        )?;
        Ok(BatchOutcome {
            file_name: file_name.to_string(),
            status: AuditStatus::Failed,
            records_total: 0,
            records_accepted: 0,
            records_rejected: 0,
            validations: vec![validation],
        })
    }
}
