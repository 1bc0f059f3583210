use crate::config::PipelineConfig;
use crate::pipeline::batch::{Batch, RawRecord, ValidationResult};
use crate::pipeline::harmonize::{parse_locale_number, unique_store_id};
use crate::pipeline::RefState;
use serde_json::json;

/// One named pre-harmonization check over the raw batch. Checks are
/// independent; registration order fixes the audit-trail order.
pub trait ToplineCheck {
    fn name(&self) -> &'static str;
    fn run(&self, batch: &Batch, state: &RefState, config: &PipelineConfig) -> ValidationResult;
}

fn surviving(batch: &Batch) -> impl Iterator<Item = &RawRecord> {
    batch.records.iter().filter(|r| r.has_store_id())
}

/// Check 1: fraction of records carrying a store_id. Records without one are
/// dropped from all later stages, counted, reported.
struct StoreIdCompleteness;

impl ToplineCheck for StoreIdCompleteness {
    fn name(&self) -> &'static str {
        "store_id_completeness"
    }

    fn run(&self, batch: &Batch, _state: &RefState, _config: &PipelineConfig) -> ValidationResult {
        let total = batch.records.len();
        let with_id = surviving(batch).count();
        let missing = total - with_id;
        let fraction = if total == 0 {
            1.0
        } else {
            with_id as f64 / total as f64
        };
        ValidationResult::new(
            self.name(),
            missing == 0,
            json!({
                "total": total,
                "missing": missing,
                "fraction": fraction,
            }),
        )
    }
}

/// Check 2: store_ids not yet present in the store dimension, flagged for
/// creation downstream.
struct NewStores;

impl ToplineCheck for NewStores {
    fn name(&self) -> &'static str {
        "new_stores"
    }

    fn run(&self, batch: &Batch, state: &RefState, _config: &PipelineConfig) -> ValidationResult {
        let meta = &batch.metadata;
        let mut new_ids: Vec<String> = surviving(batch)
            .filter_map(|r| r.store_id.as_deref())
            .filter(|sid| {
                !state
                    .known_stores
                    .contains_key(&unique_store_id(&meta.country, &meta.customer_id, sid))
            })
            .map(|sid| sid.to_string())
            .collect();
        new_ids.sort();
        new_ids.dedup();
        ValidationResult::new(
            self.name(),
            true,
            json!({
                "count": new_ids.len(),
                "store_ids": new_ids,
            }),
        )
    }
}

/// Check 3: field-by-field attribute comparison for already-known stores.
/// Informational; the load proceeds and the merge happens in the loader.
struct AttributeChanges;

impl ToplineCheck for AttributeChanges {
    fn name(&self) -> &'static str {
        "attribute_changes"
    }

    fn run(&self, batch: &Batch, state: &RefState, _config: &PipelineConfig) -> ValidationResult {
        let meta = &batch.metadata;
        let mut changes = Vec::new();
        for record in surviving(batch) {
            let sid = record.store_id.as_deref().unwrap_or_default();
            let key = unique_store_id(&meta.country, &meta.customer_id, sid);
            let Some(known) = state.known_stores.get(&key) else {
                continue;
            };
            // Only supplied fields are compared; an omitted column is not an
            // attribute change.
            let fields: [(&str, Option<&str>, &str); 6] = [
                ("store_name", record.store_name.as_deref(), &known.store_name),
                ("street", record.street.as_deref(), &known.street),
                ("house_number", record.house_number.as_deref(), &known.house_number),
                ("zip_code", record.zip_code.as_deref(), &known.zip_code),
                ("city", record.city.as_deref(), &known.city),
                ("banner_name", record.banner_name.as_deref(), &known.banner_name),
            ];
            for (field, incoming, current) in fields {
                if let Some(incoming) = incoming {
                    if incoming != current {
                        changes.push(json!({
                            "store_id": sid,
                            "field": field,
                            "before": current,
                            "after": incoming,
                        }));
                    }
                }
            }
        }
        ValidationResult::new(
            self.name(),
            true,
            json!({
                "count": changes.len(),
                "changes": changes,
            }),
        )
    }
}

/// Check 4: volume and value must be present and numeric-coercible under the
/// locale rule. Advisory; rows that still fail at harmonization are rejected
/// there.
struct ExpectedMeasures;

impl ToplineCheck for ExpectedMeasures {
    fn name(&self) -> &'static str {
        "expected_measures"
    }

    fn run(&self, batch: &Batch, _state: &RefState, _config: &PipelineConfig) -> ValidationResult {
        let mut non_coercible = 0usize;
        let mut checked = 0usize;
        for record in surviving(batch) {
            checked += 1;
            let volume_ok = record.volume.as_deref().and_then(parse_locale_number).is_some();
            let value_ok = record.value.as_deref().and_then(parse_locale_number).is_some();
            if !volume_ok || !value_ok {
                non_coercible += 1;
            }
        }
        ValidationResult::new(
            self.name(),
            non_coercible == 0,
            json!({
                "checked": checked,
                "non_coercible": non_coercible,
            }),
        )
    }
}

/// Check 5: batch total volume vs. the most recent accepted load for the same
/// (country, file_type, customer) key, within a configurable band.
struct VolumeConsistency;

impl ToplineCheck for VolumeConsistency {
    fn name(&self) -> &'static str {
        "volume_consistency"
    }

    fn run(&self, batch: &Batch, state: &RefState, config: &PipelineConfig) -> ValidationResult {
        let total: f64 = surviving(batch)
            .filter_map(|r| r.volume.as_deref().and_then(parse_locale_number))
            .sum();

        match state.volume_baseline {
            None => ValidationResult::new(
                self.name(),
                true,
                json!({
                    "total_volume": total,
                    "baseline": null,
                }),
            ),
            Some(baseline) if baseline == 0.0 => ValidationResult::new(
                self.name(),
                total == 0.0,
                json!({
                    "total_volume": total,
                    "baseline": 0.0,
                }),
            ),
            Some(baseline) => {
                let delta_pct = (total - baseline) / baseline * 100.0;
                let passed = delta_pct.abs() <= config.volume_tolerance_pct;
                ValidationResult::new(
                    self.name(),
                    passed,
                    json!({
                        "total_volume": total,
                        "baseline": baseline,
                        "delta_pct": delta_pct,
                        "tolerance_pct": config.volume_tolerance_pct,
                    }),
                )
            }
        }
    }
}

/// Runs the registered top-line checks in order over the raw batch.
pub struct ToplineValidator {
    checks: Vec<Box<dyn ToplineCheck>>,
}

impl ToplineValidator {
    pub fn standard() -> Self {
        Self {
            checks: vec![
                Box::new(StoreIdCompleteness),
                Box::new(NewStores),
                Box::new(AttributeChanges),
                Box::new(ExpectedMeasures),
                Box::new(VolumeConsistency),
            ],
        }
    }

    pub fn run(
        &self,
        batch: &Batch,
        state: &RefState,
        config: &PipelineConfig,
    ) -> Vec<ValidationResult> {
        self.checks
            .iter()
            .map(|check| check.run(batch, state, config))
            .collect()
    }
}
