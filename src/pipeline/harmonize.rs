use crate::config::PipelineConfig;
use crate::pipeline::batch::{Batch, RawRecord, SourceMetadata, ValidationResult};
use crate::pipeline::RefState;
use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Canonical form of one validated record, produced by the harmonizer and
/// consumed by the quality gate and the loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarmonizedRecord {
    pub store_id: String,
    pub unique_store_id: String,
    pub country: String,
    pub customer_id: String,
    pub store_name: String,
    pub street: String,
    pub house_number: String,
    pub zip_code: String,
    pub city: String,
    pub banner_name: String,
    pub week_key: String,
    pub iso_year: i32,
    pub iso_week: u32,
    pub retailer_sku: String,
    pub reference_sku: String,
    pub sku_unmapped: bool,
    pub volume: f64,
    pub value: f64,
    pub volume_promo: f64,
    pub volume_non_promo: f64,
    pub value_promo: f64,
    pub value_non_promo: f64,
    pub currency: Option<String>,
}

/// A record dropped during harmonization, with the rule and reason.
#[derive(Debug, Clone, Serialize)]
pub struct RowRejection {
    pub row: usize,
    pub rule: String,
    pub reason: String,
}

/// One named harmonization step. Rules run in registration order over a
/// draft record; an error rejects the row without aborting the batch.
pub trait HarmonizeRule {
    fn name(&self) -> &'static str;
    fn apply(
        &self,
        draft: &mut HarmonizedRecord,
        raw: &RawRecord,
        meta: &SourceMetadata,
        state: &RefState,
        config: &PipelineConfig,
    ) -> anyhow::Result<()>;
}

/// Stable composite surrogate for a store. First assignment is permanent:
/// the loader never overwrites an existing dimension row's id.
pub fn unique_store_id(country: &str, customer_id: &str, store_id: &str) -> String {
    format!("{}_{}_{}", country, customer_id, store_id)
}

/// Resolves a locale-formatted numeric string. A separator followed by
/// exactly three digits and no further separator is a thousands-group
/// marker; otherwise the rightmost separator is the decimal point. Any
/// character outside digits, sign and separators (currency symbols included)
/// makes the value non-numeric.
pub fn parse_locale_number(input: &str) -> Option<f64> {
    let input = input.trim();
    let (sign, body) = match input.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, input.strip_prefix('+').unwrap_or(input)),
    };
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }
    if !body.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_sep = body.rfind(|c| c == '.' || c == ',');
    let normalized = match last_sep {
        None => body.to_string(),
        Some(pos) => {
            let tail = &body[pos + 1..];
            let head_digits: String =
                body[..pos].chars().filter(|c| c.is_ascii_digit()).collect();
            if tail.len() == 3 {
                // grouping marker: strip every separator
                format!("{}{}", head_digits, tail)
            } else {
                format!("{}.{}", head_digits, tail)
            }
        }
    };
    normalized.parse::<f64>().ok().map(|v| sign * v)
}

/// Maps a transaction date onto the canonical ISO week, collapsing week 53
/// into week 52 of the same ISO year when configured.
pub fn week_of(date: NaiveDate, config: &PipelineConfig) -> (i32, u32) {
    let iso = date.iso_week();
    let mut week = iso.week();
    if week == 53 && config.collapse_week_53 {
        week = 52;
    }
    (iso.year(), week)
}

struct TimeRule;

impl HarmonizeRule for TimeRule {
    fn name(&self) -> &'static str {
        "time"
    }

    fn apply(
        &self,
        draft: &mut HarmonizedRecord,
        raw: &RawRecord,
        meta: &SourceMetadata,
        _state: &RefState,
        config: &PipelineConfig,
    ) -> anyhow::Result<()> {
        // Store-level files often carry period-granular data only; a missing
        // or unparseable date falls back to the batch period end.
        let date = raw
            .transaction_date
            .as_deref()
            .and_then(parse_transaction_date)
            .unwrap_or(meta.period_end);
        let (iso_year, iso_week) = week_of(date, config);
        draft.iso_year = iso_year;
        draft.iso_week = iso_week;
        draft.week_key = format!("{}-W{:02}", iso_year, iso_week);
        Ok(())
    }
}

fn parse_transaction_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d.%m.%Y"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

struct LocationRule;

impl HarmonizeRule for LocationRule {
    fn name(&self) -> &'static str {
        "location"
    }

    fn apply(
        &self,
        draft: &mut HarmonizedRecord,
        raw: &RawRecord,
        meta: &SourceMetadata,
        _state: &RefState,
        _config: &PipelineConfig,
    ) -> anyhow::Result<()> {
        let store_id = raw
            .store_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .context("record has no store_id")?;
        draft.store_id = store_id.to_string();
        draft.country = meta.country.clone();
        draft.customer_id = meta.customer_id.clone();
        draft.unique_store_id = unique_store_id(&meta.country, &meta.customer_id, store_id);
        draft.store_name = raw.store_name.clone().unwrap_or_default();
        draft.street = raw.street.clone().unwrap_or_default();
        draft.house_number = raw.house_number.clone().unwrap_or_default();
        draft.zip_code = raw.zip_code.clone().unwrap_or_default();
        draft.city = raw.city.clone().unwrap_or_default();
        draft.banner_name = raw.banner_name.clone().unwrap_or_default();
        Ok(())
    }
}

/// Placeholder reference SKU for retailer SKUs without a curated mapping.
pub const UNMAPPED_PREFIX: &str = "UNMAPPED_";
const UNSPECIFIED_SKU: &str = "UNSPECIFIED";

struct ProductRule;

impl HarmonizeRule for ProductRule {
    fn name(&self) -> &'static str {
        "product"
    }

    fn apply(
        &self,
        draft: &mut HarmonizedRecord,
        raw: &RawRecord,
        _meta: &SourceMetadata,
        state: &RefState,
        _config: &PipelineConfig,
    ) -> anyhow::Result<()> {
        let retailer_sku = raw
            .retailer_sku
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNSPECIFIED_SKU);
        draft.retailer_sku = retailer_sku.to_string();
        match state.sku_map.get(retailer_sku) {
            Some(reference) => {
                draft.reference_sku = reference.clone();
                draft.sku_unmapped = false;
            }
            None => {
                draft.reference_sku = format!("{}{}", UNMAPPED_PREFIX, retailer_sku);
                draft.sku_unmapped = true;
            }
        }
        Ok(())
    }
}

struct MeasureRule;

impl HarmonizeRule for MeasureRule {
    fn name(&self) -> &'static str {
        "measures"
    }

    fn apply(
        &self,
        draft: &mut HarmonizedRecord,
        raw: &RawRecord,
        _meta: &SourceMetadata,
        _state: &RefState,
        _config: &PipelineConfig,
    ) -> anyhow::Result<()> {
        let volume = raw
            .volume
            .as_deref()
            .and_then(parse_locale_number)
            .context("volume is missing or not numeric")?;
        let value = raw
            .value
            .as_deref()
            .and_then(parse_locale_number)
            .context("value is missing or not numeric")?;

        // promo_flag is binary; anything else is unsupported input, never an
        // allocation guess.
        let promo = match raw.promo_flag.as_deref().map(str::trim) {
            None | Some("") | Some("0") => false,
            Some("1") => true,
            Some(other) => bail!("unsupported promo_flag '{}'", other),
        };

        draft.volume = volume;
        draft.value = value;
        if promo {
            draft.volume_promo = volume;
            draft.value_promo = value;
            draft.volume_non_promo = 0.0;
            draft.value_non_promo = 0.0;
        } else {
            draft.volume_promo = 0.0;
            draft.value_promo = 0.0;
            draft.volume_non_promo = volume;
            draft.value_non_promo = value;
        }
        draft.currency = raw.currency.clone();
        Ok(())
    }
}

/// Runs the ordered harmonization rules over a validated batch. Deterministic
/// and idempotent: the same input always yields the same canonical output.
pub struct Harmonizer {
    rules: Vec<Box<dyn HarmonizeRule>>,
}

impl Harmonizer {
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Box::new(TimeRule),
                Box::new(LocationRule),
                Box::new(ProductRule),
                Box::new(MeasureRule),
            ],
        }
    }

    /// Harmonizes every surviving record. Rows a rule cannot harmonize are
    /// rejected individually and reported in the returned ValidationResult.
    pub fn harmonize(
        &self,
        batch: &Batch,
        state: &RefState,
        config: &PipelineConfig,
    ) -> (Vec<HarmonizedRecord>, Vec<RowRejection>, ValidationResult) {
        let mut harmonized = Vec::with_capacity(batch.records.len());
        let mut rejections = Vec::new();

        'records: for (row, raw) in batch.records.iter().enumerate() {
            let mut draft = HarmonizedRecord::default();
            for rule in &self.rules {
                if let Err(e) = rule.apply(&mut draft, raw, &batch.metadata, state, config) {
                    rejections.push(RowRejection {
                        row,
                        rule: rule.name().to_string(),
                        reason: format!("{:#}", e),
                    });
                    continue 'records;
                }
            }
            harmonized.push(draft);
        }

        let unmapped: Vec<&str> = harmonized
            .iter()
            .filter(|r| r.sku_unmapped)
            .map(|r| r.retailer_sku.as_str())
            .collect();

        let result = ValidationResult::new(
            "harmonization",
            rejections.is_empty(),
            json!({
                "records_in": batch.records.len(),
                "records_out": harmonized.len(),
                "rejected": &rejections,
                "unmapped_skus": unmapped,
            }),
        );

        (harmonized, rejections, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::Batch;

    fn test_meta() -> SourceMetadata {
        SourceMetadata {
            file_name: "ATSOF_012025012025_REWE1.csv".to_string(),
            country: "AT".to_string(),
            file_type: "SOF".to_string(),
            period_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            customer_id: "REWE1".to_string(),
            fingerprint: "deadbeef".to_string(),
        }
    }

    fn record(store_id: &str, volume: &str, value: &str, promo: Option<&str>) -> RawRecord {
        RawRecord {
            store_id: Some(store_id.to_string()),
            volume: Some(volume.to_string()),
            value: Some(value.to_string()),
            promo_flag: promo.map(|p| p.to_string()),
            ..Default::default()
        }
    }

    fn run(records: Vec<RawRecord>) -> (Vec<HarmonizedRecord>, Vec<RowRejection>, ValidationResult) {
        let batch = Batch {
            metadata: test_meta(),
            records,
        };
        Harmonizer::standard().harmonize(&batch, &RefState::default(), &PipelineConfig::default())
    }

    #[test]
    fn locale_numbers_resolve_deterministically() {
        assert_eq!(parse_locale_number("1.250"), Some(1250.0));
        assert_eq!(parse_locale_number("1,250"), Some(1250.0));
        assert_eq!(parse_locale_number("1.25"), Some(1.25));
        assert_eq!(parse_locale_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_locale_number("1,234,567"), Some(1234567.0));
        assert_eq!(parse_locale_number("1,2500"), Some(1.25));
        assert_eq!(parse_locale_number("-12,5"), Some(-12.5));
        assert_eq!(parse_locale_number("42"), Some(42.0));
    }

    #[test]
    fn currency_symbols_are_not_numeric() {
        assert_eq!(parse_locale_number("€1.250"), None);
        assert_eq!(parse_locale_number("1.250 EUR"), None);
        assert_eq!(parse_locale_number("$9.99"), None);
        assert_eq!(parse_locale_number(""), None);
        assert_eq!(parse_locale_number(",."), None);
    }

    #[test]
    fn week_53_collapses_for_every_weekday() {
        let config = PipelineConfig::default();
        // ISO week 53 of 2020 runs 2020-12-28 through 2021-01-03
        for day in 28..=31 {
            let date = NaiveDate::from_ymd_opt(2020, 12, day).unwrap();
            assert_eq!(week_of(date, &config), (2020, 52), "2020-12-{day}");
        }
        for day in 1..=3 {
            let date = NaiveDate::from_ymd_opt(2021, 1, day).unwrap();
            assert_eq!(week_of(date, &config), (2020, 52), "2021-01-0{day}");
        }
    }

    #[test]
    fn week_53_survives_when_collapse_disabled() {
        let config = PipelineConfig {
            collapse_week_53: false,
            ..Default::default()
        };
        let date = NaiveDate::from_ymd_opt(2020, 12, 31).unwrap();
        assert_eq!(week_of(date, &config), (2020, 53));
    }

    #[test]
    fn promo_split_sums_to_total() {
        let (harmonized, rejections, _) = run(vec![
            record("ST001", "1250", "4.999,50", Some("1")),
            record("ST002", "900", "2000", Some("0")),
            record("ST003", "100", "300", None),
        ]);
        assert!(rejections.is_empty());
        for r in &harmonized {
            assert!((r.volume_promo + r.volume_non_promo - r.volume).abs() < 1e-6);
            assert!((r.value_promo + r.value_non_promo - r.value).abs() < 1e-6);
        }
        assert_eq!(harmonized[0].volume_promo, 1250.0);
        assert_eq!(harmonized[0].volume_non_promo, 0.0);
        assert_eq!(harmonized[1].volume_non_promo, 900.0);
        assert_eq!(harmonized[2].volume_non_promo, 100.0);
    }

    #[test]
    fn mixed_promo_flag_rejects_the_row() {
        let (harmonized, rejections, result) =
            run(vec![record("ST001", "10", "20", Some("0.5"))]);
        assert!(harmonized.is_empty());
        assert_eq!(rejections.len(), 1);
        assert!(rejections[0].reason.contains("unsupported promo_flag"));
        assert!(!result.passed);
    }

    #[test]
    fn unmapped_sku_gets_placeholder() {
        let mut raw = record("ST001", "10", "20", None);
        raw.retailer_sku = Some("4711".to_string());
        let (harmonized, _, _) = run(vec![raw]);
        assert_eq!(harmonized[0].reference_sku, "UNMAPPED_4711");
        assert!(harmonized[0].sku_unmapped);
    }

    #[test]
    fn mapped_sku_resolves_to_reference() {
        let mut raw = record("ST001", "10", "20", None);
        raw.retailer_sku = Some("4711".to_string());
        let batch = Batch {
            metadata: test_meta(),
            records: vec![raw],
        };
        let mut state = RefState::default();
        state
            .sku_map
            .insert("4711".to_string(), "REF-0001".to_string());
        let (harmonized, _, _) =
            Harmonizer::standard().harmonize(&batch, &state, &PipelineConfig::default());
        assert_eq!(harmonized[0].reference_sku, "REF-0001");
        assert!(!harmonized[0].sku_unmapped);
    }

    #[test]
    fn missing_date_falls_back_to_period_end() {
        let (harmonized, _, _) = run(vec![record("ST001", "10", "20", None)]);
        // period end 2025-01-31 is ISO 2025-W05
        assert_eq!(harmonized[0].week_key, "2025-W05");
    }

    #[test]
    fn unique_store_id_is_a_stable_composite() {
        let mut raw = record("ST001", "10", "20", None);
        raw.transaction_date = Some("2025-01-15".to_string());
        let (first, _, _) = run(vec![raw.clone()]);
        let (second, _, _) = run(vec![raw]);
        assert_eq!(first[0].unique_store_id, "AT_REWE1_ST001");
        assert_eq!(first[0].unique_store_id, second[0].unique_store_id);
        assert_eq!(first[0].week_key, second[0].week_key);
    }
}
