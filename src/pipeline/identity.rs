use crate::error::{EtlError, Result};
use crate::pipeline::batch::SourceMetadata;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// `AABBB_MMYYYYMMYYYY_GGGGG<suffix>.csv`: country(2), file type(3), period
/// start and end as month+year, customer code(5), free suffix ignored.
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]{2})([A-Z]{3})_(\d{2})(\d{4})(\d{2})(\d{4})_([A-Z0-9]{5})[^.]*\.csv$")
        .unwrap()
});

/// Parses the naming metadata out of a file name and fingerprints the raw
/// content for delta-load detection.
pub struct FileIdentity;

impl FileIdentity {
    /// Extracts `SourceMetadata` from a file name; the fingerprint field is
    /// filled in by the caller once the content has been read.
    pub fn parse(file_name: &str, content: &[u8]) -> Result<SourceMetadata> {
        let caps = NAME_PATTERN
            .captures(file_name)
            .ok_or_else(|| EtlError::InvalidNamingConvention(file_name.to_string()))?;

        let country = caps[1].to_string();
        let file_type = caps[2].to_string();
        let start_month: u32 = caps[3].parse().unwrap();
        let start_year: i32 = caps[4].parse().unwrap();
        let end_month: u32 = caps[5].parse().unwrap();
        let end_year: i32 = caps[6].parse().unwrap();
        let customer_id = caps[7].to_string();

        let period_start = first_of_month(start_year, start_month)
            .ok_or_else(|| EtlError::InvalidNamingConvention(file_name.to_string()))?;
        let period_end = last_of_month(end_year, end_month)
            .ok_or_else(|| EtlError::InvalidNamingConvention(file_name.to_string()))?;

        Ok(SourceMetadata {
            file_name: file_name.to_string(),
            country,
            file_type,
            period_start,
            period_end,
            customer_id,
            fingerprint: Self::fingerprint(content),
        })
    }

    /// Stable content fingerprint: sha256 over normalized bytes (UTF-8 BOM
    /// stripped, CRLF folded to LF) so cosmetic re-exports of the same data
    /// still dedupe.
    pub fn fingerprint(content: &[u8]) -> String {
        let content = content.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(content);
        let mut hasher = Sha256::new();
        let mut i = 0;
        let mut start = 0;
        while i < content.len() {
            if content[i] == b'\r' && content.get(i + 1) == Some(&b'\n') {
                hasher.update(&content[start..i]);
                start = i + 1;
                i += 2;
            } else {
                i += 1;
            }
        }
        hasher.update(&content[start..]);
        hex::encode(hasher.finalize())
    }
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn last_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.map(|d| d.pred_opt().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_name() {
        let meta = FileIdentity::parse("ATSOF_012025022025_REWE1_weekly.csv", b"x").unwrap();
        assert_eq!(meta.country, "AT");
        assert_eq!(meta.file_type, "SOF");
        assert_eq!(meta.customer_id, "REWE1");
        assert_eq!(meta.period_start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(meta.period_end, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn suffix_after_customer_code_is_ignored() {
        let a = FileIdentity::parse("DESOF_032025032025_EDEKA_v2_resend.csv", b"x").unwrap();
        let b = FileIdentity::parse("DESOF_032025032025_EDEKA.csv", b"x").unwrap();
        assert_eq!(a.country, b.country);
        assert_eq!(a.customer_id, b.customer_id);
        assert_eq!(a.period_start, b.period_start);
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "readme.csv",
            "ATSOF_012025_REWE1.csv",            // one period component only
            "atsof_012025022025_REWE1.csv",       // lowercase prefix
            "ATSOF_132025022025_REWE1.csv",       // month 13
            "ATSOF_012025022025_RE.csv",          // short customer code
            "ATSOF_012025022025_REWE1.txt",
        ] {
            assert!(
                FileIdentity::parse(name, b"x").is_err(),
                "expected rejection for {name}"
            );
        }
    }

    #[test]
    fn fingerprint_is_stable_across_line_endings_and_bom() {
        let unix = FileIdentity::fingerprint(b"a,b\n1,2\n");
        let dos = FileIdentity::fingerprint(b"a,b\r\n1,2\r\n");
        let bom = FileIdentity::fingerprint(b"\xEF\xBB\xBFa,b\n1,2\n");
        assert_eq!(unix, dos);
        assert_eq!(unix, bom);

        let other = FileIdentity::fingerprint(b"a,b\n1,3\n");
        assert_ne!(unix, other);
    }
}
