use crate::error::{EtlError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Input adapter: turns a retailer CSV file into the `(file_name, rows)`
/// shape the pipeline consumes. Delimiter and quoting concerns end here;
/// the pipeline only ever sees split field maps.
pub struct CsvAdapter;

impl CsvAdapter {
    pub fn read_file(path: &Path) -> Result<(String, Vec<u8>, Vec<HashMap<String, String>>)> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| EtlError::UnreadableContent(format!("bad path: {}", path.display())))?
            .to_string();
        let content = std::fs::read(path)?;
        let rows = Self::parse_rows(&content)?;
        Ok((file_name, content, rows))
    }

    /// Splits raw CSV bytes into header-keyed field maps. Ragged rows are
    /// tolerated; missing cells read as absent fields.
    pub fn parse_rows(content: &[u8]) -> Result<Vec<HashMap<String, String>>> {
        let text = std::str::from_utf8(content)
            .map_err(|_| EtlError::UnreadableContent("file is not valid UTF-8".to_string()))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if headers.is_empty() {
            return Err(EtlError::UnreadableContent("no header row".to_string()));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut fields = HashMap::new();
            for (i, header) in headers.iter().enumerate() {
                if let Some(value) = record.get(i) {
                    fields.insert(header.clone(), value.to_string());
                }
            }
            rows.push(fields);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_into_field_maps() {
        let content = b"Store_ID,Store_Name,Volume\nST001,REWE Center,1.250\nST002,BILLA,900\n";
        let rows = CsvAdapter::parse_rows(content).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Store_ID"], "ST001");
        assert_eq!(rows[1]["Volume"], "900");
    }

    #[test]
    fn ragged_rows_read_as_missing_cells() {
        let content = b"Store_ID,Store_Name,Volume\nST001\n";
        let rows = CsvAdapter::parse_rows(content).unwrap();
        assert_eq!(rows[0].get("Store_ID").map(String::as_str), Some("ST001"));
        assert!(rows[0].get("Volume").is_none());
    }

    #[test]
    fn non_utf8_content_is_unreadable() {
        let content = [0xff, 0xfe, 0x00, 0x41];
        assert!(matches!(
            CsvAdapter::parse_rows(&content),
            Err(EtlError::UnreadableContent(_))
        ));
    }
}
