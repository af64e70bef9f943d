use std::fmt;
use std::io::Write;
use std::path::Path;

use serde_json::{Map, Value};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::parse::{PageRecord, FIELDS};
use crate::Result;

const PREVIEW_ROWS: usize = 20;
const PREVIEW_WIDTH: usize = 20;

/// One row per scraped item, one column per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<&'static str>,
    rows: Vec<Vec<Option<String>>>,
}

impl Default for Table {
    fn default() -> Self {
        Self::from_records(&[])
    }
}

impl Table {
    pub fn from_records(records: &[PageRecord]) -> Self {
        let rows = records
            .iter()
            .map(|record| {
                FIELDS
                    .iter()
                    .map(|&field| record.get(field).map(str::to_string))
                    .collect()
            })
            .collect();
        Self {
            columns: FIELDS.to_vec(),
            rows,
        }
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every value of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.columns.iter().position(|&c| c == name)?;
        Some(self.rows.iter().map(|row| row[idx].as_deref()).collect())
    }

    /// Header record plus one record per row. Absent values are empty cells.
    pub fn to_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// An array of objects, absent values as `null`.
    pub fn to_json<W: Write>(&self, out: W) -> Result<()> {
        let objects: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(&column, cell)| {
                        let value = cell.clone().map(Value::String).unwrap_or(Value::Null);
                        (column.to_string(), value)
                    })
                    .collect();
                Value::Object(object)
            })
            .collect();
        serde_json::to_writer_pretty(out, &objects)?;
        Ok(())
    }

    /// Writes CSV for a `.csv` path and JSON for anything else.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => self.to_csv(&mut bytes)?,
            _ => self.to_json(&mut bytes)?,
        }
        let mut file = File::create(path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self
            .columns
            .iter()
            .map(|c| format!("{:<PREVIEW_WIDTH$}", c))
            .collect::<Vec<_>>()
            .join(" | ");
        writeln!(f, "{header}")?;

        for row in self.rows.iter().take(PREVIEW_ROWS) {
            let line = row
                .iter()
                .map(|cell| format!("{:<PREVIEW_WIDTH$}", truncate(cell.as_deref().unwrap_or("-"))))
                .collect::<Vec<_>>()
                .join(" | ");
            writeln!(f, "{line}")?;
        }
        if self.rows.len() > PREVIEW_ROWS {
            writeln!(f, "... {} more rows", self.rows.len() - PREVIEW_ROWS)?;
        }
        write!(f, "[{} rows x {} columns]", self.rows.len(), self.columns.len())
    }
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= PREVIEW_WIDTH {
        value.to_string()
    } else {
        let mut short: String = value.chars().take(PREVIEW_WIDTH - 1).collect();
        short.push('…');
        short
    }
}
