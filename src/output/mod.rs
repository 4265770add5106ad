//! Stage report formatting.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::core::Result;

/// Output format enum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Text,
    Json,
}

impl Format {
    pub fn format_value<W: Write>(&self, value: &Value, writer: &mut W) -> Result<()> {
        match self {
            Format::Json => format_json(value, writer),
            Format::Text => format_value_as_text(value, writer, 0),
        }
    }

    pub fn format<T: Serialize, W: Write>(&self, data: &T, writer: &mut W) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.format_value(&value, writer)
    }
}

/// Records written by one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub output_dir: String,
    pub artifacts: Vec<ArtifactCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactCount {
    pub artifact: String,
    pub records: usize,
}

impl StageReport {
    pub fn new(stage: &str, output_dir: &Path) -> Self {
        Self {
            stage: stage.to_string(),
            output_dir: output_dir.display().to_string(),
            artifacts: Vec::new(),
        }
    }

    pub fn record(&mut self, artifact: &str, records: usize) {
        self.artifacts.push(ArtifactCount {
            artifact: artifact.to_string(),
            records,
        });
    }

    /// Append the artifacts of a later stage.
    pub fn extend(&mut self, other: StageReport) {
        self.artifacts.extend(other.artifacts);
    }
}

fn format_json<W: Write>(value: &Value, writer: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

fn format_key(key: &str) -> String {
    key.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    format!("{}", f as i64)
                } else {
                    format!("{:.2}", f)
                }
            } else {
                n.to_string()
            }
        }
        Value::Bool(b) => if *b { "Yes" } else { "No" }.to_string(),
        Value::Null => "-".to_string(),
        _ => value.to_string(),
    }
}

fn is_row_list(arr: &[Value]) -> bool {
    !arr.is_empty()
        && arr.iter().all(|v| {
            if let Value::Object(map) = v {
                map.values()
                    .all(|v| !matches!(v, Value::Object(_) | Value::Array(_)))
            } else {
                false
            }
        })
}

fn format_rows<W: Write>(arr: &[Value], writer: &mut W, prefix: &str) -> Result<()> {
    let rows: Vec<Vec<String>> = arr
        .iter()
        .filter_map(Value::as_object)
        .map(|map| map.values().map(format_scalar).collect())
        .collect();
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| rows.iter().filter_map(|r| r.get(c)).map(String::len).max().unwrap_or(0))
        .collect();

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect();
        writeln!(writer, "{}{}", prefix, cells.join("  ").trim_end())?;
    }
    Ok(())
}

fn format_value_as_text<W: Write>(value: &Value, writer: &mut W, indent: usize) -> Result<()> {
    let prefix = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        writeln!(writer, "{}{}:", prefix, format_key(key))?;
                        format_value_as_text(val, writer, indent + 1)?;
                    }
                    _ => {
                        writeln!(
                            writer,
                            "{}{}: {}",
                            prefix,
                            format_key(key),
                            format_scalar(val)
                        )?;
                    }
                }
            }
        }
        Value::Array(arr) if is_row_list(arr) => format_rows(arr, writer, &prefix)?,
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                writeln!(writer, "{}[{}]", prefix, i)?;
                format_value_as_text(item, writer, indent + 1)?;
            }
        }
        _ => {
            writeln!(writer, "{}{}", prefix, format_scalar(value))?;
        }
    }
    Ok(())
}
