//! Report job: export a query result as CSV and deliver it as an attachment.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::db::{Database, OrderedRow, SqlArg};
use crate::dispatch::{MessageDispatcher, MessageId, OutboundMessage};
use crate::Result;

/// Name used when the script supplies none.
pub const DEFAULT_REPORT_NAME: &str = "report";

/// Run `sql` and send the result to `target` as a CSV attachment.
///
/// Returns the delivered message id, or `0` when the result set is empty or
/// anything fails. The temporary export is removed before returning.
pub async fn run_report(
    dispatcher: &MessageDispatcher,
    db: &Database,
    target: &str,
    name: &str,
    caption: &str,
    sql: &str,
    args: &[SqlArg],
) -> MessageId {
    let rows = db.query(sql, args).await;
    if rows.is_empty() {
        info!(report = name, "Report is empty, nothing sent");
        return 0;
    }

    let export = match write_export(dispatcher.attachments_dir(), name, &rows) {
        Ok(export) => export,
        Err(e) => {
            error!(report = name, error = %e, "Failed to write report");
            return 0;
        }
    };

    let Some(file_name) = export.path().file_name().map(|n| n.to_string_lossy().into_owned())
    else {
        return 0;
    };

    let message = OutboundMessage::text(target, caption.trim()).with_attachment(file_name);
    let id = dispatcher.send(&message).await;
    info!(report = name, rows = rows.len(), message_id = id, "Report delivered");
    id
}

fn write_export(dir: &Path, name: &str, rows: &[OrderedRow]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{}_", sanitize_name(name)))
        .suffix(".csv")
        .tempfile_in(dir)?;
    file.write_all(to_csv(rows).as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Make a report name safe to use as a file name prefix.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        DEFAULT_REPORT_NAME.to_string()
    } else {
        cleaned
    }
}

/// Render rows as CSV with a header taken from the first row.
///
/// Columns missing from later rows render as empty fields.
pub fn to_csv(rows: &[OrderedRow]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let header: Vec<&str> = first.columns().collect();

    let mut out = String::new();
    push_record(&mut out, header.iter().map(|c| c.to_string()));
    for row in rows {
        push_record(
            &mut out,
            header
                .iter()
                .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default()),
        );
    }
    out
}

fn push_record(out: &mut String, fields: impl Iterator<Item = String>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote_field(&field));
    }
    out.push('\n');
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CellValue;

    fn row(cells: &[(&str, CellValue)]) -> OrderedRow {
        let mut row = OrderedRow::new();
        for (name, value) in cells {
            row.push(*name, value.clone());
        }
        row
    }

    #[test]
    fn test_csv_header_and_rows() {
        let rows = vec![
            row(&[
                ("id", CellValue::Integer(1)),
                ("name", CellValue::Text("Ann".to_string())),
                ("active", CellValue::Bool(true)),
            ]),
            row(&[
                ("id", CellValue::Integer(2)),
                ("name", CellValue::Text("Bob".to_string())),
                ("active", CellValue::Bool(false)),
            ]),
        ];
        assert_eq!(to_csv(&rows), "id,name,active\n1,Ann,true\n2,Bob,false\n");
    }

    #[test]
    fn test_csv_quoting() {
        let rows = vec![row(&[(
            "note",
            CellValue::Text("say \"hi\", then\nleave".to_string()),
        )])];
        assert_eq!(to_csv(&rows), "note\n\"say \"\"hi\"\", then\nleave\"\n");
    }

    #[test]
    fn test_csv_missing_column_is_empty() {
        let rows = vec![
            row(&[("a", CellValue::Integer(1)), ("b", CellValue::Integer(2))]),
            row(&[("a", CellValue::Integer(3))]),
        ];
        assert_eq!(to_csv(&rows), "a,b\n1,2\n3,\n");
    }

    #[test]
    fn test_csv_empty() {
        assert_eq!(to_csv(&[]), "");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("sales"), "sales");
        assert_eq!(sanitize_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_name("a\\b:c"), "a_b_c");
        assert_eq!(sanitize_name("  "), DEFAULT_REPORT_NAME);
    }

    #[test]
    fn test_write_export_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![row(&[("x", CellValue::Integer(1))])];
        let export = write_export(dir.path(), "daily", &rows).unwrap();

        let path = export.path().to_path_buf();
        assert_eq!(path.parent().unwrap(), dir.path());
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("daily_"));
        assert!(file_name.ends_with(".csv"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x\n1\n");

        drop(export);
        assert!(!path.exists());
    }
}
