use crate::backend::{BackendError, TableClient};
use crate::models::{RoomDraft, RoomStatus};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

/// Columns understood by the importer, matched case-insensitively
pub const IMPORT_COLUMNS: [&str; 10] = [
    "title",
    "description",
    "price",
    "area",
    "address",
    "city",
    "district",
    "ward",
    "status",
    "banner",
];

/// CSV template offered for download next to the import button
pub const IMPORT_TEMPLATE: &str = "title,description,price,area,address,city,district,ward,status,banner\n\
Phòng trọ gần ĐH Bách Khoa,Khép kín,2500000,20,1 Đại Cồ Việt,Hà Nội,Hai Bà Trưng,Bách Khoa,available,\n";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("File trống hoặc sai định dạng")]
    Empty,

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Outcome of one data line
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Ok { line: u64, title: String },
    Error { line: u64, error: String },
}

impl RowOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RowOutcome::Ok { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub rows: Vec<RowOutcome>,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Import xong: Tổng {}, thành công {}, lỗi {}",
            self.total, self.ok, self.errors
        )
    }
}

/// Parse CSV text into room drafts plus a per-line report.
pub fn parse_rooms(text: &str) -> Result<(Vec<RoomDraft>, Vec<RowOutcome>), ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.to_lowercase(), idx))
        .collect();
    if columns.is_empty() || columns.keys().all(|k| k.is_empty()) {
        return Err(ImportError::Empty);
    }

    let mut drafts = Vec::new();
    let mut outcomes = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let field = |name: &str| {
            columns
                .get(name)
                .and_then(|idx| record.get(*idx))
                .unwrap_or_default()
        };
        let optional = |name: &str| Some(field(name).to_string()).filter(|s| !s.is_empty());

        let title = field("title").to_string();
        let address = field("address").to_string();
        if title.is_empty() || address.is_empty() {
            outcomes.push(RowOutcome::Error {
                line,
                error: "missing title or address".into(),
            });
            continue;
        }

        let digits: String = field("price").chars().filter(char::is_ascii_digit).collect();
        let status = match RoomStatus::parse_lenient(field("status")) {
            Some(status) => status,
            None => {
                outcomes.push(RowOutcome::Error {
                    line,
                    error: format!("unknown status '{}'", field("status")),
                });
                continue;
            }
        };

        outcomes.push(RowOutcome::Ok {
            line,
            title: title.clone(),
        });
        drafts.push(RoomDraft {
            title,
            description: optional("description"),
            price: digits.parse().unwrap_or(0),
            area: field("area").parse().ok(),
            address,
            city: optional("city"),
            district: optional("district"),
            ward: optional("ward"),
            status,
            banner: optional("banner"),
        });
    }

    if outcomes.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok((drafts, outcomes))
}

/// Import rooms from CSV text; valid rows go in as a single batch insert.
pub async fn import_rooms(table: &dyn TableClient, text: &str) -> Result<ImportSummary, ImportError> {
    let (drafts, rows) = parse_rooms(text)?;

    if !drafts.is_empty() {
        let payload = drafts
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::from)?;
        table.insert("rooms", payload).await?;
    }

    let ok = rows.iter().filter(|r| r.is_ok()).count();
    let summary = ImportSummary {
        total: rows.len(),
        ok,
        errors: rows.len() - ok,
        rows,
    };
    if summary.errors > 0 {
        warn!("{} import rows rejected", summary.errors);
    }
    info!("{}", summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    #[test]
    fn template_parses_cleanly() {
        let (drafts, rows) = parse_rooms(IMPORT_TEMPLATE).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].price, 2_500_000);
        assert!(rows[0].is_ok());
    }

    #[tokio::test]
    async fn imports_valid_rows_and_reports_bad_lines() {
        let csv = "Title,Price,Address,District,Status\n\
                   \"Phòng 1, có gác\",\"2.500.000đ\",1 Xuân Thủy,Cầu Giấy,\n\
                   \n\
                   Thiếu địa chỉ,3000000,,,\n\
                   Phòng 3,,9 Láng Hạ,Đống Đa,rented\n";
        let backend = MemoryBackend::new();
        let summary = import_rooms(&backend, csv).await.unwrap();

        assert_eq!((summary.total, summary.ok, summary.errors), (3, 2, 1));
        assert_eq!(
            summary.rows[1],
            RowOutcome::Error {
                line: 4,
                error: "missing title or address".into()
            }
        );
        assert_eq!(summary.to_string(), "Import xong: Tổng 3, thành công 2, lỗi 1");

        let rooms = backend.rows("rooms");
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0]["title"], json!("Phòng 1, có gác"));
        assert_eq!(rooms[0]["price"], json!(2_500_000));
        assert_eq!(rooms[0]["status"], json!("available"));
        assert_eq!(rooms[1]["price"], json!(0));
        assert_eq!(rooms[1]["status"], json!("rented"));
    }

    #[tokio::test]
    async fn unknown_status_is_a_row_error() {
        let csv = "title,address,status\n\
                   Phòng A,1 Kim Mã,occupied\n\
                   Phòng B,2 Kim Mã,sold\n";
        let backend = MemoryBackend::new();
        let summary = import_rooms(&backend, csv).await.unwrap();

        assert_eq!((summary.total, summary.ok, summary.errors), (2, 1, 1));
        assert_eq!(
            summary.rows[1],
            RowOutcome::Error {
                line: 3,
                error: "unknown status 'sold'".into()
            }
        );
        let rooms = backend.rows("rooms");
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["status"], json!("rented"));
    }

    #[tokio::test]
    async fn header_only_file_is_rejected() {
        let backend = MemoryBackend::new();
        let err = import_rooms(&backend, "title,address\n").await.unwrap_err();
        assert!(matches!(err, ImportError::Empty));
        assert!(matches!(import_rooms(&backend, "").await, Err(ImportError::Empty)));
    }
}
