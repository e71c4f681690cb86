/// CSV export and import of job applications
///
/// Export writes every column in [`COLUMNS`] order. Import matches headers
/// case-insensitively, ignores unknown columns and validates each row on its
/// own so one bad line doesn't reject the file.

use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use serde::Serialize;
use std::collections::HashMap;

use crate::models::application::{
    Application, CreateApplication, Priority, Stage, MAX_COMPANY_LEN, MAX_JOB_URL_LEN, MAX_LOCATION_LEN,
    MAX_NOTES_LEN, MAX_POSITION_LEN, MAX_SOURCE_LEN,
};

pub const COLUMNS: [&str; 12] = [
    "company",
    "position",
    "location",
    "job_url",
    "stage",
    "priority",
    "salary_min",
    "salary_max",
    "salary_currency",
    "source",
    "applied_at",
    "notes",
];

/// Columns every import must carry
const REQUIRED_COLUMNS: [&str; 2] = ["company", "position"];

/// Largest number of data rows accepted in one import
pub const MAX_IMPORT_ROWS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error("CSV file is empty")]
    Empty,

    #[error("Missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Too many rows: at most {0} are allowed")]
    TooManyRows(usize),

    #[error("Malformed CSV: {0}")]
    Parse(#[from] csv::Error),

    #[error("Failed to write CSV: {0}")]
    Write(String),
}

/// A row that failed validation
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RowError {
    /// 1-based, header excluded
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ImportResult {
    pub rows: Vec<CreateApplication>,
    pub errors: Vec<RowError>,
}

pub fn export(applications: &[Application]) -> Result<String, CsvError> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;

    for app in applications {
        writer.write_record([
            app.company.clone(),
            app.position.clone(),
            app.location.clone().unwrap_or_default(),
            app.job_url.clone().unwrap_or_default(),
            app.stage.as_str().to_string(),
            app.priority.as_str().to_string(),
            app.salary_min.map(|v| v.to_string()).unwrap_or_default(),
            app.salary_max.map(|v| v.to_string()).unwrap_or_default(),
            app.salary_currency.clone().unwrap_or_default(),
            app.source.clone().unwrap_or_default(),
            app.applied_at
                .map(|at| at.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            app.notes.clone().unwrap_or_default(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| CsvError::Write(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CsvError::Write(e.to_string()))
}

/// `YYYY-MM-DD` (midnight UTC) or RFC 3339
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Maps lowercased header names to column positions
fn header_index(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase(), i))
        .collect()
}

struct Row<'a> {
    record: &'a StringRecord,
    index: &'a HashMap<String, usize>,
}

impl Row<'_> {
    fn get(&self, column: &str) -> Option<&str> {
        self.index
            .get(column)
            .and_then(|&i| self.record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn text(&self, column: &str, max: usize) -> Result<Option<String>, String> {
        match self.get(column) {
            Some(v) if v.chars().count() > max => Err(format!("{} must be at most {} characters", column, max)),
            other => Ok(other.map(str::to_string)),
        }
    }

    fn amount(&self, column: &str) -> Result<Option<i64>, String> {
        self.get(column)
            .map(|v| match v.parse::<i64>() {
                Ok(n) if n >= 0 => Ok(n),
                _ => Err(format!("{} must be a non-negative whole number", column)),
            })
            .transpose()
    }
}

fn parse_row(row: &Row<'_>) -> Result<CreateApplication, String> {
    let company = row.text("company", MAX_COMPANY_LEN)?.ok_or("company is required")?;
    let position = row.text("position", MAX_POSITION_LEN)?.ok_or("position is required")?;

    let mut app = CreateApplication::new(company, position);

    app.location = row.text("location", MAX_LOCATION_LEN)?;
    app.source = row.text("source", MAX_SOURCE_LEN)?;
    app.notes = row.text("notes", MAX_NOTES_LEN)?;

    app.job_url = row.text("job_url", MAX_JOB_URL_LEN)?;
    if let Some(url) = &app.job_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err("job_url must be an http(s) URL".to_string());
        }
    }

    if let Some(stage) = row.get("stage") {
        app.stage = stage.parse::<Stage>().map_err(|e| e.to_string())?;
    }
    if let Some(priority) = row.get("priority") {
        app.priority = priority.parse::<Priority>().map_err(|e| e.to_string())?;
    }

    app.salary_min = row.amount("salary_min")?;
    app.salary_max = row.amount("salary_max")?;
    if let (Some(min), Some(max)) = (app.salary_min, app.salary_max) {
        if min > max {
            return Err("salary_min must not exceed salary_max".to_string());
        }
    }

    app.salary_currency = match row.get("salary_currency") {
        Some(c) if c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()) => Some(c.to_ascii_uppercase()),
        Some(_) => return Err("salary_currency must be a 3-letter code".to_string()),
        None => None,
    };

    if let Some(value) = row.get("applied_at") {
        app.applied_at = Some(
            parse_date(value).ok_or_else(|| format!("applied_at '{}' is not a valid date", value))?,
        );
    }

    Ok(app)
}

/// Parses an uploaded file into valid rows and per-row errors
pub fn parse_import(data: &[u8]) -> Result<ImportResult, CsvError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(CsvError::Empty);
    }

    let index = header_index(&headers);
    for column in REQUIRED_COLUMNS {
        if !index.contains_key(column) {
            return Err(CsvError::MissingColumn(column));
        }
    }

    let mut result = ImportResult::default();

    for (i, record) in reader.records().enumerate() {
        let row_number = i + 1;
        if row_number > MAX_IMPORT_ROWS {
            return Err(CsvError::TooManyRows(MAX_IMPORT_ROWS));
        }

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                result.errors.push(RowError {
                    row: row_number,
                    message: format!("unreadable row: {}", e),
                });
                continue;
            }
        };

        match parse_row(&Row { record: &record, index: &index }) {
            Ok(app) => result.rows.push(app),
            Err(message) => result.errors.push(RowError { row: row_number, message }),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn application(company: &str, notes: Option<&str>) -> Application {
        let now = Utc::now();
        Application {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            company: company.to_string(),
            position: "Engineer".to_string(),
            location: None,
            job_url: None,
            salary_min: Some(100_000),
            salary_max: None,
            salary_currency: Some("USD".to_string()),
            stage: Stage::Interview,
            priority: Priority::High,
            source: None,
            applied_at: Some(Utc.with_ymd_and_hms(2024, 2, 29, 18, 0, 0).unwrap()),
            notes: notes.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_export_header_and_row() {
        let csv = export(&[application("Acme", None)]).unwrap();
        let mut lines = csv.lines();

        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "Acme,Engineer,,,INTERVIEW,HIGH,100000,,USD,,2024-02-29,"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_export_quotes_special_characters() {
        let csv = export(&[application("Acme, Inc.", Some("said \"hi\"\nnext line"))]).unwrap();

        assert!(csv.contains("\"Acme, Inc.\""));
        assert!(csv.contains("\"said \"\"hi\"\"\nnext line\""));
    }

    #[test]
    fn test_export_empty() {
        let csv = export(&[]).unwrap();
        assert_eq!(csv.trim_end(), COLUMNS.join(","));
    }

    #[test]
    fn test_import_header_mapping() {
        let data = b"Position,COMPANY,Unknown,Stage\nEngineer,Acme,ignored,screening\nDesigner,Globex,,\n";
        let result = parse_import(data).unwrap();

        assert!(result.errors.is_empty());
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].company, "Acme");
        assert_eq!(result.rows[0].position, "Engineer");
        assert_eq!(result.rows[0].stage, Stage::Screening);
        assert_eq!(result.rows[1].stage, Stage::Applied);
        assert_eq!(result.rows[1].priority, Priority::Medium);
    }

    #[test]
    fn test_import_row_errors() {
        let data = "company,position,stage,salary_min,salary_max,applied_at\n\
                    Acme,Engineer,APPLIED,100,200,2024-01-15\n\
                    ,Engineer,,,,\n\
                    Globex,Dev,HIRED,,,\n\
                    Initech,Dev,,300,200,\n\
                    Umbrella,Dev,,,,15/01/2024\n\
                    Hooli,Dev,offer,,,2024-01-15T10:00:00+02:00\n";

        let result = parse_import(data.as_bytes()).unwrap();

        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[1].company, "Hooli");
        assert_eq!(
            result.rows[1].applied_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap())
        );

        let rows: Vec<usize> = result.errors.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![2, 3, 4, 5]);
        assert_eq!(result.errors[0].message, "company is required");
        assert!(result.errors[1].message.contains("invalid stage"));
        assert!(result.errors[2].message.contains("salary_min"));
        assert!(result.errors[3].message.contains("applied_at"));
    }

    const LIMITED: [(&str, usize); 6] = [
        ("company", MAX_COMPANY_LEN),
        ("position", MAX_POSITION_LEN),
        ("location", MAX_LOCATION_LEN),
        ("job_url", MAX_JOB_URL_LEN),
        ("source", MAX_SOURCE_LEN),
        ("notes", MAX_NOTES_LEN),
    ];

    /// A valid row with `column` replaced by a value of `len` characters
    fn row_with(column: &str, len: usize) -> String {
        let value = if column == "job_url" {
            format!("https://{}", "a".repeat(len - "https://".len()))
        } else {
            "a".repeat(len)
        };

        LIMITED
            .iter()
            .map(|&(name, _)| match name {
                _ if name == column => value.clone(),
                "company" => "Acme".to_string(),
                "position" => "Engineer".to_string(),
                _ => String::new(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn test_import_field_limits() {
        let header = LIMITED.map(|(name, _)| name).join(",");

        for (column, max) in LIMITED {
            let data = format!("{}\n{}\n{}\n", header, row_with(column, max), row_with(column, max + 1));

            let result = parse_import(data.as_bytes()).unwrap();

            assert_eq!(result.rows.len(), 1, "{}", column);
            assert_eq!(result.errors.len(), 1, "{}", column);
            assert_eq!(result.errors[0].row, 2);
            assert_eq!(
                result.errors[0].message,
                format!("{} must be at most {} characters", column, max)
            );
        }
    }

    #[test]
    fn test_import_long_job_url_is_row_error() {
        let url = format!("https://jobs.example.com/{}", "x".repeat(3000));
        let data = format!("company,position,job_url\nAcme,Engineer,{url}\nGlobex,Dev,\n");

        let result = parse_import(data.as_bytes()).unwrap();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].company, "Globex");
        assert_eq!(result.errors[0].row, 1);
        assert!(result.errors[0].message.starts_with("job_url"));
    }

    #[test]
    fn test_import_requires_columns() {
        let result = parse_import(b"company,location\nAcme,Remote\n");
        assert!(matches!(result, Err(CsvError::MissingColumn("position"))));

        assert!(matches!(parse_import(b""), Err(CsvError::Empty)));
    }

    #[test]
    fn test_import_row_limit() {
        let mut data = String::from("company,position\n");
        for i in 0..MAX_IMPORT_ROWS {
            data.push_str(&format!("Company {},Engineer\n", i));
        }
        assert_eq!(parse_import(data.as_bytes()).unwrap().rows.len(), MAX_IMPORT_ROWS);

        data.push_str("One more,Engineer\n");
        assert!(matches!(
            parse_import(data.as_bytes()),
            Err(CsvError::TooManyRows(MAX_IMPORT_ROWS))
        ));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert!(parse_date("2024-03-01T12:00:00Z").is_some());
        assert!(parse_date("March 1").is_none());
    }
}
