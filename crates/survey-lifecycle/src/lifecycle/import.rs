use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

use super::domain::{SurveyId, SurveyRecord, SurveyState, WorkerId};

#[derive(Debug, thiserror::Error)]
pub enum RecordImportError {
    #[error("failed to read survey export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid survey CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid survey JSON data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("row {row}: unparseable {column} value '{value}'")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },
}

/// Loads survey assignments handed over by the upstream storage collaborator.
pub struct SurveyRecordImporter;

impl SurveyRecordImporter {
    /// Picks the format from the extension: `.csv` or anything else as JSON.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<SurveyRecord>, RecordImportError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

        if is_csv {
            Self::from_csv(file)
        } else {
            Self::from_json(file)
        }
    }

    /// JSON array of records, as served by the records endpoint.
    pub fn from_json<R: Read>(reader: R) -> Result<Vec<SurveyRecord>, RecordImportError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Survey export with one row per assignment. Blank timestamps are
    /// treated as absent; rows missing `Assigned At` are kept so the processor
    /// can report them as invalid.
    pub fn from_csv<R: Read>(reader: R) -> Result<Vec<SurveyRecord>, RecordImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut records = Vec::new();

        for (index, row) in csv_reader.deserialize::<SurveyRow>().enumerate() {
            let row = row?;
            records.push(row.into_record(index + 1)?);
        }

        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct SurveyRow {
    #[serde(rename = "Survey ID")]
    survey_id: String,
    #[serde(rename = "Worker ID")]
    worker_id: String,
    #[serde(
        rename = "Assigned At",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    assigned_at: Option<String>,
    #[serde(
        rename = "Started At",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    started_at: Option<String>,
    #[serde(
        rename = "Completed At",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    completed_at: Option<String>,
    #[serde(
        rename = "Risk Score",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    risk_score: Option<String>,
    #[serde(
        rename = "Requires Follow Up",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    requires_follow_up: Option<String>,
}

impl SurveyRow {
    fn into_record(self, row: usize) -> Result<SurveyRecord, RecordImportError> {
        let assigned_at = timestamp(row, "Assigned At", self.assigned_at)?;
        let started_at = timestamp(row, "Started At", self.started_at)?;
        let completed_at = timestamp(row, "Completed At", self.completed_at)?;
        let risk_score = self
            .risk_score
            .map(|raw| {
                raw.replace(',', ".")
                    .parse::<f32>()
                    .map_err(|_| RecordImportError::InvalidValue {
                        row,
                        column: "Risk Score",
                        value: raw,
                    })
            })
            .transpose()?;
        let requires_follow_up = match self.requires_follow_up.as_deref() {
            None => false,
            Some(raw) => parse_flag(raw).ok_or_else(|| RecordImportError::InvalidValue {
                row,
                column: "Requires Follow Up",
                value: raw.to_string(),
            })?,
        };

        Ok(SurveyRecord {
            id: SurveyId(self.survey_id),
            worker_id: WorkerId(self.worker_id),
            assigned_at,
            started_at,
            completed_at,
            risk_score,
            requires_follow_up,
            current_state: SurveyState::Pending,
            state_history: Vec::new(),
        })
    }
}

fn timestamp(
    row: usize,
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RecordImportError> {
    match raw {
        None => Ok(None),
        Some(value) => parse_datetime(&value)
            .map(Some)
            .ok_or(RecordImportError::InvalidValue { row, column, value }),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "si" | "sí" | "1" | "x" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    None
}
