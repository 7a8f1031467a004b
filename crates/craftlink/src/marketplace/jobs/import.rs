//! CSV seeding for the job board.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::domain::JobDraft;
use crate::marketplace::ids::UserId;

#[derive(Debug)]
pub enum JobImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { row: usize, reason: String },
}

impl std::fmt::Display for JobImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobImportError::Io(err) => write!(f, "failed to read job seed file: {}", err),
            JobImportError::Csv(err) => write!(f, "invalid job seed CSV data: {}", err),
            JobImportError::InvalidRow { row, reason } => {
                write!(f, "job seed row {} is invalid: {}", row, reason)
            }
        }
    }
}

impl std::error::Error for JobImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JobImportError::Io(err) => Some(err),
            JobImportError::Csv(err) => Some(err),
            JobImportError::InvalidRow { .. } => None,
        }
    }
}

impl From<std::io::Error> for JobImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for JobImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// A job to post on behalf of the named client.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSeed {
    pub client_id: UserId,
    pub client_name: String,
    pub draft: JobDraft,
}

pub struct JobSeedImporter;

impl JobSeedImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<JobSeed>, JobImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<JobSeed>, JobImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut seeds = Vec::new();

        for (index, record) in csv_reader.deserialize::<JobSeedRow>().enumerate() {
            // Header is line 1, so the first data row is line 2.
            let row_number = index + 2;
            let row = record?;
            seeds.push(row.into_seed(row_number)?);
        }

        Ok(seeds)
    }
}

#[derive(Debug, Deserialize)]
struct JobSeedRow {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Category", default)]
    category: String,
    #[serde(rename = "Location")]
    location: String,
    #[serde(rename = "Budget", default, deserialize_with = "empty_string_as_none")]
    budget: Option<String>,
    #[serde(rename = "Client ID")]
    client_id: String,
    #[serde(rename = "Client Name", default)]
    client_name: String,
}

impl JobSeedRow {
    fn into_seed(self, row: usize) -> Result<JobSeed, JobImportError> {
        let invalid = |reason: &str| JobImportError::InvalidRow {
            row,
            reason: reason.to_string(),
        };

        if self.title.is_empty() {
            return Err(invalid("missing title"));
        }
        if self.client_id.is_empty() {
            return Err(invalid("missing client id"));
        }
        if self.location.is_empty() {
            return Err(invalid("missing location"));
        }

        let budget = match self.budget.as_deref() {
            Some(raw) => Some(parse_budget(raw).ok_or_else(|| invalid("budget is not a number"))?),
            None => None,
        };

        let client_name = if self.client_name.is_empty() {
            self.client_id.clone()
        } else {
            self.client_name
        };

        Ok(JobSeed {
            client_id: UserId(self.client_id),
            client_name,
            draft: JobDraft {
                title: self.title,
                description: self.description,
                category: self.category,
                location: self.location,
                budget,
            },
        })
    }
}

fn parse_budget(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    cleaned.parse::<f64>().ok()
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
