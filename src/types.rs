use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Default number of records returned by an owner listing
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Upper bound on records returned by an owner listing
pub const MAX_LIST_LIMIT: i64 = 500;

/* ===================== Enumerations ===================== */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Terminal states are absorbing: nothing moves out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Submitted => "submitted",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(ExecutionStatus::Submitted),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            _ => Err(UnknownVariant {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EcosystemType {
    Terrestrial,
    Freshwater,
}

impl EcosystemType {
    pub fn as_str(self) -> &'static str {
        match self {
            EcosystemType::Terrestrial => "terrestrial",
            EcosystemType::Freshwater => "freshwater",
        }
    }

    /// Name of the engine-side workflow template that analyses this ecosystem
    pub fn workflow_template(self) -> &'static str {
        match self {
            EcosystemType::Terrestrial => "terrestrial-sdm",
            EcosystemType::Freshwater => "freshwater-sdm",
        }
    }
}

impl FromStr for EcosystemType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terrestrial" => Ok(EcosystemType::Terrestrial),
            "freshwater" => Ok(EcosystemType::Freshwater),
            _ => Err(UnknownVariant {
                kind: "ecosystem type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GeometryType {
    Rectangle,
    Polygon,
}

impl GeometryType {
    pub fn as_str(self) -> &'static str {
        match self {
            GeometryType::Rectangle => "rectangle",
            GeometryType::Polygon => "polygon",
        }
    }
}

impl FromStr for GeometryType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rectangle" => Ok(GeometryType::Rectangle),
            "polygon" => Ok(GeometryType::Polygon),
            _ => Err(UnknownVariant {
                kind: "geometry type",
                value: s.to_string(),
            }),
        }
    }
}

/// A string that did not name any variant of the expected enumeration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/* ===================== Submission Input ===================== */

/// Inclusive date range the analysis covers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Area of interest as supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum GeometryInput {
    /// `[[lon, lat], ...]`, ring closure optional
    Coordinates(Vec<[f64; 2]>),
    /// `POLYGON((lon lat, ...))`
    Wkt(String),
}

/// A user's request to run an analysis, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "species_name")]
    pub species_tag: String,
    pub ecosystem_type: String,
    pub geometry_type: String,
    #[serde(alias = "geometry_wkt")]
    pub geometry: GeometryInput,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub parameters: Map<String, JsonValue>,
}

/* ===================== Execution Record ===================== */

/// Immutable snapshot of a validated submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Descriptor {
    pub name: String,
    pub description: Option<String>,
    pub species_tag: String,
    pub ecosystem_type: EcosystemType,
    pub geometry_type: GeometryType,
    pub geometry_wkt: String,
    pub time_window: Option<TimeWindow>,
    pub parameters: Map<String, JsonValue>,
}

impl Descriptor {
    /// Climate periods requested through the `time_period` parameter, `;`-joined
    pub fn climate_periods(&self) -> Option<String> {
        self.parameters.get("time_period").and_then(join_parameter)
    }

    /// Directive types requested through the `directive_types` parameter, `;`-joined
    pub fn directive_types(&self) -> Option<String> {
        self.parameters.get("directive_types").and_then(join_parameter)
    }
}

/// Flatten a string or list parameter into a `;`-separated string
fn join_parameter(value: &JsonValue) -> Option<String> {
    let joined = match value {
        JsonValue::Null => return None,
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(";"),
        other => other.to_string(),
    };

    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub owner_id: String,
    pub descriptor: Descriptor,
    pub status: ExecutionStatus,

    pub results: Option<JsonValue>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Fresh record for an engine-acknowledged submission
    pub fn submitted(execution: NewExecution) -> Self {
        Self {
            execution_id: execution.execution_id,
            owner_id: execution.owner_id,
            descriptor: execution.descriptor,
            status: ExecutionStatus::Submitted,
            results: None,
            error_message: None,
            created_at: execution.created_at,
            updated_at: execution.created_at,
            completed_at: None,
        }
    }
}

/// Parameters for persisting a newly acknowledged submission
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub execution_id: String,
    pub owner_id: String,
    pub descriptor: Descriptor,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionListFilter {
    pub status: Option<ExecutionStatus>,
    pub limit: Option<i64>,
}

impl ExecutionListFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/* ===================== Callbacks ===================== */

/// Body of the engine's completion webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub workflow_id: String,
    pub status: String,
    #[serde(default)]
    pub results: Option<JsonValue>,
    #[serde(default)]
    pub error_message: Option<String>,
}
