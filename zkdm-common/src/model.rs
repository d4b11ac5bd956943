// zkdm/zkdm-common/src/model.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use zkdm_circuit::{ComputationKind, DataShape};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatasetRecord {
    /// Declared shape, when both dimensions were provided.
    pub fn shape(&self) -> Option<DataShape> {
        Some(DataShape::new(self.rows?, self.columns?))
    }
}

/// Lifecycle position of a request, derived from its persisted flags.
///
/// Variants are ordered, so `status >= RequestStatus::Accepted` means the
/// request has been accepted at some point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    AwaitingConfirmation,
    Accepted,
    Completed,
    Approved,
}

/// Result reported by the dataset owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComputationResult {
    Number(f64),
    Text(String),
    List(Vec<ComputationResult>),
}

impl ComputationResult {
    pub fn is_empty(&self) -> bool {
        match self {
            ComputationResult::Number(value) => !value.is_finite(),
            ComputationResult::Text(text) => text.trim().is_empty(),
            ComputationResult::List(items) => items.is_empty(),
        }
    }
}

/// Built-in computation a consumer agreed to when submitting a request,
/// together with the dataset columns it reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreedComputation {
    pub kind: ComputationKind,
    pub operands: Vec<String>,
}

impl AgreedComputation {
    pub fn new(kind: ComputationKind, operands: Vec<String>) -> Self {
        Self { kind, operands }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.operands.len() != self.kind.arity() {
            return Err(format!(
                "{} takes {} operand column(s), got {}",
                self.kind,
                self.kind.arity(),
                self.operands.len()
            ));
        }
        if self.operands.iter().any(|name| name.trim().is_empty()) {
            return Err("operand column names must not be empty".into());
        }
        Ok(())
    }
}

impl fmt::Display for AgreedComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.operands.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Consumer who submitted the request.
    pub user_id: String,
    pub dataset_id: Uuid,
    pub code: String,
    pub computation: AgreedComputation,
    #[serde(default)]
    pub result: Option<ComputationResult>,
    #[serde(default)]
    pub is_accepted: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub result_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub username: Option<String>,
    /// Reference string the submitted proof was generated against.
    #[serde(default)]
    pub srs_id: Option<String>,
    /// Incremented on every persisted change; used for compare-and-swap.
    #[serde(default)]
    pub version: u64,
}

impl RequestRecord {
    pub fn status(&self) -> RequestStatus {
        if self.result_approved {
            RequestStatus::Approved
        } else if self.is_completed {
            RequestStatus::Completed
        } else if self.is_accepted {
            RequestStatus::Accepted
        } else {
            RequestStatus::AwaitingConfirmation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RequestRecord {
        let now = Utc::now();
        RequestRecord {
            id: Uuid::new_v4(),
            title: "mean age".into(),
            description: String::new(),
            user_id: "consumer".into(),
            dataset_id: Uuid::new_v4(),
            code: "def f(s, x): return x".into(),
            computation: AgreedComputation::new(ComputationKind::Sum, vec!["age".into()]),
            result: None,
            is_accepted: false,
            is_completed: false,
            result_approved: false,
            created_at: now,
            updated_at: now,
            username: None,
            srs_id: None,
            version: 0,
        }
    }

    #[test]
    fn status_follows_flags() {
        let mut request = record();
        assert_eq!(request.status(), RequestStatus::AwaitingConfirmation);
        request.is_accepted = true;
        assert_eq!(request.status(), RequestStatus::Accepted);
        request.is_completed = true;
        assert_eq!(request.status(), RequestStatus::Completed);
        request.result_approved = true;
        assert_eq!(request.status(), RequestStatus::Approved);
        assert!(RequestStatus::Completed > RequestStatus::Accepted);
    }

    #[test]
    fn results_deserialize_untagged() {
        let number: ComputationResult = serde_json::from_str("42.5").unwrap();
        assert_eq!(number, ComputationResult::Number(42.5));
        let list: ComputationResult = serde_json::from_str(r#"[1, "a"]"#).unwrap();
        assert_eq!(
            list,
            ComputationResult::List(vec![
                ComputationResult::Number(1.0),
                ComputationResult::Text("a".into())
            ])
        );
        assert!(ComputationResult::Text("  ".into()).is_empty());
        assert!(!ComputationResult::Number(0.0).is_empty());
    }

    #[test]
    fn legacy_records_without_new_fields_parse() {
        let mut value = serde_json::to_value(record()).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("srs_id");
        object.remove("version");
        object.remove("username");
        let parsed: RequestRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.srs_id, None);
    }

    #[test]
    fn agreed_computation_checks_arity() {
        let dot = AgreedComputation::new(ComputationKind::DotProduct, vec!["x".into()]);
        assert!(dot.validate().unwrap_err().contains("2 operand"));
        let blank = AgreedComputation::new(ComputationKind::Sum, vec![" ".into()]);
        assert!(blank.validate().is_err());
        let squares = AgreedComputation::new(ComputationKind::SumOfSquares, vec!["x".into()]);
        squares.validate().unwrap();
        assert_eq!(squares.to_string(), "sum_of_squares(x)");
    }
}
