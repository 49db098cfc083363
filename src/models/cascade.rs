//! Cascade-delete test definitions and results

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::object::{ObjectReference, ObjectType};
use crate::error::{validation_error, AppError};

/// A destructive experiment: delete `primary`, watch `dependents`, restore everything
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CascadeDeleteTest {
    #[validate(length(min = 1, max = 128, message = "Test name is required"))]
    pub name: String,

    #[validate(nested)]
    pub primary: ObjectReference,

    #[serde(default)]
    #[validate(nested)]
    pub dependents: Vec<DependentReference>,

    /// Row-level delete; `None` drops the whole primary object
    #[serde(default)]
    pub scope: Option<DeleteScope>,

    pub expected: CascadeBehavior,
}

impl CascadeDeleteTest {
    /// A row-level delete can only be measured on table dependents that say
    /// which column points at the primary; otherwise the whole table is counted.
    pub fn check_scope(&self) -> Result<(), AppError> {
        if self.scope.is_none() {
            return Ok(());
        }
        let unscoped: Vec<&str> = self
            .dependents
            .iter()
            .filter(|d| d.object.object_type == ObjectType::Table && d.reference_column.is_none())
            .map(|d| d.object.identifier.as_str())
            .collect();
        if unscoped.is_empty() {
            Ok(())
        } else {
            Err(validation_error(format!(
                "row-level delete needs a referenceColumn for table dependent(s): {}",
                unscoped.join(", ")
            )))
        }
    }
}

/// A dependent object and, for tables, the column that references the primary
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DependentReference {
    #[validate(nested)]
    pub object: ObjectReference,

    #[serde(default)]
    pub reference_column: Option<String>,
}

impl DependentReference {
    pub fn new(object: ObjectReference) -> Self {
        Self {
            object,
            reference_column: None,
        }
    }

    pub fn referencing(object: ObjectReference, column: impl Into<String>) -> Self {
        Self {
            object,
            reference_column: Some(column.into()),
        }
    }
}

/// `column = value` filter for a row-level delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteScope {
    pub column: String,
    pub value: String,
}

impl DeleteScope {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// What the caller expects the delete to do to dependents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeBehavior {
    pub should_cascade: bool,
    pub orphan_prevention: bool,
    /// Total dependent rows/objects expected to disappear, when known
    #[serde(default)]
    pub expected_affected: Option<i64>,
}

/// Per-dependent counts observed around the delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentCount {
    pub identifier: String,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

/// Difference between a backup and the live object after restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreDrift {
    pub backup_id: String,
    pub identifier: String,
    pub object_exists: bool,
    pub expected_rows: Option<i64>,
    pub actual_rows: Option<i64>,
    /// Fraction of backed-up rows missing from the live table
    pub data_loss: f64,
    pub has_drift: bool,
    pub notes: Vec<String>,
}

/// Observed outcome of a `CascadeDeleteTest`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeTestResult {
    pub test_name: String,
    pub success: bool,
    pub cascade_executed: bool,
    pub orphaned_resource_count: i64,
    pub orphaned_objects: Vec<String>,
    pub integrity_violations: Vec<String>,
    pub dependent_counts: Vec<DependentCount>,
    /// Backup ids restored after the delete, in restore order
    pub restored_objects: Vec<String>,
    pub restore_drift: Vec<RestoreDrift>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CascadeTestResult {
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            success: false,
            cascade_executed: false,
            orphaned_resource_count: 0,
            orphaned_objects: Vec::new(),
            integrity_violations: Vec::new(),
            dependent_counts: Vec::new(),
            restored_objects: Vec::new(),
            restore_drift: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_test_deserializes_from_api_payload() {
        let payload = r#"{
            "name": "orders-cascade",
            "primary": {"objectType": "table", "name": "orders", "schemaName": "public", "identifier": "orders"},
            "dependents": [
                {"object": {"objectType": "table", "name": "order_items", "schemaName": "public", "identifier": "items"},
                 "referenceColumn": "order_id"}
            ],
            "scope": {"column": "id", "value": "42"},
            "expected": {"shouldCascade": true, "orphanPrevention": true}
        }"#;

        let test: CascadeDeleteTest = serde_json::from_str(payload).unwrap();
        assert_eq!(test.primary.object_type, ObjectType::Table);
        assert_eq!(test.dependents.len(), 1);
        assert_eq!(test.dependents[0].reference_column.as_deref(), Some("order_id"));
        assert_eq!(test.scope, Some(DeleteScope::new("id", "42")));
        assert!(test.expected.should_cascade);
        assert_eq!(test.expected.expected_affected, None);
        assert!(test.validate().is_ok());
    }

    #[test]
    fn test_nested_reference_validation() {
        let test = CascadeDeleteTest {
            name: "bad".to_string(),
            primary: ObjectReference::new(ObjectType::Table, "db", "public", "orders"),
            dependents: vec![DependentReference::new(ObjectReference::new(
                ObjectType::View,
                "db",
                "public",
                "1nvalid name",
            ))],
            scope: None,
            expected: CascadeBehavior::default(),
        };
        assert!(test.validate().is_err());
    }

    #[test]
    fn test_scoped_delete_requires_reference_columns() {
        let orders = ObjectReference::new(ObjectType::Table, "db", "public", "orders");
        let items = ObjectReference::new(ObjectType::Table, "db", "public", "order_items");
        let totals = ObjectReference::new(ObjectType::View, "db", "public", "order_totals");
        let mut test = CascadeDeleteTest {
            name: "scoped".to_string(),
            primary: orders,
            dependents: vec![
                DependentReference::new(items.clone()),
                DependentReference::new(totals),
            ],
            scope: Some(DeleteScope::new("id", "1")),
            expected: CascadeBehavior::default(),
        };

        let err = test.check_scope().unwrap_err();
        assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("public.order_items")));

        test.dependents[0] = DependentReference::referencing(items, "order_id");
        assert!(test.check_scope().is_ok());

        test.dependents[0].reference_column = None;
        test.scope = None;
        assert!(test.check_scope().is_ok());
    }
}
