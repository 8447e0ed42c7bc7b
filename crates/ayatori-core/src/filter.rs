//! Input, result and output filters applied around every state body.
//!
//! Each stage takes the document by reference and returns a new value; the
//! caller's document is never modified.

use crate::error::WorkflowError;
use crate::path::{PathError, PathSpec};
use serde_json::{Map, Value};

fn select(document: &Value, path: &PathSpec) -> Result<Value, WorkflowError> {
    match path {
        PathSpec::Root => Ok(document.clone()),
        PathSpec::Discard => Ok(Value::Object(Map::new())),
        PathSpec::At(path) => path
            .query_one(document)
            .cloned()
            .map_err(|e| e.at(path)),
    }
}

/// Applies `InputPath`: the whole document by default, `{}` when discarded,
/// otherwise the single value the path selects.
pub fn filter_input(document: &Value, path: &PathSpec) -> Result<Value, WorkflowError> {
    select(document, path)
}

/// Applies `ResultPath`: the raw result replaces the document by default, is
/// dropped when discarded, otherwise it is written into a copy of the
/// document at the path.
pub fn merge_result(document: &Value, result: Value, path: &PathSpec) -> Result<Value, WorkflowError> {
    match path {
        PathSpec::Root => Ok(result),
        PathSpec::Discard => Ok(document.clone()),
        PathSpec::At(path) => {
            if !path.is_definite() {
                return Err(PathError::Indefinite.at(path));
            }
            let mut merged = document.clone();
            path.set(&mut merged, result).map_err(|e| e.at(path))?;
            Ok(merged)
        }
    }
}

/// Applies `OutputPath` with the same selection rules as [`filter_input`].
pub fn filter_output(document: &Value, path: &PathSpec) -> Result<Value, WorkflowError> {
    select(document, path)
}
