//! Mapping engine
//!
//! Compiles mapping text once into an [`Executor`] and applies it to parts of
//! a batch. A compiled executor holds no mutable state and can be shared
//! across threads.
//!
//! ```text
//! root = this
//! full_name = this.first + " " + this.last
//! meta source = "crm"
//! ```

pub mod ast;
pub mod error;
mod eval;
pub mod parser;

pub use error::{CompileError, EvaluationError};

use crate::message::{Batch, Part};
use ast::{Statement, Target};
use bytes::Bytes;
use eval::{EvalContext, Resolved};
use serde_json::{Map, Value};
use tracing::debug;

/// Result of mapping one part.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// The mapping produced a new part
    Replaced(Part),
    /// The mapping assigned `deleted()` to the root
    Deleted,
    Failed(EvaluationError),
}

/// A compiled mapping program.
#[derive(Debug, Clone)]
pub struct Executor {
    statements: Vec<Statement>,
}

impl Executor {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let statements = parser::parse(source)?;
        debug!(statements = statements.len(), "Compiled mapping");
        Ok(Self { statements })
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Apply the mapping to the part at `index`, with the rest of the batch
    /// available to batch-relative functions.
    pub fn map_part(&self, index: usize, batch: &Batch) -> MapOutcome {
        let Some(part) = batch.get(index) else {
            return MapOutcome::Failed(EvaluationError::IndexOutOfRange {
                index,
                len: batch.len(),
            });
        };

        match self.apply(index, batch, part) {
            Ok(Some(output)) => MapOutcome::Replaced(output),
            Ok(None) => MapOutcome::Deleted,
            Err(e) => MapOutcome::Failed(e),
        }
    }

    fn apply(
        &self,
        index: usize,
        batch: &Batch,
        part: &Part,
    ) -> Result<Option<Part>, EvaluationError> {
        let ctx = EvalContext::new(index, batch, part);
        let mut output = part.clone();
        // None until something writes to the document
        let mut document: Option<Value> = None;

        for statement in &self.statements {
            let resolved = eval::evaluate(&statement.value, &ctx, None)?;

            match (&statement.target, resolved) {
                (_, Resolved::Nothing) => {}
                (Target::Document(path), Resolved::Deleted) if path.is_empty() => {
                    return Ok(None);
                }
                (Target::Document(path), Resolved::Deleted) => {
                    if let Some(doc) = document.as_mut() {
                        remove_path(doc, path);
                    }
                }
                (Target::Document(path), Resolved::Value(value)) if path.is_empty() => {
                    document = Some(value);
                }
                (Target::Document(path), Resolved::Value(value)) => {
                    let doc = document.get_or_insert_with(|| Value::Object(Map::new()));
                    set_path(doc, path, value)?;
                }
                (Target::Metadata(key), Resolved::Deleted) => {
                    output.remove_metadata(key);
                }
                (Target::Metadata(key), Resolved::Value(value)) => {
                    output.set_metadata(key.clone(), value_to_string(value));
                }
            }
        }

        if let Some(doc) = document {
            output.set_payload(encode(doc)?);
        }
        Ok(Some(output))
    }
}

fn set_path(document: &mut Value, path: &[String], value: Value) -> Result<(), EvaluationError> {
    let mut current = document;
    for segment in path {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            other => {
                return Err(EvaluationError::InvalidTarget {
                    path: path.join("."),
                    found: eval::type_name(other),
                });
            }
        };
    }
    *current = value;
    Ok(())
}

fn remove_path(document: &mut Value, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = document;
    for segment in parents {
        match current {
            Value::Object(map) => match map.get_mut(segment) {
                Some(next) => current = next,
                None => return,
            },
            _ => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(last);
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn encode(document: Value) -> Result<Bytes, EvaluationError> {
    match document {
        Value::String(s) => Ok(Bytes::from(s)),
        other => serde_json::to_vec(&other)
            .map(Bytes::from)
            .map_err(|e| EvaluationError::Serialization {
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_one(mapping: &str, payload: &str) -> MapOutcome {
        let executor = Executor::compile(mapping).unwrap();
        executor.map_part(0, &Batch::from_payloads([payload.to_string()]))
    }

    fn replaced_json(outcome: MapOutcome) -> Value {
        match outcome {
            MapOutcome::Replaced(part) => serde_json::from_slice(part.payload()).unwrap(),
            other => panic!("Expected replaced part, got {other:?}"),
        }
    }

    #[test]
    fn test_root_copy_with_field_update() {
        let outcome = map_one(
            "root = this\nname = this.name.uppercase()\nroot.extra.flag = true",
            r#"{"name": "bev", "age": 30}"#,
        );
        assert_eq!(
            replaced_json(outcome),
            json!({"name": "BEV", "age": 30, "extra": {"flag": true}})
        );
    }

    #[test]
    fn test_field_assignment_starts_from_empty_object() {
        let outcome = map_one("id = this.id", r#"{"id": 7, "secret": "x"}"#);
        assert_eq!(replaced_json(outcome), json!({"id": 7}));
    }

    #[test]
    fn test_metadata_only_mapping_keeps_payload_bytes() {
        let payload = "{ \"spacing\" :   \"kept\" }";
        let executor = Executor::compile("meta seen = true").unwrap();
        let batch =
            Batch::from_parts(vec![Part::new(payload.to_string()).with_metadata("drop", "me")]);

        match executor.map_part(0, &batch) {
            MapOutcome::Replaced(part) => {
                assert_eq!(part.payload().as_ref(), payload.as_bytes());
                assert_eq!(part.get_metadata("seen"), Some("true"));
                assert_eq!(part.get_metadata("drop"), Some("me"));
            }
            other => panic!("Expected replaced part, got {other:?}"),
        }

        let executor = Executor::compile("meta drop = deleted()").unwrap();
        match executor.map_part(0, &batch) {
            MapOutcome::Replaced(part) => assert!(part.get_metadata("drop").is_none()),
            other => panic!("Expected replaced part, got {other:?}"),
        }
    }

    #[test]
    fn test_root_deleted_vs_empty_string() {
        assert_eq!(map_one("root = deleted()", "{}"), MapOutcome::Deleted);

        match map_one("root = \"\"", "{}") {
            MapOutcome::Replaced(part) => assert!(part.payload().is_empty()),
            other => panic!("Expected empty replaced part, got {other:?}"),
        }
    }

    #[test]
    fn test_field_deletion() {
        let outcome = map_one(
            "root = this\npassword = deleted()",
            r#"{"user": "a", "password": "b"}"#,
        );
        assert_eq!(replaced_json(outcome), json!({"user": "a"}));
    }

    #[test]
    fn test_if_without_else_skips_assignment() {
        let outcome = map_one("root = this\nbig = if this.n > 10 { true }", r#"{"n": 1}"#);
        assert_eq!(replaced_json(outcome), json!({"n": 1}));
    }

    #[test]
    fn test_string_root_written_raw() {
        match map_one("root = this.msg", r#"{"msg": "hello world"}"#) {
            MapOutcome::Replaced(part) => assert_eq!(part.payload().as_ref(), b"hello world"),
            other => panic!("Expected replaced part, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_target() {
        let outcome = map_one("root = 5\nroot.a = 1", "{}");
        assert!(matches!(
            outcome,
            MapOutcome::Failed(EvaluationError::InvalidTarget { found: "number", .. })
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let executor = Executor::compile("root = this").unwrap();
        assert_eq!(
            executor.map_part(3, &Batch::from_payloads(["{}"])),
            MapOutcome::Failed(EvaluationError::IndexOutOfRange { index: 3, len: 1 })
        );
    }

    #[test]
    fn test_batch_functions() {
        let executor =
            Executor::compile("root = {\"i\": batch_index(), \"n\": batch_size()}").unwrap();
        let batch = Batch::from_payloads(["a", "b", "c"]);
        assert_eq!(replaced_json(executor.map_part(2, &batch)), json!({"i": 2, "n": 3}));
    }

    #[test]
    fn test_executor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Executor>();
    }
}
