//! Batches and the parts they carry
//!
//! A [`Batch`] is an ordered list of [`Part`]s moving through the pipeline as
//! one unit of work. Stages never mutate an incoming batch in place; they
//! build a fresh one for their output.

use bytes::Bytes;
use opentelemetry::trace::SpanContext;
use std::collections::BTreeMap;

/// A single record inside a batch.
///
/// The payload is immutable shared memory, so cloning a part is cheap and a
/// clone can never observe later writes made through another handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Part {
    payload: Bytes,
    metadata: BTreeMap<String, String>,
    span_context: Option<SpanContext>,
    error: Option<String>,
}

impl Part {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }

    /// Tracing context of the upstream span that produced this part, if any
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span_context.as_ref()
    }

    pub fn with_span_context(mut self, span_context: SpanContext) -> Self {
        self.span_context = Some(span_context);
        self
    }

    /// Mark this part as failed so downstream error handling can route it.
    pub fn flag_error(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Failure reason recorded by an earlier stage
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Ordered collection of parts processed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    parts: Vec<Part>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            parts: Vec::with_capacity(capacity),
        }
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// Build a batch with one part per payload, in order
    pub fn from_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        payloads.into_iter().map(Part::new).collect()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Part> {
        self.parts.iter()
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }
}

impl FromIterator<Part> for Batch {
    fn from_iter<T: IntoIterator<Item = Part>>(iter: T) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Batch {
    type Item = Part;
    type IntoIter = std::vec::IntoIter<Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}
