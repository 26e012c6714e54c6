//! Span contract consumed by all layers.
//!
//! The engine only needs scoped spans with scalar attributes; anything
//! richer (exporters, samplers) lives behind this trait in the embedding
//! application. Payload fields are never mapped into attributes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::value::Value;

/// A scoped span. Attributes are scalar; implementations flush whatever
/// they buffered when the span drops.
pub trait Span {
    fn set_attribute(&mut self, key: &str, value: &str);
}

pub trait Tracer: Send + Sync {
    fn span(&self, name: &str) -> Box<dyn Span>;
}

/// The default tracer: spans cost nothing and record nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&mut self, _key: &str, _value: &str) {}
}

impl Tracer for NoopTracer {
    fn span(&self, _name: &str) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// A tracer that emits each finished span through the `log` facade, for
/// development and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTracer;

struct LogSpan {
    name: String,
    attrs: Vec<(String, String)>,
}

impl Span for LogSpan {
    fn set_attribute(&mut self, key: &str, value: &str) {
        self.attrs.push((key.to_string(), value.to_string()));
    }
}

impl Drop for LogSpan {
    fn drop(&mut self) {
        let attrs = self
            .attrs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        log::debug!(target: "ramp::trace", "span {} {}", self.name, attrs);
    }
}

impl Tracer for LogTracer {
    fn span(&self, name: &str) -> Box<dyn Span> {
        Box::new(LogSpan { name: name.to_string(), attrs: Vec::new() })
    }
}

pub fn default_tracer() -> Arc<dyn Tracer> {
    Arc::new(NoopTracer)
}

/// Flattens a value tree into `.`-separated scalar attribute pairs. Nulls
/// have no attribute representation and are dropped.
pub fn flatten(value: &Value, prefix: &str) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    flatten_into(value, prefix, &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: &str, flat: &mut BTreeMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Map(map) => {
            for (k, v) in map {
                flatten_into(v, &format!("{}.{}", prefix, k), flat);
            }
        }
        Value::List(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, &format!("{}.{}", prefix, i), flat);
            }
        }
        v => {
            flat.insert(prefix.to_string(), v.to_string());
        }
    }
}

/// Maps a record's fields into span attributes, skipping the payload.
pub fn span_attributes(span: &mut dyn Span, prefix: &str, value: &Value) {
    for (k, v) in flatten(value, prefix) {
        span.set_attribute(&k, &v);
    }
}
