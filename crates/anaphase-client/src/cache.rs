//! Normalized in-memory cache.
//!
//! Objects that carry `__typename` and `id` (or `_id`) are stored once under
//! `Typename:id` and referenced elsewhere as `{"__ref": "Typename:id"}`.
//! Root fields live on `ROOT_QUERY` / `ROOT_MUTATION` / `ROOT_SUBSCRIPTION`
//! keyed by field name plus arguments, e.g. `product({"id":"1"})`.
//! Reads and writes are driven by the operation's selection set, so the
//! cache never walks reference cycles.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_graphql_parser::types::{Field, FragmentDefinition, Selection, SelectionSet};
use async_graphql_parser::Positioned;
use async_graphql_value::{Name, Value as GqlValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::operation::{Operation, OperationKind, Variables};

/// Root record for query fields.
pub const ROOT_QUERY: &str = "ROOT_QUERY";
/// Root record for mutation fields.
pub const ROOT_MUTATION: &str = "ROOT_MUTATION";
/// Root record for subscription fields.
pub const ROOT_SUBSCRIPTION: &str = "ROOT_SUBSCRIPTION";

const REF_KEY: &str = "__ref";

/// Field values of one normalized record.
pub type Record = Map<String, Value>;

/// Serializable cache contents, used to hydrate a new client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheSnapshot(BTreeMap<String, Record>);

impl CacheSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record.
    pub fn with_record(mut self, key: impl Into<String>, record: Record) -> Self {
        self.0.insert(key.into(), record);
        self
    }

    /// Look up a record.
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.0.get(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Normalized store of previously fetched entities.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    records: BTreeMap<String, Record>,
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a snapshot into the cache.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        for (key, record) in snapshot.0 {
            merge_record(self.records.entry(key).or_default(), record);
        }
    }

    /// Serialize the current contents.
    pub fn extract(&self) -> CacheSnapshot {
        CacheSnapshot(self.records.clone())
    }

    /// Look up a normalized record by key.
    pub fn record(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Write an operation result into the cache.
    pub fn write(&mut self, operation: &Operation, data: &Value) {
        let (Some(definition), Value::Object(data)) = (operation.definition(), data) else {
            return;
        };
        let walker = Walker::new(operation);
        let root = walker.write_selection(
            &mut self.records,
            &definition.selection_set.node,
            data,
        );
        let key = root_key(operation.kind());
        merge_record(self.records.entry(key.to_string()).or_default(), root);
    }

    /// Read a query result from the cache. `None` if any selected field is missing.
    pub fn read(&self, operation: &Operation) -> Option<Value> {
        let definition = operation.definition()?;
        let root = self.records.get(root_key(operation.kind()))?;
        let walker = Walker::new(operation);
        walker
            .read_selection(&self.records, &definition.selection_set.node, root)
            .map(Value::Object)
    }
}

fn root_key(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => ROOT_QUERY,
        OperationKind::Mutation => ROOT_MUTATION,
        OperationKind::Subscription => ROOT_SUBSCRIPTION,
    }
}

fn merge_record(target: &mut Record, incoming: Record) {
    for (field, value) in incoming {
        target.insert(field, value);
    }
}

/// Cache identity of an object: `Typename:id`.
pub fn identify(object: &Map<String, Value>) -> Option<String> {
    let typename = object.get("__typename")?.as_str()?;
    let id = object.get("id").or_else(|| object.get("_id"))?;
    match id {
        Value::String(id) => Some(format!("{typename}:{id}")),
        Value::Number(id) => Some(format!("{typename}:{id}")),
        _ => None,
    }
}

struct Walker<'a> {
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: &'a Variables,
}

impl<'a> Walker<'a> {
    fn new(operation: &'a Operation) -> Self {
        Self {
            fragments: &operation.document().fragments,
            variables: operation.variables(),
        }
    }

    /// Flatten fragment spreads and inline fragments into a field list.
    fn fields(&self, set: &'a SelectionSet, out: &mut Vec<&'a Field>) {
        self.collect(set, &mut HashSet::new(), out);
    }

    /// Each named fragment is expanded at most once per selection set.
    fn collect(
        &self,
        set: &'a SelectionSet,
        visited: &mut HashSet<&'a Name>,
        out: &mut Vec<&'a Field>,
    ) {
        for selection in &set.items {
            match &selection.node {
                Selection::Field(field) => out.push(&field.node),
                Selection::FragmentSpread(spread) => {
                    let name = &spread.node.fragment_name.node;
                    if !visited.insert(name) {
                        continue;
                    }
                    if let Some(fragment) = self.fragments.get(name) {
                        self.collect(&fragment.node.selection_set.node, visited, out);
                    }
                }
                Selection::InlineFragment(inline) => {
                    self.collect(&inline.node.selection_set.node, visited, out);
                }
            }
        }
    }

    fn storage_key(&self, field: &Field) -> String {
        let name = field.name.node.as_str();
        if field.arguments.is_empty() {
            return name.to_string();
        }
        let args: Map<String, Value> = field
            .arguments
            .iter()
            .map(|(arg, value)| (arg.node.to_string(), self.to_json(&value.node)))
            .collect();
        format!("{name}({})", Value::Object(args))
    }

    fn to_json(&self, value: &GqlValue) -> Value {
        match value {
            GqlValue::Variable(name) => self
                .variables
                .get(name.as_str())
                .cloned()
                .unwrap_or(Value::Null),
            GqlValue::Null => Value::Null,
            GqlValue::Number(number) => Value::Number(number.clone()),
            GqlValue::String(text) => Value::String(text.clone()),
            GqlValue::Boolean(flag) => Value::Bool(*flag),
            GqlValue::Binary(bytes) => Value::Array(bytes.iter().map(|b| json!(b)).collect()),
            GqlValue::Enum(name) => Value::String(name.to_string()),
            GqlValue::List(items) => Value::Array(items.iter().map(|v| self.to_json(v)).collect()),
            GqlValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, v)| (key.to_string(), self.to_json(v)))
                    .collect(),
            ),
        }
    }

    fn write_selection(
        &self,
        records: &mut BTreeMap<String, Record>,
        set: &'a SelectionSet,
        data: &Map<String, Value>,
    ) -> Record {
        let mut fields = Vec::new();
        self.fields(set, &mut fields);

        let mut record = Record::new();
        for field in fields {
            let response_key = response_key(field);
            let Some(value) = data.get(response_key) else {
                continue;
            };
            let normalized = self.write_value(records, &field.selection_set.node, value);
            record.insert(self.storage_key(field), normalized);
        }
        record
    }

    fn write_value(
        &self,
        records: &mut BTreeMap<String, Record>,
        set: &'a SelectionSet,
        value: &Value,
    ) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.write_value(records, set, item))
                    .collect(),
            ),
            Value::Object(object) if !set.items.is_empty() => {
                let fields = self.write_selection(records, set, object);
                match identify(object) {
                    Some(key) => {
                        merge_record(records.entry(key.clone()).or_default(), fields);
                        json!({ REF_KEY: key })
                    }
                    None => Value::Object(fields),
                }
            }
            other => other.clone(),
        }
    }

    fn read_selection(
        &self,
        records: &BTreeMap<String, Record>,
        set: &'a SelectionSet,
        record: &Record,
    ) -> Option<Map<String, Value>> {
        let mut fields = Vec::new();
        self.fields(set, &mut fields);

        let mut out = Map::new();
        for field in fields {
            let stored = record.get(&self.storage_key(field))?;
            let value = self.read_value(records, &field.selection_set.node, stored)?;
            out.insert(response_key(field).to_string(), value);
        }
        Some(out)
    }

    fn read_value(
        &self,
        records: &BTreeMap<String, Record>,
        set: &'a SelectionSet,
        value: &Value,
    ) -> Option<Value> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.read_value(records, set, item))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Value::Object(object) if !set.items.is_empty() => {
                let target = match object.get(REF_KEY).and_then(Value::as_str) {
                    Some(key) => records.get(key)?,
                    None => object,
                };
                self.read_selection(records, set, target).map(Value::Object)
            }
            other => Some(other.clone()),
        }
    }
}

fn response_key(field: &Field) -> &str {
    field
        .alias
        .as_ref()
        .map_or_else(|| field.name.node.as_str(), |alias| alias.node.as_str())
}
