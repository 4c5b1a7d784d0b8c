//! Parsed operations and responses.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_graphql_parser::types::{
    DocumentOperations, ExecutableDocument, OperationDefinition, OperationType, Selection,
    SelectionSet,
};
use async_graphql_value::Name;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphqlError, ParseError};

/// Header set. Names are compared case-insensitively when merged.
pub type Headers = HashMap<String, String>;

/// Variables sent with an operation.
pub type Variables = Map<String, Value>;

/// Top-level kind of an operation, taken from its main definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl From<OperationType> for OperationKind {
    fn from(ty: OperationType) -> Self {
        match ty {
            OperationType::Query => Self::Query,
            OperationType::Mutation => Self::Mutation,
            OperationType::Subscription => Self::Subscription,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// Per-request context travelling with an operation through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    /// Outgoing headers.
    pub headers: Headers,
}

/// A single GraphQL request unit.
///
/// The document is parsed once; clones share it.
#[derive(Debug, Clone)]
pub struct Operation {
    source: Arc<str>,
    document: Arc<ExecutableDocument>,
    variables: Variables,
    operation_name: Option<String>,
    kind: OperationKind,
    context: OperationContext,
}

impl Operation {
    /// Parse a query, mutation or subscription document.
    pub fn parse(source: impl Into<String>) -> Result<Self, ParseError> {
        let source: String = source.into();
        let document = async_graphql_parser::parse_query(&source)
            .map_err(|err| ParseError::Syntax(err.to_string()))?;
        check_fragment_cycles(&document)?;
        let kind = main_definition(&document, None)?.ty.into();

        Ok(Self {
            source: source.into(),
            document: Arc::new(document),
            variables: Variables::new(),
            operation_name: None,
            kind,
            context: OperationContext::default(),
        })
    }

    /// Select a named operation from a multi-operation document.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Result<Self, ParseError> {
        let name = name.into();
        self.kind = main_definition(&self.document, Some(&name))?.ty.into();
        self.operation_name = Some(name);
        Ok(self)
    }

    /// Replace all variables.
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Set a single variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Add a contextual header for this request only.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.headers.insert(name.into(), value.into());
        self
    }

    /// Operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Document text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed document.
    pub fn document(&self) -> &ExecutableDocument {
        &self.document
    }

    /// The operation definition that will be executed.
    pub fn definition(&self) -> Option<&OperationDefinition> {
        main_definition(&self.document, self.operation_name.as_deref()).ok()
    }

    /// Variables.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Selected operation name, if any.
    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    /// Request context.
    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    /// Mutable request context, used by pipeline stages.
    pub fn context_mut(&mut self) -> &mut OperationContext {
        &mut self.context
    }

    /// Wire payload: `{ query, variables, operationName }`.
    pub fn payload(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), Value::String(self.source.to_string()));
        body.insert(
            "variables".to_string(),
            Value::Object(self.variables.clone()),
        );
        if let Some(name) = &self.operation_name {
            body.insert("operationName".to_string(), Value::String(name.clone()));
        }
        Value::Object(body)
    }
}

/// Pick the definition to execute: the named one, or the first in the document.
fn main_definition<'a>(
    document: &'a ExecutableDocument,
    name: Option<&str>,
) -> Result<&'a OperationDefinition, ParseError> {
    match (&document.operations, name) {
        // A lone anonymous operation answers to any name.
        (DocumentOperations::Single(operation), _) => Ok(&operation.node),
        (DocumentOperations::Multiple(operations), Some(name)) => operations
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, operation)| &operation.node)
            .ok_or_else(|| ParseError::UnknownOperation(name.to_string())),
        (DocumentOperations::Multiple(operations), None) => operations
            .values()
            .min_by_key(|operation| (operation.pos.line, operation.pos.column))
            .map(|operation| &operation.node)
            .ok_or_else(|| ParseError::Syntax("document contains no operations".to_string())),
    }
}

/// Reject documents whose fragments spread themselves, at any depth.
fn check_fragment_cycles(document: &ExecutableDocument) -> Result<(), ParseError> {
    let mut done = HashSet::new();
    for name in document.fragments.keys() {
        visit_fragment(document, name, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

fn visit_fragment<'a>(
    document: &'a ExecutableDocument,
    name: &'a Name,
    path: &mut Vec<&'a Name>,
    done: &mut HashSet<&'a Name>,
) -> Result<(), ParseError> {
    if done.contains(name) {
        return Ok(());
    }
    if path.contains(&name) {
        return Err(ParseError::FragmentCycle(name.to_string()));
    }
    let Some(fragment) = document.fragments.get(name) else {
        return Ok(());
    };

    let mut spreads = Vec::new();
    collect_spreads(&fragment.node.selection_set.node, &mut spreads);

    path.push(name);
    for spread in spreads {
        visit_fragment(document, spread, path, done)?;
    }
    path.pop();
    done.insert(name);
    Ok(())
}

fn collect_spreads<'a>(set: &'a SelectionSet, out: &mut Vec<&'a Name>) {
    for selection in &set.items {
        match &selection.node {
            Selection::Field(field) => collect_spreads(&field.node.selection_set.node, out),
            Selection::FragmentSpread(spread) => out.push(&spread.node.fragment_name.node),
            Selection::InlineFragment(inline) => {
                collect_spreads(&inline.node.selection_set.node, out)
            }
        }
    }
}

/// GraphQL response. Data and errors may both be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    /// Response data.
    #[serde(default)]
    pub data: Option<Value>,
    /// GraphQL errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
    /// Extensions payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlResponse {
    /// A response carrying only data.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Returns `true` if no GraphQL errors were returned.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_query_kind() {
        let op = Operation::parse("{ viewer { id } }").unwrap();
        assert_eq!(op.kind(), OperationKind::Query);
    }

    #[test]
    fn test_parse_subscription_kind() {
        let op = Operation::parse("subscription OnPrice { price }").unwrap();
        assert_eq!(op.kind(), OperationKind::Subscription);
        assert_eq!(op.kind().to_string(), "subscription");
    }

    #[test]
    fn test_parse_syntax_error() {
        let err = Operation::parse("query {").unwrap_err();
        assert!(matches!(err, ParseError::Syntax(_)));
    }

    #[test]
    fn test_fragment_cycles_rejected() {
        let direct = Operation::parse("{ ...F } fragment F on Query { a ...F }").unwrap_err();
        assert_eq!(direct, ParseError::FragmentCycle("F".to_string()));

        let nested = Operation::parse(
            r#"
            { viewer { ...A } }
            fragment A on User { friend { ...B } }
            fragment B on User { id ...A }
            "#,
        )
        .unwrap_err();
        assert!(matches!(nested, ParseError::FragmentCycle(_)));
    }

    #[test]
    fn test_shared_fragment_is_not_a_cycle() {
        let op = Operation::parse(
            r#"
            { a { ...Leaf } b { ...Leaf ...Mid } }
            fragment Mid on T { c { ...Leaf } }
            fragment Leaf on T { id }
            "#,
        );
        assert!(op.is_ok());
    }

    #[test]
    fn test_first_operation_is_main_definition() {
        let doc = "mutation Save { save } \n query Load { load }";
        let op = Operation::parse(doc).unwrap();
        assert_eq!(op.kind(), OperationKind::Mutation);
    }

    #[test]
    fn test_named_operation_selection() {
        let doc = "query Load { load } subscription Watch { changed }";
        let op = Operation::parse(doc)
            .unwrap()
            .with_operation_name("Watch")
            .unwrap();

        assert_eq!(op.kind(), OperationKind::Subscription);
        assert_eq!(op.operation_name(), Some("Watch"));
    }

    #[test]
    fn test_unknown_operation_name() {
        let op = Operation::parse("query Load { load } query Other { other }").unwrap();
        let err = op.with_operation_name("Missing").unwrap_err();
        assert_eq!(err, ParseError::UnknownOperation("Missing".to_string()));
    }

    #[test]
    fn test_payload_shape() {
        let op = Operation::parse("query Product($id: ID!) { product(id: $id) { id } }")
            .unwrap()
            .with_operation_name("Product")
            .unwrap()
            .with_variable("id", "p-1");

        let payload = op.payload();
        assert_eq!(payload["operationName"], "Product");
        assert_eq!(payload["variables"], json!({"id": "p-1"}));
        assert!(payload["query"].as_str().unwrap().contains("product(id: $id)"));
    }

    #[test]
    fn test_with_header_sets_context() {
        let op = Operation::parse("{ a }")
            .unwrap()
            .with_header("x-request-id", "abc");
        assert_eq!(
            op.context().headers.get("x-request-id").map(String::as_str),
            Some("abc")
        );
    }

    #[test]
    fn test_response_partial_success() {
        let response: GraphqlResponse = serde_json::from_value(json!({
            "data": {"viewer": null},
            "errors": [{"message": "unauthorized"}]
        }))
        .unwrap();

        assert!(!response.is_ok());
        assert_eq!(response.data, Some(json!({"viewer": null})));
    }
}
