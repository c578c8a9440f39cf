//! Core GraphQL executor orchestration

use anyhow::{Result, anyhow, bail};
use graphql_parser::query::{Definition, Document, OperationDefinition, Selection, parse_query};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use super::mutation_executor::execute_mutation;
use super::query_executor::execute_query;
use super::selection::{Lowering, SelectionNode};
use crate::core::executor::DirectSource;
use crate::engine::batch::RequestBatchState;
use crate::engine::resolver::ResolveContext;
use crate::mutation::{MutationContext, Orchestrator};
use crate::server::exposure::graphql::schema_generator::SchemaGenerator;
use crate::server::host::ServerHost;

/// GraphQL executor that runs documents against the host's tables
pub struct GraphQLExecutor {
    host: Arc<ServerHost>,
    schema_sdl: String,
}

impl GraphQLExecutor {
    /// Create a new executor with the given host
    pub fn new(host: Arc<ServerHost>) -> Self {
        let schema_sdl = SchemaGenerator::new(&host.schema).generate_sdl();
        Self { host, schema_sdl }
    }

    /// SDL describing every type this executor serves
    pub fn sdl(&self) -> &str {
        &self.schema_sdl
    }

    /// Execute a GraphQL document and return `{"data": ...}`
    pub async fn execute(
        &self,
        query: &str,
        variables: Option<HashMap<String, Value>>,
        operation_name: Option<&str>,
    ) -> Result<Value> {
        let doc = parse_query::<String>(query)
            .map_err(|e| anyhow!("Failed to parse query: {:?}", e))?;

        let result = self
            .execute_document(&doc, &variables.unwrap_or_default(), operation_name)
            .await?;

        Ok(json!({
            "data": result
        }))
    }

    async fn execute_document(
        &self,
        doc: &Document<'_, String>,
        variables: &HashMap<String, Value>,
        operation_name: Option<&str>,
    ) -> Result<Value> {
        let operation = select_operation(doc, operation_name)?;
        let fragments = doc.definitions.iter().filter_map(|def| match def {
            Definition::Fragment(fragment) => Some(fragment),
            Definition::Operation(_) => None,
        });
        let lowering = Lowering::new(fragments, variables);

        if let OperationDefinition::Subscription(_) = operation {
            bail!("Subscriptions are not supported");
        }
        let selections = lowering.lower(root_selections(operation))?;

        match operation {
            OperationDefinition::Mutation(_) => self.run_mutation(selections).await,
            _ => self.run_query(selections).await,
        }
    }

    /// One request context: direct reads and a fresh batch state
    async fn run_query(&self, selections: Vec<SelectionNode>) -> Result<Value> {
        let batch = Arc::new(RequestBatchState::new());
        let ctx = ResolveContext::new(
            self.host.schema.clone(),
            self.host.planner.clone(),
            Arc::new(DirectSource::new(self.host.executor.clone())),
            Some(batch.clone()),
        );

        let result = execute_query(&ctx, &selections).await;
        let stats = batch.stats();
        tracing::debug!(hits = stats.hits, misses = stats.misses, "query batch cache");
        result
    }

    /// One mutation context shared by every field, finalized exactly once
    async fn run_mutation(&self, selections: Vec<SelectionNode>) -> Result<Value> {
        let context = Arc::new(MutationContext::new(self.host.executor.clone()));
        let orchestrator = Orchestrator::new(
            self.host.schema.clone(),
            self.host.planner.clone(),
            context.clone(),
        );
        // Payload nodes read through the mutation's transaction
        let ctx = ResolveContext::new(
            self.host.schema.clone(),
            self.host.planner.clone(),
            context.clone(),
            Some(Arc::new(RequestBatchState::new())),
        );

        match execute_mutation(&orchestrator, &ctx, &selections).await {
            Ok(data) => {
                let outcome = context.finalize().await?;
                tracing::debug!(?outcome, "mutation operation finished");
                Ok(data)
            }
            Err(err) => {
                context.mark_error().await;
                if let Err(finalize_err) = context.finalize().await {
                    tracing::warn!(error = %finalize_err, "rollback after fatal mutation error failed");
                }
                Err(err)
            }
        }
    }
}

/// The named operation, or the only one when no name is given
fn select_operation<'d, 'a>(
    doc: &'d Document<'a, String>,
    operation_name: Option<&str>,
) -> Result<&'d OperationDefinition<'a, String>> {
    let mut operations = doc.definitions.iter().filter_map(|def| match def {
        Definition::Operation(op) => Some(op),
        Definition::Fragment(_) => None,
    });

    match operation_name {
        Some(name) => operations
            .find(|op| operation_name_of(op) == Some(name))
            .ok_or_else(|| anyhow!("Unknown operation: {}", name)),
        None => {
            let first = operations
                .next()
                .ok_or_else(|| anyhow!("No operation found in query"))?;
            if operations.next().is_some() {
                bail!("operationName is required when the document has several operations");
            }
            Ok(first)
        }
    }
}

fn operation_name_of<'d>(op: &'d OperationDefinition<'_, String>) -> Option<&'d str> {
    match op {
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
        OperationDefinition::SelectionSet(_) => None,
    }
}

fn root_selections<'d, 'a>(op: &'d OperationDefinition<'a, String>) -> &'d [Selection<'a, String>] {
    match op {
        OperationDefinition::Query(q) => &q.selection_set.items,
        OperationDefinition::Mutation(m) => &m.selection_set.items,
        OperationDefinition::Subscription(s) => &s.selection_set.items,
        OperationDefinition::SelectionSet(s) => &s.items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_operation_by_name() {
        let doc = parse_query::<String>("query A { a } query B { b }").unwrap();
        let op = select_operation(&doc, Some("B")).unwrap();
        assert_eq!(operation_name_of(op), Some("B"));
        assert!(select_operation(&doc, None).is_err());
        assert!(select_operation(&doc, Some("C")).is_err());
    }

    #[test]
    fn test_select_single_anonymous_operation() {
        let doc = parse_query::<String>("{ a } fragment F on X { y }").unwrap();
        let op = select_operation(&doc, None).unwrap();
        assert_eq!(root_selections(op).len(), 1);
    }
}
