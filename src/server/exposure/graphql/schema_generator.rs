//! GraphQL SDL generator
//!
//! Renders the schema served by the executor as SDL text for clients. The
//! executor does not consult it; the text only documents what it resolves.

use crate::core::error::ErrorKind;
use crate::core::naming::singularize;
use crate::core::schema::{Column, RelationshipKind, Schema, Table};

use super::executor::{aggregate_type_name, edge_type_name, union_type_name};

/// Arguments shared by every connection field
const CONNECTION_ARGS: &str = "first: Int, after: String, last: Int, before: String";

/// Schema generator that creates GraphQL SDL from a relational schema
pub struct SchemaGenerator<'s> {
    schema: &'s Schema,
}

impl<'s> SchemaGenerator<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    /// Generate the complete SDL schema
    pub fn generate_sdl(&self) -> String {
        let mut blocks = vec![
            "scalar UUID\nscalar Datetime\nscalar JSON".to_string(),
            "enum SortDirection {\n  ASC\n  DESC\n}".to_string(),
            "type PageInfo {\n  hasNextPage: Boolean!\n  hasPreviousPage: Boolean!\n  startCursor: String\n  endCursor: String\n}".to_string(),
        ];
        blocks.push(self.generate_error_types());

        for table in self.schema.tables() {
            blocks.push(self.generate_object_type(table));
            blocks.push(self.generate_connection_types(table));
            blocks.push(self.generate_query_inputs(table));
            if !table.read_only {
                blocks.push(self.generate_mutation_types(table));
            }
        }

        blocks.push(self.generate_query_root());
        blocks.push(self.generate_mutation_root());
        blocks.push("schema {\n  query: Query\n  mutation: Mutation\n}".to_string());

        let mut sdl = blocks.join("\n\n");
        sdl.push('\n');
        sdl
    }

    fn generate_error_types(&self) -> String {
        let mut blocks = vec![
            "interface MutationError {\n  message: String!\n  code: String!\n  nativeErrorCode: String\n}".to_string(),
        ];
        for kind in ErrorKind::all() {
            blocks.push(format!(
                "type {} implements MutationError {{\n  message: String!\n  code: String!\n  nativeErrorCode: String\n}}",
                kind.type_name()
            ));
        }
        blocks.join("\n\n")
    }

    /// `type Post { id: ID! ... }`
    fn generate_object_type(&self, table: &Table) -> String {
        let mut type_def = format!("type {} {{\n  id: ID!\n", table.type_name);

        for column in &table.columns {
            // The opaque id hides a raw column of the same name
            if column.name == "id" {
                continue;
            }
            type_def.push_str(&format!("  {}: {}\n", column.name, output_type(column)));
        }

        for rel in &table.relationships {
            let Some(target) = self.schema.table(&rel.target) else {
                continue;
            };
            match rel.kind {
                RelationshipKind::ManyToOne => {
                    type_def.push_str(&format!("  {}: {}\n", rel.name, target.type_name));
                }
                _ => {
                    type_def.push_str(&format!(
                        "  {}({}, filter: {}Filter, orderBy: [{}OrderBy!]): {}!\n",
                        rel.name,
                        CONNECTION_ARGS,
                        target.type_name,
                        target.type_name,
                        target.connection_type_name()
                    ));
                }
            }
        }

        type_def.push('}');
        type_def
    }

    fn generate_connection_types(&self, table: &Table) -> String {
        let type_name = &table.type_name;
        let aggregate = aggregate_type_name(table);

        let mut blocks = vec![
            format!(
                "type {} {{\n  nodes: [{}!]!\n  edges: [{}!]!\n  pageInfo: PageInfo!\n  aggregate: {}\n}}",
                table.connection_type_name(),
                type_name,
                edge_type_name(table),
                aggregate
            ),
            format!(
                "type {} {{\n  cursor: String!\n  node: {}!\n}}",
                edge_type_name(table),
                type_name
            ),
        ];

        let numeric: Vec<&Column> = table
            .columns
            .iter()
            .filter(|c| matches!(c.column_type.graphql_scalar(), "Int" | "Float"))
            .collect();

        let all: Vec<&Column> = table.columns.iter().collect();

        let mut aggregate_def = format!("type {} {{\n  count: Int!\n", aggregate);
        for function in ["sum", "avg", "min", "max"] {
            let columns = if function == "min" || function == "max" {
                &all
            } else {
                &numeric
            };
            if columns.is_empty() {
                continue;
            }
            let fields_type = format!("{}{}", aggregate, capitalize(function));
            aggregate_def.push_str(&format!("  {}: {}\n", function, fields_type));

            let mut fields_def = format!("type {} {{\n", fields_type);
            for column in columns {
                let scalar = if function == "avg" {
                    "Float"
                } else {
                    column.column_type.graphql_scalar()
                };
                fields_def.push_str(&format!("  {}: {}\n", column.name, scalar));
            }
            fields_def.push('}');
            blocks.push(fields_def);
        }
        aggregate_def.push('}');
        blocks.insert(2, aggregate_def);

        blocks.join("\n\n")
    }

    fn generate_query_inputs(&self, table: &Table) -> String {
        let mut filter = format!("input {}Filter {{\n", table.type_name);
        let mut order_by = format!("input {}OrderBy {{\n", table.type_name);
        for column in &table.columns {
            filter.push_str(&format!(
                "  {}: {}\n",
                column.name,
                column.column_type.graphql_scalar()
            ));
            order_by.push_str(&format!("  {}: SortDirection\n", column.name));
        }
        filter.push('}');
        order_by.push('}');
        format!("{}\n\n{}", filter, order_by)
    }

    /// Inputs, success members and result unions for one writable table
    fn generate_mutation_types(&self, table: &Table) -> String {
        let type_name = &table.type_name;
        let mut blocks = Vec::new();

        blocks.push(self.generate_connect_input(table));

        let mut create = format!("input {}CreateInput {{\n", type_name);
        let mut set = format!("input {}SetInput {{\n", type_name);
        for column in &table.columns {
            let scalar = column.column_type.graphql_scalar();
            let required = if column.is_required() { "!" } else { "" };
            create.push_str(&format!("  {}: {}{}\n", column.name, scalar, required));
            set.push_str(&format!("  {}: {}\n", column.name, scalar));
        }
        for rel in &table.relationships {
            let Some(target) = self.schema.table(&rel.target) else {
                continue;
            };
            match rel.kind {
                RelationshipKind::ManyToOne => create.push_str(&format!(
                    "  {}: {}ConnectInput\n",
                    rel.connect_field(),
                    target.type_name
                )),
                RelationshipKind::ManyToMany => create.push_str(&format!(
                    "  {}: [{}ConnectInput!]\n",
                    rel.connect_field(),
                    target.type_name
                )),
                RelationshipKind::OneToMany | RelationshipKind::EdgeList => create.push_str(&format!(
                    "  {}: [{}CreateInput!]\n",
                    rel.create_field(),
                    target.type_name
                )),
            }
        }
        create.push('}');
        set.push('}');
        blocks.push(create);
        blocks.push(set);

        let node_type = |operation: &str, nullable: bool| {
            format!(
                "type {}{}Success {{\n  node: {}{}\n}}",
                operation,
                type_name,
                type_name,
                if nullable { "" } else { "!" }
            )
        };
        blocks.push(node_type("Create", false));
        blocks.push(node_type("Update", true));

        let mut deleted = format!("type Delete{}Success {{\n  id: ID!\n  key: JSON!\n", type_name);
        for key in &table.primary_key {
            if key == "id" || key == "key" {
                continue;
            }
            if let Some(column) = table.column(key) {
                deleted.push_str(&format!("  {}: {}!\n", key, column.column_type.graphql_scalar()));
            }
        }
        deleted.push('}');
        blocks.push(deleted);

        let errors: Vec<&str> = ErrorKind::all().iter().map(|k| k.type_name()).collect();
        for operation in ["create", "update", "delete"] {
            blocks.push(format!(
                "union {} = {}{}Success | {}",
                union_type_name(operation, table),
                capitalize(operation),
                type_name,
                errors.join(" | ")
            ));
        }

        blocks.join("\n\n")
    }

    /// `{id}` or one object per unique index
    fn generate_connect_input(&self, table: &Table) -> String {
        let mut blocks = Vec::new();
        let mut connect = format!("input {}ConnectInput {{\n  id: ID\n", table.type_name);
        for index in table.indexes.iter().filter(|i| i.unique) {
            let key_type = format!("{}{}Key", table.type_name, pascal(&index.field));
            connect.push_str(&format!("  {}: {}\n", index.field, key_type));

            let mut key_def = format!("input {} {{\n", key_type);
            for column in index.columns.iter().filter_map(|c| table.column(c)) {
                key_def.push_str(&format!(
                    "  {}: {}!\n",
                    column.name,
                    column.column_type.graphql_scalar()
                ));
            }
            key_def.push('}');
            blocks.push(key_def);
        }
        connect.push('}');
        blocks.insert(0, connect);
        blocks.join("\n\n")
    }

    /// Generate the Query root type
    fn generate_query_root(&self) -> String {
        let mut query = String::from("type Query {\n");
        for table in self.schema.tables() {
            query.push_str(&format!(
                "  {}({}, filter: {}Filter, orderBy: [{}OrderBy!]): {}!\n",
                table.list_field,
                CONNECTION_ARGS,
                table.type_name,
                table.type_name,
                table.connection_type_name()
            ));
            let single = singularize(&table.list_field);
            if single != table.list_field {
                query.push_str(&format!("  {}(id: ID!): {}\n", single, table.type_name));
            }
        }
        query.push('}');
        query
    }

    /// Generate the Mutation root type
    fn generate_mutation_root(&self) -> String {
        let mut mutation = String::from("type Mutation {\n");
        for table in self.schema.tables().filter(|t| !t.read_only) {
            let type_name = &table.type_name;
            mutation.push_str(&format!(
                "  create{}(input: {}CreateInput!): {}!\n",
                type_name,
                type_name,
                union_type_name("create", table)
            ));
            mutation.push_str(&format!(
                "  update{}(id: ID!, set: {}SetInput): {}!\n",
                type_name,
                type_name,
                union_type_name("update", table)
            ));
            mutation.push_str(&format!(
                "  delete{}(id: ID!): {}!\n",
                type_name,
                union_type_name("delete", table)
            ));
        }
        mutation.push('}');
        mutation
    }
}

fn output_type(column: &Column) -> String {
    let scalar = column.column_type.graphql_scalar();
    if column.nullable {
        scalar.to_string()
    } else {
        format!("{}!", scalar)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `by_email` -> `ByEmail`
fn pascal(s: &str) -> String {
    s.split('_').map(capitalize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;

    fn sdl() -> String {
        let schema = SchemaConfig::blog().into_schema().unwrap();
        SchemaGenerator::new(&schema).generate_sdl()
    }

    #[test]
    fn test_object_types_expose_opaque_id() {
        let sdl = sdl();
        assert!(sdl.contains("type User {\n  id: ID!\n  email: String!\n"));
        assert!(sdl.contains("  bio: String\n"));
        assert!(sdl.contains("  author: User\n"));
        assert!(sdl.contains("  posts(first: Int, after: String, last: Int, before: String, filter: PostFilter, orderBy: [PostOrderBy!]): PostConnection!"));
    }

    #[test]
    fn test_connection_and_aggregate_types() {
        let sdl = sdl();
        assert!(sdl.contains("type PostConnection {"));
        assert!(sdl.contains("type PostEdge {\n  cursor: String!\n  node: Post!\n}"));
        assert!(sdl.contains("type PostTagAggregateSum {"));
    }

    #[test]
    fn test_mutation_unions_and_inputs() {
        let sdl = sdl();
        assert!(sdl.contains("union CreatePostResult = CreatePostSuccess | InputValidationError | ConflictError"));
        assert!(sdl.contains("  createPost(input: PostCreateInput!): CreatePostResult!"));
        assert!(sdl.contains("  authorConnect: UserConnectInput\n"));
        assert!(sdl.contains("  tagsConnect: [TagConnectInput!]\n"));
        assert!(sdl.contains("  taggingsCreate: [PostTagCreateInput!]\n"));
        assert!(sdl.contains("  by_label: TagByLabelKey\n"));
    }

    #[test]
    fn test_read_only_table_has_no_mutations() {
        let sdl = sdl();
        assert!(sdl.contains("type AuditLog {"));
        assert!(!sdl.contains("createAuditLog"));
        assert!(!sdl.contains("DeleteAuditLogSuccess"));
    }
}
