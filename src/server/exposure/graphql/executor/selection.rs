//! Owned selection trees
//!
//! The parsed document is lowered once per request: variables are
//! substituted, named fragments are inlined and `@skip`/`@include` are
//! applied. Resolvers only ever see [`SelectionNode`]s.

use anyhow::{Result, anyhow, bail};
use graphql_parser::query::{
    Directive, FragmentDefinition, Selection, TypeCondition, Value as GqlValue,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::utils::gql_value_to_json;

/// Inlined fragments nested deeper than this are treated as a cycle
const MAX_FRAGMENT_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub selections: Vec<SelectionNode>,
}

impl FieldNode {
    /// Key the value is returned under
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionNode {
    Field(FieldNode),
    /// Inline fragment or inlined fragment spread
    Fragment {
        type_condition: Option<String>,
        selections: Vec<SelectionNode>,
    },
}

/// Fields that apply to an object whose type is any of `types`, in document
/// order with fragments flattened
pub fn fields_for<'s>(selections: &'s [SelectionNode], types: &[&str]) -> Vec<&'s FieldNode> {
    let mut out = Vec::new();
    collect(selections, types, &mut out);
    out
}

fn collect<'s>(selections: &'s [SelectionNode], types: &[&str], out: &mut Vec<&'s FieldNode>) {
    for selection in selections {
        match selection {
            SelectionNode::Field(field) => out.push(field),
            SelectionNode::Fragment {
                type_condition,
                selections,
            } => {
                let applies = type_condition
                    .as_deref()
                    .is_none_or(|condition| types.contains(&condition));
                if applies {
                    collect(selections, types, out);
                }
            }
        }
    }
}

/// Lowers parsed selections against one request's fragments and variables
pub struct Lowering<'d, 'a> {
    fragments: HashMap<&'d str, &'d FragmentDefinition<'a, String>>,
    variables: &'d HashMap<String, Value>,
}

impl<'d, 'a> Lowering<'d, 'a> {
    pub fn new(
        fragments: impl IntoIterator<Item = &'d FragmentDefinition<'a, String>>,
        variables: &'d HashMap<String, Value>,
    ) -> Self {
        Self {
            fragments: fragments.into_iter().map(|f| (f.name.as_str(), f)).collect(),
            variables,
        }
    }

    pub fn lower(&self, selections: &'d [Selection<'a, String>]) -> Result<Vec<SelectionNode>> {
        self.lower_at(selections, 0)
    }

    fn lower_at(&self, selections: &'d [Selection<'a, String>], depth: usize) -> Result<Vec<SelectionNode>> {
        if depth > MAX_FRAGMENT_DEPTH {
            bail!("Fragments are nested too deeply (cycle?)");
        }

        let mut out = Vec::with_capacity(selections.len());
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    let mut arguments = Map::new();
                    for (name, value) in &field.arguments {
                        arguments.insert(name.clone(), gql_value_to_json(value, self.variables));
                    }
                    out.push(SelectionNode::Field(FieldNode {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments,
                        selections: self.lower_at(&field.selection_set.items, depth)?,
                    }));
                }
                Selection::InlineFragment(fragment) => {
                    if !self.included(&fragment.directives)? {
                        continue;
                    }
                    out.push(SelectionNode::Fragment {
                        type_condition: fragment
                            .type_condition
                            .as_ref()
                            .map(|TypeCondition::On(name)| name.clone()),
                        selections: self.lower_at(&fragment.selection_set.items, depth + 1)?,
                    });
                }
                Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let fragment = self
                        .fragments
                        .get(spread.fragment_name.as_str())
                        .ok_or_else(|| anyhow!("Unknown fragment: {}", spread.fragment_name))?;
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    out.push(SelectionNode::Fragment {
                        type_condition: Some(condition.clone()),
                        selections: self.lower_at(&fragment.selection_set.items, depth + 1)?,
                    });
                }
            }
        }
        Ok(out)
    }

    /// `@skip(if:)` / `@include(if:)`
    fn included(&self, directives: &[Directive<'a, String>]) -> Result<bool> {
        for directive in directives {
            let condition = directive
                .arguments
                .iter()
                .find(|(name, _)| name == "if")
                .map(|(_, value)| self.condition(value))
                .transpose()?;
            match (directive.name.as_str(), condition) {
                ("skip", Some(true)) | ("include", Some(false)) => return Ok(false),
                ("skip" | "include", None) => {
                    bail!("@{} requires an 'if' argument", directive.name)
                }
                _ => {}
            }
        }
        Ok(true)
    }

    fn condition(&self, value: &GqlValue<'a, String>) -> Result<bool> {
        gql_value_to_json(value, self.variables)
            .as_bool()
            .ok_or_else(|| anyhow!("Directive condition must be a boolean"))
    }
}
