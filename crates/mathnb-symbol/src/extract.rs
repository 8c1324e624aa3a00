//! Formula inputs to SYMBOL-DEFINITION / SYMBOL-USE children

use crate::formula::FormulaSymbols;
use mathnb_rules::{ChangeAnalyzer, RuleResult};
use mathnb_store::{
    ChangeRequest, InsertNode, Node, NodeId, NodePattern, NodeType, Notebook, NotebookChange, Role,
    Subrole,
};
use serde_json::{json, Value};
use std::collections::HashSet;

/// Pattern of the formula inputs symbols are extracted from
#[must_use]
pub fn formula_pattern() -> NodePattern {
    NodePattern::of(Role::Input, NodeType::Text).subrole(Subrole::Formula)
}

/// Keeps each formula's symbol children in step with its text
///
/// Non-formula nodes (including formulas converted away) end up with no
/// symbol children from this analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolExtractor;

impl SymbolExtractor {
    /// Symbol children `node` should have, as `(role, data)` pairs
    fn desired(node: &Node, notebook: &Notebook) -> Vec<(Role, Value)> {
        let Some(text) = node.text().filter(|_| formula_pattern().matches(node, notebook)) else {
            return Vec::new();
        };
        let symbols = FormulaSymbols::parse(text);
        let mut desired = Vec::new();
        if let Some(definition) = symbols.definition {
            desired.push((Role::SymbolDefinition, json!(definition)));
        }
        desired.extend(
            symbols
                .uses
                .into_iter()
                .map(|name| (Role::SymbolUse, json!({ "name": name }))),
        );
        desired
    }

    fn reconcile(node: &Node, notebook: &Notebook, source: &str) -> Vec<ChangeRequest> {
        let mut desired = Self::desired(node, notebook);
        let mut requests = Vec::new();

        for child in notebook.children_of(node.id) {
            if child.source != source
                || !matches!(child.role, Role::SymbolDefinition | Role::SymbolUse)
            {
                continue;
            }
            match desired
                .iter()
                .position(|(role, data)| *role == child.role && *data == child.data)
            {
                Some(index) => {
                    desired.remove(index);
                }
                None => requests.push(ChangeRequest::delete(child.id)),
            }
        }

        requests.extend(desired.into_iter().map(|(role, data)| {
            InsertNode::new(role, NodeType::SymbolData, data)
                .child_of(node.id)
                .from_source(source)
                .into()
        }));
        requests
    }
}

impl ChangeAnalyzer for SymbolExtractor {
    fn name(&self) -> &str {
        "symbol-extractor"
    }

    fn analyze(
        &self,
        notebook: &Notebook,
        events: &[NotebookChange],
        source: &str,
    ) -> RuleResult<Vec<ChangeRequest>> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut requests = Vec::new();
        for event in events {
            let id = match event {
                NotebookChange::NodeInserted { node, .. } => node.id,
                NotebookChange::NodeChanged { node_id, .. }
                | NotebookChange::NodeConverted { node_id, .. } => *node_id,
                _ => continue,
            };
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = notebook.node(id) {
                requests.extend(Self::reconcile(node, notebook, source));
            }
        }
        Ok(requests)
    }
}
