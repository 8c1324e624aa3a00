//! Serialized notebook document
//!
//! [`NotebookDocument`] is the authoritative persisted and wire form. Loading
//! one checks every structural invariant the store relies on:
//! - map keys agree with the embedded ids, and every id is below `nextId`
//! - parents exist and the parent chains are acyclic
//! - `topLevelOrder` lists each top-level node exactly once
//! - relationship endpoints exist

use crate::error::{StoreError, StoreResult};
use crate::ids::{NodeId, RelationshipId};
use crate::node::{Node, Relationship};
use crate::notebook::Notebook;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Document format version written by this build
pub const FORMAT_VERSION: &str = "1.0";

/// Page dimensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSize {
    /// Width with unit, e.g. `8.5in`
    pub width: String,
    /// Height with unit
    pub height: String,
}

/// Page margins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMargins {
    /// Top margin
    pub top: String,
    /// Right margin
    pub right: String,
    /// Bottom margin
    pub bottom: String,
    /// Left margin
    pub left: String,
}

/// Page layout of a notebook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageConfig {
    /// Page size
    pub size: PageSize,
    /// Page margins
    pub margins: PageMargins,
}

impl Default for PageConfig {
    fn default() -> Self {
        let inch = || "1in".to_string();
        Self {
            size: PageSize {
                width: "8.5in".to_string(),
                height: "11in".to_string(),
            },
            margins: PageMargins {
                top: inch(),
                right: inch(),
                bottom: inch(),
                left: inch(),
            },
        }
    }
}

/// Serialized notebook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookDocument {
    /// Next id to assign
    pub next_id: u64,
    /// Page layout
    pub page_config: PageConfig,
    /// Nodes keyed by id
    pub nodes: BTreeMap<NodeId, Node>,
    /// Relationships keyed by id
    pub relationships: BTreeMap<RelationshipId, Relationship>,
    /// Order of top-level nodes
    pub top_level_order: Vec<NodeId>,
    /// Format version
    pub version: String,
}

impl NotebookDocument {
    /// Parse from JSON text (unvalidated; see [`Notebook::from_document`])
    ///
    /// # Errors
    /// `StoreError::Serialization` on malformed JSON
    pub fn from_json(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render as pretty-printed JSON
    ///
    /// # Errors
    /// `StoreError::Serialization` if encoding fails
    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Notebook {
    /// Serialize to the document form
    #[must_use]
    pub fn to_document(&self) -> NotebookDocument {
        NotebookDocument {
            next_id: self.next_id(),
            page_config: self.page_config().clone(),
            nodes: self.nodes().map(|n| (n.id, n.clone())).collect(),
            relationships: self.relationships().map(|r| (r.id, r.clone())).collect(),
            top_level_order: self.top_level_order().to_vec(),
            version: FORMAT_VERSION.to_string(),
        }
    }

    /// Hydrate from a document, validating its invariants
    ///
    /// # Errors
    /// `StoreError::VersionMismatch` or `StoreError::InvalidDocument`
    pub fn from_document(document: NotebookDocument) -> StoreResult<Self> {
        if document.version != FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: FORMAT_VERSION.to_string(),
                found: document.version,
            });
        }
        validate_nodes(&document)?;
        validate_order(&document)?;
        validate_relationships(&document)?;

        tracing::debug!(
            nodes = document.nodes.len(),
            relationships = document.relationships.len(),
            next_id = document.next_id,
            "hydrated notebook document"
        );
        Ok(Notebook::from_parts(
            document.next_id,
            document.page_config,
            document.top_level_order,
            document.nodes,
            document.relationships,
        ))
    }

    /// Serialize to pretty-printed JSON
    ///
    /// # Errors
    /// `StoreError::Serialization` if encoding fails
    pub fn to_json(&self) -> StoreResult<String> {
        self.to_document().to_json()
    }

    /// Parse and validate JSON
    ///
    /// # Errors
    /// Malformed JSON or an invalid document
    pub fn from_json(json: &str) -> StoreResult<Self> {
        Self::from_document(NotebookDocument::from_json(json)?)
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidDocument(message.into())
}

fn validate_nodes(document: &NotebookDocument) -> StoreResult<()> {
    for (key, node) in &document.nodes {
        if *key != node.id {
            return Err(invalid(format!("node key {key} holds node {}", node.id)));
        }
        if node.id.is_root() || node.id.get() >= document.next_id {
            return Err(invalid(format!("node id {} outside 1..{}", node.id, document.next_id)));
        }
        if !node.parent_id.is_root() && !document.nodes.contains_key(&node.parent_id) {
            return Err(invalid(format!("node {} has missing parent {}", node.id, node.parent_id)));
        }
    }

    // Walk every parent chain; a chain longer than the node count is a cycle.
    let limit = document.nodes.len();
    for node in document.nodes.values() {
        let mut current = node.parent_id;
        let mut steps = 0usize;
        while !current.is_root() {
            steps += 1;
            if steps > limit || current == node.id {
                return Err(StoreError::CyclicParent(node.id));
            }
            current = match document.nodes.get(&current) {
                Some(parent) => parent.parent_id,
                None => break,
            };
        }
    }
    Ok(())
}

fn validate_order(document: &NotebookDocument) -> StoreResult<()> {
    let mut seen = HashSet::new();
    for id in &document.top_level_order {
        let node = document
            .nodes
            .get(id)
            .ok_or_else(|| invalid(format!("order lists missing node {id}")))?;
        if !node.is_top_level() {
            return Err(invalid(format!("order lists nested node {id}")));
        }
        if !seen.insert(*id) {
            return Err(invalid(format!("order lists node {id} twice")));
        }
    }
    let top_level = document.nodes.values().filter(|n| n.is_top_level()).count();
    if top_level != seen.len() {
        return Err(invalid("top-level nodes missing from order"));
    }
    Ok(())
}

fn validate_relationships(document: &NotebookDocument) -> StoreResult<()> {
    for (key, rel) in &document.relationships {
        if *key != rel.id {
            return Err(invalid(format!("relationship key {key} holds {}", rel.id)));
        }
        if rel.id.get() == 0 || rel.id.get() >= document.next_id {
            return Err(invalid(format!("relationship id {} outside 1..{}", rel.id, document.next_id)));
        }
        for endpoint in [rel.from_id, rel.to_id] {
            if !document.nodes.contains_key(&endpoint) {
                return Err(invalid(format!("relationship {} has missing endpoint {endpoint}", rel.id)));
            }
        }
    }
    Ok(())
}
