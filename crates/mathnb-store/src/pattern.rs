//! Declarative node predicates
//!
//! A [`NodePattern`] constrains a node's role, subrole, type, source and
//! parent. Queries ([`crate::Notebook::find_nodes`]) and rule dispatch both
//! match through it.

use crate::node::{Node, NodeType, Role, Subrole};
use crate::notebook::Notebook;

/// Constraint on a node's parent
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParentScope {
    /// No constraint
    #[default]
    Any,
    /// Node must be top-level
    TopLevel,
    /// Parent must exist and match the nested pattern
    ChildOf(Box<NodePattern>),
}

/// Predicate over a node; unset fields match anything
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    /// Required role
    pub role: Option<Role>,
    /// Required subrole
    pub subrole: Option<Subrole>,
    /// Required payload type
    pub node_type: Option<NodeType>,
    /// Required source
    pub source: Option<String>,
    /// Parent constraint
    pub parent: ParentScope,
}

impl NodePattern {
    /// Pattern matching every node
    #[inline]
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern on role and payload type, the rule dispatch key
    #[inline]
    #[must_use]
    pub fn of(role: Role, node_type: NodeType) -> Self {
        Self {
            role: Some(role),
            node_type: Some(node_type),
            ..Self::default()
        }
    }

    /// Require role
    #[inline]
    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Require subrole
    #[inline]
    #[must_use]
    pub fn subrole(mut self, subrole: Subrole) -> Self {
        self.subrole = Some(subrole);
        self
    }

    /// Require payload type
    #[inline]
    #[must_use]
    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    /// Require source
    #[inline]
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Require a top-level node
    #[inline]
    #[must_use]
    pub fn top_level(mut self) -> Self {
        self.parent = ParentScope::TopLevel;
        self
    }

    /// Require a parent matching `parent`
    #[inline]
    #[must_use]
    pub fn child_of(mut self, parent: NodePattern) -> Self {
        self.parent = ParentScope::ChildOf(Box::new(parent));
        self
    }

    /// `(role, type)` pair when both are fixed
    #[inline]
    #[must_use]
    pub fn dispatch_key(&self) -> Option<(Role, NodeType)> {
        Some((self.role?, self.node_type?))
    }

    /// Match the node's own tags, ignoring the parent constraint
    #[must_use]
    pub fn matches_tags(&self, node: &Node) -> bool {
        self.role.map_or(true, |r| r == node.role)
            && self.subrole.map_or(true, |s| node.subrole == Some(s))
            && self.node_type.map_or(true, |t| t == node.node_type)
            && self.source.as_deref().map_or(true, |s| s == node.source)
    }

    /// Full match, resolving parents through `notebook`
    #[must_use]
    pub fn matches(&self, node: &Node, notebook: &Notebook) -> bool {
        if !self.matches_tags(node) {
            return false;
        }
        match &self.parent {
            ParentScope::Any => true,
            ParentScope::TopLevel => node.is_top_level(),
            ParentScope::ChildOf(parent) => notebook
                .node(node.parent_id)
                .is_some_and(|p| parent.matches(p, notebook)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::InsertNode;
    use crate::node::USER_SOURCE;
    use serde_json::json;

    #[test]
    fn tags_match_independently() {
        let mut notebook = Notebook::new();
        let (id, _) = notebook.insert(InsertNode::formula("X = 4")).unwrap();
        let node = notebook.node(id).unwrap();

        assert!(NodePattern::any().matches(node, &notebook));
        assert!(NodePattern::of(Role::Input, NodeType::Text).matches(node, &notebook));
        assert!(NodePattern::any().subrole(Subrole::Formula).matches(node, &notebook));
        assert!(NodePattern::any().source(USER_SOURCE).matches(node, &notebook));
        assert!(!NodePattern::any().role(Role::Hint).matches(node, &notebook));
        assert!(!NodePattern::any().source("CAS").matches(node, &notebook));
    }

    #[test]
    fn parent_scope_resolves_through_notebook() {
        let mut notebook = Notebook::new();
        let (formula, _) = notebook.insert(InsertNode::formula("X = 4")).unwrap();
        let (child, _) = notebook
            .insert(InsertNode::new(Role::Evaluation, NodeType::Text, json!("4")).child_of(formula))
            .unwrap();

        let child_node = notebook.node(child).unwrap();
        let under_formula = NodePattern::any()
            .role(Role::Evaluation)
            .child_of(NodePattern::any().subrole(Subrole::Formula));

        assert!(under_formula.matches(child_node, &notebook));
        assert!(!NodePattern::any().top_level().matches(child_node, &notebook));
        assert!(NodePattern::any()
            .top_level()
            .matches(notebook.node(formula).unwrap(), &notebook));
    }

    #[test]
    fn dispatch_key_requires_role_and_type() {
        assert_eq!(
            NodePattern::of(Role::Input, NodeType::Latex).dispatch_key(),
            Some((Role::Input, NodeType::Latex))
        );
        assert_eq!(NodePattern::any().role(Role::Input).dispatch_key(), None);
    }
}
