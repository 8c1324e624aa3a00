//! End-to-end notebook scenarios through the registry

use mathnb_core::{ApplyOptions, NotebookConfig, NotebookError, NotebookRegistry, NotebookSession, ObserverFactory};
use mathnb_store::{ChangeRequest, InsertNode, NodeId, Position, RelationshipRole, Role};
use mathnb_symbol::{current_links, recompute_all, symbol_observer};
use mathnb_test_utils::{children_with_role, formulas, hint, ping_pong_observer, plot_observer, triples};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

fn open() -> Arc<NotebookSession> {
    NotebookRegistry::default().open("scenario").unwrap()
}

fn insert_all(session: &NotebookSession, texts: &[&str]) -> Vec<NodeId> {
    session.apply(&formulas(texts), ApplyOptions::tracked()).unwrap();
    session.read(|nb| nb.top_level_order().to_vec())
}

fn links(session: &NotebookSession) -> BTreeSet<(NodeId, NodeId, RelationshipRole)> {
    session.read(triples)
}

#[test]
fn use_after_definition_depends_on_it() {
    let session = open();
    let ids = insert_all(&session, &["X = 4", "X + Y"]);
    assert_eq!(
        links(&session),
        BTreeSet::from([(ids[0], ids[1], RelationshipRole::SymbolDependency)])
    );
}

#[test]
fn redefinitions_chain_and_deletion_bridges_them() {
    let session = open();
    let ids = insert_all(&session, &["X = 4", "X = 5", "X = 6", "Y = X^2"]);
    assert_eq!(
        links(&session),
        BTreeSet::from([
            (ids[0], ids[1], RelationshipRole::DuplicateDefinition),
            (ids[1], ids[2], RelationshipRole::DuplicateDefinition),
            (ids[2], ids[3], RelationshipRole::SymbolDependency),
        ])
    );

    session
        .apply(&[ChangeRequest::delete(ids[1])], ApplyOptions::tracked())
        .unwrap();
    assert_eq!(
        links(&session),
        BTreeSet::from([
            (ids[0], ids[2], RelationshipRole::DuplicateDefinition),
            (ids[2], ids[3], RelationshipRole::SymbolDependency),
        ])
    );

    session
        .apply(&[ChangeRequest::move_to(ids[3], Position::Top)], ApplyOptions::tracked())
        .unwrap();
    assert_eq!(
        links(&session),
        BTreeSet::from([(ids[0], ids[2], RelationshipRole::DuplicateDefinition)])
    );
    assert!(session.read(|nb| current_links(nb) == recompute_all(nb)));
}

#[test]
fn inverse_restores_serialized_form() {
    let session = open();
    insert_all(&session, &["X = 4"]);
    let before: Value = serde_json::from_str(&session.to_json().unwrap()).unwrap();

    let response = session
        .apply(&[InsertNode::formula("X + 1").into()], ApplyOptions::tracked())
        .unwrap();
    let inverse = response.inverse.unwrap();
    session.apply(&inverse, ApplyOptions::untracked()).unwrap();

    let mut after: Value = serde_json::from_str(&session.to_json().unwrap()).unwrap();
    // ids are never reused, so only the counter moved
    assert!(after["nextId"].as_u64() > before["nextId"].as_u64());
    after["nextId"] = before["nextId"].clone();
    assert_eq!(after, before);
}

#[test]
fn undo_redo_walk_history() {
    let session = open();
    let ids = insert_all(&session, &["X = 4", "X + 1"]);
    let full = session.snapshot();
    session
        .apply(&[ChangeRequest::delete(ids[0])], ApplyOptions::tracked())
        .unwrap();
    assert!(links(&session).is_empty());

    session.undo().unwrap().unwrap();
    assert!(session.snapshot().same_content(&full));
    session.undo().unwrap().unwrap();
    assert!(session.read(|nb| nb.is_empty()));
    assert!(session.undo().unwrap().is_none());

    session.redo().unwrap().unwrap();
    assert!(session.snapshot().same_content(&full));
    session.redo().unwrap().unwrap();
    assert!(links(&session).is_empty());
    assert!(!session.can_redo());
}

#[test]
fn structural_error_leaves_document_unchanged() {
    let session = open();
    insert_all(&session, &["X = 4"]);
    let before = session.to_json().unwrap();

    let error = session
        .apply(
            &[
                InsertNode::formula("X + 1").into(),
                ChangeRequest::move_to(NodeId(4242), Position::Top),
            ],
            ApplyOptions::tracked(),
        )
        .unwrap_err();
    assert!(error.is_structural());
    assert_eq!(session.to_json().unwrap(), before);
}

#[test]
fn runaway_observer_is_reported() {
    let registry = NotebookRegistry::with_observers(
        NotebookConfig::default().with_max_sync_passes(12),
        vec![Arc::new(ping_pong_observer) as ObserverFactory],
    );
    let session = registry.open("loop").unwrap();
    let error = session.apply(&[hint("ping")], ApplyOptions::tracked()).unwrap_err();
    assert!(matches!(error, NotebookError::NonConvergence { passes: 12 }));
    assert!(error.is_fatal());
    assert!(session.read(|nb| nb.is_empty()));
}

#[test]
fn tool_use_is_undoable() {
    let registry = NotebookRegistry::with_observers(
        NotebookConfig::default(),
        vec![Arc::new(symbol_observer) as ObserverFactory, Arc::new(plot_observer)],
    );
    let session = registry.open("plots").unwrap();
    let formula = insert_all(&session, &["sin(x)"])[0];
    let tool = session.read(|nb| {
        nb.children_of(formula)
            .find(|n| n.role == Role::Tool)
            .map(|n| n.id)
            .unwrap()
    });

    session.use_tool(tool).unwrap();
    assert_eq!(
        session.read(|nb| children_with_role(nb, formula, Role::Exposition)),
        vec![Value::from("plot of sin(x)")]
    );

    session.undo().unwrap();
    assert!(session.read(|nb| children_with_role(nb, formula, Role::Exposition)).is_empty());

    assert!(matches!(
        session.use_tool(formula),
        Err(NotebookError::ToolNotAvailable(id)) if id == formula
    ));
}

#[test]
fn recompute_repairs_loaded_documents() {
    let source = open();
    insert_all(&source, &["X = 1", "X * 2"]);
    let mut document = source.snapshot().to_document();
    document.relationships.clear();
    let json = serde_json::to_string(&document).unwrap();

    let registry = NotebookRegistry::default();
    let session = registry.open_document("loaded", &json).unwrap();
    assert!(links(&session).is_empty());
    session.rederive().unwrap();
    assert_eq!(links(&session).len(), 1);
    assert!(session.read(|nb| current_links(nb) == recompute_all(nb)));
}
