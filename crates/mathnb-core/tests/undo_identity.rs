//! Undo identity and recompute equivalence over random edit sequences

use mathnb_core::{ApplyOptions, NotebookRegistry, NotebookSession};
use mathnb_store::{ChangeRequest, InsertNode, Notebook, Position};
use mathnb_symbol::{current_links, recompute_all};
use proptest::prelude::*;
use serde_json::json;

const TEXTS: &[&str] = &["X = 1", "X = 2", "Y = X + 1", "X + Y", "Z = Y", "Y", "sin(X)", "1 + 1"];

#[derive(Debug, Clone)]
enum Op {
    Insert { texts: Vec<usize>, after: Option<usize> },
    Delete(usize),
    Move { node: usize, after: Option<usize> },
    Change { node: usize, text: usize },
    Convert(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let text = 0..TEXTS.len();
    prop_oneof![
        3 => (proptest::collection::vec(text.clone(), 1..3), proptest::option::of(0..10usize))
            .prop_map(|(texts, after)| Op::Insert { texts, after }),
        1 => (0..10usize).prop_map(Op::Delete),
        2 => (0..10usize, proptest::option::of(0..10usize))
            .prop_map(|(node, after)| Op::Move { node, after }),
        2 => (0..10usize, text).prop_map(|(node, text)| Op::Change { node, text }),
        1 => (0..10usize).prop_map(Op::Convert),
    ]
}

fn batch(notebook: &Notebook, op: &Op) -> Option<Vec<ChangeRequest>> {
    let tops = notebook.top_level_order();
    let pick = |i: usize| (!tops.is_empty()).then(|| tops[i % tops.len()]);
    Some(match op {
        Op::Insert { texts, after } => {
            let position = after.and_then(pick).map_or(Position::Bottom, Position::After);
            texts
                .iter()
                .map(|&t| InsertNode::formula(TEXTS[t]).at(position).into())
                .collect()
        }
        Op::Delete(node) => vec![ChangeRequest::delete(pick(*node)?)],
        Op::Move { node, after } => {
            let node = pick(*node)?;
            let position = match after.and_then(pick) {
                Some(anchor) if anchor != node => Position::After(anchor),
                _ => Position::Top,
            };
            vec![ChangeRequest::move_to(node, position)]
        }
        Op::Change { node, text } => vec![ChangeRequest::change(pick(*node)?, json!(TEXTS[*text]))],
        Op::Convert(node) => vec![ChangeRequest::ConvertNode {
            node_id: pick(*node)?,
            role: mathnb_store::Role::Exposition,
            subrole: None,
            node_type: None,
            data: None,
        }],
    })
}

fn session() -> std::sync::Arc<NotebookSession> {
    NotebookRegistry::default().open("prop").unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_undo_restores_and_redo_replays(ops in proptest::collection::vec(op_strategy(), 1..20)) {
        let session = session();
        for op in &ops {
            let Some(requests) = batch(&session.snapshot(), op) else { continue };
            let before = session.snapshot();
            let response = session.apply(&requests, ApplyOptions::tracked()).unwrap();
            if response.events.is_empty() {
                continue;
            }
            let after = session.snapshot();

            session.undo().unwrap();
            prop_assert!(session.snapshot().same_content(&before));
            session.redo().unwrap();
            prop_assert!(session.snapshot().same_content(&after));
        }
    }

    #[test]
    fn prop_history_unwinds_to_empty(ops in proptest::collection::vec(op_strategy(), 1..15)) {
        let session = session();
        for op in &ops {
            let Some(requests) = batch(&session.snapshot(), op) else { continue };
            session.apply(&requests, ApplyOptions::tracked()).unwrap();
            prop_assert_eq!(session.read(current_links), session.read(recompute_all));
        }
        while session.undo().unwrap().is_some() {
            prop_assert_eq!(session.read(current_links), session.read(recompute_all));
        }
        prop_assert!(session.read(|nb| nb.is_empty()));
    }
}
