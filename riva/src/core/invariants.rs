//! Structural invariants of an intention tree that JSON Schema cannot express.

use crate::core::tree::{Intention, IntentionId, IntentionTree};
use crate::core::types::IntentionStatus;

/// Check tree invariants, returning one stable message per violation:
/// - node ids match their arena index; exactly one root, at index 0
/// - parent and child links agree and point at existing nodes
/// - `depth == parent.depth + 1`
/// - pending nodes have no trace and no children
/// - verified nodes end on a successful cycle (leaf) or have only verified children
/// - `verified_at` is set exactly on verified nodes
/// - siblings after a failed child were never driven
pub fn validate_invariants(tree: &IntentionTree) -> Vec<String> {
    let mut errors = Vec::new();
    let nodes = tree.nodes();

    match nodes.first() {
        None => {
            errors.push("tree has no root".to_string());
            return errors;
        }
        Some(root) => {
            if root.parent.is_some() {
                errors.push(format!("{}: root must not have a parent", root.id));
            }
            if root.depth != 0 {
                errors.push(format!("{}: root depth must be 0", root.id));
            }
        }
    }

    for (index, node) in nodes.iter().enumerate() {
        if node.id.index() != index {
            errors.push(format!("{}: stored at index {}", node.id, index));
        }
        if index > 0 {
            validate_parent_link(tree, node, &mut errors);
        }
        validate_children(tree, node, &mut errors);
        validate_status(tree, node, &mut errors);
    }
    errors
}

fn validate_parent_link(tree: &IntentionTree, node: &Intention, errors: &mut Vec<String>) {
    let Some(parent_id) = node.parent else {
        errors.push(format!("{}: non-root node has no parent", node.id));
        return;
    };
    match tree.get(parent_id) {
        Ok(parent) => {
            if !parent.children.contains(&node.id) {
                errors.push(format!(
                    "{}: parent {} does not list it as a child",
                    node.id, parent_id
                ));
            }
            if node.depth != parent.depth + 1 {
                errors.push(format!(
                    "{}: depth {} but parent depth is {}",
                    node.id, node.depth, parent.depth
                ));
            }
        }
        Err(_) => errors.push(format!("{}: parent {} does not exist", node.id, parent_id)),
    }
}

fn validate_children(tree: &IntentionTree, node: &Intention, errors: &mut Vec<String>) {
    let mut failed_seen: Option<IntentionId> = None;
    for child_id in &node.children {
        let Ok(child) = tree.get(*child_id) else {
            errors.push(format!("{}: child {} does not exist", node.id, child_id));
            continue;
        };
        if child.parent != Some(node.id) {
            errors.push(format!(
                "{}: child {} names a different parent",
                node.id, child_id
            ));
        }
        if let Some(failed) = failed_seen
            && child.status != IntentionStatus::Pending
        {
            errors.push(format!(
                "{}: child {} was driven after failed sibling {}",
                node.id, child_id, failed
            ));
        }
        if child.status == IntentionStatus::Failed && failed_seen.is_none() {
            failed_seen = Some(*child_id);
        }
    }
}

fn validate_status(tree: &IntentionTree, node: &Intention, errors: &mut Vec<String>) {
    match node.status {
        IntentionStatus::Pending => {
            if !node.trace.is_empty() || !node.children.is_empty() {
                errors.push(format!("{}: pending node has work recorded", node.id));
            }
        }
        IntentionStatus::Verified => {
            if node.children.is_empty() {
                let ends_in_success = node
                    .last_cycle()
                    .is_some_and(|cycle| cycle.judgment.is_success());
                if !ends_in_success {
                    errors.push(format!(
                        "{}: verified leaf does not end in a successful cycle",
                        node.id
                    ));
                }
            } else {
                let all_verified = node.children.iter().all(|id| {
                    tree.get(*id)
                        .is_ok_and(|child| child.status == IntentionStatus::Verified)
                });
                if !all_verified {
                    errors.push(format!(
                        "{}: verified node has unverified children",
                        node.id
                    ));
                }
            }
        }
        IntentionStatus::Active | IntentionStatus::Failed => {}
    }

    let verified = node.status == IntentionStatus::Verified;
    if verified != node.verified_at.is_some() {
        errors.push(format!(
            "{}: verified_at must be set exactly when verified",
            node.id
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, ActionResult, CycleDraft, IntentionDraft, Judgment};

    fn success_cycle() -> crate::core::types::Cycle {
        CycleDraft {
            thought: "go".to_string(),
            action: Action::command("true"),
            result: ActionResult::ok(""),
            evaluated: Judgment::Success,
        }
        .finish(Judgment::Success)
    }

    fn activate(tree: &mut IntentionTree, id: IntentionId) {
        tree.transition(id, IntentionStatus::Active).expect("activate");
    }

    #[test]
    fn fresh_tree_is_valid() {
        let tree = IntentionTree::new("goal", "goal exists");
        assert!(validate_invariants(&tree).is_empty());
    }

    #[test]
    fn verified_leaf_needs_successful_cycle() {
        let mut tree = IntentionTree::new("goal", "goal exists");
        activate(&mut tree, IntentionId::ROOT);
        tree.transition(IntentionId::ROOT, IntentionStatus::Verified)
            .expect("verify");
        let errors = validate_invariants(&tree);
        assert_eq!(
            errors,
            vec!["int-0000: verified leaf does not end in a successful cycle".to_string()]
        );

        let mut tree = IntentionTree::new("goal", "goal exists");
        activate(&mut tree, IntentionId::ROOT);
        tree.append_cycle(IntentionId::ROOT, success_cycle())
            .expect("append");
        tree.transition(IntentionId::ROOT, IntentionStatus::Verified)
            .expect("verify");
        assert!(validate_invariants(&tree).is_empty());
    }

    #[test]
    fn sibling_after_failed_child_must_stay_pending() {
        let mut tree = IntentionTree::new("goal", "goal exists");
        activate(&mut tree, IntentionId::ROOT);
        let a = tree
            .add_child(IntentionId::ROOT, IntentionDraft::new("a a", "a exists"))
            .expect("a");
        let b = tree
            .add_child(IntentionId::ROOT, IntentionDraft::new("b b", "b exists"))
            .expect("b");
        activate(&mut tree, a);
        tree.transition(a, IntentionStatus::Failed).expect("fail a");
        assert!(validate_invariants(&tree).is_empty());

        activate(&mut tree, b);
        let errors = validate_invariants(&tree);
        assert_eq!(
            errors,
            vec!["int-0000: child int-0002 was driven after failed sibling int-0001".to_string()]
        );
    }

    #[test]
    fn tampered_links_are_reported() {
        let mut tree = IntentionTree::new("goal", "goal exists");
        tree.add_child(IntentionId::ROOT, IntentionDraft::new("a a", "a exists"))
            .expect("a");
        let mut value = serde_json::to_value(&tree).expect("serialize");
        value["nodes"][1]["depth"] = serde_json::json!(4);
        value["nodes"][0]["children"] = serde_json::json!([]);
        let tampered: IntentionTree = serde_json::from_value(value).expect("deserialize");

        let errors = validate_invariants(&tampered);
        assert!(errors.contains(&"int-0001: parent int-0000 does not list it as a child".to_string()));
        assert!(errors.contains(&"int-0001: depth 4 but parent depth is 0".to_string()));
    }
}
