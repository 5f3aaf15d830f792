//! Tree Differ (spec.md §4.5): compares two `TreeNode`s for the same
//! fragment and produces a sparse `TreeUpdate`, or `None` if nothing
//! changed. Deterministic and side-effect-free, as required.

use serde_json::Value;

use crate::tree::TreeNode;

/// Diff two trees, both produced for the same fragment. Returns `None`
/// when there is nothing to report (the caller should emit no envelope).
pub fn diff(old: &TreeNode, new: &TreeNode) -> Option<Value> {
    match (old, new) {
        (TreeNode::Static(a), TreeNode::Static(b)) => {
            if a == b {
                None
            } else {
                Some(Value::String(b.clone()))
            }
        }
        (
            TreeNode::Composite {
                s: s0,
                slots: slots0,
            },
            TreeNode::Composite {
                s: s1,
                slots: slots1,
            },
        ) => {
            if s0 != s1 {
                // Static skeleton changed: the client cache is stale, so
                // resync with a full dump rather than a sparse patch.
                return Some(new.to_wire_value());
            }
            let mut obj = serde_json::Map::new();
            for (i, (old_slot, new_slot)) in slots0.iter().zip(slots1.iter()).enumerate() {
                if let Some(slot_diff) = diff(old_slot, new_slot) {
                    obj.insert(i.to_string(), slot_diff);
                }
            }
            if obj.is_empty() {
                None
            } else {
                Some(Value::Object(obj))
            }
        }
        (
            TreeNode::Range {
                s: s0,
                items: items0,
            },
            TreeNode::Range {
                s: s1,
                items: items1,
            },
        ) => {
            if s0 != s1 {
                return Some(new.to_wire_value());
            }
            if items0.len() == items1.len() {
                let any_changed = items0
                    .iter()
                    .zip(items1.iter())
                    .any(|(o, n)| diff(o, n).is_some());
                if !any_changed {
                    return None;
                }
            }
            // Same-length-but-changed or differing-length: no incremental
            // row diffing, always the full new item array (spec.md §4.5).
            Some(Value::Array(
                items1.iter().map(TreeNode::to_wire_value).collect(),
            ))
        }
        // Branch-identity or node-kind mismatch: emit the new subtree whole.
        _ => Some(new.to_wire_value()),
    }
}
