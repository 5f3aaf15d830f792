//! Strategy Selector (spec.md §4.6): classifies a fragment as Tree-Based
//! capable or Fallback-only, and decides per-update whether to ship a tree
//! diff or a full-HTML replacement.

use serde_json::Value;

use crate::analysis::extractor::Dependencies;
use crate::diff;
use crate::tree::TreeNode;

/// Whether a fragment's AST is entirely made of node kinds the Tree
/// Renderer/Differ can represent sparsely, or contains something opaque
/// that can only ever be fully re-rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentCapability {
    TreeBased,
    Fallback,
}

/// A fragment is Tree-Based capable iff its AST contains none of `with`,
/// variable assignment, or an opaque (function-call) pipeline — exactly
/// what [`Dependencies::opaque`] already tracks.
pub fn classify(dependencies: &Dependencies) -> FragmentCapability {
    if dependencies.opaque {
        FragmentCapability::Fallback
    } else {
        FragmentCapability::TreeBased
    }
}

/// What to actually ship for one fragment's update.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoChange,
    TreeUpdate(Value),
    Replace(String),
    Remove,
}

/// Decide an update for one fragment, given its capability, whether it is a
/// root-level if-without-else (spec.md §4.6), and its old/new rendered
/// trees. `old`/`new` being `None` models the fragment's absence from the
/// tree enumeration (e.g. its governing span vanished at a level above
/// fragment granularity) rather than an empty render.
///
/// A root-level if-without-else never leaves the tree enumeration the way
/// a top-level fragment disappearing does — it always renders *some* tree,
/// just with an empty slot when its condition is false (see
/// `tree::render_nodes`'s `Node::If` arm). `root_conditional` lets this
/// function recognize that shape and still decide [`Decision::Remove`]/
/// [`Decision::Replace`] for the true→false/false→true transitions spec.md
/// §4.6 calls for, instead of only ever tree-diffing or no-change-ing it.
pub fn select_action(
    capability: FragmentCapability,
    root_conditional: bool,
    old: Option<&TreeNode>,
    new: Option<&TreeNode>,
) -> Decision {
    match (old, new) {
        (Some(_), None) => Decision::Remove,
        (None, Some(new_tree)) => Decision::Replace(new_tree.flatten()),
        (None, None) => Decision::NoChange,
        (Some(old_tree), Some(new_tree)) => {
            if root_conditional {
                if let Some(decision) = conditional_presence_decision(old_tree, new_tree) {
                    return decision;
                }
            }
            match capability {
                FragmentCapability::Fallback => {
                    let html = new_tree.flatten();
                    if old_tree.flatten() == html {
                        Decision::NoChange
                    } else {
                        Decision::Replace(html)
                    }
                }
                FragmentCapability::TreeBased => match diff::diff(old_tree, new_tree) {
                    None => Decision::NoChange,
                    Some(tree_update) => {
                        let full_html = new_tree.flatten();
                        let diff_size = serde_json::to_string(&tree_update)
                            .map(|s| s.len())
                            .unwrap_or(usize::MAX);
                        if diff_size < full_html.len() {
                            Decision::TreeUpdate(tree_update)
                        } else {
                            Decision::Replace(full_html)
                        }
                    }
                },
            }
        }
    }
}

/// For a root-level if-without-else's own tree (a one-slot `Composite`
/// whose slot is the branch's tree, `TreeNode::Static("")` when the
/// condition was false): detect a true→false or false→true transition and
/// return the corresponding presence-level decision. Returns `None` when
/// both renders were present or both were absent, leaving the ordinary
/// diff/no-change logic to handle content changes within an unchanged
/// presence state.
fn conditional_presence_decision(old: &TreeNode, new: &TreeNode) -> Option<Decision> {
    let (
        TreeNode::Composite {
            slots: old_slots, ..
        },
        TreeNode::Composite {
            slots: new_slots, ..
        },
    ) = (old, new)
    else {
        return None;
    };
    let (Some(old_branch), Some(new_branch)) = (old_slots.first(), new_slots.first()) else {
        return None;
    };
    let old_present = !matches!(old_branch, TreeNode::Static(s) if s.is_empty());
    let new_present = !matches!(new_branch, TreeNode::Static(s) if s.is_empty());
    match (old_present, new_present) {
        (true, false) => Some(Decision::Remove),
        (false, true) => Some(Decision::Replace(new.flatten())),
        _ => None,
    }
}
