//! Wire types (spec.md §4/§6): the JSON shape that crosses the transport
//! boundary. Everything upstream of this module deals in `TreeNode`/
//! `Decision`; this module is where those get packaged into the envelope
//! the browser client actually receives.

use serde::Serialize;
use serde_json::Value;

use crate::fragment::FragmentId;
use crate::strategy::Decision;

/// What the client should do with `data` (spec.md §3, §6). `Append` and
/// `Prepend` are carried for wire-format completeness — the Strategy
/// Selector never produces them today; see DESIGN.md's note on spec.md's
/// open question (b).
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Replace,
    Append,
    Prepend,
    Remove,
}

/// `{ "id": ..., "action": ..., "data": ... }` sent to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UpdateEnvelope {
    pub id: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Package a fragment's [`Decision`] into an envelope, or `None` if there is
/// nothing to send.
pub fn envelope_for(id: &FragmentId, decision: Decision) -> Option<UpdateEnvelope> {
    let (action, data) = match decision {
        Decision::NoChange => return None,
        Decision::TreeUpdate(value) => (Action::Replace, Some(value)),
        Decision::Replace(html) => (Action::Replace, Some(Value::String(html))),
        Decision::Remove => (Action::Remove, None),
    };
    Some(UpdateEnvelope {
        id: id.to_string(),
        action,
        data,
    })
}
