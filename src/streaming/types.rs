use serde::{Deserialize, Serialize};

use crate::records::{EntityKind, RemoteRow};

/// Kind of row change announced by a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeOp::Insert),
            "UPDATE" => Some(ChangeOp::Update),
            "DELETE" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

/// A server-originated change. For deletes the payload is the old row (at
/// least its `id`).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub op: ChangeOp,
    pub kind: EntityKind,
    pub payload: RemoteRow,
}
