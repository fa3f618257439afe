//! Group lifecycle state machine.
//!
//! States are strictly monotonic; a group never regresses. Each transition
//! past `Full` is driven by exactly one idempotent, crash-resumable phase,
//! and is persisted to the registry before the next phase begins.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum GroupState {
    /// Accepting blocks.
    Writable = 0,
    /// Size cap reached; no further blocks accepted.
    Full = 1,
    /// Static hash table built and valid.
    BsstExists = 2,
    /// Mutable index dropped; the static table is the only index.
    LevelIndexDropped = 3,
    /// DAG layer files generated.
    VrcarDone = 4,
    /// Piece commitment computed and persisted.
    HasCommP = 5,
    /// Handed to the deal placement client.
    DealsInProgress = 6,
    /// Terminal: local payload data released.
    Offloaded = 7,
    /// Terminal: unrecoverable failure.
    Failed = 8,
}

impl GroupState {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        use GroupState::*;
        Some(match v {
            0 => Writable,
            1 => Full,
            2 => BsstExists,
            3 => LevelIndexDropped,
            4 => VrcarDone,
            5 => HasCommP,
            6 => DealsInProgress,
            7 => Offloaded,
            8 => Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, GroupState::Offloaded | GroupState::Failed)
    }

    /// Whether the mutable index is still the live index.
    pub fn uses_mutable_index(self) -> bool {
        self <= GroupState::Full
    }

    /// A transition is legal if it moves strictly forward from a
    /// non-terminal state. `Failed` is reachable from anywhere but another
    /// terminal state.
    pub fn can_advance_to(self, next: GroupState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == GroupState::Failed {
            return true;
        }
        next > self
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupState::Writable => "writable",
            GroupState::Full => "full",
            GroupState::BsstExists => "bsst-exists",
            GroupState::LevelIndexDropped => "level-index-dropped",
            GroupState::VrcarDone => "vrcar-done",
            GroupState::HasCommP => "has-commp",
            GroupState::DealsInProgress => "deals-in-progress",
            GroupState::Offloaded => "offloaded",
            GroupState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_monotonic() {
        use GroupState::*;
        assert!(Writable.can_advance_to(Full));
        assert!(Full.can_advance_to(BsstExists));
        assert!(BsstExists.can_advance_to(LevelIndexDropped));
        assert!(LevelIndexDropped.can_advance_to(VrcarDone));
        assert!(VrcarDone.can_advance_to(HasCommP));
        assert!(HasCommP.can_advance_to(DealsInProgress));
        assert!(DealsInProgress.can_advance_to(Offloaded));

        assert!(!Full.can_advance_to(Writable));
        assert!(!Full.can_advance_to(Full));
        assert!(!Offloaded.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(DealsInProgress));
        assert!(Writable.can_advance_to(Failed));
    }

    #[test]
    fn u32_roundtrip() {
        for v in 0..=8u32 {
            let s = GroupState::from_u32(v).unwrap();
            assert_eq!(s.to_u32(), v);
        }
        assert!(GroupState::from_u32(9).is_none());
    }
}
