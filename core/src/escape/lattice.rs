use std::fmt;

use serde::Serialize;

/// How far the reachability of a value extends.
///
/// `NoEscape < ArgEscape < GlobalEscape`; `Unknown` is the state of a node
/// nothing has been learned about yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeState {
    /// Confined to the allocating scope.
    NoEscape,
    /// Reachable from a caller-provided argument.
    ArgEscape,
    /// Reachable from anywhere: heap, globals, return value, other frames.
    GlobalEscape,
    #[default]
    Unknown,
}

impl EscapeState {
    /// Documented numeric rank; `Unknown` ranks highest.
    pub const fn rank(self) -> u8 {
        match self {
            EscapeState::NoEscape => 0,
            EscapeState::ArgEscape => 1,
            EscapeState::GlobalEscape => 2,
            EscapeState::Unknown => 3,
        }
    }

    /// Position in the lattice used by [`EscapeState::merge`], `Unknown` at the bottom.
    pub const fn height(self) -> u8 {
        match self {
            EscapeState::Unknown => 0,
            EscapeState::NoEscape => 1,
            EscapeState::ArgEscape => 2,
            EscapeState::GlobalEscape => 3,
        }
    }

    /// Least upper bound with `Unknown` as the neutral element.
    pub fn merge(self, other: EscapeState) -> EscapeState {
        if self.height() >= other.height() { self } else { other }
    }

    /// Maximum by [`EscapeState::rank`], so `Unknown` absorbs everything.
    pub fn merge_ranked(self, other: EscapeState) -> EscapeState {
        if self.rank() >= other.rank() { self } else { other }
    }

    pub fn merge_with(self, other: EscapeState, unknown_is_bottom: bool) -> EscapeState {
        if unknown_is_bottom {
            self.merge(other)
        } else {
            self.merge_ranked(other)
        }
    }

    pub fn is_escaping(self) -> bool {
        matches!(self, EscapeState::ArgEscape | EscapeState::GlobalEscape)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EscapeState::NoEscape => "NoEscape",
            EscapeState::ArgEscape => "ArgEscape",
            EscapeState::GlobalEscape => "GlobalEscape",
            EscapeState::Unknown => "Unknown",
        }
    }

    pub const ALL: [EscapeState; 4] = [
        EscapeState::NoEscape,
        EscapeState::ArgEscape,
        EscapeState::GlobalEscape,
        EscapeState::Unknown,
    ];
}

impl fmt::Display for EscapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_commutative_and_idempotent() {
        for a in EscapeState::ALL {
            assert_eq!(a.merge(a), a);
            assert_eq!(a.merge_ranked(a), a);
            for b in EscapeState::ALL {
                assert_eq!(a.merge(b), b.merge(a), "{a} vs {b}");
                assert_eq!(a.merge_ranked(b), b.merge_ranked(a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn merge_is_associative() {
        for a in EscapeState::ALL {
            for b in EscapeState::ALL {
                for c in EscapeState::ALL {
                    assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
                }
            }
        }
    }

    #[test]
    fn global_escape_dominates_known_states() {
        assert_eq!(
            EscapeState::NoEscape.merge(EscapeState::GlobalEscape),
            EscapeState::GlobalEscape
        );
        assert_eq!(
            EscapeState::ArgEscape.merge(EscapeState::NoEscape),
            EscapeState::ArgEscape
        );
        assert_eq!(
            EscapeState::NoEscape.merge_ranked(EscapeState::GlobalEscape),
            EscapeState::GlobalEscape
        );
    }

    #[test]
    fn unknown_is_neutral_under_merge_but_absorbing_by_rank() {
        for s in EscapeState::ALL {
            assert_eq!(s.merge(EscapeState::Unknown), s);
            assert_eq!(s.merge_ranked(EscapeState::Unknown), EscapeState::Unknown);
        }
    }

    #[test]
    fn merge_never_lowers_height() {
        for a in EscapeState::ALL {
            for b in EscapeState::ALL {
                assert!(a.merge(b).height() >= a.height());
                assert!(a.merge_ranked(b).rank() >= a.rank());
            }
        }
    }

    #[test]
    fn ranks_follow_documented_order() {
        let ranks: Vec<u8> = EscapeState::ALL.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(!EscapeState::NoEscape.is_escaping());
        assert!(EscapeState::ArgEscape.is_escaping());
        assert!(!EscapeState::Unknown.is_escaping());
    }
}
