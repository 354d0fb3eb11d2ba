use crate::constants::{ENDGAME_DUPLICATES, MAX_REQUESTS_PER_PEER};

/// Switches for the piece selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceRequesterSettings {
    /// Order candidates by piece priority.
    pub allow_prioritisation: bool,
    /// Break ties randomly instead of by piece index.
    pub allow_randomised: bool,
    /// Prefer pieces held by fewer peers.
    pub allow_rarest_first: bool,
    /// Outstanding requests allowed per peer.
    pub max_requests_per_peer: usize,
    /// Peers a block may be outstanding to at once during endgame.
    pub endgame_duplicates: usize,
}

impl Default for PieceRequesterSettings {
    fn default() -> Self {
        Self {
            allow_prioritisation: true,
            allow_randomised: true,
            allow_rarest_first: true,
            max_requests_per_peer: MAX_REQUESTS_PER_PEER,
            endgame_duplicates: ENDGAME_DUPLICATES,
        }
    }
}

impl PieceRequesterSettings {
    pub fn with_prioritisation(mut self, enabled: bool) -> Self {
        self.allow_prioritisation = enabled;
        self
    }

    pub fn with_randomised(mut self, enabled: bool) -> Self {
        self.allow_randomised = enabled;
        self
    }

    pub fn with_rarest_first(mut self, enabled: bool) -> Self {
        self.allow_rarest_first = enabled;
        self
    }

    pub fn with_max_requests_per_peer(mut self, max: usize) -> Self {
        self.max_requests_per_peer = max;
        self
    }

    pub fn with_endgame_duplicates(mut self, max: usize) -> Self {
        self.endgame_duplicates = max;
        self
    }
}
