//! Per-torrent state: the piece picker, the peer arena and the effects of
//! every peer-wire message on them.

mod context;
mod driver;
mod handle;
mod session;

pub use context::{SharedTorrent, TorrentContext, TorrentEvent};
pub use driver::run_peer;
pub use session::{ChokingState, PeerSession, PeerTable};
