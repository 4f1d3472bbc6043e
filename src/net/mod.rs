//! TCP transport: frame codec and identity-addressed peers

pub mod frame;
pub mod peers;

pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use peers::{serve_peers, Inbound, PeerId, PeerRegistry};
