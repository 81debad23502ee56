//! Orbis Ethica peer-to-peer mesh.
//!
//! TCP links framed as `[u32 BE length][JSON]` plus a transport-agnostic
//! connection API the node's WebSocket endpoint reuses. Every message
//! travels in a signed envelope; gossip is loop-suppressed by a bounded
//! seen-cache and hop counts; sync follows the longest-valid-chain rule via
//! `GetBlocks` chunking.

pub mod framing;
pub mod mesh;
pub mod messages;
pub mod peers;
pub mod seen;

pub use framing::{recv_framed, send_framed, MAX_FRAME_BYTES};
pub use mesh::{ConnectionHandle, Mesh, MeshConfig};
pub use messages::{Envelope, NetMessage, PeerAddr};
pub use peers::{AddressBook, PeerInfo};
pub use seen::SeenCache;
