//! Consistent hashing ring and ring resolution.
//!
//! [`HashRing`] maps a key to one node address: the key's CRC-32 is placed
//! on the ring and the first virtual node strictly clockwise owns it,
//! wrapping to the lowest position past the end.
//!
//! [`RingResolver`] loads the ring from a hash record in the control store
//! and can publish or edit that record.

mod error;
mod resolver;
mod ring;

pub use error::PlacementError;
pub use resolver::RingResolver;
pub use ring::{HashRing, key_hash};
