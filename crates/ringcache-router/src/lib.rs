//! Routing of store commands to shards.
//!
//! [`CommandRouter`] accepts any store command, checks it against a static
//! table of command signatures, picks the shard owning its key through the
//! ring, and executes it there. Commands that have no key, or whose first
//! parameter is not a key, are rejected with a [`RoutingError`] before any
//! I/O; use [`CommandRouter::direct`] for those.

mod commands;
mod error;
mod router;

pub use commands::{
    EXCLUDED, KEY_PARAMETERS, ROUTABLE_WITHOUT_KEY, check_routable, command_function_name,
    first_parameter,
};
pub use error::{RouterError, RoutingError};
pub use router::CommandRouter;
