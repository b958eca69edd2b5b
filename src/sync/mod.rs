//! Realtime collection synchronizer.
//!
//! Reconciles a client-held, id-unique, sorted collection against an initial
//! bulk load, a live change-feed and local optimistic mutations. The merge
//! itself ([`reconcile`], [`apply_optimistic`]) is pure; [`Synchronizer`]
//! drives it from the remote store and feed.

mod collection;
mod context;
mod reconcile;
mod record;
mod synchronizer;

pub use collection::*;
pub use context::*;
pub use reconcile::*;
pub use record::*;
pub use synchronizer::*;
