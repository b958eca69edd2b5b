//! Data models for the dispatch application.
//!
//! Records serialize camelCase for the front-end and are mapped from
//! snake_case wire rows by one total function per entity.

mod invoice;
mod job;
mod notification;
mod profile;
pub mod wire;

pub use invoice::*;
pub use job::*;
pub use notification::*;
pub use profile::*;
