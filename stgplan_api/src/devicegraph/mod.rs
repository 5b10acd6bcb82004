//! # Devicegraph
//!
//! The devicegraph stores devices as vertices and holders as edges of a
//! petgraph `StableGraph`. Vertices are addressed by their `Sid` only; the
//! petgraph indices never leave this module.
//!
//! Edges point from the used device (the holder source) to the device using
//! it (the holder target), e.g. from a partition to the MD array the
//! partition is a member of.

pub mod cardinality;
pub mod check;
pub mod device;
pub mod graph;
pub mod holder;
pub mod md;
pub mod names;
pub mod persist;
pub mod sid;
pub mod types;

pub use device::{Device, DeviceData};
pub use graph::Devicegraph;
pub use holder::{Holder, HolderKind};
pub use types::DeviceKind;
