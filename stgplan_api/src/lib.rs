//! Model crate of the storage planner: stable device identities, block
//! regions, the device/holder graph and the per-kind policies that are pure
//! functions of that graph.

pub mod constants;
pub mod devicegraph;
pub mod error;
pub mod primitives;

pub use devicegraph::{sid::Sid, Devicegraph};
