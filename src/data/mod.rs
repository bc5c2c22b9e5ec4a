//! Buffer transport between acquisition and sorting.
pub mod ring_buffer;
