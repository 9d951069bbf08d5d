//! The crate's single module tree: striping, locking, bin storage, and
//! tree bins at the bottom; the lock-free traversal cursor above them;
//! the engine tying table lifecycle and resizing together; and the
//! public API and parallel bulk operations on top.

mod bin_lock;
mod counter;
mod forwarding;
mod node;
mod table;
mod tree;
mod tree_lock;

mod cursor;

mod base;
mod bulk;

pub mod config;
pub mod map;

pub use base::ConcurrentHashMap;
pub use config::Builder;
pub use map::{Iter, Keys, Values};
