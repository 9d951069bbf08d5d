//! Crate-level error type.
//!
//! `K`/`V` are plain generic parameters rather than nullable references,
//! so the "null key or value" argument error from the source design has
//! no analog here — the type system already forbids it. What remains
//! representable is reentrant callback misuse and a poisoned map.

/// Errors surfaced at the public boundary.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// A `compute`/`compute_if_absent`/`compute_if_present`/`merge`
    /// callback attempted to call back into the map for the same key
    /// on the same thread while the bin lock it needs is already held
    /// by that thread. Detected best-effort via a thread-local
    /// in-flight-key marker; not a full reentrancy detector.
    #[error("reentrant call into the map from within a compute/merge callback for the same key")]
    Reentrant,

    /// An internal invariant (a forwarding pointer into a freed table, a
    /// tree bin that failed red-black validation) was observed broken.
    /// The map does not attempt to repair itself past this point.
    #[error("map invariant violated, map is poisoned: {0}")]
    Poisoned(&'static str),
}

/// Result alias for the fallible corners of the public surface.
pub type MapResult<T> = Result<T, MapError>;
