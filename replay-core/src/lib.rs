/*! This library replays application command buffers on a GPU queue while
 *  measuring them. Every submission is re-recorded into command buffers
 *  owned by the queue, with counter, trace, timing and query samples
 *  inserted at draw, command buffer or frame granularity. Results are
 *  written out once the GPU has retired the work that produced them.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
    // Clashes with clippy::pattern_type_mismatch
    clippy::needless_borrowed_reference,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
)]

pub mod command;
pub mod counters;
pub mod device;
pub mod logging;
pub mod pool;
pub mod sampling;
pub mod settings;

pub use hal::{self, DeviceError};

/// Index of a fence-tracked native submission of a queue.
pub type SubmissionIndex = u64;
