//! Proximity-pairing beacon pipeline.
//!
//! Advertisements flow through [`filter`], into the [`window`], the strongest
//! fresh beacon is decoded by [`decoder`] and lands in the [`state`] owned by
//! the [`session`].

pub mod decoder;
pub mod filter;
pub mod protocol;
pub mod session;
pub mod state;
pub mod window;
