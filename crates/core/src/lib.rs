//! Routing engine of the TinyHAL audio hardware layer
//!
//! Device masks, route tables loaded from XML, and the make-before-break
//! selection protocol that drives mixer controls.

pub mod domain;

pub use domain::*;
