//! Audio device implementation and concrete collaborators for TinyHAL

pub mod audio;

pub use audio::*;
