//! Audio playback system.
//!
//! The engine runs on its own thread and owns decoding and output. The
//! handler connects it to the player controller and to the output backends,
//! which are built on cpal with an rtrb ring buffer and fed by symphonia.

pub mod buffer;
pub mod cpal_output;
pub mod decoder;
pub mod engine;
pub mod handler;
pub mod output;
pub mod registry;
pub mod renderer;

#[cfg(test)]
mod handler_tests;
#[cfg(test)]
mod test_support;
