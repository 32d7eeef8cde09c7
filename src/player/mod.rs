//! Player-facing transport control.

pub mod controller;
pub mod track;

pub use {
    controller::{PlayState, PlayerController, PlayerEvent},
    track::Track,
};
