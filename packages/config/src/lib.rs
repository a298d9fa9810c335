// ABOUTME: Shared configuration surface for the HackLens execution engine
// ABOUTME: Re-exports environment variable names so every crate reads the same knobs

pub mod constants;

pub use constants::*;
