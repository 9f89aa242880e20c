//! # Recmux Core
//!
//! Core types and utilities for the recmux muxing library.
//!
//! This crate provides the building blocks shared by the container
//! writers:
//! - Error handling types
//! - Media buffer abstractions for encoded frames
//! - Track format descriptions
//! - The media source trait implemented by frame producers

pub mod buffer;
pub mod error;
pub mod format;
pub mod source;

pub use buffer::{BufferFlags, MediaBuffer};
pub use error::{Error, Result};
pub use format::{Codec, TrackFormat};
pub use source::MediaSource;
