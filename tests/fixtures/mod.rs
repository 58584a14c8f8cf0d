//! Test Fixtures Module
//!
//! - Audio fixtures (programmatically generated PCM16)
//! - Bridge fixtures (a bridge wired to in-memory channels, frame builders)

// Allow dead code in test fixtures - each test binary uses a subset
#![allow(dead_code)]

pub mod audio_fixtures;
pub mod bridge_fixtures;

pub use audio_fixtures::*;
pub use bridge_fixtures::*;
