//! Core domain types
//!
//! This module contains the core domain structures used across Lapse crates.
//! These types are shared between storage backends (for persistence) and the
//! scheduler (for execution).

pub mod job;
pub mod payload;
