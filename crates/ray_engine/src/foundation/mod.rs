//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the crate:
//! - Math types and bounding boxes
//! - Collections for id-keyed lookups and inline stacks
//! - Logging utilities

pub mod math;
pub mod collections;
pub mod logging;
