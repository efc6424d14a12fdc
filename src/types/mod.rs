//! Shared type definitions
//!
//! This module contains the data types shared by the engine layer and storage.

pub mod message;
pub mod model;
