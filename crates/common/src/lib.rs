// scriptum-common: shared types and utilities for the Scriptum workspace

pub mod canon;
pub mod json;
pub mod text;
pub mod types;
