//! CSV tables and SVG diagnostics written by the pipeline.

pub mod plots;
pub mod svg;
pub mod tables;
