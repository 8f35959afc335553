//! Rewriter backends

pub mod native;
pub mod tool;
