//! Version-catalog builder: validation and model assembly.
//!
//! A catalog declares versions, library aliases, and bundles, either
//! programmatically or imported from a TOML catalog file, and builds into an
//! immutable model.

pub mod builder;
pub mod model;
pub mod parse;
