//! Data-preparation stages for the design landscape: keyword scoring,
//! feature vectors, projection, canvas scaling, coloring and pruning, plus
//! the small URL collector used by the browser extension.

pub mod api_types;
pub mod collector;
pub mod color;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod postprocess;
pub mod project;
pub mod prune;
pub mod render;
pub mod scale;
pub mod scorer;
pub mod taxonomy;
pub mod vectorize;
pub mod viz_export;
