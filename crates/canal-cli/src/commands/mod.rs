pub mod completions;
pub mod config;
pub mod graph;
pub mod hydraulics;
pub mod optimize;
pub mod route;
