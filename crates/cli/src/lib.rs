//! Support code for the `visual-regions` command-line tool

pub mod crop_store;
pub mod questions;

pub use crop_store::{CropStore, DirectoryCropStore, MatchRecord};
pub use questions::{load_questions, parse_questions};
