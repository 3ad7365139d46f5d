//! Database module: insert models and SQL repositories.
//!
//! - `model`: rows as the pipelines hand them over for insertion.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! The news and story tables live in separate SQLite files, each with its own
//! migration set.

pub mod model;
pub mod repo;

pub use model::{NewNewsRecord, NewScene, NewStory, StoryWithScenes};
pub use repo::*;
