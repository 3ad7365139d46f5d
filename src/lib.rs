pub mod api;
pub mod audio;
pub mod character;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod llm;
pub mod media;
pub mod model;
pub mod news;
pub mod pipeline;
pub mod storage;
pub mod task;
