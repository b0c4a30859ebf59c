pub mod coordinator;
pub mod error;
pub mod generator;
pub mod llm;
pub mod mock_data;
pub mod patch;
pub mod pipeline;
pub mod progress;
pub mod runs;
pub mod service;
pub mod store;
pub mod terminal;
pub mod tree;
