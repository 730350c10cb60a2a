//! Side-effecting collaborators: processes, sandbox, model backend, config.

pub mod analyzer;
pub mod backend;
pub mod config;
pub mod openai;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod transcript;
