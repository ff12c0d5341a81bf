//! Side-effecting adapters: config, processes, dispatch, completion, and session files.

pub mod completion;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod session;
