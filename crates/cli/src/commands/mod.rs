//! Command handlers for the Market Brief CLI.

pub mod ask;
pub mod index;

pub use ask::AskCommand;
pub use index::IndexCommand;
