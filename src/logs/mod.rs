pub mod buffer;
pub mod channel;
pub mod classify;
pub mod fanout;
pub mod history;
pub mod normalizer;
pub mod persistence;
pub mod types;
