pub mod backend;
pub mod control;
pub mod persistence;
pub mod reconcile;
pub mod types;
