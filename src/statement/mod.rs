//! Bank statement lifecycle management

pub mod lifecycle;

pub use lifecycle::StatementManager;
