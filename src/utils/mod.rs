//! Backends and helpers: in-memory store, fixed-rate conversion, sequence
//! numbering and line validation

pub mod fixed_rates;
pub mod memory_store;
pub mod sequences;
pub mod validation;

pub use fixed_rates::FixedRateConverter;
pub use memory_store::MemoryStore;
pub use sequences::SimpleSequences;
