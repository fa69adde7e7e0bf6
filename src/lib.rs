//! Fixture addressing engine: normalize MVR/CSV/MA3 fixture lists, match
//! them to GDTF profiles, organise Master/Remote groups with sequence
//! numbers, resolve per-attribute DMX addresses and export the result.

pub mod addressing;
pub mod error;
pub mod export;
pub mod grouping;
pub mod import;
pub mod matcher;
pub mod model;
pub mod project;
pub mod session;
pub mod settings;

pub use error::EngineError;
pub use session::Session;
