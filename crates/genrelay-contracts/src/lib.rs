pub mod access;
pub mod adapters;
pub mod channels;
pub mod chat;
pub mod error;
pub mod events;
pub mod gate;
pub mod history;
pub mod job;
pub mod preferences;
pub mod surface;
pub mod tokens;

pub use error::{FailureKind, GenerationError};
