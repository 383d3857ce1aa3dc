pub mod analysis;
pub mod cnf;
pub mod config;
pub mod error;
pub mod host;
pub mod notify;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod transport;
pub mod verify;

pub use error::{ParseError, Result, SatlinkError};
