//! Memory management for thread stacks and thread-local storage.

pub mod stack;
pub mod tls;

pub use stack::StackRegion;
pub use tls::TlsTemplate;
