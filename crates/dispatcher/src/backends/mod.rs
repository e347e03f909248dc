//! Backend implementations
//!
//! Contains LogBackend, FileBackend, TcpBackend and MemoryBackend.

mod file;
mod log;
mod memory;
mod tcp;

pub use self::file::{FileBackend, FileBackendConfig};
pub use self::log::LogBackend;
pub use self::memory::MemoryBackend;
pub use self::tcp::{TcpBackend, TcpBackendConfig, WireFormat};
