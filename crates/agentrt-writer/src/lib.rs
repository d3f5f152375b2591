//! Serialized concurrent SSE writer and the dialect-selecting output
//! façade.

pub mod facade;
pub mod sink;
pub mod writer;

pub use facade::{Accept, OutputFacade};
pub use sink::Sink;
pub use writer::SafeWriter;
