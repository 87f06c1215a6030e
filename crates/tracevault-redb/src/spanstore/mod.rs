//! Span storage on the embedded engine

pub mod cache;
pub mod reader;
pub mod writer;

pub use cache::CacheStore;
pub use reader::SpanReader;
pub use writer::SpanWriter;
