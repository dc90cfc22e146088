mod pool;
mod reader;
mod writer;

pub use pool::BufferPool;
pub use reader::Reader;
pub use writer::Writer;
