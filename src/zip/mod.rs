mod extra;
mod inflate;
mod reader;
mod structures;
mod writer;

pub use extra::ExtendedTimestamps;
pub use reader::{BodyReader, DirectoryEntry, FileEntry, ZipEntry, ZipStreamReader};
pub use structures::CompressionMethod;
pub use writer::{WriteBody, WriteEntry, WriteOptions, ZipStreamWriter};
