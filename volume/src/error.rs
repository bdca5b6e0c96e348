use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{len} bytes at offset {offset} run past the end of the medium ({size} bytes)")]
    EndOfMedium { offset: u64, len: usize, size: u64 },
    #[cfg(feature = "std")]
    #[error("i/o failure at offset {offset}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}
