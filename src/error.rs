use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("{0} contains no audio")]
    Empty(PathBuf),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SliceError {
    #[error("expected 16 slices, got {0}")]
    Count(usize),

    #[error("slice {index} does not start where the previous slice ends")]
    Gap { index: usize },

    #[error("slice {index} has a negative or non-finite length")]
    Inverted { index: usize },

    #[error("slice {index} ends past the loaded sample")]
    OutOfBuffer { index: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
