//! Checkpoint persistence, output files and keyword lists.

pub mod checkpoint;
pub mod keywords;
pub mod sink;

pub use checkpoint::{
    file_stem, Checkpoint, CheckpointError, CheckpointStatus, CheckpointStore,
    FileCheckpointStore, MemoryCheckpointStore,
};
pub use keywords::{dedup_keywords, gather_keywords, load_keywords, write_keywords};
pub use sink::{
    read_table, series_file_name, series_to_csv, write_series, DataTable, OutputFormat, SinkError,
};
