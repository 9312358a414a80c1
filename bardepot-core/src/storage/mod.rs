//! Time-partitioned parquet storage

pub mod backend;
pub mod config;
pub mod error;
pub mod incremental;
pub mod key;
pub mod lock;
pub mod metadata;
pub mod partition;
pub mod reader;
pub mod writer;

pub use backend::{Storage, StorageBackend, WriteInput, WriteReceipt};
pub use config::{Compression, Granularity, PartitionLevel, StorageConfig, StorageStrategy};
pub use error::{StorageError, StorageResult};
pub use incremental::{incremental_key, IncrementalStorage, CHUNKS_DIR};
pub use metadata::{KeyMetadata, MetadataStore, UpdateRecord};
pub use partition::{PartitionValues, TIMESTAMP_COL};
pub use reader::PartitionFile;
