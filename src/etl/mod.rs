pub mod cache;
pub mod compression;
pub mod error;
pub mod filter;
pub mod migration;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod sync;
pub mod transform;
pub mod utils;
pub mod validation;

// Re-export key types for easier access
pub use compression::{ChunkMetadata, CompressedData, CompressionFormat};
pub use error::{EtlError, Result};
pub use filter::{FilterCondition, FilterOptions, FilterResponse, Pagination, SortSpec};
pub use migration::{MigrationRegistry, SchemaVersion};
pub use pipeline::{
    BatchPipeline, BoxedTransformer, FnTransformer, Pipeline, PipelineBuilder, Transformer,
};
pub use processor::{DataProcessor, ProcessingResult, ProcessorOptions};
pub use retry::RetryConfig;
pub use sync::{ConnectionState, DataSync, SyncConfig, SyncMessage};
pub use validation::{SchemaField, ValidationOptions, ValidationResult, ValidationSchema};
