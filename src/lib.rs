/*!
# ETL Toolkit

Composable building blocks for extract-transform-load jobs over JSON and typed data.

## Overview

The toolkit is organised around the [`Transformer`] trait: an async conversion from
one value to another. Everything else either is a transformer, composes transformers,
or runs them:

* **Pipeline**: typed, ordered composition of transformers with an optional output
  validator and success/failure hooks
* **Transform primitives**: batch operations (`map`, `filter`, `group_by`, `distinct`,
  ...), record field edits and CSV encoding
* **Filter engine**: declarative filter trees, multi-key sorting and pagination with
  a query-string encoding
* **Migration registry**: versioned schemas connected by migration edges, resolved
  by breadth-first search
* **Validation engine**: schema-driven validation with a reusable rule library
* **Data processor**: retries with backoff, result caching and optional compression
  around any transformer
* **Compression**: gzip/deflate containers and chunked datasets
* **Sync channel**: topic subscriptions over a pluggable transport with reconnects

## Usage Example

```rust,no_run
use etl_toolkit::etl::filter::{self, FilterCondition, FilterOperator};
use etl_toolkit::etl::transform;
use etl_toolkit::{DataProcessor, Pipeline, ProcessorOptions, Result};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<()> {
    let cheap = FilterCondition::field("price", FilterOperator::Lt, json!(100));

    // Keep cheap products and tag them
    let pipeline = Pipeline::<Vec<Value>, Vec<Value>>::batch("cheap-products")
        .map(move |rows: Vec<Value>| filter::apply_filter(rows, &cheap))
        .stage(transform::map(|mut row: Value| {
            row["segment"] = json!("budget");
            row
        }))
        .build();

    let processor = DataProcessor::new(pipeline, ProcessorOptions::default());
    let result = processor
        .process(vec![json!({"sku": "A-1", "price": 40}), json!({"sku": "B-2", "price": 400})])
        .await;

    if result.success {
        println!("{}", json!(result.data));
    } else {
        println!("Failed after {} retries: {:?}", result.stats.retry_count, result.error);
    }
    Ok(())
}
```

## Error Handling

All fallible operations return [`Result`] with an [`EtlError`]. Errors carry a stable
[`code`](EtlError::code) and a [`retryable`](EtlError::retryable) classification that the
processor and the sync channel use to decide whether another attempt is worthwhile.
The processor never returns an error directly: check `ProcessingResult::success`.
*/

pub mod etl;

// Re-export all public APIs for easier access
pub use etl::error::{EtlError, Result};
pub use etl::migration::{MigrationRegistry, SchemaVersion};
pub use etl::pipeline::{FnTransformer, Pipeline, PipelineBuilder, Transformer};
pub use etl::processor::{DataProcessor, ProcessingResult, ProcessorOptions};
pub use etl::sync::{DataSync, SyncConfig};
pub use etl::validation::{ValidationOptions, ValidationSchema, validate};
