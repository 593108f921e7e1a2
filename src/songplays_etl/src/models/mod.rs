//! Record shapes consumed and produced by the pipeline.

pub mod source;
pub mod table;

pub use source::{Dataset, FieldType, SourceField};
pub use table::OutputTable;
