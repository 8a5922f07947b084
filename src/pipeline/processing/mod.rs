// Pipeline processing: field normalization, tag repair and aggregation

pub mod aggregate;
pub mod normalize;
pub mod tags;

pub use aggregate::{aggregate, AggregateOptions, Aggregation, FactTable};
pub use normalize::{NormalizationRegistry, NormalizedBatch};
pub use tags::{normalize_tags, TagRepairs};
