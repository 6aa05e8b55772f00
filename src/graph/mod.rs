//! Graph layer: GraphDefinition model, join-key paths and the traversal engine.

pub mod definition;
pub mod path;
pub mod traversal;

pub use definition::{GraphDefinition, GraphDefinitionSource, Link};
pub use path::{JoinPath, Lookup};
pub use traversal::{TraversalEngine, TraversalOptions, TraversalReport};
