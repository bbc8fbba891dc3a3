//! Per-provider declarative configuration.

pub mod loader;
pub mod types;

pub use loader::{load_all_mappings, load_mapping, resolve_mapping_path, MappingRegistry};
pub use types::{
    LoadState, ProviderMapping, ResultParsing, Selectors, Step, StepAction, WaitState,
    DEFAULT_BLOCK_KEYWORDS,
};
