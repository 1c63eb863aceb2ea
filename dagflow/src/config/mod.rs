//! Configuration loading and validation.
//!
//! A configuration document has an optional `metadata` block and a required
//! `implementation_config` block of named sections, each holding named node
//! declarations:
//!
//! ```json
//! {
//!   "metadata": {"traverser": "depth_first"},
//!   "implementation_config": {
//!     "reader_config": {
//!       "read_data": {"class": "DoNothingNode", "destinations": ["write_output"]}
//!     },
//!     "writer_config": {
//!       "write_output": {"class": "DoNothingNode"}
//!     }
//!   }
//! }
//! ```

mod configuration;
mod document;
mod metadata;
mod node_config;
mod section;

pub use configuration::{Configuration, NodeDeclaration};
pub use document::{
    canonicalize, content_hash, parse_document, strip_json_comments, substitute_includes, DocumentFormat,
    MAX_INCLUDE_DEPTH,
};
pub use metadata::{DataObjectConfig, Metadata, NotifyConfig};
pub use node_config::{NodeConfig, CLASS_KEY, CLASS_PREFIX_KEY, DESTINATIONS_KEY, LEGACY_DESTINATION_KEYS};
pub use section::{SectionSource, SectionType, IMPLEMENTATION_KEY, METADATA_KEY};
