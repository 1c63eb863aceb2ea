//! Graph model built from node declarations.

mod dag;

pub use dag::{ConfigurationDag, DagNode};
