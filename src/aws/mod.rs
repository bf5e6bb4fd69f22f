//! # AWS Property Handling
//!
//! Update-patch generation for AWS resources deployed through the cloud
//! control plane. AWS updates are read-modify-write: the live state is
//! fetched, compared property-by-property against the desired state, and the
//! difference is submitted as a patch document. Which properties may legally
//! appear in that patch is governed by the resource type schema's access
//! classifications (read-only, create-only, write-only).
//!
//! The comparison works on flattened property paths (`ClusterEndpoint/Port`),
//! see [`flatten`]. Array-valued properties are outside this design's scope
//! and rejected outright.

pub mod flatten;
pub mod patch;
pub mod schema;

pub use flatten::{flatten_properties, unflatten_properties};
pub use patch::{generate_update_patch, PatchOp, PatchOperation};
pub use schema::{CloudFormationSchemaClient, PropertyClassification, SchemaClient};
