pub mod client;
pub mod types;

pub use client::{MetadataClient, MetadataError};
pub use types::{ContainerRecord, ServiceRecord};
