//! Storage backend implementations.

pub mod local;

#[cfg(feature = "aws")]
pub mod s3;

#[cfg(feature = "azure")]
pub mod azure;

#[cfg(feature = "gcp")]
pub mod gcs;

#[cfg(feature = "alioss")]
pub mod alioss;

#[cfg(any(feature = "azure", feature = "gcp"))]
mod object_io;

#[cfg(any(feature = "aws", feature = "azure", feature = "gcp", feature = "alioss"))]
mod transfer;
