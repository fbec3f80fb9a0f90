//! Network containers: DLC byte images and their tensor descriptors.
//!
//! A [`NetworkContainer`] is immutable after construction and shared by
//! [`NetworkHandle`] between every session that binds it.

mod container;
pub mod descriptor;
pub mod dlc;

pub use container::{Fingerprint, NetworkContainer, NetworkHandle, NetworkSource, NetworkSummary};
pub use descriptor::{validate_descriptors, ElementEncoding, TensorDescriptor, TensorLayout, MAX_TENSOR_BYTES};
pub use dlc::{parse_header, DlcBuilder, DlcHeader, DlcVersion};
