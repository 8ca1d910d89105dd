//! Network attachment CRD definitions
//!
//! Kubernetes types shared by the dynamic networks controller:
//! the `NetworkAttachmentDefinition` custom resource and the schema of the
//! two pod annotations that carry desired and actual attachment state.

pub mod annotations;
pub mod network_attachment_definition;
pub mod network_selection;
pub mod network_status;
pub mod references;

pub use annotations::*;
pub use network_attachment_definition::*;
pub use network_selection::*;
pub use network_status::*;
pub use references::*;
