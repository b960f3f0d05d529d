//! OCI image fetching and layout assembly.
//!
//! Images are pulled from their registries into one shared layout:
//!
//! ```text
//! layout/
//! ├── oci-layout           (layout marker)
//! ├── index.json           (one entry per reference string)
//! └── blobs/
//!     └── sha256/
//!         ├── <manifest>   (per image, resolved to one platform)
//!         ├── <config>
//!         └── <layers>     (shared between images)
//! ```

pub mod credentials;
pub mod layout;
pub mod reference;
pub mod registry;

pub use credentials::{DockerCredentials, RegistryAuth};
pub use layout::{BlobStore, BlobWriter, Descriptor, FetchedImage, LayoutBuilder, LayoutEntry};
pub use reference::{ImageReference, Selector};
pub use registry::{ImageFetcher, RegistryPuller};
