use anyhow::Result;
use async_trait::async_trait;

use amivault_common::ImageState;

/// The four remote image operations this tool needs from a compute provider.
///
/// The region is passed on every call instead of being baked into the
/// provider at construction time: the encrypted copy lands in a different
/// region than the source image, and the caller decides which is which.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Create a machine image from a running instance and return its id.
    /// `no_reboot = true` asks for a crash-consistent image without
    /// interrupting the instance.
    async fn create_image(
        &self,
        region: &str,
        instance_id: &str,
        name: &str,
        description: &str,
        no_reboot: bool,
    ) -> Result<String>;

    /// Current state of an image. An image the provider does not report yet
    /// (possible for a short window right after a copy) is `Pending`, not an
    /// error.
    async fn describe_image(&self, region: &str, image_id: &str) -> Result<ImageStatus>;

    /// Copy an image into `dest_region` and return the new image id.
    /// When `kms_key_id` is `None` the request must omit the key field
    /// entirely; the API rejects an empty key value, and omission is what
    /// selects the provider's default key.
    #[allow(clippy::too_many_arguments)]
    async fn copy_image(
        &self,
        dest_region: &str,
        src_region: &str,
        src_image_id: &str,
        name: &str,
        description: &str,
        encrypted: bool,
        kms_key_id: Option<&str>,
    ) -> Result<String>;

    /// Delete an image. The underlying storage may outlive the image; that
    /// is the provider's concern, not ours.
    async fn deregister_image(&self, region: &str, image_id: &str) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct ImageStatus {
    pub state: ImageState,
    pub state_reason: Option<String>,
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "aws")]
pub mod aws;
