use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::Client;
use tokio::sync::Mutex;

use crate::{ImageProvider, ImageStatus};
use amivault_common::ImageState;

/// EC2-backed provider. Credentials and endpoints are resolved by the SDK's
/// default chain (env, profile, instance role); this crate never touches
/// them directly.
pub struct AwsImageProvider {
    // One client per region. CopyImage must be issued against the
    // destination region, so a single-region client is not enough.
    clients: Mutex<HashMap<String, Client>>,
}

impl AwsImageProvider {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, region: &str) -> Client {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(region) {
            return client.clone();
        }
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = Client::new(&config);
        clients.insert(region.to_string(), client.clone());
        client
    }
}

impl Default for AwsImageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for AwsImageProvider {
    async fn create_image(
        &self,
        region: &str,
        instance_id: &str,
        name: &str,
        description: &str,
        no_reboot: bool,
    ) -> Result<String> {
        eprintln!(
            "🔵 [EC2 API] CreateImage: instance={}, name={}, region={}, no_reboot={}",
            instance_id, name, region, no_reboot
        );

        let client = self.client_for(region).await;
        let resp = client
            .create_image()
            .instance_id(instance_id)
            .name(name)
            .description(description)
            .no_reboot(no_reboot)
            .send()
            .await
            .with_context(|| {
                format!("EC2 CreateImage failed for instance {instance_id} in {region}")
            })?;

        resp.image_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("EC2 CreateImage returned no image id for {instance_id}"))
    }

    async fn describe_image(&self, region: &str, image_id: &str) -> Result<ImageStatus> {
        let client = self.client_for(region).await;
        let resp = match client.describe_images().image_ids(image_id).send().await {
            Ok(resp) => resp,
            // A freshly copied image can be unknown to the destination region
            // for a short window. Not-found here means "keep polling".
            Err(err)
                if err.as_service_error().and_then(|e| e.code())
                    == Some("InvalidAMIID.NotFound") =>
            {
                return Ok(ImageStatus {
                    state: ImageState::Pending,
                    state_reason: None,
                });
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("EC2 DescribeImages failed for {image_id} in {region}")
                });
            }
        };

        match resp.images().first() {
            None => Ok(ImageStatus {
                state: ImageState::Pending,
                state_reason: None,
            }),
            Some(image) => {
                let state = image
                    .state()
                    .map(|s| ImageState::parse(s.as_str()))
                    .unwrap_or(ImageState::Pending);
                let state_reason = image
                    .state_reason()
                    .and_then(|r| r.message())
                    .map(str::to_string);
                Ok(ImageStatus {
                    state,
                    state_reason,
                })
            }
        }
    }

    async fn copy_image(
        &self,
        dest_region: &str,
        src_region: &str,
        src_image_id: &str,
        name: &str,
        description: &str,
        encrypted: bool,
        kms_key_id: Option<&str>,
    ) -> Result<String> {
        eprintln!(
            "🔵 [EC2 API] CopyImage: source={} ({}), dest_region={}, encrypted={}, kms_key={}",
            src_image_id,
            src_region,
            dest_region,
            encrypted,
            kms_key_id.unwrap_or("<default>")
        );

        let client = self.client_for(dest_region).await;
        let resp = client
            .copy_image()
            .name(name)
            .description(description)
            .source_image_id(src_image_id)
            .source_region(src_region)
            .encrypted(encrypted)
            // set_* with None omits the field from the request, which is what
            // selects the provider's default key.
            .set_kms_key_id(kms_key_id.map(str::to_string))
            .send()
            .await
            .with_context(|| {
                format!("EC2 CopyImage failed for {src_image_id} into {dest_region}")
            })?;

        resp.image_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("EC2 CopyImage returned no image id for {src_image_id}"))
    }

    async fn deregister_image(&self, region: &str, image_id: &str) -> Result<()> {
        eprintln!(
            "🔵 [EC2 API] DeregisterImage: image={}, region={}",
            image_id, region
        );

        let client = self.client_for(region).await;
        client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .with_context(|| format!("EC2 DeregisterImage failed for {image_id} in {region}"))?;
        Ok(())
    }
}
