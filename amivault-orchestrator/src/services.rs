use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use amivault_common::{
    EncryptImageRequest, EncryptedImage, ImageState, PollConfig, DEFAULT_REGION,
};
use amivault_providers::ImageProvider;

/// Distinct outcomes of an availability wait. The historical script could
/// only hang when an image failed; callers here can tell "the provider gave
/// up" from "we gave up".
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("image {image_id} entered terminal state '{state}'")]
    Failed {
        image_id: String,
        state: ImageState,
        reason: Option<String>,
    },
    #[error("timed out after {waited:?} waiting for image {image_id} to become available")]
    TimedOut { image_id: String, waited: Duration },
    #[error("describing image {image_id} failed")]
    Describe {
        image_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Produce an encrypted image of `request.instance_id`.
///
/// Create an unencrypted image, wait for it, copy it with encryption
/// enabled into the destination region, wait again, then deregister the
/// unencrypted intermediate. If a step after creation fails, the
/// intermediate is still cleaned up (best-effort) before the error is
/// surfaced.
pub async fn encrypt_image(
    provider: &dyn ImageProvider,
    request: &EncryptImageRequest,
    poll: PollConfig,
) -> Result<EncryptedImage> {
    let instance_id = request.instance_id.trim();
    if instance_id.is_empty() {
        bail!("instance id must not be empty");
    }

    let started_at = Utc::now();

    let src_region = trimmed(&request.source_region).unwrap_or_else(default_region);
    let dest_region = trimmed(&request.dest_region).unwrap_or_else(|| src_region.clone());
    let name = trimmed(&request.name).unwrap_or_else(generate_image_name);
    let no_reboot = !request.reboot;

    print!("Creating AMI");
    flush_stdout();
    let unencrypted_id = provider
        .create_image(
            &src_region,
            instance_id,
            &name,
            &format!("Unencrypted AMI of {instance_id}"),
            no_reboot,
        )
        .await
        .with_context(|| format!("creating image of instance {instance_id}"))?;

    // The unencrypted intermediate now exists provider-side. From here on a
    // failure must not leak it.
    let encrypted_id = match copy_and_wait(
        provider,
        instance_id,
        &name,
        &src_region,
        &dest_region,
        &unencrypted_id,
        request.kms_key_id.as_deref(),
        poll,
    )
    .await
    {
        Ok(id) => id,
        Err(err) => {
            println!();
            if let Err(cleanup) = provider.deregister_image(&src_region, &unencrypted_id).await {
                eprintln!(
                    "⚠️ [encrypt] cleanup of intermediate image {} failed: {:#}",
                    unencrypted_id, cleanup
                );
            }
            return Err(err);
        }
    };

    // Observed behavior preserved: a deregister failure on the happy path
    // does not fail the run.
    if let Err(err) = provider.deregister_image(&src_region, &unencrypted_id).await {
        eprintln!(
            "⚠️ [encrypt] deregister of intermediate image {} failed: {:#}",
            unencrypted_id, err
        );
    }

    Ok(EncryptedImage {
        image_id: encrypted_id,
        source_image_id: unencrypted_id,
        name: format!("encrypted_{name}"),
        region: dest_region,
        started_at,
        finished_at: Utc::now(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn copy_and_wait(
    provider: &dyn ImageProvider,
    instance_id: &str,
    name: &str,
    src_region: &str,
    dest_region: &str,
    unencrypted_id: &str,
    kms_key_id: Option<&str>,
    poll: PollConfig,
) -> Result<String> {
    wait_for_image_available(provider, src_region, unencrypted_id, poll)
        .await
        .with_context(|| format!("waiting for unencrypted image {unencrypted_id}"))?;
    println!();

    print!("Encrypting AMI");
    flush_stdout();
    let encrypted_id = provider
        .copy_image(
            dest_region,
            src_region,
            unencrypted_id,
            &format!("encrypted_{name}"),
            &format!("Encrypted AMI of {instance_id}"),
            true,
            kms_key_id,
        )
        .await
        .with_context(|| format!("copying image {unencrypted_id} into {dest_region}"))?;

    wait_for_image_available(provider, dest_region, &encrypted_id, poll)
        .await
        .with_context(|| format!("waiting for encrypted image {encrypted_id}"))?;
    println!();

    Ok(encrypted_id)
}

/// Poll an image until it is `available`, printing a progress dot per poll.
///
/// Returns `WaitError::Failed` when the provider reports a terminal state,
/// `WaitError::TimedOut` once `poll.timeout` is exceeded. With
/// `poll.timeout = None` the wait never gives up on a pending image.
pub async fn wait_for_image_available(
    provider: &dyn ImageProvider,
    region: &str,
    image_id: &str,
    poll: PollConfig,
) -> Result<(), WaitError> {
    let started = Instant::now();
    loop {
        print!(".");
        flush_stdout();

        let status = provider
            .describe_image(region, image_id)
            .await
            .map_err(|source| WaitError::Describe {
                image_id: image_id.to_string(),
                source,
            })?;

        match status.state {
            ImageState::Available => return Ok(()),
            state if state.is_terminal() => {
                return Err(WaitError::Failed {
                    image_id: image_id.to_string(),
                    state,
                    reason: status.state_reason,
                })
            }
            _ => {}
        }

        if let Some(timeout) = poll.timeout {
            if started.elapsed() >= timeout {
                return Err(WaitError::TimedOut {
                    image_id: image_id.to_string(),
                    waited: started.elapsed(),
                });
            }
        }
        sleep(poll.interval).await;
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn default_region() -> String {
    std::env::var("AMIVAULT_DEFAULT_REGION")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Unique name for an unnamed image.
fn generate_image_name() -> String {
    format!("ami_{}", Uuid::new_v4())
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
