use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use amivault_common::{EncryptImageRequest, PollConfig};
use amivault_orchestrator::provider_manager::ProviderManager;
use amivault_orchestrator::services;

/// Creates an encrypted AMI of a running EC2 instance: an unencrypted image
/// is created first, copied with encryption enabled, and then deregistered.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Instance to image
    instance_id: String,

    /// Image name (a unique ami_<uuid> name is generated when omitted)
    #[arg(long)]
    name: Option<String>,

    /// Region the instance lives in
    #[arg(long)]
    source_region: Option<String>,

    /// Region for the encrypted image (defaults to the source region)
    #[arg(long)]
    dest_region: Option<String>,

    /// Permit a reboot of the instance for a file-system-consistent image
    #[arg(long)]
    reboot: bool,

    /// KMS key for the encrypted copy (provider default key when omitted)
    #[arg(long)]
    kms_key_id: Option<String>,

    /// Interval between image status polls, in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Give up waiting on an image after this many seconds
    #[arg(long, default_value_t = 3000)]
    wait_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let args = Args::parse();
    if args.instance_id.trim().is_empty() {
        return Err(anyhow!("instance id must not be empty"));
    }

    let provider_name = ProviderManager::current_provider_name();
    let provider = ProviderManager::get_provider(&provider_name)
        .ok_or_else(|| anyhow!("unknown or unconfigured provider '{}'", provider_name))?;
    tracing::info!(provider = %provider_name, instance = %args.instance_id, "starting encryption run");

    let request = EncryptImageRequest {
        instance_id: args.instance_id,
        name: args.name,
        source_region: args.source_region,
        dest_region: args.dest_region,
        reboot: args.reboot,
        kms_key_id: args.kms_key_id,
    };
    let poll = PollConfig {
        interval: Duration::from_millis(args.poll_interval_ms),
        timeout: Some(Duration::from_secs(args.wait_timeout_secs)),
    };

    let image = services::encrypt_image(provider.as_ref(), &request, poll).await?;

    println!("AMI Created. AMI Id: {}", image.image_id);
    println!("Time taken: {}", image.elapsed_hms());
    Ok(())
}
