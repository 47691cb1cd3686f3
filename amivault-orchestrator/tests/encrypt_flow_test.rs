// Integration tests for the encryption flow.
// IMPORTANT: all runs in here MUST use the mock provider only.

use std::time::Duration;

use amivault_common::{EncryptImageRequest, ImageState, PollConfig};
use amivault_orchestrator::services::{self, WaitError};
use amivault_providers::mock::MockImageProvider;
use amivault_providers::ImageProvider;

fn fast_poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(5),
        timeout: Some(Duration::from_secs(2)),
    }
}

#[tokio::test]
async fn default_run_creates_copies_and_deregisters() {
    // Images go pending -> available on the second describe.
    let provider = MockImageProvider::with_polls_until_ready(2);
    let request = EncryptImageRequest::new("i-0123456789abcdef0");

    let image = services::encrypt_image(&provider, &request, fast_poll())
        .await
        .unwrap();

    let creates = provider.create_calls();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].instance_id, "i-0123456789abcdef0");
    assert_eq!(creates[0].region, "us-east-1");
    assert!(creates[0].no_reboot, "default run must not reboot the instance");
    assert!(creates[0].name.starts_with("ami_"));
    assert_eq!(
        creates[0].description,
        "Unencrypted AMI of i-0123456789abcdef0"
    );
    // pending, then available
    assert_eq!(provider.describe_count(&creates[0].image_id), Some(2));

    let copies = provider.copy_calls();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].src_image_id, creates[0].image_id);
    assert_eq!(copies[0].src_region, "us-east-1");
    assert_eq!(copies[0].dest_region, "us-east-1");
    assert!(copies[0].encrypted);
    assert!(copies[0].kms_key_id.is_none(), "no key field when none was given");
    assert_eq!(copies[0].name, format!("encrypted_{}", creates[0].name));
    assert_eq!(provider.describe_count(&copies[0].image_id), Some(2));

    assert!(!image.image_id.is_empty());
    assert_eq!(image.image_id, copies[0].image_id);
    assert_ne!(image.image_id, image.source_image_id);
    assert_eq!(image.source_image_id, creates[0].image_id);
    assert_eq!(image.name, copies[0].name);
    assert_eq!(image.region, "us-east-1");

    // The intermediate (and only the intermediate) was deregistered.
    assert_eq!(provider.deregistered(), vec![creates[0].image_id.clone()]);
    assert_eq!(
        provider.image_state(&image.image_id),
        Some(ImageState::Available)
    );
}

#[tokio::test]
async fn generated_names_are_unique_across_runs() {
    let provider = MockImageProvider::new();

    for _ in 0..2 {
        let request = EncryptImageRequest::new("i-0123456789abcdef0");
        services::encrypt_image(&provider, &request, fast_poll())
            .await
            .unwrap();
    }

    let creates = provider.create_calls();
    assert_eq!(creates.len(), 2);
    assert_ne!(creates[0].name, creates[1].name);
}

#[tokio::test]
async fn dest_region_defaults_to_source_region() {
    let provider = MockImageProvider::new();
    let mut request = EncryptImageRequest::new("i-0123456789abcdef0");
    request.source_region = Some("eu-west-1".to_string());

    let image = services::encrypt_image(&provider, &request, fast_poll())
        .await
        .unwrap();

    assert_eq!(provider.create_calls()[0].region, "eu-west-1");
    let copies = provider.copy_calls();
    assert_eq!(copies[0].src_region, "eu-west-1");
    assert_eq!(copies[0].dest_region, "eu-west-1");
    assert_eq!(image.region, "eu-west-1");
}

#[tokio::test]
async fn kms_key_is_passed_verbatim_when_given() {
    let provider = MockImageProvider::new();
    let mut request = EncryptImageRequest::new("i-0123456789abcdef0");
    request.dest_region = Some("eu-central-1".to_string());
    request.kms_key_id = Some("arn:aws:kms:eu-central-1:123456789012:key/abc".to_string());

    services::encrypt_image(&provider, &request, fast_poll())
        .await
        .unwrap();

    let copies = provider.copy_calls();
    assert_eq!(copies[0].dest_region, "eu-central-1");
    assert_eq!(
        copies[0].kms_key_id.as_deref(),
        Some("arn:aws:kms:eu-central-1:123456789012:key/abc")
    );
}

#[tokio::test]
async fn explicit_name_is_respected() {
    let provider = MockImageProvider::new();
    let mut request = EncryptImageRequest::new("i-0123456789abcdef0");
    request.name = Some("nightly_base".to_string());

    let image = services::encrypt_image(&provider, &request, fast_poll())
        .await
        .unwrap();

    assert_eq!(provider.create_calls()[0].name, "nightly_base");
    assert_eq!(image.name, "encrypted_nightly_base");
}

#[tokio::test]
async fn unbounded_wait_on_a_stuck_image_never_returns() {
    let provider = MockImageProvider::new();
    provider.pin_pending();
    let image_id = provider
        .create_image("us-east-1", "i-abc", "ami_stuck", "stuck image", true)
        .await
        .unwrap();

    let poll = PollConfig {
        interval: Duration::from_millis(5),
        timeout: None,
    };
    let wait = services::wait_for_image_available(&provider, "us-east-1", &image_id, poll);
    let outcome = tokio::time::timeout(Duration::from_millis(200), wait).await;
    assert!(outcome.is_err(), "unbounded wait must still be waiting");
}

#[tokio::test]
async fn bounded_wait_on_a_stuck_image_times_out() {
    let provider = MockImageProvider::new();
    provider.pin_pending();
    let image_id = provider
        .create_image("us-east-1", "i-abc", "ami_stuck", "stuck image", true)
        .await
        .unwrap();

    let poll = PollConfig {
        interval: Duration::from_millis(5),
        timeout: Some(Duration::from_millis(50)),
    };
    let err = services::wait_for_image_available(&provider, "us-east-1", &image_id, poll)
        .await
        .unwrap_err();
    assert!(matches!(err, WaitError::TimedOut { .. }), "got {err:?}");
}

#[tokio::test]
async fn wait_surfaces_a_provider_reported_failure() {
    let provider = MockImageProvider::new();
    provider.fail_images("snapshot error");
    let image_id = provider
        .create_image("us-east-1", "i-abc", "ami_bad", "bad image", true)
        .await
        .unwrap();

    let err = services::wait_for_image_available(&provider, "us-east-1", &image_id, fast_poll())
        .await
        .unwrap_err();
    match err {
        WaitError::Failed { state, reason, .. } => {
            assert_eq!(state, ImageState::Failed);
            assert_eq!(reason.as_deref(), Some("snapshot error"));
        }
        other => panic!("expected WaitError::Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_copy_still_cleans_up_the_intermediate() {
    let provider = MockImageProvider::new();
    provider.fail_next_copy("copy rejected");
    let request = EncryptImageRequest::new("i-0123456789abcdef0");

    let err = services::encrypt_image(&provider, &request, fast_poll())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("copying image"), "got {err:#}");

    let creates = provider.create_calls();
    assert_eq!(creates.len(), 1);
    assert_eq!(provider.deregistered(), vec![creates[0].image_id.clone()]);
    assert_eq!(
        provider.image_state(&creates[0].image_id),
        Some(ImageState::Deregistered)
    );
}

#[tokio::test]
async fn timed_out_run_cleans_up_and_reports_the_timeout() {
    let provider = MockImageProvider::new();
    provider.pin_pending();
    let request = EncryptImageRequest::new("i-0123456789abcdef0");
    let poll = PollConfig {
        interval: Duration::from_millis(5),
        timeout: Some(Duration::from_millis(50)),
    };

    let err = services::encrypt_image(&provider, &request, poll)
        .await
        .unwrap_err();
    assert!(
        matches!(err.downcast_ref::<WaitError>(), Some(WaitError::TimedOut { .. })),
        "got {err:#}"
    );

    let creates = provider.create_calls();
    assert_eq!(provider.deregistered(), vec![creates[0].image_id.clone()]);
}

#[tokio::test]
async fn deregister_failure_does_not_fail_a_successful_run() {
    let provider = MockImageProvider::new();
    provider.set_fail_deregister(true);
    let request = EncryptImageRequest::new("i-0123456789abcdef0");

    let image = services::encrypt_image(&provider, &request, fast_poll()).await;
    let image = tokio_test::assert_ok!(image);

    assert!(provider.deregistered().is_empty());
    // The intermediate is leaked in this case, exactly as before.
    assert_eq!(
        provider.image_state(&image.source_image_id),
        Some(ImageState::Available)
    );
}

#[tokio::test]
async fn rejected_instance_creates_nothing() {
    let provider = MockImageProvider::new();
    let request = EncryptImageRequest::new("banana");

    let err = services::encrypt_image(&provider, &request, fast_poll())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("creating image"), "got {err:#}");
    assert!(provider.create_calls().is_empty());
    assert!(provider.deregistered().is_empty());
}

#[tokio::test]
async fn blank_instance_id_is_rejected_before_any_call() {
    let provider = MockImageProvider::new();
    let request = EncryptImageRequest::new("   ");

    let err = services::encrypt_image(&provider, &request, fast_poll())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("instance id"), "got {err:#}");
    assert!(provider.create_calls().is_empty());
}
