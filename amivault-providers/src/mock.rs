use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::{ImageProvider, ImageStatus};
use amivault_common::ImageState;

/// In-memory provider emulating the asynchronous side of a real one: a
/// created or copied image stays `pending` for a configurable number of
/// describe calls before reaching its terminal state. Every request is
/// recorded so tests can assert on exactly what was asked of the provider.
pub struct MockImageProvider {
    state: Mutex<MockState>,
}

#[derive(Clone, Debug)]
pub struct CreateImageCall {
    pub region: String,
    pub instance_id: String,
    pub name: String,
    pub description: String,
    pub no_reboot: bool,
    pub image_id: String,
}

#[derive(Clone, Debug)]
pub struct CopyImageCall {
    pub dest_region: String,
    pub src_region: String,
    pub src_image_id: String,
    pub name: String,
    pub description: String,
    pub encrypted: bool,
    pub kms_key_id: Option<String>,
    pub image_id: String,
}

struct MockImage {
    region: String,
    state: ImageState,
    polls_left: u32,
    describes: u32,
}

struct MockState {
    images: HashMap<String, MockImage>,
    create_calls: Vec<CreateImageCall>,
    copy_calls: Vec<CopyImageCall>,
    deregistered: Vec<String>,
    polls_until_ready: u32,
    pin_pending: bool,
    // Terminal state reached after the countdown, with an optional reason.
    failure: Option<String>,
    fail_next_copy: Option<String>,
    fail_deregister: bool,
}

impl MockImageProvider {
    /// Images become available on the first describe.
    pub fn new() -> Self {
        Self::with_polls_until_ready(1)
    }

    /// Images stay `pending` for `polls - 1` describes and become available
    /// on describe number `polls`.
    pub fn with_polls_until_ready(polls: u32) -> Self {
        Self {
            state: Mutex::new(MockState {
                images: HashMap::new(),
                create_calls: Vec::new(),
                copy_calls: Vec::new(),
                deregistered: Vec::new(),
                polls_until_ready: polls.max(1),
                pin_pending: false,
                failure: None,
                fail_next_copy: None,
                fail_deregister: false,
            }),
        }
    }

    /// Images never leave `pending`, no matter how often they are described.
    pub fn pin_pending(&self) {
        self.state.lock().unwrap().pin_pending = true;
    }

    /// Images end their countdown in `failed` with the given reason instead
    /// of becoming available.
    pub fn fail_images(&self, reason: &str) {
        self.state.lock().unwrap().failure = Some(reason.to_string());
    }

    /// The next copy request is rejected with the given message.
    pub fn fail_next_copy(&self, message: &str) {
        self.state.lock().unwrap().fail_next_copy = Some(message.to_string());
    }

    /// All deregister requests are rejected.
    pub fn set_fail_deregister(&self, fail: bool) {
        self.state.lock().unwrap().fail_deregister = fail;
    }

    pub fn create_calls(&self) -> Vec<CreateImageCall> {
        self.state.lock().unwrap().create_calls.clone()
    }

    pub fn copy_calls(&self) -> Vec<CopyImageCall> {
        self.state.lock().unwrap().copy_calls.clone()
    }

    /// Image ids deregistered so far, in request order.
    pub fn deregistered(&self) -> Vec<String> {
        self.state.lock().unwrap().deregistered.clone()
    }

    pub fn image_state(&self, image_id: &str) -> Option<ImageState> {
        self.state
            .lock()
            .unwrap()
            .images
            .get(image_id)
            .map(|img| img.state.clone())
    }

    /// How many times an image has been described.
    pub fn describe_count(&self, image_id: &str) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .images
            .get(image_id)
            .map(|img| img.describes)
    }

    fn next_image_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("ami-{}", &hex[..17])
    }
}

impl Default for MockImageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for MockImageProvider {
    async fn create_image(
        &self,
        region: &str,
        instance_id: &str,
        name: &str,
        description: &str,
        no_reboot: bool,
    ) -> Result<String> {
        if !instance_id.starts_with("i-") {
            return Err(anyhow!(
                "MockImageProvider: invalid instance id '{}'",
                instance_id
            ));
        }
        if name.trim().is_empty() {
            return Err(anyhow!("MockImageProvider: image name must not be empty"));
        }

        let mut state = self.state.lock().unwrap();
        let polls_until_ready = state.polls_until_ready;
        let image_id = Self::next_image_id();
        state.images.insert(
            image_id.clone(),
            MockImage {
                region: region.to_string(),
                state: ImageState::Pending,
                polls_left: polls_until_ready,
                describes: 0,
            },
        );
        state.create_calls.push(CreateImageCall {
            region: region.to_string(),
            instance_id: instance_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            no_reboot,
            image_id: image_id.clone(),
        });
        Ok(image_id)
    }

    async fn describe_image(&self, region: &str, image_id: &str) -> Result<ImageStatus> {
        let mut state = self.state.lock().unwrap();
        let failure = state.failure.clone();
        let pin_pending = state.pin_pending;
        let image = state
            .images
            .get_mut(image_id)
            .ok_or_else(|| anyhow!("MockImageProvider: no such image '{}'", image_id))?;
        if image.region != region {
            return Err(anyhow!(
                "MockImageProvider: image '{}' is not in region '{}'",
                image_id,
                region
            ));
        }

        image.describes += 1;
        if image.state == ImageState::Pending && !pin_pending {
            image.polls_left = image.polls_left.saturating_sub(1);
            if image.polls_left == 0 {
                image.state = if failure.is_some() {
                    ImageState::Failed
                } else {
                    ImageState::Available
                };
            }
        }

        let state_reason = if image.state == ImageState::Failed {
            failure
        } else {
            None
        };
        Ok(ImageStatus {
            state: image.state.clone(),
            state_reason,
        })
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
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next_copy.take() {
            return Err(anyhow!("MockImageProvider: {}", message));
        }
        match state.images.get(src_image_id) {
            None => {
                return Err(anyhow!(
                    "MockImageProvider: no such source image '{}'",
                    src_image_id
                ))
            }
            Some(src) if src.region != src_region => {
                return Err(anyhow!(
                    "MockImageProvider: source image '{}' is not in region '{}'",
                    src_image_id,
                    src_region
                ))
            }
            Some(_) => {}
        }

        let polls_until_ready = state.polls_until_ready;
        let image_id = Self::next_image_id();
        state.images.insert(
            image_id.clone(),
            MockImage {
                region: dest_region.to_string(),
                state: ImageState::Pending,
                polls_left: polls_until_ready,
                describes: 0,
            },
        );
        state.copy_calls.push(CopyImageCall {
            dest_region: dest_region.to_string(),
            src_region: src_region.to_string(),
            src_image_id: src_image_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            encrypted,
            kms_key_id: kms_key_id.map(str::to_string),
            image_id: image_id.clone(),
        });
        Ok(image_id)
    }

    async fn deregister_image(&self, region: &str, image_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deregister {
            return Err(anyhow!(
                "MockImageProvider: deregister of '{}' rejected",
                image_id
            ));
        }
        let image = state
            .images
            .get_mut(image_id)
            .ok_or_else(|| anyhow!("MockImageProvider: no such image '{}'", image_id))?;
        if image.region != region {
            return Err(anyhow!(
                "MockImageProvider: image '{}' is not in region '{}'",
                image_id,
                region
            ));
        }
        image.state = ImageState::Deregistered;
        state.deregistered.push(image_id.to_string());
        Ok(())
    }
}
