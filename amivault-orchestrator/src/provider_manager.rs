use std::env;

use amivault_providers::ImageProvider;

pub struct ProviderManager;

impl ProviderManager {
    pub fn current_provider_name() -> String {
        env::var("PROVIDER").unwrap_or_else(|_| "aws".to_string())
    }

    pub fn get_provider(provider_name: &str) -> Option<Box<dyn ImageProvider>> {
        match provider_name.to_lowercase().as_str() {
            #[cfg(feature = "provider-aws")]
            "aws" => Some(Box::new(amivault_providers::aws::AwsImageProvider::new())),
            #[cfg(feature = "provider-mock")]
            "mock" => Some(Box::new(
                amivault_providers::mock::MockImageProvider::new(),
            )),
            // Add other providers here
            _ => None,
        }
    }
}
