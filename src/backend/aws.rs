//! Shared AWS client bootstrap.

use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Per-call deadline applied to every AWS operation.
pub(crate) const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Loads the standard AWS config chain with the crate-wide operation
/// timeout and an optional explicit region.
pub(crate) async fn sdk_config(region: Option<String>) -> SdkConfig {
    let timeouts = TimeoutConfig::builder()
        .operation_timeout(OPERATION_TIMEOUT)
        .build();
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(timeouts);
    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }
    loader.load().await
}

/// Region resolution order: explicit config, `AWS_REGION`, then the
/// region segment of the given ARN.
pub(crate) fn resolve_region(explicit: Option<&str>, arn: Option<&str>) -> Option<String> {
    if let Some(region) = explicit.filter(|r| !r.is_empty()) {
        return Some(region.to_string());
    }
    if let Ok(region) = std::env::var("AWS_REGION") {
        if !region.is_empty() {
            return Some(region);
        }
    }
    arn.and_then(region_from_arn)
}

/// Extracts the region segment from an ARN (`arn:aws:service:REGION:…`).
pub(crate) fn region_from_arn(arn: &str) -> Option<String> {
    let region = arn.split(':').nth(3)?;
    (!region.is_empty()).then(|| region.to_string())
}
