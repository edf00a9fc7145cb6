//! Read-only provider APIs
//!
//! Each service is reached through a small trait so the poll path can be
//! exercised without the network. The SDK-backed implementations only ever
//! issue list, describe, get-tags and get-location calls.

pub mod cloudwatch_logs;
pub mod s3;

use std::fmt;

use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

use crate::error::ProviderError;

pub use cloudwatch_logs::{LogGroupDescription, LogGroupsApi, SdkLogGroups};
pub use s3::{BucketDescription, BucketsApi, SdkBuckets};

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "SlowDown",
];

/// Map an SDK failure onto the provider error taxonomy
pub(crate) fn classify_sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug,
{
    if let SdkError::TimeoutError(_) = &err {
        return ProviderError::Timeout { operation };
    }

    let code = error_code(&err).unwrap_or_default().to_string();
    let message = DisplayErrorContext(&err).to_string();

    if THROTTLING_CODES.contains(&code.as_str()) {
        ProviderError::Throttled { operation, message }
    } else {
        ProviderError::Service { operation, message }
    }
}

/// Service error code, if the provider answered with one
pub(crate) fn error_code<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(|e| e.code())
}
