//! Mapping of `aws-sdk-s3` failures onto [`StorageError`]

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::error::StorageError;

pub(crate) fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>, subject: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let detail = format!("{}: {}", subject, DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => StorageError::Network(detail),
        SdkError::ConstructionFailure(_) => StorageError::Service(detail),
        _ => {
            let status = err.raw_response().map(|r| r.status().as_u16());
            map_service_error(err.code(), status, detail)
        }
    }
}

/// Error code first, HTTP status as fallback.
pub(crate) fn map_service_error(code: Option<&str>, status: Option<u16>, detail: String) -> StorageError {
    match code {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchUpload") => {
            return StorageError::NotFound(detail)
        }
        Some(
            "AccessDenied"
            | "Forbidden"
            | "InvalidAccessKeyId"
            | "SignatureDoesNotMatch"
            | "ExpiredToken"
            | "AllAccessDisabled",
        ) => return StorageError::AccessDenied(detail),
        Some("SlowDown" | "Throttling" | "ThrottlingException" | "RequestLimitExceeded") => {
            return StorageError::Throttled(detail)
        }
        Some("InternalError" | "ServiceUnavailable" | "RequestTimeout") => {
            return StorageError::Network(detail)
        }
        _ => {}
    }

    match status {
        Some(404) => StorageError::NotFound(detail),
        Some(401 | 403) => StorageError::AccessDenied(detail),
        Some(429) | Some(503) => StorageError::Throttled(detail),
        Some(s) if s >= 500 => StorageError::Network(detail),
        _ => StorageError::Service(detail),
    }
}
