//! Error taxonomy for the request pipeline.
//!
//! # Design
//! `RequestError` is a closed set of failure kinds. Every failure produced by
//! the executor reaches the caller as one of these, through the same `Result`
//! path as successes. Variants that wrap an opaque underlying error compare
//! by the error's rendered text, so two network failures with the same
//! description are equal even when the causes are distinct values.
//!
//! `Display` is the diagnostic log message. UI text comes from
//! `user_message`, which only distinguishes image failures from the rest.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::http::RawResponse;
use crate::transport::TransportError;

/// Shown to the user for image download failures.
pub const IMAGE_USER_MESSAGE: &str = "Unable to load image";
/// Shown to the user for every other failure.
pub const DATA_USER_MESSAGE: &str = "Unable to load data";

/// An opaque underlying error, shareable across threads.
#[derive(Clone)]
pub struct ErrorCause(Arc<dyn StdError + Send + Sync + 'static>);

impl ErrorCause {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// A cause that only carries a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCause({:?})", self.0.to_string())
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl PartialEq for ErrorCause {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_string() == other.0.to_string()
    }
}

impl Eq for ErrorCause {}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

/// Errors delivered by `RequestExecutor` operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The body was missing, empty, or otherwise unusable.
    #[error(
        "Data received from the server was invalid, corrupted or not matching with pre-set models.\nData: {}",
        describe_data(.0)
    )]
    InvalidData(Option<Bytes>),

    /// The request URL could not be parsed.
    #[error("The URL provided for the network request is invalid.\nURL: {0}")]
    InvalidUrl(String),

    /// The transport reported an error, including cancellation.
    #[error("An error was encountered during the network request, including connectivity issues.\nError: {0}")]
    NetworkError(ErrorCause),

    /// The body could not be decoded into the requested type.
    #[error("Failed to decode the data returned from the server into the expected model.\nError: {0}")]
    DecodingError(ErrorCause),

    /// The server answered with a status outside 200..=299.
    #[error("The server returned an error status code.\nStatus code: {status_code}")]
    ServerError { status_code: u16 },

    /// The transport produced no response, or one that is not HTTP.
    #[error("The server response was unsuccessful.\nResponse: {}", describe_response(.0))]
    ResponseUnsuccessful(Option<RawResponse>),

    /// An image could not be downloaded.
    #[error("Failed to download the image.\nError: {0}")]
    DownloadImageError(ErrorCause),

    /// Anything that fits no other kind.
    #[error("An unknown error occurred.\nError: {}", describe_cause(.0))]
    UnknownError(Option<ErrorCause>),
}

fn describe_data(data: &Option<Bytes>) -> String {
    match data {
        Some(bytes) => format!("{} bytes", bytes.len()),
        None => "nil".to_string(),
    }
}

fn describe_response(response: &Option<RawResponse>) -> String {
    match response {
        Some(response) => response.to_string(),
        None => "nil".to_string(),
    }
}

fn describe_cause(cause: &Option<ErrorCause>) -> String {
    match cause {
        Some(cause) => cause.to_string(),
        None => "nil".to_string(),
    }
}

impl RequestError {
    /// Diagnostic text. Never shown to the user.
    pub fn log_message(&self) -> String {
        self.to_string()
    }

    /// Coarse text suitable for the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            RequestError::DownloadImageError(_) => IMAGE_USER_MESSAGE,
            _ => DATA_USER_MESSAGE,
        }
    }

    /// True when this is the network error a cancelled operation delivers.
    pub fn is_cancellation(&self) -> bool {
        match self {
            RequestError::NetworkError(cause) => matches!(
                cause.downcast_ref::<TransportError>(),
                Some(TransportError::Cancelled)
            ),
            _ => false,
        }
    }

    /// Re-tag failures of an image load so they render as image errors.
    ///
    /// Network, decoding and unknown causes become `DownloadImageError`;
    /// status, data and URL errors keep their kind.
    pub fn into_image_error(self) -> RequestError {
        match self {
            RequestError::NetworkError(cause) | RequestError::DecodingError(cause) => {
                RequestError::DownloadImageError(cause)
            }
            RequestError::UnknownError(Some(cause)) => RequestError::DownloadImageError(cause),
            RequestError::UnknownError(None) => {
                RequestError::DownloadImageError(ErrorCause::msg("unknown failure"))
            }
            other => other,
        }
    }
}

/// Map the raw signals of a finished transport call to at most one error.
///
/// Checks run in order and the first match wins: transport error, missing or
/// non-HTTP response, status outside 200..=299, absent or empty body.
pub fn classify(
    error: Option<&TransportError>,
    response: Option<&RawResponse>,
    body: Option<&Bytes>,
) -> Option<RequestError> {
    if let Some(error) = error {
        return Some(RequestError::NetworkError(ErrorCause::new(error.clone())));
    }
    let status = match response.and_then(|r| r.status) {
        Some(status) => status,
        None => return Some(RequestError::ResponseUnsuccessful(response.cloned())),
    };
    if !(200..=299).contains(&status) {
        return Some(RequestError::ServerError {
            status_code: status,
        });
    }
    match body {
        Some(body) if !body.is_empty() => None,
        _ => Some(RequestError::InvalidData(body.cloned())),
    }
}
