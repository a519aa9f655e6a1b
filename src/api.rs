//! Response helpers for endpoint wrappers built on top of [`Session::request`].
//!
//! The brokerage wraps successful payloads as `{"data": ...}` and failures as
//! `{"error": {"code": ..., "message": ...}}`. Nothing here participates in credential
//! handling; the session core hands responses through untouched and collaborators opt into
//! these helpers.
//!
//! [`Session::request`]: crate::Session::request

// crates.io
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Documented status codes of the brokerage API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiStatus {
	/// 400: invalid parameters.
	InvalidRequest,
	/// 401: authorization expired.
	AuthorizationExpired,
	/// 403: wrong account or customer.
	Unauthorized,
	/// 404: data does not exist.
	NotFound,
	/// 422: invalid action performed.
	UnprocessableContent,
	/// 429: rate limit exceeded.
	TooManyRequests,
	/// 500: internal server error.
	InternalServer,
	/// Any other non-success status.
	Unknown(u16),
}
impl ApiStatus {
	/// Maps an HTTP status onto the documented taxonomy.
	pub fn from_status(status: StatusCode) -> Self {
		match status.as_u16() {
			400 => Self::InvalidRequest,
			401 => Self::AuthorizationExpired,
			403 => Self::Unauthorized,
			404 => Self::NotFound,
			422 => Self::UnprocessableContent,
			429 => Self::TooManyRequests,
			500 => Self::InternalServer,
			code => Self::Unknown(code),
		}
	}

	/// Numeric status code.
	pub const fn code(self) -> u16 {
		match self {
			Self::InvalidRequest => 400,
			Self::AuthorizationExpired => 401,
			Self::Unauthorized => 403,
			Self::NotFound => 404,
			Self::UnprocessableContent => 422,
			Self::TooManyRequests => 429,
			Self::InternalServer => 500,
			Self::Unknown(code) => code,
		}
	}

	/// Hint describing the usual cause of the status.
	pub const fn hint(self) -> &'static str {
		match self {
			Self::InvalidRequest => "invalid request, probably invalid parameters",
			Self::AuthorizationExpired => "authorization expired",
			Self::Unauthorized => "unauthorized access, possibly the wrong account for this customer",
			Self::NotFound => "not found, the data may not exist",
			Self::UnprocessableContent => "unprocessable content, invalid action performed",
			Self::TooManyRequests => "too many requests, rate limit exceeded",
			Self::InternalServer => "internal server error, try again later",
			Self::Unknown(_) => "unknown error",
		}
	}
}

/// Failure produced while reading a collaborator response.
#[derive(Debug, ThisError)]
pub enum ApiError {
	/// The API answered with a non-success status.
	#[error("Code: {code} - {hint}: {message}", code = .status.code(), hint = .status.hint())]
	Status {
		/// Classified status.
		status: ApiStatus,
		/// Message extracted from the error envelope, or the raw body.
		message: String,
	},
	/// The response body could not be read.
	#[error("Response body could not be read.")]
	Body(#[from] ReqwestError),
	/// The `data` payload did not match the expected shape.
	#[error("Response payload could not be decoded.")]
	Decode(#[from] serde_path_to_error::Error<serde_json::Error>),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
	pub(crate) error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
	pub(crate) code: Option<String>,
	pub(crate) message: Option<String>,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
	data: T,
}

/// Reads a response, returning its `data` payload on success or an [`ApiError`] otherwise.
pub async fn read_data<T>(response: Response) -> Result<T, ApiError>
where
	T: DeserializeOwned,
{
	let status = response.status();
	let body = response.bytes().await?;

	decode_data(status, &body)
}

fn decode_data<T>(status: StatusCode, body: &[u8]) -> Result<T, ApiError>
where
	T: DeserializeOwned,
{
	if !status.is_success() {
		return Err(ApiError::Status {
			status: ApiStatus::from_status(status),
			message: error_message(body),
		});
	}

	let mut de = serde_json::Deserializer::from_slice(body);
	let envelope: DataEnvelope<T> = serde_path_to_error::deserialize(&mut de)?;

	Ok(envelope.data)
}

fn error_message(body: &[u8]) -> String {
	serde_json::from_slice::<ErrorEnvelope>(body)
		.ok()
		.and_then(|envelope| envelope.error.message)
		.unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
