//! Optional observability helpers for session operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` (default) to emit structured spans named `tastytrade_session.op` with the
//!   `op` and `stage` fields, plus debug/warn events along the refresh and retry paths.
//! - Enable `metrics` to increment the `tastytrade_session_op_total` counter, labeled by `op`
//!   and `outcome`.

// self
use crate::_prelude::*;

/// Emits a `tracing` event when the feature is enabled; compiles to nothing otherwise.
macro_rules! event {
	($level:ident, $($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!($($arg)+);
		}
	};
}
pub(crate) use event;

/// Session operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Refresh-token exchange against the authority.
	Refresh,
	/// Authenticated protected-resource request.
	Request,
	/// Session shutdown.
	Close,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Refresh => "refresh",
			OpKind::Request => "request",
			OpKind::Close => "close",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Corrective refresh-and-resend after an unauthorized response.
	AuthRetry,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::AuthRetry => "auth_retry",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside a `tastytrade_session.op` span, recording its attempt and final outcome.
pub(crate) async fn observe<T, Fut>(kind: OpKind, stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	record_op_outcome(kind, OpOutcome::Attempt);

	#[cfg(feature = "tracing")]
	let result = {
		use ::tracing::Instrument;

		fut.instrument(::tracing::info_span!("tastytrade_session.op", op = kind.as_str(), stage))
			.await
	};
	#[cfg(not(feature = "tracing"))]
	let result = {
		let _ = stage;

		fut.await
	};

	record_op_outcome(kind, if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure });

	result
}

/// Increments `tastytrade_session_op_total{op, outcome}` when the `metrics` feature is enabled.
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		::metrics::counter!(
			"tastytrade_session_op_total",
			"op" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn labels_are_stable() {
		assert_eq!(OpKind::Request.to_string(), "request");
		assert_eq!(OpOutcome::AuthRetry.to_string(), "auth_retry");
	}

	#[tokio::test]
	async fn observe_passes_results_through() {
		let value = observe(OpKind::Refresh, "ok", async { Ok(42) }).await;

		assert!(matches!(value, Ok(42)));

		let err = observe::<(), _>(OpKind::Close, "err", async { Err(Error::Closed) }).await;

		assert!(matches!(err, Err(Error::Closed)));
	}
}
