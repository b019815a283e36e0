//! Verifier log sizing
//!
//! The kernel truncates the verifier log to the buffer it was given. A
//! truncated log usually cuts off the line explaining the rejection, so a
//! load that fails with a truncated log is repeated with a larger buffer.

use bpf_api::error::KernelError;
use bpf_api::kernel::KernelOptions;

/// Factor the log buffer grows by between attempts.
const LOG_SIZE_GROWTH: u32 = 4;

/// Attempts made before giving up on a complete log.
pub const MAX_LOG_ATTEMPTS: usize = 5;

/// Runs `load`, repeating it with a larger verifier log buffer while it fails
/// with a truncated log.
///
/// Gives up after [`MAX_LOG_ATTEMPTS`] attempts, returning the last error.
/// Never repeats a load when logs are disabled.
pub fn with_log_retry<T, F>(opts: &KernelOptions, mut load: F) -> Result<T, KernelError>
where
    F: FnMut(&KernelOptions) -> Result<T, KernelError>,
{
    let mut attempt_opts = opts.clone();
    let mut attempt = 1;
    loop {
        let err = match load(&attempt_opts) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        let truncated = err.as_verifier().is_some_and(|v| v.truncated);
        if !truncated || attempt_opts.programs.log_disabled || attempt >= MAX_LOG_ATTEMPTS {
            return Err(err);
        }

        let size = attempt_opts.programs.log_size.saturating_mul(LOG_SIZE_GROWTH);
        if size == attempt_opts.programs.log_size {
            return Err(err);
        }
        log::debug!(
            "verifier log truncated at {} bytes, retrying with {}",
            attempt_opts.programs.log_size,
            size
        );
        attempt_opts.programs.log_size = size;
        attempt += 1;
    }
}
