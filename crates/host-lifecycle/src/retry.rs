//! Bounded-attempt retry helpers.
//!
//! `retry!` is a fixed attempt budget, an error hook that decides whether
//! to keep going, and a growing sleep between attempts. `claim_backoff`
//! implements the
//! specific schedule spec.md 4.E calls for in claim arbitration:
//! `100ms * 2^(n-1)`, five attempts.

use std::time::Duration;

/// Retry an async expression a bounded number of times.
///
/// ```ignore
/// let result = retry!(api.get(name).await, times: 4, break_on: &Error::Api(ErrorResponse { code: 404, .. }));
/// ```
#[macro_export]
macro_rules! retry {
    ($action:expr, times: $num_times:expr, error: $on_err:expr) => {{
        let mut n = 0u8;
        let mut duration = std::time::Duration::from_millis(100);
        loop {
            n += 1;
            let result = $action;
            match result {
                Ok(_) => break result,
                Err(ref e) => {
                    if $on_err(e, n) {
                        break result;
                    };
                    tokio::time::sleep(duration).await;
                    duration *= (n + 1) as u32;
                    if n == $num_times {
                        break result;
                    }
                }
            }
        }
    }};
    ($action:expr, times: $num_times:expr, log_error: $log:expr, break_on: $matches:pat) => {
        $crate::retry!($action, times: $num_times, error: |e, _| {
            let matches = matches!(e, $matches);
            if !matches {
                $log(e);
            }
            matches
        })
    };
    ($action:expr, times: $num_times:expr, log_error: $log:expr) => {
        $crate::retry!($action, times: $num_times, error: |e, _| { $log(e); false })
    };
    ($action:expr, times: $num_times:expr, break_on: $matches:pat) => {
        $crate::retry!($action, times: $num_times, error: |e, _| { matches!(e, $matches) })
    };
    ($action:expr, times: $num_times:expr) => {
        $crate::retry!($action, times: $num_times, error: |_, _| { false })
    };
}

/// The claim-arbitration backoff from spec.md 4.E: `100ms * 2^(attempt-1)`,
/// capped at 5 attempts (the caller is responsible for giving up after that
/// and requeuing the Machine).
pub fn claim_backoff(attempt: u32) -> Duration {
    debug_assert!(attempt >= 1);
    Duration::from_millis(100) * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn claim_backoff_doubles_from_100ms() {
        assert_eq!(claim_backoff(1), Duration::from_millis(100));
        assert_eq!(claim_backoff(2), Duration::from_millis(200));
        assert_eq!(claim_backoff(3), Duration::from_millis(400));
        assert_eq!(claim_backoff(5), Duration::from_millis(1600));
    }
}
