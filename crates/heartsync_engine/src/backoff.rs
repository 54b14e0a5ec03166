//! Retry delays driven by server hints.
//!
//! Every retryable step carries the delay it was last scheduled with. The
//! next delay multiplies the server's hint by that accumulator, so
//! consecutive failures of one call chain compound. There is no retry limit
//! and no cap.

use std::time::Duration;

/// Returns the delay before the next attempt.
///
/// `previous` is the delay the failing attempt was itself scheduled with,
/// or zero for a first attempt. The result is `hint × max(previous, 1s)`
/// (in seconds) and also becomes the accumulator for the next attempt.
pub fn next_delay(hint: Duration, previous: Duration) -> Duration {
    let factor = previous.as_secs_f64().max(1.0);
    Duration::try_from_secs_f64(hint.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_retry_uses_hint() {
        assert_eq!(
            next_delay(Duration::from_secs(3), Duration::ZERO),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn short_previous_counts_as_one_second() {
        assert_eq!(
            next_delay(Duration::from_secs(2), Duration::from_millis(500)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn delays_compound_multiplicatively() {
        let hint = Duration::from_secs(2);
        let mut previous = Duration::ZERO;
        let mut delays = Vec::new();
        for _ in 0..4 {
            previous = next_delay(hint, previous);
            delays.push(previous.as_secs());
        }
        assert_eq!(delays, vec![2, 4, 8, 16]);
    }

    #[test]
    fn huge_delays_saturate() {
        let delay = next_delay(Duration::from_secs(u64::MAX / 2), Duration::from_secs(1_000));
        assert_eq!(delay, Duration::MAX);
    }

    proptest! {
        #[test]
        fn nth_retry_is_hint_times_previous(d in 1u64..10, k in 2usize..6) {
            let hint = Duration::from_secs(d);
            let mut previous = next_delay(hint, Duration::ZERO);
            prop_assert_eq!(previous, hint);
            for _ in 1..k {
                let next = next_delay(hint, previous);
                prop_assert_eq!(next.as_secs(), d * previous.as_secs().max(1));
                previous = next;
            }
        }
    }
}
