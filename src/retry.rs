use std::{fmt::Display, future::Future, time::Duration};
use typed_builder::TypedBuilder;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Fixed-delay retry policy.
///
/// `run` invokes the operation, and on failure sleeps for `delay` before invoking it again,
/// up to `attempts` invocations in total. The delay does not grow between attempts. The error
/// of the final attempt is returned unchanged.
///
/// An `attempts` of zero behaves like one: the operation always runs at least once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TypedBuilder)]
pub struct Retry {
    #[builder(default = DEFAULT_RETRY_ATTEMPTS)]
    pub attempts: u32,
    #[builder(default = DEFAULT_RETRY_DELAY)]
    pub delay: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Retry {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut remaining = self.attempts.max(1);
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    remaining -= 1;
                    if remaining == 0 {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, remaining, "Attempt failed, retrying in {:?}", self.delay);
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
