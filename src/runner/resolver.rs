use anyhow::Result;
use log::debug;
use tokio::time::{sleep, Duration, Instant};

use super::error::LocatorNotFound;
use crate::driver::traits::{BrowserSession, ElementRef, Selector};
use crate::parser::types::Locator;

/// Result of a single resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ElementRef),
    /// Target ordinal not reached; `matches` is how many were seen
    Missing { matches: usize },
}

/// Turns declarative locators into concrete element references.
///
/// Frames are searched in document order and matches are counted across all
/// searched frames, so `nth` is global to the page rather than per frame.
#[derive(Debug, Clone)]
pub struct LocatorResolver {
    poll_interval: Duration,
}

impl LocatorResolver {
    pub fn new(poll_interval_ms: u64) -> Self {
        Self {
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// One pass over the active page's frames
    pub async fn try_resolve(
        &self,
        session: &dyn BrowserSession,
        locator: &Locator,
    ) -> Result<Resolution> {
        let selector = Selector::from(&locator.strategy);
        let target = locator.ordinal();
        let mut seen = 0;

        let frames = session.frames().await?;
        let searched = frames.iter().filter(|f| match locator.frame {
            Some(ref filter) => f.matches(filter),
            None => true,
        });

        for frame in searched {
            let count = session.count_matches(frame.index, &selector).await?;
            if target < seen + count {
                return Ok(Resolution::Found(ElementRef {
                    frame: frame.index,
                    selector,
                    nth: target - seen,
                }));
            }
            seen += count;
        }

        Ok(Resolution::Missing { matches: seen })
    }

    /// Poll until the locator's target match exists or `timeout_ms` elapses.
    /// At least one attempt is always made; driver errors count as "not yet".
    pub async fn resolve(
        &self,
        session: &dyn BrowserSession,
        locator: &Locator,
        timeout_ms: u64,
    ) -> Result<ElementRef, LocatorNotFound> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut last_matches = 0;

        loop {
            match self.try_resolve(session, locator).await {
                Ok(Resolution::Found(element)) => return Ok(element),
                Ok(Resolution::Missing { matches }) => last_matches = matches,
                Err(e) => debug!("Resolving {} failed, retrying: {:#}", locator, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LocatorNotFound {
                    locator: locator.to_string(),
                    timeout_ms,
                    matches: last_matches,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
