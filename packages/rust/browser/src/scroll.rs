//! Infinite-scroll pagination.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use stacksift_shared::ScrollSettings;

use crate::page::BrowserPage;

/// Scrolls a results page until enough items are loaded or it stops growing.
#[derive(Debug, Clone, Default)]
pub struct ScrollHandler {
    settings: ScrollSettings,
}

impl ScrollHandler {
    pub fn new(settings: ScrollSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ScrollSettings {
        &self.settings
    }

    /// Scroll until `counter` reports at least `target_count` items.
    ///
    /// Stops early once `max_no_change_iterations` consecutive scrolls leave
    /// both the page height and the item count unchanged, or when the
    /// scroll timeout elapses. Returns the last item count. Page errors are
    /// logged, never returned.
    pub async fn scroll_to_load_results<F, Fut>(
        &self,
        page: &dyn BrowserPage,
        target_count: usize,
        mut counter: F,
    ) -> usize
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = usize>,
    {
        let started = Instant::now();
        let mut count = counter().await;
        let mut height = page.scroll_height().await.unwrap_or(0);
        let mut unchanged = 0u32;
        let mut iterations = 0u32;

        while count < target_count {
            if started.elapsed() >= self.settings.timeout {
                info!(count, target_count, "scroll timeout reached");
                break;
            }

            self.scroll_once(page).await;
            iterations += 1;

            let new_height = page.scroll_height().await.unwrap_or(height);
            let new_count = counter().await;
            debug!(iteration = iterations, height = new_height, count = new_count, "scrolled");

            if new_height == height && new_count == count {
                unchanged += 1;
                if unchanged >= self.settings.max_no_change_iterations {
                    info!(count = new_count, iterations, "no new content, stopping scroll");
                    count = new_count;
                    break;
                }
            } else {
                unchanged = 0;
            }

            height = new_height;
            count = new_count;
        }

        info!(count, target_count, iterations, "scroll complete");
        count
    }

    /// Keep scrolling until `duration` has elapsed. Returns the final item
    /// count, or 0 without a counter.
    pub async fn scroll_for_time<F, Fut>(
        &self,
        page: &dyn BrowserPage,
        duration: Duration,
        counter: Option<F>,
    ) -> usize
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = usize>,
    {
        let started = Instant::now();
        let mut iterations = 0u32;
        while started.elapsed() < duration {
            self.scroll_once(page).await;
            iterations += 1;
        }
        debug!(iterations, "timed scroll complete");

        match counter {
            Some(mut counter) => counter().await,
            None => 0,
        }
    }

    async fn scroll_once(&self, page: &dyn BrowserPage) {
        if let Err(e) = page.scroll_to_bottom().await {
            warn!(error = %e, "scroll failed");
        }
        tokio::time::sleep(self.settings.delay).await;
        if let Err(e) = page.wait_for_network_idle(self.settings.idle_timeout).await {
            debug!(error = %e, "network idle wait after scroll");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::future::ready;

    use super::*;
    use crate::mock::ScriptedPage;

    fn settings(max_no_change: u32) -> ScrollSettings {
        ScrollSettings {
            delay: Duration::from_millis(10),
            timeout: Duration::from_secs(30),
            max_no_change_iterations: max_no_change,
            idle_timeout: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn constant_page_stops_after_max_no_change() {
        let page = ScriptedPage::new().with_heights(&[1000]);
        let handler = ScrollHandler::new(settings(3));
        let count = handler
            .scroll_to_load_results(&page, 50, || ready(7))
            .await;
        assert_eq!(count, 7);
        assert_eq!(page.log().scroll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_the_iteration_that_reaches_target() {
        let page = ScriptedPage::new().with_heights(&[1000, 2000, 3000, 4000]);
        let handler = ScrollHandler::new(settings(3));
        let calls = Cell::new(0usize);
        // 10 before scrolling, then +10 per scroll; 30 is reached on scroll 2.
        let count = handler
            .scroll_to_load_results(&page, 30, || {
                let n = calls.get();
                calls.set(n + 1);
                ready(10 + n * 10)
            })
            .await;
        assert_eq!(count, 30);
        assert_eq!(page.log().scroll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn target_already_met_does_not_scroll() {
        let page = ScriptedPage::new();
        let handler = ScrollHandler::new(settings(3));
        let count = handler.scroll_to_load_results(&page, 5, || ready(20)).await;
        assert_eq!(count, 20);
        assert_eq!(page.log().scroll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn growing_height_resets_no_change_counter() {
        // Height grows on scrolls 1 and 2, then stays flat.
        let page = ScriptedPage::new().with_heights(&[1000, 1500, 2000]);
        let handler = ScrollHandler::new(settings(2));
        let count = handler.scroll_to_load_results(&page, 100, || ready(4)).await;
        assert_eq!(count, 4);
        assert_eq!(page.log().scroll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_timeout_bounds_scrolling() {
        let page = ScriptedPage::new().never_idle();
        let handler = ScrollHandler::new(ScrollSettings {
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            max_no_change_iterations: 1000,
            idle_timeout: Duration::from_millis(10),
        });
        let calls = Cell::new(0usize);
        let count = handler
            .scroll_to_load_results(&page, usize::MAX, || {
                let n = calls.get();
                calls.set(n + 1);
                ready(n)
            })
            .await;
        assert_eq!(page.log().scroll_count(), 5);
        assert_eq!(count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_for_time_returns_count_or_zero() {
        let page = ScriptedPage::new();
        let handler = ScrollHandler::new(settings(3));

        let count = handler
            .scroll_for_time(&page, Duration::from_millis(35), Some(|| ready(12)))
            .await;
        assert_eq!(count, 12);
        assert_eq!(page.log().scroll_count(), 4);

        let none = handler
            .scroll_for_time(&page, Duration::from_millis(5), None::<fn() -> std::future::Ready<usize>>)
            .await;
        assert_eq!(none, 0);
    }
}
