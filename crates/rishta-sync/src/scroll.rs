//! Auto-scroll bookkeeping for the message pane.
//!
//! When a load completes the view scrolls to the newest message. The
//! initial attempt can race the layout: content renders after the
//! scroll ran, so the offset never moved even though there is something
//! to scroll to. The view reports what it observed and gets exactly one
//! retry for that case.

/// Command the view executes against its scroll container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollCommand {
    ToLatest,
}

/// What the view measured around its scroll attempt.
#[derive(Debug, Clone, Copy)]
pub struct ViewportMetrics {
    pub content_height: f64,
    pub container_height: f64,
    pub offset_before: f64,
    pub offset_after: f64,
}

impl ViewportMetrics {
    fn scroll_failed(&self) -> bool {
        self.content_height > self.container_height && self.offset_after == self.offset_before
    }
}

#[derive(Debug, Default)]
pub struct ScrollSync {
    retry_armed: bool,
}

impl ScrollSync {
    /// A message load just completed: scroll to the latest message and
    /// arm one retry.
    pub fn on_messages_loaded(&mut self) -> ScrollCommand {
        self.retry_armed = true;
        ScrollCommand::ToLatest
    }

    /// The view reports the outcome of its scroll attempt. Returns a
    /// retry command at most once per load, and only when the content
    /// overflows the container but the offset did not move.
    pub fn on_viewport_report(&mut self, metrics: ViewportMetrics) -> Option<ScrollCommand> {
        if !self.retry_armed {
            return None;
        }
        self.retry_armed = false;
        metrics.scroll_failed().then_some(ScrollCommand::ToLatest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(content: f64, container: f64, before: f64, after: f64) -> ViewportMetrics {
        ViewportMetrics {
            content_height: content,
            container_height: container,
            offset_before: before,
            offset_after: after,
        }
    }

    #[test]
    fn retries_once_when_scroll_did_not_move() {
        let mut scroll = ScrollSync::default();
        assert_eq!(scroll.on_messages_loaded(), ScrollCommand::ToLatest);

        let stuck = metrics(2000.0, 600.0, 0.0, 0.0);
        assert_eq!(scroll.on_viewport_report(stuck), Some(ScrollCommand::ToLatest));

        // Only one retry per load.
        assert_eq!(scroll.on_viewport_report(stuck), None);
    }

    #[test]
    fn no_retry_when_scroll_moved() {
        let mut scroll = ScrollSync::default();
        scroll.on_messages_loaded();
        let moved = metrics(2000.0, 600.0, 0.0, 1400.0);
        assert_eq!(scroll.on_viewport_report(moved), None);
    }

    #[test]
    fn no_retry_when_content_fits() {
        let mut scroll = ScrollSync::default();
        scroll.on_messages_loaded();
        let fits = metrics(300.0, 600.0, 0.0, 0.0);
        assert_eq!(scroll.on_viewport_report(fits), None);
    }

    #[test]
    fn reports_without_a_load_are_ignored() {
        let mut scroll = ScrollSync::default();
        let stuck = metrics(2000.0, 600.0, 0.0, 0.0);
        assert_eq!(scroll.on_viewport_report(stuck), None);
    }

    #[test]
    fn each_load_rearms_the_retry() {
        let mut scroll = ScrollSync::default();
        scroll.on_messages_loaded();
        let stuck = metrics(2000.0, 600.0, 0.0, 0.0);
        assert!(scroll.on_viewport_report(stuck).is_some());

        scroll.on_messages_loaded();
        assert!(scroll.on_viewport_report(stuck).is_some());
    }
}
