// ABOUTME: Per-invocation run context threaded through all components
// ABOUTME: Carries the run timestamp and the extraction page cap

use chrono::{DateTime, Local};

use crate::normalize::STORE_DATE_FORMAT;

/// Everything a run shares across its entity pipelines. Built once per
/// invocation; no component reads globals.
pub struct RunContext {
    pub started_at: DateTime<Local>,
    /// Upper bound on pages fetched per collection when the remote never
    /// returns an empty page.
    pub max_pages: u32,
}

impl RunContext {
    pub fn new(max_pages: u32) -> Self {
        Self {
            started_at: Local::now(),
            max_pages,
        }
    }

    /// Run timestamp in the store's seconds-precision form, used in
    /// notification texts.
    pub fn stamp(&self) -> String {
        self.started_at.format(STORE_DATE_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_is_seconds_precision() {
        let ctx = RunContext::new(4);
        let stamp = ctx.stamp();
        // "YYYY-MM-DD HH:MM:SS"
        assert_eq!(stamp.len(), 19);
        assert_eq!(stamp.as_bytes()[4], b'-');
        assert_eq!(stamp.as_bytes()[10], b' ');
        assert_eq!(stamp.as_bytes()[13], b':');
    }
}
