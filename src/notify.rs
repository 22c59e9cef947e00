// ABOUTME: Run-outcome notification: trait seam plus the Telegram transport
// ABOUTME: Composed and sent exactly once per run, at the run boundary

use std::time::Duration;

use anyhow::{Context, Result};

use crate::context::RunContext;
use crate::pipeline::RunReport;

/// Delivers one human-readable status line per run.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Telegram bot transport for run notifications.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client for notifications")?;

        Ok(Self {
            client,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }
}

impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let response = self
            .client
            .get(&url)
            .query(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .context("Failed to reach Telegram")?;

        if !response.status().is_success() {
            anyhow::bail!("Telegram returned {}", response.status());
        }

        Ok(())
    }
}

/// Success line, with a partial-data warning when any request failed so an
/// incomplete mirror never masquerades as a clean one.
pub fn success_text(ctx: &RunContext, report: &RunReport) -> String {
    let mut text = format!(
        "{} - ✅ Sults mirror completed: {}",
        ctx.stamp(),
        report.summary()
    );
    if report.is_partial() {
        text.push_str(&format!(
            " ⚠️ {} requests failed, data may be partial",
            report.failed_requests()
        ));
    }
    text
}

pub fn failure_text(ctx: &RunContext, error: &anyhow::Error) -> String {
    format!("{} - ❌ Sults mirror failed: {error:#}", ctx.stamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EntityOutcome;

    fn report(failed_requests: usize) -> RunReport {
        RunReport {
            entities: vec![EntityOutcome {
                entity: "projects",
                fetched: 10,
                failed_requests,
                skipped_records: 0,
                updated: 7,
                inserted: 2,
                deleted: 1,
            }],
        }
    }

    #[test]
    fn test_success_text_carries_stamp_and_counts() {
        let ctx = RunContext::new(4);
        let text = success_text(&ctx, &report(0));
        assert!(text.contains(&ctx.stamp()));
        assert!(text.contains("✅"));
        assert!(text.contains("7 updated, 2 inserted, 1 deleted"));
        assert!(!text.contains("⚠️"));
    }

    #[test]
    fn test_success_text_flags_partial_data() {
        let ctx = RunContext::new(4);
        let text = success_text(&ctx, &report(3));
        assert!(text.contains("⚠️ 3 requests failed"));
    }

    #[test]
    fn test_failure_text_carries_error_chain() {
        let ctx = RunContext::new(4);
        let error = anyhow::anyhow!("socket closed").context("Failed to apply the leads batch");
        let text = failure_text(&ctx, &error);
        assert!(text.contains("❌"));
        assert!(text.contains("Failed to apply the leads batch"));
        assert!(text.contains("socket closed"));
    }

    #[test]
    fn test_notifier_creation() {
        assert!(TelegramNotifier::new("token", "chat").is_ok());
    }
}
