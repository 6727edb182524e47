use core::future::Future;

use tracing::debug;

use crate::settings::Pacing;
use crate::{CommandResult, PluginContext, html_escape, send_html};

/// Server message suffix for an invite to someone who is already a member.
const ALREADY_IN_ROOM: &str = "is already in the room.";

/// What happened to one subject of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded(String),
    Skipped,
    Failed(String),
}

impl ItemOutcome {
    /// Classifies the result of one attempt. Failures whose message says the
    /// subject is already in the room count as skipped.
    pub fn classify(
        result: CommandResult,
        success_line: impl FnOnce() -> String,
        failure_line: impl FnOnce(&str) -> String,
    ) -> Self {
        match result {
            Ok(()) => Self::Succeeded(success_line()),
            Err(err) => {
                let message = err.item_message();
                if message.ends_with(ALREADY_IN_ROOM) {
                    Self::Skipped
                } else {
                    Self::Failed(failure_line(&message))
                }
            }
        }
    }
}

/// Aggregated outcome of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReport {
    succeeded: Vec<String>,
    failed: Vec<String>,
    skipped: usize,
}

impl CommandReport {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded(line) => self.succeeded.push(line),
            ItemOutcome::Failed(line) => self.failed.push(line),
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> &[String] {
        &self.succeeded
    }

    #[must_use]
    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped
    }

    /// Failure lines first, then success lines.
    #[must_use]
    pub fn body(&self) -> String {
        self.failed
            .iter()
            .chain(&self.succeeded)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[must_use]
    pub fn chunks(&self, max_lines: usize) -> Vec<String> {
        chunk_lines(&self.body(), max_lines)
    }
}

/// Splits `text` into pieces of at most `max_lines` lines. Empty text has no
/// chunks.
#[must_use]
pub fn chunk_lines(text: &str, max_lines: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n')
        .collect::<Vec<_>>()
        .chunks(max_lines.max(1))
        .map(|lines| lines.join("\n"))
        .collect()
}

/// Runs `attempt` over `subjects` one at a time, in order, pausing between
/// items. A failing item never stops the loop.
pub async fn run_bulk<T, F, Fut>(
    subjects: impl IntoIterator<Item = T>,
    pacing: Pacing,
    mut attempt: F,
) -> CommandReport
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ItemOutcome>,
{
    let mut report = CommandReport::default();
    for (i, subject) in subjects.into_iter().enumerate() {
        if i > 0 {
            pacing.pause().await;
        }
        report.record(attempt(subject).await);
    }
    report
}

/// Posts the report body as `Command execution report i/N` messages.
pub async fn send_report(ctx: &PluginContext, report: &CommandReport) -> CommandResult {
    let chunks = report.chunks(ctx.settings.report_chunk_lines);
    let total = chunks.len();
    debug!(
        attempted = report.attempted(),
        failed = report.failed().len(),
        skipped = report.skipped(),
        messages = total,
        "Sending command report"
    );
    for (i, chunk) in chunks.iter().enumerate() {
        let html = format!(
            "Command execution report {}/{total}<br /><pre>{}</pre>",
            i + 1,
            html_escape(chunk)
        );
        send_html(ctx, &html).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandError;
    use crate::testing::TestContext;
    use admin_api::ApiError;
    use core::time::Duration;
    use tokio::time::Instant;

    fn invite_outcome(user: &str, result: CommandResult) -> ItemOutcome {
        ItemOutcome::classify(
            result,
            || format!("✓ Successfully invited {user}"),
            |message| format!("✕ Failed to invite {user} | {message}"),
        )
    }

    #[tokio::test]
    async fn bulk_outcomes_are_classified() {
        let users = ["item1", "item2", "item3", "item4", "item5"];
        let report = run_bulk(users, Pacing::none(), |user| async move {
            let result = match user {
                "item2" => Err(CommandError::from(ApiError::with_message(
                    "@item2:example.org is already in the room.",
                ))),
                "item4" => Err(CommandError::from(ApiError::with_message("network error"))),
                _ => Ok(()),
            };
            invite_outcome(user, result)
        })
        .await;

        assert_eq!(report.succeeded().len(), 3);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), ["✕ Failed to invite item4 | network error"]);
        assert_eq!(report.attempted(), 5);
    }

    #[test]
    fn body_lists_failures_before_successes() {
        let mut report = CommandReport::default();
        report.record(ItemOutcome::Succeeded("ok a".to_owned()));
        report.record(ItemOutcome::Failed("bad b".to_owned()));
        report.record(ItemOutcome::Succeeded("ok c".to_owned()));
        report.record(ItemOutcome::Failed("bad d".to_owned()));
        assert_eq!(report.body(), "bad b\nbad d\nok a\nok c");
    }

    #[test]
    fn transport_failure_line_names_an_unknown_problem() {
        let outcome = invite_outcome(
            "carol",
            Err(CommandError::from(ApiError::new("error sending request: connection refused"))),
        );
        assert_eq!(
            outcome,
            ItemOutcome::Failed("✕ Failed to invite carol | unknown problem".to_owned())
        );
    }

    #[test]
    fn pre_check_failure_is_a_failure_not_a_skip() {
        let outcome = invite_outcome(
            "bob",
            Err(CommandError::user(
                "Wrong authentication provider. Should be \"oidc\"",
            )),
        );
        assert!(matches!(outcome, ItemOutcome::Failed(line) if line.ends_with("Should be \"oidc\"")));
    }

    #[test]
    fn chunking_250_lines_by_100() {
        let text = (1..=250)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_lines(&text, 100);
        let sizes: Vec<_> = chunks.iter().map(|c| c.lines().count()).collect();
        assert_eq!(sizes, [100, 100, 50]);
        assert!(chunks[2].ends_with("line 250"));
    }

    #[tokio::test]
    async fn long_report_is_sent_in_numbered_parts() {
        let server = httpmock::MockServer::start();
        let t = TestContext::builder(&server.base_url()).build();
        let mut report = CommandReport::default();
        for i in 1..=250 {
            report.record(ItemOutcome::Succeeded(format!("✓ invited user{i}")));
        }

        send_report(&t.ctx, &report).await.expect("report sent");

        let sent = t.chat.sent();
        let headers: Vec<_> = sent
            .iter()
            .map(|m| m.body.split("<br />").next().unwrap_or_default())
            .collect();
        assert_eq!(
            headers,
            [
                "Command execution report 1/3",
                "Command execution report 2/3",
                "Command execution report 3/3",
            ]
        );
        assert!(sent.iter().all(|m| m.html));
        assert!(sent[2].body.contains("✓ invited user201\n"));
        assert!(sent[2].body.ends_with("✓ invited user250</pre>"));
    }

    #[test]
    fn empty_report_has_no_chunks() {
        assert!(CommandReport::default().chunks(100).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn items_are_paced_but_not_the_first() {
        let start = Instant::now();
        let pacing = Pacing { delay_ms: 300 };
        let mut seen = Vec::new();
        run_bulk([1, 2, 3], pacing, |n| {
            seen.push((n, start.elapsed()));
            async { ItemOutcome::Skipped }
        })
        .await;
        assert_eq!(
            seen,
            [
                (1, Duration::ZERO),
                (2, Duration::from_millis(300)),
                (3, Duration::from_millis(600)),
            ]
        );
    }
}
