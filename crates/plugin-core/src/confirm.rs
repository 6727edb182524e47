use core::time::Duration;

use matrix_sdk::ruma::UserId;
use tracing::debug;

use crate::state::TemporaryState;
use crate::{CommandError, CommandResult, PluginContext, html_escape, send_html};

/// Literal argument that turns a staged destructive command into its
/// execution.
pub const CONFIRMATION_FLAG: &str = "confirm";

/// Two-phase gate for a destructive command.
///
/// The first invocation stages the validated target under the sender's id and
/// prompts for `<prefix> <command> confirm`. The confirming invocation takes
/// the staged value out, so a replayed confirmation finds nothing.
#[derive(Debug)]
pub struct Confirmation<T> {
    command: &'static str,
    request: &'static str,
    pending: TemporaryState<T>,
}

impl<T: Clone + Send> Confirmation<T> {
    /// `request` names the pending action in the "nothing to confirm"
    /// message, e.g. "room deletion".
    #[must_use]
    pub fn new(command: &'static str, request: &'static str, ttl: Duration) -> Self {
        Self {
            command,
            request,
            pending: TemporaryState::new(ttl),
        }
    }

    #[must_use]
    pub fn is_confirmation(args: &[String]) -> bool {
        args.first().is_some_and(|a| a == CONFIRMATION_FLAG)
    }

    #[must_use]
    pub fn command_line(&self, prefix: &str) -> String {
        format!("{prefix} {} {CONFIRMATION_FLAG}", self.command)
    }

    #[must_use]
    pub fn prompt_html(&self, prefix: &str, question_html: &str, proceed_with: &str) -> String {
        format!(
            "{question_html}<br />To proceed with {proceed_with}, please reply with the following command within {}:<br /><code>{}</code>",
            describe_window(self.pending.ttl()),
            html_escape(&self.command_line(prefix)),
        )
    }

    /// Stores `value` for the sender and posts the confirmation prompt.
    pub async fn stage(
        &self,
        ctx: &PluginContext,
        value: T,
        question_html: &str,
        proceed_with: &str,
    ) -> CommandResult {
        self.pending.set(ctx.sender.as_str(), value).await;
        debug!(command = self.command, sender = %ctx.sender, "confirmation staged");
        let html = self.prompt_html(&ctx.settings.command_prefix, question_html, proceed_with);
        send_html(ctx, &html).await
    }

    /// Takes the sender's staged value out of the store.
    pub async fn consume(&self, sender: &UserId) -> CommandResult<T> {
        self.pending.take(sender.as_str()).await.ok_or_else(|| {
            CommandError::user(format!(
                "There is nothing to confirm. It is possible that your {} request has expired. Please run the command again.",
                self.request
            ))
        })
    }
}

fn describe_window(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    let (count, unit) = if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {unit}{plural}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_sdk::ruma::user_id;

    fn gate() -> Confirmation<String> {
        Confirmation::new("delete-room", "room deletion", Duration::from_secs(120))
    }

    #[test]
    fn prompt_contains_literal_confirm_command() {
        let html = gate().prompt_html("!admin", "Are you sure?", "the deletion");
        assert!(html.starts_with("Are you sure?<br />"));
        assert!(html.contains("within 2 minutes:"));
        assert!(html.ends_with("<code>!admin delete-room confirm</code>"));
    }

    #[test]
    fn confirmation_flag_must_be_first_argument() {
        let args = |xs: &[&str]| xs.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
        assert!(Confirmation::<()>::is_confirmation(&args(&["confirm"])));
        assert!(!Confirmation::<()>::is_confirmation(&args(&["#room:x", "confirm"])));
        assert!(!Confirmation::<()>::is_confirmation(&[]));
    }

    #[test]
    fn window_wording() {
        assert_eq!(describe_window(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_window(Duration::from_secs(120)), "2 minutes");
        assert_eq!(describe_window(Duration::from_secs(90)), "90 seconds");
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_is_consumed_once() {
        let gate = gate();
        let alice = user_id!("@alice:example.org");
        gate.pending.set(alice.as_str(), "!room:example.org".to_owned()).await;

        assert_eq!(gate.consume(alice).await.expect("staged"), "!room:example.org");
        let err = gate.consume(alice).await.expect_err("replay");
        assert!(err.user_message().starts_with("There is nothing to confirm."));
        assert!(err.user_message().contains("room deletion request"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_confirmation_is_refused() {
        let gate = gate();
        let alice = user_id!("@alice:example.org");
        gate.pending.set(alice.as_str(), "!room:example.org".to_owned()).await;
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(gate.consume(alice).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_requests_are_per_sender() {
        let gate = gate();
        gate.pending
            .set("@alice:example.org", "!a:example.org".to_owned())
            .await;
        assert!(gate.consume(user_id!("@bob:example.org")).await.is_err());
        assert!(gate.consume(user_id!("@alice:example.org")).await.is_ok());
    }
}
