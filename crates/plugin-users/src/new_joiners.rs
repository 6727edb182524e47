use async_trait::async_trait;

use plugin_core::access::ensure_can_execute;
use plugin_core::{
    CommandError, CommandResult, Plugin, PluginContext, PluginSpec, UpstreamContext, html_escape,
    send_html, send_text,
};

use crate::iso_timestamp;

pub const LIST_NEW_JOINERS_COMMAND: &str = "list-new-joiners";

const DEFAULT_LIMIT: u32 = 10;
const MIN_LIMIT: u32 = 1;
const MAX_LIMIT: u32 = 100;

/// Parses the optional limit, flooring fractions and clamping to the allowed
/// range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_limit(raw: Option<&str>) -> CommandResult<u32> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_LIMIT);
    };
    let parsed = raw
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| {
            CommandError::user(format!(
                "Invalid limit. Provide a number between {MIN_LIMIT} and {MAX_LIMIT}."
            ))
        })?;
    let clamped = parsed
        .floor()
        .clamp(f64::from(MIN_LIMIT), f64::from(MAX_LIMIT));
    Ok(clamped as u32)
}

/// The most recently registered accounts.
#[derive(Debug)]
pub struct ListNewJoiners;

#[async_trait]
impl Plugin for ListNewJoiners {
    fn id(&self) -> &'static str {
        LIST_NEW_JOINERS_COMMAND
    }

    fn help(&self) -> &'static str {
        "list-new-joiners [<limit>]  Show the newest accounts (default 10, at most 100)"
    }

    async fn run(&self, ctx: &PluginContext, args: &[String], _spec: &PluginSpec) -> CommandResult {
        ensure_can_execute(ctx, None).await?;
        let limit = parse_limit(args.first().map(String::as_str))?;

        let users = ctx
            .admin
            .newest_user_accounts(limit)
            .await
            .or_upstream("Unable to retrieve user accounts.")?;
        let lines: Vec<_> = users
            .iter()
            .filter(|u| !u.is_guest && !u.deactivated)
            .map(|u| {
                format!(
                    "{}, {}, {}",
                    u.name,
                    u.displayname.as_deref().unwrap_or_default(),
                    iso_timestamp(u.creation_ts)
                )
            })
            .collect();
        if lines.is_empty() {
            return send_text(ctx, "No users found").await;
        }
        send_html(
            ctx,
            &format!(
                "New joiners (Name, Displayname, CreatedAt):<br/><br/><pre>{}</pre>",
                html_escape(&lines.join("\n"))
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use plugin_core::testing::{TestContext, args};
    use serde_json::json;

    #[test]
    fn limit_is_clamped_and_floored() {
        assert_eq!(parse_limit(None).expect("default"), 10);
        assert_eq!(parse_limit(Some("25")).expect("plain"), 25);
        assert_eq!(parse_limit(Some("7.9")).expect("fraction"), 7);
        assert_eq!(parse_limit(Some("0")).expect("low"), 1);
        assert_eq!(parse_limit(Some("500")).expect("high"), 100);
        assert!(parse_limit(Some("ten")).is_err());
        assert!(parse_limit(Some("inf")).is_err());
    }

    #[tokio::test]
    async fn guests_and_deactivated_accounts_are_hidden() {
        let server = MockServer::start();
        let listing = server.mock(|when, then| {
            when.method(GET)
                .path("/_synapse/admin/v2/users")
                .query_param("limit", "3")
                .query_param("order_by", "creation_ts");
            then.status(200).json_body(json!({
                "users": [
                    { "name": "@new:example.org", "displayname": "New", "creation_ts": 1_700_000_000_000_i64 },
                    { "name": "@guest:example.org", "is_guest": 1, "creation_ts": 1_690_000_000_000_i64 },
                    { "name": "@gone:example.org", "deactivated": true, "creation_ts": 1_680_000_000_000_i64 },
                    { "name": "@quiet:example.org", "creation_ts": 0 }
                ],
                "total": 4
            }));
        });
        let t = TestContext::builder(&server.base_url()).build();
        ListNewJoiners
            .run(&t.ctx, &args("3"), &ListNewJoiners.spec())
            .await
            .expect("listed");
        listing.assert_calls(1);
        assert_eq!(
            t.chat.last_body().as_deref(),
            Some(
                "New joiners (Name, Displayname, CreatedAt):<br/><br/><pre>\
                 @new:example.org, New, 2023-11-14T22:13:20Z\n\
                 @quiet:example.org, , 1970-01-01T00:00:00Z</pre>"
            )
        );
    }

    #[tokio::test]
    async fn empty_listing_says_so() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/_synapse/admin/v2/users");
            then.status(200).json_body(json!({ "users": [], "total": 0 }));
        });
        let t = TestContext::builder(&server.base_url()).build();
        ListNewJoiners
            .run(&t.ctx, &[], &ListNewJoiners.spec())
            .await
            .expect("listed");
        assert_eq!(t.chat.last_body().as_deref(), Some("No users found"));
    }
}
