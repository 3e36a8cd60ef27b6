/// HTML pages and email texts
use crate::account::{Account, AuthToken, TokenType};

/// Escape text for inclusion in html
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn base_page(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title} - Padlock Cloud</title>
    <link rel="stylesheet" href="/static/css/main.css">
</head>
<body>
    <main>
        <h1>{title}</h1>
        {content}
    </main>
</body>
</html>
"#,
        title = escape(title),
        content = content
    )
}

pub fn error_page(message: &str) -> String {
    base_page(
        "Something went wrong",
        &format!("<p class=\"error\">{}</p>", escape(message)),
    )
}

pub fn login_page() -> String {
    base_page(
        "Log in",
        r#"<form method="post" action="/login/">
            <input type="email" name="email" placeholder="Email address" required>
            <input type="hidden" name="type" value="web">
            <button type="submit">Send login link</button>
        </form>"#,
    )
}

pub fn login_link_sent_page(email: &str) -> String {
    base_page(
        "Check your inbox",
        &format!(
            "<p>We sent a login link to <strong>{}</strong>. \
             Open it on this device to continue.</p>",
            escape(email)
        ),
    )
}

pub fn activation_success_page(email: &str) -> String {
    base_page(
        "Device connected",
        &format!(
            "<p>Your device is now connected to the account <strong>{}</strong>. \
             You can close this window.</p>",
            escape(email)
        ),
    )
}

pub fn store_deleted_page(email: &str) -> String {
    base_page(
        "Data deleted",
        &format!(
            "<p>All data stored for <strong>{}</strong> has been deleted.</p>\
             <p><a href=\"/dashboard/\">Back to dashboard</a></p>",
            escape(email)
        ),
    )
}

fn token_row(token: &AuthToken, current: &str, csrf_token: &str) -> String {
    let last_used = token
        .last_used
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    let label = if token.token == current {
        "this session".to_string()
    } else {
        token.token_type.to_string()
    };

    format!(
        r#"<tr>
            <td>{label}</td>
            <td>{created}</td>
            <td>{last_used}</td>
            <td>
                <form method="post" action="/revoke/">
                    <input type="hidden" name="csrf_token" value="{csrf}">
                    <input type="hidden" name="token" value="{token}">
                    <button type="submit">Revoke</button>
                </form>
            </td>
        </tr>"#,
        label = escape(&label),
        created = token.created.format("%Y-%m-%d %H:%M UTC"),
        last_used = last_used,
        csrf = escape(csrf_token),
        token = escape(&token.token),
    )
}

pub fn dashboard_page(
    account: &Account,
    current_token: &str,
    csrf_token: &str,
    has_data: bool,
) -> String {
    let rows = account
        .auth_tokens
        .iter()
        .map(|t| token_row(t, current_token, csrf_token))
        .collect::<Vec<_>>()
        .join("\n");

    let data_section = if has_data {
        format!(
            r#"<form method="post" action="/deletestore/">
                <input type="hidden" name="csrf_token" value="{}">
                <button type="submit">Delete all data</button>
            </form>"#,
            escape(csrf_token)
        )
    } else {
        "<p>No data stored.</p>".to_string()
    };

    base_page(
        "Dashboard",
        &format!(
            r#"<p>Logged in as <strong>{email}</strong> - <a href="/logout/">Log out</a></p>
            <h2>Connected devices</h2>
            <table>
                <tr><th>Type</th><th>Created</th><th>Last used</th><th></th></tr>
                {rows}
            </table>
            <h2>Data</h2>
            {data_section}"#,
            email = escape(&account.email),
            rows = rows,
            data_section = data_section,
        ),
    )
}

/// Subject and body of the email confirming a token request
pub fn activation_email(link: &str, token_type: TokenType) -> (String, String) {
    let (subject, intro) = match token_type {
        TokenType::Api => (
            "Connect to Padlock Cloud",
            "A device requested access to your Padlock Cloud account.",
        ),
        TokenType::Web => (
            "Your Padlock Cloud login link",
            "Someone requested to log in to your Padlock Cloud dashboard.",
        ),
    };

    let body = format!(
        r#"Hi there,

{intro}

Open the link below to confirm:

{link}

This link expires in 24 hours. If you did not make this request, you can
safely ignore this email.

Best regards,
Padlock Cloud
"#,
        intro = intro,
        link = link
    );

    (subject.to_string(), body)
}

/// Subject and body of the email confirming a data store deletion
pub fn delete_store_email(link: &str) -> (String, String) {
    let body = format!(
        r#"Hi there,

A device requested to delete all data stored in your Padlock Cloud account.
To review and confirm, log in to your dashboard with the link below:

{link}

This link expires in 24 hours. If you did not make this request, you can
safely ignore this email and your data will stay untouched.

Best regards,
Padlock Cloud
"#,
        link = link
    );

    ("Delete your Padlock Cloud data".to_string(), body)
}

pub fn deprecated_version_email() -> (String, String) {
    let body = r#"Hi there,

It looks like you are using an outdated version of Padlock that can no longer
sync with Padlock Cloud. Please update to the latest version to keep your
data in sync.

Best regards,
Padlock Cloud
"#;

    (
        "Please update your version of Padlock".to_string(),
        body.to_string(),
    )
}

pub fn error_notification_email(summary: &str, dump: &str) -> (String, String) {
    (
        format!("Padlock Cloud error: {}", summary),
        format!("{}\n\nRequest:\n{}\n", summary, dump),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_dashboard_lists_tokens_and_csrf() {
        let mut account = Account::new("u@example.com");
        let current = AuthToken::new("u@example.com", TokenType::Web);
        let device = AuthToken::new("u@example.com", TokenType::Api);
        account.add_auth_token(current.clone());
        account.add_auth_token(device.clone());

        let page = dashboard_page(&account, &current.token, "csrf123", true);
        assert!(page.contains(&device.token));
        assert!(page.contains("this session"));
        assert!(page.contains("value=\"csrf123\""));
        assert!(page.contains("/deletestore/"));

        let page = dashboard_page(&account, &current.token, "csrf123", false);
        assert!(!page.contains("/deletestore/"));
    }

    #[test]
    fn test_activation_email_contains_link() {
        let (subject, body) =
            activation_email("https://cloud.example.com/activate/?v=1&t=abc", TokenType::Api);
        assert!(subject.contains("Padlock"));
        assert!(body.contains("https://cloud.example.com/activate/?v=1&t=abc"));
    }
}
