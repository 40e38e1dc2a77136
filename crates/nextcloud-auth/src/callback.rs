//! One-shot local listener for the OAuth redirect.
//!
//! Command-line and desktop hosts have no web server of their own. After
//! the user approves access, Nextcloud redirects the browser to
//! `http://127.0.0.1:<port>/...?code=xxx&state=yyy`; [`CallbackServer`]
//! accepts that single request, answers with a short HTML page, and hands
//! back the [`CallbackParams`].
//!
//! Web hosts that already route the redirect can call
//! [`CallbackParams::from_query`] on the raw query string instead.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{AuthError, Result};

/// Page shown to the browser once the code has been captured.
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Nextcloud login complete</title>
    <style>
        body { font-family: sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #0082c9; }
        .card { text-align: center; padding: 3rem; background: white; border-radius: 12px; }
        h1 { color: #0082c9; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Login complete</h1>
        <p>You can close this tab and return to the terminal.</p>
    </div>
</body>
</html>"#;

/// Page shown when the redirect carried an error or no code.
const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Nextcloud login failed</title></head>
<body><h1>Login failed</h1><p>Return to the terminal for details.</p></body>
</html>"#;

/// Page for any request that is not the redirect.
const NOT_FOUND_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Not found</title></head>
<body><h1>Not found</h1></body>
</html>"#;

/// How long a single connection may take to send its request head.
const REQUEST_READ_TIMEOUT_SECS: u64 = 5;

/// Upper bound on the request head we are willing to read.
const MAX_REQUEST_BYTES: usize = 8192;

/// Query parameters of a successful authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// The authorization code.
    pub code: String,
    /// The `state` value echoed back by the provider, if any.
    pub state: Option<String>,
}

impl CallbackParams {
    /// Extract the code and state from a redirect query string.
    ///
    /// # Errors
    ///
    /// [`AuthError::FlowFailed`] when the provider reported an `error`
    /// (its `error_description` is included when present) or when `code`
    /// is missing.
    pub fn from_query(query: &str) -> Result<Self> {
        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut error_description = None;

        let query = query.trim_start_matches('?');

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            let reason = match error_description {
                Some(description) => {
                    format!("authorization server returned error: {error} ({description})")
                }
                None => format!("authorization server returned error: {error}"),
            };
            return Err(AuthError::FlowFailed { reason });
        }

        let code = code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::FlowFailed {
                reason: "callback missing 'code' parameter".to_string(),
            })?;

        Ok(Self { code, state })
    }

    /// The query string of a raw HTTP request head, if the request looks
    /// like an OAuth redirect (it carries `code` or `error`).
    fn redirect_query(request: &str) -> Option<&str> {
        // "GET /callback?code=xxx&state=yyy HTTP/1.1"
        let target = request.lines().next()?.split_whitespace().nth(1)?;
        let (_, query) = target.split_once('?')?;

        url::form_urlencoded::parse(query.as_bytes())
            .any(|(key, _)| key == "code" || key == "error")
            .then_some(query)
    }
}

/// A minimal HTTP listener that waits for a single OAuth redirect.
pub struct CallbackServer;

impl CallbackServer {
    /// Bind `127.0.0.1:{port}` and wait for the redirect.
    ///
    /// # Errors
    ///
    /// - [`AuthError::CallbackTimeout`] if `timeout_secs` elapse first.
    /// - [`AuthError::Io`] if the listener cannot bind.
    /// - [`AuthError::FlowFailed`] if the redirect carries an error or no code.
    pub async fn start(port: u16, timeout_secs: u64) -> Result<CallbackParams> {
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(addr = %addr, "waiting for OAuth redirect");

        Self::wait(&listener, timeout_secs).await
    }

    /// Wait on an already bound listener, e.g. one bound to port 0.
    pub async fn wait(listener: &TcpListener, timeout_secs: u64) -> Result<CallbackParams> {
        let timeout = tokio::time::Duration::from_secs(timeout_secs);

        match tokio::time::timeout(timeout, Self::accept_redirect(listener)).await {
            Ok(inner) => inner,
            Err(_) => Err(AuthError::CallbackTimeout { timeout_secs }),
        }
    }

    /// Accept connections until one carries the redirect, then answer it.
    ///
    /// Anything else (favicon requests, browser preconnects, probes) gets a
    /// 404 and the listener keeps waiting.
    async fn accept_redirect(listener: &TcpListener) -> Result<CallbackParams> {
        loop {
            let (mut stream, peer) = listener.accept().await?;
            tracing::debug!(peer = %peer, "accepted callback connection");

            let read_timeout = tokio::time::Duration::from_secs(REQUEST_READ_TIMEOUT_SECS);
            let request =
                match tokio::time::timeout(read_timeout, read_request_head(&mut stream)).await {
                    Ok(Ok(request)) => request,
                    Ok(Err(e)) => {
                        tracing::debug!(peer = %peer, error = %e, "dropping unreadable connection");
                        continue;
                    }
                    Err(_) => {
                        tracing::debug!(peer = %peer, "dropping idle connection");
                        continue;
                    }
                };

            let Some(query) = CallbackParams::redirect_query(&request) else {
                tracing::debug!(peer = %peer, "ignoring request without OAuth parameters");
                let _ = respond(&mut stream, "404 Not Found", NOT_FOUND_HTML).await;
                continue;
            };

            let params = CallbackParams::from_query(query);
            let (status, body) = match &params {
                Ok(_) => ("200 OK", SUCCESS_HTML),
                Err(_) => ("400 Bad Request", FAILURE_HTML),
            };
            if let Err(e) = respond(&mut stream, status, body).await {
                tracing::warn!(error = %e, "failed to answer the browser");
            }

            if params.is_ok() {
                tracing::info!("authorization code received");
            }

            return params;
        }
    }
}

/// Read until the end of the request head, EOF, or [`MAX_REQUEST_BYTES`].
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    while buf.len() < MAX_REQUEST_BYTES && !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
