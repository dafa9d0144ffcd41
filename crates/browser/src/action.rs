//! Page-level operations over a connected [`CdpClient`].

use crate::cdp::CdpClient;
use krill::{Error, ErrorKind, Result};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Evaluate `expression` in the page, returning its value by value.
pub async fn evaluate(cdp: &CdpClient, expression: &str) -> Result<Value> {
    let result = cdp
        .send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
            }),
        )
        .await?;

    if let Some(exception) = result.get("exceptionDetails") {
        let text = exception
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("JavaScript exception");
        return Err(Error::with_detail(
            ErrorKind::Browser,
            "Evaluation failed",
            text.to_string(),
        ));
    }

    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Navigate to `url` and wait for the document to become ready.
pub async fn navigate(cdp: &CdpClient, url: &str, timeout: Duration) -> Result<()> {
    let result = cdp.send_command("Page.navigate", json!({"url": url})).await?;
    if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
        if !error_text.is_empty() {
            return Err(Error::with_detail(
                ErrorKind::Browser,
                "Navigation failed",
                format!("{url}: {error_text}"),
            ));
        }
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = evaluate(cdp, "document.readyState").await?;
        if state.as_str() == Some("complete") || state.as_str() == Some("interactive") {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::with_detail(
                ErrorKind::Timeout,
                "Navigation timed out",
                url.to_string(),
            ));
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// The page's full HTML.
pub async fn content(cdp: &CdpClient) -> Result<String> {
    let value = evaluate(cdp, "document.documentElement.outerHTML").await?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

/// Capture a screenshot; returns base64-encoded image data.
pub async fn screenshot(cdp: &CdpClient, format: &str) -> Result<String> {
    let result = cdp
        .send_command("Page.captureScreenshot", json!({"format": format}))
        .await?;
    result
        .get("data")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::new(ErrorKind::Browser, "Screenshot returned no data"))
}

/// Export the page as PDF; returns base64-encoded document data.
pub async fn pdf(cdp: &CdpClient) -> Result<String> {
    let result = cdp.send_command("Page.printToPDF", json!({})).await?;
    result
        .get("data")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::new(ErrorKind::Browser, "PDF export returned no data"))
}

/// Poll until `selector` appears in the DOM, with 100 ms granularity.
pub async fn wait_for_selector(cdp: &CdpClient, selector: &str, timeout: Duration) -> Result<()> {
    let selector_js = serde_json::to_string(selector)?;
    let expression = format!("document.querySelector({selector_js}) !== null");

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if evaluate(cdp, &expression).await?.as_bool() == Some(true) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::with_detail(
                ErrorKind::Timeout,
                "Timed out waiting for selector",
                selector.to_string(),
            ));
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// Click the first element matching `selector`.
pub async fn click(cdp: &CdpClient, selector: &str) -> Result<()> {
    let selector_js = serde_json::to_string(selector)?;
    let expression = format!(
        "(() => {{ const el = document.querySelector({selector_js}); if (!el) return false; el.click(); return true; }})()"
    );
    match evaluate(cdp, &expression).await?.as_bool() {
        Some(true) => Ok(()),
        _ => Err(Error::with_detail(
            ErrorKind::NotFound,
            "No element matches selector",
            selector.to_string(),
        )),
    }
}

/// Set the value of the first element matching `selector`, dispatching
/// input and change events so framework bindings notice.
pub async fn fill(cdp: &CdpClient, selector: &str, value: &str) -> Result<()> {
    let selector_js = serde_json::to_string(selector)?;
    let value_js = serde_json::to_string(value)?;
    let expression = format!(
        "(() => {{ const el = document.querySelector({selector_js}); if (!el) return false; \
         el.value = {value_js}; \
         el.dispatchEvent(new Event('input', {{bubbles: true}})); \
         el.dispatchEvent(new Event('change', {{bubbles: true}})); return true; }})()"
    );
    match evaluate(cdp, &expression).await?.as_bool() {
        Some(true) => Ok(()),
        _ => Err(Error::with_detail(
            ErrorKind::NotFound,
            "No element matches selector",
            selector.to_string(),
        )),
    }
}

/// Append `text` to the focused element (or the one matching `selector`).
pub async fn type_text(cdp: &CdpClient, selector: Option<&str>, text: &str) -> Result<()> {
    let text_js = serde_json::to_string(text)?;
    let expression = match selector {
        Some(selector) => {
            let selector_js = serde_json::to_string(selector)?;
            format!(
                "(() => {{ const el = document.querySelector({selector_js}); if (!el) return false; \
                 el.focus(); el.value = (el.value || '') + {text_js}; \
                 el.dispatchEvent(new Event('input', {{bubbles: true}})); return true; }})()"
            )
        }
        None => format!(
            "(() => {{ const el = document.activeElement; if (!el) return false; \
             el.value = (el.value || '') + {text_js}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); return true; }})()"
        ),
    };
    match evaluate(cdp, &expression).await?.as_bool() {
        Some(true) => Ok(()),
        _ => Err(Error::new(ErrorKind::NotFound, "No element to type into")),
    }
}

/// Scroll the window by pixel deltas.
pub async fn scroll(cdp: &CdpClient, dx: i64, dy: i64) -> Result<()> {
    evaluate(cdp, &format!("window.scrollBy({dx}, {dy})")).await?;
    Ok(())
}

/// All cookies visible to the page.
pub async fn cookies_get(cdp: &CdpClient) -> Result<Value> {
    let result = cdp.send_command("Network.getCookies", json!({})).await?;
    Ok(result.get("cookies").cloned().unwrap_or_else(|| json!([])))
}

/// Set one cookie. `cookie` must carry at least `name`, `value`, and a
/// `url` or `domain`.
pub async fn cookies_set(cdp: &CdpClient, cookie: Value) -> Result<bool> {
    let result = cdp.send_command("Network.setCookie", cookie).await?;
    Ok(result.get("success").and_then(Value::as_bool).unwrap_or(false))
}
