//! `browser.*` handlers over the pool and page actions.

use crate::protocol::{Protocol, handler};
use krill::{Error, ErrorKind, Result};
use krill_browser::{BrowserInstance, BrowserPool, action};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

async fn instance_from(pool: &BrowserPool, params: &Value) -> Result<Arc<BrowserInstance>> {
    let id = params
        .get("instanceId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if id.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgument, "instanceId is required"));
    }
    pool.get(id).await.ok_or_else(|| {
        Error::with_detail(ErrorKind::NotFound, "Browser instance not found", id.to_string())
    })
}

fn timeout_from(params: &Value, default: Duration) -> Duration {
    params
        .get("timeoutMs")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

pub fn register_browser_handlers(protocol: &Protocol, pool: Arc<BrowserPool>) {
    let open_pool = pool.clone();
    protocol.register_method(
        "browser.open",
        handler(move |params: Value| {
            let pool = open_pool.clone();
            async move {
                let url = params
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or("about:blank")
                    .to_string();
                let instance = match pool.acquire().await {
                    Ok(instance) => instance,
                    Err(e) => return Ok(json!({"ok": false, "error": e.what()})),
                };
                if url != "about:blank" {
                    if let Err(e) =
                        action::navigate(&instance.cdp, &url, action::DEFAULT_NAVIGATION_TIMEOUT)
                            .await
                    {
                        return Ok(json!({
                            "ok": false,
                            "instanceId": instance.id,
                            "error": e.what(),
                        }));
                    }
                }
                Ok(json!({"ok": true, "instanceId": instance.id, "url": url}))
            }
        }),
        "Open a URL in headless browser",
        "browser",
    );

    let close_pool = pool.clone();
    protocol.register_method(
        "browser.close",
        handler(move |params: Value| {
            let pool = close_pool.clone();
            async move {
                let id = params
                    .get("instanceId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "instanceId is required"}));
                }
                match pool.close(id).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Close a browser page",
        "browser",
    );

    let navigate_pool = pool.clone();
    protocol.register_method(
        "browser.navigate",
        handler(move |params: Value| {
            let pool = navigate_pool.clone();
            async move {
                let url = params.get("url").and_then(Value::as_str).unwrap_or_default().to_string();
                if url.is_empty() {
                    return Ok(json!({"ok": false, "error": "url is required"}));
                }
                let instance = instance_from(&pool, &params).await?;
                let timeout = timeout_from(&params, action::DEFAULT_NAVIGATION_TIMEOUT);
                match action::navigate(&instance.cdp, &url, timeout).await {
                    Ok(()) => Ok(json!({"ok": true, "url": url})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Navigate to a URL",
        "browser",
    );

    let screenshot_pool = pool.clone();
    protocol.register_method(
        "browser.screenshot",
        handler(move |params: Value| {
            let pool = screenshot_pool.clone();
            async move {
                let instance = instance_from(&pool, &params).await?;
                let format = params.get("format").and_then(Value::as_str).unwrap_or("png");
                match action::screenshot(&instance.cdp, format).await {
                    Ok(data) => Ok(json!({"ok": true, "format": format, "data": data})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Take a screenshot",
        "browser",
    );

    let content_pool = pool.clone();
    protocol.register_method(
        "browser.content",
        handler(move |params: Value| {
            let pool = content_pool.clone();
            async move {
                let instance = instance_from(&pool, &params).await?;
                match action::content(&instance.cdp).await {
                    Ok(html) => Ok(json!({"ok": true, "content": html})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Get page content as text/html",
        "browser",
    );

    let click_pool = pool.clone();
    protocol.register_method(
        "browser.click",
        handler(move |params: Value| {
            let pool = click_pool.clone();
            async move {
                let selector = params
                    .get("selector")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if selector.is_empty() {
                    return Ok(json!({"ok": false, "error": "selector is required"}));
                }
                let instance = instance_from(&pool, &params).await?;
                match action::click(&instance.cdp, &selector).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Click an element on the page",
        "browser",
    );

    let type_pool = pool.clone();
    protocol.register_method(
        "browser.type",
        handler(move |params: Value| {
            let pool = type_pool.clone();
            async move {
                let text = params.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
                if text.is_empty() {
                    return Ok(json!({"ok": false, "error": "text is required"}));
                }
                let selector = params.get("selector").and_then(Value::as_str).map(str::to_string);
                let instance = instance_from(&pool, &params).await?;
                match action::type_text(&instance.cdp, selector.as_deref(), &text).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Type text into an input field",
        "browser",
    );

    let fill_pool = pool.clone();
    protocol.register_method(
        "browser.fill",
        handler(move |params: Value| {
            let pool = fill_pool.clone();
            async move {
                let selector = params
                    .get("selector")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if selector.is_empty() {
                    return Ok(json!({"ok": false, "error": "selector is required"}));
                }
                let value = params.get("value").and_then(Value::as_str).unwrap_or_default().to_string();
                let instance = instance_from(&pool, &params).await?;
                match action::fill(&instance.cdp, &selector, &value).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Fill a form field with a value",
        "browser",
    );

    let evaluate_pool = pool.clone();
    protocol.register_method(
        "browser.evaluate",
        handler(move |params: Value| {
            let pool = evaluate_pool.clone();
            async move {
                let expression = params
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if expression.is_empty() {
                    return Ok(json!({"ok": false, "error": "expression is required"}));
                }
                let instance = instance_from(&pool, &params).await?;
                match action::evaluate(&instance.cdp, &expression).await {
                    Ok(value) => Ok(json!({"ok": true, "result": value})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Evaluate JavaScript on the page",
        "browser",
    );

    let wait_pool = pool.clone();
    protocol.register_method(
        "browser.wait",
        handler(move |params: Value| {
            let pool = wait_pool.clone();
            async move {
                let selector = params
                    .get("selector")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if selector.is_empty() {
                    return Ok(json!({"ok": false, "error": "selector is required"}));
                }
                let instance = instance_from(&pool, &params).await?;
                let timeout = timeout_from(&params, action::DEFAULT_WAIT_TIMEOUT);
                match action::wait_for_selector(&instance.cdp, &selector, timeout).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Wait for a selector or condition",
        "browser",
    );

    let scroll_pool = pool.clone();
    protocol.register_method(
        "browser.scroll",
        handler(move |params: Value| {
            let pool = scroll_pool.clone();
            async move {
                let dx = params.get("dx").and_then(Value::as_i64).unwrap_or(0);
                let dy = params.get("dy").and_then(Value::as_i64).unwrap_or(0);
                let instance = instance_from(&pool, &params).await?;
                match action::scroll(&instance.cdp, dx, dy).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Scroll the page",
        "browser",
    );

    let pdf_pool = pool.clone();
    protocol.register_method(
        "browser.pdf",
        handler(move |params: Value| {
            let pool = pdf_pool.clone();
            async move {
                let instance = instance_from(&pool, &params).await?;
                match action::pdf(&instance.cdp).await {
                    Ok(data) => Ok(json!({"ok": true, "data": data})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Export page as PDF",
        "browser",
    );

    let cookies_get_pool = pool.clone();
    protocol.register_method(
        "browser.cookies.get",
        handler(move |params: Value| {
            let pool = cookies_get_pool.clone();
            async move {
                let instance = instance_from(&pool, &params).await?;
                match action::cookies_get(&instance.cdp).await {
                    Ok(cookies) => Ok(json!({"ok": true, "cookies": cookies})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Get browser cookies",
        "browser",
    );

    let cookies_set_pool = pool;
    protocol.register_method(
        "browser.cookies.set",
        handler(move |params: Value| {
            let pool = cookies_set_pool.clone();
            async move {
                let cookie = params.get("cookie").cloned().unwrap_or(Value::Null);
                if !cookie.is_object() {
                    return Ok(json!({"ok": false, "error": "cookie object is required"}));
                }
                let instance = instance_from(&pool, &params).await?;
                match action::cookies_set(&instance.cdp, cookie).await {
                    Ok(success) => Ok(json!({"ok": success})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Set browser cookies",
        "browser",
    );

    log::info!("Registered browser handlers");
}
