//! Headless Chrome process pool.
//!
//! Each instance owns a Chrome child process, its temp user-data
//! directory, and a connected [`CdpClient`]. `acquire` reuses an idle
//! instance when it can and launches a fresh one otherwise, up to the
//! configured pool size.

use crate::cdp::CdpClient;
use serde::Deserialize;
use serde_json::json;
use krill::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, Ordering};
use std::time::Duration;

/// Pool configuration, filled from the `browser.*` config knobs.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub pool_size: usize,
    pub chrome_path: Option<String>,
    pub base_debug_port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            pool_size: 2,
            chrome_path: None,
            base_debug_port: 9222,
        }
    }
}

/// One pooled Chrome instance.
pub struct BrowserInstance {
    pub id: String,
    pub cdp: Arc<CdpClient>,
    pub ws_endpoint: String,
    pub pid: u32,
    in_use: AtomicBool,
    last_used: AtomicI64,
    child: parking_lot::Mutex<Option<Child>>,
    user_data_dir: PathBuf,
}

impl BrowserInstance {
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> i64 {
        self.last_used.load(Ordering::Acquire)
    }

    fn mark_in_use(&self, used: bool) {
        self.in_use.store(used, Ordering::Release);
        self.last_used.store(krill::timestamp_ms(), Ordering::Release);
    }

    /// SIGTERM the child and reap it without blocking.
    fn terminate(&self) {
        let mut guard = self.child.lock();
        if let Some(child) = guard.as_mut() {
            terminate_child(child);
        }
        *guard = None;

        if self.user_data_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.user_data_dir);
        }
    }
}

#[cfg(unix)]
fn terminate_child(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
    // Reap if already gone; a straggler gets collected by a later wait.
    let _ = child.try_wait();
}

#[cfg(not(unix))]
fn terminate_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.try_wait();
}

struct PoolState {
    instances: Vec<Arc<BrowserInstance>>,
    launching: usize,
}

/// Launches and recycles headless Chrome instances.
pub struct BrowserPool {
    config: BrowserConfig,
    state: tokio::sync::Mutex<PoolState>,
    next_debug_port: AtomicU16,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: Option<String>,
}

const ENDPOINT_POLL_ATTEMPTS: u32 = 10;
const ENDPOINT_POLL_BACKOFF: Duration = Duration::from_millis(200);

impl BrowserPool {
    pub fn new(config: BrowserConfig) -> Self {
        log::info!("BrowserPool created (max_size={})", config.pool_size);
        let base_port = config.base_debug_port;
        BrowserPool {
            config,
            state: tokio::sync::Mutex::new(PoolState {
                instances: Vec::new(),
                launching: 0,
            }),
            next_debug_port: AtomicU16::new(base_port),
            http: reqwest::Client::new(),
        }
    }

    /// Get an instance: reuse an idle one, or launch a new Chrome if the
    /// pool has room. The caller must [`release`](Self::release) or
    /// [`close`](Self::close) it.
    pub async fn acquire(&self) -> Result<Arc<BrowserInstance>> {
        {
            let mut state = self.state.lock().await;

            if let Some(instance) = state.instances.iter().find(|i| !i.in_use()) {
                instance.mark_in_use(true);
                log::debug!("Reusing browser instance: {}", instance.id);
                return Ok(instance.clone());
            }

            if state.instances.len() + state.launching >= self.config.pool_size {
                return Err(Error::with_detail(
                    ErrorKind::Browser,
                    "Browser pool exhausted",
                    format!("max_size={}", self.config.pool_size),
                ));
            }
            state.launching += 1;
        }

        // Launch and connect without holding the pool lock.
        let launched = self.launch_and_connect().await;

        let mut state = self.state.lock().await;
        state.launching -= 1;
        let instance = launched?;
        instance.mark_in_use(true);
        state.instances.push(instance.clone());
        log::info!("Launched new browser instance: {}", instance.id);
        Ok(instance)
    }

    /// Return an instance to the idle set.
    pub async fn release(&self, instance: &BrowserInstance) {
        instance.mark_in_use(false);
        log::debug!("Released browser instance: {}", instance.id);
    }

    /// Tear down one instance: disconnect CDP, SIGTERM the child, reap
    /// it, and drop it from the pool.
    pub async fn close(&self, instance_id: &str) -> Result<()> {
        let instance = {
            let mut state = self.state.lock().await;
            let idx = state
                .instances
                .iter()
                .position(|i| i.id == instance_id)
                .ok_or_else(|| {
                    Error::with_detail(
                        ErrorKind::NotFound,
                        "Browser instance not found",
                        instance_id.to_string(),
                    )
                })?;
            state.instances.remove(idx)
        };

        if instance.cdp.is_connected() {
            instance.cdp.disconnect().await;
        }
        instance.terminate();
        log::info!("Closed browser instance: {instance_id}");
        Ok(())
    }

    /// Tear down every instance. Called on shutdown and from signal
    /// handling.
    pub async fn close_all(&self) {
        let instances = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.instances)
        };

        let count = instances.len();
        for instance in instances {
            if instance.cdp.is_connected() {
                instance.cdp.disconnect().await;
            }
            instance.terminate();
        }
        log::info!("Closed all {count} browser instances");
    }

    pub async fn get(&self, instance_id: &str) -> Option<Arc<BrowserInstance>> {
        let state = self.state.lock().await;
        state.instances.iter().find(|i| i.id == instance_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        let state = self.state.lock().await;
        state.instances.iter().filter(|i| i.in_use()).count()
    }

    pub async fn total_count(&self) -> usize {
        self.state.lock().await.instances.len()
    }

    pub fn max_size(&self) -> usize {
        self.config.pool_size
    }

    async fn launch_and_connect(&self) -> Result<Arc<BrowserInstance>> {
        let chrome_path = self.find_chrome().ok_or_else(|| {
            Error::with_detail(
                ErrorKind::Browser,
                "Chrome/Chromium not found",
                "Set browser.chrome_path in config",
            )
        })?;

        let debug_port = self.next_debug_port.fetch_add(1, Ordering::Relaxed);
        let instance_id = uuid::Uuid::new_v4().simple().to_string();

        let user_data_dir = std::env::temp_dir().join(format!("krill-chrome-{instance_id}"));
        std::fs::create_dir_all(&user_data_dir).map_err(|e| {
            Error::with_detail(
                ErrorKind::Browser,
                "Failed to create user data directory",
                format!("{}: {}", user_data_dir.display(), e),
            )
        })?;

        let mut child = Command::new(&chrome_path)
            .args([
                "--headless=new",
                "--no-first-run",
                "--no-default-browser-check",
                "--disable-gpu",
                "--disable-extensions",
                "--disable-background-networking",
                "--disable-sync",
                "--disable-translate",
                "--mute-audio",
                "--no-sandbox",
                &format!("--remote-debugging-port={debug_port}"),
                &format!("--user-data-dir={}", user_data_dir.display()),
                "about:blank",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                let _ = std::fs::remove_dir_all(&user_data_dir);
                Error::with_detail(
                    ErrorKind::Browser,
                    "Failed to launch Chrome process",
                    format!("{chrome_path}: {e}"),
                )
            })?;

        let pid = child.id();
        log::debug!("Chrome launched (pid={pid}, port={debug_port}, id={instance_id})");

        // Give Chrome a moment before polling the DevTools endpoint.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let ws_endpoint = match self.discover_ws_endpoint(debug_port).await {
            Ok(url) => url,
            Err(e) => {
                terminate_child(&mut child);
                let _ = std::fs::remove_dir_all(&user_data_dir);
                return Err(e);
            }
        };

        let cdp = match CdpClient::connect(&ws_endpoint).await {
            Ok(cdp) => cdp,
            Err(e) => {
                terminate_child(&mut child);
                let _ = std::fs::remove_dir_all(&user_data_dir);
                return Err(e);
            }
        };

        for domain in ["Page.enable", "Runtime.enable", "DOM.enable"] {
            if let Err(e) = cdp.send_command(domain, json!({})).await {
                log::warn!("Failed to enable CDP domain {domain}: {}", e.what());
            }
        }

        Ok(Arc::new(BrowserInstance {
            id: instance_id,
            cdp,
            ws_endpoint,
            pid,
            in_use: AtomicBool::new(false),
            last_used: AtomicI64::new(krill::timestamp_ms()),
            child: parking_lot::Mutex::new(Some(child)),
            user_data_dir,
        }))
    }

    /// Poll `/json/version` until Chrome reports its DevTools WebSocket
    /// URL.
    async fn discover_ws_endpoint(&self, debug_port: u16) -> Result<String> {
        let url = format!("http://127.0.0.1:{debug_port}/json/version");

        for _ in 0..ENDPOINT_POLL_ATTEMPTS {
            match self.http.get(&url).send().await {
                Ok(resp) => {
                    if let Ok(info) = resp.json::<VersionInfo>().await {
                        if let Some(ws_url) = info.web_socket_debugger_url {
                            return Ok(ws_url);
                        }
                    }
                }
                Err(_) => {}
            }
            tokio::time::sleep(ENDPOINT_POLL_BACKOFF).await;
        }

        Err(Error::with_detail(
            ErrorKind::Browser,
            "Failed to get Chrome DevTools WebSocket URL",
            format!("port={debug_port}"),
        ))
    }

    /// Resolve the Chrome binary: explicit config, well-known paths,
    /// then `$PATH`.
    fn find_chrome(&self) -> Option<String> {
        if let Some(configured) = &self.config.chrome_path {
            if Path::new(configured).exists() {
                return Some(configured.clone());
            }
        }

        #[cfg(target_os = "macos")]
        const KNOWN_PATHS: &[&str] = &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        #[cfg(target_os = "linux")]
        const KNOWN_PATHS: &[&str] = &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ];
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        const KNOWN_PATHS: &[&str] = &[];

        for path in KNOWN_PATHS {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }

        if let Some(path_env) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path_env) {
                for name in ["google-chrome", "chromium", "chromium-browser"] {
                    let candidate = dir.join(name);
                    if candidate.exists() {
                        return Some(candidate.to_string_lossy().into_owned());
                    }
                }
            }
        }

        None
    }
}

impl Drop for BrowserPool {
    fn drop(&mut self) {
        // Best-effort reap of anything still alive; async teardown runs
        // in close_all.
        if let Ok(mut state) = self.state.try_lock() {
            for instance in state.instances.drain(..) {
                instance.terminate();
            }
        }
    }
}
