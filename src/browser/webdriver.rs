//! Chrome over WebDriver, one isolated browser per submission.

use crate::browser::driver::{BoundingBox, DriverError, PageDriver, Role, Target};
use crate::browser::selectors::{LOCALE, TIMEZONE, USER_AGENT, VIEWPORT, xpath_for};
use crate::browser::state::{OriginStorage, SessionState, StorageEntry, StoredCookie};
use crate::config::{AppConfig, ProxyConfig};
use fantoccini::actions::{InputSource, MouseActions, PointerAction};
use fantoccini::cookies::Cookie;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const CONNECT_ATTEMPTS: u32 = 40;
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);
const NETWORK_IDLE_QUIET: Duration = Duration::from_millis(500);
const NETWORK_IDLE_LIMIT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const IDLE_SCRIPT: &str = "return [document.readyState, performance.getEntriesByType('resource').length];";
const JS_CHECK_SCRIPT: &str = "return typeof window !== 'undefined' && !!document.body && (1 + 1) === 2;";
const RECT_SCRIPT: &str = "const r = arguments[0].getBoundingClientRect(); return [r.x, r.y, r.width, r.height];";
const STORAGE_EXPORT: &str = "return [location.origin, Object.entries(window.localStorage)];";
const STORAGE_IMPORT: &str = "if (location.origin !== arguments[0]) { return false; } \
     for (const [k, v] of arguments[1]) { window.localStorage.setItem(k, v); } return true;";

/// Browser launch settings derived from the run configuration.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub headless: bool,
    pub webdriver_url: String,
    pub chromedriver_path: Option<PathBuf>,
    pub proxy: Option<ProxyConfig>,
}

impl From<&AppConfig> for BrowserProfile {
    fn from(config: &AppConfig) -> Self {
        Self {
            headless: config.headless,
            webdriver_url: config.webdriver_url.clone(),
            chromedriver_path: config.chromedriver_path.clone(),
            proxy: config.proxy.clone(),
        }
    }
}

impl BrowserProfile {
    /// W3C capabilities for a French desktop Chrome with automation markers switched off.
    pub fn capabilities(&self, extension_dir: Option<&Path>) -> Map<String, Value> {
        let mut args = vec![
            format!("--window-size={},{}", VIEWPORT.0, VIEWPORT.1),
            format!("--user-agent={USER_AGENT}"),
            format!("--lang={LOCALE}"),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={}", proxy.server));
        }
        if let Some(dir) = extension_dir {
            args.push(format!("--load-extension={}", dir.display()));
        }

        let options = json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
            "useAutomationExtension": false,
            "prefs": { "intl.accept_languages": format!("{LOCALE},fr") },
        });

        let mut caps = Map::new();
        caps.insert("browserName".into(), json!("chrome"));
        caps.insert("pageLoadStrategy".into(), json!("eager"));
        caps.insert("goog:chromeOptions".into(), options);
        caps
    }
}

/// One Chrome session driven through fantoccini.
pub struct WebDriverPage {
    client: Client,
    driver_process: Option<Child>,
    // Keeps the generated proxy-auth extension on disk while Chrome runs.
    _extension: Option<TempDir>,
}

impl WebDriverPage {
    /// Starts chromedriver when a binary path is configured, then opens a fresh session.
    pub async fn launch(profile: &BrowserProfile) -> Result<Self, DriverError> {
        let extension = match &profile.proxy {
            Some(proxy) => proxy_auth_extension(proxy)?,
            None => None,
        };

        let (endpoint, driver_process) = match &profile.chromedriver_path {
            Some(binary) => {
                let (url, child) = spawn_chromedriver(binary).await?;
                (url, Some(child))
            }
            None => (profile.webdriver_url.clone(), None),
        };

        let caps = profile.capabilities(extension.as_ref().map(TempDir::path));
        let client = connect(&endpoint, caps).await?;
        client
            .set_window_size(VIEWPORT.0, VIEWPORT.1)
            .await
            .map_err(command_err)?;
        info!(
            target = "lbc.session",
            endpoint = %endpoint,
            headless = profile.headless,
            proxied = profile.proxy.is_some(),
            "browser launched"
        );

        Ok(Self {
            client,
            driver_process,
            _extension: extension,
        })
    }

    async fn script(&self, source: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.client.execute(source, args).await.map_err(command_err)
    }
}

impl PageDriver for WebDriverPage {
    type Element = Element;

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        debug!(target = "lbc.session", url, "navigating");
        self.client.goto(url).await.map_err(command_err)
    }

    async fn javascript_enabled(&self) -> Result<bool, DriverError> {
        let value = self.script(JS_CHECK_SCRIPT, Vec::new()).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn find_all(&self, target: &Target) -> Result<Vec<Element>, DriverError> {
        let xpath = xpath_for(target);
        let found = self
            .client
            .find_all(Locator::XPath(&xpath))
            .await
            .map_err(command_err)?;
        if matches!(target, Target::FileInput) {
            return Ok(found);
        }

        let mut visible = Vec::with_capacity(found.len());
        for element in found {
            if element.is_displayed().await.unwrap_or(false) {
                visible.push(element);
            }
        }
        if let Target::Role {
            role: Role::Button,
            name,
        } = target
        {
            debug!(target = "lbc.session", button = %name, matches = visible.len(), "button lookup");
        }
        Ok(visible)
    }

    async fn click(&self, element: &Element) -> Result<(), DriverError> {
        element.click().await.map_err(command_err)
    }

    async fn type_text(&self, element: &Element, text: &str) -> Result<(), DriverError> {
        element.send_keys(text).await.map_err(command_err)
    }

    async fn attach_files(&self, element: &Element, paths: &[PathBuf]) -> Result<(), DriverError> {
        let mut absolute = Vec::with_capacity(paths.len());
        for path in paths {
            let resolved = std::path::absolute(path)
                .map_err(|err| DriverError::Command(format!("{}: {err}", path.display())))?;
            absolute.push(resolved.display().to_string());
        }
        // Chrome accepts several files on one input as newline-separated paths.
        element
            .send_keys(&absolute.join("\n"))
            .await
            .map_err(command_err)
    }

    async fn bounding_box(&self, element: &Element) -> Result<Option<BoundingBox>, DriverError> {
        let arg = serde_json::to_value(element)
            .map_err(|err| DriverError::Command(err.to_string()))?;
        let rect = self.script(RECT_SCRIPT, vec![arg]).await?;
        let numbers: Vec<f64> = rect
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let [x, y, width, height] = numbers[..] else {
            return Ok(None);
        };
        if width <= 0.0 || height <= 0.0 {
            return Ok(None);
        }
        Ok(Some(BoundingBox {
            x,
            y,
            width,
            height,
        }))
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<(), DriverError> {
        let max_x = f64::from(VIEWPORT.0 - 1);
        let max_y = f64::from(VIEWPORT.1 - 1);
        let actions = MouseActions::new("mouse".to_string()).then(PointerAction::MoveTo {
            duration: None,
            x: x.clamp(0.0, max_x).round() as i64,
            y: y.clamp(0.0, max_y).round() as i64,
        });
        self.client
            .perform_actions(actions)
            .await
            .map_err(command_err)
    }

    async fn scroll_by(&self, dy: i64) -> Result<(), DriverError> {
        self.script("window.scrollBy(0, arguments[0]);", vec![json!(dy)])
            .await
            .map(|_| ())
    }

    async fn wait_for_network_idle(&self) -> Result<(), DriverError> {
        let started = Instant::now();
        let mut last_count: Option<u64> = None;
        let mut quiet_since = Instant::now();

        while started.elapsed() < NETWORK_IDLE_LIMIT {
            let snapshot = self.script(IDLE_SCRIPT, Vec::new()).await?;
            let ready = snapshot.get(0).and_then(Value::as_str) == Some("complete");
            let count = snapshot.get(1).and_then(Value::as_u64);

            if !ready || count != last_count {
                last_count = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= NETWORK_IDLE_QUIET {
                debug!(
                    target = "lbc.session",
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "network idle"
                );
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }

        warn!(
            target = "lbc.session",
            limit_secs = NETWORK_IDLE_LIMIT.as_secs(),
            "network never settled, reading url anyway"
        );
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.client
            .current_url()
            .await
            .map(|url| url.to_string())
            .map_err(command_err)
    }

    async fn export_state(&self) -> Result<SessionState, DriverError> {
        let cookies = self
            .client
            .get_all_cookies()
            .await
            .map_err(command_err)?
            .iter()
            .map(|cookie| StoredCookie {
                name: cookie.name().to_string(),
                value: cookie.value().to_string(),
                domain: cookie.domain().map(str::to_string),
                path: cookie.path().map(str::to_string),
                expires: cookie.expires_datetime().map(|at| at.unix_timestamp()),
                http_only: cookie.http_only().unwrap_or(false),
                secure: cookie.secure().unwrap_or(false),
            })
            .collect();

        let storage = self.script(STORAGE_EXPORT, Vec::new()).await?;
        let origins = storage_from_snapshot(&storage).into_iter().collect();
        Ok(SessionState { cookies, origins })
    }

    async fn import_state(&self, state: &SessionState) -> Result<(), DriverError> {
        let mut skipped = 0usize;
        for stored in &state.cookies {
            let mut cookie = Cookie::new(stored.name.clone(), stored.value.clone());
            if let Some(domain) = &stored.domain {
                cookie.set_domain(domain.clone());
            }
            if let Some(path) = &stored.path {
                cookie.set_path(path.clone());
            }
            if let Some(at) = stored
                .expires
                .and_then(|ts| time::OffsetDateTime::from_unix_timestamp(ts).ok())
            {
                cookie.set_expires(at);
            }
            cookie.set_secure(stored.secure);
            cookie.set_http_only(stored.http_only);

            if let Err(err) = self.client.add_cookie(cookie).await {
                skipped += 1;
                debug!(target = "lbc.session", cookie = %stored.name, error = %err, "cookie not restored");
            }
        }

        for origin in &state.origins {
            let entries: Vec<Value> = origin
                .local_storage
                .iter()
                .map(|entry| json!([entry.name, entry.value]))
                .collect();
            let applied = self
                .script(STORAGE_IMPORT, vec![json!(origin.origin), Value::Array(entries)])
                .await?;
            if applied.as_bool() != Some(true) {
                debug!(target = "lbc.session", origin = %origin.origin, "storage origin not current, skipped");
            }
        }

        if skipped > 0 {
            warn!(target = "lbc.session", skipped, "some cookies could not be restored");
        }
        Ok(())
    }

    async fn close(mut self) -> Result<(), DriverError> {
        let closed = self.client.close().await.map_err(command_err);
        if let Some(mut child) = self.driver_process.take()
            && let Err(err) = child.kill().await
        {
            warn!(target = "lbc.session", error = %err, "chromedriver did not stop");
        }
        closed
    }
}

async fn connect(endpoint: &str, caps: Map<String, Value>) -> Result<Client, DriverError> {
    let mut last_error = String::new();
    for attempt in 1..=CONNECT_ATTEMPTS {
        match ClientBuilder::native()
            .capabilities(caps.clone())
            .connect(endpoint)
            .await
        {
            Ok(client) => return Ok(client),
            Err(err) => {
                last_error = err.to_string();
                debug!(target = "lbc.session", attempt, error = %last_error, "webdriver not ready");
                sleep(CONNECT_BACKOFF).await;
            }
        }
    }
    Err(DriverError::Session(format!(
        "cannot open a session at {endpoint}: {last_error}"
    )))
}

async fn spawn_chromedriver(binary: &Path) -> Result<(String, Child), DriverError> {
    let port = free_port()?;
    let child = Command::new(binary)
        .arg(format!("--port={port}"))
        .env("TZ", TIMEZONE)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            DriverError::Session(format!("cannot start {}: {err}", binary.display()))
        })?;
    debug!(target = "lbc.session", port, "chromedriver started");
    Ok((format!("http://127.0.0.1:{port}"), child))
}

fn free_port() -> Result<u16, DriverError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|err| DriverError::Session(format!("no free local port: {err}")))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|err| DriverError::Session(err.to_string()))
}

/// Chrome cannot take proxy credentials on the command line, so an
/// unpacked extension answers the proxy's auth challenge.
fn proxy_auth_extension(proxy: &ProxyConfig) -> Result<Option<TempDir>, DriverError> {
    let Some(username) = &proxy.username else {
        return Ok(None);
    };
    let password = proxy.password.clone().unwrap_or_default();

    let dir = tempfile::Builder::new()
        .prefix("lbc-proxy-auth-")
        .tempdir()
        .map_err(|err| DriverError::Session(format!("proxy extension dir: {err}")))?;
    let manifest = json!({
        "manifest_version": 3,
        "name": "proxy-auth",
        "version": "1.0",
        "permissions": ["webRequest", "webRequestAuthProvider"],
        "host_permissions": ["<all_urls>"],
        "background": { "service_worker": "background.js" },
    });
    let background = format!(
        "chrome.webRequest.onAuthRequired.addListener(\
         (details, callback) => callback({{ authCredentials: {{ username: {}, password: {} }} }}),\
         {{ urls: ['<all_urls>'] }}, ['asyncBlocking']);",
        json!(username),
        json!(password)
    );

    let write = |name: &str, body: String| {
        std::fs::write(dir.path().join(name), body)
            .map_err(|err| DriverError::Session(format!("proxy extension {name}: {err}")))
    };
    write("manifest.json", manifest.to_string())?;
    write("background.js", background)?;
    Ok(Some(dir))
}

fn storage_from_snapshot(snapshot: &Value) -> Option<OriginStorage> {
    let origin = snapshot.get(0)?.as_str()?;
    if origin.is_empty() || origin == "null" {
        return None;
    }
    let local_storage = snapshot
        .get(1)?
        .as_array()?
        .iter()
        .filter_map(|pair| {
            Some(StorageEntry {
                name: pair.get(0)?.as_str()?.to_string(),
                value: pair.get(1)?.as_str()?.to_string(),
            })
        })
        .collect();
    Some(OriginStorage {
        origin: origin.to_string(),
        local_storage,
    })
}

fn command_err(err: fantoccini::error::CmdError) -> DriverError {
    DriverError::Command(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> BrowserProfile {
        BrowserProfile {
            headless: false,
            webdriver_url: "http://localhost:9515".into(),
            chromedriver_path: None,
            proxy: None,
        }
    }

    fn chrome_args(caps: &Map<String, Value>) -> Vec<String> {
        caps["goog:chromeOptions"]["args"]
            .as_array()
            .expect("args")
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn capabilities_hide_automation() {
        let caps = profile().capabilities(None);
        assert_eq!(caps["pageLoadStrategy"], "eager");
        assert_eq!(
            caps["goog:chromeOptions"]["excludeSwitches"],
            json!(["enable-automation"])
        );
        assert_eq!(caps["goog:chromeOptions"]["useAutomationExtension"], false);
        let args = chrome_args(&caps);
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"--window-size=1366,768".to_string()));
        assert!(args.contains(&"--lang=fr-FR".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn headless_and_proxy_flags() {
        let mut profile = profile();
        profile.headless = true;
        profile.proxy = Some(ProxyConfig {
            server: "http://proxy.local:8080".into(),
            username: None,
            password: None,
        });
        let ext = PathBuf::from("/tmp/ext");
        let args = chrome_args(&profile.capabilities(Some(&ext)));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--proxy-server=http://proxy.local:8080".to_string()));
        assert!(args.contains(&"--load-extension=/tmp/ext".to_string()));
    }

    #[test]
    fn proxy_extension_only_with_credentials() {
        let anonymous = ProxyConfig {
            server: "http://proxy.local:8080".into(),
            username: None,
            password: None,
        };
        assert!(proxy_auth_extension(&anonymous).expect("ext").is_none());

        let authed = ProxyConfig {
            username: Some("user".into()),
            password: Some("p'w\"d".into()),
            ..anonymous
        };
        let dir = proxy_auth_extension(&authed).expect("ext").expect("dir");
        let manifest: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("manifest.json")).expect("manifest"),
        )
        .expect("json");
        assert_eq!(manifest["manifest_version"], 3);
        let background =
            std::fs::read_to_string(dir.path().join("background.js")).expect("background");
        assert!(background.contains(r#"username: "user""#));
        assert!(background.contains(r#"password: "p'w\"d""#));
    }

    #[test]
    fn storage_snapshot_parsing() {
        let snapshot = json!(["https://www.leboncoin.fr", [["consent", "yes"], ["bad", 3]]]);
        let storage = storage_from_snapshot(&snapshot).expect("storage");
        assert_eq!(storage.origin, "https://www.leboncoin.fr");
        assert_eq!(storage.local_storage.len(), 1);
        assert_eq!(storage.local_storage[0].name, "consent");

        assert!(storage_from_snapshot(&json!(["null", []])).is_none());
        assert!(storage_from_snapshot(&json!(null)).is_none());
    }

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(free_port().expect("port"), 0);
    }
}
