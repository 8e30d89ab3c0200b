//! `Host` over a headless Chromium page, driven through chromiumoxide.
//!
//! Every operation is a small script evaluated in the page. A one-time
//! prelude installs a `MutationObserver` that counts structural mutations and
//! queues added nodes for the structure feed. It also buffers page errors
//! until [`ChromiumHost::take_errors`] drains them.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use surface_sentinel::host::{Host, InstanceInfo, MutationBatch, SurfaceElement};
use surface_sentinel::{
    ElementHandle, ErrorSource, HostError, InstanceHandle, Rect, SentinelError, SentinelResult,
};

/// Env var pointing at a Chromium binary.
pub const CHROMIUM_ENV: &str = "SENTINEL_CHROMIUM_PATH";

const READY_POLL: Duration = Duration::from_millis(50);
const FEED_POLL: Duration = Duration::from_millis(50);

/// Chromium binary from `SENTINEL_CHROMIUM_PATH`, else the first one on `PATH`.
pub fn find_chromium() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CHROMIUM_ENV).map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
    }
    ["chromium", "chromium-browser", "google-chrome"]
        .into_iter()
        .find_map(|name| which::which(name).ok())
}

/// How the render-surface library shows up in the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageBindings {
    /// Global the library installs on `window`.
    pub library_global: String,
    /// Property a bound surface element carries its instance under.
    pub instance_property: String,
    /// Selector for the designated design container.
    pub container_selector: String,
    /// Script URL used to load the library again, if the page has one.
    pub loader_url: Option<String>,
}

impl Default for PageBindings {
    fn default() -> Self {
        Self {
            library_global: "fabric".to_string(),
            instance_property: "__fabric".to_string(),
            container_selector: ".designer-editor".to_string(),
            loader_url: None,
        }
    }
}

const PRELUDE: &str = r#"
if (!window.__sentinel) {
  const s = { mutations: 0, added: [], next: 0 };
  new MutationObserver((records) => {
    for (const r of records) {
      s.mutations += 1;
      for (const n of r.addedNodes) {
        if (n.nodeType !== 1) continue;
        s.added.push({
          tag: n.tagName,
          descendant_surfaces: n.querySelectorAll ? n.querySelectorAll('canvas').length : 0,
        });
      }
    }
  }).observe(document.documentElement, { childList: true, subtree: true });
  s.tag = (el) => {
    if (!el.dataset.sentinelId) el.dataset.sentinelId = 'sentinel-' + (s.next++);
    return el.dataset.sentinelId;
  };
  s.find = (id) => document.querySelector('[data-sentinel-id="' + id + '"]');
  s.errors = [];
  window.addEventListener('error', (e) => {
    const t = e.target;
    if (t && t !== window && (t.src || t.href)) {
      s.errors.push({ source: 'resource-error', message: 'Resource loading failed',
        context: { tagName: t.tagName, src: t.src || t.href } });
    } else {
      s.errors.push({ source: 'global-error', message: String(e.message),
        stack: e.error && e.error.stack ? String(e.error.stack) : null,
        context: { filename: e.filename, lineno: e.lineno, colno: e.colno } });
    }
  }, true);
  window.addEventListener('unhandledrejection', (e) => {
    const r = e.reason;
    s.errors.push({ source: 'unhandled-rejection', message: String(r && r.message ? r.message : r),
      stack: r && r.stack ? String(r.stack) : null, context: {} });
  });
  window.__sentinel = s;
}
"#;

/// Page error as buffered by the prelude.
#[derive(Debug, Deserialize)]
struct PageError {
    source: ErrorSource,
    message: String,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    context: serde_json::Value,
}

impl PageError {
    fn into_host_error(self) -> HostError {
        let error = HostError::new(self.source, self.message).with_context(self.context);
        match self.stack {
            Some(stack) => error.with_stack(stack),
            None => error,
        }
    }
}

/// A headless page acting as the host document.
pub struct ChromiumHost {
    _browser: Browser,
    page: Page,
    bindings: PageBindings,
}

impl ChromiumHost {
    /// Launch headless Chromium and open `url`.
    pub async fn launch(url: &str, bindings: PageBindings) -> anyhow::Result<Self> {
        use anyhow::Context;

        let chrome_path = find_chromium()
            .with_context(|| format!("Chromium not found. Set {CHROMIUM_ENV}."))?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--no-sandbox")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser
            .new_page(url)
            .await
            .with_context(|| format!("failed to open {url}"))?;
        tracing::info!("Opened {url} in headless Chromium");

        Ok(Self {
            _browser: browser,
            page,
            bindings,
        })
    }

    /// Drain page errors buffered since the last call.
    pub async fn take_errors(&self) -> SentinelResult<Vec<HostError>> {
        let raw: Vec<PageError> = self
            .eval("return window.__sentinel.errors.splice(0);")
            .await?;
        Ok(raw.into_iter().map(PageError::into_host_error).collect())
    }

    async fn eval<T: DeserializeOwned>(&self, body: &str) -> SentinelResult<T> {
        eval_in(&self.page, body).await
    }

    fn lib(&self) -> String {
        js_str(&self.bindings.library_global)
    }

    fn prop(&self) -> String {
        js_str(&self.bindings.instance_property)
    }

    /// Script fragment resolving the instance for `instance`, or throwing.
    fn instance_expr(&self, instance: &InstanceHandle) -> String {
        format!(
            "const el = window.__sentinel.find({id}); \
             const c = el && el[{prop}]; \
             if (!c) throw new Error('no instance ' + {id});",
            id = js_str(&instance.0),
            prop = self.prop(),
        )
    }
}

#[async_trait]
impl Host for ChromiumHost {
    async fn environment_ready(&self) -> bool {
        self.eval("return document.readyState !== 'loading';")
            .await
            .unwrap_or(false)
    }

    async fn wait_environment_ready(&self) {
        while !self.environment_ready().await {
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn library_loaded(&self) -> bool {
        let script = format!("return typeof window[{}] !== 'undefined';", self.lib());
        self.eval(&script).await.unwrap_or(false)
    }

    async fn surface_elements(&self) -> SentinelResult<Vec<SurfaceElement>> {
        let script = format!(
            "const container = document.querySelector({container}); \
             const lib = typeof window[{lib}] !== 'undefined'; \
             return Array.from(document.querySelectorAll('canvas')).map((el) => {{ \
               const id = window.__sentinel.tag(el); \
               const r = el.getBoundingClientRect(); \
               return {{ \
                 element: id, \
                 rect: {{ x: r.left, y: r.top, width: r.width, height: r.height }}, \
                 instance: lib && el[{prop}] ? id : null, \
                 in_container: !!(container && container.contains(el)), \
               }}; \
             }});",
            container = js_str(&self.bindings.container_selector),
            lib = self.lib(),
            prop = self.prop(),
        );
        self.eval(&script).await
    }

    async fn container(&self) -> Option<Rect> {
        let script = format!(
            "const c = document.querySelector({}); \
             if (!c) return null; \
             const r = c.getBoundingClientRect(); \
             return {{ x: r.left, y: r.top, width: r.width, height: r.height }};",
            js_str(&self.bindings.container_selector)
        );
        match self.eval::<Option<Rect>>(&script).await {
            Ok(rect) => rect,
            Err(e) => {
                tracing::debug!("Container lookup failed: {e}");
                None
            }
        }
    }

    async fn instance_info(&self, instance: &InstanceHandle) -> SentinelResult<InstanceInfo> {
        let script = format!(
            "{} return {{ \
               width: c.getWidth ? c.getWidth() : (c.width || 0), \
               height: c.getHeight ? c.getHeight() : (c.height || 0), \
               zoom: c.getZoom ? c.getZoom() : 1, \
               object_count: c.getObjects ? c.getObjects().length : 0, \
             }};",
            self.instance_expr(instance)
        );
        self.eval(&script).await
    }

    async fn serialize_instance(
        &self,
        instance: &InstanceHandle,
    ) -> SentinelResult<serde_json::Value> {
        let script = format!("{} return c.toJSON();", self.instance_expr(instance));
        self.eval(&script)
            .await
            .map_err(|e| SentinelError::SerializationFailure(e.to_string()))
    }

    async fn enumerate_objects(
        &self,
        instance: &InstanceHandle,
    ) -> SentinelResult<Vec<serde_json::Value>> {
        let script = format!(
            "{} return c.getObjects().map((o) => o.toObject ? o.toObject() : o);",
            self.instance_expr(instance)
        );
        self.eval(&script).await
    }

    fn structure_changes(&self) -> Option<mpsc::UnboundedReceiver<MutationBatch>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let page = self.page.clone();

        handle.spawn(async move {
            loop {
                tokio::time::sleep(FEED_POLL).await;
                let drained: SentinelResult<MutationBatch> = eval_in(
                    &page,
                    "const added = window.__sentinel.added.splice(0); return { added };",
                )
                .await;
                match drained {
                    Ok(batch) if batch.added.is_empty() => {}
                    Ok(batch) => {
                        if tx.send(batch).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Structure feed stopped: {e}");
                        break;
                    }
                }
                if tx.is_closed() {
                    break;
                }
            }
        });
        Some(rx)
    }

    async fn mutation_count(&self) -> u64 {
        self.eval("return window.__sentinel.mutations;")
            .await
            .unwrap_or(0)
    }

    async fn unload_library(&self) -> SentinelResult<()> {
        let script = format!(
            "const name = {lib}; \
             try {{ delete window[name]; }} catch (_) {{ window[name] = undefined; }} \
             document.querySelectorAll('script[src]').forEach((s) => {{ \
               if (s.src.toLowerCase().includes(name.toLowerCase())) s.remove(); \
             }}); \
             return true;",
            lib = self.lib()
        );
        self.eval::<bool>(&script).await.map(|_| ())
    }

    async fn reload_library(&self) -> SentinelResult<bool> {
        let Some(url) = &self.bindings.loader_url else {
            return Ok(false);
        };
        let script = format!(
            "const s = document.createElement('script'); \
             s.src = {}; \
             document.head.appendChild(s); \
             return true;",
            js_str(url)
        );
        self.eval(&script).await
    }

    async fn dispose_surfaces(&self) -> SentinelResult<usize> {
        let script = format!(
            "let n = 0; \
             document.querySelectorAll('canvas').forEach((el) => {{ \
               const c = el[{prop}]; \
               if (c && c.dispose) {{ try {{ c.dispose(); }} catch (_) {{}} }} \
               el.remove(); \
               n += 1; \
             }}); \
             return n;",
            prop = self.prop()
        );
        self.eval(&script).await
    }

    async fn create_surface(&self, width: f64, height: f64) -> SentinelResult<ElementHandle> {
        let script = format!(
            "const container = document.querySelector({container}); \
             if (!container) throw new Error('no design container'); \
             const el = document.createElement('canvas'); \
             el.width = {width}; \
             el.height = {height}; \
             container.appendChild(el); \
             return window.__sentinel.tag(el);",
            container = js_str(&self.bindings.container_selector),
        );
        self.eval::<String>(&script).await.map(ElementHandle)
    }

    async fn bind_instance(&self, element: &ElementHandle) -> SentinelResult<InstanceHandle> {
        let script = format!(
            "const lib = window[{lib}]; \
             if (!lib || typeof lib.Canvas !== 'function') throw new Error('library unavailable'); \
             const el = window.__sentinel.find({id}); \
             if (!el) throw new Error('unknown element ' + {id}); \
             el[{prop}] = new lib.Canvas(el); \
             return {id};",
            lib = self.lib(),
            id = js_str(&element.0),
            prop = self.prop(),
        );
        self.eval::<String>(&script).await.map(InstanceHandle)
    }
}

/// Run `body` as a function body after the prelude, returning its value as JSON.
async fn eval_in<T: DeserializeOwned>(page: &Page, body: &str) -> SentinelResult<T> {
    let expression = format!("(() => {{ {PRELUDE} {body} }})()");
    let params = EvaluateParams::builder()
        .expression(expression)
        .return_by_value(true)
        .build()
        .map_err(|e| SentinelError::Host(format!("bad evaluation params: {e}")))?;
    let result = page
        .evaluate_expression(params)
        .await
        .map_err(|e| SentinelError::Host(format!("JS execution failed: {e}")))?;
    result
        .into_value()
        .map_err(|e| SentinelError::Host(format!("failed to convert JS result: {e:?}")))
}

/// Quote `s` as a JS string literal.
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
