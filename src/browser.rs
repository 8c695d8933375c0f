use anyhow::{anyhow, Result};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use nanoid::nanoid;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Settings;

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, width: 1024, height: 768, args: Vec::new() }
    }
}

impl BrowserConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            headless: s.browser_headless,
            width: s.browser_width,
            height: s.browser_height,
            args: s.browser_args.clone(),
        }
    }
}

/// A launched Chromium with one focused page.
pub struct Browser {
    page: RwLock<Page>,
    browser: Mutex<OxideBrowser>,
    /// Targets already known, in discovery order.
    seen_targets: Mutex<Vec<TargetId>>,
    handler: JoinHandle<()>,
    width: u32,
    height: u32,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder().window_size(cfg.width, cfg.height);
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Unique profile per run; Chromium refuses to share a locked profile.
        let profile_dir: PathBuf = std::env::temp_dir().join(format!("crm-pilot-profile-{}", nanoid!(10)));
        std::fs::create_dir_all(&profile_dir)?;
        builder = builder
            .user_data_dir(profile_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        for arg in &cfg.args {
            builder = builder.arg(arg.as_str());
        }
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        let handler = tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        let seen_targets = Mutex::new(vec![page.target_id().clone()]);
        let this = Self {
            page: RwLock::new(page),
            seen_targets,
            browser: Mutex::new(browser),
            handler,
            width: cfg.width,
            height: cfg.height,
        };
        this.apply_viewport().await?;
        Ok(this)
    }

    async fn page(&self) -> Page {
        self.page.read().await.clone()
    }

    // Non-zero viewport, otherwise screenshots fail with "0 width".
    async fn apply_viewport(&self) -> Result<()> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(self.width as i64)
            .height(self.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page().await.execute(metrics).await?;
        Ok(())
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        let page = self.page().await;
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    /// Switches to a tab opened since the last call, if any.
    ///
    /// `pages()` comes back in no particular order, so freshness is judged
    /// against the targets seen so far rather than by position.
    pub async fn focus_latest_page(&self) -> Result<bool> {
        let pages = self.browser.lock().await.pages().await?;
        let ids: Vec<TargetId> = pages.iter().map(|p| p.target_id().clone()).collect();
        let mut seen = self.seen_targets.lock().await;
        let fresh = first_unseen(seen.as_slice(), &ids);
        for id in ids {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        drop(seen);
        let Some(page) = fresh.and_then(|i| pages.into_iter().nth(i)) else {
            return Ok(false);
        };
        info!(target_id = ?page.target_id(), "switched to new page/tab");
        *self.page.write().await = page;
        if let Err(e) = self.apply_viewport().await {
            warn!(error = %e, "could not set viewport on new page");
        }
        Ok(true)
    }

    pub async fn move_mouse(&self, x: i64, y: i64) -> Result<()> {
        self.page().await.move_mouse(Point { x: x as f64, y: y as f64 }).await?;
        Ok(())
    }

    async fn press_release(&self, x: i64, y: i64, button: MouseButton, clicks: i64) -> Result<()> {
        let event = |kind: DispatchMouseEventType| {
            DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(x as f64)
                .y(y as f64)
                .button(button.clone())
                .click_count(clicks)
                .build()
                .map_err(|e| anyhow!(e))
        };
        let page = self.page().await;
        page.move_mouse(Point { x: x as f64, y: y as f64 }).await?;
        page.execute(event(DispatchMouseEventType::MousePressed)?).await?;
        page.execute(event(DispatchMouseEventType::MouseReleased)?).await?;
        Ok(())
    }

    pub async fn click(&self, x: i64, y: i64, button: &str) -> Result<()> {
        let btn = match button {
            "right" => MouseButton::Right,
            "middle" | "wheel" => MouseButton::Middle,
            "back" => MouseButton::Back,
            "forward" => MouseButton::Forward,
            _ => MouseButton::Left,
        };
        self.press_release(x, y, btn, 1).await
    }

    pub async fn double_click(&self, x: i64, y: i64) -> Result<()> {
        self.press_release(x, y, MouseButton::Left, 2).await
    }

    pub async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<()> {
        self.move_mouse(x, y).await?;
        let eval = EvaluateParams::builder()
            .expression(format!("window.scrollBy({dx}, {dy});"))
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page().await.execute(eval).await?;
        Ok(())
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.page().await.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    /// Presses and releases one key by its DOM key name ("Enter", " ", "a", ...).
    pub async fn press_key(&self, key: &str) -> Result<()> {
        let (code, text) = key_details(key);
        let event = |kind: DispatchKeyEventType| {
            let key_down = matches!(kind, DispatchKeyEventType::KeyDown);
            let mut b = DispatchKeyEventParams::builder().r#type(kind).key(key);
            if let Some(code) = code {
                b = b.windows_virtual_key_code(code).native_virtual_key_code(code);
            }
            if let (true, Some(text)) = (key_down, text.as_deref()) {
                b = b.text(text);
            }
            b.build().map_err(|e| anyhow!(e))
        };
        let page = self.page().await;
        page.execute(event(DispatchKeyEventType::KeyDown)?).await?;
        page.execute(event(DispatchKeyEventType::KeyUp)?).await?;
        debug!(key, "key pressed");
        Ok(())
    }

    pub async fn drag_path(&self, points: &[(i64, i64)]) -> Result<()> {
        let Some(&(sx, sy)) = points.first() else {
            return Ok(());
        };
        let event = |kind: DispatchMouseEventType, x: i64, y: i64| {
            DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(x as f64)
                .y(y as f64)
                .button(MouseButton::Left)
                .build()
                .map_err(|e| anyhow!(e))
        };
        let page = self.page().await;
        page.move_mouse(Point { x: sx as f64, y: sy as f64 }).await?;
        page.execute(event(DispatchMouseEventType::MousePressed, sx, sy)?).await?;
        let mut last = (sx, sy);
        for &(x, y) in &points[1..] {
            page.execute(event(DispatchMouseEventType::MouseMoved, x, y)?).await?;
            last = (x, y);
        }
        page.execute(event(DispatchMouseEventType::MouseReleased, last.0, last.1)?).await?;
        Ok(())
    }

    /// PNG of the visible viewport.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let take = || async {
            self.page()
                .await
                .screenshot(ScreenshotParamsBuilder::default().full_page(false).build())
                .await
        };
        match take().await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("0 width") || msg.contains("0 height") {
                    // Force viewport and retry once
                    self.apply_viewport().await?;
                    sleep(Duration::from_millis(50)).await;
                    return Ok(take().await?);
                }
                Err(anyhow!(e))
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await?;
        let _ = browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

/// Index of the first id in `ids` not present in `seen`.
fn first_unseen<T: PartialEq>(seen: &[T], ids: &[T]) -> Option<usize> {
    ids.iter().position(|id| !seen.contains(id))
}

fn key_details(key: &str) -> (Option<i64>, Option<String>) {
    match key {
        "Enter" => (Some(13), Some("\r".to_string())),
        " " => (Some(32), Some(" ".to_string())),
        "Tab" => (Some(9), None),
        "Backspace" => (Some(8), None),
        "Escape" => (Some(27), None),
        "Delete" => (Some(46), None),
        "ArrowLeft" => (Some(37), None),
        "ArrowUp" => (Some(38), None),
        "ArrowRight" => (Some(39), None),
        "ArrowDown" => (Some(40), None),
        k if k.chars().count() == 1 => {
            let c = k.chars().next().map(|c| c.to_ascii_uppercase() as i64);
            (c, Some(k.to_string()))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::{first_unseen, key_details};

    #[test]
    fn enter_and_space_produce_text() {
        assert_eq!(key_details("Enter"), (Some(13), Some("\r".into())));
        assert_eq!(key_details(" "), (Some(32), Some(" ".into())));
        assert_eq!(key_details("a"), (Some(65), Some("a".into())));
        assert_eq!(key_details("Tab"), (Some(9), None));
        assert_eq!(key_details("CTRL"), (None, None));
    }

    #[test]
    fn new_tab_found_regardless_of_order() {
        let seen = ["a"];
        assert_eq!(first_unseen(&seen, &["b", "a"]), Some(0));
        assert_eq!(first_unseen(&seen, &["a", "b"]), Some(1));
        assert_eq!(first_unseen(&seen, &["a"]), None);
        assert_eq!(first_unseen(&["a", "b"], &["b", "a"]), None);
        assert_eq!(first_unseen::<&str>(&seen, &[]), None);
    }
}
