use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::agent::AgentError;
use crate::browser::{Browser, BrowserConfig};

/// Input primitives and observation over the interactive surface.
#[async_trait]
pub trait Computer: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AgentError>;
    /// Makes the most recently opened tab the target of later primitives.
    async fn focus_latest_page(&self) -> Result<(), AgentError>;
    async fn click(&self, x: i64, y: i64, button: &str) -> Result<(), AgentError>;
    async fn double_click(&self, x: i64, y: i64) -> Result<(), AgentError>;
    async fn move_mouse(&self, x: i64, y: i64) -> Result<(), AgentError>;
    async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<(), AgentError>;
    async fn keypress(&self, key: &str) -> Result<(), AgentError>;
    async fn type_text(&self, text: &str) -> Result<(), AgentError>;
    async fn drag_path(&self, points: &[(i64, i64)]) -> Result<(), AgentError>;
    async fn screenshot(&self) -> Result<Vec<u8>, AgentError>;
    async fn close(&self) -> Result<(), AgentError>;
}

fn computer_err(e: anyhow::Error) -> AgentError {
    AgentError::Computer(format!("{:#}", e))
}

// ========================= Chromium Adapter =========================

pub struct ChromiumComputer {
    browser: Browser,
    settle: Duration,
}

impl ChromiumComputer {
    pub async fn launch(cfg: BrowserConfig, settle: Duration) -> Result<Self, AgentError> {
        let browser = Browser::launch(cfg).await.map_err(computer_err)?;
        Ok(Self { browser, settle })
    }
}

#[async_trait]
impl Computer for ChromiumComputer {
    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        self.browser.goto(url).await.map_err(computer_err)?;
        sleep(self.settle).await;
        Ok(())
    }

    async fn focus_latest_page(&self) -> Result<(), AgentError> {
        self.browser.focus_latest_page().await.map_err(computer_err)?;
        Ok(())
    }

    async fn click(&self, x: i64, y: i64, button: &str) -> Result<(), AgentError> {
        self.browser.click(x, y, button).await.map_err(computer_err)
    }

    async fn double_click(&self, x: i64, y: i64) -> Result<(), AgentError> {
        self.browser.double_click(x, y).await.map_err(computer_err)
    }

    async fn move_mouse(&self, x: i64, y: i64) -> Result<(), AgentError> {
        self.browser.move_mouse(x, y).await.map_err(computer_err)
    }

    async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<(), AgentError> {
        self.browser.scroll(x, y, dx, dy).await.map_err(computer_err)
    }

    async fn keypress(&self, key: &str) -> Result<(), AgentError> {
        self.browser.press_key(key).await.map_err(computer_err)
    }

    async fn type_text(&self, text: &str) -> Result<(), AgentError> {
        self.browser.type_text(text).await.map_err(computer_err)
    }

    async fn drag_path(&self, points: &[(i64, i64)]) -> Result<(), AgentError> {
        self.browser.drag_path(points).await.map_err(computer_err)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AgentError> {
        self.browser.screenshot().await.map_err(computer_err)
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.browser.close().await.map_err(computer_err)
    }
}
