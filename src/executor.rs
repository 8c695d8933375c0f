use std::time::Duration;

use tracing::{info, warn};

use crate::computer::Computer;
use crate::cua::CuaAction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    Performed,
    Ignored,
    Failed(String),
}

/// Maps planner actions onto input primitives, best effort.
#[derive(Clone, Debug)]
pub struct ActionExecutor {
    pub wait_duration: Duration,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self { wait_duration: Duration::from_secs(2) }
    }
}

/// "enter" and "space" (any case) become the DOM key names; others pass through.
pub fn normalize_key(key: &str) -> String {
    match key.to_lowercase().as_str() {
        "enter" => "Enter".to_string(),
        "space" => " ".to_string(),
        _ => key.to_string(),
    }
}

impl ActionExecutor {
    pub fn new(wait_duration: Duration) -> Self {
        Self { wait_duration }
    }

    /// Never fails: primitive errors are logged and reported as `Failed`.
    pub async fn execute<C: Computer + ?Sized>(&self, computer: &C, action: &CuaAction) -> ActionOutcome {
        if let Err(e) = computer.focus_latest_page().await {
            warn!(error = %e, "could not resolve focused page");
        }
        let result = match action {
            CuaAction::Click { x, y, button } => {
                info!(x, y, button = %button, "click");
                computer.click(*x, *y, button).await
            }
            CuaAction::DoubleClick { x, y } => {
                info!(x, y, "double click");
                computer.double_click(*x, *y).await
            }
            CuaAction::Move { x, y } => {
                info!(x, y, "move");
                computer.move_mouse(*x, *y).await
            }
            CuaAction::Scroll { x, y, scroll_x, scroll_y } => {
                info!(x, y, scroll_x, scroll_y, "scroll");
                computer.scroll(*x, *y, *scroll_x, *scroll_y).await
            }
            CuaAction::Keypress { keys } => {
                let mut res = Ok(());
                for key in keys {
                    info!(key = %key, "keypress");
                    res = computer.keypress(&normalize_key(key)).await;
                    if res.is_err() {
                        break;
                    }
                }
                res
            }
            CuaAction::Type { text } => {
                info!(chars = text.chars().count(), "type");
                computer.type_text(text).await
            }
            CuaAction::Drag { path } => {
                info!(points = path.len(), "drag");
                computer.drag_path(path).await
            }
            CuaAction::Wait => {
                info!(secs = self.wait_duration.as_secs_f64(), "wait");
                tokio::time::sleep(self.wait_duration).await;
                Ok(())
            }
            // observed by the loop right after
            CuaAction::Screenshot => Ok(()),
            CuaAction::Unknown(kind) => {
                warn!(kind = %kind, "unrecognized action, ignoring");
                return ActionOutcome::Ignored;
            }
        };
        match result {
            Ok(()) => ActionOutcome::Performed,
            Err(e) => {
                warn!(action = action.kind(), error = %e, "action failed");
                ActionOutcome::Failed(e.to_string())
            }
        }
    }
}
