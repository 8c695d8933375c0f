use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::safety::PendingSafetyCheck;
use crate::snapshot::encode_png_data_url;

#[derive(Clone, Debug)]
pub struct CuaConfig {
    pub api_base: String,            // e.g. "https://api.openai.com/v1" or an Azure resource endpoint
    pub api_key: String,
    pub api_version: Option<String>, // Azure only
    pub model: String,               // e.g. "computer-use-preview"
    pub tool_display: (u32, u32),
    pub environment: String,         // "browser"
}

impl CuaConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            api_base: s.api_base.clone(),
            api_key: s.api_key.clone(),
            api_version: s.api_version.clone(),
            model: s.model.clone(),
            tool_display: (s.browser_width, s.browser_height),
            environment: "browser".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub String);

/// One response from the planner: zero or more proposed actions plus text.
#[derive(Clone, Debug, Deserialize)]
pub struct PlannerResponse {
    pub id: ResponseId,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    ComputerCall {
        call_id: String,
        #[serde(deserialize_with = "deserialize_action")]
        action: CuaAction,
        #[serde(default)]
        pending_safety_checks: Vec<PendingSafetyCheck>,
    },
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<ContentPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
}

/// The computer call the loop should act on next.
#[derive(Clone, Debug)]
pub struct ComputerCall<'a> {
    pub call_id: &'a str,
    pub action: &'a CuaAction,
    pub pending_safety_checks: &'a [PendingSafetyCheck],
}

impl PlannerResponse {
    pub fn first_computer_call(&self) -> Option<ComputerCall<'_>> {
        self.output.iter().find_map(|o| match o {
            OutputItem::ComputerCall { call_id, action, pending_safety_checks } => Some(ComputerCall {
                call_id,
                action,
                pending_safety_checks,
            }),
            _ => None,
        })
    }

    /// All message text in the response, space separated.
    pub fn message_text(&self) -> String {
        let mut parts = Vec::new();
        for o in &self.output {
            if let OutputItem::Message { content } = o {
                parts.extend(content.iter().filter_map(|c| c.text.as_deref()));
            }
        }
        parts.join(" ").trim().to_string()
    }

    pub fn reasoning_summary(&self) -> Option<String> {
        let text: Vec<&str> = self
            .output
            .iter()
            .filter_map(|o| match o {
                OutputItem::Reasoning { summary } => Some(summary),
                _ => None,
            })
            .flatten()
            .filter_map(|c| c.text.as_deref())
            .collect();
        (!text.is_empty()).then(|| text.join(" "))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CuaAction {
    Screenshot,
    Click { x: i64, y: i64, button: String },
    DoubleClick { x: i64, y: i64 },
    Move { x: i64, y: i64 },
    Scroll { x: i64, y: i64, scroll_x: i64, scroll_y: i64 },
    Type { text: String },
    Keypress { keys: Vec<String> },
    Drag { path: Vec<(i64, i64)> },
    Wait,
    Unknown(String),
}

impl CuaAction {
    pub fn kind(&self) -> &str {
        match self {
            CuaAction::Screenshot => "screenshot",
            CuaAction::Click { .. } => "click",
            CuaAction::DoubleClick { .. } => "double_click",
            CuaAction::Move { .. } => "move",
            CuaAction::Scroll { .. } => "scroll",
            CuaAction::Type { .. } => "type",
            CuaAction::Keypress { .. } => "keypress",
            CuaAction::Drag { .. } => "drag",
            CuaAction::Wait => "wait",
            CuaAction::Unknown(kind) => kind,
        }
    }

    pub fn decode(v: &Value) -> CuaAction {
        let int = |key: &str| v.get(key).and_then(|x| x.as_i64()).unwrap_or(0);
        let kind = v.get("type").and_then(|x| x.as_str()).unwrap_or("unknown");
        match kind {
            "screenshot" => CuaAction::Screenshot,
            "click" => CuaAction::Click {
                x: int("x"),
                y: int("y"),
                button: v.get("button").and_then(|x| x.as_str()).unwrap_or("left").to_string(),
            },
            "double_click" => CuaAction::DoubleClick { x: int("x"), y: int("y") },
            "move" => CuaAction::Move { x: int("x"), y: int("y") },
            "scroll" => CuaAction::Scroll {
                x: int("x"),
                y: int("y"),
                scroll_x: int("scroll_x"),
                scroll_y: int("scroll_y"),
            },
            "type" => CuaAction::Type {
                text: v.get("text").and_then(|x| x.as_str()).unwrap_or("").to_string(),
            },
            "keypress" => CuaAction::Keypress {
                keys: v
                    .get("keys")
                    .and_then(|x| x.as_array())
                    .map(|arr| arr.iter().filter_map(|k| k.as_str().map(str::to_string)).collect())
                    .unwrap_or_default(),
            },
            "drag" => CuaAction::Drag {
                path: v
                    .get("path")
                    .and_then(|x| x.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|p| Some((p.get("x")?.as_i64()?, p.get("y")?.as_i64()?)))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "wait" => CuaAction::Wait,
            other => CuaAction::Unknown(other.to_string()),
        }
    }
}

fn deserialize_action<'de, D>(d: D) -> Result<CuaAction, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    Ok(CuaAction::decode(&v))
}

/// Continuation handed back to the planner.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnInput {
    ComputerCallOutput {
        call_id: String,
        screenshot_png: Vec<u8>,
        acknowledged_safety_checks: Vec<PendingSafetyCheck>,
    },
    UserMessage(String),
}

impl TurnInput {
    pub fn to_json(&self) -> Value {
        match self {
            TurnInput::ComputerCallOutput { call_id, screenshot_png, acknowledged_safety_checks } => {
                let mut item = json!({
                    "type": "computer_call_output",
                    "call_id": call_id,
                    "output": {
                        "type": "input_image",
                        "image_url": encode_png_data_url(screenshot_png),
                    }
                });
                if !acknowledged_safety_checks.is_empty() {
                    item["acknowledged_safety_checks"] = json!(acknowledged_safety_checks
                        .iter()
                        .map(|c| json!({ "id": c.id, "code": c.code, "message": c.message }))
                        .collect::<Vec<_>>());
                }
                item
            }
            TurnInput::UserMessage(text) => json!({ "role": "user", "content": text }),
        }
    }
}

/// The remote service that proposes the next interaction step.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn initial(&self, prompt: &str) -> Result<PlannerResponse>;
    async fn follow_up(&self, previous: &ResponseId, input: Vec<TurnInput>) -> Result<PlannerResponse>;
}

#[derive(Clone)]
pub struct CuaClient {
    http: Client,
    cfg: CuaConfig,
}

impl CuaClient {
    pub fn new(cfg: CuaConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            bail!("planner API key missing");
        }
        Ok(Self { http: Client::new(), cfg })
    }

    fn endpoint(&self) -> String {
        match &self.cfg.api_version {
            Some(version) => format!("{}/openai/responses?api-version={}", self.cfg.api_base, version),
            None => format!("{}/responses", self.cfg.api_base),
        }
    }

    fn tools(&self) -> Value {
        json!([{
            "type": "computer_use_preview",
            "display_width": self.cfg.tool_display.0,
            "display_height": self.cfg.tool_display.1,
            "environment": self.cfg.environment
        }])
    }

    fn initial_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.cfg.model,
            "input": [{ "role": "user", "content": prompt }],
            "tools": self.tools(),
            "reasoning": { "generate_summary": "concise" },
            "truncation": "auto"
        })
    }

    fn follow_up_body(&self, previous: &ResponseId, input: &[TurnInput]) -> Value {
        json!({
            "model": self.cfg.model,
            "previous_response_id": previous.0,
            "tools": self.tools(),
            "input": input.iter().map(TurnInput::to_json).collect::<Vec<_>>(),
            "truncation": "auto"
        })
    }

    async fn post(&self, body: &Value) -> Result<PlannerResponse> {
        let req = self.http.post(self.endpoint()).json(body);
        let req = if self.cfg.api_version.is_some() {
            req.header("api-key", &self.cfg.api_key)
        } else {
            req.bearer_auth(&self.cfg.api_key)
        };
        let resp = req.send().await.context("planner request failed")?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            // status first so retry classification sees 429/503
            bail!("{} planner error: {}", status, text);
        }
        serde_json::from_str(&text).context("failed to parse planner response JSON")
    }
}

#[async_trait]
impl Planner for CuaClient {
    async fn initial(&self, prompt: &str) -> Result<PlannerResponse> {
        self.post(&self.initial_body(prompt)).await
    }

    async fn follow_up(&self, previous: &ResponseId, input: Vec<TurnInput>) -> Result<PlannerResponse> {
        self.post(&self.follow_up_body(previous, &input)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_version: Option<&str>) -> CuaClient {
        CuaClient::new(CuaConfig {
            api_base: "https://example.test".into(),
            api_key: "k".into(),
            api_version: api_version.map(str::to_string),
            model: "computer-use-preview".into(),
            tool_display: (1024, 768),
            environment: "browser".into(),
        })
        .expect("client")
    }

    #[test]
    fn parses_computer_call_with_safety_checks() {
        let raw = json!({
            "id": "resp_1",
            "output": [
                { "type": "reasoning", "summary": [{ "type": "summary_text", "text": "Open login" }] },
                {
                    "type": "computer_call",
                    "call_id": "call_9",
                    "action": { "type": "click", "x": 120, "y": 340, "button": "left" },
                    "pending_safety_checks": [{ "id": "sc_1", "code": "malicious_instructions", "message": "careful" }]
                }
            ]
        });
        let resp: PlannerResponse = serde_json::from_value(raw).expect("parse");
        assert_eq!(resp.id, ResponseId("resp_1".into()));
        assert_eq!(resp.reasoning_summary().as_deref(), Some("Open login"));
        let call = resp.first_computer_call().expect("call");
        assert_eq!(call.call_id, "call_9");
        assert_eq!(call.action, &CuaAction::Click { x: 120, y: 340, button: "left".into() });
        assert_eq!(call.pending_safety_checks.len(), 1);
        assert_eq!(call.pending_safety_checks[0].code, "malicious_instructions");
    }

    #[test]
    fn message_text_joins_parts_and_ignores_unknown_items() {
        let raw = json!({
            "id": "resp_2",
            "output": [
                { "type": "web_search_call", "status": "completed" },
                { "type": "message", "content": [{ "type": "output_text", "text": "Could you" }, { "type": "output_text", "text": "provide the ID?" }] }
            ]
        });
        let resp: PlannerResponse = serde_json::from_value(raw).expect("parse");
        assert!(resp.first_computer_call().is_none());
        assert_eq!(resp.message_text(), "Could you provide the ID?");
    }

    #[test]
    fn decodes_every_action_kind() {
        let cases = [
            (json!({"type": "scroll", "x": 5, "y": 6, "scroll_x": 0, "scroll_y": 400}),
             CuaAction::Scroll { x: 5, y: 6, scroll_x: 0, scroll_y: 400 }),
            (json!({"type": "keypress", "keys": ["CTRL", "a"]}),
             CuaAction::Keypress { keys: vec!["CTRL".into(), "a".into()] }),
            (json!({"type": "type", "text": "demo"}), CuaAction::Type { text: "demo".into() }),
            (json!({"type": "wait"}), CuaAction::Wait),
            (json!({"type": "screenshot"}), CuaAction::Screenshot),
            (json!({"type": "click", "x": 1, "y": 2}), CuaAction::Click { x: 1, y: 2, button: "left".into() }),
            (json!({"type": "drag", "path": [{"x": 1, "y": 1}, {"x": 9, "y": 9}]}),
             CuaAction::Drag { path: vec![(1, 1), (9, 9)] }),
            (json!({"type": "teleport"}), CuaAction::Unknown("teleport".into())),
        ];
        for (raw, expected) in cases {
            assert_eq!(CuaAction::decode(&raw), expected);
        }
    }

    #[test]
    fn acknowledged_checks_are_serialized_on_the_output() {
        let input = TurnInput::ComputerCallOutput {
            call_id: "call_1".into(),
            screenshot_png: vec![1, 2, 3],
            acknowledged_safety_checks: vec![PendingSafetyCheck {
                id: "sc_1".into(),
                code: "c".into(),
                message: "m".into(),
            }],
        };
        let v = input.to_json();
        assert_eq!(v["type"], "computer_call_output");
        assert_eq!(v["output"]["image_url"], "data:image/png;base64,AQID");
        assert_eq!(v["acknowledged_safety_checks"][0]["id"], "sc_1");

        let plain = TurnInput::ComputerCallOutput {
            call_id: "call_2".into(),
            screenshot_png: vec![],
            acknowledged_safety_checks: vec![],
        };
        assert!(plain.to_json().get("acknowledged_safety_checks").is_none());
    }

    #[test]
    fn request_bodies_carry_tool_and_thread() {
        let c = client(None);
        let body = c.initial_body("go");
        assert_eq!(body["tools"][0]["type"], "computer_use_preview");
        assert_eq!(body["tools"][0]["display_width"], 1024);
        assert_eq!(body["reasoning"]["generate_summary"], "concise");
        assert_eq!(body["input"][0]["content"], "go");

        let body = c.follow_up_body(&ResponseId("resp_7".into()), &[TurnInput::UserMessage("yes".into())]);
        assert_eq!(body["previous_response_id"], "resp_7");
        assert_eq!(body["input"][0]["role"], "user");
    }

    #[test]
    fn endpoint_switches_to_azure_routing() {
        assert_eq!(client(None).endpoint(), "https://example.test/responses");
        assert_eq!(
            client(Some("2025-04-01-preview")).endpoint(),
            "https://example.test/openai/responses?api-version=2025-04-01-preview"
        );
    }

    #[test]
    fn rejects_missing_key() {
        let cfg = CuaConfig { api_key: String::new(), ..client(None).cfg };
        assert!(CuaClient::new(cfg).is_err());
    }
}
