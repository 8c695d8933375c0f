/// Decides whether a planner message is asking the human for something.
pub trait InputRequestDetector: Send + Sync {
    fn is_requesting_input(&self, message: &str) -> bool;
}

pub const DEFAULT_INDICATORS: &[&str] = &[
    "?",
    "provide",
    "need",
    "we've detected instructions that may cause your application to perform malicious or unauthorized actions",
    "please acknowledge this warning",
];

/// Case-insensitive substring match against a fixed indicator list.
#[derive(Clone, Debug)]
pub struct KeywordDetector {
    indicators: Vec<String>,
}

impl Default for KeywordDetector {
    fn default() -> Self {
        Self::new(DEFAULT_INDICATORS.iter().copied())
    }
}

impl KeywordDetector {
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { indicators: indicators.into_iter().map(|s| s.into().to_lowercase()).collect() }
    }
}

impl InputRequestDetector for KeywordDetector {
    fn is_requesting_input(&self, message: &str) -> bool {
        let message = message.trim();
        if message.is_empty() {
            return false;
        }
        let lower = message.to_lowercase();
        self.indicators.iter().any(|i| lower.contains(i.as_str()))
    }
}
