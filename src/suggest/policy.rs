use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// What `suggest` does for a TM that is `indexing` or `error` but still has a
/// previously installed snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Answer from the last good snapshot and flag the response as stale.
    #[default]
    ServeLastGood,
    /// Answer "not ready" until the TM is `ready` again.
    Refuse,
}

impl StalePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StalePolicy::ServeLastGood => "serve",
            StalePolicy::Refuse => "refuse",
        }
    }
}

impl fmt::Display for StalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StalePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serve" | "serve_last_good" | "serve-last-good" => Ok(StalePolicy::ServeLastGood),
            "refuse" => Ok(StalePolicy::Refuse),
            other => Err(format!("unknown stale policy '{other}'")),
        }
    }
}
