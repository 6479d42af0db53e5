//! Secret redaction for logged command lines and captured output.
//!
//! Credentials reach external tools on stdin, but tool output and
//! user-supplied arguments can still echo them. Everything that leaves the
//! process through the sink is passed through a [`Redactor`] first.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

const REDACTED: &str = "[REDACTED]";

/// `api-key=…`, `apiKey=…`, `api_key: …` in arguments and rendered YAML.
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:api[_-]?key|app[_-]?key|token|password)["']?\s*[:=]\s*["']?)([^\s"',]+)"#)
        .expect("invalid key/value redaction pattern")
});

/// Redacts known secret values plus anything shaped like `api-key=<value>`.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also mask every occurrence of `secret`. Empty strings are ignored.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(input);
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = Cow::Owned(out.replace(secret.as_str(), REDACTED));
            }
        }
        if KEY_VALUE.is_match(&out) {
            let replaced = KEY_VALUE
                .replace_all(&out, |caps: &regex::Captures<'_>| {
                    format!("{}{REDACTED}", &caps[1])
                })
                .into_owned();
            out = Cow::Owned(replaced);
        }
        out
    }

    pub fn redact_all(&self, args: &[String]) -> Vec<String> {
        args.iter().map(|a| self.redact(a).into_owned()).collect()
    }
}
