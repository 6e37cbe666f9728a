//! In-process transforms that ship with clipslot

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// Marker written in place of redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Builtin transform implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    StripAnsi,
    RedactSecrets,
    PrettyJson,
}

impl Builtin {
    pub const ALL: [Builtin; 3] = [
        Builtin::StripAnsi,
        Builtin::RedactSecrets,
        Builtin::PrettyJson,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::StripAnsi => "strip-ansi",
            Builtin::RedactSecrets => "redact-secrets",
            Builtin::PrettyJson => "pretty-json",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Builtin::StripAnsi => "Remove ANSI colour and cursor escape sequences",
            Builtin::RedactSecrets => "Replace tokens, keys and password values with [REDACTED]",
            Builtin::PrettyJson => "Re-indent JSON input",
        }
    }

    pub fn apply(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        match self {
            Builtin::StripAnsi => Ok(strip_ansi(input)),
            Builtin::RedactSecrets => {
                let text = std::str::from_utf8(input)
                    .map_err(|_| "input is not valid UTF-8".to_string())?;
                Ok(redact_secrets(text).into_bytes())
            }
            Builtin::PrettyJson => pretty_json(input),
        }
    }
}

static ANSI_ESCAPE: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\-_])")
        .unwrap()
});

/// Key/value pairs whose value is a secret, e.g. `"password": "hunter2"`
static SECRET_JSON_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)("(?:password|passwd|pwd|secret|client_secret|token|access_token|refresh_token|api_key|apikey)"\s*:\s*)"(?:[^"\\]|\\.)*""#,
    )
    .unwrap()
});

/// `password=...` style assignments in plain text
static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|passwd|pwd|secret|token|apikey|api_key)(\s*[:=]\s*)[^\s,;]+").unwrap()
});

static SECRET_TOKENS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // SSH and PEM private keys
        Regex::new(r"(?s)-----BEGIN (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----.*?-----END (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----").unwrap(),
        // GitHub tokens
        Regex::new(r"\b(?:ghp|gho|ghs|ghr|ghu)_[A-Za-z0-9]{36}\b").unwrap(),
        // OpenAI style API keys
        Regex::new(r"\bsk-[A-Za-z0-9_-]{20,}\b").unwrap(),
        // AWS access keys
        Regex::new(r"\bAKIA[0-9A-Z]{16}\b").unwrap(),
        // Bearer tokens in headers
        Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]{16,}=*").unwrap(),
    ]
});

fn strip_ansi(input: &[u8]) -> Vec<u8> {
    ANSI_ESCAPE.replace_all(input, &b""[..]).into_owned()
}

fn redact_secrets(text: &str) -> String {
    let mut out = SECRET_JSON_FIELD
        .replace_all(text, format!("${{1}}\"{}\"", REDACTED).as_str())
        .into_owned();
    out = SECRET_ASSIGNMENT
        .replace_all(&out, format!("${{1}}${{2}}{}", REDACTED).as_str())
        .into_owned();

    for pattern in SECRET_TOKENS.iter() {
        out = pattern.replace_all(&out, NoExpand(REDACTED)).into_owned();
    }

    out
}

fn pretty_json(input: &[u8]) -> Result<Vec<u8>, String> {
    let value: serde_json::Value =
        serde_json::from_slice(input).map_err(|e| format!("input is not JSON: {}", e))?;
    let mut out = serde_json::to_vec_pretty(&value).map_err(|e| e.to_string())?;
    out.push(b'\n');
    Ok(out)
}
