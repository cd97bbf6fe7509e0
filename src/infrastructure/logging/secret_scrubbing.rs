use regex::{Captures, Regex};
use std::sync::OnceLock;

struct Patterns {
    api_key: Regex,
    aws_key: Regex,
    token: Regex,
    bearer: Regex,
    password: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // Provider API keys: sk-..., sk-ant-api03-...
        api_key: Regex::new(r"sk-[a-zA-Z0-9_-]{20,}").expect("api key pattern"),
        aws_key: Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("aws key pattern"),
        token: Regex::new(
            r#"["']?(?:api_key|apikey|token|secret|access_key)["']?\s*[:=]\s*["']?([a-zA-Z0-9_.-]{16,})["']?"#,
        )
        .expect("token pattern"),
        bearer: Regex::new(r"Bearer\s+[a-zA-Z0-9_.-]+").expect("bearer pattern"),
        password: Regex::new(r#"["']?password["']?\s*[:=]\s*["']?([^"'\s,}]+)["']?"#)
            .expect("password pattern"),
    })
}

/// Redacts credentials from free text before it is written to disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecretScrubber;

impl SecretScrubber {
    pub fn scrub(&self, message: &str) -> String {
        let p = patterns();
        let mut scrubbed = p.api_key.replace_all(message, "[API_KEY_REDACTED]").into_owned();
        scrubbed = p.aws_key.replace_all(&scrubbed, "[AWS_KEY_REDACTED]").into_owned();
        scrubbed = p
            .bearer
            .replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]")
            .into_owned();
        scrubbed = p
            .token
            .replace_all(&scrubbed, |caps: &Captures| {
                let full = &caps[0];
                match full.find([':', '=']) {
                    Some(pos) => format!("{}{}[REDACTED]", &full[..pos], &full[pos..=pos]),
                    None => "[REDACTED]".to_string(),
                }
            })
            .into_owned();
        p.password
            .replace_all(&scrubbed, "password=[REDACTED]")
            .into_owned()
    }
}
