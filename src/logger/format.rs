//! Access log lines
//!
//! `combined` and `common` follow the Apache/Nginx layouts, `json` emits one
//! object per line, anything else is a pattern of `$variables`.

use chrono::{DateTime, Local};

use crate::config::AccessLogFormat;

const CLF_TIME: &str = "%d/%b/%Y:%H:%M:%S %z";

/// One served request, as it appears in the access log
#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    pub remote_addr: String,
    pub time: DateTime<Local>,
    pub method: String,
    pub path: String,
    /// Without the leading `?`
    pub query: Option<String>,
    /// `1.0`, `1.1`, ...
    pub http_version: String,
    pub status: u16,
    pub body_bytes: usize,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub request_time_us: u64,
}

impl AccessLogEntry {
    /// Entry stamped with the current time; response fields are filled later
    pub fn new(remote_addr: String, method: String, path: String) -> Self {
        Self {
            remote_addr,
            time: Local::now(),
            method,
            path,
            query: None,
            http_version: "1.1".to_string(),
            status: 0,
            body_bytes: 0,
            referer: None,
            user_agent: None,
            request_time_us: 0,
        }
    }

    pub fn format(&self, format: &AccessLogFormat) -> String {
        match format {
            AccessLogFormat::Common => self.render("$remote_addr - - [$time_local] \"$request\" $status $body_bytes_sent"),
            AccessLogFormat::Combined => self.render(
                "$remote_addr - - [$time_local] \"$request\" $status $body_bytes_sent \
                 \"$http_referer\" \"$http_user_agent\"",
            ),
            AccessLogFormat::Json => self.to_json(),
            AccessLogFormat::Pattern(pattern) => self.render(pattern),
        }
    }

    fn request_uri(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        }
    }

    /// Value of one `$variable`, `None` for unknown names
    fn variable(&self, name: &str) -> Option<String> {
        let value = match name {
            "remote_addr" => self.remote_addr.clone(),
            "time_local" => self.time.format(CLF_TIME).to_string(),
            "time_iso8601" => self.time.to_rfc3339(),
            "request" => format!("{} {} HTTP/{}", self.method, self.request_uri(), self.http_version),
            "request_method" => self.method.clone(),
            "request_uri" => self.request_uri(),
            "request_time" => {
                #[allow(clippy::cast_precision_loss)]
                let secs = self.request_time_us as f64 / 1_000_000.0;
                format!("{secs:.3}")
            }
            "status" => self.status.to_string(),
            "body_bytes_sent" => self.body_bytes.to_string(),
            "http_referer" => self.referer.clone().unwrap_or_else(|| "-".to_string()),
            "http_user_agent" => self.user_agent.clone().unwrap_or_else(|| "-".to_string()),
            _ => return None,
        };
        Some(value)
    }

    /// Substitute `$name` tokens (longest identifier wins); unknown ones are kept as-is
    fn render(&self, pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len() + 64);
        let mut rest = pattern;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos + 1..];
            let len = tail
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(tail.len());
            let name = &tail[..len];
            match self.variable(name) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push('$');
                    out.push_str(name);
                }
            }
            rest = &tail[len..];
        }
        out.push_str(rest);
        out
    }

    fn to_json(&self) -> String {
        serde_json::json!({
            "remote_addr": self.remote_addr,
            "time": self.time.to_rfc3339(),
            "method": self.method,
            "path": self.path,
            "query": self.query,
            "http_version": self.http_version,
            "status": self.status,
            "body_bytes": self.body_bytes,
            "referer": self.referer,
            "user_agent": self.user_agent,
            "request_time_us": self.request_time_us,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_entry() -> AccessLogEntry {
        let mut entry = AccessLogEntry::new(
            "10.0.0.7".to_string(),
            "GET".to_string(),
            "/hello".to_string(),
        );
        entry.query = Some("lang=en".to_string());
        entry.status = 200;
        entry.body_bytes = 19;
        entry.user_agent = Some("curl/8.5.0".to_string());
        entry.request_time_us = 1_250_000;
        entry
    }

    #[test]
    fn test_combined() {
        let line = hello_entry().format(&AccessLogFormat::Combined);
        assert!(line.starts_with("10.0.0.7 - - ["));
        assert!(line.contains("\"GET /hello?lang=en HTTP/1.1\" 200 19"));
        assert!(line.ends_with("\"-\" \"curl/8.5.0\""));
    }

    #[test]
    fn test_common_has_no_agent() {
        let line = hello_entry().format(&AccessLogFormat::Common);
        assert!(line.ends_with("\"GET /hello?lang=en HTTP/1.1\" 200 19"));
        assert!(!line.contains("curl"));
    }

    #[test]
    fn test_json() {
        let line = hello_entry().format(&AccessLogFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(value["path"], "/hello");
        assert_eq!(value["status"], 200);
        assert!(value["referer"].is_null());
    }

    #[test]
    fn test_pattern() {
        let format = AccessLogFormat::from(
            "$request_method $request_uri -> $status in $request_time".to_string(),
        );
        assert_eq!(hello_entry().format(&format), "GET /hello?lang=en -> 200 in 1.250");
    }

    #[test]
    fn test_pattern_keeps_unknown_variables() {
        let format = AccessLogFormat::Pattern("$status $upstream_addr $".to_string());
        assert_eq!(hello_entry().format(&format), "200 $upstream_addr $");
    }
}
