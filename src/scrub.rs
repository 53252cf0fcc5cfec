//! Branding scrubber for upstream JSON responses.

use serde_json::{Map, Value};

/// Removes blocklisted substrings from every string in a JSON document.
#[derive(Debug, Clone)]
pub struct Scrubber {
    /// Longest first, so a long entry is never pre-empted by one of its prefixes.
    blocklist: Vec<String>,
    drop_emptied: bool,
}

impl Scrubber {
    pub fn new<I>(blocklist: I, drop_emptied: bool) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut blocklist: Vec<String> = blocklist.into_iter().filter(|b| !b.is_empty()).collect();
        blocklist.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        blocklist.dedup();
        Self { blocklist, drop_emptied }
    }

    pub fn is_empty(&self) -> bool {
        self.blocklist.is_empty()
    }

    /// Remove blocklisted substrings (case-sensitive) and trim the result.
    pub fn scrub_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for entry in &self.blocklist {
            if out.contains(entry.as_str()) {
                out = out.replace(entry.as_str(), "");
            }
        }
        out.trim().to_string()
    }

    pub fn scrub(&self, value: Value) -> Value {
        self.scrub_value(value).0
    }

    /// Returns the scrubbed value and whether scrubbing emptied it.
    fn scrub_value(&self, value: Value) -> (Value, bool) {
        match value {
            Value::String(s) => {
                let was_empty = s.is_empty();
                let cleaned = self.scrub_text(&s);
                let emptied = !was_empty && cleaned.is_empty();
                (Value::String(cleaned), emptied)
            }
            Value::Array(items) => {
                let was_empty = items.is_empty();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let (item, emptied) = self.scrub_value(item);
                    if emptied && self.drop_emptied {
                        continue;
                    }
                    out.push(item);
                }
                let emptied = !was_empty && out.is_empty();
                (Value::Array(out), emptied)
            }
            Value::Object(entries) => {
                let was_empty = entries.is_empty();
                let mut out = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    let (item, emptied) = self.scrub_value(item);
                    if emptied && self.drop_emptied {
                        continue;
                    }
                    out.insert(key, item);
                }
                let emptied = !was_empty && out.is_empty();
                (Value::Object(out), emptied)
            }
            other => (other, false),
        }
    }
}
