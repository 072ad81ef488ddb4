use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};

/// Response headers accumulated during a resolution.
///
/// Keys are lowercased. `set-cookie` accumulates; every other key is
/// replaced by the latest `set`. `append` always accumulates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders(BTreeMap<String, Vec<String>>);

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_ascii_lowercase();
        let value = value.into();
        if key == "set-cookie" {
            self.0.entry(key).or_default().push(value);
        } else {
            self.0.insert(key, vec![value]);
        }
    }

    /// Add a value without replacing the existing ones.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.0
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(&key.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Convert to an `http::HeaderMap`, skipping entries that are not valid
    /// header names or values.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (key, values) in &self.0 {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                tracing::warn!(header = %key, "Dropping response header with invalid name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        map.append(name.clone(), value);
                    }
                    Err(_) => {
                        tracing::warn!(header = %key, "Dropping response header with invalid value")
                    }
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_cookie_accumulates_other_headers_replace() {
        let mut headers = ResponseHeaders::new();
        headers.set("Set-Cookie", "a=1");
        headers.set("set-cookie", "b=2");
        headers.set("X-Powered", "one");
        headers.set("x-powered", "two");

        assert_eq!(headers.get_all("set-cookie").len(), 2);
        assert_eq!(headers.get("X-POWERED"), Some("two"));

        let map = headers.to_header_map();
        assert_eq!(map.get_all("set-cookie").iter().count(), 2);
        assert_eq!(map.get("x-powered").unwrap(), "two");
    }

    #[test]
    fn append_keeps_earlier_values() {
        let mut headers = ResponseHeaders::new();
        headers.set("Link", "</a.css>");
        headers.append("link", "</b.js>");
        assert_eq!(headers.get_all("LINK"), ["</a.css>", "</b.js>"]);

        headers.set("link", "</c.png>");
        assert_eq!(headers.get_all("link"), ["</c.png>"]);
        assert_eq!(headers.to_header_map().get_all("link").iter().count(), 1);
    }
}
