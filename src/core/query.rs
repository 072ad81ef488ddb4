use std::collections::BTreeMap;

/// Prefix shared by every reserved query key. Reserved keys carry routing
/// state between phases and never reach a client-facing URL.
pub const RESERVED_QUERY_PREFIX: &str = "__sw_";

/// The locale the current path belongs to.
pub const LOCALE_KEY: &str = "__sw_locale";
/// The default locale of the request's domain.
pub const DEFAULT_LOCALE_KEY: &str = "__sw_default_locale";
/// Set to `1` when the request targets a data route.
pub const DATA_KEY: &str = "__sw_data";

pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_QUERY_PREFIX)
}

/// Parsed query parameters. Keys are unique, values keep their order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(BTreeMap<String, Vec<String>>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw `a=1&b=2` string (no leading `?`).
    pub fn parse(raw: &str) -> Self {
        let mut query = Self::new();
        for (key, value) in url::form_urlencoded::parse(raw.trim_start_matches('?').as_bytes()) {
            query.append(key.into_owned(), value.into_owned());
        }
        query
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|values| values.first()).map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Replace every value of `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    pub fn set_all(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.0.insert(key.into(), values);
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Copy every key from `other` that this query does not already carry.
    pub fn merge_missing(&mut self, other: &Query) {
        for (key, values) in &other.0 {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), values.clone());
            }
        }
    }

    /// Only the reserved keys.
    pub fn reserved(&self) -> Query {
        Query(
            self.0
                .iter()
                .filter(|(k, _)| is_reserved_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Everything except the reserved keys.
    pub fn without_reserved(&self) -> Query {
        Query(
            self.0
                .iter()
                .filter(|(k, _)| !is_reserved_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Serialize as `a=1&b=2`, keys in sorted order.
    pub fn to_query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.0 {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (k, v) in iter {
            query.append(k, v);
        }
        query
    }
}
