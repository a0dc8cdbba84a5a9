/// Cookie attributes that show up inside `Set-Cookie` values but are not cookies.
const COOKIE_ATTRIBUTES: &[&str] = &[
    "path", "domain", "expires", "max-age", "samesite", "secure", "httponly",
];

/// Session cookies keyed by name. Last write per name wins and first-seen
/// order is kept; expiry, domain and path are not tracked.
#[derive(Debug, Clone, Default)]
pub struct CookieStore {
    cookies: Vec<(String, String)>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge raw header values of the form `name=value[; name=value...]`.
    pub fn ingest<I, S>(&mut self, header_values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for header in header_values {
            for pair in header.as_ref().split(';') {
                let Some((name, value)) = pair.trim().split_once('=') else {
                    continue;
                };
                let name = name.trim();
                let value = value.trim();
                if name.is_empty() || value.is_empty() || is_attribute(name) {
                    continue;
                }
                self.set(name, value);
            }
        }
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.cookies.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.cookies.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when any cookie name ends with `suffix` (MediaWiki names its
    /// session cookie `<wikiid>_session`).
    pub fn has_suffix(&self, suffix: &str) -> bool {
        self.cookies.iter().any(|(name, _)| name.ends_with(suffix))
    }

    pub fn serialize(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

fn is_attribute(name: &str) -> bool {
    COOKIE_ATTRIBUTES
        .iter()
        .any(|attribute| name.eq_ignore_ascii_case(attribute))
}
