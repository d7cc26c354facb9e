use serde_json::Value;

/// Normalize a debuggee-side path for comparisons.
///
/// Runs of `/` and `\` collapse into a single `/`. On case-insensitive file
/// systems the result is also lowercased.
#[must_use]
pub fn canonicalize_path(path: &str, case_sensitive: bool) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_sep = false;
    for ch in path.chars() {
        if ch == '/' || ch == '\\' {
            if !last_was_sep {
                out.push('/');
            }
            last_was_sep = true;
            continue;
        }
        last_was_sep = false;
        if case_sensitive {
            out.push(ch);
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// The rest of `path` after `prefix`, if it starts with it.
///
/// Separator runs compare as a single `/`, and case folds unless
/// `case_sensitive`. The returned remainder keeps the original spelling.
fn strip_path_prefix<'a>(path: &'a str, prefix: &str, case_sensitive: bool) -> Option<&'a str> {
    let wanted = canonicalize_path(prefix, case_sensitive);
    let mut wanted = wanted.chars();
    let mut next = wanted.next();
    let mut last_was_sep = false;

    for (idx, ch) in path.char_indices() {
        let is_sep = ch == '/' || ch == '\\';
        if next.is_none() {
            if is_sep && last_was_sep {
                continue;
            }
            return Some(&path[idx..]);
        }
        if is_sep {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
            if next != Some('/') {
                return None;
            }
            next = wanted.next();
            continue;
        }
        last_was_sep = false;
        if case_sensitive {
            if next != Some(ch) {
                return None;
            }
            next = wanted.next();
        } else {
            for folded in ch.to_lowercase() {
                if next != Some(folded) {
                    return None;
                }
                next = wanted.next();
            }
        }
    }
    next.is_none().then_some("")
}

/// A prefix rewrite between client-visible and debuggee-visible paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTransform {
    pub ide_prefix: String,
    pub server_prefix: String,
}

impl PathTransform {
    pub fn new(ide_prefix: impl Into<String>, server_prefix: impl Into<String>) -> Self {
        Self {
            ide_prefix: ide_prefix.into(),
            server_prefix: server_prefix.into(),
        }
    }

    /// Parse one `{idePrefix, serverPrefix}` object. `cfPrefix` is accepted as
    /// a deprecated spelling of `serverPrefix` and wins when both are present.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let ide = obj.get("idePrefix")?.as_str()?;
        let server = obj
            .get("cfPrefix")
            .or_else(|| obj.get("serverPrefix"))?
            .as_str()?;
        Some(Self::new(ide, server))
    }

    /// Accepts a single transform object or an array of them. Malformed entries
    /// are skipped.
    pub fn list_from_value(value: Option<&Value>) -> Vec<Self> {
        match value {
            Some(Value::Array(items)) => items.iter().filter_map(Self::from_value).collect(),
            Some(value @ Value::Object(_)) => Self::from_value(value).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn ide_to_server(&self, path: &str, case_sensitive: bool) -> Option<String> {
        strip_path_prefix(path, &self.ide_prefix, case_sensitive)
            .map(|rest| format!("{}{rest}", self.server_prefix))
    }

    pub fn server_to_ide(&self, path: &str, case_sensitive: bool) -> Option<String> {
        strip_path_prefix(path, &self.server_prefix, case_sensitive)
            .map(|rest| format!("{}{rest}", self.ide_prefix))
    }

    pub fn trace_string(&self) -> String {
        format!(
            "PathTransform{{idePrefix='{}', serverPrefix='{}'}}",
            self.ide_prefix, self.server_prefix
        )
    }
}

/// The ordered transform list of one session plus the file system's case rule.
///
/// Internally every path is debuggee-side and canonical; client paths are only
/// produced at the protocol boundary via [`PathMapper::to_ide`].
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    transforms: Vec<PathTransform>,
    case_sensitive: bool,
}

impl PathMapper {
    pub fn new(transforms: Vec<PathTransform>, case_sensitive: bool) -> Self {
        Self {
            transforms,
            case_sensitive,
        }
    }

    pub fn transforms(&self) -> &[PathTransform] {
        &self.transforms
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn canonicalize(&self, path: &str) -> String {
        canonicalize_path(path, self.case_sensitive)
    }

    /// Client path to canonical debuggee path. The first matching transform
    /// wins; unmatched paths are still canonicalized.
    pub fn to_server(&self, ide_path: &str) -> String {
        let mapped = self
            .transforms
            .iter()
            .find_map(|t| t.ide_to_server(ide_path, self.case_sensitive));
        self.canonicalize(mapped.as_deref().unwrap_or(ide_path))
    }

    /// Debuggee path to client path. Not canonicalized.
    pub fn to_ide(&self, server_path: &str) -> String {
        self.transforms
            .iter()
            .find_map(|t| t.server_to_ide(server_path, self.case_sensitive))
            .unwrap_or_else(|| server_path.to_string())
    }
}
