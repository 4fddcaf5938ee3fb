use edgegate_api::RouteClass;

use crate::RouteSettings;

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    class: RouteClass,
}

/// Total classification of request paths.
///
/// `/` matches only the root; any other pattern matches itself and everything
/// below it on a segment boundary. The longest matching pattern decides, a
/// restricted rule wins a tie, and a path no rule matches is protected.
///
/// Paths are canonicalized before matching. A path that has no canonical
/// form is held to the roles every restricted rule shares.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    rules: Vec<Rule>,
    bypass: Vec<String>,
    unresolvable: RouteClass,
}

impl RoutePolicy {
    pub fn from_settings(routes: &RouteSettings) -> Self {
        let restricted = routes.restricted.iter().map(|r| Rule {
            pattern: normalize_pattern(&r.prefix),
            class: RouteClass::Restricted(r.roles.clone()),
        });
        let public = routes.public.iter().map(|p| Rule {
            pattern: normalize_pattern(p),
            class: RouteClass::Public,
        });
        let mut rules: Vec<Rule> = restricted.chain(public).collect();
        // Stable sort keeps restricted rules ahead of public ones of equal length.
        rules.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));

        let unresolvable = routes
            .restricted
            .iter()
            .map(|r| r.roles.clone())
            .reduce(|a, b| a.intersection(&b).copied().collect())
            .map_or(RouteClass::Protected, RouteClass::Restricted);

        Self {
            rules,
            bypass: routes.bypass.iter().map(|p| normalize_pattern(p)).collect(),
            unresolvable,
        }
    }

    pub fn classify(&self, path: &str) -> RouteClass {
        let Some(path) = canonical_path(path) else {
            tracing::debug!(path, "path has no canonical form");
            return self.unresolvable.clone();
        };
        self.rules
            .iter()
            .find(|rule| matches(&rule.pattern, &path))
            .map_or(RouteClass::Protected, |rule| rule.class.clone())
    }

    /// Assets and raw API routes the gate never looks at.
    pub fn is_bypassed(&self, path: &str) -> bool {
        let Some(path) = canonical_path(path) else {
            return false;
        };
        self.bypass.iter().any(|p| p != "/" && matches(p, &path))
    }
}

fn normalize_pattern(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Query and fragment dropped, unreserved escapes decoded, empty and `.`
/// segments removed, `..` applied. `None` for malformed escapes, encoded
/// separators, backslashes and `..` above the root.
fn canonical_path(raw: &str) -> Option<String> {
    let path = raw.split(['?', '#']).next().unwrap_or_default();
    let decoded = decode_unreserved(path)?;
    if decoded.contains('\\') {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(format!("/{}", segments.join("/")))
}

fn decode_unreserved(path: &str) -> Option<String> {
    let mut parts = path.split('%');
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        let hex = part.get(..2)?;
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let c = char::from(u8::from_str_radix(hex, 16).ok()?);
        match c {
            '/' | '\\' | '\0' => return None,
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') => out.push(c),
            _ => {
                out.push('%');
                out.push_str(&hex.to_ascii_uppercase());
            }
        }
        out.push_str(&part[2..]);
    }
    Some(out)
}

fn matches(pattern: &str, path: &str) -> bool {
    if pattern == "/" {
        return path == "/";
    }
    path == pattern
        || path
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('/'))
}
