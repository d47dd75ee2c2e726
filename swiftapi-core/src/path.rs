// Route pattern compilation and path normalization

use crate::Error;
use crate::logging::debug;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::HashMap;

/// A compiled route pattern.
///
/// `{name}` placeholders match exactly one non-empty segment without a slash;
/// everything else is matched literally and the whole path must match.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
    names: Vec<String>,
}

impl PathPattern {
    /// Compile `pattern`. Duplicate, empty or non-identifier placeholder names
    /// and unbalanced braces are rejected.
    pub fn compile(pattern: &str) -> Result<Self, Error> {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');

        let mut names: Vec<String> = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    source.push_str(&regex::escape(&literal));
                    literal.clear();

                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(Error::InvalidRoute(format!(
                                    "nested '{{' in route pattern '{pattern}'"
                                )));
                            }
                            c => name.push(c),
                        }
                    }

                    if !closed {
                        return Err(Error::InvalidRoute(format!(
                            "unclosed '{{' in route pattern '{pattern}'"
                        )));
                    }
                    if name.is_empty() {
                        return Err(Error::InvalidRoute(format!(
                            "empty placeholder in route pattern '{pattern}'"
                        )));
                    }
                    if !is_identifier(&name) {
                        return Err(Error::InvalidRoute(format!(
                            "placeholder '{name}' in route pattern '{pattern}' is not an identifier"
                        )));
                    }
                    if names.contains(&name) {
                        return Err(Error::InvalidRoute(format!(
                            "duplicate placeholder '{name}' in route pattern '{pattern}'"
                        )));
                    }

                    source.push_str("([^/]+)");
                    names.push(name);
                }
                '}' => {
                    return Err(Error::InvalidRoute(format!(
                        "unmatched '}}' in route pattern '{pattern}'"
                    )));
                }
                c => literal.push(c),
            }
        }

        source.push_str(&regex::escape(&literal));
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| Error::InvalidRoute(format!("route pattern '{pattern}': {e}")))?;

        debug!(pattern = %pattern, params = names.len(), "Compiled route pattern");

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            names,
        })
    }

    /// Match a request path, returning the captured placeholders.
    ///
    /// Matching runs on the raw path, so an encoded `%2F` stays inside its
    /// segment; each captured segment is then percent-decoded.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut params = HashMap::with_capacity(self.names.len());
        for (i, name) in self.names.iter().enumerate() {
            if let Some(m) = captures.get(i + 1) {
                params.insert(name.clone(), decode_segment(m.as_str()));
            }
        }
        Some(params)
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Placeholder names in declaration order
    pub fn param_names(&self) -> &[String] {
        &self.names
    }
}

/// Percent-decode one path segment. Invalid UTF-8 is replaced rather than
/// rejected.
fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Normalize a path: leading slash, no duplicate slashes, `.` and `..`
/// resolved. A trailing slash survives unless the result is the root.
pub fn clean_path(path: &str) -> String {
    let trailing = path.len() > 1 && path.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut cleaned = String::with_capacity(path.len() + 1);
    cleaned.push('/');
    cleaned.push_str(&segments.join("/"));
    if trailing && cleaned.len() > 1 {
        cleaned.push('/');
    }
    cleaned
}

/// Join route path pieces (prefix, version, route path) and clean the result.
pub fn join_paths(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    clean_path(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_pattern() {
        let pattern = PathPattern::compile("/users").unwrap();
        assert_eq!(pattern.matches("/users").unwrap().len(), 0);
        assert!(pattern.matches("/users/1").is_none());
        assert!(pattern.matches("/userss").is_none());
    }

    #[test]
    fn test_placeholders_capture_segments() {
        let pattern = PathPattern::compile("/users/{user_id}/posts/{post_id}").unwrap();
        let params = pattern.matches("/users/42/posts/abc").unwrap();
        assert_eq!(params.get("user_id"), Some(&"42".to_string()));
        assert_eq!(params.get("post_id"), Some(&"abc".to_string()));
        assert_eq!(pattern.param_names(), &["user_id", "post_id"]);
    }

    #[test]
    fn test_placeholder_never_spans_slash_or_empty() {
        let pattern = PathPattern::compile("/files/{name}").unwrap();
        assert!(pattern.matches("/files/a/b").is_none());
        assert!(pattern.matches("/files/").is_none());
    }

    #[test]
    fn test_captures_are_percent_decoded() {
        let pattern = PathPattern::compile("/users/{name}/files/{file}").unwrap();
        let params = pattern.matches("/users/caf%C3%A9/files/a%2Fb%20c").unwrap();
        assert_eq!(params["name"], "café");
        assert_eq!(params["file"], "a/b c");

        // A decoded slash never splits the segment it came from
        assert!(pattern.matches("/users/x/files/a/b").is_none());
    }

    #[test]
    fn test_literal_text_is_escaped() {
        let pattern = PathPattern::compile("/v1.0/items/{id}.json").unwrap();
        assert!(pattern.is_match("/v1.0/items/7.json"));
        assert!(!pattern.is_match("/v1x0/items/7.json"));
    }

    #[test]
    fn test_invalid_patterns() {
        for bad in [
            "/a/{id}/{id}",
            "/a/{}",
            "/a/{1id}",
            "/a/{id",
            "/a/id}",
            "/a/{i{d}}",
            "/a/{my-id}",
        ] {
            assert!(
                matches!(PathPattern::compile(bad), Err(Error::InvalidRoute(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("users"), "/users");
        assert_eq!(clean_path("//api///users"), "/api/users");
        assert_eq!(clean_path("/api/./v1/../users/"), "/api/users/");
        assert_eq!(clean_path("/../.."), "/");
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths(&["/api", "v1", "/users"]), "/api/v1/users");
        assert_eq!(join_paths(&["", "", "/users/"]), "/users/");
        assert_eq!(join_paths(&["/api/", "", "/"]), "/api/");
        assert_eq!(join_paths(&["", "", ""]), "/");
    }
}
