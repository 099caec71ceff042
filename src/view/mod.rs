//! Minimal view templates: `{{ key }}` substitution from a JSON object.

use std::path::{Path, PathBuf};

use serde_json::Value;

/// Directory views are read from when none is configured.
pub const DEFAULT_VIEWS_DIR: &str = "views";

/// Extensions tried, in order, when resolving a view name.
pub const VIEW_EXTENSIONS: &[&str] = &["html", "htm"];

/// Finds the first existing `<dir>/<name>.<ext>` file.
pub fn resolve(dir: &Path, name: &str) -> Option<PathBuf> {
    VIEW_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Replaces every `{{ key }}` in `template` with the matching value in `data`.
///
/// Dotted keys walk nested objects. Strings are inserted as-is, other values
/// as JSON text, and missing keys as nothing. An unclosed `{{` is kept verbatim.
///
/// ```
/// use serde_json::json;
/// use spindle::view::render_template;
///
/// let out = render_template("{{user.name}} has {{ count }} items", &json!({
///     "user": {"name": "Ada"},
///     "count": 3
/// }));
/// assert_eq!(out, "Ada has 3 items");
/// ```
pub fn render_template(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };

        let key = after_open[..close].trim();
        match lookup(data, key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(data: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(data, |value, part| value.get(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_keys_render_empty() {
        assert_eq!(render_template("a{{ nope }}b", &json!({})), "ab");
    }

    #[test]
    fn unclosed_tag_is_kept() {
        assert_eq!(render_template("x {{ y", &json!({"y": 1})), "x {{ y");
    }

    #[test]
    fn resolve_prefers_first_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.htm"), "htm").unwrap();
        std::fs::write(dir.path().join("page.html"), "html").unwrap();
        let found = resolve(dir.path(), "page").unwrap();
        assert_eq!(found.extension().unwrap(), "html");
    }

    #[test]
    fn resolve_falls_back_to_later_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.htm"), "htm").unwrap();
        assert!(resolve(dir.path(), "page").is_some());
        assert!(resolve(dir.path(), "other").is_none());
    }
}
