//! Quoting helpers for generated bash scripts.

use regex::Regex;

/// Escape a value for use inside a double-quoted bash string.
///
/// ```rust
/// use provisor_cli::utils::shell::escape_bash_env_value;
///
/// assert_eq!(escape_bash_env_value(r#"a"$b`c\d!"#), r#"a\"\$b\`c\\d\!"#);
/// ```
#[must_use]
pub fn escape_bash_env_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`' | '!') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Quote a value as a single-quoted bash word.
#[must_use]
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Whether `name` can be exported as an environment variable.
#[must_use]
pub fn is_valid_env_name(name: &str) -> bool {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").is_ok_and(|re| re.is_match(name))
}

/// Render `export` lines for an environment map.
pub fn export_lines<'a, I>(environment: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    environment
        .into_iter()
        .map(|(key, value)| format!("export {key}=\"{}\"\n", escape_bash_env_value(value)))
        .collect()
}
