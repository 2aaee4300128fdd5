//! Variable resolution - `{{key}}` substitution

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{RequestBody, RequestSpec, VariableMap};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder pattern is valid"));

/// Substitutes {{variable}} patterns in text
///
/// One pass over the input: substituted values are never re-scanned, and
/// placeholders without a binding are kept verbatim.
pub fn resolve(text: &str, variables: &VariableMap) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Keys of the placeholders left in `text`
pub fn unresolved(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Resolves the URL, header keys and values, and a text body
pub fn resolve_request(request: &mut RequestSpec, variables: &VariableMap) {
    request.url = resolve(&request.url, variables);

    for header in &mut request.headers {
        header.key = resolve(&header.key, variables);
        header.value = resolve(&header.value, variables);
    }

    if let Some(RequestBody::Text(body)) = &mut request.body {
        *body = resolve(body, variables);
    }
}
