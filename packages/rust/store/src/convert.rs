//! Binding-to-Turtle conversion.
//!
//! A deterministic text pipeline: inject a binding set into a graph
//! pattern, expand namespace prefixes to full URIs, and emit one Turtle
//! triple per pattern line. No I/O happens here.

use regex::Regex;

use kenect_shared::{BindingSet, GraphPattern, KenectError, PrefixMap, Result};

/// Inject a binding set into a graph pattern.
///
/// Each binding map is applied to a fresh copy of the whole pattern, so
/// the output holds `bindings.len() * lines-per-pattern` lines, in
/// binding-map-major order. Variable matching is boundary-aware: a
/// variable that is a prefix of another variable name (`?s` vs
/// `?sensor`) replaces only its own occurrences. `<` and `>` delimiters
/// are stripped, lines are trimmed, and blank lines dropped.
pub fn inject_bindings(pattern: &GraphPattern, bindings: &BindingSet) -> Result<Vec<String>> {
    if bindings.is_empty() {
        return Err(KenectError::invalid_argument("binding set cannot be empty"));
    }

    let mut lines = Vec::new();
    for binding in bindings {
        let mut text = pattern.as_str().to_string();
        for (name, value) in binding {
            let variable = variable_regex(name)?;
            // NoExpand: binding values are inserted literally.
            text = variable
                .replace_all(&text, regex::NoExpand(value))
                .into_owned();
        }

        let text = text.replace(['<', '>'], "");
        lines.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }

    Ok(lines)
}

/// Match `?name` as a whole variable, not as a prefix of a longer name.
fn variable_regex(name: &str) -> Result<Regex> {
    if name.is_empty() {
        return Err(KenectError::invalid_argument(
            "binding variable name cannot be empty",
        ));
    }
    Regex::new(&format!(r"\?{}\b", regex::escape(name)))
        .map_err(|e| KenectError::invalid_argument(format!("invalid variable name {name:?}: {e}")))
}

/// Expand `prefix:local` shorthand to full URIs.
///
/// Lines are tokenized on whitespace; for each token the prefixes are
/// tried in map order (alphabetical) and the first match wins, which
/// makes the expansion deterministic when one token could match several
/// prefixes. `"` characters are stripped from every token.
pub fn expand_prefixes(lines: &[String], prefixes: &PrefixMap) -> Result<Vec<String>> {
    if prefixes.is_empty() {
        return Err(KenectError::invalid_argument("prefix map cannot be empty"));
    }

    let mut result = Vec::with_capacity(lines.len());
    for line in lines {
        let tokens: Vec<String> = line
            .split_whitespace()
            .map(|token| expand_token(token, prefixes).replace('"', ""))
            .collect();
        result.push(tokens.join(" "));
    }

    Ok(result)
}

fn expand_token(token: &str, prefixes: &PrefixMap) -> String {
    for (prefix, uri) in prefixes {
        if let Some(local) = token
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
        {
            return format!("{uri}{local}");
        }
    }
    token.to_string()
}

/// Convert a graph pattern plus bindings and prefixes to Turtle text.
///
/// Each resolved line contributes one triple: the first three
/// whitespace-separated tokens become subject, predicate and object
/// (extra tokens are discarded). An object starting with `http` is
/// emitted as a URI in angle brackets; anything else becomes a plain
/// quoted literal, with no language tag or datatype.
pub fn to_turtle(
    pattern: &GraphPattern,
    bindings: &BindingSet,
    prefixes: &PrefixMap,
) -> Result<String> {
    let lines = inject_bindings(pattern, bindings)?;
    let lines = expand_prefixes(&lines, prefixes)?;

    let mut triples = Vec::with_capacity(lines.len());
    for line in &lines {
        let mut tokens = line.split_whitespace();
        let (Some(subject), Some(predicate), Some(object)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(KenectError::invalid_argument(format!(
                "expected subject, predicate and object in line {line:?}"
            )));
        };

        let object = if object.starts_with("http") {
            format!("<{object}>")
        } else {
            format!("\"{object}\"")
        };
        triples.push(format!("<{subject}> <{predicate}> {object} ."));
    }

    Ok(triples.join("\n"))
}
