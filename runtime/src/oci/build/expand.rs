//! Variable substitution for instruction arguments.
//!
//! Expands `$VAR`, `${VAR}`, `${VAR:-default}` and `${VAR:+alternate}`
//! against an ordered environment. Later entries override earlier ones,
//! unknown variables expand to the empty string.

use strata_core::error::{Result, StrataError};

/// Expand variables in `word`.
///
/// With `is_filepath` set, backslashes are kept literally (except before
/// `$`) so Windows-style or escaped path characters survive.
pub fn expand(word: &str, env: &[(String, String)], is_filepath: bool) -> Result<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some('$') => {
                        out.push('$');
                        i += 2;
                    }
                    Some(&next) if !is_filepath => {
                        out.push(next);
                        i += 2;
                    }
                    _ => {
                        out.push('\\');
                        i += 1;
                    }
                }
            }
            '$' => {
                let (expanded, consumed) = expand_reference(&chars[i + 1..], env, is_filepath, word)?;
                out.push_str(&expanded);
                i += 1 + consumed;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Expand the reference following a `$`. Returns the expansion and the
/// number of characters consumed after the `$`.
fn expand_reference(
    rest: &[char],
    env: &[(String, String)],
    is_filepath: bool,
    word: &str,
) -> Result<(String, usize)> {
    match rest.first() {
        Some('{') => {
            let close = find_closing_brace(rest).ok_or_else(|| {
                StrataError::Resolution(format!("missing '}}' in '{}'", word))
            })?;
            let inner: String = rest[1..close].iter().collect();
            let value = expand_braced(&inner, env, is_filepath, word)?;
            Ok((value, close + 1))
        }
        Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
            let len = rest
                .iter()
                .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                .count();
            let name: String = rest[..len].iter().collect();
            Ok((lookup(env, &name).unwrap_or_default(), len))
        }
        _ => Ok(("$".to_string(), 0)),
    }
}

fn expand_braced(
    inner: &str,
    env: &[(String, String)],
    is_filepath: bool,
    word: &str,
) -> Result<String> {
    let name_len = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
    let name = &inner[..name_len];
    if name.is_empty() {
        return Err(StrataError::Resolution(format!(
            "bad substitution '${{{}}}' in '{}'",
            inner, word
        )));
    }

    let value = lookup(env, name);
    let modifier = &inner[name_len..];
    if modifier.is_empty() {
        return Ok(value.unwrap_or_default());
    }

    if let Some(default) = modifier.strip_prefix(":-") {
        return match value {
            Some(v) if !v.is_empty() => Ok(v),
            _ => expand(default, env, is_filepath),
        };
    }
    if let Some(alternate) = modifier.strip_prefix(":+") {
        return match value {
            Some(v) if !v.is_empty() => expand(alternate, env, is_filepath),
            _ => Ok(String::new()),
        };
    }
    if let Some(default) = modifier.strip_prefix('-') {
        return match value {
            Some(v) => Ok(v),
            None => expand(default, env, is_filepath),
        };
    }
    if let Some(alternate) = modifier.strip_prefix('+') {
        return match value {
            Some(_) => expand(alternate, env, is_filepath),
            None => Ok(String::new()),
        };
    }

    Err(StrataError::Resolution(format!(
        "unsupported modifier '{}' in '{}'",
        modifier, word
    )))
}

fn find_closing_brace(rest: &[char]) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in rest.iter().enumerate() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn lookup(env: &[(String, String)], name: &str) -> Option<String> {
    env.iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}
