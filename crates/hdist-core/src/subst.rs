//! Variable substitution for job-spec strings.
//!
//! Grammar: `$NAME` and `${NAME}` reference environment entries, `\$`
//! yields a literal `$`, `\\` yields a literal `\`, and any other
//! backslash is preserved verbatim. `$$` is reserved — no variable may be
//! named `$` — and always fails.

use std::iter::Peekable;
use std::str::Chars;

use crate::env::Env;
use crate::error::{Result, SpecError};

/// Expands every variable reference in `input` against `env`.
///
/// Non-reference bytes are preserved exactly; the expansion is
/// deterministic for a given input and environment.
///
/// # Errors
///
/// Returns [`SpecError::UnknownVariable`] for references to unbound names
/// (including the reserved `$$`), and [`SpecError::InvalidJobSpec`] for
/// malformed placeholders such as an unterminated `${`.
pub fn substitute(input: &str, env: &Env) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('$') => {
                    out.push('$');
                    let _ = chars.next();
                }
                Some('\\') => {
                    out.push('\\');
                    let _ = chars.next();
                }
                _ => out.push('\\'),
            },
            '$' => {
                let name = take_reference(input, &mut chars)?;
                match env.get(&name) {
                    Some(value) => out.push_str(value),
                    None => return Err(SpecError::UnknownVariable(name)),
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Consumes one variable reference following a `$`.
fn take_reference(input: &str, chars: &mut Peekable<Chars<'_>>) -> Result<String> {
    match chars.peek() {
        // No variable may be named `$`.
        Some('$') => Err(SpecError::UnknownVariable("$".to_owned())),
        Some('{') => {
            let _ = chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => name.push(c),
                    None => {
                        return Err(SpecError::InvalidJobSpec(format!(
                            "unterminated ${{ in {input:?}"
                        )));
                    }
                }
            }
            if is_identifier(&name) {
                Ok(name)
            } else {
                Err(SpecError::InvalidJobSpec(format!(
                    "invalid placeholder ${{{name}}} in {input:?}"
                )))
            }
        }
        Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    let _ = chars.next();
                } else {
                    break;
                }
            }
            Ok(name)
        }
        _ => Err(SpecError::InvalidJobSpec(format!(
            "malformed variable reference in {input:?}"
        ))),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Env {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn plain_text_passes_through() {
        let e = env(&[]);
        assert_eq!(substitute("no references here", &e).unwrap(), "no references here");
    }

    #[test]
    fn bare_and_braced_references_expand() {
        let e = env(&[("CFLAGS", "-O2"), ("PREFIX", "/opt")]);
        assert_eq!(substitute("$CFLAGS", &e).unwrap(), "-O2");
        assert_eq!(substitute("${PREFIX}/bin", &e).unwrap(), "/opt/bin");
        assert_eq!(substitute("x${PREFIX}y$CFLAGS", &e).unwrap(), "x/opty-O2");
    }

    #[test]
    fn reference_stops_at_non_identifier_char() {
        let e = env(&[("A", "1")]);
        assert_eq!(substitute("$A/b", &e).unwrap(), "1/b");
    }

    #[test]
    fn escaped_dollar_is_literal() {
        let e = env(&[]);
        assert_eq!(substitute(r"\$FOO", &e).unwrap(), "$FOO");
    }

    #[test]
    fn escaped_backslash_is_literal() {
        let e = env(&[("X", "v")]);
        assert_eq!(substitute(r"a\\b", &e).unwrap(), r"a\b");
        // A consumed `\\` does not re-arm escaping: the following `$X`
        // is a normal reference.
        assert_eq!(substitute(r"\\$X", &e).unwrap(), r"\v");
    }

    #[test]
    fn other_backslashes_carry_through() {
        let e = env(&[]);
        assert_eq!(substitute(r"a\nb", &e).unwrap(), r"a\nb");
    }

    #[test]
    fn double_dollar_always_fails() {
        let e = env(&[("X", "v")]);
        assert_eq!(
            substitute("$$", &e),
            Err(SpecError::UnknownVariable("$".to_owned()))
        );
        assert!(substitute("a$$b", &e).is_err());
    }

    #[test]
    fn unbound_variable_fails_with_its_name() {
        let e = env(&[]);
        assert_eq!(
            substitute("$MISSING", &e),
            Err(SpecError::UnknownVariable("MISSING".to_owned()))
        );
    }

    #[test]
    fn unterminated_brace_is_invalid() {
        let e = env(&[("X", "v")]);
        assert!(matches!(
            substitute("${X", &e),
            Err(SpecError::InvalidJobSpec(_))
        ));
    }

    #[test]
    fn trailing_dollar_is_invalid() {
        let e = env(&[]);
        assert!(matches!(
            substitute("tail$", &e),
            Err(SpecError::InvalidJobSpec(_))
        ));
    }

    #[test]
    fn substitution_is_deterministic() {
        let e = env(&[("A", "x")]);
        let once = substitute("pre $A ${A} post", &e).unwrap();
        let twice = substitute("pre $A ${A} post", &e).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "pre x x post");
    }
}
