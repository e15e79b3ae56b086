//! POSIX shell word splitting and quoting, limited to what a forced SSH
//! command needs: single quotes, double quotes and backslash escapes.
//! Nothing is ever expanded and control operators are refused outright.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,
    #[error("trailing backslash")]
    TrailingBackslash,
    #[error("unsupported shell syntax: {0:?}")]
    Unsupported(char),
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

fn is_operator(c: char) -> bool {
    matches!(c, ';' | '&' | '|' | '<' | '>' | '(' | ')' | '$' | '`')
}

/// Splits `input` into words.
pub fn split(input: &str) -> Result<Vec<String>, SplitError> {
    let mut words = Vec::new();
    let mut word = String::new();
    // Distinguishes an empty quoted word ('') from no word at all.
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if is_blank(c) => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(SplitError::UnterminatedSingleQuote),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('\n') => {}
                            Some(c @ ('$' | '`' | '"' | '\\')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err(SplitError::UnterminatedDoubleQuote),
                        },
                        Some(c @ ('$' | '`')) => return Err(SplitError::Unsupported(c)),
                        Some(c) => word.push(c),
                        None => return Err(SplitError::UnterminatedDoubleQuote),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(c) => {
                    in_word = true;
                    word.push(c);
                }
                None => return Err(SplitError::TrailingBackslash),
            },
            c if is_operator(c) => return Err(SplitError::Unsupported(c)),
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | '+' | '=' | ',' | '%')
}

/// Quotes `s` so that [`split`] (or a POSIX shell) reads it back as one word.
#[must_use]
pub fn quote(s: &str) -> Cow<'_, str> {
    if !s.is_empty() && s.chars().all(is_safe) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("'{}'", s.replace('\'', r#"'\''"#)))
}

/// Quotes every word and joins them with single spaces.
#[must_use]
pub fn join<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_split_git_commands() {
        assert_eq!(
            split("git-upload-pack 'team:svc'").unwrap(),
            s(&["git-upload-pack", "team:svc"])
        );
        assert_eq!(
            split("git-receive-pack \"/team/svc.git\"").unwrap(),
            s(&["git-receive-pack", "/team/svc.git"])
        );
        assert_eq!(
            split("  git-upload-archive\t~team/svc  ").unwrap(),
            s(&["git-upload-archive", "~team/svc"])
        );
    }

    #[test]
    fn test_split_quoting_rules() {
        assert_eq!(split(r"a\ b").unwrap(), s(&["a b"]));
        assert_eq!(split(r#""a\"b\\c\d""#).unwrap(), s(&[r#"a"b\c\d"#]));
        assert_eq!(split(r"'a\b'").unwrap(), s(&[r"a\b"]));
        assert_eq!(split("'it'\\''s'").unwrap(), s(&["it's"]));
        assert_eq!(split("x '' y").unwrap(), s(&["x", "", "y"]));
        assert_eq!(split("ab\\\ncd").unwrap(), s(&["abcd"]));
        assert!(split("").unwrap().is_empty());
    }

    #[test]
    fn test_split_errors() {
        assert_eq!(split("'abc"), Err(SplitError::UnterminatedSingleQuote));
        assert_eq!(split("\"abc"), Err(SplitError::UnterminatedDoubleQuote));
        assert_eq!(split("abc\\"), Err(SplitError::TrailingBackslash));
        assert_eq!(split("a; rm -rf /"), Err(SplitError::Unsupported(';')));
        assert_eq!(split("a $(id)"), Err(SplitError::Unsupported('$')));
        assert_eq!(split("\"`id`\""), Err(SplitError::Unsupported('`')));
        assert_eq!(split("'$(id)'").unwrap(), s(&["$(id)"]));
    }

    #[test]
    fn test_quote_reads_back() {
        for word in ["alice", "my key", "it's", "", "a\"b", "x;y"] {
            let quoted = quote(word);
            assert_eq!(split(&quoted).unwrap(), vec![word.to_string()], "{quoted}");
        }
        assert_eq!(quote("alice"), "alice");
        assert_eq!(join(&["/usr/bin/gitus", "ssh", "bob", "my laptop"]), "/usr/bin/gitus ssh bob 'my laptop'");
    }
}
