use std::fmt;

/// SQL command category an operation is permitted to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Select,
    Insert,
    Update,
}

impl Verb {
    pub fn keyword(self) -> &'static str {
        match self {
            Verb::Select => "SELECT",
            Verb::Insert => "INSERT",
            Verb::Update => "UPDATE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Checks only the leading whitespace-delimited token of `query`.
pub fn is_allowed(query: &str, expected: Verb) -> bool {
    query
        .split_whitespace()
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case(expected.keyword()))
}
