//! User-supplied filters, compiled once per request.
//!
//! Two strategies share one `CompiledFilter` contract:
//! - pattern mode treats the input as a regular expression matched against
//!   each file's full name (case-insensitive unless flags say otherwise);
//! - term mode splits the input into extension-like suffixes such as `.mkv`.
//!
//! Both collapse to a match-all fast path for blank or wildcard input, and
//! both reject malformed input before any entity is looked at.

use crate::models::container::{Container, File};
use regex::{Regex, RegexBuilder};
use std::fmt;
use thiserror::Error;

pub const MAX_PATTERN_LEN: usize = 256;
pub const MAX_TERMS: usize = 16;
pub const MAX_TERM_LEN: usize = 32;
pub const MAX_FLAGS_LEN: usize = 8;

const REGEX_SIZE_LIMIT: usize = 1 << 20;
const PATTERN_MATCH_ALL: [&str; 5] = ["", "*", ".*", "^.*$", ".*?"];
const TERM_MATCH_ALL: [&str; 2] = ["*", "*.*"];

/// Which strategy the deployment compiles filters with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FilterMode {
    Pattern,
    Terms,
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Pattern => f.write_str("pattern"),
            FilterMode::Terms => f.write_str("terms"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter is too long (at most {} characters)", MAX_PATTERN_LEN)]
    PatternTooLong,
    #[error("filter has too many terms (at most {})", MAX_TERMS)]
    TooManyTerms,
    #[error("filter term `{0}` is too long (at most {max} characters)", max = MAX_TERM_LEN)]
    TermTooLong(String),
    #[error("filter flags are too long (at most {} characters)", MAX_FLAGS_LEN)]
    FlagsTooLong,
    #[error("unsupported filter flag `{0}`")]
    UnsupportedFlag(char),
    #[error("invalid filter expression: {0}")]
    InvalidExpression(String),
}

#[derive(Debug, Clone)]
enum Matcher {
    All,
    Pattern(Regex),
    Terms(Vec<String>),
}

/// A precompiled, immutable predicate over files and containers.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    raw: String,
    matcher: Matcher,
}

impl CompiledFilter {
    /// A filter that lets everything through.
    pub fn match_all() -> Self {
        Self {
            raw: String::new(),
            matcher: Matcher::All,
        }
    }

    /// Compile `pattern` with the given strategy.
    ///
    /// `flags` only applies to pattern mode; term mode ignores it.
    pub fn compile(mode: FilterMode, pattern: &str, flags: &str) -> Result<Self, FilterError> {
        if pattern.chars().count() > MAX_PATTERN_LEN {
            return Err(FilterError::PatternTooLong);
        }
        let matcher = match mode {
            FilterMode::Pattern => compile_pattern(pattern, flags)?,
            FilterMode::Terms => compile_terms(pattern)?,
        };
        Ok(Self {
            raw: pattern.trim().to_string(),
            matcher,
        })
    }

    /// True when every entity matches without evaluation.
    pub fn is_match_all(&self) -> bool {
        matches!(self.matcher, Matcher::All)
    }

    /// Human-readable summary for the listing header, `None` for match-all.
    pub fn describe(&self) -> Option<String> {
        match &self.matcher {
            Matcher::All => None,
            Matcher::Pattern(_) => Some(format!("pattern \"{}\"", self.raw)),
            Matcher::Terms(terms) => Some(format!("files ending in {}", terms.join(", "))),
        }
    }

    /// Match a bare name the way files are matched.
    pub fn matches_name(&self, name: &str) -> bool {
        match &self.matcher {
            Matcher::All => true,
            Matcher::Pattern(regex) => regex.is_match(name),
            Matcher::Terms(terms) => {
                let lowered = name.to_lowercase();
                terms.iter().any(|term| lowered.ends_with(term.as_str()))
            }
        }
    }

    pub fn matches_file(&self, file: &File) -> bool {
        self.matches_name(&file.full_name)
    }

    /// True when the container's own name satisfies the filter.
    ///
    /// Only pattern mode looks at container names; terms describe files.
    pub fn matches_container_name(&self, container: &Container) -> bool {
        match &self.matcher {
            Matcher::All => true,
            Matcher::Pattern(regex) => regex.is_match(&container.container_name),
            Matcher::Terms(_) => false,
        }
    }

    /// A container matches through its name or through any of its files.
    pub fn matches_container(&self, container: &Container) -> bool {
        self.is_match_all()
            || self.matches_container_name(container)
            || container.files.iter().any(|file| self.matches_file(file))
    }
}

fn compile_pattern(pattern: &str, flags: &str) -> Result<Matcher, FilterError> {
    if flags.chars().count() > MAX_FLAGS_LEN {
        return Err(FilterError::FlagsTooLong);
    }
    let trimmed = pattern.trim();

    let mut builder = RegexBuilder::new(trimmed);
    builder.size_limit(REGEX_SIZE_LIMIT);
    if flags.is_empty() {
        builder.case_insensitive(true);
    }
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'U' => builder.swap_greed(true),
            other => return Err(FilterError::UnsupportedFlag(other)),
        };
    }

    if PATTERN_MATCH_ALL.contains(&trimmed) {
        return Ok(Matcher::All);
    }

    builder
        .build()
        .map(Matcher::Pattern)
        .map_err(|err| FilterError::InvalidExpression(last_line(&err.to_string())))
}

fn compile_terms(pattern: &str) -> Result<Matcher, FilterError> {
    let trimmed = pattern.trim();
    if TERM_MATCH_ALL.contains(&trimmed) {
        return Ok(Matcher::All);
    }

    let raw_terms: Vec<&str> = trimmed
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|term| !term.is_empty())
        .collect();
    if raw_terms.len() > MAX_TERMS {
        return Err(FilterError::TooManyTerms);
    }

    let mut terms = Vec::with_capacity(raw_terms.len());
    for raw in raw_terms {
        if raw.chars().count() > MAX_TERM_LEN {
            return Err(FilterError::TermTooLong(raw.to_string()));
        }
        let term = normalize_term(raw);
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    if terms.is_empty() {
        Ok(Matcher::All)
    } else {
        Ok(Matcher::Terms(terms))
    }
}

/// Lower-case a term and make it look like an extension suffix.
fn normalize_term(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let suffix = match lowered.strip_prefix("*.") {
        Some(rest) => format!(".{rest}"),
        None => lowered,
    };
    if suffix.starts_with('.') {
        suffix
    } else {
        format!(".{suffix}")
    }
}

fn last_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or("unparsable expression")
        .to_string()
}
