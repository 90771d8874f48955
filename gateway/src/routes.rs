use crate::config::RouteConfig;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern must start with '/'")]
    MustStartWithSlash,

    #[error("pattern contains an empty segment")]
    EmptySegment,

    #[error("at most one '*' segment is allowed")]
    MultipleWildcards,

    #[error("'**' is only allowed as the final segment")]
    DoubleWildcardNotLast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// Compiled path pattern.
///
/// Supports at most one `*` segment, which matches exactly one path
/// segment and captures it, and an optional trailing `**`, which
/// matches the bare prefix as well as any subpath below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    segments: Vec<Segment>,
    prefix: bool,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let Some(rest) = pattern.strip_prefix('/') else {
            return Err(PatternError::MustStartWithSlash);
        };

        let mut segments = Vec::new();
        let mut prefix = false;
        let mut saw_wildcard = false;

        let raw: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        for (i, part) in raw.iter().enumerate() {
            match *part {
                "" => return Err(PatternError::EmptySegment),
                "**" => {
                    if i != raw.len() - 1 {
                        return Err(PatternError::DoubleWildcardNotLast);
                    }
                    prefix = true;
                }
                "*" => {
                    if saw_wildcard {
                        return Err(PatternError::MultipleWildcards);
                    }
                    saw_wildcard = true;
                    segments.push(Segment::Wildcard);
                }
                literal => segments.push(Segment::Literal(literal.to_string())),
            }
        }

        Ok(RoutePattern { segments, prefix })
    }

    /// Matches a request path, returning the captured `*` segment if any.
    ///
    /// Returns `None` when the path does not match.
    pub fn matches<'p>(&self, path: &'p str) -> Option<Option<&'p str>> {
        let trimmed = path.strip_prefix('/')?;
        let mut parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        // Tolerate a trailing slash
        if parts.last() == Some(&"") {
            parts.pop();
        }

        if self.prefix {
            if parts.len() < self.segments.len() {
                return None;
            }
        } else if parts.len() != self.segments.len() {
            return None;
        }

        let mut capture = None;
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(expected) => {
                    if expected != part {
                        return None;
                    }
                }
                Segment::Wildcard => capture = Some(*part),
            }
        }

        Some(capture)
    }
}

/// A matched route together with its captured wildcard segment.
pub struct RouteMatch<'a> {
    pub config: &'a RouteConfig,
    pub capture: Option<String>,
}

/// Ordered route table; first match in declaration order wins, so more
/// specific routes must be declared before catch-alls.
pub struct RouteTable {
    routes: Vec<(RoutePattern, RouteConfig)>,
}

impl RouteTable {
    /// Builds the table. Patterns must already have passed config
    /// validation; invalid ones are rejected here as well.
    pub fn new(routes: Vec<RouteConfig>) -> Result<Self, PatternError> {
        let routes = routes
            .into_iter()
            .map(|config| Ok((RoutePattern::parse(&config.r#match.path)?, config)))
            .collect::<Result<Vec<_>, PatternError>>()?;
        Ok(RouteTable { routes })
    }

    pub fn find(&self, method: &hyper::Method, path: &str) -> Option<RouteMatch<'_>> {
        for (pattern, config) in &self.routes {
            let methods = &config.r#match.methods;
            if !methods.is_empty() && !methods.iter().any(|m| m.matches(method)) {
                continue;
            }

            if let Some(capture) = pattern.matches(path) {
                return Some(RouteMatch {
                    config,
                    capture: capture.map(str::to_string),
                });
            }
        }
        None
    }
}
