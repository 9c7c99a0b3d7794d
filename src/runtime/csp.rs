//! Content Security Policy checks for worker script loads
//!
//! Only the subset of CSP that governs where worker scripts may come from
//! is modelled. The effective directive for a worker load is the first of
//! `worker-src`, `child-src`, `script-src`, `default-src` present in the
//! policy.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Directive fallback chain for worker loads
const WORKER_DIRECTIVES: [&str; 4] = ["worker-src", "child-src", "script-src", "default-src"];

/// Errors that can occur while parsing a policy
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CspError {
    #[error("Policy has no directives")]
    Empty,

    #[error("Invalid directive name: {0}")]
    InvalidDirective(String),
}

/// A parsed `Content-Security-Policy` header value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSecurityPolicy {
    directives: HashMap<String, Vec<String>>,
    source: String,
}

/// A worker load refused by policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspViolation {
    pub url: String,
    pub directive: String,
}

impl fmt::Display for CspViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Refused to create a worker from '{}' because it violates the following Content Security Policy directive: \"{}\"",
            abbreviate(&self.url),
            self.directive
        )
    }
}

impl ContentSecurityPolicy {
    pub fn parse(header: &str) -> Result<Self, CspError> {
        let mut directives = HashMap::new();

        for part in header.split(';') {
            let mut tokens = part.split_ascii_whitespace();
            let Some(name) = tokens.next() else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(CspError::InvalidDirective(name));
            }
            // Browsers ignore repeated directives
            directives
                .entry(name)
                .or_insert_with(|| tokens.map(|t| t.to_string()).collect());
        }

        if directives.is_empty() {
            return Err(CspError::Empty);
        }

        Ok(Self {
            directives,
            source: header.trim().to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether a worker may be loaded from `url`
    pub fn check_worker(&self, url: &str) -> Result<(), CspViolation> {
        let Some((name, sources)) = WORKER_DIRECTIVES
            .iter()
            .find_map(|d| self.directives.get(*d).map(|s| (*d, s)))
        else {
            return Ok(());
        };

        if sources.iter().any(|s| source_matches(s, url)) {
            Ok(())
        } else {
            let mut directive = name.to_string();
            for source in sources {
                directive.push(' ');
                directive.push_str(source);
            }
            Err(CspViolation {
                url: url.to_string(),
                directive,
            })
        }
    }
}

fn scheme_of(url: &str) -> Option<String> {
    url.find(':')
        .map(|idx| url[..=idx].to_ascii_lowercase())
        .filter(|s| s.len() > 2)
}

fn source_matches(source: &str, url: &str) -> bool {
    let scheme = scheme_of(url);
    let source = source.to_ascii_lowercase();

    match source.as_str() {
        "'none'" => false,
        "*" => !matches!(scheme.as_deref(), Some("data:" | "blob:" | "filesystem:")),
        "'self'" => matches!(scheme.as_deref(), Some("file:") | None),
        s if s.starts_with('\'') => false,
        s if s.ends_with(':') => scheme.as_deref() == Some(s),
        s => url.to_ascii_lowercase().starts_with(s),
    }
}

fn abbreviate(url: &str) -> String {
    const LIMIT: usize = 64;
    if url.len() <= LIMIT {
        return url.to_string();
    }
    let mut end = LIMIT;
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &url[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_worker_directive_allows_all() {
        let csp = ContentSecurityPolicy::parse("img-src 'self'").unwrap();
        assert!(csp.check_worker("data:text/javascript;base64,AA==").is_ok());
        assert!(csp.check_worker("blob:null/1").is_ok());
    }

    #[test]
    fn test_fallback_chain() {
        let csp = ContentSecurityPolicy::parse("default-src 'self'; script-src blob:").unwrap();
        assert!(csp.check_worker("blob:null/1").is_ok());
        assert!(csp.check_worker("data:text/javascript,x").is_err());

        let csp = ContentSecurityPolicy::parse("script-src blob:; worker-src data:").unwrap();
        assert!(csp.check_worker("data:text/javascript,x").is_ok());
        assert!(csp.check_worker("blob:null/1").is_err());
    }

    #[test]
    fn test_star_excludes_data_and_blob() {
        let csp = ContentSecurityPolicy::parse("worker-src *").unwrap();
        assert!(csp.check_worker("file:///tmp/a.js").is_ok());
        assert!(csp.check_worker("data:text/javascript,x").is_err());
        assert!(csp.check_worker("blob:null/1").is_err());
    }

    #[test]
    fn test_none_and_self() {
        let csp = ContentSecurityPolicy::parse("worker-src 'none'").unwrap();
        assert!(csp.check_worker("file:///tmp/a.js").is_err());

        let csp = ContentSecurityPolicy::parse("worker-src 'self'").unwrap();
        assert!(csp.check_worker("file:///tmp/a.js").is_ok());
        assert!(csp.check_worker("/tmp/a.js").is_ok());
        assert!(csp.check_worker("blob:null/1").is_err());
    }

    #[test]
    fn test_violation_message() {
        let csp = ContentSecurityPolicy::parse("worker-src 'self' blob:").unwrap();
        let violation = csp.check_worker("data:text/javascript;base64,AA==").unwrap_err();
        assert_eq!(
            violation.to_string(),
            "Refused to create a worker from 'data:text/javascript;base64,AA==' because it violates the following Content Security Policy directive: \"worker-src 'self' blob:\""
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ContentSecurityPolicy::parse(" ; ;"), Err(CspError::Empty));
        assert!(matches!(
            ContentSecurityPolicy::parse("worker_src blob:"),
            Err(CspError::InvalidDirective(_))
        ));
    }
}
