// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capability grammar and the matching rule that decides whether a granted
//! capability authorizes a required access.
//!
//! A [`Capability`] is a tagged sum over three shapes (HTTP, file, env). The
//! same shape doubles as a "required access" descriptor: matching is always
//! `matches(required, granted)`, never the other way around.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// HTTP method enumerated domain. Anything outside this set is rejected at
/// the grant boundary and normalized to `GET` when synthesizing descriptors.
pub const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Capability {
    #[serde(rename = "http")]
    Http {
        host: String,
        #[serde(rename = "pathPattern", skip_serializing_if = "Option::is_none")]
        path_pattern: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        methods: Option<Vec<String>>,
        description: String,
    },
    #[serde(rename = "file")]
    File {
        path: String,
        operations: Vec<FileOp>,
        description: String,
    },
    #[serde(rename = "env")]
    Env {
        variables: Vec<String>,
        description: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Read,
    Write,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOp::Read => write!(f, "read"),
            FileOp::Write => write!(f, "write"),
        }
    }
}

/// Errors returned when a capability fails grammar validation at the grant
/// boundary. Each variant names the offending field and carries a worked
/// example so callers can self-correct.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("missing or empty field `{field}`; example: {example}")]
    MissingField { field: &'static str, example: &'static str },
    #[error("field `{field}` contains duplicate entries; example: {example}")]
    DuplicateEntry { field: &'static str, example: &'static str },
    #[error("field `{field}` contains an unrecognized value `{value}`; example: {example}")]
    UnknownValue {
        field: &'static str,
        value: String,
        example: &'static str,
    },
}

impl Capability {
    /// Validates the grammar invariants described in spec §3: `description`
    /// is always a non-empty string; method/operation lists contain no
    /// duplicates and no values outside their enumerated domain.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        match self {
            Capability::Http {
                host,
                methods,
                description,
                ..
            } => {
                if host.trim().is_empty() {
                    return Err(CapabilityError::MissingField {
                        field: "host",
                        example: r#"{"type":"http","host":"example.com","description":"allow example.com"}"#,
                    });
                }
                if description.trim().is_empty() {
                    return Err(CapabilityError::MissingField {
                        field: "description",
                        example: r#"{"type":"http","host":"example.com","description":"allow example.com"}"#,
                    });
                }
                if let Some(methods) = methods {
                    check_no_duplicates(methods, "methods", r#"{"type":"http","host":"example.com","methods":["GET","POST"],"description":"x"}"#)?;
                    for m in methods {
                        if !HTTP_METHODS.contains(&m.as_str()) {
                            return Err(CapabilityError::UnknownValue {
                                field: "methods",
                                value: m.clone(),
                                example: r#"{"type":"http","host":"example.com","methods":["GET"],"description":"x"}"#,
                            });
                        }
                    }
                }
                Ok(())
            }
            Capability::File {
                path,
                operations,
                description,
            } => {
                if path.trim().is_empty() {
                    return Err(CapabilityError::MissingField {
                        field: "path",
                        example: r#"{"type":"file","path":"/tmp/*","operations":["read"],"description":"allow tmp reads"}"#,
                    });
                }
                if description.trim().is_empty() {
                    return Err(CapabilityError::MissingField {
                        field: "description",
                        example: r#"{"type":"file","path":"/tmp/*","operations":["read"],"description":"allow tmp reads"}"#,
                    });
                }
                check_no_duplicates(
                    &operations.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
                    "operations",
                    r#"{"type":"file","path":"/tmp/*","operations":["read","write"],"description":"x"}"#,
                )?;
                Ok(())
            }
            Capability::Env {
                variables,
                description,
            } => {
                if variables.is_empty() {
                    return Err(CapabilityError::MissingField {
                        field: "variables",
                        example: r#"{"type":"env","variables":["SECRET_*"],"description":"allow secret env vars"}"#,
                    });
                }
                if description.trim().is_empty() {
                    return Err(CapabilityError::MissingField {
                        field: "description",
                        example: r#"{"type":"env","variables":["SECRET_*"],"description":"allow secret env vars"}"#,
                    });
                }
                check_no_duplicates(
                    variables,
                    "variables",
                    r#"{"type":"env","variables":["SECRET_*"],"description":"x"}"#,
                )?;
                Ok(())
            }
        }
    }

    /// A stable, human-readable one-line serialization used in audit lines
    /// and in tool responses (`grant_permission`/`list_permissions`).
    pub fn describe(&self) -> String {
        match self {
            Capability::Http {
                host,
                path_pattern,
                methods,
                description,
            } => {
                let methods = methods
                    .as_ref()
                    .map(|m| m.join(","))
                    .unwrap_or_else(|| "*".to_string());
                let path = path_pattern.as_deref().unwrap_or("*");
                format!("http {methods} {host}{path} — {description}")
            }
            Capability::File {
                path,
                operations,
                description,
            } => {
                let ops = operations
                    .iter()
                    .map(|o| o.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("file {ops} {path} — {description}")
            }
            Capability::Env {
                variables,
                description,
            } => {
                format!("env {} — {description}", variables.join(","))
            }
        }
    }
}

fn check_no_duplicates(
    values: &[String],
    field: &'static str,
    example: &'static str,
) -> Result<(), CapabilityError> {
    let mut seen = HashSet::new();
    for v in values {
        if !seen.insert(v.as_str()) {
            return Err(CapabilityError::DuplicateEntry { field, example });
        }
    }
    Ok(())
}

/// Decides whether `granted` authorizes `required`. Total: never panics,
/// always returns a boolean (spec §4.1, invariant 1).
pub fn matches(required: &Capability, granted: &Capability) -> bool {
    match (required, granted) {
        (
            Capability::Http {
                host: rhost,
                path_pattern: rpath,
                methods: rmethods,
                ..
            },
            Capability::Http {
                host: ghost,
                path_pattern: gpath,
                methods: gmethods,
                ..
            },
        ) => {
            if rhost != ghost {
                return false;
            }
            if let Some(rpath) = rpath {
                let path_ok = match gpath {
                    None => true,
                    Some(g) if g == "*" => true,
                    Some(g) => glob_match(g, rpath),
                };
                if !path_ok {
                    return false;
                }
            }
            if let Some(rmethods) = rmethods {
                if !rmethods.is_empty() {
                    match gmethods {
                        None => {}
                        Some(gmethods) if gmethods.is_empty() => {}
                        Some(gmethods) => {
                            if !rmethods.iter().all(|m| gmethods.contains(m)) {
                                return false;
                            }
                        }
                    }
                }
            }
            true
        }
        (
            Capability::File {
                path: rpath,
                operations: rops,
                ..
            },
            Capability::File {
                path: gpath,
                operations: gops,
                ..
            },
        ) => {
            if !glob_match(gpath, rpath) {
                return false;
            }
            rops.iter().all(|op| gops.contains(op))
        }
        (
            Capability::Env {
                variables: rvars, ..
            },
            Capability::Env {
                variables: gvars, ..
            },
        ) => rvars
            .iter()
            .all(|rv| gvars.iter().any(|gv| glob_match(gv, rv))),
        _ => false,
    }
}

/// Checks whether `required` is authorized by any capability in `granted`.
pub fn check_any<'a>(required: &Capability, granted: impl IntoIterator<Item = &'a Capability>) -> bool {
    granted.into_iter().any(|g| matches(required, g))
}

/// Glob match where `*` spans any sequence of characters including `/`, and
/// anchoring is full-string. Regex metacharacters other than `*` are
/// escaped. See spec §4.1 and the §9 open question — this breadth is
/// intentional and must not be narrowed without a policy review.
pub fn glob_match(pattern: &str, literal: &str) -> bool {
    let mut regex_src = String::with_capacity(pattern.len() * 2 + 2);
    regex_src.push('^');
    for part in pattern.split('*') {
        regex_src.push_str(&regex::escape(part));
        regex_src.push_str(".*");
    }
    // Drop the trailing ".*" added for the segment after the last '*' only
    // when there was no trailing '*' in the source pattern.
    if !pattern.ends_with('*') {
        regex_src.truncate(regex_src.len() - 2);
    }
    regex_src.push('$');
    Regex::new(&regex_src)
        .map(|re| re.is_match(literal))
        .unwrap_or(false)
}

/// Builds the required-access descriptor for an outbound HTTP forward
/// request per spec §4.1.
pub fn synthesize_http_descriptor(host: &str, path: &str, method: &str) -> Capability {
    let normalized_method = {
        let upper = method.to_uppercase();
        if HTTP_METHODS.contains(&upper.as_str()) {
            upper
        } else {
            "GET".to_string()
        }
    };
    Capability::Http {
        host: host.to_string(),
        path_pattern: Some(path.to_string()),
        methods: Some(vec![normalized_method.clone()]),
        description: format!("{normalized_method} request to {host}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(host: &str, path: Option<&str>, methods: Option<Vec<&str>>) -> Capability {
        Capability::Http {
            host: host.to_string(),
            path_pattern: path.map(str::to_string),
            methods: methods.map(|m| m.into_iter().map(str::to_string).collect()),
            description: "x".to_string(),
        }
    }

    #[test]
    fn host_match_is_case_sensitive_and_exact() {
        let granted = http("example.com", None, None);
        assert!(!matches(&http("EXAMPLE.COM", None, None), &granted));
        assert!(!matches(&http("api.example.com", None, None), &granted));
        assert!(matches(&http("example.com", None, None), &granted));
    }

    #[test]
    fn empty_methods_means_any_method() {
        let granted = http("example.com", None, Some(vec![]));
        let required = http("example.com", None, Some(vec!["POST"]));
        assert!(matches(&required, &granted));
    }

    #[test]
    fn absent_path_pattern_means_any_path() {
        let granted = http("example.com", None, None);
        let required = http("example.com", Some("/v1/anything"), None);
        assert!(matches(&required, &granted));
    }

    #[test]
    fn star_path_matches_anything() {
        let granted = http("example.com", Some("*"), None);
        let required = http("example.com", Some("/v1/anything"), None);
        assert!(matches(&required, &granted));
    }

    #[test]
    fn path_glob_spans_segments() {
        let granted = http("api.example.com", Some("/v1/*"), None);
        assert!(matches(
            &http("api.example.com", Some("/v1/anything/nested"), None),
            &granted
        ));
        assert!(!matches(&http("api.example.com", Some("/v2/x"), None), &granted));
    }

    #[test]
    fn method_scoping_denies_unlisted_method() {
        let granted = http("example.com", None, Some(vec!["GET"]));
        let required = http("example.com", None, Some(vec!["POST"]));
        assert!(!matches(&required, &granted));
    }

    #[test]
    fn env_wildcard_alone_matches_everything() {
        let granted = Capability::Env {
            variables: vec!["*".to_string()],
            description: "x".to_string(),
        };
        let required = Capability::Env {
            variables: vec!["ANYTHING".to_string()],
            description: "x".to_string(),
        };
        assert!(matches(&required, &granted));
    }

    #[test]
    fn env_prefix_wildcard_is_scoped() {
        let granted = Capability::Env {
            variables: vec!["SECRET_*".to_string()],
            description: "x".to_string(),
        };
        assert!(matches(
            &Capability::Env {
                variables: vec!["SECRET_X".to_string()],
                description: "x".to_string(),
            },
            &granted
        ));
        assert!(!matches(
            &Capability::Env {
                variables: vec!["SECRET".to_string()],
                description: "x".to_string(),
            },
            &granted
        ));
    }

    #[test]
    fn synthesize_descriptor_normalizes_method_and_describes() {
        let d = synthesize_http_descriptor("example.com", "/", "get");
        match d {
            Capability::Http {
                host,
                path_pattern,
                methods,
                description,
            } => {
                assert_eq!(host, "example.com");
                assert_eq!(path_pattern.as_deref(), Some("/"));
                assert_eq!(methods, Some(vec!["GET".to_string()]));
                assert_eq!(description, "GET request to example.com/");
            }
            _ => panic!("expected http descriptor"),
        }
    }

    #[test]
    fn validate_rejects_empty_description() {
        let cap = Capability::Http {
            host: "example.com".to_string(),
            path_pattern: None,
            methods: None,
            description: String::new(),
        };
        assert!(cap.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_method() {
        let cap = http("example.com", None, Some(vec!["TRACE"]));
        assert!(matches!(
            cap.validate(),
            Err(CapabilityError::UnknownValue { field: "methods", .. })
        ));
    }
}
