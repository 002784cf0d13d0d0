use semver::VersionReq;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const WILDCARD: &str = "*";
const OPERATOR_CHARS: &[char] = &['=', '!', '<', '>', '~', '^'];

/// A semantic version range such as `>=1.2.0 <2.0.0 || ^3.1`.
///
/// Comparators separated by spaces or commas must all hold; `||` separates
/// alternatives of which any one must hold. `*` matches every release
/// version. Beyond the usual operators:
///
/// - a bare version is an exact match, and a partial one matches every
///   release it prefixes (`1.2` is `>=1.2.0, <1.3.0`)
/// - `1.2.x` and `1.2.*` are wildcards
/// - `1.0.0 - 2.0.0` is the inclusive range `>=1.0.0, <=2.0.0`
/// - `!=1.2.3` excludes one version
/// - `~>` is `~`, and a `v` before the version is ignored
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionConstraint {
    raw: String,
    alternatives: Vec<Alternative>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Alternative {
    required: VersionReq,
    excluded: Vec<VersionReq>,
}

impl Alternative {
    fn matches(&self, version: &semver::Version) -> bool {
        self.required.matches(version) && !self.excluded.iter().any(|req| req.matches(version))
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("invalid version constraint {raw:?}: {reason}")]
pub struct ConstraintParseError {
    raw: String,
    reason: String,
}

impl VersionConstraint {
    pub fn wildcard() -> Self {
        VersionConstraint {
            raw: WILDCARD.to_string(),
            alternatives: vec![Alternative {
                required: VersionReq::STAR,
                excluded: Vec::new(),
            }],
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.raw == WILDCARD
    }

    pub fn matches(&self, version: &semver::Version) -> bool {
        self.alternatives.iter().any(|alt| alt.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionConstraint {
    type Err = ConstraintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason: String| ConstraintParseError {
            raw: s.to_string(),
            reason,
        };

        let raw = s.trim();
        if raw.is_empty() {
            return Err(error("empty constraint".to_string()));
        }

        let alternatives = raw
            .split("||")
            .map(|alternative| parse_alternative(alternative).map_err(error))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VersionConstraint {
            raw: raw.to_string(),
            alternatives,
        })
    }
}

fn parse_alternative(alternative: &str) -> Result<Alternative, String> {
    let mut tokens = alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .peekable();
    if tokens.peek().is_none() {
        return Err("empty alternative".to_string());
    }

    let mut required = Vec::new();
    let mut excluded = Vec::new();

    while let Some(token) = tokens.next() {
        // `>= 1.2.3` is one comparator
        let comparator = if token.chars().all(|c| OPERATOR_CHARS.contains(&c)) {
            let version = tokens
                .next()
                .ok_or_else(|| format!("missing version after {token:?}"))?;
            format!("{token}{version}")
        } else {
            token.to_string()
        };

        let split = comparator
            .find(|c: char| !OPERATOR_CHARS.contains(&c))
            .unwrap_or(comparator.len());
        let (op, version) = comparator.split_at(split);
        let version = strip_v_prefix(version);

        match op {
            "" if tokens.peek() == Some(&"-") => {
                tokens.next();
                let upper = tokens
                    .next()
                    .ok_or_else(|| format!("missing upper bound in range starting at {version:?}"))?;
                required.push(format!(">={version}"));
                required.push(format!("<={}", strip_v_prefix(upper)));
            }
            "" if is_wildcard_token(version) => {}
            "" if version.split('.').any(is_wildcard_token) => required.push(version.to_string()),
            "" => required.push(format!("={version}")),
            "!=" => excluded.push(parse_req(&format!("={version}"))?),
            "~>" => required.push(format!("~{version}")),
            op => required.push(format!("{op}{version}")),
        }
    }

    let required = if required.is_empty() {
        VersionReq::STAR
    } else {
        parse_req(&required.join(", "))?
    };
    Ok(Alternative { required, excluded })
}

fn parse_req(req: &str) -> Result<VersionReq, String> {
    VersionReq::parse(req).map_err(|e| e.to_string())
}

fn is_wildcard_token(token: &str) -> bool {
    matches!(token, "*" | "x" | "X")
}

fn strip_v_prefix(version: &str) -> &str {
    match version.strip_prefix(['v', 'V']) {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => version,
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = ConstraintParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionConstraint> for String {
    fn from(constraint: VersionConstraint) -> Self {
        constraint.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
