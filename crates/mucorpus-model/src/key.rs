//! Composite identity: `(project, misuseId, patternName)`.
//!
//! [`ExampleKey::resolve`] is the pure half of identity resolution. It checks
//! the shape of each component and never touches storage; the existence check
//! against the Corpus Store lives with the ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CorpusError;

/// Canonical composite key of one stored Example.
///
/// Keys order by project, then misuse id, then pattern name. Scans rely on
/// this ordering being total and stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleKey {
    pub project: String,
    pub misuse_id: u32,
    pub pattern_name: String,
}

impl ExampleKey {
    /// Validate the three identity components and build the key.
    pub fn resolve(
        project: &str,
        misuse_id: i64,
        pattern_name: &str,
    ) -> Result<Self, CorpusError> {
        validate_project_slug(project)?;
        let misuse_id = validate_misuse_id(misuse_id)?;
        validate_pattern_name(pattern_name)?;

        Ok(Self {
            project: project.to_string(),
            misuse_id,
            pattern_name: pattern_name.to_string(),
        })
    }

    /// Shape check for the `patternName` component alone.
    pub fn check_pattern_name(pattern_name: &str) -> Result<(), CorpusError> {
        validate_pattern_name(pattern_name)
    }
}

impl fmt::Display for ExampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.misuse_id, self.pattern_name)
    }
}

/// Parses the `project:misuseId:patternName` form produced by `Display`.
impl FromStr for ExampleKey {
    type Err = CorpusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(project), Some(id), Some(pattern)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid(
                "key",
                format!("`{s}` is not of the form project:misuseId:patternName"),
            ));
        };
        let misuse_id = id
            .parse::<i64>()
            .map_err(|_| invalid("misuseId", format!("`{id}` is not an integer")))?;
        Self::resolve(project, misuse_id, pattern)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> CorpusError {
    CorpusError::InvalidIdentity {
        field,
        reason: reason.into(),
    }
}

/// A slug is one segment (`mqtt`) or two (`owner/name`); segments are
/// non-empty runs of ASCII alphanumerics, `.`, `_` or `-`.
fn validate_project_slug(project: &str) -> Result<(), CorpusError> {
    if project.is_empty() {
        return Err(invalid("project", "must not be empty"));
    }
    if !project.is_ascii() {
        return Err(invalid("project", format!("`{project}` is not ASCII")));
    }

    let segments: Vec<&str> = project.split('/').collect();
    if segments.len() > 2 {
        return Err(invalid(
            "project",
            format!("`{project}` has more than one `/` (expected owner/name)"),
        ));
    }

    for segment in segments {
        if segment.is_empty() {
            return Err(invalid(
                "project",
                format!("`{project}` has an empty owner or name segment"),
            ));
        }
        if let Some(c) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(invalid(
                "project",
                format!("`{project}` contains disallowed character {c:?}"),
            ));
        }
    }

    Ok(())
}

fn validate_misuse_id(misuse_id: i64) -> Result<u32, CorpusError> {
    if misuse_id < 1 {
        return Err(invalid(
            "misuseId",
            format!("must be a positive integer (got {misuse_id})"),
        ));
    }
    u32::try_from(misuse_id)
        .map_err(|_| invalid("misuseId", format!("{misuse_id} is out of range")))
}

/// Pattern names are identifiers: non-empty, no whitespace.
fn validate_pattern_name(pattern_name: &str) -> Result<(), CorpusError> {
    if pattern_name.is_empty() {
        return Err(invalid("patternName", "must not be empty"));
    }
    if pattern_name.chars().any(char::is_whitespace) {
        return Err(invalid(
            "patternName",
            format!("`{pattern_name}` contains whitespace"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn field_of(err: CorpusError) -> &'static str {
        match err {
            CorpusError::InvalidIdentity { field, .. } => field,
            other => panic!("expected InvalidIdentity, got {other:?}"),
        }
    }

    #[test]
    fn accepts_single_and_owner_name_slugs() {
        let key = ExampleKey::resolve("mqtt", 389, "FlushStreamWithByteBeforeGetBytes").unwrap();
        assert_eq!(key.project, "mqtt");
        assert_eq!(key.misuse_id, 389);

        assert!(ExampleKey::resolve("tbuktu-ntru", 473, "FlushStreamBeforeGetBytes").is_ok());
        assert!(ExampleKey::resolve("opengamma/elsql", 22, "IterateSynchronized").is_ok());
    }

    #[test]
    fn rejects_malformed_project() {
        for bad in ["", "a b", "a//b", "/a", "a/", "a/b/c", "prøject", "a\tb"] {
            let err = ExampleKey::resolve(bad, 1, "P").unwrap_err();
            assert_eq!(field_of(err), "project", "slug {bad:?}");
        }
    }

    #[test]
    fn rejects_non_positive_misuse_id() {
        assert_eq!(field_of(ExampleKey::resolve("p", 0, "P").unwrap_err()), "misuseId");
        assert_eq!(field_of(ExampleKey::resolve("p", -7, "P").unwrap_err()), "misuseId");
        assert_eq!(
            field_of(ExampleKey::resolve("p", i64::from(u32::MAX) + 1, "P").unwrap_err()),
            "misuseId"
        );
    }

    #[test]
    fn rejects_empty_or_spaced_pattern() {
        assert_eq!(field_of(ExampleKey::resolve("p", 1, "").unwrap_err()), "patternName");
        assert_eq!(
            field_of(ExampleKey::resolve("p", 1, "Iterate Synchronized").unwrap_err()),
            "patternName"
        );
    }

    #[test]
    fn keys_order_by_project_then_id_then_pattern() {
        let mut keys = vec![
            ExampleKey::resolve("testng", 21, "IterateSynchronized").unwrap(),
            ExampleKey::resolve("mqtt", 390, "FlushStreamWithShortBeforeGetBytes").unwrap(),
            ExampleKey::resolve("mqtt", 390, "FlushStreamBeforeGetBytes390").unwrap(),
            ExampleKey::resolve("mqtt", 389, "FlushStreamWithByteBeforeGetBytes").unwrap(),
        ];
        keys.sort();
        let shown: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(
            shown,
            vec![
                "mqtt:389:FlushStreamWithByteBeforeGetBytes",
                "mqtt:390:FlushStreamBeforeGetBytes390",
                "mqtt:390:FlushStreamWithShortBeforeGetBytes",
                "testng:21:IterateSynchronized",
            ]
        );
    }

    #[test]
    fn parses_display_form() {
        let key: ExampleKey = "tbuktu-ntru:473:FlushStreamBeforeGetBytes".parse().unwrap();
        assert_eq!(key, ExampleKey::resolve("tbuktu-ntru", 473, "FlushStreamBeforeGetBytes").unwrap());

        assert_eq!(field_of("mqtt:389".parse::<ExampleKey>().unwrap_err()), "key");
        assert_eq!(field_of("mqtt:x:P".parse::<ExampleKey>().unwrap_err()), "misuseId");
    }

    proptest! {
        #[test]
        fn well_shaped_components_always_resolve(
            owner in "[a-z0-9][a-z0-9._-]{0,12}",
            name in "[A-Za-z0-9_-]{1,12}",
            id in 1i64..=i64::from(u32::MAX),
            pattern in "[A-Z][A-Za-z0-9]{0,24}",
        ) {
            let project = format!("{owner}/{name}");
            let key = ExampleKey::resolve(&project, id, &pattern).unwrap();
            prop_assert_eq!(key.project, project);
            prop_assert_eq!(i64::from(key.misuse_id), id);
        }

        #[test]
        fn whitespace_anywhere_in_project_is_rejected(
            left in "[a-z]{1,6}",
            right in "[a-z]{1,6}",
            ws in prop_oneof![Just(' '), Just('\t'), Just('\n')],
        ) {
            let project = format!("{left}{ws}{right}");
            prop_assert!(ExampleKey::resolve(&project, 1, "P").is_err());
        }
    }
}
