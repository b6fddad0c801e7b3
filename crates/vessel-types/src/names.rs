//! Artifact name, alias, and type validation.
//!
//! - Artifact (collection) names: non-empty, only ASCII alphanumerics, `-`,
//!   `_` and `.`.
//! - Aliases: non-empty, no `/` or `:`, no whitespace, and never of the form
//!   `v<digits>` (version aliases are assigned by the service).
//! - Types: non-empty; `job` and anything starting with `vessel-` are
//!   reserved.

use crate::error::TypeError;

/// Characters that are forbidden anywhere in an alias.
const ALIAS_FORBIDDEN_CHARS: &[char] = &['/', ':', ' ', '\t', '\n', '\r'];

/// Exact artifact types reserved for internal use.
const RESERVED_TYPES: &[&str] = &["job"];

/// Artifact type prefixes reserved for internal use.
const RESERVED_TYPE_PREFIXES: &[&str] = &["vessel-"];

/// Validate an artifact (collection) name.
///
/// # Examples
///
/// ```
/// use vessel_types::names::validate_artifact_name;
///
/// assert!(validate_artifact_name("mnist-train_v2.1").is_ok());
/// assert!(validate_artifact_name("bad/name").is_err());
/// ```
pub fn validate_artifact_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(invalid("artifact name", name, "must not be empty"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(
            "artifact name",
            name,
            &format!("may only contain alphanumerics, '-', '_' and '.', found {ch:?}"),
        ));
    }
    Ok(())
}

/// Returns `true` for implicit version aliases such as `v0` or `v12`.
pub fn is_version_alias(alias: &str) -> bool {
    alias
        .strip_prefix('v')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Validate a single user-supplied alias.
pub fn validate_alias(alias: &str) -> Result<(), TypeError> {
    if alias.is_empty() {
        return Err(invalid("alias", alias, "must not be empty"));
    }
    for ch in ALIAS_FORBIDDEN_CHARS {
        if alias.contains(*ch) {
            return Err(invalid(
                "alias",
                alias,
                &format!("contains forbidden character: {ch:?}"),
            ));
        }
    }
    if is_version_alias(alias) {
        return Err(invalid(
            "alias",
            alias,
            "version aliases are assigned by the service",
        ));
    }
    Ok(())
}

/// Validate every alias in `aliases`, stopping at the first failure.
pub fn validate_aliases<'a, I>(aliases: I) -> Result<(), TypeError>
where
    I: IntoIterator<Item = &'a str>,
{
    aliases.into_iter().try_for_each(validate_alias)
}

/// Validate an artifact type tag.
pub fn validate_artifact_type(artifact_type: &str) -> Result<(), TypeError> {
    if artifact_type.is_empty() {
        return Err(invalid("artifact type", artifact_type, "must not be empty"));
    }
    if RESERVED_TYPES.contains(&artifact_type)
        || RESERVED_TYPE_PREFIXES
            .iter()
            .any(|prefix| artifact_type.starts_with(prefix))
    {
        return Err(invalid(
            "artifact type",
            artifact_type,
            "reserved for internal use",
        ));
    }
    Ok(())
}

fn invalid(kind: &'static str, name: &str, reason: &str) -> TypeError {
    TypeError::NameValidation {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
