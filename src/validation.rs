//! Submission validation
//!
//! Malformed submissions are rejected here, before any job row exists.

use crate::error::Error;
use crate::types::{GroupRequest, JobMetadata, JobRequest};
use crate::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Maximum groups in one job
pub const MAX_GROUPS: usize = 50;

/// Maximum sources in one group
pub const MAX_SOURCES: usize = 100;

/// Maximum length of author, subject and group name
pub const MAX_FIELD_LEN: usize = 255;

/// Maximum number of metadata keywords
pub const MAX_KEYWORDS: usize = 32;

// Group names end up as file names, so keep them to a safe alphabet
#[allow(clippy::expect_used)]
static GROUP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").expect("group name pattern is valid"));

/// Validate a batch submission
pub fn validate_job_request(request: &JobRequest) -> Result<()> {
    validate_http_url(&request.webhook_url, "webhook_url")?;

    if request.groups.is_empty() {
        return Err(invalid("at least one group is required"));
    }
    if request.groups.len() > MAX_GROUPS {
        return Err(invalid(format!(
            "maximum {} groups per job, got {}",
            MAX_GROUPS,
            request.groups.len()
        )));
    }

    let mut seen = HashSet::with_capacity(request.groups.len());
    for group in &request.groups {
        validate_group(group)?;
        if !seen.insert(group.name.as_str()) {
            return Err(invalid(format!(
                "group names must be unique within a job, '{}' appears more than once",
                group.name
            )));
        }
    }

    if let Some(metadata) = &request.metadata {
        validate_metadata(metadata)?;
    }

    Ok(())
}

/// Validate one group: name alphabet and source list
pub fn validate_group(group: &GroupRequest) -> Result<()> {
    if !GROUP_NAME.is_match(&group.name) {
        return Err(invalid(format!(
            "group name '{}' must be 1-{} characters of letters, digits, '_' or '-'",
            group.name, MAX_FIELD_LEN
        )));
    }

    validate_sources(&group.sources, &format!("groups[{}].sources", group.name))
}

/// Validate a source list: 1 to [`MAX_SOURCES`] http(s) URLs
pub fn validate_sources(sources: &[String], field: &str) -> Result<()> {
    if sources.is_empty() {
        return Err(invalid(format!("{}: at least one source URL is required", field)));
    }
    if sources.len() > MAX_SOURCES {
        return Err(invalid(format!(
            "{}: maximum {} sources, got {}",
            field,
            MAX_SOURCES,
            sources.len()
        )));
    }

    for (index, source) in sources.iter().enumerate() {
        validate_http_url(source, &format!("{}[{}]", field, index))?;
    }

    Ok(())
}

/// Validate document metadata lengths
pub fn validate_metadata(metadata: &JobMetadata) -> Result<()> {
    for (field, value) in [("author", &metadata.author), ("subject", &metadata.subject)] {
        if let Some(value) = value
            && value.chars().count() > MAX_FIELD_LEN
        {
            return Err(invalid(format!(
                "metadata.{} must be {} characters or less",
                field, MAX_FIELD_LEN
            )));
        }
    }

    if metadata.keywords.len() > MAX_KEYWORDS {
        return Err(invalid(format!(
            "metadata.keywords: maximum {} entries",
            MAX_KEYWORDS
        )));
    }

    Ok(())
}

fn validate_http_url(value: &str, field: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| invalid(format!("{} is not a valid URL ({}): {}", field, e, value)))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        "http" | "https" => Err(invalid(format!("{} has no host: {}", field, value))),
        scheme => Err(invalid(format!(
            "{} must use http or https, got '{}'",
            field, scheme
        ))),
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(message.into())
}
