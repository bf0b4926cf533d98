//! Release context resolution.
//!
//! Resolves the commit/branch/version context a deploy carries so captures
//! can be grouped by release server-side. Explicit configuration wins;
//! otherwise the well-known CI/PaaS environment variables are consulted.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Commit fallback chain, first non-empty wins.
const COMMIT_ENV_VARS: &[&str] = &[
    "HEROKU_SLUG_COMMIT",
    "VERCEL_GIT_COMMIT_SHA",
    "CODEBUILD_RESOLVED_SOURCE_VERSION",
    "CIRCLE_SHA1",
    "GITHUB_SHA",
    "CI_COMMIT_SHA",
    "GIT_COMMIT",
    "SOURCE_VERSION",
];

/// Branch fallback chain.
const BRANCH_ENV_VARS: &[&str] = &[
    "VERCEL_GIT_COMMIT_REF",
    "CIRCLE_BRANCH",
    "GITHUB_REF_NAME",
    "CI_COMMIT_BRANCH",
    "CI_COMMIT_TAG",
];

/// Repository fallback chain (after the Vercel owner/slug pair).
const REPO_ENV_VARS: &[&str] = &["GITHUB_REPOSITORY", "CI_PROJECT_PATH", "CIRCLE_REPOSITORY_URL"];

// ── ReleaseContext ───────────────────────────────────────────────────────────

/// Release/deploy context attached to registration and exception envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseContext {
    /// Full commit SHA.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    /// First seven characters of the commit SHA.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_short: Option<String>,
    /// Branch or tag name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Repository remote (owner/name or URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Release version string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Project name, when derivable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// Stable project identifier, when derivable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_identifier: Option<String>,
    /// Where the context came from ("config" or "ci-environment").
    pub source: String,
    /// When the context was resolved (RFC 3339 UTC).
    pub captured_at: String,
}

// ── Explicit values ──────────────────────────────────────────────────────────

/// Release keys resolved from the configuration channels before env fallback.
#[derive(Debug, Clone, Default)]
pub struct ExplicitRelease {
    /// `release` key: `name@version`, a bare version, or a commit SHA.
    pub release: Option<String>,
    /// `version` key.
    pub version: Option<String>,
    /// `commit` key.
    pub commit: Option<String>,
    /// `branch` key.
    pub branch: Option<String>,
    /// `repository` key.
    pub repository: Option<String>,
}

impl ExplicitRelease {
    fn is_empty(&self) -> bool {
        self.release.is_none()
            && self.version.is_none()
            && self.commit.is_none()
            && self.branch.is_none()
            && self.repository.is_none()
    }
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// Resolve a release context from explicit values plus environment fallbacks.
///
/// Returns `None` when neither channel yields anything.
pub fn resolve(explicit: &ExplicitRelease, env: &HashMap<String, String>) -> Option<ReleaseContext> {
    let from_config = !explicit.is_empty();

    // The bare `release` key may encode a name@version pair, a commit SHA,
    // or a plain version string.
    let mut project_name = None;
    let mut release_version = None;
    let mut release_commit = None;
    if let Some(release) = explicit.release.as_deref() {
        if let Some((name, version)) = release.split_once('@') {
            project_name = Some(name.to_string());
            release_version = Some(version.to_string());
        } else if is_hex_sha(release) {
            release_commit = Some(release.to_string());
        } else {
            release_version = Some(release.to_string());
        }
    }

    let commit = explicit
        .commit
        .clone()
        .or(release_commit)
        .or_else(|| first_env(env, COMMIT_ENV_VARS));
    let branch = explicit
        .branch
        .clone()
        .or_else(|| first_env(env, BRANCH_ENV_VARS));
    let repository = explicit
        .repository
        .clone()
        .or_else(|| vercel_repo(env))
        .or_else(|| first_env(env, REPO_ENV_VARS));
    let version = explicit.version.clone().or(release_version);

    if commit.is_none() && branch.is_none() && repository.is_none() && version.is_none() {
        return None;
    }

    let commit_short = commit
        .as_deref()
        .map(|c| c.chars().take(7).collect::<String>());
    let project_name = project_name.or_else(|| {
        repository
            .as_deref()
            .and_then(|r| r.rsplit('/').next())
            .map(|s| s.trim_end_matches(".git").to_string())
    });

    Some(ReleaseContext {
        commit_hash: commit,
        commit_short,
        branch,
        remote_url: repository.clone(),
        version,
        project_name,
        project_identifier: repository,
        source: if from_config { "config" } else { "ci-environment" }.to_string(),
        captured_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Returns `true` for a 7-40 character lowercase/uppercase hex string.
fn is_hex_sha(s: &str) -> bool {
    (7..=40).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn first_env(env: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| env.get(*k))
        .find(|v| !v.is_empty())
        .cloned()
}

fn vercel_repo(env: &HashMap<String, String>) -> Option<String> {
    let owner = env.get("VERCEL_GIT_REPO_OWNER").filter(|v| !v.is_empty())?;
    let slug = env.get("VERCEL_GIT_REPO_SLUG").filter(|v| !v.is_empty())?;
    Some(format!("{owner}/{slug}"))
}
