//! Release directory bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ShipyardError;
use crate::runtime::Runtime;

/// Marker left in a release abandoned by a rollback
pub const BAD_RELEASE_MARKER: &str = "BAD_RELEASE";

/// One line of `.dep/releases_log`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseLogEntry {
    pub release_name: String,
    pub created_at: DateTime<Utc>,
    pub user: String,
    pub target: String,
}

/// Numeric release names from a directory listing, newest first
pub fn parse_release_names(listing: &str) -> Vec<u64> {
    let mut releases: Vec<u64> = listing
        .lines()
        .filter_map(|line| line.trim().trim_end_matches('/').parse().ok())
        .collect();
    releases.sort_unstable_by(|a, b| b.cmp(a));
    releases.dedup();
    releases
}

/// Next release number: never reuses a number seen on disk or in `latest_release`
pub fn next_release(latest: Option<u64>, existing: &[u64]) -> u64 {
    let highest = existing.iter().copied().max().into_iter().chain(latest).max();
    highest.map_or(1, |n| n + 1)
}

/// Newest release older than `current` that wasn't marked bad
pub fn rollback_target(releases: &[u64], current: Option<u64>, bad: &[u64]) -> Option<u64> {
    let current = current?;
    releases
        .iter()
        .copied()
        .filter(|r| *r < current && !bad.contains(r))
        .max()
}

/// Releases beyond the newest `keep`, oldest first.
///
/// `keep < 0` keeps everything. The current release and the rollback target are
/// never selected.
pub fn releases_to_delete(
    releases: &[u64],
    keep: i64,
    current: Option<u64>,
    protected: Option<u64>,
) -> Vec<u64> {
    if keep < 0 {
        return Vec::new();
    }
    let mut newest_first = releases.to_vec();
    newest_first.sort_unstable_by(|a, b| b.cmp(a));
    let mut doomed: Vec<u64> = newest_first
        .into_iter()
        .skip(keep as usize)
        .filter(|r| Some(*r) != current && Some(*r) != protected)
        .collect();
    doomed.reverse();
    doomed
}

/// Release names under `{{deploy_path}}/releases`, newest first
pub async fn list(rt: &Runtime) -> Result<Vec<u64>, ShipyardError> {
    let listing = rt
        .run("if [ -d {{deploy_path}}/releases ]; then ls -1 {{deploy_path}}/releases; fi")
        .await?;
    Ok(parse_release_names(&listing))
}

/// Release `{{current_path}}` points at, if it is a symlink into the releases
pub async fn current_release(rt: &Runtime) -> Result<Option<u64>, ShipyardError> {
    let target = rt
        .run("if [ -L {{current_path}} ]; then readlink {{current_path}}; fi")
        .await?;
    Ok(target
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|name| name.parse().ok()))
}

/// Releases carrying the bad-release marker
pub async fn bad_releases(rt: &Runtime) -> Result<Vec<u64>, ShipyardError> {
    let listing = rt
        .run(&format!(
            "if [ -d {{{{deploy_path}}}}/releases ]; then cd {{{{deploy_path}}}}/releases && \
             for r in *; do if [ -e \"$r/{}\" ]; then echo \"$r\"; fi; done; fi",
            BAD_RELEASE_MARKER
        ))
        .await?;
    Ok(parse_release_names(&listing))
}

/// Latest allocated release according to `.dep/latest_release`
pub async fn latest_release(rt: &Runtime) -> Result<Option<u64>, ShipyardError> {
    let content = rt
        .run("cat {{deploy_path}}/.dep/latest_release 2>/dev/null || true")
        .await?;
    Ok(content.trim().parse().ok())
}
