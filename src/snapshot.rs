//! Environment state snapshots and set-difference computation.
//!
//! A snapshot is a set-valued view of observable environment resources at one
//! instant: users, groups, files under the configured working directories,
//! running services, and optionally running containers. Membership is exact
//! string identity. A failed listing degrades that category to an empty set
//! with a warning; partial information beats total failure for a diagnostic
//! tool. Only channel unreachability aborts a capture.

use crate::config::CaptureConfig;
use crate::exec::{ChannelError, CommandChannel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Users,
    Groups,
    Files,
    Services,
    Containers,
}

pub const CATEGORIES: [Category; 5] = [
    Category::Users,
    Category::Groups,
    Category::Files,
    Category::Services,
    Category::Containers,
];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Users => "users",
            Category::Groups => "groups",
            Category::Files => "files",
            Category::Services => "services",
            Category::Containers => "containers",
        }
    }
}

/// Immutable set-valued view of environment resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Task-scoped label such as `cycle-1`; comparisons use only the sets.
    pub label: String,
    pub captured_at_epoch_ms: u64,
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub files: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub containers: BTreeSet<String>,
    /// Listing failures that degraded a category to an empty set.
    pub warnings: Vec<String>,
}

impl StateSnapshot {
    pub fn category(&self, category: Category) -> &BTreeSet<String> {
        match category {
            Category::Users => &self.users,
            Category::Groups => &self.groups,
            Category::Files => &self.files,
            Category::Services => &self.services,
            Category::Containers => &self.containers,
        }
    }

    pub fn empty(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            captured_at_epoch_ms: now_epoch_ms(),
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
            files: BTreeSet::new(),
            services: BTreeSet::new(),
            containers: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }
}

/// Capture a snapshot by issuing a small fixed set of listing commands.
/// Each listing's timeout is additionally clamped to `deadline` so a capture
/// never outlives the budget of the phase that requested it.
pub fn capture(
    channel: &dyn CommandChannel,
    config: &CaptureConfig,
    working_dirs: &[String],
    label: &str,
    deadline: Instant,
) -> Result<StateSnapshot, ChannelError> {
    let timeout = Duration::from_millis(config.listing_timeout_ms);
    let mut warnings = Vec::new();

    let users_command = format!(
        "awk -F: '$3 >= {} {{print $1}}' /etc/passwd",
        config.uid_floor
    );
    let users: BTreeSet<String> = parse_lines(&run_listing(
        channel,
        &users_command,
        timeout,
        deadline,
        "users",
        &mut warnings,
    )?)
    .into_iter()
    .filter(|user| !config.excluded_users.contains(user))
    .collect();

    let groups = parse_lines(&run_listing(
        channel,
        "cut -d: -f1 /etc/group",
        timeout,
        deadline,
        "groups",
        &mut warnings,
    )?);

    let mut files = BTreeSet::new();
    for dir in working_dirs {
        let command = format!("find {} -xdev 2>/dev/null", shell_words::quote(dir));
        let listed = run_listing(
            channel,
            &command,
            timeout,
            deadline,
            &format!("files under {dir}"),
            &mut warnings,
        )?;
        files.extend(parse_lines(&listed));
    }

    let services = first_token_lines(&run_listing(
        channel,
        "systemctl list-units --type=service --state=running --no-legend --plain",
        timeout,
        deadline,
        "services",
        &mut warnings,
    )?);

    let containers = if config.include_containers {
        parse_lines(&run_listing(
            channel,
            "podman ps --format '{{.Names}}'",
            timeout,
            deadline,
            "containers",
            &mut warnings,
        )?)
    } else {
        BTreeSet::new()
    };

    tracing::debug!(
        label,
        users = users.len(),
        groups = groups.len(),
        files = files.len(),
        services = services.len(),
        warnings = warnings.len(),
        "captured snapshot"
    );

    Ok(StateSnapshot {
        label: label.to_string(),
        captured_at_epoch_ms: now_epoch_ms(),
        users,
        groups,
        files,
        services,
        containers,
        warnings,
    })
}

fn run_listing(
    channel: &dyn CommandChannel,
    command: &str,
    timeout: Duration,
    deadline: Instant,
    category_label: &str,
    warnings: &mut Vec<String>,
) -> Result<String, ChannelError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        warnings.push(format!(
            "{category_label} listing skipped: capture budget exhausted"
        ));
        return Ok(String::new());
    }
    match channel.execute(command, timeout.min(remaining)) {
        Ok(output) if output.success() => Ok(output.stdout),
        Ok(output) => {
            warnings.push(format!(
                "{category_label} listing degraded to empty set: {}",
                output.failure_reason()
            ));
            Ok(String::new())
        }
        Err(err) => Err(err),
    }
}

fn parse_lines(raw: &str) -> BTreeSet<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn first_token_lines(raw: &str) -> BTreeSet<String> {
    raw.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(ToString::to_string)
        .collect()
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Entries added/removed in one category, lexicographically sorted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl CategoryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Pure set-difference between two snapshots. `change_count == 0` iff the
/// snapshots are set-equal in every category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDiff {
    pub users: CategoryDiff,
    pub groups: CategoryDiff,
    pub files: CategoryDiff,
    pub services: CategoryDiff,
    pub containers: CategoryDiff,
    pub change_count: usize,
}

impl StateDiff {
    pub fn category(&self, category: Category) -> &CategoryDiff {
        match category {
            Category::Users => &self.users,
            Category::Groups => &self.groups,
            Category::Files => &self.files,
            Category::Services => &self.services,
            Category::Containers => &self.containers,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.change_count == 0
    }
}

pub fn diff(before: &StateSnapshot, after: &StateSnapshot) -> StateDiff {
    let users = category_diff(&before.users, &after.users);
    let groups = category_diff(&before.groups, &after.groups);
    let files = category_diff(&before.files, &after.files);
    let services = category_diff(&before.services, &after.services);
    let containers = category_diff(&before.containers, &after.containers);
    let change_count =
        users.len() + groups.len() + files.len() + services.len() + containers.len();
    StateDiff {
        users,
        groups,
        files,
        services,
        containers,
        change_count,
    }
}

fn category_diff(before: &BTreeSet<String>, after: &BTreeSet<String>) -> CategoryDiff {
    CategoryDiff {
        added: after.difference(before).cloned().collect(),
        removed: before.difference(after).cloned().collect(),
    }
}

/// Bounded, deterministic preview of a sorted entry list for finding text.
pub fn preview(entries: &[String], limit: usize) -> String {
    if entries.len() <= limit {
        entries.join(", ")
    } else {
        format!(
            "{} \u{2026} and {} more",
            entries[..limit].join(", "),
            entries.len() - limit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{failed_output, ok_output, ScriptedChannel};

    fn snapshot(label: &str, users: &[&str], files: &[&str]) -> StateSnapshot {
        let mut snap = StateSnapshot::empty(label);
        snap.users = users.iter().map(ToString::to_string).collect();
        snap.files = files.iter().map(ToString::to_string).collect();
        snap
    }

    #[test]
    fn diff_is_reflexive() {
        let snap = snapshot("a", &["student", "operator"], &["/opt/lab/work"]);
        let delta = diff(&snap, &snap);
        assert!(delta.is_clean());
        assert_eq!(delta.change_count, 0);
    }

    #[test]
    fn diff_is_symmetric_under_swap() {
        let before = snapshot("before", &["student"], &["/opt/lab/a"]);
        let after = snapshot("after", &["student", "leftover1"], &["/opt/lab/b"]);
        let forward = diff(&before, &after);
        let backward = diff(&after, &before);
        assert_eq!(forward.users.added, backward.users.removed);
        assert_eq!(forward.users.removed, backward.users.added);
        assert_eq!(forward.files.added, backward.files.removed);
        assert_eq!(forward.change_count, backward.change_count);
    }

    #[test]
    fn change_count_sums_every_category() {
        let before = snapshot("before", &["a"], &["/x"]);
        let mut after = snapshot("after", &["b"], &["/x", "/y"]);
        after.services.insert("leak.service".to_string());
        let delta = diff(&before, &after);
        // users: a removed + b added, files: /y added, services: one added.
        assert_eq!(delta.change_count, 4);
        assert!(!delta.is_clean());
    }

    #[test]
    fn preview_truncates_after_the_limit() {
        let entries: Vec<String> = (1..=8).map(|n| format!("file{n}")).collect();
        let text = preview(&entries, 5);
        assert!(text.starts_with("file1, file2, file3, file4, file5"));
        assert!(text.ends_with("and 3 more"));
        assert_eq!(preview(&entries[..2], 5), "file1, file2");
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn capture_parses_listings_and_applies_exclusions() {
        let channel = ScriptedChannel::new();
        channel.on("passwd", ok_output("student\nnobody\n"));
        channel.on("/etc/group", ok_output("wheel\nstudents\n"));
        channel.on("find", ok_output("/opt/lab\n/opt/lab/work\n"));
        channel.on(
            "systemctl",
            ok_output("sshd.service loaded active running\n"),
        );
        let config = CaptureConfig::default();
        let snap = capture(
            &channel,
            &config,
            &["/opt/lab".to_string()],
            "cycle-1",
            far_deadline(),
        )
        .expect("capture");
        assert!(snap.users.contains("student"));
        assert!(!snap.users.contains("nobody"));
        assert_eq!(snap.groups.len(), 2);
        assert!(snap.files.contains("/opt/lab/work"));
        assert_eq!(
            snap.services.iter().next().map(String::as_str),
            Some("sshd.service")
        );
        assert!(snap.containers.is_empty());
        assert!(snap.warnings.is_empty());
    }

    #[test]
    fn failed_listing_degrades_to_empty_set_with_warning() {
        let channel = ScriptedChannel::new();
        channel.on("systemctl", failed_output(127, "systemctl: not found"));
        let config = CaptureConfig::default();
        let snap = capture(&channel, &config, &[], "cycle-1", far_deadline()).expect("capture");
        assert!(snap.services.is_empty());
        assert_eq!(snap.warnings.len(), 1);
        assert!(snap.warnings[0].contains("services listing degraded"));
        assert!(snap.warnings[0].contains("exit code 127"));
    }

    #[test]
    fn expired_deadline_skips_every_listing_without_issuing_commands() {
        let channel = ScriptedChannel::new();
        let config = CaptureConfig::default();
        let snap = capture(&channel, &config, &[], "cycle-1", Instant::now()).expect("capture");
        assert!(snap.users.is_empty());
        assert!(snap.groups.is_empty());
        assert!(snap.services.is_empty());
        // users, groups, services; no working dirs and containers disabled.
        assert_eq!(snap.warnings.len(), 3);
        assert!(snap.warnings.iter().all(|w| w.contains("budget exhausted")));
        assert!(channel.commands().is_empty());
    }
}
