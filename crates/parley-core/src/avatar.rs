//! Avatar naming policy
//!
//! Every object the pipeline writes lives under a member-scoped prefix:
//!
//! - raw upload: `avatars/{workspace_id}/{member_id}/{timestamp}.original`
//! - base path:  `avatars/{workspace_id}/{member_id}/{timestamp}`
//! - variant:    `{base_path}.{size}.webp`
//!
//! The serving path only accepts file names matching [`serving_pattern`], which is
//! built from the same size and extension constants used to name the variants.

use chrono::Utc;
use regex::Regex;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::LazyLock;
use uuid::Uuid;

pub const AVATAR_KEY_PREFIX: &str = "avatars";
pub const RAW_KEY_SUFFIX: &str = ".original";
pub const RAW_CONTENT_TYPE: &str = "application/octet-stream";
pub const VARIANT_EXTENSION: &str = "webp";
pub const VARIANT_CONTENT_TYPE: &str = "image/webp";

/// Target sizes produced for every avatar, largest first.
pub const AVATAR_SIZES: [AvatarSize; 2] = [AvatarSize::Profile, AvatarSize::Thumbnail];

/// Square edge length, in pixels, of a processed avatar variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvatarSize {
    Profile,
    Thumbnail,
}

impl AvatarSize {
    pub fn pixels(self) -> u32 {
        match self {
            AvatarSize::Profile => 256,
            AvatarSize::Thumbnail => 64,
        }
    }
}

impl Display for AvatarSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.pixels())
    }
}

static SERVING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let sizes = AVATAR_SIZES
        .iter()
        .map(|s| s.pixels().to_string())
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"^\d+\.({})\.{}$", sizes, VARIANT_EXTENSION))
        .expect("avatar serving pattern is a valid regex")
});

/// Pattern the serving path applies to requested file names, e.g. `1699000000000.256.webp`.
pub fn serving_pattern() -> &'static Regex {
    &SERVING_PATTERN
}

pub fn is_servable_filename(filename: &str) -> bool {
    SERVING_PATTERN.is_match(filename)
}

fn member_prefix(workspace_id: Uuid, member_id: Uuid) -> String {
    format!("{}/{}/{}", AVATAR_KEY_PREFIX, workspace_id, member_id)
}

pub fn raw_object_key(workspace_id: Uuid, member_id: Uuid, timestamp: i64) -> String {
    format!(
        "{}/{}{}",
        member_prefix(workspace_id, member_id),
        timestamp,
        RAW_KEY_SUFFIX
    )
}

/// Base path of the variants produced from a raw upload, or `None` if the key is not a raw key.
pub fn base_path_from_raw_key(raw_key: &str) -> Option<&str> {
    raw_key
        .strip_suffix(RAW_KEY_SUFFIX)
        .filter(|base| !base.is_empty())
}

pub fn variant_key(base_path: &str, size: AvatarSize) -> String {
    format!("{}.{}.{}", base_path, size, VARIANT_EXTENSION)
}

pub fn variant_keys(base_path: &str) -> Vec<String> {
    AVATAR_SIZES
        .iter()
        .map(|size| variant_key(base_path, *size))
        .collect()
}

/// Last path segment of a storage key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Storage key the serving path reads for a member's file name.
pub fn served_object_key(workspace_id: Uuid, member_id: Uuid, filename: &str) -> String {
    format!("{}/{}", member_prefix(workspace_id, member_id), filename)
}

/// Issues raw-key timestamps (milliseconds since the epoch) that strictly increase
/// within a process, so two uploads accepted by one process never share a base path.
///
/// Clocks in different processes are not coordinated. Two instances accepting an
/// upload for the same member in the same millisecond produce the same raw key, and
/// the later put overwrites the earlier object. Run intake for a member on a single
/// instance, or route it through one, when that matters.
#[derive(Debug, Default)]
pub struct AvatarKeyClock {
    last: AtomicI64,
}

impl AvatarKeyClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }
}
