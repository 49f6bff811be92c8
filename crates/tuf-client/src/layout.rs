//! File names used on the repository and in the local cache.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left unescaped in role names.
const ROLE_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Escapes a role name so it is safe as a single path segment.
pub fn encode_role(role: &str) -> String {
    utf8_percent_encode(role, ROLE_NAME).to_string()
}

/// Name of root version `version` on the repository.
pub fn root_filename(version: u64) -> String {
    format!("{version}.root.json")
}

/// Name under which `role` at `version` is published.
///
/// Root and timestamp always use their fixed names; every other role is
/// prefixed with its version when the repository uses consistent snapshots.
pub fn persisted_filename_for(role: &str, version: u64, consistent_snapshot: bool) -> String {
    let encoded = encode_role(role);
    match role {
        "root" | "timestamp" => format!("{encoded}.json"),
        _ if consistent_snapshot => format!("{version}.{encoded}.json"),
        _ => format!("{encoded}.json"),
    }
}

/// Repository path of a target file, optionally prefixed with one of its hashes.
pub fn target_filename(path: &str, hash: Option<&str>) -> String {
    let Some(hash) = hash else {
        return path.to_string();
    };
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/{hash}.{name}"),
        None => format!("{hash}.{path}"),
    }
}

/// Joins a base URL and a relative file name with exactly one separator.
pub fn join_url(base: &str, file: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        file.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistent_snapshot_names_carry_versions() {
        assert_eq!(persisted_filename_for("snapshot", 7, true), "7.snapshot.json");
        assert_eq!(persisted_filename_for("snapshot", 7, false), "snapshot.json");
        assert_eq!(persisted_filename_for("timestamp", 7, true), "timestamp.json");
        assert_eq!(persisted_filename_for("root", 7, true), "root.json");
        assert_eq!(root_filename(3), "3.root.json");
    }

    #[test]
    fn role_names_are_escaped() {
        assert_eq!(
            persisted_filename_for("team/a b", 2, true),
            "2.team%2Fa%20b.json"
        );
        assert_eq!(encode_role("bin-0f"), "bin-0f");
    }

    #[test]
    fn target_names_take_hash_prefix_on_basename() {
        assert_eq!(target_filename("a/b/file.tgz", Some("abc")), "a/b/abc.file.tgz");
        assert_eq!(target_filename("file.tgz", Some("abc")), "abc.file.tgz");
        assert_eq!(target_filename("a/file.tgz", None), "a/file.tgz");
    }

    #[test]
    fn urls_join_with_one_separator() {
        assert_eq!(join_url("https://repo/metadata/", "/1.root.json"), "https://repo/metadata/1.root.json");
        assert_eq!(join_url("https://repo/metadata", "timestamp.json"), "https://repo/metadata/timestamp.json");
    }
}
