//! The VFS decoration post-pass (spec.md §4.3). Kept separate from the base
//! push so the object-graph traversal stays untangled from this second,
//! purely metadata-driven walk (see SPEC_FULL.md Design Note "VFS decoration
//! is a post-pass").

use chrono::{TimeZone, Utc};

use crate::cas::{Address, Client};
use crate::content;
use crate::error::Result;
use crate::git::{Oid, Reader};
use crate::tracker::Tracker;

/// Walks commits reachable from `root_hash` in preorder starting at the tip
/// (`root_hash` itself is index 1), and links each commit's content
/// directory into the five VFS paths described in spec.md §4.3.
pub fn decorate(
    reader: &Reader,
    cas: &Client,
    tracker: &Tracker,
    mut root: Address,
    root_hash: Oid,
) -> Result<Address> {
    let commits = reader.commits_preorder(root_hash)?;
    for (i, commit) in commits.iter().enumerate() {
        let index = i + 1; // numbering starts at 1
        let iso = format_iso8601(commit.time);
        let encoded_author = percent_encode(&commit.author);
        let encoded_first_line = percent_encode(&commit.first_line);
        let encoded_iso = percent_encode(&iso);

        let content_dir = content::build(reader, cas, tracker, commit.tree)?;

        let messages_path = format!(
            ".git/vfs/messages/{encoded_iso}: {encoded_author} \u{2013} {encoded_first_line}"
        );
        let rev_messages_path = format!(
            ".git/vfs/rev/messages/{:020}: {encoded_iso}: {encoded_author} \u{2013} {encoded_first_line}",
            index
        );
        let authors_path = format!(".git/vfs/authors/{encoded_author}/{encoded_iso}: {encoded_first_line}");
        let rev_authors_path = format!(
            ".git/vfs/rev/authors/{encoded_author}/{:020}: {encoded_iso}: {encoded_first_line}",
            index
        );
        let trees_path = format!(".git/vfs/trees/{}", commit.hash.to_hex());

        root = cas.patch_link(&root, &messages_path, &content_dir, true)?;
        root = cas.patch_link(&root, &rev_messages_path, &content_dir, true)?;
        root = cas.patch_link(&root, &authors_path, &content_dir, true)?;
        root = cas.patch_link(&root, &rev_authors_path, &content_dir, true)?;
        root = cas.patch_link(&root, &trees_path, &content_dir, true)?;
    }

    Ok(root)
}

/// `%`, NUL and `/` in the source are escaped so the only literal `/` left
/// in a VFS path component is the directory separator inserted by this
/// module itself.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\0' => out.push_str("%00"),
            '/' => out.push_str("%2F"),
            _ => out.push(c),
        }
    }
    out
}

fn format_iso8601(seconds_since_epoch: i64) -> String {
    Utc.timestamp_opt(seconds_since_epoch, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encode_escapes_percent_nul_and_slash() {
        assert_eq!(percent_encode("a/b"), "a%2Fb");
        assert_eq!(percent_encode("100%"), "100%25");
        assert_eq!(percent_encode("a\u{0}b"), "a%00b");
    }

    #[test]
    fn percent_encode_preserves_non_ascii_characters() {
        assert_eq!(percent_encode("jos\u{e9}/caf\u{e9}"), "jos\u{e9}%2Fcaf\u{e9}");
    }

    #[test]
    fn iso8601_matches_spec_example() {
        // 2020-01-02T03:04:05Z
        let ts = chrono::NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(format_iso8601(ts), "2020-01-02T03:04:05Z");
    }
}
