//! Output formatters for catalog entries: console table, JSON, CSV, and a
//! path-hierarchy tree view.

use std::collections::BTreeMap;

use crate::entry::FileEntry;

/// Fixed-width console listing, one entry per line.
pub fn to_console(entries: &[FileEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 2);
    lines.push(format!(
        "{:<12} {:>5} {:>5} {:>12} {:<20} Path",
        "Mode", "UID", "GID", "Size", "Modified"
    ));
    lines.push("-".repeat(80));

    for entry in entries {
        let size_str = if entry.is_directory() {
            "<DIR>".to_string()
        } else {
            thousands(entry.size)
        };
        lines.push(format!(
            "{:<12} {:>5} {:>5} {:>12} {:<20} {}",
            entry.mode_str, entry.uid, entry.gid, size_str, entry.mtime, entry.path
        ));
    }

    lines.join("\n")
}

/// Pretty-printed JSON array over the full records.
pub fn to_json(entries: &[FileEntry]) -> String {
    serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
}

/// CSV with a fixed column order; fields containing separators or quotes
/// are quoted.
pub fn to_csv(entries: &[FileEntry]) -> String {
    let mut out = String::from(
        "path,name,type,size,mode_str,uid,gid,nlink,atime,mtime,ctime,otime,\
         inode,subvolume_id,generation,transid,flags,flags_str,extent_count,\
         disk_bytes,physical_offset,xattr_count,checksum_count,md5,sha256\n",
    );

    for e in entries {
        let fields: Vec<String> = vec![
            csv_quote(&e.path),
            csv_quote(&e.name),
            e.file_type.clone(),
            e.size.to_string(),
            e.mode_str.clone(),
            e.uid.to_string(),
            e.gid.to_string(),
            e.nlink.to_string(),
            e.atime.clone(),
            e.mtime.clone(),
            e.ctime.clone(),
            e.otime.clone(),
            e.inode.to_string(),
            e.subvolume_id.to_string(),
            e.generation.to_string(),
            e.transid.to_string(),
            e.flags.to_string(),
            csv_quote(&e.flags_str),
            e.extent_count.to_string(),
            e.disk_bytes.to_string(),
            e.physical_offset.map_or(String::new(), |o| o.to_string()),
            e.xattr_count.to_string(),
            e.checksum_count.to_string(),
            e.md5.clone().unwrap_or_default(),
            e.sha256.clone().unwrap_or_default(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ---- Tree view ----

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_directory: bool,
    present: bool,
}

/// Render the catalog as an indented tree rooted at `/`.
pub fn to_tree(entries: &[FileEntry]) -> String {
    let mut root = TreeNode {
        is_directory: true,
        present: true,
        ..Default::default()
    };

    for entry in entries {
        let trimmed = entry.path.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        let mut node = &mut root;
        let parts: Vec<&str> = trimmed.split('/').collect();
        for (i, part) in parts.iter().enumerate() {
            node = node.children.entry((*part).to_string()).or_default();
            if i + 1 == parts.len() {
                node.present = true;
                node.is_directory = entry.is_directory();
            } else {
                node.is_directory = true;
            }
        }
    }

    let mut lines = vec!["/".to_string()];
    render_node(&root, "", &mut lines);
    lines.join("\n")
}

fn render_node(node: &TreeNode, prefix: &str, lines: &mut Vec<String>) {
    let count = node.children.len();
    for (i, (name, child)) in node.children.iter().enumerate() {
        let is_last = i + 1 == count;
        let connector = if is_last { "└── " } else { "├── " };
        let marker = if child.is_directory { "d" } else { "-" };
        let suffix = if child.is_directory && !child.children.is_empty() {
            "/"
        } else {
            ""
        };
        lines.push(format!("{prefix}{connector}[{marker}] {name}{suffix}"));
        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        render_node(child, &child_prefix, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, file_type: &str, size: u64) -> FileEntry {
        FileEntry {
            inode: 256,
            subvolume_id: 5,
            name: path.rsplit('/').next().unwrap_or("/").to_string(),
            path: path.to_string(),
            size,
            file_type: file_type.to_string(),
            mode: if file_type == "directory" {
                0o040755
            } else {
                0o100644
            },
            mode_str: "-rw-r--r--".to_string(),
            uid: 0,
            uid_name: None,
            gid: 0,
            gid_name: None,
            nlink: 1,
            atime: "2024-01-01T00:00:00".to_string(),
            mtime: "2024-01-01T00:00:00".to_string(),
            ctime: "2024-01-01T00:00:00".to_string(),
            otime: "2024-01-01T00:00:00".to_string(),
            parent_inode: None,
            generation: 1,
            transid: 1,
            flags: 0,
            flags_str: String::new(),
            xattr_count: 0,
            extent_count: 0,
            disk_bytes: 0,
            physical_offset: None,
            checksum_count: 0,
            md5: None,
            sha256: None,
        }
    }

    #[test]
    fn test_console_directory_size_marker() {
        let out = to_console(&[entry("/etc", "directory", 0), entry("/a.txt", "file", 12345)]);
        assert!(out.contains("<DIR>"));
        assert!(out.contains("12,345"));
        assert!(out.contains("/a.txt"));
    }

    #[test]
    fn test_json_round_trips() {
        let out = to_json(&[entry("/a.txt", "file", 5)]);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["path"], "/a.txt");
        assert_eq!(parsed[0]["type"], "file");
        assert_eq!(parsed[0]["size"], 5);
        assert!(parsed[0]["md5"].is_null());
    }

    #[test]
    fn test_csv_header_and_row() {
        let out = to_csv(&[entry("/a.txt", "file", 5)]);
        let mut lines = out.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("path,name,type,size"));
        assert!(header.ends_with("md5,sha256"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("/a.txt,a.txt,file,5,"));
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_tree_nesting() {
        let out = to_tree(&[
            entry("/etc", "directory", 0),
            entry("/etc/passwd", "file", 100),
            entry("/a.txt", "file", 1),
        ]);
        assert!(out.starts_with("/\n"));
        assert!(out.contains("[d] etc/"));
        assert!(out.contains("[-] passwd"));
        assert!(out.contains("[-] a.txt"));
        // passwd must be indented under etc
        let etc_line = out.lines().position(|l| l.contains("etc")).unwrap();
        let passwd_line = out.lines().position(|l| l.contains("passwd")).unwrap();
        assert!(passwd_line > etc_line);
    }

    #[test]
    fn test_thousands_separator() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }
}
