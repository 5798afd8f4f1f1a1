//! Destination helper program
//!
//! A small python3 program shipped to the destination at startup. It
//! reads a concatenated file listing from `<tmpdir>/rpc/dest.lst` and
//! executes one of three commands against the archive directory it is
//! started in:
//!
//! - `receive`: for each listed path, write a 4-byte big-endian size
//!   followed by that many payload bytes to stdout (size 0 if the
//!   file is missing).
//! - `merge`: first line names `merge_target target`; source
//!   directories follow until a `###` sentinel; remaining lines are
//!   `rename SRC DST` / `rm PATH` operations applied idempotently;
//!   drained source dirs are removed and `merge_target` is renamed to
//!   `target`.
//! - `dedup`: lines are `source dest` pairs; `dest` is replaced by a
//!   hardlink to `source` unless they already share an inode.

/// File name of the listing the helper consumes
pub const DEST_LIST: &str = "dest.lst";

/// File name the helper is stored under in `<tmpdir>/rpc/`
pub const HELPER_NAME: &str = "dest_helper.py";

/// Sentinel separating the merge source-directory list from the
/// rename/rm operations
pub const MERGE_SENTINEL: &str = "###";

/// Render the helper program for a given destination scratch dir
pub fn helper_program(tmpdir: &str) -> String {
    format!(
        r#"import os, shutil, sys

LISTING = "{tmpdir}/rpc/{listing}"

def cmd_receive(listf):
    out = sys.stdout.buffer
    for line in listf:
        path = line.strip()
        size = os.path.getsize(path) if os.path.exists(path) else 0
        out.write(size.to_bytes(4, "big"))
        if size:
            with open(path, "rb") as payload:
                out.write(payload.read(size))

def cmd_merge(listf):
    merge_target, target = listf.readline().strip().split()
    sources = []
    while True:
        line = listf.readline().strip()
        if line == "{sentinel}":
            break
        sources.append(line)
    subdirs = set()
    for src in sources:
        for entry in os.scandir(src):
            if entry.is_dir():
                subdirs.add(entry.name)
    for name in subdirs:
        os.makedirs(os.path.join(merge_target, name), exist_ok=True)
    for line in listf:
        op = line.strip().split()
        if op[0] == "rename" and os.path.exists(op[1]):
            os.replace(op[1], op[2])
        elif op[0] == "rm" and os.path.exists(op[1]):
            os.remove(op[1])
    for src in sources:
        shutil.rmtree(src)
    os.replace(merge_target, target)

def cmd_dedup(listf):
    linked = 0
    for line in listf:
        source, dest = line.strip().split()
        if os.stat(source).st_ino != os.stat(dest).st_ino:
            os.link(source, dest + "-lnk")
            os.replace(dest + "-lnk", dest)
            linked += 1
    print(linked, "reduced.")

with open(LISTING, "r") as listf:
    cmd = sys.argv[1]
    if cmd == "receive":
        cmd_receive(listf)
    elif cmd == "merge":
        cmd_merge(listf)
    elif cmd == "dedup":
        cmd_dedup(listf)
    else:
        sys.exit("unknown command: " + cmd)
"#,
        tmpdir = tmpdir,
        listing = DEST_LIST,
        sentinel = MERGE_SENTINEL,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_references_all_commands() {
        let text = helper_program("/tmp/thinvault");
        for needle in ["receive", "merge", "dedup", "/tmp/thinvault/rpc/dest.lst"] {
            assert!(text.contains(needle), "missing {}", needle);
        }
    }

    #[test]
    fn test_program_uses_sentinel() {
        let text = helper_program("/tmp/thinvault");
        assert!(text.contains(MERGE_SENTINEL));
    }
}
