//! Destination transport
//!
//! The core talks to its archive destination through exactly one
//! primitive: run an `sh` command string on the destination,
//! optionally piping a local file in as stdin or streaming
//! stdin/stdout live. Four backends satisfy the contract: a local
//! shell, SSH, a Qubes VM-RPC channel, and a Qubes-RPC-to-SSH bridge.
//! The core never parses destination responses other than the
//! `receive` byte stream.

pub mod helper;

use crate::error::{IoResultExt, Result, VaultError};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Every destination command runs under this prefix
pub const SHELL_PREFIX: &str = "set -e && export LC_ALL=C\n";

/// Destination backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestType {
    /// Local shell environment
    Internal,
    /// `ssh://host/...`
    Ssh,
    /// `qubes://vm/...`
    Qubes,
    /// `qubes-ssh://vm|host/...`
    QubesSsh,
}

impl DestType {
    /// URI scheme prefix of this backend
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Internal => "internal:",
            Self::Ssh => "ssh://",
            Self::Qubes => "qubes://",
            Self::QubesSsh => "qubes-ssh://",
        }
    }
}

/// A parsed destination: backend, target system, and mountpoint path
#[derive(Debug, Clone)]
pub struct Destination {
    pub desttype: DestType,
    /// Host, VM, or `vm|host`; empty for `internal:`
    pub system: String,
    /// Absolute path of the archive mountpoint on the destination
    pub mountpoint: String,
}

impl Destination {
    /// Parse an `arch-init --dest` URI into its parts
    pub fn parse(dest: &str) -> Result<Self> {
        let schemes = [
            DestType::QubesSsh,
            DestType::Qubes,
            DestType::Ssh,
            DestType::Internal,
        ];
        for desttype in schemes {
            let Some(rest) = dest.strip_prefix(desttype.scheme()) else {
                continue;
            };
            let (system, mountpoint) = match rest.find('/') {
                Some(slash) => (&rest[..slash], &rest[slash..]),
                None => (rest, ""),
            };
            if mountpoint.is_empty() {
                return Err(VaultError::config("Malformed --dest specification"));
            }
            if desttype != DestType::Internal && system.is_empty() {
                return Err(VaultError::config("Malformed --dest specification"));
            }
            if desttype == DestType::QubesSsh {
                let parts: Vec<&str> = system.split('|').collect();
                if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
                    return Err(VaultError::config("Malformed --dest specification"));
                }
            }
            return Ok(Self {
                desttype,
                system: system.to_string(),
                mountpoint: mountpoint.to_string(),
            });
        }
        Err(VaultError::config("Malformed --dest specification"))
    }

    /// Split a persisted `destsys` value (scheme + system) back into
    /// its parts, pairing it with the persisted mountpoint
    pub fn from_config(destsys: &str, mountpoint: &str) -> Result<Self> {
        let with_path = format!(
            "{}{}{}",
            destsys,
            if mountpoint.starts_with('/') { "" } else { "/" },
            mountpoint
        );
        Self::parse(&with_path)
    }

    /// The persisted `destsys` form: scheme plus system
    pub fn destsys(&self) -> String {
        format!("{}{}", self.desttype.scheme(), self.system)
    }
}

/// Command executor for one destination
pub struct Transport {
    dest: Destination,
    /// Local scratch dir holding generated command scripts
    tmpdir: PathBuf,
    serial: AtomicU64,
}

impl Transport {
    pub fn new(dest: Destination, tmpdir: impl Into<PathBuf>) -> Self {
        Self {
            dest,
            tmpdir: tmpdir.into(),
            serial: AtomicU64::new(0),
        }
    }

    pub fn desttype(&self) -> DestType {
        self.dest.desttype
    }

    /// Scratch dir used on the destination side (same fixed path as
    /// the local one; the helper and listings live under `rpc/`)
    pub fn remote_tmpdir(&self) -> &Path {
        &self.tmpdir
    }

    /// Write the command (with the shell prefix) to a fresh local
    /// script file and return its path
    fn stage_script(&self, command: &str) -> Result<PathBuf> {
        let n = self.serial.fetch_add(1, Ordering::Relaxed);
        let path = self.tmpdir.join(format!("cmd{}.sh", n));
        let mut file = File::create(&path).with_path(&path)?;
        file.write_all(SHELL_PREFIX.as_bytes()).with_path(&path)?;
        file.write_all(command.as_bytes()).with_path(&path)?;
        file.write_all(b"\n").with_path(&path)?;
        Ok(path)
    }

    /// Build the argv that executes `command` on the destination
    fn argv(&self, command: &str) -> Result<Vec<String>> {
        let script = self.stage_script(command)?;
        let script_name = script
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let rpc_script = self
            .tmpdir
            .join("rpc")
            .join(&script_name)
            .to_string_lossy()
            .to_string();

        let argv = match self.dest.desttype {
            DestType::Internal => vec![
                "sh".to_string(),
                script.to_string_lossy().to_string(),
            ],
            DestType::Ssh => vec![
                "ssh".to_string(),
                self.dest.system.clone(),
                format!("{}{}", SHELL_PREFIX, command),
            ],
            DestType::Qubes => {
                self.copy_script_to_vm(&self.dest.system, &script, &rpc_script)?;
                vec![
                    "qvm-run".to_string(),
                    "-p".to_string(),
                    self.dest.system.clone(),
                    format!("sh {}", rpc_script),
                ]
            }
            DestType::QubesSsh => {
                let mut parts = self.dest.system.splitn(2, '|');
                let vm = parts.next().unwrap_or_default().to_string();
                let host = parts.next().unwrap_or_default().to_string();
                self.copy_script_to_vm(&vm, &script, &rpc_script)?;
                vec![
                    "qvm-run".to_string(),
                    "-p".to_string(),
                    vm,
                    format!("ssh {} \"$(cat {})\"", host, rpc_script),
                ]
            }
        };
        Ok(argv)
    }

    /// Ship a staged script into the relay VM's rpc dir
    fn copy_script_to_vm(&self, vm: &str, local: &Path, remote: &str) -> Result<()> {
        let rpc_dir = self.tmpdir.join("rpc");
        let copy_cmd = format!(
            "mkdir -p {} && cat >{}",
            rpc_dir.to_string_lossy(),
            remote
        );
        let infile = File::open(local).with_path(local)?;
        let status = Command::new("qvm-run")
            .args(["-p", vm, &copy_cmd])
            .stdin(Stdio::from(infile))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| VaultError::tool("qvm-run", e.to_string()))?;
        if !status.success() {
            return Err(VaultError::transport(format!(
                "Could not stage command in VM {}",
                vm
            )));
        }
        Ok(())
    }

    /// Run a command on the destination, optionally piping a local
    /// file in as stdin and capturing stdout to a local file
    pub fn run(&self, command: &str, stdin: Option<&Path>, stdout: Option<&Path>) -> Result<()> {
        let argv = self.argv(command)?;
        debug!(backend = ?self.dest.desttype, command = %argv.join(" "), "dest run");

        let stdin_io = match stdin {
            Some(path) => Stdio::from(File::open(path).with_path(path)?),
            None => Stdio::null(),
        };
        let stdout_io = match stdout {
            Some(path) => Stdio::from(File::create(path).with_path(path)?),
            None => Stdio::null(),
        };
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(stdin_io)
            .stdout(stdout_io)
            .stderr(Stdio::null())
            .status()
            .map_err(|e| VaultError::tool(&argv[0], e.to_string()))?;
        if !status.success() {
            return Err(VaultError::transport(format!(
                "Destination command exited with {}",
                status
            )));
        }
        Ok(())
    }

    /// Spawn a destination command with piped stdin and stdout for
    /// live streaming (the send tar stream and the receive stream)
    pub fn spawn(&self, command: &str) -> Result<Child> {
        let argv = self.argv(command)?;
        debug!(backend = ?self.dest.desttype, command = %argv.join(" "), "dest spawn");
        Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VaultError::tool(&argv[0], e.to_string()))
    }

    /// Ship the destination helper program (non-internal backends;
    /// the local shell reads it straight from the scratch dir)
    pub fn ship_helper(&self) -> Result<()> {
        let tmpdir = self.tmpdir.to_string_lossy().to_string();
        let rpc_dir = self.tmpdir.join("rpc");
        let helper_path = rpc_dir.join(helper::HELPER_NAME);
        std::fs::create_dir_all(&rpc_dir).with_path(&rpc_dir)?;
        std::fs::write(&helper_path, helper::helper_program(&tmpdir)).with_path(&helper_path)?;

        if self.dest.desttype != DestType::Internal {
            let command = format!(
                "rm -rf {tmp} && mkdir -p {tmp}/rpc && cat >{helper}",
                tmp = tmpdir,
                helper = helper_path.to_string_lossy(),
            );
            self.run(&command, Some(&helper_path), None)?;
        }
        Ok(())
    }

    /// Command string that invokes the shipped helper
    pub fn helper_invocation(&self, subcommand: &str) -> String {
        format!(
            "python3 {}/rpc/{} {}",
            self.tmpdir.to_string_lossy(),
            helper::HELPER_NAME,
            subcommand
        )
    }

    /// Command fragment that stores stdin as the helper's listing file
    pub fn stage_listing(&self) -> String {
        format!(
            "cat >{}/rpc/{}",
            self.tmpdir.to_string_lossy(),
            helper::DEST_LIST
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_internal() {
        let dest = Destination::parse("internal:/mnt/backup").unwrap();
        assert_eq!(dest.desttype, DestType::Internal);
        assert_eq!(dest.system, "");
        assert_eq!(dest.mountpoint, "/mnt/backup");
        assert_eq!(dest.destsys(), "internal:");
    }

    #[test]
    fn test_parse_ssh() {
        let dest = Destination::parse("ssh://backup.example/srv/archive").unwrap();
        assert_eq!(dest.desttype, DestType::Ssh);
        assert_eq!(dest.system, "backup.example");
        assert_eq!(dest.mountpoint, "/srv/archive");
    }

    #[test]
    fn test_parse_qubes_ssh() {
        let dest = Destination::parse("qubes-ssh://relay|backup.example/srv/a").unwrap();
        assert_eq!(dest.desttype, DestType::QubesSsh);
        assert_eq!(dest.system, "relay|backup.example");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Destination::parse("ssh://hostonly").is_err());
        assert!(Destination::parse("ssh:///nopath").is_err());
        assert!(Destination::parse("qubes-ssh://relay/srv/a").is_err());
        assert!(Destination::parse("qubes-ssh://|host/srv/a").is_err());
        assert!(Destination::parse("ftp://x/y").is_err());
        assert!(Destination::parse("internal:").is_err());
    }

    #[test]
    fn test_from_config_roundtrip() {
        let dest = Destination::parse("ssh://host/srv/archive").unwrap();
        let again = Destination::from_config(&dest.destsys(), &dest.mountpoint).unwrap();
        assert_eq!(again.desttype, DestType::Ssh);
        assert_eq!(again.system, "host");
        assert_eq!(again.mountpoint, "/srv/archive");
    }

    #[test]
    fn test_internal_run_and_spawn() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = Destination::parse("internal:/tmp").unwrap();
        let transport = Transport::new(dest, dir.path());

        let out = dir.path().join("out.txt");
        transport
            .run("echo streaming-ok", None, Some(&out))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "streaming-ok");

        let mut child = transport.spawn("cat").unwrap();
        use std::io::{Read, Write};
        child
            .stdin
            .take()
            .unwrap()
            .write_all(b"roundtrip")
            .unwrap();
        let mut echoed = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut echoed)
            .unwrap();
        assert!(child.wait().unwrap().success());
        assert_eq!(echoed, "roundtrip");
    }

    #[test]
    fn test_run_failure_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = Destination::parse("internal:/tmp").unwrap();
        let transport = Transport::new(dest, dir.path());
        assert!(transport.run("exit 3", None, None).is_err());
    }
}
