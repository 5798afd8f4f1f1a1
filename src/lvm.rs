//! LVM and thin-pool tool wrapper
//!
//! The engine drives the block layer entirely through the LVM
//! userland tools: `lvs` for the volume survey, `lvcreate`/`lvremove`/
//! `lvrename`/`lvresize` for snapshot lifecycle and restore targets,
//! `dmsetup message` to reserve the pool metadata snapshot, and
//! `thin_delta` to diff two thin snapshots.

use crate::error::{Result, VaultError};
use std::collections::BTreeMap;
use std::process::{Command, Stdio};
use tracing::debug;

/// Columns requested from `lvs`
const LVS_COLUMNS: &str = "vg_name,lv_name,lv_attr,lv_size,lv_time,pool_lv,thin_id,lv_path";

/// One row of the `lvs` survey
#[derive(Debug, Clone)]
pub struct LogicalVolume {
    pub vg_name: String,
    pub lv_name: String,
    pub lv_attr: String,
    /// Size in bytes
    pub lv_size: u64,
    pub lv_time: String,
    pub pool_lv: String,
    pub thin_id: String,
    pub lv_path: String,
}

/// A volume group and its logical volumes
#[derive(Debug, Clone, Default)]
pub struct VolGroup {
    pub name: String,
    pub lvs: BTreeMap<String, LogicalVolume>,
}

/// Survey of all volume groups on the host
pub type VgSurvey = BTreeMap<String, VolGroup>;

fn run_tool(argv: &[&str]) -> Result<std::process::Output> {
    debug!(command = ?argv, "running");
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| VaultError::tool(argv[0], e.to_string()))?;
    if !output.status.success() {
        return Err(VaultError::tool(
            argv.join(" "),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(output)
}

fn run_tool_quiet(argv: &[&str]) -> bool {
    Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Parse `lvs --separator=::` output into the survey structure
pub fn parse_survey(text: &str) -> Result<VgSurvey> {
    let mut vgs: VgSurvey = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split("::").collect();
        if fields.len() != 8 {
            return Err(VaultError::Lvm(format!("Unexpected lvs row: '{}'", line)));
        }
        let size_digits: String = fields[3].chars().filter(|c| c.is_ascii_digit()).collect();
        let lv = LogicalVolume {
            vg_name: fields[0].to_string(),
            lv_name: fields[1].to_string(),
            lv_attr: fields[2].to_string(),
            lv_size: size_digits
                .parse()
                .map_err(|_| VaultError::Lvm(format!("Bad lv_size '{}'", fields[3])))?,
            lv_time: fields[4].to_string(),
            pool_lv: fields[5].to_string(),
            thin_id: fields[6].to_string(),
            lv_path: fields[7].to_string(),
        };
        let vg = vgs.entry(lv.vg_name.clone()).or_insert_with(|| VolGroup {
            name: lv.vg_name.clone(),
            lvs: BTreeMap::new(),
        });
        vg.lvs.insert(lv.lv_name.clone(), lv);
    }
    Ok(vgs)
}

/// Retrieve the survey of all LVs on the host
pub fn survey() -> Result<VgSurvey> {
    let output = run_tool(&[
        "lvs",
        "--units=b",
        "--noheadings",
        "--separator=::",
        &format!("--options={}", LVS_COLUMNS),
    ])?;
    parse_survey(&String::from_utf8_lossy(&output.stdout))
}

/// Whether a volume group exists
pub fn vg_exists(vgname: &str) -> bool {
    run_tool_quiet(&["vgdisplay", vgname])
}

/// Create a read-only, activated snapshot of `vg/source` named `snap`
pub fn create_snapshot(vgname: &str, source: &str, snap: &str) -> Result<()> {
    run_tool(&[
        "lvcreate",
        "-pr",
        "-kn",
        "-ay",
        "-s",
        &format!("{}/{}", vgname, source),
        "-n",
        snap,
    ])?;
    Ok(())
}

/// Force-remove a logical volume
pub fn remove_lv(vgname: &str, lvname: &str) -> Result<()> {
    run_tool(&["lvremove", "--force", &format!("{}/{}", vgname, lvname)])?;
    Ok(())
}

/// Rename a logical volume within its group
pub fn rename_lv(vgname: &str, from: &str, to: &str) -> Result<()> {
    run_tool(&["lvrename", &format!("{}/{}", vgname, from), to])?;
    Ok(())
}

/// Create a thin volume of `bytes` in `vg/pool`
pub fn create_thin(vgname: &str, poolname: &str, name: &str, bytes: u64) -> Result<()> {
    run_tool(&[
        "lvcreate",
        "-kn",
        "-ay",
        "-V",
        &format!("{}b", bytes),
        "--thin",
        "-n",
        name,
        &format!("{}/{}", vgname, poolname),
    ])?;
    Ok(())
}

/// Resize a logical volume to exactly `bytes`
pub fn resize_lv(lv_path: &str, bytes: u64) -> Result<()> {
    run_tool(&["lvresize", "-L", &format!("{}b", bytes), "-f", lv_path])?;
    Ok(())
}

/// Trim all blocks of a block device before a restore write
pub fn discard_device(path: &str) -> Result<()> {
    run_tool(&["blkdiscard", path])?;
    Ok(())
}

/// Reserve the thin pool's metadata snapshot for `thin_delta`. Any
/// stale reservation is released first.
pub fn reserve_metadata_snap(vgname: &str, poolname: &str) -> Result<()> {
    let tpool = format!("{}-{}-tpool", vgname, poolname);
    // a leftover reservation from a crashed run is not an error
    let _ = run_tool(&["dmsetup", "message", &tpool, "0", "release_metadata_snap"]);
    run_tool(&["dmsetup", "message", &tpool, "0", "reserve_metadata_snap"])?;
    Ok(())
}

/// Release the thin pool's metadata snapshot
pub fn release_metadata_snap(vgname: &str, poolname: &str, check: bool) -> Result<()> {
    let tpool = format!("{}-{}-tpool", vgname, poolname);
    let result = run_tool(&["dmsetup", "message", &tpool, "0", "release_metadata_snap"]);
    if check {
        result?;
    }
    Ok(())
}

/// Run `thin_delta` between two thin device ids and return the XML diff
pub fn thin_delta(vgname: &str, poolname: &str, thin1: &str, thin2: &str) -> Result<String> {
    let tmeta = format!("/dev/mapper/{}-{}_tmeta", vgname, poolname);
    let output = run_tool(&[
        "thin_delta",
        "-m",
        &format!("--thin1={}", thin1),
        &format!("--thin2={}", thin2),
        &tmeta,
    ])?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Check that the required external tools are present
pub fn check_tools(needs_ssh: bool) -> Result<()> {
    let mut tools = vec![
        "thin_delta",
        "lvs",
        "lvdisplay",
        "lvcreate",
        "blkdiscard",
        "truncate",
        "sh",
    ];
    if needs_ssh {
        tools.push("ssh");
    }
    for tool in tools {
        if !run_tool_quiet(&["sh", "-c", &format!("command -v {}", tool)]) {
            return Err(VaultError::config(format!(
                "Required command not found: {}",
                tool
            )));
        }
    }
    Ok(())
}
