//! Session pruning and merging
//!
//! Pruning merges a contiguous session range into the session
//! immediately after it. The merge is a newest-wins fold of the
//! annotated manifests, translated into rename/remove operations the
//! destination helper applies without touching chunks that will not
//! change: the oldest pruned session's directory absorbs the newest
//! extant chunk for every address, then is renamed to the target.

use crate::archive::{
    load_annotated, merge_newest_wins, session_name, validate_session_time, AnnotatedEntry,
    ArchiveSet, SessionFormat,
};
use crate::chunk::{chunk_rel_path, format_address, last_chunk_addr};
use crate::error::{IoResultExt, Result, VaultError};
use crate::transport::helper::MERGE_SENTINEL;
use crate::transport::Transport;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Inputs resolved by the orchestrator
pub struct PruneParams<'a> {
    pub transport: &'a Transport,
    /// Archive directory on the destination (absolute)
    pub archive_dir: &'a str,
    /// Local scratch dir
    pub tmpdir: &'a Path,
    pub unattended: bool,
    pub all_before: bool,
}

/// Prune sessions of one volume selected by `--session T[,T]`
pub fn prune_sessions(
    aset: &mut ArchiveSet,
    volname: &str,
    times: &[String],
    params: &PruneParams<'_>,
) -> Result<()> {
    for time in times {
        validate_session_time(time.trim())?;
    }
    let t1 = session_name(times[0].trim());
    let t2 = match times.get(1) {
        Some(t) => {
            let t2 = session_name(t.trim());
            if t2 <= t1 {
                return Err(VaultError::config(
                    "Second date-time must be later than first",
                ));
            }
            Some(t2)
        }
        None => None,
    };

    println!("\nPruning volume: {}", volname);
    let sessions = {
        let vol = aset
            .vols
            .get(volname)
            .ok_or_else(|| VaultError::config(format!("Volume {} not configured", volname)))?;
        vol.sesnames.clone()
    };
    if sessions.len() < 2 {
        println!("  No extra sessions to prune.");
        return Ok(());
    }
    let newest = &sessions[sessions.len() - 1];
    if &t1 >= newest || t2.as_ref().map(|t| t >= newest).unwrap_or(false) {
        println!("  Cannot prune most recent session; skipping.");
        return Ok(());
    }

    // Select a contiguous range, snapping inward to sessions the
    // volume actually has.
    let to_prune: Vec<String> = if params.all_before {
        sessions.iter().take_while(|s| **s < t1).cloned().collect()
    } else if let Some(t2) = &t2 {
        let start = sessions.iter().position(|s| s >= &t1);
        let end = sessions.iter().rposition(|s| s <= t2);
        match (start, end) {
            (Some(start), Some(end)) if start <= end => sessions[start..=end].to_vec(),
            _ => Vec::new(),
        }
    } else {
        sessions.iter().filter(|s| **s == t1).cloned().collect()
    };

    if to_prune.is_empty() {
        println!("  No sessions in this date-time range.");
        return Ok(());
    }
    let last_pruned_idx = sessions
        .iter()
        .position(|s| s == &to_prune[to_prune.len() - 1])
        .ok_or_else(|| VaultError::precondition("pruned session vanished"))?;
    let target = sessions[last_pruned_idx + 1].clone();

    if !params.unattended && to_prune.len() > 1 {
        println!(
            "This will remove multiple sessions:\n {}",
            to_prune.join(" ")
        );
        if !confirm("Are you sure? [y/N]: ")? {
            return Ok(());
        }
    }

    merge_sessions(aset, volname, &to_prune, &target, params)
}

/// Merge `sources` (oldest first) into `target`, the session directly
/// after the range. Destructive: the source sessions are removed.
pub fn merge_sessions(
    aset: &mut ArchiveSet,
    volname: &str,
    sources: &[String],
    target: &str,
    params: &PruneParams<'_>,
) -> Result<()> {
    let chunksize = aset.chunksize;
    let vol = aset
        .vols
        .get(volname)
        .ok_or_else(|| VaultError::config(format!("Volume {} not configured", volname)))?;

    let target_name = target.to_string();
    for sname in sources.iter().chain(std::iter::once(&target_name)) {
        let ses = vol.sessions.get(sname).ok_or_else(|| {
            VaultError::precondition(format!("No session {} in {}", sname, volname))
        })?;
        if ses.format == SessionFormat::Tar {
            return Err(VaultError::precondition(
                "Cannot merge a range containing a tarfile session",
            ));
        }
    }

    let volsize = vol.sessions[target].volsize;
    let vol_shrank = volsize < vol.sessions[&sources[0]].volsize;
    let last_chunk = last_chunk_addr(volsize, chunksize);

    // The oldest source absorbs everything; newer sessions (target
    // included) move their chunks over it, newest first.
    let merge_target = sources[0].clone();
    let mut merge_sources: Vec<String> = Vec::with_capacity(sources.len());
    merge_sources.push(target.to_string());
    merge_sources.extend(sources.iter().rev().cloned());
    merge_sources.pop();

    println!("  Reading manifests");
    let mut annotated: Vec<AnnotatedEntry> = Vec::new();
    for sname in &merge_sources {
        let path = vol.path.join(sname).join("manifest");
        annotated.extend(load_annotated(&path, sname)?);
    }
    let moved = merge_newest_wins(annotated);

    let target_manifest =
        load_annotated(&vol.path.join(&merge_target).join("manifest"), &merge_target)?;
    let full = merge_newest_wins(moved.iter().cloned().chain(target_manifest));

    // Listing for the helper: target names, drained source dirs, then
    // one rename/rm per surviving address.
    let mut listing = String::new();
    let _ = writeln!(listing, "{} {}", merge_target, target);
    for sname in &merge_sources {
        let _ = writeln!(listing, "{}", sname);
    }
    let _ = writeln!(listing, "{}", MERGE_SENTINEL);
    for entry in moved.iter().filter(|e| e.addr <= last_chunk) {
        let rel = chunk_rel_path(entry.addr);
        if entry.is_zero() {
            let _ = writeln!(listing, "rm {}/{}", merge_target, rel);
        } else {
            let _ = writeln!(listing, "rename {}/{} {}/{}", entry.session, rel, merge_target, rel);
        }
    }

    println!("  Merging to {}", target);
    let listing_path = params.tmpdir.join("merge.lst");
    std::fs::write(&listing_path, listing).with_path(&listing_path)?;
    let merge_cmd = format!(
        "cd '{dir}/{vol}' && {stage} && {helper}",
        dir = params.archive_dir,
        vol = volname,
        stage = params.transport.stage_listing(),
        helper = params.transport.helper_invocation("merge"),
    );
    params
        .transport
        .run(&merge_cmd, Some(&listing_path), None)?;

    // Local metadata: drop pruned session records and relink the chain.
    let vol = aset
        .vols
        .get_mut(volname)
        .ok_or_else(|| VaultError::config(format!("Volume {} not configured", volname)))?;
    for sname in sources {
        vol.delete_session(sname)?;
    }
    if let Some(ses) = vol.sessions.get(target) {
        ses.save_info()?;
    }
    vol.save_volinfo("volinfo")?;
    println!("  Removed {}", sources.join(" "));

    // The filtered newest-wins fold becomes the target's manifest.
    let mut manifest_text = String::new();
    let mut trim_list = String::new();
    for entry in &full {
        if entry.addr <= last_chunk {
            let _ = writeln!(
                manifest_text,
                "{} {}",
                entry.hash,
                format_address(entry.addr)
            );
        } else if !entry.is_zero() {
            let _ = writeln!(trim_list, "{}/{}", target, chunk_rel_path(entry.addr));
        }
    }
    let target_dir = vol.path.join(target);
    std::fs::write(target_dir.join("manifest"), manifest_text)
        .with_path(target_dir.join("manifest"))?;
    if vol_shrank {
        std::fs::write(target_dir.join("delete"), trim_list)
            .with_path(target_dir.join("delete"))?;
    }

    // Ship the rewritten metadata; after a shrink the helper also
    // removes chunks beyond the new last chunk and prunes empty leaves.
    let meta_tar = params.tmpdir.join("meta.tar");
    {
        let file = File::create(&meta_tar).with_path(&meta_tar)?;
        let mut builder = tar::Builder::new(file);
        builder
            .append_path_with_name(vol.path.join("volinfo"), "volinfo")
            .map_err(|e| VaultError::transport(format!("meta tar: {}", e)))?;
        builder
            .append_dir_all(target, &target_dir)
            .map_err(|e| VaultError::transport(format!("meta tar: {}", e)))?;
        let mut file = builder
            .into_inner()
            .map_err(|e| VaultError::transport(format!("meta tar: {}", e)))?;
        file.flush().with_path(&meta_tar)?;
    }
    let trim_cmd = if vol_shrank {
        format!(
            " && cat {t}/delete | xargs -r rm -f && rm {t}/delete \
             && find {t} -maxdepth 1 -type d -empty -delete",
            t = target
        )
    } else {
        String::new()
    };
    let ship_cmd = format!(
        "cd '{dir}/{vol}' && tar -xmf -{trim} && sync -f volinfo",
        dir = params.archive_dir,
        vol = volname,
        trim = trim_cmd,
    );
    params.transport.run(&ship_cmd, Some(&meta_tar), None)?;

    if vol_shrank {
        std::fs::remove_file(target_dir.join("delete")).ok();
    }
    info!(volume = %volname, target = %target, pruned = sources.len(), "sessions merged");
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| VaultError::config(format!("prompt failed: {}", e)))?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
