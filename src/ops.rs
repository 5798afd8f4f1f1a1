//! Operation orchestration
//!
//! Wires the CLI commands to the engine: snapshot preparation,
//! delta acquisition, session sends, pruning, receive/verify/diff,
//! and archive administration. A single `Context` value carries the
//! process-wide state (config, LVM survey, scratch dir, instance
//! lock) through every operation.

use crate::archive::ArchiveSet;
use crate::chunk::map_bytes;
use crate::config::{
    chunk_size_from_factor, parse_compression, parse_session_arg, parse_source, Command,
};
use crate::dedup::DedupIndex;
use crate::delta::{translate_delta, DeltaMap};
use crate::error::{IoResultExt, Result, VaultError};
use crate::lock::InstanceLock;
use crate::lvm;
use crate::prune::{prune_sessions, PruneParams};
use crate::receive::{receive_volume, ReceiveMode, ReceiveParams};
use crate::send::{send_volume, SendParams};
use crate::snapshot::{tick_name, tock_name, PrepState, Rotator};
use crate::transport::{DestType, Destination, Transport};
use humansize::{format_size, BINARY};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Program name used in paths and messages
pub const PROG_NAME: &str = "thinvault";

/// Archive tree directory on both the metadata root and the destination
pub const TOP_DIR: &str = "thinvault";

/// Local metadata root
pub const META_ROOT: &str = "/var/lib/thinvault";

/// Runtime scratch directory
pub const TMP_DIR: &str = "/tmp/thinvault";

/// Single-instance lockfile
pub const LOCK_PATH: &str = "/var/lock/thinvault";

/// Name of the default archive
pub const ARCHIVE_NAME: &str = "default";

/// Process-wide state threaded through the operations
pub struct Context {
    pub aset: ArchiveSet,
    pub tmpdir: PathBuf,
    pub unattended: bool,
    _lock: InstanceLock,
}

impl Context {
    /// Initialize process state: acquire the instance lock, rotate the
    /// scratch dir, and load the archive configuration.
    pub fn open(
        meta_root: &Path,
        tmpdir: &Path,
        lock_path: &Path,
        unattended: bool,
    ) -> Result<Self> {
        let lock = InstanceLock::acquire(lock_path)?;

        let old = tmpdir.with_file_name(format!(
            "{}-old",
            tmpdir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        ));
        if old.exists() {
            std::fs::remove_dir_all(&old).with_path(&old)?;
        }
        if tmpdir.exists() {
            std::fs::rename(tmpdir, &old).with_path(tmpdir)?;
        }
        std::fs::create_dir_all(tmpdir.join("rpc")).with_path(tmpdir)?;

        let aset = ArchiveSet::load(ARCHIVE_NAME, meta_root)?;
        Ok(Self {
            aset,
            tmpdir: tmpdir.to_path_buf(),
            unattended,
            _lock: lock,
        })
    }

    /// Destination of this archive
    fn destination(&self) -> Result<Destination> {
        let destsys = self
            .aset
            .destsys
            .as_deref()
            .ok_or_else(|| VaultError::config("Local configuration not found"))?;
        let mountpoint = self
            .aset
            .destmountpoint
            .as_deref()
            .ok_or_else(|| VaultError::config("Local configuration not found"))?;
        Destination::from_config(destsys, mountpoint)
    }

    /// Transport for this archive's destination
    fn transport(&self) -> Result<Transport> {
        Ok(Transport::new(self.destination()?, &self.tmpdir))
    }

    /// Destination mountpoint + destdir, normalized
    fn dest_path(&self) -> Result<String> {
        let mountpoint = self
            .aset
            .destmountpoint
            .as_deref()
            .ok_or_else(|| VaultError::config("Local configuration not found"))?;
        let mountpoint = mountpoint.trim_end_matches('/');
        Ok(if self.aset.destdir == "." {
            mountpoint.to_string()
        } else {
            format!("{}/{}", mountpoint, self.aset.destdir)
        })
    }

    /// Archive directory relative to `dest_path`
    fn archive_rel(&self) -> String {
        format!("{}/{}", TOP_DIR, self.aset.name)
    }

    /// Absolute archive directory on the destination
    fn archive_dir(&self) -> Result<String> {
        Ok(format!("{}/{}", self.dest_path()?, self.archive_rel()))
    }

    fn vgname(&self) -> Result<String> {
        self.aset
            .vgname
            .clone()
            .ok_or_else(|| VaultError::config("No volume group configured"))
    }

    fn poolname(&self) -> Result<String> {
        self.aset
            .poolname
            .clone()
            .ok_or_else(|| VaultError::config("No thin pool configured"))
    }

    /// Check the destination is mounted and carries the archive
    /// layout, then ship the helper program.
    fn prepare_dest(&self, transport: &Transport) -> Result<()> {
        let mountpoint = self
            .aset
            .destmountpoint
            .as_deref()
            .ok_or_else(|| VaultError::config("Local configuration not found"))?;
        let command = format!(
            "mountpoint -q '{mp}' && mkdir -p '{dir}' && cd '{dir}' && touch archive.dat",
            mp = mountpoint,
            dir = self.archive_dir()?,
        );
        transport
            .run(&command, None, None)
            .map_err(|_| VaultError::transport("Destination not ready to receive commands"))?;
        transport.ship_helper()
    }

    /// Filter the positional volume list against the configuration
    fn select_volumes(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            return self.aset.volume_names();
        }
        let mut selected = Vec::new();
        for name in requested {
            if self.aset.vols.contains_key(name) {
                selected.push(name.clone());
            } else {
                println!("Volume {} not configured; skipping.", name);
            }
        }
        selected
    }
}

/// Execute one CLI command
pub fn run(command: &Command, unattended: bool) -> Result<()> {
    let mut ctx = Context::open(
        Path::new(META_ROOT),
        Path::new(TMP_DIR),
        Path::new(LOCK_PATH),
        unattended,
    )?;
    dispatch(&mut ctx, command)
}

/// Dispatch a command against an open context
pub fn dispatch(ctx: &mut Context, command: &Command) -> Result<()> {
    match command {
        Command::Monitor { volumes } => monitor_send(ctx, volumes, true, false, false),
        Command::Send {
            tarfile,
            dedup,
            volumes,
        } => monitor_send(ctx, volumes, false, *tarfile, *dedup),
        Command::Add { volume } => {
            ctx.aset.add_volume(volume)?;
            println!("Volume {} added to archive config.", volume);
            Ok(())
        }
        Command::Delete { volume } => cmd_delete(ctx, volume),
        Command::List { volumes } => cmd_list(ctx, volumes),
        Command::Prune {
            session,
            all_before,
            volumes,
        } => cmd_prune(ctx, session, *all_before, volumes),
        Command::Receive {
            save_to,
            session,
            volume,
        } => cmd_receive(ctx, volume, session.as_deref(), Some(save_to)),
        Command::Verify { session, volume } => {
            cmd_receive(ctx, volume, session.as_deref(), None)
        }
        Command::Diff { remap, volume } => cmd_diff(ctx, volume, *remap),
        Command::ArchInit {
            source,
            dest,
            subdir,
            compression,
            chunk_factor,
        } => cmd_arch_init(
            ctx,
            source,
            dest,
            subdir.as_deref(),
            compression.as_deref(),
            *chunk_factor,
        ),
        Command::ArchDelete => cmd_arch_delete(ctx),
        Command::ArchDeduplicate => cmd_arch_dedup(ctx),
        Command::Version => {
            println!("{} version {}", PROG_NAME, env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Shared flow of `monitor` and `send`
fn monitor_send(
    ctx: &mut Context,
    requested: &[String],
    monitor_only: bool,
    tarfile: bool,
    dedup: bool,
) -> Result<()> {
    if !ctx.aset.initialized() {
        return Err(VaultError::config("Local configuration not found"));
    }
    let vgname = ctx.vgname()?;
    let poolname = ctx.poolname()?;
    let chunksize = ctx.aset.chunksize;
    let localtime = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();

    let dest = ctx.destination()?;
    lvm::check_tools(dest.desttype == DestType::Ssh)?;

    let transport = ctx.transport()?;
    if !monitor_only {
        ctx.prepare_dest(&transport)?;
    }

    println!("Preparing snapshots...");
    let mut survey = lvm::survey()?;
    let rotator = Rotator::new(&vgname);
    let mut ready = Vec::new();
    let mut fresh = Vec::new();
    {
        let vg = survey
            .get(&vgname)
            .ok_or_else(|| VaultError::Lvm(format!("Volume group {} not present", vgname)))?;
        for name in ctx.select_volumes(requested) {
            if !vg.lvs.contains_key(&name) {
                warn!(volume = %name, "source volume does not exist");
                println!("Warning: {} does not exist!", name);
                continue;
            }
            let vol = &ctx.aset.vols[&name];
            rotator.recover(vol, vg)?;
            match rotator.prepare(vol, vg, monitor_only)? {
                PrepState::NewlyTracked => fresh.push(name),
                PrepState::Ready => ready.push(name),
            }
        }
    }
    // snapshots were created above; refresh the survey
    survey = lvm::survey()?;
    let vg = survey
        .get(&vgname)
        .ok_or_else(|| VaultError::Lvm(format!("Volume group {} not present", vgname)))?
        .clone();

    if monitor_only {
        fresh.clear();
    }
    if ready.is_empty() && fresh.is_empty() {
        return Err(VaultError::NoWork("No new data.".to_string()));
    }

    // One metadata reservation covers all per-volume deltas.
    let mut deltas: BTreeMap<String, String> = BTreeMap::new();
    if !ready.is_empty() {
        println!("Acquiring deltas.");
        lvm::reserve_metadata_snap(&vgname, &poolname)?;
        let mut failure: Option<VaultError> = None;
        for name in &ready {
            let tick = vg.lvs.get(&tick_name(name));
            let tock = vg.lvs.get(&tock_name(name));
            match (tick, tock) {
                (Some(tick), Some(tock)) => {
                    match lvm::thin_delta(&vgname, &poolname, &tick.thin_id, &tock.thin_id) {
                        Ok(xml) => {
                            deltas.insert(name.clone(), xml);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                _ => {
                    failure = Some(VaultError::SnapshotState {
                        volume: name.clone(),
                        message: "snapshot pair missing after prepare".to_string(),
                    });
                    break;
                }
            }
        }
        lvm::release_metadata_snap(&vgname, &poolname, failure.is_none())?;
        if let Some(e) = failure {
            return Err(e);
        }
    }

    let mut dedup_idx = if dedup && !monitor_only {
        println!("Building deduplication index...");
        let mut idx = DedupIndex::create(&ctx.tmpdir.join("hashindex.dat"), ctx.aset.vols.len())?;
        idx.build_from_manifests(&ctx.aset.allsessions, &ctx.aset.path)?;
        println!("  {} chunks indexed.", idx.len());
        Some(idx)
    } else {
        None
    };

    let dest_path = ctx.dest_path()?;
    let archive_rel = ctx.archive_rel();
    if !monitor_only {
        println!("\nSending backup session {} to {}", localtime, dest_path);
    }

    for name in ready.iter().chain(fresh.iter()) {
        println!("\nVolume : {}", name);
        let (has_sessions, mapfile) = {
            let vol = &ctx.aset.vols[name];
            (!vol.sesnames.is_empty(), vol.mapfile())
        };
        let tock = vg.lvs.get(&tock_name(name)).ok_or_else(|| {
            VaultError::SnapshotState {
                volume: name.clone(),
                message: "current snapshot missing".to_string(),
            }
        })?;
        let snap2size = tock.lv_size;

        let mut map_updated = false;
        if has_sessions {
            if let Some(xml) = deltas.get(name) {
                if monitor_only {
                    print!("Updating block change map. ");
                }
                let map = DeltaMap::new(&mapfile);
                let mut handle = map.begin_update(map_bytes(snap2size, chunksize))?;
                let stats = translate_delta(xml, &mut handle, chunksize)?;
                handle.flush()?;
                map_updated = stats.changed();
                if monitor_only {
                    if stats.changed() {
                        println!(
                            "{} changed, {} discarded.",
                            format_size(stats.new_bytes, BINARY),
                            format_size(stats.freed_bytes, BINARY)
                        );
                    } else {
                        println!("No changes.");
                    }
                }
            }
        }

        if monitor_only {
            let vol = &ctx.aset.vols[name];
            rotator.finalize_monitor(vol, map_updated)?;
        } else {
            let params = SendParams {
                transport: &transport,
                source_dev: PathBuf::from(format!("/dev/{}/{}", vgname, tock_name(name))),
                dest_path: &dest_path,
                archive_rel: &archive_rel,
                localtime: &localtime,
                tarfile,
                attended: !ctx.unattended,
                workers: num_cpus::get(),
            };
            let sent = send_volume(&mut ctx.aset, name, snap2size, dedup_idx.as_mut(), &params)?;
            let vol = &ctx.aset.vols[name];
            rotator.finalize_send(vol, sent, chunksize)?;
        }
    }
    Ok(())
}

fn cmd_list(ctx: &Context, volumes: &[String]) -> Result<()> {
    if volumes.is_empty() {
        println!("Configured volumes:\n");
        for name in ctx.aset.volume_names() {
            println!("  {}", name);
        }
        return Ok(());
    }
    for name in ctx.select_volumes(volumes) {
        println!("Sessions for volume {}:", name);
        let vol = &ctx.aset.vols[&name];
        let mut month = "";
        let mut column = 0;
        for sname in &vol.sesnames {
            let stamp = &sname[2..];
            if &stamp[..6] != month {
                if !month.is_empty() {
                    println!();
                }
                month = &stamp[..6];
                column = 0;
            }
            let tag = if vol.sessions[sname].format == crate::archive::SessionFormat::Tar {
                " (tar)"
            } else {
                ""
            };
            print!("  {}{}", stamp, tag);
            column += 1;
            if column % 5 == 0 {
                println!();
            }
        }
        println!();
    }
    Ok(())
}

fn cmd_delete(ctx: &mut Context, volume: &str) -> Result<()> {
    if !ctx.unattended {
        println!(
            "Warning! Delete will remove ALL metadata AND archived data for volume {}",
            volume
        );
        if !confirm("Are you sure? [y/N]: ")? {
            return Ok(());
        }
    }
    println!("\nDeleting volume {} from archive.", volume);
    let transport = ctx.transport()?;
    ctx.prepare_dest(&transport)?;
    transport.run(
        &format!(
            "cd '{dir}' && rm -rf '{vol}' && sync -f .",
            dir = ctx.archive_dir()?,
            vol = volume,
        ),
        None,
        None,
    )?;
    let vgname = ctx.vgname()?;
    let survey = lvm::survey().unwrap_or_default();
    if let Some(vg) = survey.get(&vgname) {
        for snap in [tick_name(volume), tock_name(volume)] {
            if vg.lvs.contains_key(&snap) {
                lvm::remove_lv(&vgname, &snap)?;
                println!("Removed snapshot {}/{}", vgname, snap);
            }
        }
    }
    ctx.aset.delete_volume(volume)
}

fn cmd_prune(ctx: &mut Context, session: &str, all_before: bool, volumes: &[String]) -> Result<()> {
    let times = parse_session_arg(session);
    if times.is_empty() {
        return Err(VaultError::config("Must specify --session for prune"));
    }
    let transport = ctx.transport()?;
    ctx.prepare_dest(&transport)?;
    let archive_dir = ctx.archive_dir()?;
    let tmpdir = ctx.tmpdir.clone();
    let unattended = ctx.unattended;
    for name in ctx.select_volumes(volumes) {
        let params = PruneParams {
            transport: &transport,
            archive_dir: &archive_dir,
            tmpdir: &tmpdir,
            unattended,
            all_before,
        };
        prune_sessions(&mut ctx.aset, &name, &times, &params)?;
    }
    Ok(())
}

fn cmd_receive(
    ctx: &mut Context,
    volume: &str,
    session: Option<&str>,
    save_to: Option<&PathBuf>,
) -> Result<()> {
    let transport = ctx.transport()?;
    ctx.prepare_dest(&transport)?;
    if let Some(path) = save_to {
        if path.exists() && !ctx.unattended {
            println!(
                "\n!! This will erase all existing data in {} !!",
                path.display()
            );
            if !confirm("   Are you sure? [y/N]: ")? {
                return Ok(());
            }
        }
    }
    let survey = lvm::survey().unwrap_or_default();
    let archive_dir = ctx.archive_dir()?;
    let vgname = ctx.vgname()?;
    let poolname = ctx.poolname()?;
    let tmpdir = ctx.tmpdir.clone();
    let params = ReceiveParams {
        transport: &transport,
        archive_dir: &archive_dir,
        tmpdir: &tmpdir,
        vgname: &vgname,
        poolname: &poolname,
        survey: &survey,
        attended: !ctx.unattended,
    };
    let mode = match save_to {
        Some(path) => ReceiveMode::Save { path },
        None => ReceiveMode::Verify,
    };
    receive_volume(&ctx.aset, volume, session, mode, &params)
}

fn cmd_diff(ctx: &mut Context, volume: &str, remap: bool) -> Result<()> {
    let transport = ctx.transport()?;
    ctx.prepare_dest(&transport)?;
    let survey = lvm::survey()?;
    let archive_dir = ctx.archive_dir()?;
    let vgname = ctx.vgname()?;
    let poolname = ctx.poolname()?;
    let tmpdir = ctx.tmpdir.clone();
    let params = ReceiveParams {
        transport: &transport,
        archive_dir: &archive_dir,
        tmpdir: &tmpdir,
        vgname: &vgname,
        poolname: &poolname,
        survey: &survey,
        attended: !ctx.unattended,
    };
    receive_volume(
        &mut ctx.aset,
        volume,
        None,
        ReceiveMode::Diff { remap },
        &params,
    )
}

fn cmd_arch_init(
    ctx: &mut Context,
    source: &str,
    dest: &str,
    subdir: Option<&str>,
    compression: Option<&str>,
    chunk_factor: Option<u64>,
) -> Result<()> {
    if ctx.aset.initialized() {
        return Err(VaultError::config(format!(
            "Archive already initialized for {}",
            ctx.aset.name
        )));
    }
    let (vgname, poolname) = parse_source(source)?;
    if !lvm::vg_exists(&vgname) {
        println!("Warning: Volume group '{}' does not exist.", vgname);
    }
    let destination = Destination::parse(dest)?;

    ctx.aset.vgname = Some(vgname);
    ctx.aset.poolname = Some(poolname);
    ctx.aset.destsys = Some(destination.destsys());
    ctx.aset.destmountpoint = Some(destination.mountpoint);

    if let Some(subdir) = subdir {
        let subdir = subdir.trim();
        if subdir.starts_with('/') {
            return Err(VaultError::config("Subdir cannot be an absolute path"));
        }
        ctx.aset.destdir = subdir.to_string();
    }
    if let Some(spec) = compression {
        let (algorithm, level) = parse_compression(spec)?;
        ctx.aset.compression = algorithm;
        ctx.aset.compr_level = level;
    }
    if let Some(factor) = chunk_factor {
        ctx.aset.chunksize = chunk_size_from_factor(factor)?;
        if ctx.aset.chunksize > 256 * 1024 {
            println!("Large chunk size set: {}", ctx.aset.chunksize);
        }
    }
    ctx.aset.save_conf()?;
    println!("Archive initialized.");
    Ok(())
}

fn cmd_arch_delete(ctx: &mut Context) -> Result<()> {
    if !ctx.unattended {
        println!(
            "Warning! This will remove ALL metadata AND archived data, \
             leaving only the configuration!"
        );
        if !confirm("Are you sure? [y/N]: ")? {
            return Ok(());
        }
    }
    for name in ctx.aset.volume_names() {
        ctx.aset.delete_volume(&name)?;
    }
    println!("\nDeleting entire archive...");
    let transport = ctx.transport()?;
    transport.run(
        &format!(
            "cd '{dp}' && rm -rf '{rel}' && sync -f .",
            dp = ctx.dest_path()?,
            rel = ctx.archive_rel(),
        ),
        None,
        None,
    )
}

fn cmd_arch_dedup(ctx: &mut Context) -> Result<()> {
    let transport = ctx.transport()?;
    ctx.prepare_dest(&transport)?;
    println!("Building deduplication index...");
    let mut idx = DedupIndex::create(&ctx.tmpdir.join("hashindex.dat"), ctx.aset.vols.len())?;
    let pairs = idx.generate_link_list(&ctx.aset.allsessions, &ctx.aset.path)?;
    println!("  {} duplicate chunks found.", pairs.len());
    if pairs.is_empty() {
        return Ok(());
    }
    let listing_path = ctx.tmpdir.join("dedup.lst");
    std::fs::write(&listing_path, pairs.join("\n") + "\n").with_path(&listing_path)?;
    println!("Linking...");
    transport.run(
        &format!(
            "cd '{dir}' && {stage} && {helper}",
            dir = ctx.archive_dir()?,
            stage = transport.stage_listing(),
            helper = transport.helper_invocation("dedup"),
        ),
        Some(&listing_path),
        None,
    )
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_ctx(root: &TempDir) -> Context {
        Context::open(
            &root.path().join("meta"),
            &root.path().join("tmp"),
            &root.path().join("lock"),
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_context_rotates_scratch_dir() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("tmp")).unwrap();
        std::fs::write(root.path().join("tmp/stale"), "x").unwrap();
        let ctx = open_ctx(&root);
        assert!(ctx.tmpdir.join("rpc").exists());
        assert!(!ctx.tmpdir.join("stale").exists());
        assert!(root.path().join("tmp-old/stale").exists());
    }

    #[test]
    fn test_arch_init_then_reinit_fails() {
        let root = TempDir::new().unwrap();
        let mut ctx = open_ctx(&root);
        cmd_arch_init(
            &mut ctx,
            "vg00/pool0",
            &format!("internal:{}", root.path().join("dest").display()),
            Some("sub"),
            Some("zlib:6"),
            Some(2),
        )
        .unwrap();
        assert!(ctx.aset.initialized());
        assert_eq!(ctx.aset.chunksize, 128 * 1024);
        assert_eq!(ctx.aset.compr_level, 6);
        assert_eq!(ctx.aset.destdir, "sub");

        let err = cmd_arch_init(&mut ctx, "vg00/pool0", "internal:/x", None, None, None);
        assert!(err.is_err());
    }

    #[test]
    fn test_arch_init_rejects_absolute_subdir() {
        let root = TempDir::new().unwrap();
        let mut ctx = open_ctx(&root);
        let err = cmd_arch_init(
            &mut ctx,
            "vg00/pool0",
            "internal:/mnt/backup",
            Some("/abs"),
            None,
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_dest_path_normalization() {
        let root = TempDir::new().unwrap();
        let mut ctx = open_ctx(&root);
        ctx.aset.destmountpoint = Some("/mnt/backup/".to_string());
        ctx.aset.destsys = Some("internal:".to_string());
        assert_eq!(ctx.dest_path().unwrap(), "/mnt/backup");
        ctx.aset.destdir = "nested".to_string();
        assert_eq!(ctx.dest_path().unwrap(), "/mnt/backup/nested");
        assert_eq!(ctx.archive_rel(), "thinvault/default");
        assert_eq!(
            ctx.archive_dir().unwrap(),
            "/mnt/backup/nested/thinvault/default"
        );
    }

    #[test]
    fn test_select_volumes_filters_unknown() {
        let root = TempDir::new().unwrap();
        let mut ctx = open_ctx(&root);
        ctx.aset.destmountpoint = Some("/mnt".into());
        ctx.aset.destsys = Some("internal:".into());
        ctx.aset.vgname = Some("vg00".into());
        ctx.aset.poolname = Some("pool0".into());
        ctx.aset.save_conf().unwrap();
        ctx.aset.add_volume("root").unwrap();
        ctx.aset = ArchiveSet::load(ARCHIVE_NAME, &root.path().join("meta")).unwrap();

        assert_eq!(ctx.select_volumes(&[]), vec!["root".to_string()]);
        assert_eq!(
            ctx.select_volumes(&["root".to_string(), "ghost".to_string()]),
            vec!["root".to_string()]
        );
    }

    #[test]
    fn test_version_dispatch() {
        let root = TempDir::new().unwrap();
        let mut ctx = open_ctx(&root);
        dispatch(&mut ctx, &Command::Version).unwrap();
    }
}
