//! Receive, verify and diff
//!
//! Streams chunk files back from the archive in address order,
//! verifies the manifest hash over the compressed bytes, decompresses,
//! and either discards (verify), writes to a target volume or file
//! (save), or compares against the live snapshot (diff), optionally
//! remapping differing chunks into the delta map to resynchronize a
//! volume after external mutation or restore-from-older.

use crate::archive::{
    load_annotated, merge_newest_wins, session_name, validate_session_time, AnnotatedEntry,
    ArchiveSet, SessionFormat,
};
use crate::chunk::{chunk_rel_path, format_address, last_chunk_addr};
use crate::compress::decompress_chunk;
use crate::delta::DeltaMap;
use crate::error::{IoResultExt, Result, VaultError};
use crate::lvm::{self, VgSurvey};
use crate::progress::ProgressReporter;
use crate::snapshot::tick_name;
use crate::transport::Transport;
use sha2::{Digest, Sha256};
use std::fmt::Write as FmtWrite;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::info;

/// What to do with the reconstructed byte stream
pub enum ReceiveMode<'a> {
    /// Check hashes and lengths, discard payload
    Verify,
    /// Write the volume image to a path (file or block device)
    Save { path: &'a Path },
    /// Byte-compare against the live snapshot
    Diff { remap: bool },
}

/// Inputs resolved by the orchestrator
pub struct ReceiveParams<'a> {
    pub transport: &'a Transport,
    /// Archive directory on the destination (absolute)
    pub archive_dir: &'a str,
    pub tmpdir: &'a Path,
    pub vgname: &'a str,
    pub poolname: &'a str,
    pub survey: &'a VgSurvey,
    pub attended: bool,
}

/// Receive one volume at the given (or latest) session
pub fn receive_volume(
    aset: &ArchiveSet,
    volname: &str,
    select: Option<&str>,
    mode: ReceiveMode<'_>,
    params: &ReceiveParams<'_>,
) -> Result<()> {
    let chunksize = aset.chunksize;
    let (volsize, sesnames, vol_path, mapfile) = {
        let vol = aset
            .vols
            .get(volname)
            .ok_or_else(|| VaultError::config(format!("Volume {} not configured", volname)))?;
        (
            vol.volsize,
            vol.sesnames.clone(),
            vol.path.clone(),
            vol.mapfile(),
        )
    };
    if sesnames.is_empty() {
        return Err(VaultError::precondition("No sessions available"));
    }
    let select_ses = match select {
        Some(time) => {
            validate_session_time(time)?;
            let name = session_name(time);
            if !sesnames.contains(&name) {
                return Err(VaultError::BadSessionTime(format!(
                    "The specified session date-time does not exist: {}",
                    time
                )));
            }
            name
        }
        None => sesnames[sesnames.len() - 1].clone(),
    };

    println!("\nReading manifests");
    let lchunk = last_chunk_addr(volsize, chunksize);
    let mut annotated: Vec<AnnotatedEntry> = Vec::new();
    let mut include = false;
    for sname in sesnames.iter().rev() {
        if sname == &select_ses {
            include = true;
        } else if !include {
            continue;
        }
        let vol = &aset.vols[volname];
        if vol.sessions[sname].format == SessionFormat::Tar {
            return Err(VaultError::precondition(format!(
                "Receive from tarfile session not supported: {}",
                sname
            )));
        }
        annotated.extend(load_annotated(&vol.path.join(sname).join("manifest"), sname)?);
    }
    let merged: Vec<AnnotatedEntry> = merge_newest_wins(annotated)
        .into_iter()
        .filter(|e| e.addr <= lchunk)
        .collect();

    // Ship the source path list; the helper streams each file back as
    // a 4-byte big-endian size followed by the payload.
    let mut listing = String::new();
    for entry in &merged {
        let _ = writeln!(listing, "{}/{}", entry.session, chunk_rel_path(entry.addr));
    }
    let listing_path = params.tmpdir.join("receive.lst");
    std::fs::write(&listing_path, listing).with_path(&listing_path)?;
    params.transport.run(
        &format!(
            "cd '{dir}/{vol}' && {stage}",
            dir = params.archive_dir,
            vol = volname,
            stage = params.transport.stage_listing(),
        ),
        Some(&listing_path),
        None,
    )?;

    let mut sink = prepare_sink(&mode, aset, volname, volsize, &mapfile, params)?;

    println!("\nReceiving volume {} {}", volname, select_ses);
    let mut child = params.transport.spawn(&format!(
        "cd '{dir}/{vol}' && {helper}",
        dir = params.archive_dir,
        vol = volname,
        helper = params.transport.helper_invocation("receive"),
    ))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| VaultError::transport("receive stream has no stdout"))?;
    let mut stream = BufReader::new(stdout);

    let progress = if params.attended {
        ProgressReporter::new(volsize)
    } else {
        ProgressReporter::disabled(volsize)
    };

    let mut entries = merged.iter();
    let mut received: u64 = 0;
    let mut addr = 0u64;
    while addr < volsize {
        let faddr = format_address(addr);
        let entry = entries.next().ok_or_else(|| {
            VaultError::Manifest(format!("Missing manifest entry for {}", faddr))
        })?;
        if entry.addr != addr {
            return Err(VaultError::Manifest(format!(
                "Bad receive order: expected {}, manifest has {}",
                faddr,
                format_address(entry.addr)
            )));
        }
        progress.set_position(addr);

        let mut size_buf = [0u8; 4];
        stream
            .read_exact(&mut size_buf)
            .map_err(|e| VaultError::transport(format!("receive stream: {}", e)))?;
        let untrusted_size = u32::from_be_bytes(size_buf) as u64;
        let chunk_len = chunksize.min(volsize - addr);

        if entry.is_zero() {
            if untrusted_size != 0 {
                return Err(VaultError::bad_chunk(
                    &faddr,
                    format!(
                        "expected size 0, got {} from {}",
                        untrusted_size, entry.session
                    ),
                ));
            }
            apply_zero(&mut sink, addr, chunk_len, chunksize, &faddr, &mut received)?;
            addr += chunksize;
            continue;
        }

        // allow slight expansion from the compression envelope
        if untrusted_size < 1 || untrusted_size > chunksize + chunksize / 1024 {
            return Err(VaultError::bad_chunk(
                &faddr,
                format!("bad chunk size {}", untrusted_size),
            ));
        }
        let mut payload = vec![0u8; untrusted_size as usize];
        if let Err(e) = stream.read_exact(&mut payload) {
            dump_buffer(params.tmpdir, &payload);
            return Err(VaultError::transport(format!("receive stream: {}", e)));
        }
        let digest = hex::encode(Sha256::digest(&payload));
        if digest != entry.hash {
            dump_buffer(params.tmpdir, &payload);
            return Err(VaultError::HashMismatch {
                address: faddr,
                expected: entry.hash.clone(),
                actual: digest,
            });
        }
        let buf = match decompress_chunk(&payload, chunksize as usize) {
            Ok(buf) => buf,
            Err(e) => {
                dump_buffer(params.tmpdir, &payload);
                return Err(e);
            }
        };
        let expected_len = if addr == lchunk {
            volsize - lchunk
        } else {
            chunksize
        };
        if buf.len() as u64 != expected_len {
            dump_buffer(params.tmpdir, &payload);
            return Err(VaultError::bad_chunk(
                &faddr,
                format!("decompressed to {} bytes, expected {}", buf.len(), expected_len),
            ));
        }

        received += buf.len() as u64;
        apply_data(&mut sink, addr, &buf, chunksize, &faddr)?;
        addr += chunksize;
    }
    progress.finish();

    let status = child
        .wait()
        .map_err(|e| VaultError::transport(e.to_string()))?;
    if !status.success() {
        return Err(VaultError::transport(format!(
            "receive helper exited with {}",
            status
        )));
    }
    if received != volsize {
        return Err(VaultError::precondition(format!(
            "Received range {} does not match volume size {}",
            received, volsize
        )));
    }
    println!("100%");
    println!("Received byte range: {}", received);

    finish_sink(sink, aset, volname, &select_ses, &sesnames, &vol_path, params)?;
    info!(volume = %volname, session = %select_ses, "receive complete");
    Ok(())
}

/// Open destination state for the selected mode
enum Sink {
    Verify,
    Save {
        file: File,
        returned_home: bool,
    },
    Diff {
        cmp: File,
        map: Option<crate::delta::MapHandle>,
        diff_bytes: u64,
    },
}

fn prepare_sink(
    mode: &ReceiveMode<'_>,
    aset: &ArchiveSet,
    volname: &str,
    volsize: u64,
    mapfile: &Path,
    params: &ReceiveParams<'_>,
) -> Result<Sink> {
    match mode {
        ReceiveMode::Verify => Ok(Sink::Verify),
        ReceiveMode::Save { path } => {
            let save_path = *path;
            let mut returned_home = false;
            // an LV path under a known VG is auto-created or resized
            let vg = save_path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let lv = save_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if !vg.is_empty() && lvm::vg_exists(&vg) {
                returned_home = lv == volname && vg == params.vgname;
                let known = params
                    .survey
                    .get(&vg)
                    .map(|g| g.lvs.contains_key(&lv))
                    .unwrap_or(false);
                if !known {
                    if vg != params.vgname {
                        return Err(VaultError::config(
                            "Cannot auto-create volume: volume group does not match config",
                        ));
                    }
                    lvm::create_thin(&vg, params.poolname, &lv, volsize)?;
                } else if let Some(existing) = params.survey.get(&vg).and_then(|g| g.lvs.get(&lv))
                {
                    if existing.lv_size != volsize {
                        lvm::resize_lv(&save_path.to_string_lossy(), volsize)?;
                    }
                }
            }

            let is_block = std::fs::metadata(save_path)
                .map(|m| m.file_type().is_block_device())
                .unwrap_or(false);
            let file = if is_block {
                lvm::discard_device(&save_path.to_string_lossy())?;
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(save_path)
                    .with_path(save_path)?
            } else {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(save_path)
                    .with_path(save_path)?;
                file.set_len(volsize).with_path(save_path)?;
                file
            };
            println!("Saving to {}", save_path.display());
            Ok(Sink::Save {
                file,
                returned_home,
            })
        }
        ReceiveMode::Diff { remap } => {
            let vg = params
                .survey
                .get(params.vgname)
                .ok_or_else(|| VaultError::Lvm(format!("Volume group {} not present", params.vgname)))?;
            if !vg.lvs.contains_key(volname) {
                return Err(VaultError::precondition(
                    "Local volume must exist for diff",
                ));
            }
            let tick = tick_name(volname);
            let map = if *remap {
                if !vg.lvs.contains_key(&tick) {
                    lvm::create_snapshot(params.vgname, volname, &tick)?;
                    println!("  Initial snapshot created for {}", volname);
                }
                let map = DeltaMap::new(mapfile);
                let map_bytes = crate::chunk::map_bytes(volsize, aset.chunksize);
                if !map.exists() {
                    map.initialize(map_bytes)?;
                }
                Some(map.open_base(map_bytes)?)
            } else {
                None
            };
            let cmp_name = if vg.lvs.contains_key(&tick) {
                tick
            } else {
                println!(
                    "Snapshot '.tick' not available; comparing with source volume instead."
                );
                volname.to_string()
            };
            if map.is_none() {
                if let Some(lv) = vg.lvs.get(&cmp_name) {
                    if lv.lv_size != volsize {
                        return Err(VaultError::precondition(format!(
                            "Volume sizes differ:\n  Archive = {}\n  Local   = {}",
                            volsize, lv.lv_size
                        )));
                    }
                }
            }
            let cmp_path = PathBuf::from(format!("/dev/{}/{}", params.vgname, cmp_name));
            let cmp = File::open(&cmp_path).with_path(&cmp_path)?;
            Ok(Sink::Diff {
                cmp,
                map,
                diff_bytes: 0,
            })
        }
    }
}

fn apply_zero(
    sink: &mut Sink,
    addr: u64,
    chunk_len: u64,
    chunksize: u64,
    faddr: &str,
    received: &mut u64,
) -> Result<()> {
    *received += chunk_len;
    match sink {
        Sink::Verify => Ok(()),
        Sink::Save { file, .. } => {
            file.seek(SeekFrom::Start(addr + chunk_len))
                .map_err(|e| VaultError::bad_chunk(faddr, e.to_string()))?;
            Ok(())
        }
        Sink::Diff { .. } => {
            let zeros = vec![0u8; chunk_len as usize];
            diff_chunk(sink, addr, &zeros, chunksize, faddr, true)
        }
    }
}

fn apply_data(
    sink: &mut Sink,
    addr: u64,
    buf: &[u8],
    chunksize: u64,
    faddr: &str,
) -> Result<()> {
    match sink {
        Sink::Verify => Ok(()),
        Sink::Save { file, .. } => {
            file.seek(SeekFrom::Start(addr))
                .map_err(|e| VaultError::bad_chunk(faddr, e.to_string()))?;
            file.write_all(buf)
                .map_err(|e| VaultError::bad_chunk(faddr, e.to_string()))?;
            Ok(())
        }
        Sink::Diff { .. } => diff_chunk(sink, addr, buf, chunksize, faddr, false),
    }
}

fn diff_chunk(
    sink: &mut Sink,
    addr: u64,
    buf: &[u8],
    chunksize: u64,
    faddr: &str,
    zero: bool,
) -> Result<()> {
    if let Sink::Diff {
        cmp,
        map,
        diff_bytes,
    } = sink
    {
        let mut live = vec![0u8; buf.len()];
        cmp.seek(SeekFrom::Start(addr))
            .map_err(|e| VaultError::bad_chunk(faddr, e.to_string()))?;
        cmp.read_exact(&mut live)
            .map_err(|e| VaultError::bad_chunk(faddr, e.to_string()))?;
        if live != buf {
            println!("* delta {} {}", faddr, if zero { "Z" } else { "" });
            if let Some(handle) = map {
                handle.set(addr / chunksize);
            }
            *diff_bytes += buf.len() as u64;
        }
    }
    Ok(())
}

fn finish_sink(
    sink: Sink,
    aset: &ArchiveSet,
    volname: &str,
    select_ses: &str,
    sesnames: &[String],
    _vol_path: &Path,
    params: &ReceiveParams<'_>,
) -> Result<()> {
    match sink {
        Sink::Verify => Ok(()),
        Sink::Save {
            mut file,
            returned_home,
        } => {
            file.flush().map_err(VaultError::from)?;
            drop(file);
            if returned_home {
                // restoring over the configured source: re-baseline
                let tick = tick_name(volname);
                let has_tick = params
                    .survey
                    .get(params.vgname)
                    .map(|vg| vg.lvs.contains_key(&tick))
                    .unwrap_or(false);
                if !has_tick {
                    lvm::create_snapshot(params.vgname, volname, &tick)?;
                    println!("  Initial snapshot created for {}", volname);
                }
                if let Some(vol) = aset.vols.get(volname) {
                    let map = DeltaMap::new(vol.mapfile());
                    if !map.exists() {
                        map.initialize(vol.map_size(aset.chunksize, None))?;
                    }
                }
                if select_ses != sesnames[sesnames.len() - 1] {
                    println!(
                        "Restored from older session: volume may be out of sync with \
                         archive until 'diff --remap {}' is run!",
                        volname
                    );
                }
            }
            Ok(())
        }
        Sink::Diff {
            map, diff_bytes, ..
        } => {
            if let Some(handle) = map {
                handle.flush()?;
                println!("Delta bytes re-mapped: {}", diff_bytes);
                if diff_bytes > 0 {
                    println!("\nNext 'send' will bring this volume into sync.");
                }
                Ok(())
            } else if diff_bytes > 0 {
                Err(VaultError::precondition(format!(
                    "{} bytes differ",
                    diff_bytes
                )))
            } else {
                Ok(())
            }
        }
    }
}

fn dump_buffer(tmpdir: &Path, payload: &[u8]) {
    let path = tmpdir.join("bufdump");
    if std::fs::write(&path, payload).is_ok() {
        eprintln!("Offending buffer dumped to {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Manifest, ManifestEntry, ZERO_HASH};
    use crate::compress::compress_chunk;
    use crate::transport::{Destination, Transport};
    use tempfile::TempDir;

    const CHUNK: u64 = 65536;

    struct Rig {
        meta: TempDir,
        dest: TempDir,
        scratch: TempDir,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                meta: TempDir::new().unwrap(),
                dest: TempDir::new().unwrap(),
                scratch: TempDir::new().unwrap(),
            }
        }

        fn archive_dir(&self) -> PathBuf {
            self.dest.path().join("thinvault/default")
        }

        fn archive(&self) -> ArchiveSet {
            let mut aset = ArchiveSet::load("default", self.meta.path()).unwrap();
            aset.vgname = Some("vg00".into());
            aset.poolname = Some("pool0".into());
            aset.destsys = Some("internal:".into());
            aset.destmountpoint = Some(self.dest.path().to_string_lossy().to_string());
            aset.save_conf().unwrap();
            aset.add_volume("root").unwrap();
            ArchiveSet::load("default", self.meta.path()).unwrap()
        }

        fn transport(&self) -> Transport {
            let dest = Destination::parse(&format!(
                "internal:{}",
                self.dest.path().to_string_lossy()
            ))
            .unwrap();
            let transport = Transport::new(dest, self.scratch.path());
            transport.ship_helper().unwrap();
            transport
        }

        /// Seed one committed session whose chunk files hold real
        /// compressed payloads
        fn seed_session(
            &self,
            aset: &mut ArchiveSet,
            name: &str,
            volsize: u64,
            chunks: &[(u64, Option<Vec<u8>>)],
        ) {
            let localtime = name.trim_start_matches("S_").to_string();
            let vol = aset.vols.get_mut("root").unwrap();
            vol.new_session(name, &localtime, volsize, SessionFormat::Folders);
            let committed = vol.path.join(name);
            std::fs::create_dir_all(&committed).unwrap();
            let ses = vol.sessions.get_mut(name).unwrap();
            ses.path = committed.clone();
            ses.save_info().unwrap();

            let remote = self.archive_dir().join("root").join(name);
            std::fs::create_dir_all(&remote).unwrap();
            let mut entries = Vec::new();
            for (addr, data) in chunks {
                match data {
                    None => entries.push(ManifestEntry {
                        hash: ZERO_HASH.into(),
                        addr: *addr,
                    }),
                    Some(raw) => {
                        let payload = compress_chunk(raw, 4).unwrap();
                        let hash = hex::encode(Sha256::digest(&payload));
                        let chunk_file = remote.join(chunk_rel_path(*addr));
                        std::fs::create_dir_all(chunk_file.parent().unwrap()).unwrap();
                        std::fs::write(&chunk_file, &payload).unwrap();
                        entries.push(ManifestEntry { hash, addr: *addr });
                    }
                }
            }
            let manifest = Manifest { entries };
            manifest.save(&committed.join("manifest")).unwrap();
            manifest.save(&remote.join("manifest")).unwrap();
            vol.volsize = volsize;
            vol.save_volinfo("volinfo").unwrap();
        }
    }

    fn params<'a>(
        rig: &'a Rig,
        transport: &'a Transport,
        survey: &'a VgSurvey,
        archive_dir: &'a str,
    ) -> ReceiveParams<'a> {
        ReceiveParams {
            transport,
            archive_dir,
            tmpdir: rig.scratch.path(),
            vgname: "vg00",
            poolname: "pool0",
            survey,
            attended: false,
        }
    }

    #[test]
    fn test_verify_latest_session() {
        let rig = Rig::new();
        let mut aset = rig.archive();
        let transport = rig.transport();
        let data0 = vec![5u8; CHUNK as usize];
        let tail = vec![9u8; CHUNK as usize];
        rig.seed_session(
            &mut aset,
            "S_20240101-000000",
            3 * CHUNK,
            &[(0, Some(data0)), (CHUNK, None), (2 * CHUNK, Some(tail))],
        );
        let survey = VgSurvey::new();
        let dir = rig.archive_dir().to_string_lossy().to_string();
        let p = params(&rig, &transport, &survey, &dir);
        receive_volume(&aset, "root", None, ReceiveMode::Verify, &p).unwrap();
    }

    #[test]
    fn test_save_reconstructs_volume_across_sessions() {
        let rig = Rig::new();
        let mut aset = rig.archive();
        let transport = rig.transport();
        // first session: full volume
        let base0 = vec![1u8; CHUNK as usize];
        let base1 = vec![2u8; CHUNK as usize];
        rig.seed_session(
            &mut aset,
            "S_20240101-000000",
            2 * CHUNK,
            &[(0, Some(base0)), (CHUNK, Some(base1))],
        );
        // second session: chunk 1 rewritten
        let new1 = vec![7u8; CHUNK as usize];
        rig.seed_session(
            &mut aset,
            "S_20240102-000000",
            2 * CHUNK,
            &[(CHUNK, Some(new1.clone()))],
        );

        let survey = VgSurvey::new();
        let dir = rig.archive_dir().to_string_lossy().to_string();
        let p = params(&rig, &transport, &survey, &dir);
        let out = rig.scratch.path().join("restored.img");
        receive_volume(
            &aset,
            "root",
            None,
            ReceiveMode::Save { path: &out },
            &p,
        )
        .unwrap();

        let restored = std::fs::read(&out).unwrap();
        assert_eq!(restored.len(), 2 * CHUNK as usize);
        assert!(restored[..CHUNK as usize].iter().all(|&b| b == 1));
        assert_eq!(&restored[CHUNK as usize..], &new1[..]);
    }

    #[test]
    fn test_save_older_session_ignores_newer_chunks() {
        let rig = Rig::new();
        let mut aset = rig.archive();
        let transport = rig.transport();
        let base = vec![1u8; CHUNK as usize];
        rig.seed_session(&mut aset, "S_20240101-000000", CHUNK, &[(0, Some(base))]);
        let newer = vec![7u8; CHUNK as usize];
        rig.seed_session(&mut aset, "S_20240102-000000", CHUNK, &[(0, Some(newer))]);

        let survey = VgSurvey::new();
        let dir = rig.archive_dir().to_string_lossy().to_string();
        let p = params(&rig, &transport, &survey, &dir);
        let out = rig.scratch.path().join("older.img");
        receive_volume(
            &aset,
            "root",
            Some("20240101-000000"),
            ReceiveMode::Save { path: &out },
            &p,
        )
        .unwrap();
        let restored = std::fs::read(&out).unwrap();
        assert!(restored.iter().all(|&b| b == 1));
    }

    #[test]
    fn test_corrupt_chunk_fails_verify() {
        let rig = Rig::new();
        let mut aset = rig.archive();
        let transport = rig.transport();
        let data = vec![5u8; CHUNK as usize];
        rig.seed_session(&mut aset, "S_20240101-000000", CHUNK, &[(0, Some(data))]);

        // flip bytes in the stored chunk
        let chunk_file = rig
            .archive_dir()
            .join("root/S_20240101-000000")
            .join(chunk_rel_path(0));
        let mut payload = std::fs::read(&chunk_file).unwrap();
        payload[0] ^= 0xff;
        std::fs::write(&chunk_file, &payload).unwrap();

        let survey = VgSurvey::new();
        let dir = rig.archive_dir().to_string_lossy().to_string();
        let p = params(&rig, &transport, &survey, &dir);
        let err = receive_volume(&aset, "root", None, ReceiveMode::Verify, &p);
        assert!(matches!(err, Err(VaultError::HashMismatch { .. })));
    }

    #[test]
    fn test_unknown_session_rejected() {
        let rig = Rig::new();
        let mut aset = rig.archive();
        let transport = rig.transport();
        let data = vec![5u8; CHUNK as usize];
        rig.seed_session(&mut aset, "S_20240101-000000", CHUNK, &[(0, Some(data))]);
        let survey = VgSurvey::new();
        let dir = rig.archive_dir().to_string_lossy().to_string();
        let p = params(&rig, &transport, &survey, &dir);
        let err = receive_volume(
            &aset,
            "root",
            Some("20990101-000000"),
            ReceiveMode::Verify,
            &p,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_tar_session_rejected() {
        let rig = Rig::new();
        let mut aset = rig.archive();
        let transport = rig.transport();
        let data = vec![5u8; CHUNK as usize];
        rig.seed_session(&mut aset, "S_20240101-000000", CHUNK, &[(0, Some(data))]);
        aset.vols
            .get_mut("root")
            .unwrap()
            .sessions
            .get_mut("S_20240101-000000")
            .unwrap()
            .format = SessionFormat::Tar;
        let survey = VgSurvey::new();
        let dir = rig.archive_dir().to_string_lossy().to_string();
        let p = params(&rig, &transport, &survey, &dir);
        assert!(receive_volume(&aset, "root", None, ReceiveMode::Verify, &p).is_err());
    }
}
