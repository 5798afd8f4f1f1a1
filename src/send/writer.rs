//! Session writer
//!
//! Streams one backup session to the destination: iterate the chunks
//! flagged in the delta map (plus any tail beyond the previous volume
//! size), compress and hash them on the worker pool, and emit a
//! manifest and a tar stream in strictly ascending address order.
//! The destination rename of `<session>-tmp` to `<session>` followed
//! by `volinfo-tmp` to `volinfo` is the commit point; nothing is
//! renamed on failure and the `-tmp` remnants drive recovery.

use crate::archive::set::SessionRef;
use crate::archive::{session_name, SessionFormat, ZERO_HASH};
use crate::archive::ArchiveSet;
use crate::chunk::{chunk_rel_path, format_address, last_chunk_addr};
use crate::dedup::{link_session_dir, DedupIndex};
use crate::delta::DeltaMap;
use crate::error::{IoResultExt, Result, VaultError};
use crate::progress::ProgressReporter;
use crate::send::pool::{CompressPool, SendEntry};
use crate::transport::Transport;
use humansize::{format_size, BINARY};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin};
use std::time::Duration;
use tracing::info;

/// Seconds to wait for the destination stream to close
const CLOSE_WAIT_SECS: u64 = 30;

/// Grace period before terminating a hung stream
const CLOSE_GRACE_SECS: u64 = 5;

/// Per-send inputs resolved by the orchestrator
pub struct SendParams<'a> {
    pub transport: &'a Transport,
    /// Path of the `.tock` snapshot device to read chunks from
    pub source_dev: PathBuf,
    /// Normalized destination mountpoint + destdir
    pub dest_path: &'a str,
    /// Archive directory relative to `dest_path`
    pub archive_rel: &'a str,
    pub localtime: &'a str,
    pub tarfile: bool,
    pub attended: bool,
    pub workers: usize,
}

struct Stream {
    child: Child,
    builder: tar::Builder<ChildStdin>,
}

fn stream_err(e: std::io::Error) -> VaultError {
    VaultError::transport(format!("tar stream: {}", e))
}

/// Send one volume's changed chunks as a new session. Returns true if
/// a stream was shipped (false means no chunk qualified and nothing
/// was committed).
pub fn send_volume(
    aset: &mut ArchiveSet,
    volname: &str,
    snap2size: u64,
    mut dedup: Option<&mut DedupIndex>,
    params: &SendParams<'_>,
) -> Result<bool> {
    let chunksize = aset.chunksize;
    let level = aset.compr_level;
    let bksession = session_name(params.localtime);
    let lchunk = if snap2size == 0 {
        0
    } else {
        last_chunk_addr(snap2size, chunksize)
    };

    let (send_all, prior_size, vol_path) = {
        let vol = aset
            .vols
            .get(volname)
            .ok_or_else(|| VaultError::config(format!("Volume {} not configured", volname)))?;
        (vol.sesnames.is_empty(), vol.volsize, vol.path.clone())
    };

    let format = if params.tarfile {
        SessionFormat::Tar
    } else {
        SessionFormat::Folders
    };
    if let Some(vol) = aset.vols.get_mut(volname) {
        vol.new_session(&bksession, params.localtime, snap2size, format);
    }
    let ses_index = aset.register_session(SessionRef {
        volume: volname.to_string(),
        session: bksession.clone(),
        localtime: params.localtime.to_string(),
    }) as u32;
    let sessions = aset.allsessions.clone();
    let current = sessions[ses_index as usize].clone();

    let sdir_tmp = vol_path.join(format!("{}-tmp", bksession));
    std::fs::create_dir_all(&sdir_tmp).with_path(&sdir_tmp)?;

    // Everything at or above this address is sent unconditionally;
    // below it only flagged chunks go.
    let sendall_addr = if send_all {
        0
    } else {
        let next_chunk = last_chunk_addr(prior_size, chunksize) + chunksize;
        if prior_size > snap2size {
            println!("  Volume size has shrunk.");
            snap2size + 1
        } else if snap2size - 1 >= next_chunk {
            println!("  Volume size has increased.");
            next_chunk
        } else {
            snap2size + 1
        }
    };

    let map = if send_all {
        None
    } else {
        Some(DeltaMap::new(vol_path.join("deltamap")).open_tmp()?)
    };

    let manifest_path = sdir_tmp.join("manifest");
    let mut manifest = BufWriter::new(File::create(&manifest_path).with_path(&manifest_path)?);
    let mut source = File::open(&params.source_dev).with_path(&params.source_dev)?;

    let stream_cmd = stream_command(params, volname, &bksession);
    let mut stream: Option<Stream> = None;
    let mut pool = CompressPool::new(params.workers, level);
    let progress = if params.attended {
        ProgressReporter::new(snap2size)
    } else {
        ProgressReporter::disabled(snap2size)
    };

    let mut bcount: u64 = 0;
    let mut ddbytes: u64 = 0;

    let mut addr = 0u64;
    while addr < snap2size {
        let chunk = addr / chunksize;
        let flagged = map.as_ref().map(|m| m.get(chunk)).unwrap_or(false);
        if addr >= sendall_addr || flagged {
            if stream.is_none() {
                stream = Some(start_stream(params.transport, &stream_cmd)?);
            }
            let len = chunksize.min(snap2size - addr) as usize;
            let mut buf = vec![0u8; len];
            source
                .seek(SeekFrom::Start(addr))
                .with_path(&params.source_dev)?;
            source.read_exact(&mut buf).with_path(&params.source_dev)?;
            progress.set_position(addr);
            progress.set_message(format_size(bcount, BINARY));

            let entries = if addr < lchunk && buf.iter().all(|&b| b == 0) {
                pool.submit_zero(addr)?
            } else {
                pool.submit(addr, buf)?
            };
            emit_entries(
                entries,
                &mut manifest,
                stream.as_mut(),
                dedup.as_deref_mut(),
                &sessions,
                &current,
                ses_index,
                volname,
                &bksession,
                &mut bcount,
                &mut ddbytes,
            )?;
        }
        addr += chunksize;
    }
    let entries = pool.drain()?;
    emit_entries(
        entries,
        &mut manifest,
        stream.as_mut(),
        dedup.as_deref_mut(),
        &sessions,
        &current,
        ses_index,
        volname,
        &bksession,
        &mut bcount,
        &mut ddbytes,
    )?;
    manifest.flush().with_path(&manifest_path)?;
    drop(manifest);
    progress.finish();

    let mut stream = match stream {
        Some(stream) => stream,
        None => {
            // nothing qualified; leave the archive untouched
            std::fs::remove_dir_all(&sdir_tmp).with_path(&sdir_tmp)?;
            if let Some(vol) = aset.vols.get_mut(volname) {
                vol.abort_session(&bksession);
            }
            aset.unregister_session(volname, &bksession);
            println!("  No changes.");
            return Ok(false);
        }
    };

    println!(
        "  100%  {}{}",
        format_size(bcount, BINARY),
        if ddbytes > 0 {
            format!("  ({} deduplicated)", format_size(ddbytes, BINARY))
        } else {
            String::new()
        }
    );

    // Append session metadata, volume info and the archive config to
    // the stream before closing it.
    let conf_path = aset.conf_path().to_path_buf();
    {
        let vol = aset
            .vols
            .get_mut(volname)
            .ok_or_else(|| VaultError::config(format!("Volume {} not configured", volname)))?;
        if let Some(ses) = vol.sessions.get(&bksession) {
            ses.save_info()?;
        }
        let queued: Vec<String> = if vol.que_meta_update {
            vol.sesnames
                .iter()
                .filter(|s| *s != &bksession)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        for sname in queued {
            stream
                .builder
                .append_dir_all(format!("{}/{}", volname, sname), vol.path.join(&sname))
                .map_err(stream_err)?;
        }
        stream
            .builder
            .append_dir_all(format!("{}/{}-tmp", volname, bksession), &sdir_tmp)
            .map_err(stream_err)?;
        vol.que_meta_update = false;
        vol.save_volinfo("volinfo-tmp")?;
        stream
            .builder
            .append_path_with_name(
                vol.path.join("volinfo-tmp"),
                format!("{}/volinfo-tmp", volname),
            )
            .map_err(stream_err)?;
        stream
            .builder
            .append_path_with_name(&conf_path, "archive.ini")
            .map_err(stream_err)?;
    }

    close_stream(stream)?;

    // Destination commit, then the same renames locally.
    let archive_dir = format!("{}/{}", params.dest_path, params.archive_rel);
    let commit_cmd = format!(
        "cd '{dir}' && touch .set && mv '{vol}/{ses}-tmp' '{vol}/{ses}' \
         && mv '{vol}/volinfo-tmp' '{vol}/volinfo' && sync -f '{vol}/volinfo'",
        dir = archive_dir,
        vol = volname,
        ses = bksession,
    );
    params.transport.run(&commit_cmd, None, None)?;

    let committed = vol_path.join(&bksession);
    std::fs::rename(&sdir_tmp, &committed).with_path(&sdir_tmp)?;
    if let Some(vol) = aset.vols.get_mut(volname) {
        if let Some(ses) = vol.sessions.get_mut(&bksession) {
            ses.path = committed;
        }
        let volinfo_tmp = vol.path.join("volinfo-tmp");
        std::fs::rename(&volinfo_tmp, vol.path.join("volinfo")).with_path(&volinfo_tmp)?;
        vol.volsize = snap2size;
    }
    info!(volume = %volname, session = %bksession, bytes = bcount, "session committed");
    Ok(true)
}

fn stream_command(params: &SendParams<'_>, volname: &str, bksession: &str) -> String {
    let session_rel = format!("{}/{}/{}-tmp", params.archive_rel, volname, bksession);
    let archive_dir = format!("{}/{}", params.dest_path, params.archive_rel);
    if params.tarfile {
        format!(
            "cd '{dp}' && mkdir -p '{rel}' && cd '{dir}' && rm -f .set \
             && cat >'{vol}/{ses}-tmp/{ses}.tar'",
            dp = params.dest_path,
            rel = session_rel,
            dir = archive_dir,
            vol = volname,
            ses = bksession,
        )
    } else {
        format!(
            "cd '{dp}' && mkdir -p '{rel}' && cd '{dir}' && rm -f .set \
             && tar -xmf - && sync -f '{vol}'",
            dp = params.dest_path,
            rel = session_rel,
            dir = archive_dir,
            vol = volname,
        )
    }
}

fn start_stream(transport: &Transport, command: &str) -> Result<Stream> {
    let mut child = transport.spawn(command)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| VaultError::transport("destination stream has no stdin"))?;
    Ok(Stream {
        child,
        builder: tar::Builder::new(stdin),
    })
}

/// End the tar stream and wait for the destination to finish
/// consuming it; a stream that will not close is terminated and the
/// send fails without committing.
fn close_stream(stream: Stream) -> Result<()> {
    let Stream { mut child, builder } = stream;
    let stdin = builder.into_inner().map_err(stream_err)?;
    drop(stdin);

    let mut status = None;
    for _ in 0..CLOSE_WAIT_SECS {
        if let Some(s) = child.try_wait().map_err(|e| VaultError::transport(e.to_string()))? {
            status = Some(s);
            break;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    if status.is_none() {
        std::thread::sleep(Duration::from_secs(CLOSE_GRACE_SECS));
        status = child
            .try_wait()
            .map_err(|e| VaultError::transport(e.to_string()))?;
    }
    match status {
        Some(status) if status.success() => Ok(()),
        Some(status) => Err(VaultError::transport(format!(
            "destination stream exited with {}",
            status
        ))),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(VaultError::StreamTimeout(CLOSE_WAIT_SECS))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_entries(
    entries: Vec<SendEntry>,
    manifest: &mut BufWriter<File>,
    stream: Option<&mut Stream>,
    mut dedup: Option<&mut DedupIndex>,
    sessions: &[SessionRef],
    current: &SessionRef,
    ses_index: u32,
    volname: &str,
    bksession: &str,
    bcount: &mut u64,
    ddbytes: &mut u64,
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let stream = match stream {
        Some(stream) => stream,
        None => return Err(VaultError::transport("chunk emitted before stream start")),
    };
    for entry in entries {
        match entry {
            SendEntry::Zero(addr) => {
                writeln!(manifest, "{} {}", ZERO_HASH, format_address(addr))
                    .map_err(|e| VaultError::Manifest(e.to_string()))?;
            }
            SendEntry::Packed(packed) => {
                writeln!(
                    manifest,
                    "{} {}",
                    hex::encode(packed.hash),
                    format_address(packed.addr)
                )
                .map_err(|e| VaultError::Manifest(e.to_string()))?;

                let mut link_target = None;
                if let Some(idx) = dedup.as_deref_mut() {
                    match idx.lookup(&packed.hash)? {
                        Some((dd_idx, dd_addr)) => {
                            let dd = &sessions[dd_idx as usize];
                            link_target = Some(format!(
                                "{}/{}/{}",
                                dd.volume,
                                link_session_dir(dd, Some(current)),
                                chunk_rel_path(dd_addr)
                            ));
                        }
                        None => {
                            idx.insert(&packed.hash, ses_index, packed.addr)?;
                        }
                    }
                }

                let entry_path = format!(
                    "{}/{}-tmp/{}",
                    volname,
                    bksession,
                    chunk_rel_path(packed.addr)
                );
                match link_target {
                    Some(target) => {
                        let mut header = tar::Header::new_gnu();
                        header.set_entry_type(tar::EntryType::Link);
                        header.set_size(0);
                        header.set_mode(0o644);
                        stream
                            .builder
                            .append_link(&mut header, Path::new(&entry_path), Path::new(&target))
                            .map_err(stream_err)?;
                        *ddbytes += packed.payload.len() as u64;
                    }
                    None => {
                        let mut header = tar::Header::new_gnu();
                        header.set_size(packed.payload.len() as u64);
                        header.set_mode(0o644);
                        header.set_mtime(0);
                        stream
                            .builder
                            .append_data(&mut header, Path::new(&entry_path), &packed.payload[..])
                            .map_err(stream_err)?;
                        *bcount += packed.payload.len() as u64;
                    }
                }
            }
        }
    }
    Ok(())
}
