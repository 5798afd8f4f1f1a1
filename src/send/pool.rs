//! Compress-and-hash worker pool
//!
//! A send has three participants: the chunk producer, this
//! compression/hash stage, and the destination stream consumer.
//! Workers run in parallel but results are consumed strictly in
//! submission (address) order, so manifest lines and tar entries are
//! never reordered.

use crate::compress::compress_chunk;
use crate::error::{Result, VaultError};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::thread::JoinHandle;

/// A compressed, hashed chunk ready for the stream
#[derive(Debug)]
pub struct PackedChunk {
    pub addr: u64,
    /// Compressed payload
    pub payload: Vec<u8>,
    /// SHA-256 over the compressed payload
    pub hash: [u8; 32],
}

struct Job {
    addr: u64,
    data: Vec<u8>,
    reply: Sender<Result<PackedChunk>>,
}

enum Pending {
    /// All-zero chunk recorded in the manifest without payload work
    Zero(u64),
    Job(Receiver<Result<PackedChunk>>),
}

/// An entry emitted by the pool in submission order
#[derive(Debug)]
pub enum SendEntry {
    /// Manifest-only zero chunk
    Zero(u64),
    /// A chunk with compressed payload
    Packed(PackedChunk),
}

/// Worker pool with an order-preserving output queue
pub struct CompressPool {
    task_tx: Option<Sender<Job>>,
    queue: VecDeque<Pending>,
    max_inflight: usize,
    workers: Vec<JoinHandle<()>>,
}

impl CompressPool {
    pub fn new(workers: usize, level: u32) -> Self {
        let workers = workers.max(1);
        let (task_tx, task_rx) = bounded::<Job>(workers * 2);
        let handles = (0..workers)
            .map(|_| {
                let task_rx = task_rx.clone();
                std::thread::spawn(move || {
                    for job in task_rx.iter() {
                        let packed = compress_chunk(&job.data, level).map(|payload| {
                            let hash: [u8; 32] = Sha256::digest(&payload).into();
                            PackedChunk {
                                addr: job.addr,
                                payload,
                                hash,
                            }
                        });
                        // receiver gone means the send already failed
                        let _ = job.reply.send(packed);
                    }
                })
            })
            .collect();
        Self {
            task_tx: Some(task_tx),
            queue: VecDeque::new(),
            max_inflight: workers * 2,
            workers: handles,
        }
    }

    /// Queue a chunk for compression. Returns entries that completed
    /// at the head of the queue, in order.
    pub fn submit(&mut self, addr: u64, data: Vec<u8>) -> Result<Vec<SendEntry>> {
        let (reply_tx, reply_rx) = bounded(1);
        let job = Job {
            addr,
            data,
            reply: reply_tx,
        };
        self.task_tx
            .as_ref()
            .ok_or_else(|| VaultError::transport("compress pool already drained"))?
            .send(job)
            .map_err(|_| VaultError::transport("compress pool worker died"))?;
        self.queue.push_back(Pending::Job(reply_rx));
        self.pop_ready(false)
    }

    /// Record an all-zero chunk, keeping it in address order with the
    /// compressed entries around it
    pub fn submit_zero(&mut self, addr: u64) -> Result<Vec<SendEntry>> {
        self.queue.push_back(Pending::Zero(addr));
        self.pop_ready(false)
    }

    /// Wait for every outstanding chunk and return the remainder in order
    pub fn drain(&mut self) -> Result<Vec<SendEntry>> {
        self.pop_ready(true)
    }

    fn pop_ready(&mut self, all: bool) -> Result<Vec<SendEntry>> {
        let mut out = Vec::new();
        loop {
            let over_limit = self.queue.len() > self.max_inflight;
            let front = match self.queue.pop_front() {
                Some(front) => front,
                None => break,
            };
            match front {
                Pending::Zero(addr) => out.push(SendEntry::Zero(addr)),
                Pending::Job(rx) => {
                    if all || over_limit {
                        let packed = rx
                            .recv()
                            .map_err(|_| VaultError::transport("compress pool worker died"))?;
                        out.push(SendEntry::Packed(packed?));
                    } else {
                        match rx.try_recv() {
                            Ok(packed) => out.push(SendEntry::Packed(packed?)),
                            Err(TryRecvError::Empty) => {
                                self.queue.push_front(Pending::Job(rx));
                                break;
                            }
                            Err(TryRecvError::Disconnected) => {
                                return Err(VaultError::transport(
                                    "compress pool worker died",
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl Drop for CompressPool {
    fn drop(&mut self) {
        self.task_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::decompress_chunk;

    #[test]
    fn test_results_preserve_submission_order() {
        let mut pool = CompressPool::new(4, 1);
        let mut emitted = Vec::new();
        for i in 0..64u64 {
            let data = vec![(i % 7) as u8; 8192];
            if i % 3 == 0 {
                emitted.extend(pool.submit_zero(i * 65536).unwrap());
            } else {
                emitted.extend(pool.submit(i * 65536, data).unwrap());
            }
        }
        emitted.extend(pool.drain().unwrap());
        assert_eq!(emitted.len(), 64);
        for (i, entry) in emitted.iter().enumerate() {
            let addr = match entry {
                SendEntry::Zero(addr) => *addr,
                SendEntry::Packed(p) => p.addr,
            };
            assert_eq!(addr, i as u64 * 65536);
        }
    }

    #[test]
    fn test_packed_payload_roundtrips() {
        let mut pool = CompressPool::new(2, 4);
        let data = b"some chunk payload".repeat(100);
        let mut entries = pool.submit(0, data.clone()).unwrap();
        entries.extend(pool.drain().unwrap());
        match entries.pop() {
            Some(SendEntry::Packed(packed)) => {
                let restored = decompress_chunk(&packed.payload, data.len()).unwrap();
                assert_eq!(restored, data);
                use sha2::{Digest, Sha256};
                let expect: [u8; 32] = Sha256::digest(&packed.payload).into();
                assert_eq!(packed.hash, expect);
            }
            other => panic!("expected packed entry, got {:?}", other),
        }
    }
}
