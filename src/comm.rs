//! Message passing between mesh partitions.
//!
//! Parallelism is across partitions, one per process (or per thread for [`ThreadComm`]).
//! Every exchange is a blocking collective: all ranks must call the same collectives in the
//! same order. The only required primitive is a personalized all-to-all exchange of bytes;
//! typed collectives are provided on top of it.

use bytemuck::Pod;
use std::error::Error;
use std::fmt;
use std::mem::size_of;
use std::sync::mpsc::{channel, Receiver, Sender};

#[cfg(feature = "mpi")]
mod mpi_comm;

#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Errors reported by a communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A collective was given the wrong number of per-rank buffers.
    BufferCount { expected: usize, actual: usize },
    /// A received buffer could not be interpreted as the expected element type.
    Malformed { peer: usize },
    /// The peer is no longer participating in collectives.
    Disconnected { peer: usize },
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferCount { expected, actual } => {
                write!(f, "expected one buffer per rank ({expected}), got {actual}")
            }
            Self::Malformed { peer } => write!(f, "received malformed buffer from rank {peer}"),
            Self::Disconnected { peer } => write!(f, "rank {peer} disconnected"),
        }
    }
}

impl Error for CommError {}

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Collective personalized exchange.
    ///
    /// `outgoing[r]` is delivered to rank `r`. The returned vector holds, at index `r`, the
    /// buffer rank `r` sent to this rank. Buffers may be empty.
    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError>;

    /// Terminates every partition.
    fn abort(&self, code: i32) -> !;

    fn is_parallel(&self) -> bool {
        self.size() > 1
    }

    fn all_to_all<T: Pod>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, CommError> {
        if outgoing.len() != self.size() {
            return Err(CommError::BufferCount {
                expected: self.size(),
                actual: outgoing.len(),
            });
        }
        let outgoing = outgoing
            .iter()
            .map(|buffer| bytemuck::cast_slice::<T, u8>(buffer).to_vec())
            .collect();
        let incoming = self.all_to_all_bytes(outgoing)?;
        incoming
            .into_iter()
            .enumerate()
            .map(|(peer, bytes)| decode(&bytes).ok_or(CommError::Malformed { peer }))
            .collect()
    }

    /// Gathers one value from every rank, ordered by rank.
    fn all_gather<T: Pod>(&self, value: T) -> Result<Vec<T>, CommError> {
        let incoming = self.all_to_all(vec![vec![value]; self.size()])?;
        incoming
            .into_iter()
            .enumerate()
            .map(|(peer, values)| match values.as_slice() {
                [value] => Ok(*value),
                _ => Err(CommError::Malformed { peer }),
            })
            .collect()
    }

    /// Gathers a variable-length slice from every rank, ordered by rank.
    fn all_gather_varcount<T: Pod>(&self, values: &[T]) -> Result<Vec<Vec<T>>, CommError> {
        self.all_to_all(vec![values.to_vec(); self.size()])
    }

    fn sum(&self, value: usize) -> Result<usize, CommError> {
        Ok(self.all_gather(value)?.into_iter().sum())
    }

    /// The sum of `value` over all ranks lower than this one.
    fn exclusive_prefix_sum(&self, value: usize) -> Result<usize, CommError> {
        Ok(self.all_gather(value)?[..self.rank()].iter().sum())
    }

    /// Agrees on failure: returns the lowest rank that reported `failed`, if any.
    fn first_failed_rank(&self, failed: bool) -> Result<Option<usize>, CommError> {
        let flags = self.all_gather(u8::from(failed))?;
        Ok(flags.iter().position(|&flag| flag != 0))
    }
}

fn decode<T: Pod>(bytes: &[u8]) -> Option<Vec<T>> {
    let n = size_of::<T>();
    if n == 0 || bytes.len() % n != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(n)
            .map(bytemuck::pod_read_unaligned)
            .collect(),
    )
}

/// A single partition: every collective is local.
#[derive(Debug, Copy, Clone, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if outgoing.len() != 1 {
            return Err(CommError::BufferCount {
                expected: 1,
                actual: outgoing.len(),
            });
        }
        Ok(outgoing)
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

/// In-process ranks connected by channels, one rank per thread.
///
/// Channels are unbounded, so sends never block and a collective completes as soon as every
/// rank has entered it.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
}

impl ThreadComm {
    /// Creates `size` connected communicators, indexed by rank.
    pub fn create(size: usize) -> Vec<Self> {
        let mut senders: Vec<Vec<_>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<_>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst_receivers in receivers.iter_mut() {
                let (tx, rx) = channel();
                senders[src].push(tx);
                dst_receivers.push(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| Self {
                rank,
                senders,
                receivers,
            })
            .collect()
    }

    /// Runs `f` on `size` ranks, each on its own thread, and returns the results by rank.
    ///
    /// A panic on any rank is propagated once all threads have finished.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadComm) -> R + Sync,
    {
        let comms = Self::create(size);
        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect()
        })
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if outgoing.len() != self.size() {
            return Err(CommError::BufferCount {
                expected: self.size(),
                actual: outgoing.len(),
            });
        }
        for (peer, buffer) in outgoing.into_iter().enumerate() {
            self.senders[peer]
                .send(buffer)
                .map_err(|_| CommError::Disconnected { peer })?;
        }
        self.receivers
            .iter()
            .enumerate()
            .map(|(peer, rx)| rx.recv().map_err(|_| CommError::Disconnected { peer }))
            .collect()
    }

    fn abort(&self, code: i32) -> ! {
        panic!("rank {} aborted with code {code}", self.rank)
    }
}
