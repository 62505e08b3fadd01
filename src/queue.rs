//! Request processing against the backing store.
//!
//! A host invokes [`Dispatch::queue_rq`] once per request, possibly from
//! several threads at once. Each call walks the request's segments in order,
//! copying whole segments to or from the store, and returns a single status.
//! A segment that would run past the end of the store stops the walk:
//! segments before it stay applied, it and everything after it are skipped.

use crate::error::ErrorKind;
use crate::request::{Op, Request, Status};
use crate::storage::BackingStore;
use log::{debug, trace};
use spin::RwLock;

/// Entry point a host calls for every request routed to a device.
pub trait Dispatch: Send + Sync {
    fn queue_rq(&self, rq: &mut Request<'_>) -> Status;
}

/// Serialization applied around request processing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Locking {
    /// No internal synchronization. Ordering of overlapping requests is up
    /// to the host.
    #[default]
    None,
    /// Whole-device reader/writer lock: reads share, everything else is
    /// exclusive.
    Device,
}

pub struct RamQueue {
    store: BackingStore,
    lock: Option<RwLock<()>>,
}

impl RamQueue {
    pub fn new(store: BackingStore, locking: Locking) -> Self {
        let lock = match locking {
            Locking::None => None,
            Locking::Device => Some(RwLock::new(())),
        };
        RamQueue { store, lock }
    }

    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn locking(&self) -> Locking {
        match self.lock {
            Some(_) => Locking::Device,
            None => Locking::None,
        }
    }

    fn process(&self, rq: &mut Request<'_>) -> Result<(), ErrorKind> {
        let op = rq.op();
        // An unrepresentable start only matters once a segment needs it.
        let mut pos = rq
            .sector()
            .offset()
            .and_then(|offset| usize::try_from(offset).ok());

        for seg in rq.segments_mut() {
            let len = seg.len();
            let extent = pos
                .and_then(|pos| self.store.extent(pos, len))
                .ok_or(ErrorKind::OutOfBounds)?;

            match op {
                Op::Read => extent.copy_to(seg),
                Op::Write => extent.copy_from(seg),
                _ => return Err(ErrorKind::NotImplemented),
            }
            trace!("{:?} {} bytes at {:?}", op, len, pos);

            pos = pos.map(|pos| pos + len);
        }

        Ok(())
    }
}

impl Dispatch for RamQueue {
    fn queue_rq(&self, rq: &mut Request<'_>) -> Status {
        let result = match &self.lock {
            Some(lock) if rq.op() == Op::Read => {
                let _shared = lock.read();
                self.process(rq)
            }
            Some(lock) => {
                let _exclusive = lock.write();
                self.process(rq)
            }
            None => self.process(rq),
        };

        match result {
            Ok(()) => Status::Ok,
            Err(kind) => {
                debug!(
                    "{:?} at sector {} ({} bytes) failed: {}",
                    rq.op(),
                    rq.sector().0,
                    rq.len(),
                    kind
                );
                Status::IoErr
            }
        }
    }
}
