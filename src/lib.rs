//! A block device held entirely in memory.
//!
//! A [`Device`] is a fixed number of 512-byte sectors backed by a flat byte
//! buffer. It is created against a [`Host`] block framework, which routes
//! read and write requests to the device's [`Dispatch`] callback. Each request
//! carries a starting sector and a list of caller-owned segments; the device
//! copies them to or from the buffer and answers with one [`Status`].
//!
//! ```
//! use blkram::{Device, DeviceConfig, LocalHost, Request, Sector, Status};
//!
//! let mut host = LocalHost::new();
//! let config = DeviceConfig::default().with_name("ram0").with_capacity_mb(1);
//! let device = Device::create(&mut host, &config).unwrap();
//!
//! let mut data = [0x5Au8; 512];
//! let mut rq = Request::write(Sector(4)).segment(&mut data);
//! assert_eq!(host.submit("ram0", &mut rq), Ok(Status::Ok));
//!
//! device.destroy(&mut host);
//! ```
#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
#[macro_use]
extern crate std;

mod device;
mod error;
mod geometry;
mod host;
mod queue;
mod request;
mod storage;

#[cfg(test)]
mod tests_util;

pub use device::{
    Device, DeviceConfig, DEFAULT_CAPACITY_MB, DEFAULT_MAX_SEGMENTS, DEFAULT_MAX_SEGMENT_SIZE,
    DEFAULT_NAME, DEFAULT_QUEUE_DEPTH,
};
pub use error::ErrorKind;
pub use geometry::{page_size, Geometry, MAX_QUEUE_DEPTH};
pub use host::{DiskId, FailPoint, Host, LocalHost, Major, Resources, TagSetId};
pub use queue::{Dispatch, Locking, RamQueue};
pub use request::{Op, Request, Status};
pub use storage::{BackingStore, Extent, Sector, SECTOR_SHIFT, SECTOR_SIZE};
