//! The host block framework, as seen from a device.
//!
//! [`Host`] is the registration and allocation contract a device is built
//! against. [`LocalHost`] implements it in-process: it keeps the published
//! disks in a table and routes [`LocalHost::submit`] calls to their dispatch
//! callbacks, enforcing queue limits and tag-set depth on the way.

use crate::error::ErrorKind;
use crate::geometry::Geometry;
use crate::queue::Dispatch;
use crate::request::{Request, Status};
use crate::storage::Sector;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use log::{debug, warn};

/// Registered device class.
#[derive(Debug, PartialEq, Eq)]
pub struct Major(pub u32);

/// Dispatch resource binding a [`Dispatch`] callback.
#[derive(Debug, PartialEq, Eq)]
pub struct TagSetId(pub u32);

/// Disk handle allocated against a tag set.
#[derive(Debug, PartialEq, Eq)]
pub struct DiskId(pub u32);

/// Calls a device makes into the host framework.
///
/// Handles are moved into the matching release call, so each one is
/// released at most once.
pub trait Host {
    fn register_device_class(&mut self, name: &str) -> Result<Major, ErrorKind>;

    fn unregister_device_class(&mut self, major: Major, name: &str);

    /// Allocate `queue_depth` tags whose requests are handed to `dispatch`.
    fn allocate_dispatch(
        &mut self,
        queue_depth: u32,
        dispatch: Arc<dyn Dispatch>,
    ) -> Result<TagSetId, ErrorKind>;

    fn release_dispatch(&mut self, tag_set: TagSetId);

    fn allocate_disk(&mut self, tag_set: &TagSetId) -> Result<DiskId, ErrorKind>;

    fn release_disk(&mut self, disk: DiskId);

    fn configure_queue(&mut self, disk: &DiskId, geometry: &Geometry);

    /// Make the disk addressable under `name`. Requests may arrive as soon as
    /// this returns `Ok`.
    fn publish(
        &mut self,
        disk: &DiskId,
        major: &Major,
        capacity: Sector,
        name: &str,
    ) -> Result<(), ErrorKind>;

    /// Stop routing requests to the disk.
    fn unpublish(&mut self, disk: &DiskId);
}

/// Host step that [`LocalHost::fail_at`] can make fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    RegisterClass,
    AllocateDispatch,
    AllocateDisk,
    Publish,
}

/// Counts of what a [`LocalHost`] currently holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub classes: usize,
    pub tag_sets: usize,
    pub disks: usize,
    pub published: usize,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        *self == Resources::default()
    }
}

struct TagSet {
    depth: u32,
    in_flight: AtomicU32,
    dispatch: Arc<dyn Dispatch>,
}

impl TagSet {
    fn try_acquire(&self) -> Option<Tag<'_>> {
        self.in_flight
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |n| {
                (n < self.depth).then(|| n + 1)
            })
            .ok()
            .map(|_| Tag(&self.in_flight))
    }
}

struct Tag<'a>(&'a AtomicU32);

impl Drop for Tag<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

struct Disk {
    tag_set: u32,
    geometry: Option<Geometry>,
    capacity: Sector,
    name: Option<String>,
}

#[derive(Default)]
pub struct LocalHost {
    next_id: u32,
    classes: BTreeMap<u32, String>,
    tag_sets: BTreeMap<u32, TagSet>,
    disks: BTreeMap<u32, Disk>,
    published: BTreeMap<String, u32>,
    fail_at: Option<FailPoint>,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call at `point` fail. One-shot.
    pub fn fail_at(&mut self, point: FailPoint) {
        self.fail_at = Some(point);
    }

    pub fn live_resources(&self) -> Resources {
        Resources {
            classes: self.classes.len(),
            tag_sets: self.tag_sets.len(),
            disks: self.disks.len(),
            published: self.published.len(),
        }
    }

    pub fn capacity(&self, name: &str) -> Option<Sector> {
        self.published_disk(name).map(|disk| disk.capacity)
    }

    pub fn geometry(&self, name: &str) -> Option<Geometry> {
        self.published_disk(name).and_then(|disk| disk.geometry)
    }

    /// Route a request to the disk published as `name` and return its status.
    pub fn submit(&self, name: &str, rq: &mut Request<'_>) -> Result<Status, ErrorKind> {
        let disk = self.published_disk(name).ok_or(ErrorKind::NoEntry)?;
        let tag_set = self
            .tag_sets
            .get(&disk.tag_set)
            .ok_or(ErrorKind::NoEntry)?;

        if let Some(geometry) = &disk.geometry {
            if rq.segments().len() > geometry.max_segments() as usize {
                debug!("{}: {} segments over limit", name, rq.segments().len());
                return Err(ErrorKind::LimitExceeded);
            }
            let max_len = geometry.max_segment_size() as usize;
            if rq.segments().iter().any(|seg| seg.len() > max_len) {
                debug!("{}: segment over {} bytes", name, max_len);
                return Err(ErrorKind::LimitExceeded);
            }
        }

        let _tag = tag_set.try_acquire().ok_or(ErrorKind::Busy)?;
        Ok(tag_set.dispatch.queue_rq(rq))
    }

    fn published_disk(&self, name: &str) -> Option<&Disk> {
        self.published.get(name).and_then(|id| self.disks.get(id))
    }

    fn check(&mut self, point: FailPoint) -> Result<(), ErrorKind> {
        if self.fail_at != Some(point) {
            return Ok(());
        }
        self.fail_at = None;
        match point {
            FailPoint::AllocateDispatch | FailPoint::AllocateDisk => {
                Err(ErrorKind::AllocationFailed)
            }
            FailPoint::RegisterClass | FailPoint::Publish => Err(ErrorKind::HostFailure),
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl Host for LocalHost {
    fn register_device_class(&mut self, name: &str) -> Result<Major, ErrorKind> {
        self.check(FailPoint::RegisterClass)?;
        let major = self.next_id();
        self.classes.insert(major, name.to_string());
        debug!("registered class {} as major {}", name, major);
        Ok(Major(major))
    }

    fn unregister_device_class(&mut self, major: Major, name: &str) {
        match self.classes.remove(&major.0) {
            Some(registered) if registered == name => {}
            Some(registered) => warn!(
                "major {} unregistered as {} but registered as {}",
                major.0, name, registered
            ),
            None => warn!("unregistering unknown major {}", major.0),
        }
    }

    fn allocate_dispatch(
        &mut self,
        queue_depth: u32,
        dispatch: Arc<dyn Dispatch>,
    ) -> Result<TagSetId, ErrorKind> {
        self.check(FailPoint::AllocateDispatch)?;
        let id = self.next_id();
        self.tag_sets.insert(
            id,
            TagSet {
                depth: queue_depth,
                in_flight: AtomicU32::new(0),
                dispatch,
            },
        );
        Ok(TagSetId(id))
    }

    fn release_dispatch(&mut self, tag_set: TagSetId) {
        if self.disks.values().any(|disk| disk.tag_set == tag_set.0) {
            warn!("tag set {} released while a disk still uses it", tag_set.0);
        }
        if self.tag_sets.remove(&tag_set.0).is_none() {
            warn!("releasing unknown tag set {}", tag_set.0);
        }
    }

    fn allocate_disk(&mut self, tag_set: &TagSetId) -> Result<DiskId, ErrorKind> {
        self.check(FailPoint::AllocateDisk)?;
        if !self.tag_sets.contains_key(&tag_set.0) {
            return Err(ErrorKind::HostFailure);
        }
        let id = self.next_id();
        self.disks.insert(
            id,
            Disk {
                tag_set: tag_set.0,
                geometry: None,
                capacity: Sector(0),
                name: None,
            },
        );
        Ok(DiskId(id))
    }

    fn release_disk(&mut self, disk: DiskId) {
        match self.disks.remove(&disk.0) {
            Some(Disk { name: Some(name), .. }) => {
                warn!("disk {} released while published as {}", disk.0, name);
                self.published.remove(&name);
            }
            Some(_) => {}
            None => warn!("releasing unknown disk {}", disk.0),
        }
    }

    fn configure_queue(&mut self, disk: &DiskId, geometry: &Geometry) {
        match self.disks.get_mut(&disk.0) {
            Some(entry) => entry.geometry = Some(*geometry),
            None => warn!("configuring unknown disk {}", disk.0),
        }
    }

    fn publish(
        &mut self,
        disk: &DiskId,
        major: &Major,
        capacity: Sector,
        name: &str,
    ) -> Result<(), ErrorKind> {
        self.check(FailPoint::Publish)?;
        if !self.classes.contains_key(&major.0) || self.published.contains_key(name) {
            return Err(ErrorKind::HostFailure);
        }
        let entry = self.disks.get_mut(&disk.0).ok_or(ErrorKind::HostFailure)?;
        if entry.name.is_some() {
            return Err(ErrorKind::HostFailure);
        }
        entry.capacity = capacity;
        entry.name = Some(name.to_string());
        self.published.insert(name.to_string(), disk.0);
        debug!("published {} ({} sectors)", name, capacity.0);
        Ok(())
    }

    fn unpublish(&mut self, disk: &DiskId) {
        match self.disks.get_mut(&disk.0).and_then(|entry| entry.name.take()) {
            Some(name) => {
                self.published.remove(&name);
                debug!("unpublished {}", name);
            }
            None => warn!("unpublishing disk {} that is not published", disk.0),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::queue::{Locking, RamQueue};
    use crate::storage::SECTOR_SIZE;
    use crate::tests_util::*;

    fn geometry() -> Geometry {
        Geometry::new(512, 512, 4, 65536, 8).unwrap()
    }

    /// Walk the whole registration sequence by hand.
    fn publish(host: &mut LocalHost, name: &str) -> (Major, TagSetId, DiskId) {
        let major = host.register_device_class(name).unwrap();
        let queue = Arc::new(make_queue(64 * SECTOR_SIZE, Locking::None));
        let tag_set = host.allocate_dispatch(8, queue).unwrap();
        let disk = host.allocate_disk(&tag_set).unwrap();
        host.configure_queue(&disk, &geometry());
        host.publish(&disk, &major, Sector(64), name).unwrap();
        (major, tag_set, disk)
    }

    #[test]
    fn test_publish_and_release() {
        init();
        let mut host = LocalHost::new();
        let (major, tag_set, disk) = publish(&mut host, "ram0");
        assert_eq!(
            host.live_resources(),
            Resources {
                classes: 1,
                tag_sets: 1,
                disks: 1,
                published: 1
            }
        );
        assert_eq!(host.capacity("ram0"), Some(Sector(64)));
        assert_eq!(host.geometry("ram0"), Some(geometry()));

        host.unpublish(&disk);
        assert_eq!(host.capacity("ram0"), None);
        host.release_disk(disk);
        host.release_dispatch(tag_set);
        host.unregister_device_class(major, "ram0");
        assert!(host.live_resources().is_empty());
    }

    #[test]
    fn test_submit_routes_by_name() {
        init();
        let mut host = LocalHost::new();
        publish(&mut host, "ram0");

        let mut data = pattern(1024);
        let expected = data.clone();
        let mut rq = Request::write(Sector(1)).segment(&mut data);
        assert_eq!(host.submit("ram0", &mut rq), Ok(Status::Ok));

        let mut data2 = vec![0u8; expected.len()];
        let mut rq = Request::read(Sector(1)).segment(&mut data2);
        assert_eq!(host.submit("ram0", &mut rq), Ok(Status::Ok));
        assert_eq!(data2, expected);

        let mut rq = Request::read(Sector(1)).segment(&mut data2);
        assert_eq!(host.submit("ram1", &mut rq), Err(ErrorKind::NoEntry));
    }

    #[test]
    fn test_submit_enforces_limits() {
        let mut host = LocalHost::new();
        publish(&mut host, "ram0");

        let mut bufs = vec![vec![0u8; 512]; 5];
        let mut rq = Request::read(Sector(0));
        for buf in bufs.iter_mut() {
            rq.push_segment(buf);
        }
        assert_eq!(host.submit("ram0", &mut rq), Err(ErrorKind::LimitExceeded));

        let mut big = vec![0u8; 65537];
        let mut rq = Request::read(Sector(0)).segment(&mut big);
        assert_eq!(host.submit("ram0", &mut rq), Err(ErrorKind::LimitExceeded));
    }

    #[test]
    fn test_out_of_range_surfaces_as_status() {
        let mut host = LocalHost::new();
        publish(&mut host, "ram0");
        let mut data = vec![0u8; 1024];
        let mut rq = Request::write(Sector(63)).segment(&mut data);
        assert_eq!(host.submit("ram0", &mut rq), Ok(Status::IoErr));
    }

    #[test]
    fn test_tag_set_depth() {
        let tag_set = TagSet {
            depth: 2,
            in_flight: AtomicU32::new(0),
            dispatch: Arc::new(make_queue(SECTOR_SIZE, Locking::None)),
        };
        let first = tag_set.try_acquire().unwrap();
        let second = tag_set.try_acquire().unwrap();
        assert!(tag_set.try_acquire().is_none());
        drop(first);
        let third = tag_set.try_acquire();
        assert!(third.is_some());
        drop(second);
        drop(third);
        assert_eq!(tag_set.in_flight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut host = LocalHost::new();
        publish(&mut host, "ram0");
        let major = host.register_device_class("ram0").unwrap();
        let queue = Arc::new(make_queue(SECTOR_SIZE, Locking::None));
        let tag_set = host.allocate_dispatch(1, queue).unwrap();
        let disk = host.allocate_disk(&tag_set).unwrap();
        assert_eq!(
            host.publish(&disk, &major, Sector(1), "ram0"),
            Err(ErrorKind::HostFailure)
        );
    }

    #[test]
    fn test_fail_at_is_one_shot() {
        let mut host = LocalHost::new();
        host.fail_at(FailPoint::RegisterClass);
        assert_eq!(
            host.register_device_class("ram0"),
            Err(ErrorKind::HostFailure)
        );
        assert!(host.register_device_class("ram0").is_ok());

        host.fail_at(FailPoint::AllocateDispatch);
        let queue = Arc::new(make_queue(SECTOR_SIZE, Locking::None));
        assert_eq!(
            host.allocate_dispatch(1, queue).err(),
            Some(ErrorKind::AllocationFailed)
        );
    }
}
