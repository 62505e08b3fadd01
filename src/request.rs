use crate::storage::Sector;
use alloc::vec::Vec;

/// Request kinds a host can hand to the device. Only reads and writes move data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
    Flush,
    Discard,
    WriteZeroes,
}

/// Terminal status of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    IoErr,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Negative errno as reported to the block layer.
    pub fn to_errno(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::IoErr => -libc::EIO,
        }
    }
}

/// One I/O submission: an operation, a starting sector and a scatter/gather
/// list of caller-owned buffers, walked in order.
pub struct Request<'a> {
    op: Op,
    sector: Sector,
    segments: Vec<&'a mut [u8]>,
}

impl<'a> Request<'a> {
    pub fn new(op: Op, sector: Sector) -> Self {
        Request {
            op,
            sector,
            segments: Vec::new(),
        }
    }

    pub fn read(sector: Sector) -> Self {
        Request::new(Op::Read, sector)
    }

    pub fn write(sector: Sector) -> Self {
        Request::new(Op::Write, sector)
    }

    /// Append a segment, builder style.
    pub fn segment(mut self, buf: &'a mut [u8]) -> Self {
        self.segments.push(buf);
        self
    }

    pub fn push_segment(&mut self, buf: &'a mut [u8]) {
        self.segments.push(buf);
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn sector(&self) -> Sector {
        self.sector
    }

    pub fn segments(&self) -> &[&'a mut [u8]] {
        &self.segments
    }

    pub(crate) fn segments_mut(&mut self) -> &mut [&'a mut [u8]] {
        &mut self.segments
    }

    /// Total bytes addressed by all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|seg| seg.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|seg| seg.is_empty())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_request_builder() {
        let mut a = [0u8; 512];
        let mut b = [0u8; 1024];
        let rq = Request::write(Sector(8)).segment(&mut a).segment(&mut b);
        assert_eq!(rq.op(), Op::Write);
        assert_eq!(rq.sector(), Sector(8));
        assert_eq!(rq.segments().len(), 2);
        assert_eq!(rq.len(), 1536);
        assert!(!rq.is_empty());
    }

    #[test]
    fn test_empty_request() {
        let rq = Request::new(Op::Flush, Sector(0));
        assert_eq!(rq.len(), 0);
        assert!(rq.is_empty());
    }

    #[test]
    fn test_status_errno() {
        assert!(Status::Ok.is_ok());
        assert!(!Status::IoErr.is_ok());
        assert_eq!(Status::Ok.to_errno(), 0);
        assert_eq!(Status::IoErr.to_errno(), -libc::EIO);
    }
}
