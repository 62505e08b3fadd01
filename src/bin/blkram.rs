use blkram::{
    page_size, Device, DeviceConfig, ErrorKind, Geometry, LocalHost, Locking, Op, Request,
    Sector, Status, SECTOR_SIZE,
};
use log::LevelFilter;
use log::{debug, error, info};
use std::process;
use std::thread;
use std::time::Instant;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "blkram", about = "Create an in-memory block device and exercise it")]
struct Opt {
    /// Name the disk is published under.
    #[structopt(long, default_value = "blkram")]
    name: String,

    /// Capacity of the block device in MB.
    #[structopt(long, default_value = "40")]
    capacity_mb: u64,

    #[structopt(long, default_value = "32")]
    max_segments: u16,

    #[structopt(long, default_value = "65536")]
    max_segment_size: u32,

    /// Logical block size, defaults to the page size.
    #[structopt(long)]
    lbs: Option<u32>,

    /// Physical block size, defaults to the page size.
    #[structopt(long)]
    pbs: Option<u32>,

    #[structopt(long, default_value = "128")]
    queue_depth: u32,

    /// Writer threads, each owning a disjoint range of sectors.
    #[structopt(long, default_value = "4")]
    threads: u64,

    /// Serialize requests with a whole-device lock.
    #[structopt(long)]
    lock: bool,

    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

#[derive(Default)]
struct Report {
    sectors: u64,
    mismatched: u64,
    failed: u64,
}

impl Report {
    fn merge(&mut self, other: Report) {
        self.sectors += other.sectors;
        self.mismatched += other.mismatched;
        self.failed += other.failed;
    }
}

/// Every sector holds its own number, salted with the writer's tag.
fn fill(buf: &mut [u8], first: u64, tag: u8) {
    for (i, sector) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
        let stamp = (first + i as u64).to_le_bytes();
        for (j, byte) in sector.iter_mut().enumerate() {
            *byte = stamp[j % stamp.len()] ^ tag;
        }
    }
}

fn submit(
    host: &LocalHost,
    name: &str,
    op: Op,
    sector: u64,
    buf: &mut [u8],
    segment_size: usize,
) -> Result<Status, ErrorKind> {
    loop {
        let mut rq = Request::new(op, Sector(sector));
        for chunk in buf.chunks_mut(segment_size) {
            rq.push_segment(chunk);
        }
        match host.submit(name, &mut rq) {
            Err(ErrorKind::Busy) => thread::yield_now(),
            other => return other,
        }
    }
}

fn exercise(
    host: &LocalHost,
    name: &str,
    geometry: &Geometry,
    first: u64,
    end: u64,
    tag: u8,
) -> Result<Report, ErrorKind> {
    let segment_size = geometry.max_segment_size() as usize;
    let per_rq = (segment_size / SECTOR_SIZE) as u64 * geometry.max_segments() as u64;
    let mut report = Report::default();

    let mut sector = first;
    while sector < end {
        let count = per_rq.min(end - sector);
        let mut expected = vec![0u8; count as usize * SECTOR_SIZE];
        fill(&mut expected, sector, tag);

        let mut data = expected.clone();
        if submit(host, name, Op::Write, sector, &mut data, segment_size)? != Status::Ok {
            report.failed += 1;
        }

        let mut data = vec![0u8; expected.len()];
        if submit(host, name, Op::Read, sector, &mut data, segment_size)? != Status::Ok {
            report.failed += 1;
        }
        report.mismatched += expected
            .chunks(SECTOR_SIZE)
            .zip(data.chunks(SECTOR_SIZE))
            .filter(|(a, b)| a != b)
            .count() as u64;

        report.sectors += count;
        sector += count;
    }

    debug!("writer {} done with sectors {}..{}", tag, first, end);
    Ok(report)
}

/// A write straddling the last sector must fail without touching it.
fn probe_boundary(host: &LocalHost, name: &str, capacity: Sector) -> Result<bool, ErrorKind> {
    let last = capacity.0 - 1;
    let mut before = vec![0u8; SECTOR_SIZE];
    submit(host, name, Op::Read, last, &mut before, SECTOR_SIZE)?;

    let mut data = vec![0xFFu8; 2 * SECTOR_SIZE];
    let status = submit(host, name, Op::Write, last, &mut data, 2 * SECTOR_SIZE)?;

    let mut after = vec![0u8; SECTOR_SIZE];
    submit(host, name, Op::Read, last, &mut after, SECTOR_SIZE)?;
    Ok(status == Status::IoErr && before == after)
}

fn workload(host: &LocalHost, opt: &Opt, device: &Device) -> Result<(Report, bool), ErrorKind> {
    let capacity = device.capacity();
    let geometry = device.geometry();
    let threads = opt.threads.clamp(1, capacity.0);
    let per_thread = capacity.0 / threads;

    let start = Instant::now();
    let results: Vec<Result<Report, ErrorKind>> = thread::scope(|s| {
        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let first = t * per_thread;
                let end = if t + 1 == threads {
                    capacity.0
                } else {
                    first + per_thread
                };
                s.spawn(move || exercise(host, device.name(), geometry, first, end, t as u8))
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or(Err(ErrorKind::HostFailure)))
            .collect()
    });
    let elapsed = start.elapsed();

    let mut report = Report::default();
    for result in results {
        report.merge(result?);
    }
    let bytes = report.sectors * SECTOR_SIZE as u64 * 2;
    info!(
        "{} sectors written and read back by {} threads in {:?} ({:.1} MB/s)",
        report.sectors,
        threads,
        elapsed,
        bytes as f64 / elapsed.as_secs_f64().max(1e-9) / (1 << 20) as f64
    );

    let boundary_ok = probe_boundary(host, device.name(), capacity)?;
    Ok((report, boundary_ok))
}

fn run(opt: &Opt) -> Result<bool, ErrorKind> {
    let config = DeviceConfig::default()
        .with_name(&opt.name)
        .with_capacity_mb(opt.capacity_mb)
        .with_block_sizes(
            opt.lbs.unwrap_or_else(page_size),
            opt.pbs.unwrap_or_else(page_size),
        )
        .with_max_segments(opt.max_segments)
        .with_max_segment_size(opt.max_segment_size)
        .with_queue_depth(opt.queue_depth)
        .with_locking(if opt.lock {
            Locking::Device
        } else {
            Locking::None
        });

    let mut host = LocalHost::new();
    let device = Device::create(&mut host, &config)?;
    let outcome = workload(&host, opt, &device);
    device.destroy(&mut host);
    let (report, boundary_ok) = outcome?;

    if report.mismatched > 0 || report.failed > 0 {
        error!(
            "{} sectors mismatched, {} requests failed",
            report.mismatched, report.failed
        );
    }
    if !boundary_ok {
        error!("write past the last sector was not rejected cleanly");
    }
    Ok(report.mismatched == 0 && report.failed == 0 && boundary_ok)
}

fn main() {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder()
        .format_timestamp_nanos()
        .filter_level(level)
        .init();

    match run(&opt) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
