//! Per-test runtime (component G). For one concrete [`Test`]: installs
//! diversion rules, opens the input/output queues, spawns the user
//! command, drives intercepted packets through the matching pipeline, and
//! tears everything down deterministically on every exit path.

use crate::aggregator::{Outcome, TestResult};
use crate::carrier::PacketCarrier;
use crate::config::RawRule;
use crate::diversion::DiversionController;
use crate::errors::{CommandError, ModificationRuntimeError, SetupError, TestError};
use crate::packet::Packet;
use crate::pipeline::ModificationPipeline;
use crate::rng::rng_for_test;
use rand::rngs::StdRng;
use std::io;
use std::net::IpAddr;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// How long a worker blocks on one `recv` attempt before re-checking
/// cancellation/child-exit; the "bounded timeout" of §4.G step 4.
const POLL_STEP: Duration = Duration::from_millis(50);

/// Sends a fully-built IP packet onto the wire, used when a pipeline
/// expands one intercepted packet into more than one outgoing packet
/// (duplication, fragmentation, segmentation): the intercepted original is
/// dropped and every carrier entry is injected as a fresh raw packet.
pub trait PacketInjector: Send + Sync {
    fn inject(&self, packet: &Packet) -> io::Result<()>;
}

/// Raw-socket injector backed by `pnet`'s layer-3 transport channels, one
/// per IP family.
pub struct RawSocketInjector {
    v4: Mutex<pnet::transport::TransportSender>,
    v6: Mutex<pnet::transport::TransportSender>,
}

impl RawSocketInjector {
    pub fn new() -> io::Result<Self> {
        use pnet::packet::ip::IpNextHeaderProtocols;
        use pnet::transport::TransportChannelType;
        let (v4_tx, _) = pnet::transport::transport_channel(
            1 << 16,
            TransportChannelType::Layer3(IpNextHeaderProtocols::Test1),
        )?;
        let (v6_tx, _) = pnet::transport::transport_channel(
            1 << 16,
            TransportChannelType::Layer3(IpNextHeaderProtocols::Test1),
        )?;
        Ok(RawSocketInjector {
            v4: Mutex::new(v4_tx),
            v6: Mutex::new(v6_tx),
        })
    }
}

impl PacketInjector for RawSocketInjector {
    fn inject(&self, packet: &Packet) -> io::Result<()> {
        use crate::packet::IpVersion;
        match packet.ip_version() {
            Some(IpVersion::V4) => {
                let ip = packet.ipv4().ok_or_else(too_short)?;
                let dest = IpAddr::V4(ip.get_destination());
                self.v4
                    .lock()
                    .expect("raw v4 injector mutex poisoned")
                    .send_to(ip, dest)
                    .map(|_| ())
            }
            Some(IpVersion::V6) => {
                let ip = packet.ipv6().ok_or_else(too_short)?;
                let dest = IpAddr::V6(ip.destination());
                self.v6
                    .lock()
                    .expect("raw v6 injector mutex poisoned")
                    .send_to(RawIpv6 { bytes: packet.as_bytes() }, dest)
                    .map(|_| ())
            }
            None => Err(too_short()),
        }
    }
}

fn too_short() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "packet too short to carry an ip header")
}

/// Thin adapter so `TransportSender::send_to` (which wants a `pnet::Packet`
/// view) can send our already-serialized IPv6 bytes, since `pnet` has no
/// mutable IPv6 packet type of its own (we hand-roll the header, §ipv6).
struct RawIpv6<'a> {
    bytes: &'a [u8],
}

impl<'a> pnet::packet::Packet for RawIpv6<'a> {
    fn packet(&self) -> &[u8] {
        self.bytes
    }
    fn payload(&self) -> &[u8] {
        &self.bytes[crate::ipv6::FIXED_HEADER_LEN.min(self.bytes.len())..]
    }
}

struct PacketQueue {
    queue: nfq::Queue,
}

impl PacketQueue {
    fn bind(queue_num: u16) -> Result<Self, SetupError> {
        let mut queue = nfq::Queue::open().map_err(|e| SetupError::QueueOpen {
            qnum: queue_num,
            source: e,
        })?;
        queue.bind(queue_num).map_err(|e| SetupError::QueueOpen {
            qnum: queue_num,
            source: e,
        })?;
        queue.set_nonblocking(true);
        Ok(PacketQueue { queue })
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Option<nfq::Message> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.queue.recv() {
                Ok(msg) => return Some(msg),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    std::thread::sleep(POLL_STEP.min(deadline.saturating_duration_since(Instant::now())));
                }
                Err(_) => return None,
            }
        }
    }

    fn accept(&mut self, mut msg: nfq::Message, payload: Vec<u8>) -> io::Result<()> {
        msg.set_payload(payload);
        msg.set_verdict(nfq::Verdict::Accept);
        self.queue.verdict(msg)
    }

    fn drop_packet(&mut self, mut msg: nfq::Message) -> io::Result<()> {
        msg.set_verdict(nfq::Verdict::Drop);
        self.queue.verdict(msg)
    }
}

struct WorkerOutcome {
    packets_seen: u64,
    error: Option<ModificationRuntimeError>,
}

fn run_direction_worker(
    queue_num: u16,
    pipeline: Arc<ModificationPipeline>,
    injector: Arc<dyn PacketInjector>,
    rng: StdRng,
    cancelled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
) -> Result<WorkerOutcome, SetupError> {
    let mut queue = PacketQueue::bind(queue_num)?;
    let mut rng = rng;
    let mut packets_seen = 0u64;
    let mut error = None;

    while !cancelled.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        let Some(msg) = queue.recv_timeout(POLL_STEP) else {
            continue;
        };
        packets_seen += 1;
        let original_bytes = msg.get_payload().to_vec();
        let packet = Packet::new(original_bytes.clone());
        let carrier = PacketCarrier::single(packet);
        match pipeline.apply(carrier, &mut rng) {
            Ok(result) if result.len() == 1 => {
                let bytes = result.iter().next().expect("len checked above").packet.as_bytes().to_vec();
                let _ = queue.accept(msg, bytes);
            }
            Ok(result) if result.is_empty() => {
                let _ = queue.drop_packet(msg);
            }
            Ok(result) => {
                let _ = queue.drop_packet(msg);
                for entry in result.iter() {
                    if let Err(e) = injector.inject(&entry.packet) {
                        log::warn!("failed to inject re-ordered/duplicated packet: {e}");
                    }
                    if !entry.delay.is_zero() {
                        std::thread::sleep(entry.delay);
                    }
                }
            }
            Err(e) => {
                // Non-optional modification failure: the test is marked
                // failed once the worker's outcome is collected, but this
                // packet and every later one on this queue still get a
                // verdict rather than piling up in the kernel (§7).
                log::warn!("modification error on queue {queue_num}, accepting original packet: {e}");
                let _ = queue.accept(msg, original_bytes);
                error.get_or_insert(e);
            }
        }
    }
    Ok(WorkerOutcome { packets_seen, error })
}

/// Substitutes `{i}` (test index) and `{j}` (retry iteration) placeholders
/// into the command template (§3 `Test`, §6).
pub fn instantiate_command(template: &str, index: usize, iteration: usize) -> String {
    template
        .replace("{i}", &index.to_string())
        .replace("{j}", &iteration.to_string())
}

pub struct TestRuntime {
    pub queue_num: u16,
    pub cancelled: Arc<AtomicBool>,
    pub breadcrumb_path: std::path::PathBuf,
}

impl TestRuntime {
    pub fn run_test(
        &self,
        index: usize,
        suite_seed: u64,
        rules: &[RawRule],
        input_pipeline: ModificationPipeline,
        output_pipeline: ModificationPipeline,
        command_template: &str,
        injector: Arc<dyn PacketInjector>,
    ) -> TestResult {
        let start = SystemTime::now();
        match self.run_test_inner(index, suite_seed, rules, input_pipeline, output_pipeline, command_template, injector) {
            Ok((exit_status, notes)) => TestResult {
                index,
                exit_status: Some(exit_status),
                start,
                end: SystemTime::now(),
                notes,
                outcome: if exit_status == 0 { Outcome::Passed } else { Outcome::Failed },
            },
            Err(TestError::Setup(e)) => TestResult {
                index,
                exit_status: None,
                start,
                end: SystemTime::now(),
                notes: vec![e.to_string()],
                outcome: Outcome::SetupError,
            },
            Err(TestError::Cancelled) => TestResult {
                index,
                exit_status: None,
                start,
                end: SystemTime::now(),
                notes: vec!["cancelled".to_owned()],
                outcome: Outcome::Cancelled,
            },
            Err(e) => TestResult {
                index,
                exit_status: None,
                start,
                end: SystemTime::now(),
                notes: vec![e.to_string()],
                outcome: Outcome::Failed,
            },
        }
    }

    fn run_test_inner(
        &self,
        index: usize,
        suite_seed: u64,
        rules: &[RawRule],
        input_pipeline: ModificationPipeline,
        output_pipeline: ModificationPipeline,
        command_template: &str,
        injector: Arc<dyn PacketInjector>,
    ) -> Result<(i32, Vec<String>), TestError> {
        let mut controller = DiversionController::new(self.breadcrumb_path.clone())?;
        controller.install(rules, index)?;
        let teardown = |controller: &mut DiversionController| {
            if let Err(e) = controller.uninstall() {
                log::error!("failed to uninstall diversion rules for test {index}: {e}");
            }
        };

        let output_num = rules.first().map(|r| r.qnum as u16).unwrap_or(self.queue_num);
        let input_num = output_num + 1;

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let input_rng = rng_for_test(suite_seed, index);
        let output_rng = rng_for_test(suite_seed, index);
        let input_pipeline = Arc::new(input_pipeline);
        let output_pipeline = Arc::new(output_pipeline);

        let input_handle = {
            let pipeline = input_pipeline.clone();
            let injector = injector.clone();
            let cancelled = self.cancelled.clone();
            let stop = stop.clone();
            let tx = tx.clone();
            std::thread::spawn(move || {
                let outcome = run_direction_worker(input_num, pipeline, injector, input_rng, cancelled, stop);
                let _ = tx.send(("input", outcome));
            })
        };
        let output_handle = {
            let pipeline = output_pipeline.clone();
            let injector = injector.clone();
            let cancelled = self.cancelled.clone();
            let stop = stop.clone();
            let tx = tx.clone();
            std::thread::spawn(move || {
                let outcome = run_direction_worker(output_num, pipeline, injector, output_rng, cancelled, stop);
                let _ = tx.send(("output", outcome));
            })
        };
        drop(tx);

        let instantiated = instantiate_command(command_template, index, 0);
        let child = Command::new("sh").arg("-c").arg(&instantiated).spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                let _ = input_handle.join();
                let _ = output_handle.join();
                teardown(&mut controller);
                return Err(TestError::Setup(SetupError::Spawn(e)));
            }
        };

        let wait_result = reap(child, &self.cancelled);
        stop.store(true, Ordering::SeqCst);

        let mut notes = Vec::new();
        let mut pipeline_error: Option<ModificationRuntimeError> = None;
        for _ in 0..2 {
            if let Ok((direction, outcome)) = rx.recv_timeout(Duration::from_secs(5)) {
                match outcome {
                    Ok(o) => {
                        notes.push(format!("{direction}: {} packets seen", o.packets_seen));
                        if let Some(e) = o.error {
                            notes.push(format!("{direction}: {e}"));
                            pipeline_error.get_or_insert(e);
                        }
                    }
                    Err(e) => notes.push(format!("{direction} worker setup error: {e}")),
                }
            }
        }
        let _ = input_handle.join();
        let _ = output_handle.join();

        teardown(&mut controller);

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(TestError::Cancelled);
        }

        // A non-optional modification failure marks the whole test failed
        // regardless of the command's own exit status (§7).
        if let Some(e) = pipeline_error {
            return Err(TestError::Runtime(e));
        }

        match wait_result {
            Ok(status) => Ok((status, notes)),
            Err(e) => Err(TestError::Command(e)),
        }
    }
}

fn reap(mut child: Child, cancelled: &Arc<AtomicBool>) -> Result<i32, CommandError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status.code().unwrap_or(-1)),
            Ok(None) => {
                if cancelled.load(Ordering::SeqCst) {
                    let _ = child.kill();
                }
                std::thread::sleep(POLL_STEP);
            }
            Err(e) => return Err(CommandError::Wait(e)),
        }
    }
}
