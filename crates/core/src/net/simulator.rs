use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::socket::{DatagramSocket, Endpoint};
use crate::clock::{Clock, ManualClock};

#[derive(Debug, Clone, Default)]
pub struct LinkConditions {
    pub enabled: bool,
    pub loss_percent: f32,
    pub duplicate_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
}

impl LinkConditions {
    pub fn lossy(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
            ..Default::default()
        }
    }

    pub fn latency(latency_ms: u32) -> Self {
        Self {
            enabled: true,
            min_latency_ms: latency_ms,
            max_latency_ms: latency_ms,
            ..Default::default()
        }
    }

    fn should_drop(&self, rng: &mut StdRng) -> bool {
        self.enabled && self.loss_percent > 0.0 && rng.gen_range(0.0..100.0) < self.loss_percent
    }

    fn should_duplicate(&self, rng: &mut StdRng) -> bool {
        self.enabled
            && self.duplicate_percent > 0.0
            && rng.gen_range(0.0..100.0) < self.duplicate_percent
    }

    fn delay(&self, rng: &mut StdRng) -> Duration {
        if !self.enabled || self.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let min = self.min_latency_ms.min(self.max_latency_ms);
        Duration::from_millis(rng.gen_range(min..=self.max_latency_ms) as u64)
    }
}

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Duration,
    order: u64,
    data: Vec<u8>,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// In-memory socket for tests and simulations.
///
/// Datagrams handed to `inject` become receivable once their simulated
/// latency has elapsed on the socket's clock. Everything the connection sends
/// is captured and can be taken with `take_sent`.
#[derive(Debug)]
pub struct SimulatedSocket<C: Clock = ManualClock> {
    clock: C,
    inbound: BinaryHeap<DelayedDatagram>,
    sent: VecDeque<(Vec<u8>, Endpoint)>,
    inbound_conditions: LinkConditions,
    outbound_conditions: LinkConditions,
    send_error: Option<io::ErrorKind>,
    rng: StdRng,
    next_order: u64,
}

impl<C: Clock> SimulatedSocket<C> {
    pub fn new(clock: C) -> Self {
        Self::with_seed(clock, 0x5EED)
    }

    pub fn with_seed(clock: C, seed: u64) -> Self {
        Self {
            clock,
            inbound: BinaryHeap::new(),
            sent: VecDeque::new(),
            inbound_conditions: LinkConditions::default(),
            outbound_conditions: LinkConditions::default(),
            send_error: None,
            rng: StdRng::seed_from_u64(seed),
            next_order: 0,
        }
    }

    pub fn set_inbound_conditions(&mut self, conditions: LinkConditions) {
        self.inbound_conditions = conditions;
    }

    pub fn set_outbound_conditions(&mut self, conditions: LinkConditions) {
        self.outbound_conditions = conditions;
    }

    /// Makes every following `send_to` fail with `kind`, or succeed again with `None`.
    pub fn fail_sends(&mut self, kind: Option<io::ErrorKind>) {
        self.send_error = kind;
    }

    pub fn inject(&mut self, datagram: impl Into<Vec<u8>>) {
        let data = datagram.into();
        if self.inbound_conditions.should_drop(&mut self.rng) {
            return;
        }
        if self.inbound_conditions.should_duplicate(&mut self.rng) {
            self.enqueue(data.clone());
        }
        self.enqueue(data);
    }

    fn enqueue(&mut self, data: Vec<u8>) {
        let release_time = self.clock.now() + self.inbound_conditions.delay(&mut self.rng);
        self.inbound.push(DelayedDatagram {
            release_time,
            order: self.next_order,
            data,
        });
        self.next_order += 1;
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    pub fn take_sent(&mut self) -> Vec<(Vec<u8>, Endpoint)> {
        self.sent.drain(..).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }
}

impl<C: Clock> DatagramSocket for SimulatedSocket<C> {
    fn send_to(&mut self, datagram: &[u8], destination: &Endpoint) -> io::Result<()> {
        if let Some(kind) = self.send_error {
            return Err(io::Error::new(kind, "simulated send failure"));
        }
        if self.outbound_conditions.should_drop(&mut self.rng) {
            return Ok(());
        }
        if self.outbound_conditions.should_duplicate(&mut self.rng) {
            self.sent.push_back((datagram.to_vec(), destination.clone()));
        }
        self.sent.push_back((datagram.to_vec(), destination.clone()));
        Ok(())
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let now = self.clock.now();
        match self.inbound.peek() {
            Some(next) if next.release_time <= now => {}
            _ => return Ok(None),
        }

        let Some(datagram) = self.inbound.pop() else {
            return Ok(None);
        };
        // like UDP, anything past the buffer is cut off
        let size = datagram.data.len().min(buf.len());
        buf[..size].copy_from_slice(&datagram.data[..size]);
        Ok(Some(size))
    }
}
