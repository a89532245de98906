//! Periodic-read scheduler ("gather") over a [`Client`](crate::client::Client)
//!
//! A gather job names a slave, one of the four read functions, an address
//! range and a scan rate. Jobs wider than the function's maximum quantity
//! are split into contiguous sub-requests, each driven by its own timer.
//! Results and errors are delivered to a user-supplied [`GatherHandler`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch, Notify};

use crate::client::Client;
use crate::constants::limits;
use crate::error::{InvalidRequest, RequestError};
use crate::function::FunctionCode;
use crate::types::{AddressRange, UnitId};

/// default capacity of the ready queue
pub const DEFAULT_READY_QUEUE_SIZE: usize = 256;
/// default upper bound, in milliseconds, of the random delay applied when
/// the ready queue is full
pub const DEFAULT_RETRY_RAND_VALUE: u64 = 50;

/// A periodic read request
#[derive(Clone, Debug)]
pub struct GatherJob {
    /// slave to poll, [1, 247]
    pub unit_id: UnitId,
    /// one of the four read functions
    pub function: FunctionCode,
    /// first address to read
    pub address: u16,
    /// total quantity to read; split if it exceeds the function's maximum
    pub quantity: u16,
    /// period of the poll; zero means read once
    pub scan_rate: Duration,
}

/// Counters and parameters of one sub-request, delivered with every result
#[derive(Clone, Debug)]
pub struct GatherResult {
    /// slave the sub-request polls
    pub unit_id: UnitId,
    /// function being polled
    pub function: FunctionCode,
    /// first address of the sub-request
    pub address: u16,
    /// quantity of the sub-request
    pub quantity: u16,
    /// period of the poll
    pub scan_rate: Duration,
    /// number of transmissions so far
    pub tx_count: u64,
    /// number of failed transmissions so far
    pub err_count: u64,
}

/// Receives polled data and per-request outcomes
///
/// Data callbacks get the raw response payload: packed bits for coil and
/// discrete-input polls, big-endian register bytes for the register polls.
/// All methods default to doing nothing.
pub trait GatherHandler: Send + Sync {
    /// coils arrived for a sub-request
    fn handle_coils(&self, unit_id: UnitId, address: u16, quantity: u16, values: &[u8]) {
        let _ = (unit_id, address, quantity, values);
    }

    /// discrete inputs arrived for a sub-request
    fn handle_discrete_inputs(&self, unit_id: UnitId, address: u16, quantity: u16, values: &[u8]) {
        let _ = (unit_id, address, quantity, values);
    }

    /// holding registers arrived for a sub-request
    fn handle_holding_registers(
        &self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
        values: &[u8],
    ) {
        let _ = (unit_id, address, quantity, values);
    }

    /// input registers arrived for a sub-request
    fn handle_input_registers(&self, unit_id: UnitId, address: u16, quantity: u16, values: &[u8]) {
        let _ = (unit_id, address, quantity, values);
    }

    /// called after every attempt with the outcome and a counter snapshot
    fn handle_result(&self, error: Option<&RequestError>, result: &GatherResult) {
        let _ = (error, result);
    }
}

/// A [`GatherHandler`] that discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NopHandler;

impl GatherHandler for NopHandler {}

/// routed every panic a handler raises
pub type PanicHandle = Arc<dyn Fn(Box<dyn std::any::Any + Send>) + Send + Sync>;

/// Configuration of a [`PollEngine`]
pub struct PollConfig {
    ready_queue_size: usize,
    rand_value: u64,
    handler: Arc<dyn GatherHandler>,
    panic_handle: PanicHandle,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    /// defaults: queue of 256, 50 ms retry jitter, no-op handler
    pub fn new() -> Self {
        Self {
            ready_queue_size: DEFAULT_READY_QUEUE_SIZE,
            rand_value: DEFAULT_RETRY_RAND_VALUE,
            handler: Arc::new(NopHandler),
            panic_handle: Arc::new(|_| {}),
        }
    }

    /// capacity of the bounded ready queue
    pub fn ready_queue_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.ready_queue_size = size;
        }
        self
    }

    /// upper bound, in milliseconds, of the random re-arm delay used when
    /// the ready queue is full
    pub fn retry_rand_value(mut self, millis: u64) -> Self {
        if millis > 0 {
            self.rand_value = millis;
        }
        self
    }

    /// the result sink
    pub fn handler(mut self, handler: impl GatherHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// where recovered handler panics are routed
    pub fn panic_handle(
        mut self,
        handle: impl Fn(Box<dyn std::any::Any + Send>) + Send + Sync + 'static,
    ) -> Self {
        self.panic_handle = Arc::new(handle);
        self
    }
}

struct SubRequest {
    unit_id: UnitId,
    function: FunctionCode,
    address: u16,
    quantity: u16,
    scan_rate: Duration,
    tx_count: AtomicU64,
    err_count: AtomicU64,
    rearm: Notify,
}

impl SubRequest {
    fn snapshot(&self) -> GatherResult {
        GatherResult {
            unit_id: self.unit_id,
            function: self.function,
            address: self.address,
            quantity: self.quantity,
            scan_rate: self.scan_rate,
            tx_count: self.tx_count.load(Ordering::Relaxed),
            err_count: self.err_count.load(Ordering::Relaxed),
        }
    }
}

struct EngineShared {
    client: Client,
    handler: Arc<dyn GatherHandler>,
    panic_handle: PanicHandle,
    rand_value: u64,
    ready_tx: mpsc::Sender<Arc<SubRequest>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

/// Schedules periodic reads against a client and fans results out to a
/// [`GatherHandler`]
pub struct PollEngine {
    shared: Arc<EngineShared>,
    ready_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Arc<SubRequest>>>>,
}

impl PollEngine {
    /// create an engine over the given client
    pub fn new(client: Client, config: PollConfig) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel(config.ready_queue_size);
        let (shutdown_tx, shutdown) = watch::channel(false);
        Self {
            shared: Arc::new(EngineShared {
                client,
                handler: config.handler,
                panic_handle: config.panic_handle,
                rand_value: config.rand_value,
                ready_tx,
                shutdown_tx,
                shutdown,
            }),
            ready_rx: tokio::sync::Mutex::new(Some(ready_rx)),
        }
    }

    /// the wrapped client
    pub fn client(&self) -> &Client {
        &self.shared.client
    }

    /// connect the client and spawn the reader task
    pub async fn start(&self) -> Result<(), RequestError> {
        self.shared.client.connect().await?;
        let receiver = self.ready_rx.lock().await.take();
        if let Some(receiver) = receiver {
            tokio::spawn(read_poll(self.shared.clone(), receiver));
        }
        Ok(())
    }

    /// add a periodic read, splitting it into sub-requests where the
    /// quantity exceeds the function's maximum
    pub fn add_gather_job(&self, job: GatherJob) -> Result<(), RequestError> {
        if crate::common::is_shutdown(&self.shared.shutdown) {
            return Err(RequestError::Shutdown);
        }
        job.unit_id.check_read_target()?;
        if !job.function.is_periodic_read() {
            return Err(InvalidRequest::FunctionNotPollable(job.function.get_value()).into());
        }

        for range in segment_ranges(job.function, job.address, job.quantity) {
            let sub = Arc::new(SubRequest {
                unit_id: job.unit_id,
                function: job.function,
                address: range.start,
                quantity: range.count,
                scan_rate: job.scan_rate,
                tx_count: AtomicU64::new(0),
                err_count: AtomicU64::new(0),
                rearm: Notify::new(),
            });
            tokio::spawn(run_timer(self.shared.clone(), sub));
        }
        Ok(())
    }

    /// cancel the engine: the reader and every timer exit, then the client
    /// is closed
    pub async fn close(&self) -> Result<(), RequestError> {
        let _ = self.shared.shutdown_tx.send(true);
        self.shared.client.close().await
    }
}

/// contiguous address ranges of at most the function's maximum quantity
fn segment_ranges(function: FunctionCode, address: u16, quantity: u16) -> Vec<AddressRange> {
    let quantity_max = match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => limits::MAX_READ_BITS_COUNT,
        _ => limits::MAX_READ_REGISTERS_COUNT,
    };

    let mut ranges = Vec::new();
    let mut start = address;
    let mut remaining = quantity;
    while remaining > 0 {
        let count = remaining.min(quantity_max);
        ranges.push(AddressRange { start, count });
        start = start.wrapping_add(count);
        remaining -= count;
    }
    ranges
}

/// per-sub-request timer: waits out the scan rate, tries to enqueue, and
/// re-arms with a random jitter when the queue is full
async fn run_timer(shared: Arc<EngineShared>, sub: Arc<SubRequest>) {
    let mut shutdown = shared.shutdown.clone();
    let mut delay = sub.scan_rate;
    loop {
        tokio::select! {
            _ = crate::common::shutdown_signaled(&mut shutdown) => return,
            _ = tokio::time::sleep(delay) => {}
        }
        // a fire that races the cancellation must not enqueue
        if crate::common::is_shutdown(&shutdown) {
            return;
        }

        match shared.ready_tx.try_send(sub.clone()) {
            Ok(()) => {
                tokio::select! {
                    _ = crate::common::shutdown_signaled(&mut shutdown) => return,
                    _ = sub.rearm.notified() => {}
                }
                if sub.scan_rate.is_zero() {
                    return;
                }
                delay = sub.scan_rate;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // the earliest missed tick retries within the jitter bound
                let millis = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(0..shared.rand_value.max(1))
                };
                delay = Duration::from_millis(millis);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

/// single reader: issues the matching typed read for every ready sub-request
async fn read_poll(shared: Arc<EngineShared>, mut ready: mpsc::Receiver<Arc<SubRequest>>) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        let sub = tokio::select! {
            _ = crate::common::shutdown_signaled(&mut shutdown) => {
                tracing::debug!("poll reader exit");
                return;
            }
            sub = ready.recv() => match sub {
                Some(sub) => sub,
                None => return,
            },
        };
        proc_request(&shared, &sub).await;
        sub.rearm.notify_one();
    }
}

async fn proc_request(shared: &EngineShared, sub: &SubRequest) {
    sub.tx_count.fetch_add(1, Ordering::Relaxed);
    let range = AddressRange {
        start: sub.address,
        count: sub.quantity,
    };

    let outcome = match sub.function {
        FunctionCode::ReadCoils => shared
            .client
            .read_coils(sub.unit_id, range)
            .await
            .map(|values| (values, FunctionCode::ReadCoils)),
        FunctionCode::ReadDiscreteInputs => shared
            .client
            .read_discrete_inputs(sub.unit_id, range)
            .await
            .map(|values| (values, FunctionCode::ReadDiscreteInputs)),
        FunctionCode::ReadHoldingRegisters => shared
            .client
            .read_holding_registers_bytes(sub.unit_id, range)
            .await
            .map(|values| (values, FunctionCode::ReadHoldingRegisters)),
        FunctionCode::ReadInputRegisters => shared
            .client
            .read_input_registers_bytes(sub.unit_id, range)
            .await
            .map(|values| (values, FunctionCode::ReadInputRegisters)),
        // add_gather_job only admits the four read functions
        _ => return,
    };

    let error = match outcome {
        Ok((values, function)) => {
            let handler = &shared.handler;
            let dispatch = std::panic::catch_unwind(AssertUnwindSafe(|| match function {
                FunctionCode::ReadCoils => {
                    handler.handle_coils(sub.unit_id, sub.address, sub.quantity, &values)
                }
                FunctionCode::ReadDiscreteInputs => {
                    handler.handle_discrete_inputs(sub.unit_id, sub.address, sub.quantity, &values)
                }
                FunctionCode::ReadHoldingRegisters => {
                    handler.handle_holding_registers(sub.unit_id, sub.address, sub.quantity, &values)
                }
                FunctionCode::ReadInputRegisters => {
                    handler.handle_input_registers(sub.unit_id, sub.address, sub.quantity, &values)
                }
                _ => {}
            }));
            if let Err(panic) = dispatch {
                (shared.panic_handle)(panic);
            }
            None
        }
        Err(err) => {
            sub.err_count.fetch_add(1, Ordering::Relaxed);
            Some(err)
        }
    };

    let snapshot = sub.snapshot();
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| {
        shared.handler.handle_result(error.as_ref(), &snapshot)
    })) {
        (shared.panic_handle)(panic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientProvider;
    use crate::common::pdu::ProtocolDataUnit;
    use async_trait::async_trait;

    #[test]
    fn splits_register_jobs_at_125() {
        let ranges = segment_ranges(FunctionCode::ReadHoldingRegisters, 0, 300);
        assert_eq!(
            ranges,
            vec![
                AddressRange { start: 0, count: 125 },
                AddressRange { start: 125, count: 125 },
                AddressRange { start: 250, count: 50 },
            ]
        );
    }

    #[test]
    fn splits_bit_jobs_at_2000() {
        let ranges = segment_ranges(FunctionCode::ReadCoils, 10, 2300);
        assert_eq!(
            ranges,
            vec![
                AddressRange { start: 10, count: 2000 },
                AddressRange { start: 2010, count: 300 },
            ]
        );
    }

    #[test]
    fn small_jobs_stay_whole() {
        assert_eq!(
            segment_ranges(FunctionCode::ReadInputRegisters, 5, 125),
            vec![AddressRange { start: 5, count: 125 }]
        );
    }

    /// provider that answers every read with zeroed data of the right shape
    struct ZeroProvider;

    #[async_trait]
    impl ClientProvider for ZeroProvider {
        async fn connect(&self) -> Result<(), RequestError> {
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) -> Result<(), RequestError> {
            Ok(())
        }

        async fn send(
            &self,
            _unit_id: UnitId,
            request: ProtocolDataUnit,
        ) -> Result<ProtocolDataUnit, RequestError> {
            let quantity = u16::from_be_bytes([request.data[2], request.data[3]]);
            let byte_count = match request.function_code {
                0x01 | 0x02 => crate::common::bits::num_bytes_for_bits(quantity),
                _ => 2 * quantity as usize,
            };
            let mut data = vec![byte_count as u8];
            data.resize(1 + byte_count, 0);
            Ok(ProtocolDataUnit::new(request.function_code, data))
        }

        async fn send_raw(&self, _request: &[u8]) -> Result<Vec<u8>, RequestError> {
            Err(RequestError::NoConnection)
        }
    }

    struct CountingHandler {
        results: std::sync::Mutex<Vec<GatherResult>>,
        data_calls: AtomicU64,
    }

    impl GatherHandler for Arc<CountingHandler> {
        fn handle_holding_registers(&self, _: UnitId, _: u16, _: u16, values: &[u8]) {
            assert!(!values.is_empty());
            self.data_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_result(&self, error: Option<&RequestError>, result: &GatherResult) {
            assert!(error.is_none());
            self.results.lock().unwrap().push(result.clone());
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn polls_segmented_jobs_and_reports_counters() {
        let handler = Arc::new(CountingHandler {
            results: std::sync::Mutex::new(Vec::new()),
            data_calls: AtomicU64::new(0),
        });

        let engine = PollEngine::new(
            Client::new(ZeroProvider),
            PollConfig::new().handler(handler.clone()),
        );
        engine.start().await.unwrap();
        engine
            .add_gather_job(GatherJob {
                unit_id: UnitId::new(1),
                function: FunctionCode::ReadHoldingRegisters,
                address: 0,
                quantity: 300,
                scan_rate: Duration::from_millis(100),
            })
            .unwrap();

        // three sub-requests fire once per scan interval
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handler.data_calls.load(Ordering::SeqCst), 3);
        {
            let results = handler.results.lock().unwrap();
            assert_eq!(results.len(), 3);
            let mut quantities: Vec<u16> = results.iter().map(|r| r.quantity).collect();
            quantities.sort_unstable();
            assert_eq!(quantities, vec![50, 125, 125]);
            assert!(results.iter().all(|r| r.tx_count == 1 && r.err_count == 0));
        }

        // a second interval doubles the counters
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.data_calls.load(Ordering::SeqCst), 6);

        engine.close().await.unwrap();
        let drained = handler.results.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.results.lock().unwrap().len(), drained);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn rejects_invalid_jobs() {
        let engine = PollEngine::new(Client::new(ZeroProvider), PollConfig::new());
        let job = GatherJob {
            unit_id: UnitId::new(0),
            function: FunctionCode::ReadCoils,
            address: 0,
            quantity: 1,
            scan_rate: Duration::from_secs(1),
        };
        assert!(matches!(
            engine.add_gather_job(job.clone()),
            Err(RequestError::BadRequest(InvalidRequest::UnitIdNotAllowed(0)))
        ));

        let write_job = GatherJob {
            unit_id: UnitId::new(1),
            function: FunctionCode::WriteSingleCoil,
            ..job
        };
        assert!(matches!(
            engine.add_gather_job(write_job),
            Err(RequestError::BadRequest(InvalidRequest::FunctionNotPollable(5)))
        ));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn panicking_handlers_are_routed() {
        struct PanickyHandler;
        impl GatherHandler for PanickyHandler {
            fn handle_holding_registers(&self, _: UnitId, _: u16, _: u16, _: &[u8]) {
                panic!("handler exploded");
            }
        }

        let panics = Arc::new(AtomicU64::new(0));
        let seen = panics.clone();
        let engine = PollEngine::new(
            Client::new(ZeroProvider),
            PollConfig::new()
                .handler(PanickyHandler)
                .panic_handle(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
        );
        engine.start().await.unwrap();
        engine
            .add_gather_job(GatherJob {
                unit_id: UnitId::new(1),
                function: FunctionCode::ReadHoldingRegisters,
                address: 0,
                quantity: 10,
                scan_rate: Duration::from_millis(50),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(panics.load(Ordering::SeqCst) >= 1);
        engine.close().await.unwrap();
    }
}
