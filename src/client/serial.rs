use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::serial::{open, SerialSettings};

/// default number of reconnect attempts after a failed serial write
pub const SERIAL_DEFAULT_AUTO_RECONNECT: u8 = 1;
/// largest allowed number of reconnect attempts
pub const SERIAL_MAX_AUTO_RECONNECT: u8 = 6;

pub(crate) struct SerialState {
    pub(crate) phys: Option<PhysLayer>,
    pub(crate) tx: Vec<u8>,
    pub(crate) rx: Vec<u8>,
}

/// Transport core shared by the RTU and ASCII providers: one serial port
/// behind a mutex, a reusable frame buffer pair, and the write-side
/// reconnect discipline.
pub(crate) struct SerialCore {
    pub(crate) settings: SerialSettings,
    pub(crate) auto_reconnect: u8,
    pub(crate) decode: DecodeLevel,
    pub(crate) state: tokio::sync::Mutex<SerialState>,
}

impl SerialCore {
    pub(crate) fn new(settings: SerialSettings, buffer_size: usize) -> Self {
        Self {
            settings,
            auto_reconnect: SERIAL_DEFAULT_AUTO_RECONNECT,
            decode: DecodeLevel::nothing(),
            state: tokio::sync::Mutex::new(SerialState {
                phys: None,
                tx: Vec::with_capacity(buffer_size),
                rx: Vec::with_capacity(buffer_size),
            }),
        }
    }

    pub(crate) async fn connect(&self) -> Result<(), RequestError> {
        let mut state = self.state.lock().await;
        if state.phys.is_none() {
            let port = open(&self.settings)?;
            state.phys = Some(PhysLayer::new_serial(port, self.decode.physical));
        }
        Ok(())
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.state.lock().await.phys.is_some()
    }

    pub(crate) async fn close(&self) -> Result<(), RequestError> {
        self.state.lock().await.phys = None;
        Ok(())
    }

    /// write `state.tx` to the port, reopening the port and retrying the
    /// write after a failure, bounded by `auto_reconnect` failed writes
    pub(crate) async fn write_request(&self, state: &mut SerialState) -> Result<(), RequestError> {
        let mut attempts = 0u8;
        loop {
            let SerialState { phys, tx, .. } = state;
            let port = phys.as_mut().ok_or(RequestError::NoConnection)?;
            match port.write(tx).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if self.auto_reconnect == 0 || attempts >= self.auto_reconnect {
                        return Err(err.into());
                    }
                    attempts += 1;
                    tracing::warn!("serial write failed, reopening the port: {}", err);
                    *phys = None;
                    match open(&self.settings) {
                        Ok(port) => {
                            *phys = Some(PhysLayer::new_serial(port, self.decode.physical));
                        }
                        Err(reopen) => return Err(reopen.into()),
                    }
                }
            }
        }
    }

    /// single read from the port under the configured deadline
    pub(crate) async fn read_some(
        &self,
        phys: &mut PhysLayer,
        buffer: &mut [u8],
    ) -> Result<usize, RequestError> {
        let count = tokio::time::timeout(self.settings.timeout, phys.read(buffer)).await??;
        Ok(count)
    }
}
