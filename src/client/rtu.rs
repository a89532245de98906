use async_trait::async_trait;

use crate::client::serial::{SerialCore, SerialState, SERIAL_MAX_AUTO_RECONNECT};
use crate::client::{verify_function_and_data, ClientProvider};
use crate::common::pdu::{PduDisplay, ProtocolDataUnit};
use crate::constants::frame::{MAX_RTU_ADU_SIZE, MIN_RTU_ADU_SIZE};
use crate::decode::DecodeLevel;
use crate::error::{AduParseError, FrameParseError, RequestError};
use crate::function::constants as fc;
use crate::serial::frame as rtu;
use crate::serial::SerialSettings;
use crate::types::UnitId;

/// [`ClientProvider`](crate::client::ClientProvider) over MODBUS RTU
///
/// RTU is a raw byte stream without a length prefix, so the reader sizes the
/// response from the request's function code and quantity, falling back to
/// the read deadline where the length is undetermined.
pub struct RtuClientProvider {
    core: SerialCore,
}

impl RtuClientProvider {
    /// create a provider for the given serial settings
    ///
    /// [`connect`](crate::client::ClientProvider::connect) must be called
    /// before the first request.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            core: SerialCore::new(settings, MAX_RTU_ADU_SIZE),
        }
    }

    /// replace the serial configuration; takes effect on the next open
    pub fn set_serial_settings(&mut self, settings: SerialSettings) {
        self.core.settings = settings;
    }

    /// number of reconnect attempts after a failed write, clamped to [0, 6];
    /// zero disables reconnection
    pub fn set_auto_reconnect(&mut self, count: u8) {
        self.core.auto_reconnect = count.min(SERIAL_MAX_AUTO_RECONNECT);
    }

    /// set what this provider decodes into the log
    pub fn set_decode_level(&mut self, decode: DecodeLevel) {
        self.core.decode = decode;
    }

    /// write `state.tx` and accumulate one response ADU in `state.rx`,
    /// returning its length
    async fn transact(&self, state: &mut SerialState) -> Result<usize, RequestError> {
        if state.tx.len() < MIN_RTU_ADU_SIZE {
            return Err(FrameParseError::FrameTooShort(state.tx.len(), MIN_RTU_ADU_SIZE).into());
        }
        self.core.write_request(state).await?;

        let request_function = state.tx[1];
        let expected = rtu::expected_response_len(&state.tx);
        let delay = rtu::turnaround_delay(
            state.tx.len() + expected.unwrap_or(0),
            self.core.settings.baud_rate,
        );
        tokio::time::sleep(delay).await;

        let SerialState { phys, tx: _, rx } = state;
        let port = phys.as_mut().ok_or(RequestError::NoConnection)?;
        rx.clear();
        rx.resize(MAX_RTU_ADU_SIZE, 0);

        // read the minimum frame first, then either the sized remainder or
        // the exception frame depending on the echoed function code
        let mut count = 0;
        while count < MIN_RTU_ADU_SIZE {
            let progress = self.core.read_some(port, &mut rx[count..]).await?;
            if progress == 0 {
                return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
            }
            count += progress;
        }

        if rx[1] == request_function {
            match expected {
                Some(total) => {
                    if total > MIN_RTU_ADU_SIZE && total <= MAX_RTU_ADU_SIZE {
                        while count < total {
                            let progress = self.core.read_some(port, &mut rx[count..total]).await?;
                            if progress == 0 {
                                return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
                            }
                            count += progress;
                        }
                    }
                }
                None => {
                    // undetermined length (FC 24): collect until the read
                    // deadline fires and let CRC validation decide
                    loop {
                        match self.core.read_some(port, &mut rx[count..]).await {
                            Ok(0) => break,
                            Ok(progress) => count += progress,
                            Err(RequestError::ResponseTimeout) => break,
                            Err(err) => return Err(err),
                        }
                    }
                }
            }
        } else if rx[1] == request_function | fc::ERROR_DELIMITER {
            let total = rtu::exception_response_len();
            while count < total {
                let progress = self.core.read_some(port, &mut rx[count..total]).await?;
                if progress == 0 {
                    return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
                }
                count += progress;
            }
        } else {
            return Err(FrameParseError::UnknownFunctionCode(rx[1]).into());
        }

        Ok(count)
    }
}

#[async_trait]
impl ClientProvider for RtuClientProvider {
    async fn connect(&self) -> Result<(), RequestError> {
        self.core.connect().await
    }

    async fn is_connected(&self) -> bool {
        self.core.is_connected().await
    }

    async fn close(&self) -> Result<(), RequestError> {
        self.core.close().await
    }

    async fn send(
        &self,
        unit_id: UnitId,
        request: ProtocolDataUnit,
    ) -> Result<ProtocolDataUnit, RequestError> {
        let mut guard = self.core.state.lock().await;
        let state = &mut *guard;
        if state.phys.is_none() {
            return Err(RequestError::NoConnection);
        }

        if self.core.decode.app.enabled() {
            tracing::info!(
                "PDU TX - {}",
                PduDisplay::new(self.core.decode.app, request.function_code, &request.data)
            );
        }

        rtu::encode_request(&mut state.tx, unit_id, request.function_code, &request.data)?;
        let count = self.transact(state).await?;

        let (response_unit, pdu) = rtu::decode_response(&state.rx[..count])?;
        if self.core.decode.frame.enabled() {
            tracing::info!(
                "RTU RX - unit: {} (len = {})",
                response_unit,
                pdu.len()
            );
        }
        if response_unit != unit_id {
            return Err(AduParseError::UnitIdMismatch(response_unit.value, unit_id.value).into());
        }
        verify_function_and_data(request.function_code, pdu[0], &pdu[1..])?;
        if self.core.decode.app.enabled() {
            tracing::info!(
                "PDU RX - {}",
                PduDisplay::new(self.core.decode.app, pdu[0], &pdu[1..])
            );
        }
        Ok(ProtocolDataUnit::new(pdu[0], pdu[1..].to_vec()))
    }

    async fn send_raw(&self, request: &[u8]) -> Result<Vec<u8>, RequestError> {
        let mut guard = self.core.state.lock().await;
        let state = &mut *guard;
        if state.phys.is_none() {
            return Err(RequestError::NoConnection);
        }

        state.tx.clear();
        state.tx.extend_from_slice(request);
        let count = self.transact(state).await?;
        Ok(state.rx[..count].to_vec())
    }
}
