use async_trait::async_trait;

use crate::client::serial::{SerialCore, SerialState, SERIAL_MAX_AUTO_RECONNECT};
use crate::client::{verify_function_and_data, ClientProvider};
use crate::common::pdu::{PduDisplay, ProtocolDataUnit};
use crate::constants::frame::{MAX_ASCII_ADU_CHARS, MIN_ASCII_BINARY_SIZE};
use crate::decode::DecodeLevel;
use crate::error::{AduParseError, RequestError};
use crate::serial::ascii;
use crate::serial::SerialSettings;
use crate::types::UnitId;

/// [`ClientProvider`](crate::client::ClientProvider) over MODBUS ASCII
///
/// Responses are accumulated until the trailing CRLF arrives, capped at the
/// 513-character maximum.
pub struct AsciiClientProvider {
    core: SerialCore,
}

impl AsciiClientProvider {
    /// create a provider for the given serial settings
    ///
    /// [`connect`](crate::client::ClientProvider::connect) must be called
    /// before the first request.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            core: SerialCore::new(settings, MAX_ASCII_ADU_CHARS),
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

    /// write `state.tx` and accumulate characters in `state.rx` until the
    /// CRLF terminator, the size cap, or a zero-length read
    async fn transact(&self, state: &mut SerialState) -> Result<usize, RequestError> {
        self.core.write_request(state).await?;

        let SerialState { phys, tx: _, rx } = state;
        let port = phys.as_mut().ok_or(RequestError::NoConnection)?;
        rx.clear();
        rx.resize(MAX_ASCII_ADU_CHARS, 0);

        let mut count = 0;
        loop {
            let progress = self.core.read_some(port, &mut rx[count..]).await?;
            if progress == 0 {
                break;
            }
            count += progress;
            if count >= MAX_ASCII_ADU_CHARS {
                break;
            }
            if count > MIN_ASCII_BINARY_SIZE && rx[count - ascii::CRLF.len()..count] == *ascii::CRLF
            {
                break;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl ClientProvider for AsciiClientProvider {
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

        ascii::encode_request(&mut state.tx, unit_id, request.function_code, &request.data)?;
        let count = self.transact(state).await?;

        let (response_unit, pdu) = ascii::decode_response(&state.rx[..count])?;
        if self.core.decode.frame.enabled() {
            tracing::info!(
                "ASCII RX - unit: {} (len = {})",
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
