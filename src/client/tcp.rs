use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::client::{verify_function_and_data, ClientProvider};
use crate::common::frame::{FrameHeader, TxId};
use crate::common::pdu::{PduDisplay, ProtocolDataUnit};
use crate::common::phys::PhysLayer;
use crate::constants::frame::{MAX_MBAP_LENGTH_FIELD, MAX_TCP_ADU_SIZE, MBAP_HEADER_LENGTH};
use crate::decode::DecodeLevel;
use crate::error::{AduParseError, FrameParseError, RequestError};
use crate::tcp::frame as mbap;
use crate::types::UnitId;

/// default connect/read/write deadline for TCP clients
pub const TCP_DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

struct TcpState {
    phys: Option<PhysLayer>,
    tx: Vec<u8>,
    rx: Vec<u8>,
}

/// [`ClientProvider`](crate::client::ClientProvider) over MODBUS/TCP
///
/// The connection is opened lazily on the first request and reopened on
/// demand after a fatal I/O error. A per-provider transaction id counter
/// correlates responses with requests.
pub struct TcpClientProvider {
    address: String,
    timeout: Duration,
    decode: DecodeLevel,
    tx_id: AtomicU16,
    state: tokio::sync::Mutex<TcpState>,
}

impl TcpClientProvider {
    /// create a provider for `host:port`
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            timeout: TCP_DEFAULT_TIMEOUT,
            decode: DecodeLevel::nothing(),
            tx_id: AtomicU16::new(0),
            state: tokio::sync::Mutex::new(TcpState {
                phys: None,
                tx: Vec::with_capacity(MAX_TCP_ADU_SIZE),
                rx: Vec::with_capacity(MAX_TCP_ADU_SIZE),
            }),
        }
    }

    /// set the connect & read deadline applied to every call
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// set what this provider decodes into the log
    pub fn set_decode_level(&mut self, decode: DecodeLevel) {
        self.decode = decode;
    }

    fn next_tx_id(&self) -> TxId {
        TxId::new(self.tx_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
    }

    async fn ensure_connected(&self, state: &mut TcpState) -> Result<(), RequestError> {
        if state.phys.is_none() {
            let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.address.as_str()))
                .await
                .map_err(|_| RequestError::Io(std::io::ErrorKind::TimedOut))??;
            state.phys = Some(PhysLayer::new_tcp(stream, self.decode.physical));
        }
        Ok(())
    }

    /// write `state.tx` and read exactly one response ADU into `state.rx`
    async fn transact(&self, state: &mut TcpState) -> Result<(), RequestError> {
        let TcpState { phys, tx, rx } = state;
        let io = phys.as_mut().ok_or(RequestError::NoConnection)?;

        if let Err(err) = tokio::time::timeout(self.timeout, io.write(tx)).await? {
            *phys = None;
            return Err(err.into());
        }

        rx.clear();
        rx.resize(MBAP_HEADER_LENGTH, 0);
        if let Err(err) = tokio::time::timeout(self.timeout, io.read_exact(rx)).await? {
            *phys = None;
            return Err(err.into());
        }

        // the length field counts the unit id which is already part of the header
        let length = u16::from_be_bytes([rx[4], rx[5]]) as usize;
        if length == 0 {
            *phys = None;
            return Err(FrameParseError::MbapLengthZero.into());
        }
        if length > MAX_MBAP_LENGTH_FIELD {
            *phys = None;
            return Err(FrameParseError::FrameLengthTooBig(length, MAX_MBAP_LENGTH_FIELD).into());
        }

        rx.resize(MBAP_HEADER_LENGTH + length - 1, 0);
        if let Err(err) = tokio::time::timeout(
            self.timeout,
            io.read_exact(&mut rx[MBAP_HEADER_LENGTH..]),
        )
        .await?
        {
            *phys = None;
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ClientProvider for TcpClientProvider {
    async fn connect(&self) -> Result<(), RequestError> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.phys.is_some()
    }

    async fn close(&self) -> Result<(), RequestError> {
        self.state.lock().await.phys = None;
        Ok(())
    }

    async fn send(
        &self,
        unit_id: UnitId,
        request: ProtocolDataUnit,
    ) -> Result<ProtocolDataUnit, RequestError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.ensure_connected(state).await?;

        if self.decode.app.enabled() {
            tracing::info!(
                "PDU TX - {}",
                PduDisplay::new(self.decode.app, request.function_code, &request.data)
            );
        }

        let header = FrameHeader::new(unit_id, self.next_tx_id());
        let request_header =
            mbap::encode_request(&mut state.tx, header, request.function_code, &request.data)?;
        if self.decode.frame.enabled() {
            tracing::info!(
                "MBAP TX - {}",
                mbap::MbapDisplay::new(self.decode.frame, request_header, &state.tx[MBAP_HEADER_LENGTH..])
            );
        }

        self.transact(state).await?;

        let (response_header, pdu) = mbap::decode_response(&state.rx)?;
        if self.decode.frame.enabled() {
            tracing::info!(
                "MBAP RX - {}",
                mbap::MbapDisplay::new(self.decode.frame, response_header, pdu)
            );
        }

        if response_header.tx_id != request_header.tx_id {
            return Err(AduParseError::TxIdMismatch(
                response_header.tx_id.to_u16(),
                request_header.tx_id.to_u16(),
            )
            .into());
        }
        if response_header.protocol_id != request_header.protocol_id {
            return Err(AduParseError::ProtocolIdMismatch(response_header.protocol_id).into());
        }
        if response_header.unit_id != request_header.unit_id {
            return Err(AduParseError::UnitIdMismatch(
                response_header.unit_id.value,
                request_header.unit_id.value,
            )
            .into());
        }

        let function_code = pdu[0];
        let data = &pdu[1..];
        verify_function_and_data(request.function_code, function_code, data)?;
        if self.decode.app.enabled() {
            tracing::info!(
                "PDU RX - {}",
                PduDisplay::new(self.decode.app, function_code, data)
            );
        }
        Ok(ProtocolDataUnit::new(function_code, data.to_vec()))
    }

    async fn send_raw(&self, request: &[u8]) -> Result<Vec<u8>, RequestError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.ensure_connected(state).await?;

        state.tx.clear();
        state.tx.extend_from_slice(request);
        self.transact(state).await?;
        Ok(state.rx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_strictly_increase_and_wrap() {
        let provider = TcpClientProvider::new("127.0.0.1:502");
        for expected in 1..=5u16 {
            assert_eq!(provider.next_tx_id(), TxId::new(expected));
        }

        let provider = TcpClientProvider::new("127.0.0.1:502");
        provider.tx_id.store(u16::MAX - 1, Ordering::Relaxed);
        assert_eq!(provider.next_tx_id(), TxId::new(u16::MAX));
        assert_eq!(provider.next_tx_id(), TxId::new(0));
        assert_eq!(provider.next_tx_id(), TxId::new(1));
    }
}
