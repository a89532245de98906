use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::common::frame::Frame;
use crate::common::phys::PhysLayer;
use crate::constants::frame::{MAX_TCP_ADU_SIZE, MBAP_HEADER_LENGTH};
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::function::constants as fc;
use crate::server::ServerCommon;
use crate::tcp::frame::{FramedReader, MbapDisplay, MbapHeader, MODBUS_PROTOCOL_ID};

/// default deadline for reading one request frame
pub const SERVER_DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// default deadline for writing one response frame
pub const SERVER_DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Serves a single connected peer: frames requests, dispatches them into the
/// register bank, writes replies. Runs until cancelled, until the peer
/// closes, or until an I/O error.
pub(crate) struct SessionTask {
    io: PhysLayer,
    common: Arc<ServerCommon>,
    read_timeout: Duration,
    write_timeout: Duration,
    decode: DecodeLevel,
    shutdown: watch::Receiver<bool>,
    reader: FramedReader,
    response: Vec<u8>,
}

impl SessionTask {
    pub(crate) fn new(
        io: PhysLayer,
        common: Arc<ServerCommon>,
        read_timeout: Duration,
        write_timeout: Duration,
        decode: DecodeLevel,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            io,
            common,
            read_timeout,
            write_timeout,
            decode,
            shutdown,
            reader: FramedReader::new(decode.frame),
            response: Vec::with_capacity(MAX_TCP_ADU_SIZE),
        }
    }

    /// run the session to completion, returning the reason it ended
    pub(crate) async fn run(&mut self) -> RequestError {
        loop {
            let next = tokio::select! {
                _ = crate::common::shutdown_signaled(&mut self.shutdown) => {
                    return RequestError::Shutdown;
                }
                next = tokio::time::timeout(
                    self.read_timeout,
                    self.reader.next_frame(&mut self.io),
                ) => next,
            };

            let frame = match next {
                Err(_) => {
                    tracing::warn!("no request within the read deadline, closing session");
                    return RequestError::ResponseTimeout;
                }
                Ok(Err(err)) => {
                    tracing::debug!("session ended: {}", err);
                    return err;
                }
                Ok(Ok(frame)) => frame,
            };

            if let Err(err) = self.reply_to_request(frame).await {
                return err;
            }
        }
    }

    async fn reply_to_request(&mut self, frame: Frame) -> Result<(), RequestError> {
        let payload = frame.payload();
        let (function_code, data) = match payload.split_first() {
            Some((fc, data)) => (*fc, data),
            None => {
                tracing::warn!("received an empty frame");
                return Ok(());
            }
        };

        // unknown slave ids are silently ignored
        let node = match self.common.nodes.get_node(frame.header.unit_id) {
            Some(node) => node,
            None => {
                tracing::debug!(
                    "ignoring frame for unmapped slave id: {}",
                    frame.header.unit_id
                );
                return Ok(());
            }
        };

        let outcome = match self.common.functions.get(function_code) {
            Some(handler) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&node, data))) {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!(
                            "handler for function code {:#04X} panicked, dropping the request",
                            function_code
                        );
                        return Ok(());
                    }
                }
            }
            None => Err(ExceptionCode::IllegalFunction),
        };

        // a broadcast write is applied but never answered
        if frame.header.unit_id.is_broadcast() {
            return Ok(());
        }

        let (function_code, body) = match outcome {
            Ok(body) => (function_code, body),
            Err(code) => (function_code | fc::ERROR_DELIMITER, vec![u8::from(code)]),
        };

        // the reply reuses the request's transaction and unit id
        let length_field = (2 + body.len()) as u16;
        self.response.clear();
        self.response
            .extend_from_slice(&frame.header.tx_id.to_u16().to_be_bytes());
        self.response
            .extend_from_slice(&MODBUS_PROTOCOL_ID.to_be_bytes());
        self.response.extend_from_slice(&length_field.to_be_bytes());
        self.response.push(frame.header.unit_id.value);
        self.response.push(function_code);
        self.response.extend_from_slice(&body);

        if self.decode.frame.enabled() {
            let header = MbapHeader {
                tx_id: frame.header.tx_id,
                protocol_id: MODBUS_PROTOCOL_ID,
                length: length_field,
                unit_id: frame.header.unit_id,
            };
            tracing::info!(
                "MBAP TX - {}",
                MbapDisplay::new(self.decode.frame, header, &self.response[MBAP_HEADER_LENGTH..])
            );
        }

        tokio::time::timeout(self.write_timeout, self.io.write(&self.response)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PhysDecodeLevel;
    use crate::server::node::{NodeRegister, RegisterLayout, RegisterSpan};
    use crate::types::UnitId;

    fn common_with_node(unit: u8) -> Arc<ServerCommon> {
        let common = Arc::new(ServerCommon::default());
        common.nodes.add_node(NodeRegister::new(
            UnitId::new(unit),
            RegisterLayout {
                coils: RegisterSpan::new(0, 16),
                holding_registers: RegisterSpan::new(0, 8),
                ..RegisterLayout::default()
            },
        ));
        common
    }

    fn run_session(common: Arc<ServerCommon>, io: tokio_test::io::Mock) -> RequestError {
        let (_tx, rx) = watch::channel(false);
        let mut task = SessionTask::new(
            PhysLayer::new_mock(io, PhysDecodeLevel::Nothing),
            common,
            SERVER_DEFAULT_READ_TIMEOUT,
            SERVER_DEFAULT_WRITE_TIMEOUT,
            DecodeLevel::nothing(),
            rx,
        );
        tokio_test::block_on(task.run())
    }

    #[test]
    fn answers_a_read_coils_request() {
        let request = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x0A,
        ];
        let response = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x01, 0x02, 0x00, 0x00,
        ];
        let io = tokio_test::io::Builder::new()
            .read(&request)
            .write(&response)
            .build();
        // EOF after one exchange surfaces as an unexpected-eof error
        assert_eq!(
            run_session(common_with_node(1), io),
            RequestError::Io(std::io::ErrorKind::UnexpectedEof)
        );
    }

    #[test]
    fn encodes_exceptions_with_the_error_bit() {
        // read 2 holding registers at address 7: only 8 configured -> illegal address
        let request = [
            0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x07, 0x00, 0x02,
        ];
        let response = [0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        let io = tokio_test::io::Builder::new()
            .read(&request)
            .write(&response)
            .build();
        assert_eq!(
            run_session(common_with_node(1), io),
            RequestError::Io(std::io::ErrorKind::UnexpectedEof)
        );
    }

    #[test]
    fn unknown_function_codes_yield_illegal_function() {
        let request = [0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x01, 0x2B, 0x0E, 0x01];
        let response = [0x00, 0x03, 0x00, 0x00, 0x00, 0x03, 0x01, 0xAB, 0x01];
        let io = tokio_test::io::Builder::new()
            .read(&request)
            .write(&response)
            .build();
        assert_eq!(
            run_session(common_with_node(1), io),
            RequestError::Io(std::io::ErrorKind::UnexpectedEof)
        );
    }

    #[test]
    fn silently_drops_unknown_slave_ids() {
        // a frame for slave 9 followed by one for slave 1: only the second
        // is answered
        let ignored = [
            0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x09, 0x01, 0x00, 0x00, 0x00, 0x01,
        ];
        let answered = [
            0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01,
        ];
        let response = [0x00, 0x05, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x00];
        let io = tokio_test::io::Builder::new()
            .read(&ignored)
            .read(&answered)
            .write(&response)
            .build();
        assert_eq!(
            run_session(common_with_node(1), io),
            RequestError::Io(std::io::ErrorKind::UnexpectedEof)
        );
    }

    #[test]
    fn broadcast_writes_are_applied_but_not_answered() {
        let common = common_with_node(0);
        // write single coil, address 2, ON, unit id 0
        let request = [
            0x00, 0x06, 0x00, 0x00, 0x00, 0x06, 0x00, 0x05, 0x00, 0x02, 0xFF, 0x00,
        ];
        let io = tokio_test::io::Builder::new().read(&request).build();
        assert_eq!(
            run_session(common.clone(), io),
            RequestError::Io(std::io::ErrorKind::UnexpectedEof)
        );
        let node = common.nodes.get_node(UnitId::broadcast()).unwrap();
        assert!(node.read_coil(2).unwrap());
    }

    #[test]
    fn recovers_a_panicking_handler() {
        let common = common_with_node(1);
        common
            .functions
            .register(0x41, Arc::new(|_, _| panic!("boom")));
        // the panicking request gets no reply, the next request is served
        let poisoned = [0x00, 0x07, 0x00, 0x00, 0x00, 0x02, 0x01, 0x41];
        let request = [
            0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01,
        ];
        let response = [0x00, 0x08, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x00];
        let io = tokio_test::io::Builder::new()
            .read(&poisoned)
            .read(&request)
            .write(&response)
            .build();
        assert_eq!(
            run_session(common, io),
            RequestError::Io(std::io::ErrorKind::UnexpectedEof)
        );
    }
}
