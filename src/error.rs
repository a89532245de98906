use crate::exception::ExceptionCode;

/// The errors that can be produced when making a request or serving one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying transport
    Io(std::io::ErrorKind),
    /// The server replied with a proper MODBUS exception
    Exception(ExceptionCode),
    /// The request could not be validated before any I/O took place
    BadRequest(InvalidRequest),
    /// A frame could not be parsed off the wire
    BadFrame(FrameParseError),
    /// A response frame parsed, but its contents did not match the request
    BadResponse(AduParseError),
    /// A read deadline elapsed before a complete response arrived
    ResponseTimeout,
    /// The transport is not connected
    NoConnection,
    /// The component was shut down
    Shutdown,
    /// An internal cursor error, this is a bug in the library if it ever occurs
    Internal(InternalError),
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "I/O error: {kind:?}"),
            RequestError::Exception(code) => write!(f, "MODBUS exception: {code}"),
            RequestError::BadRequest(err) => write!(f, "{err}"),
            RequestError::BadFrame(err) => write!(f, "{err}"),
            RequestError::BadResponse(err) => write!(f, "{err}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before a complete response was received")
            }
            RequestError::NoConnection => f.write_str("no connection exists to the peer"),
            RequestError::Shutdown => f.write_str("the component has been shut down"),
            RequestError::Internal(err) => write!(f, "{err}"),
        }
    }
}

/// Errors that result from a bad request parameter, detected before any I/O
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// The slave id is not usable for this operation
    UnitIdNotAllowed(u8),
    /// The request contains a count of zero
    CountOfZero,
    /// start + count would overflow the u16 address space
    AddressOverflow(u16, u16),
    /// The count exceeds the maximum allowed for this request type
    CountTooBigForType(u16, u16),
    /// An encoded PDU must be between 1 and 253 bytes
    PduSizeOutOfRange(usize),
    /// Encoding would exceed the transport's maximum ADU size
    FrameTooLarge(usize, usize),
    /// The supplied value bytes do not agree with the requested quantity
    ValueLengthMismatch(usize, usize),
    /// The function code cannot be scheduled by the polling engine
    FunctionNotPollable(u8),
    /// The remote server URL is missing or cannot be parsed
    InvalidServerUrl,
    /// The server is already running
    ServerAlreadyRunning,
}

impl std::error::Error for InvalidRequest {}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidRequest::UnitIdNotAllowed(id) => {
                write!(f, "slave id {id} is not allowed for this operation")
            }
            InvalidRequest::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRequest::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the u16 address space"
            ),
            InvalidRequest::CountTooBigForType(count, max) => write!(
                f,
                "the requested count of {count} exceeds the maximum allowed count of {max} for this type"
            ),
            InvalidRequest::PduSizeOutOfRange(size) => {
                write!(f, "PDU size of {size} is outside the allowed range [1, 253]")
            }
            InvalidRequest::FrameTooLarge(size, max) => write!(
                f,
                "encoded frame length of {size} exceeds the transport maximum of {max}"
            ),
            InvalidRequest::ValueLengthMismatch(actual, expected) => write!(
                f,
                "value byte length of {actual} does not match the {expected} bytes implied by the quantity"
            ),
            InvalidRequest::FunctionNotPollable(fc) => {
                write!(f, "function code {fc} cannot be scheduled for periodic reads")
            }
            InvalidRequest::InvalidServerUrl => {
                f.write_str("remote server URL is missing or cannot be parsed")
            }
            InvalidRequest::ServerAlreadyRunning => f.write_str("the server is already running"),
        }
    }
}

/// Errors that occur while parsing a frame off a stream or byte slice
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received an MBAP header with the length field set to zero
    MbapLengthZero,
    /// Received a frame whose length exceeds the transport maximum
    FrameLengthTooBig(usize, usize),
    /// The frame is shorter than the transport minimum
    FrameTooShort(usize, usize),
    /// The RTU CRC did not validate
    CrcMismatch(u16, u16),
    /// The ASCII LRC did not validate
    LrcMismatch(u8, u8),
    /// An ASCII frame did not begin with `:`
    MissingColonDelimiter,
    /// An ASCII frame did not end with CRLF
    MissingCrLfTerminator,
    /// An ASCII frame contained an odd number of hex characters
    OddCharacterCount(usize),
    /// An ASCII frame contained a character that is not uppercase hex
    InvalidHexCharacter(u8),
    /// The function code does not allow the reader to size the response
    UnknownFunctionCode(u8),
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received MBAP header with a length field of zero")
            }
            FrameParseError::FrameLengthTooBig(length, max) => write!(
                f,
                "received frame with length {length} that exceeds the maximum allowed size of {max}"
            ),
            FrameParseError::FrameTooShort(length, min) => write!(
                f,
                "received frame with length {length} that does not meet the minimum of {min}"
            ),
            FrameParseError::CrcMismatch(received, expected) => write!(
                f,
                "received CRC {received:#06X} does not match the computed value {expected:#06X}"
            ),
            FrameParseError::LrcMismatch(received, expected) => write!(
                f,
                "received LRC {received:#04X} does not match the computed value {expected:#04X}"
            ),
            FrameParseError::MissingColonDelimiter => {
                f.write_str("ASCII frame does not begin with ':'")
            }
            FrameParseError::MissingCrLfTerminator => {
                f.write_str("ASCII frame does not end with CRLF")
            }
            FrameParseError::OddCharacterCount(count) => {
                write!(f, "ASCII frame contains an odd number of hex characters: {count}")
            }
            FrameParseError::InvalidHexCharacter(byte) => {
                write!(f, "ASCII frame contains a non-hex character: {byte:#04X}")
            }
            FrameParseError::UnknownFunctionCode(fc) => {
                write!(f, "cannot size a response for unknown function code {fc:#04X}")
            }
        }
    }
}

/// Errors that occur while interpreting a parsed response against its request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// The response transaction id does not match the request
    TxIdMismatch(u16, u16),
    /// The response protocol id is not zero
    ProtocolIdMismatch(u16),
    /// The response slave id does not match the request
    UnitIdMismatch(u8, u8),
    /// The response function code matches neither the request nor its error form
    FunctionCodeMismatch(u8, u8),
    /// The response carries no data at all
    EmptyResponseData,
    /// The MBAP length field disagrees with the actual number of bytes
    MbapLengthMismatch(usize, usize),
    /// The declared byte count disagrees with the body, or with the request quantity
    ByteCountMismatch(usize, usize),
    /// A field expected to be echoed in the reply did not match
    EchoMismatch,
    /// The FIFO count exceeds the allowed maximum of 31
    FifoCountTooBig(u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AduParseError::TxIdMismatch(response, request) => write!(
                f,
                "response transaction id {response} does not match request {request}"
            ),
            AduParseError::ProtocolIdMismatch(id) => {
                write!(f, "response protocol id {id} is not the MODBUS protocol id")
            }
            AduParseError::UnitIdMismatch(response, request) => {
                write!(f, "response slave id {response} does not match request {request}")
            }
            AduParseError::FunctionCodeMismatch(response, request) => write!(
                f,
                "response function code {response:#04X} does not match request {request:#04X}"
            ),
            AduParseError::EmptyResponseData => f.write_str("response data is empty"),
            AduParseError::MbapLengthMismatch(actual, declared) => write!(
                f,
                "response PDU length of {actual} does not match the {declared} declared in the header"
            ),
            AduParseError::ByteCountMismatch(actual, expected) => write!(
                f,
                "response byte count {actual} does not match the expected value {expected}"
            ),
            AduParseError::EchoMismatch => {
                f.write_str("a field expected to be echoed in the reply did not match")
            }
            AduParseError::FifoCountTooBig(count) => {
                write!(f, "FIFO count of {count} is greater than the allowed 31")
            }
        }
    }
}

/// Cursor over/underflow errors. These indicate a bug in the library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Attempted to read more bytes than remained in the input
    InsufficientBytesForRead,
    /// Attempted to write past the end of the output buffer
    InsufficientWriteSpace,
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InternalError::InsufficientBytesForRead => {
                f.write_str("attempted to read more bytes than remained in the input")
            }
            InternalError::InsufficientWriteSpace => {
                f.write_str("attempted to write past the end of the output buffer")
            }
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(code: ExceptionCode) -> Self {
        RequestError::Exception(code)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<scursor::ReadError> for RequestError {
    fn from(_: scursor::ReadError) -> Self {
        RequestError::Internal(InternalError::InsufficientBytesForRead)
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(_: scursor::WriteError) -> Self {
        RequestError::Internal(InternalError::InsufficientWriteSpace)
    }
}

impl From<tokio::time::error::Elapsed> for RequestError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RequestError::ResponseTimeout
    }
}
