/// Reasons a received buffer is rejected as a frame.
///
/// None of these are fatal: the buffer is dropped and any previously decoded
/// state stays as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Frame too short - received={0} bytes")]
    TooShort(usize),
    #[error("Incorrect start of frame")]
    BadPreamble,
    #[error("Incorrect frame length - expected={expected} received={received}")]
    LengthMismatch { expected: usize, received: usize },
    #[error("Invalid checksum - calculated={calculated:02X} received={received:02X}")]
    ChecksumMismatch { calculated: u8, received: u8 },
}
