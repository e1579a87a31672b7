/*++

Licensed under the Apache-2.0 license.

File Name:

    protocol.rs

Abstract:

    File contains the wire format of the device proxy: packet header,
    error codes, payload readers and the outbound packet channel.

--*/

use ot_emu_bus::CharBackend;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

pub const HEADER_SIZE: usize = 8;
pub const PROTO_MAJOR: u32 = 0;
pub const PROTO_MINOR: u32 = 14;

/// Set in the UID of packets the emulator sends on its own initiative
pub const UID_INITIATOR: u32 = 1 << 31;

/// Length of the NUL-padded names in enumeration replies
pub const NAME_SIZE: usize = 16;

pub type Cmd = [u8; 2];

pub const CMD_HANDSHAKE: Cmd = *b"HS";
pub const CMD_ENUM_DEVICES: Cmd = *b"ED";
pub const CMD_ENUM_SPACES: Cmd = *b"ES";
pub const CMD_ENUM_IRQS: Cmd = *b"IE";
pub const CMD_READ_REG: Cmd = *b"RW";
pub const CMD_WRITE_REG: Cmd = *b"WW";
pub const CMD_READ_SEQ: Cmd = *b"RS";
pub const CMD_WRITE_SEQ: Cmd = *b"WS";
pub const CMD_READ_MBX: Cmd = *b"RX";
pub const CMD_WRITE_MBX: Cmd = *b"WX";
pub const CMD_READ_MEM: Cmd = *b"RM";
pub const CMD_WRITE_MEM: Cmd = *b"WM";
pub const CMD_INTERCEPT_IRQ: Cmd = *b"II";
pub const CMD_RELEASE_IRQ: Cmd = *b"IR";
pub const CMD_SET_IRQ: Cmd = *b"IS";
pub const CMD_WATCH_INSTALL: Cmd = *b"MI";
pub const CMD_WATCH_REMOVE: Cmd = *b"MR";
pub const CMD_RESUME: Cmd = *b"CX";
pub const CMD_QUIT: Cmd = *b"QT";
pub const CMD_ERROR: Cmd = *b"xx";
pub const NOTIFY_IRQ: Cmd = *b"^W";
pub const NOTIFY_ACCESS: Cmd = *b"^R";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub cmd: Cmd,
    pub len: u16,
    pub uid: u32,
}

impl Header {
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            cmd: [buf[0], buf[1]],
            len: u16::from_le_bytes([buf[2], buf[3]]),
            uid: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..2].copy_from_slice(&self.cmd);
        buf[2..4].copy_from_slice(&self.len.to_le_bytes());
        buf[4..].copy_from_slice(&self.uid.to_le_bytes());
        buf
    }

    pub fn is_initiator(&self) -> bool {
        self.uid & UID_INITIATOR != 0
    }
}

/// Failure of a proxy request, reported to the client in an `xx` packet.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProxyError {
    #[error("invalid command length")]
    InvalidCommandLength,
    #[error("invalid device id")]
    InvalidDeviceId,
    #[error("invalid register address")]
    InvalidRegisterAddress,
    #[error("invalid specifier id")]
    InvalidSpecifierId,
    #[error("invalid irq")]
    InvalidIrq,
    #[error("invalid request id")]
    InvalidRequestId,
    #[error("unknown command")]
    UnknownCommand,
    #[error("device in error")]
    DeviceInError,
    #[error("cannot read device")]
    CannotReadDevice,
    #[error("cannot write device")]
    CannotWriteDevice,
    #[error("timeout")]
    Timeout,
    #[error("unsupported")]
    Unsupported,
}

impl ProxyError {
    pub fn code(&self) -> u32 {
        match self {
            ProxyError::InvalidCommandLength => 0x401,
            ProxyError::InvalidDeviceId => 0x402,
            ProxyError::InvalidRegisterAddress => 0x403,
            ProxyError::InvalidSpecifierId => 0x404,
            ProxyError::InvalidIrq => 0x405,
            ProxyError::InvalidRequestId => 0x406,
            ProxyError::UnknownCommand => 0x407,
            ProxyError::DeviceInError => 0x408,
            ProxyError::CannotReadDevice => 0x501,
            ProxyError::CannotWriteDevice => 0x502,
            ProxyError::Timeout => 0x503,
            ProxyError::Unsupported => 0x505,
        }
    }
}

/// Little-endian cursor over a request payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProxyError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .ok_or(ProxyError::InvalidCommandLength)?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProxyError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProxyError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn u32(&mut self) -> Result<u32, ProxyError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn i32(&mut self) -> Result<i32, ProxyError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Remaining payload as words; fails on a partial trailing word.
    pub fn words(&mut self) -> Result<Vec<u32>, ProxyError> {
        let rest = &self.buf[self.pos..];
        if rest.len() % 4 != 0 {
            return Err(ProxyError::InvalidCommandLength);
        }
        self.pos = self.buf.len();
        Ok(rest
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Rejects trailing bytes.
    pub fn end(&self) -> Result<(), ProxyError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(ProxyError::InvalidCommandLength)
        }
    }
}

/// Appends `name` truncated or NUL-padded to [`NAME_SIZE`] bytes.
pub fn put_name(out: &mut Vec<u8>, name: &str) {
    let mut field = [0u8; NAME_SIZE];
    let len = name.len().min(NAME_SIZE);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    out.extend_from_slice(&field);
}

pub fn put_words(out: &mut Vec<u8>, words: &[u32]) {
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

struct ChannelImpl {
    out: Box<dyn CharBackend>,
    next_uid: u32,
}

/// Outbound side of the proxy connection, shared by the request handler,
/// the IRQ interceptor and the watchers.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<RefCell<ChannelImpl>>,
}

impl Channel {
    pub fn new(out: Box<dyn CharBackend>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelImpl { out, next_uid: 0 })),
        }
    }

    pub fn send(&self, cmd: Cmd, uid: u32, payload: &[u8]) {
        let Ok(len) = u16::try_from(payload.len()) else {
            log::error!("dev_proxy: {} byte payload dropped", payload.len());
            return;
        };
        let header = Header { cmd, len, uid };
        let mut inner = self.inner.borrow_mut();
        inner.out.write_all(&header.to_bytes());
        inner.out.write_all(payload);
    }

    pub fn reply_error(&self, uid: u32, err: ProxyError, msg: &str) {
        let mut payload = err.code().to_le_bytes().to_vec();
        payload.extend_from_slice(msg.as_bytes());
        self.send(CMD_ERROR, uid, &payload);
    }

    /// Sends an asynchronous notification with the next initiator UID.
    pub fn notify(&self, cmd: Cmd, payload: &[u8]) {
        let uid = {
            let mut inner = self.inner.borrow_mut();
            let uid = inner.next_uid;
            inner.next_uid = (inner.next_uid + 1) & !UID_INITIATOR;
            uid
        };
        self.send(cmd, uid | UID_INITIATOR, payload);
    }

    /// Restarts the notification UIDs, on handshake.
    pub fn reset_uid(&self) {
        self.inner.borrow_mut().next_uid = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_emu_bus::CharPipe;

    #[test]
    fn test_header_layout() {
        let hdr = Header {
            cmd: CMD_READ_REG,
            len: 8,
            uid: 0x8000_0003,
        };
        let bytes = hdr.to_bytes();
        assert_eq!(bytes, [b'R', b'W', 8, 0, 3, 0, 0, 0x80]);
        assert_eq!(Header::parse(&bytes), hdr);
        assert!(hdr.is_initiator());
    }

    #[test]
    fn test_reader() {
        let mut r = Reader::new(&[1, 2, 0, 3, 0, 0, 0, 9]);
        assert_eq!(r.u8(), Ok(1));
        assert_eq!(r.u16(), Ok(2));
        assert_eq!(r.end(), Err(ProxyError::InvalidCommandLength));
        assert_eq!(r.u32(), Ok(3));
        assert_eq!(r.u32(), Err(ProxyError::InvalidCommandLength));
        assert_eq!(r.u8(), Ok(9));
        assert_eq!(r.end(), Ok(()));
    }

    #[test]
    fn test_error_packet() {
        let pipe = CharPipe::new();
        let chan = Channel::new(Box::new(pipe.clone()));
        chan.reply_error(7, ProxyError::InvalidDeviceId, "no");
        assert_eq!(
            pipe.take(),
            [b'x', b'x', 6, 0, 7, 0, 0, 0, 0x02, 0x04, 0, 0, b'n', b'o']
        );
        chan.notify(NOTIFY_IRQ, &[]);
        assert_eq!(pipe.take()[4..8], 0x8000_0000u32.to_le_bytes());
        chan.notify(NOTIFY_IRQ, &[]);
        assert_eq!(pipe.take()[4..8], 0x8000_0001u32.to_le_bytes());
    }
}
