use std::io::{Cursor, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::error::{truncated, Error, Result};
use crate::openflow0x04::MsgCode;

/// Version byte of every OpenFlow 1.3 message.
pub const OPENFLOW_0_04_VERSION: u8 = 0x04;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        8
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal<W: Write>(bytes: &mut W, header: OfpHeader) -> Result<()> {
        bytes.write_u8(header.version)?;
        bytes.write_u8(header.typ)?;
        bytes.write_u16::<BigEndian>(header.length)?;
        bytes.write_u32::<BigEndian>(header.xid)?;
        Ok(())
    }

    /// Takes a message buffer starting with an `OfpHeader` and returns the header.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::size() {
            return Err(Error::malformed(format!(
                "header needs {} bytes, got {}",
                Self::size(),
                buf.len()
            )));
        }
        let mut bytes = Cursor::new(buf);
        let header = OfpHeader {
            version: bytes.read_u8().map_err(truncated("header"))?,
            typ: bytes.read_u8().map_err(truncated("header"))?,
            length: bytes.read_u16::<BigEndian>().map_err(truncated("header"))?,
            xid: bytes.read_u32::<BigEndian>().map_err(truncated("header"))?,
        };
        if header.length() < Self::size() {
            debug!("Header length {} shorter than the header itself", header.length);
            return Err(Error::malformed(format!(
                "header length field {} is below the minimum {}",
                header.length,
                Self::size()
            )));
        }
        Ok(header)
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the raw type byte of a header.
    pub fn type_byte(&self) -> u8 {
        self.typ
    }

    /// Return the OpenFlow message type code of a header, if it is one this
    /// version defines.
    pub fn type_code(&self) -> Option<MsgCode> {
        MsgCode::of_int(self.typ)
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}
