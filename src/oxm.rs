//! OpenFlow Extensible Match (OXM) fields and the `ofp_match` structure that
//! carries them.

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{bit, pad_to_8, test_bit};
use crate::error::{truncated, Error, Result};

/// OXM class of the fields defined by the OpenFlow standard.
pub const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;
/// Size of the TLV header preceding every OXM payload.
pub const OXM_HEADER_LEN: usize = 4;
/// Marks a VLAN_VID value as "tag present".
pub const OFPVID_PRESENT: u16 = 0x1000;
/// `ofp_match` type for OXM-encoded matches.
pub const OFPMT_OXM: u16 = 1;

/// Fields of the OpenFlow-basic OXM class, in wire order of their codes.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OxmFieldType {
    InPort,
    InPhyPort,
    Metadata,
    EthDst,
    EthSrc,
    EthType,
    VlanVid,
    VlanPcp,
    IpDscp,
    IpEcn,
    IpProto,
    Ipv4Src,
    Ipv4Dst,
    TcpSrc,
    TcpDst,
    UdpSrc,
    UdpDst,
    SctpSrc,
    SctpDst,
    Icmpv4Type,
    Icmpv4Code,
    ArpOp,
    ArpSpa,
    ArpTpa,
    ArpSha,
    ArpTha,
    Ipv6Src,
    Ipv6Dst,
    Ipv6Flabel,
    Icmpv6Type,
    Icmpv6Code,
    Ipv6NdTarget,
    Ipv6NdSll,
    Ipv6NdTll,
    MplsLabel,
    MplsTc,
    MplsBos,
    PbbIsid,
    TunnelId,
    Ipv6Exthdr,
}

impl OxmFieldType {
    const ALL: [OxmFieldType; 40] = [
        OxmFieldType::InPort,
        OxmFieldType::InPhyPort,
        OxmFieldType::Metadata,
        OxmFieldType::EthDst,
        OxmFieldType::EthSrc,
        OxmFieldType::EthType,
        OxmFieldType::VlanVid,
        OxmFieldType::VlanPcp,
        OxmFieldType::IpDscp,
        OxmFieldType::IpEcn,
        OxmFieldType::IpProto,
        OxmFieldType::Ipv4Src,
        OxmFieldType::Ipv4Dst,
        OxmFieldType::TcpSrc,
        OxmFieldType::TcpDst,
        OxmFieldType::UdpSrc,
        OxmFieldType::UdpDst,
        OxmFieldType::SctpSrc,
        OxmFieldType::SctpDst,
        OxmFieldType::Icmpv4Type,
        OxmFieldType::Icmpv4Code,
        OxmFieldType::ArpOp,
        OxmFieldType::ArpSpa,
        OxmFieldType::ArpTpa,
        OxmFieldType::ArpSha,
        OxmFieldType::ArpTha,
        OxmFieldType::Ipv6Src,
        OxmFieldType::Ipv6Dst,
        OxmFieldType::Ipv6Flabel,
        OxmFieldType::Icmpv6Type,
        OxmFieldType::Icmpv6Code,
        OxmFieldType::Ipv6NdTarget,
        OxmFieldType::Ipv6NdSll,
        OxmFieldType::Ipv6NdTll,
        OxmFieldType::MplsLabel,
        OxmFieldType::MplsTc,
        OxmFieldType::MplsBos,
        OxmFieldType::PbbIsid,
        OxmFieldType::TunnelId,
        OxmFieldType::Ipv6Exthdr,
    ];

    pub fn of_int(code: u8) -> Option<OxmFieldType> {
        Self::ALL.get(code as usize).copied()
    }

    /// Width in bytes of an unmasked value of this field.
    pub fn payload_length(self) -> usize {
        use self::OxmFieldType::*;
        match self {
            VlanPcp | IpDscp | IpEcn | IpProto | Icmpv4Type | Icmpv4Code | Icmpv6Type |
            Icmpv6Code | MplsTc | MplsBos => 1,
            EthType | VlanVid | TcpSrc | TcpDst | UdpSrc | UdpDst | SctpSrc | SctpDst |
            ArpOp | Ipv6Exthdr => 2,
            PbbIsid => 3,
            InPort | InPhyPort | Ipv4Src | Ipv4Dst | ArpSpa | ArpTpa | Ipv6Flabel |
            MplsLabel => 4,
            EthDst | EthSrc | ArpSha | ArpTha | Ipv6NdSll | Ipv6NdTll => 6,
            Metadata | TunnelId => 8,
            Ipv6Src | Ipv6Dst | Ipv6NdTarget => 16,
        }
    }
}

/// The 32-bit TLV header of an OXM entry:
/// class (16 bits) | field (7 bits) | has-mask (1 bit) | payload length (8 bits).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OxmHeader {
    pub class: u16,
    pub field: u8,
    pub has_mask: bool,
    pub length: u8,
}

impl OxmHeader {
    pub fn new(class: u16, field: u8, has_mask: bool, length: u8) -> Result<OxmHeader> {
        if field > 0x7f {
            return Err(Error::invalid(format!("OXM field code {} exceeds 7 bits", field)));
        }
        Ok(OxmHeader {
            class,
            field,
            has_mask,
            length,
        })
    }

    /// Only the low seven bits of `field` fit; `new` rejects anything wider.
    pub fn pack(&self) -> u32 {
        debug_assert!(self.field <= 0x7f, "OXM field code {} exceeds 7 bits", self.field);
        let word = ((self.class as u64) << 16) | (((self.field & 0x7f) as u64) << 9) |
                   (self.length as u64);
        bit(8, word, self.has_mask) as u32
    }

    pub fn unpack(word: u32) -> OxmHeader {
        OxmHeader {
            class: (word >> 16) as u16,
            field: ((word >> 9) & 0x7f) as u8,
            has_mask: test_bit(8, word as u64),
            length: (word & 0xff) as u8,
        }
    }
}

/// An OXM payload. The variant is fixed by the payload width alone: 1, 2, 4
/// and 8 bytes are integers, any other width is raw bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OxmValue {
    Byte(u8),
    Short(u16),
    Int(u32),
    Long(u64),
    Raw(Vec<u8>),
}

impl OxmValue {
    /// Interpret big-endian bytes as the value their width dictates.
    pub fn from_bytes(buf: &[u8]) -> OxmValue {
        match buf.len() {
            1 => OxmValue::Byte(buf[0]),
            2 => OxmValue::Short(u16::from_be_bytes([buf[0], buf[1]])),
            4 => OxmValue::Int(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])),
            8 => {
                let mut arr = [0; 8];
                arr.copy_from_slice(buf);
                OxmValue::Long(u64::from_be_bytes(arr))
            }
            _ => OxmValue::Raw(buf.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match *self {
            OxmValue::Byte(_) => 1,
            OxmValue::Short(_) => 2,
            OxmValue::Int(_) => 4,
            OxmValue::Long(_) => 8,
            OxmValue::Raw(ref v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this variant is the one `from_bytes` would pick for its width.
    fn is_canonical(&self) -> bool {
        match *self {
            OxmValue::Raw(ref v) => !matches!(v.len(), 1 | 2 | 4 | 8),
            _ => true,
        }
    }

    fn read(bytes: &mut Cursor<&[u8]>, len: usize) -> Result<OxmValue> {
        let value = match len {
            1 => OxmValue::Byte(bytes.read_u8().map_err(truncated("oxm value"))?),
            2 => OxmValue::Short(bytes.read_u16::<BigEndian>().map_err(truncated("oxm value"))?),
            4 => OxmValue::Int(bytes.read_u32::<BigEndian>().map_err(truncated("oxm value"))?),
            8 => OxmValue::Long(bytes.read_u64::<BigEndian>().map_err(truncated("oxm value"))?),
            n => {
                let mut v = vec![0; n];
                bytes.read_exact(&mut v).map_err(truncated("oxm value"))?;
                OxmValue::Raw(v)
            }
        };
        Ok(value)
    }

    fn marshal<W: Write>(&self, bytes: &mut W) -> Result<()> {
        match *self {
            OxmValue::Byte(v) => bytes.write_u8(v)?,
            OxmValue::Short(v) => bytes.write_u16::<BigEndian>(v)?,
            OxmValue::Int(v) => bytes.write_u32::<BigEndian>(v)?,
            OxmValue::Long(v) => bytes.write_u64::<BigEndian>(v)?,
            OxmValue::Raw(ref v) => bytes.write_all(v)?,
        }
        Ok(())
    }
}

/// One OXM entry: a match criterion or a set-field argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OxmField {
    pub class: u16,
    pub field: u8,
    pub value: OxmValue,
    pub mask: Option<OxmValue>,
}

impl OxmField {
    /// An unmasked OpenFlow-basic field. The value must have the field's declared width.
    pub fn new(typ: OxmFieldType, value: OxmValue) -> Result<OxmField> {
        Self::check_width(typ, &value)?;
        Ok(OxmField {
            class: OFPXMC_OPENFLOW_BASIC,
            field: typ as u8,
            value,
            mask: None,
        })
    }

    /// A masked OpenFlow-basic field; value and mask share the declared width.
    pub fn masked(typ: OxmFieldType, value: OxmValue, mask: OxmValue) -> Result<OxmField> {
        Self::check_width(typ, &value)?;
        Self::check_width(typ, &mask)?;
        Ok(OxmField {
            class: OFPXMC_OPENFLOW_BASIC,
            field: typ as u8,
            value,
            mask: Some(mask),
        })
    }

    pub fn byte(typ: OxmFieldType, v: u8) -> Result<OxmField> {
        Self::new(typ, OxmValue::Byte(v))
    }

    pub fn short(typ: OxmFieldType, v: u16) -> Result<OxmField> {
        Self::new(typ, OxmValue::Short(v))
    }

    pub fn int(typ: OxmFieldType, v: u32) -> Result<OxmField> {
        Self::new(typ, OxmValue::Int(v))
    }

    pub fn long(typ: OxmFieldType, v: u64) -> Result<OxmField> {
        Self::new(typ, OxmValue::Long(v))
    }

    pub fn raw(typ: OxmFieldType, v: &[u8]) -> Result<OxmField> {
        Self::new(typ, OxmValue::from_bytes(v))
    }

    fn check_width(typ: OxmFieldType, value: &OxmValue) -> Result<()> {
        if value.len() != typ.payload_length() || !value.is_canonical() {
            return Err(Error::invalid(format!(
                "{:?} takes {} bytes, got {:?}",
                typ,
                typ.payload_length(),
                value
            )));
        }
        Ok(())
    }

    /// The standard field this entry describes, if it is one.
    pub fn field_type(&self) -> Option<OxmFieldType> {
        if self.class == OFPXMC_OPENFLOW_BASIC {
            OxmFieldType::of_int(self.field)
        } else {
            None
        }
    }

    fn payload_length(&self) -> usize {
        self.value.len() + self.mask.as_ref().map_or(0, |m| m.len())
    }

    /// Fails when the field code or the payload do not fit the header.
    pub fn header(&self) -> Result<OxmHeader> {
        if self.payload_length() > u8::MAX as usize {
            return Err(Error::invalid(format!(
                "OXM payload of {} bytes exceeds 255",
                self.payload_length()
            )));
        }
        OxmHeader::new(self.class, self.field, self.mask.is_some(), self.payload_length() as u8)
    }

    /// Encoded size including the TLV header.
    pub fn size_of(&self) -> usize {
        OXM_HEADER_LEN + self.payload_length()
    }

    pub fn marshal<W: Write>(&self, bytes: &mut W) -> Result<()> {
        bytes.write_u32::<BigEndian>(self.header()?.pack())?;
        self.value.marshal(bytes)?;
        if let Some(ref mask) = self.mask {
            mask.marshal(bytes)?;
        }
        Ok(())
    }

    pub fn parse(bytes: &mut Cursor<&[u8]>) -> Result<OxmField> {
        let header = OxmHeader::unpack(bytes.read_u32::<BigEndian>().map_err(truncated("oxm header"))?);
        let length = header.length as usize;
        let known = if header.class == OFPXMC_OPENFLOW_BASIC {
            OxmFieldType::of_int(header.field)
        } else {
            None
        };
        let width = match known {
            Some(typ) => {
                let declared = typ.payload_length();
                let expected = if header.has_mask { 2 * declared } else { declared };
                if length != expected {
                    return Err(Error::malformed(format!(
                        "{:?} declares {} payload bytes, header says {}",
                        typ, expected, length
                    )));
                }
                declared
            }
            None if header.has_mask => {
                if length % 2 != 0 {
                    return Err(Error::malformed(format!(
                        "masked OXM field with odd payload length {}",
                        length
                    )));
                }
                length / 2
            }
            None => length,
        };
        let value = OxmValue::read(bytes, width)?;
        let mask = if header.has_mask {
            Some(OxmValue::read(bytes, width)?)
        } else {
            None
        };
        Ok(OxmField {
            class: header.class,
            field: header.field,
            value,
            mask,
        })
    }
}

/// Fields to match against flows. An absent field is a wildcard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Match {
    pub fields: Vec<OxmField>,
}

impl Match {
    /// The empty match, which every packet satisfies.
    pub fn match_all() -> Match {
        Match { fields: vec![] }
    }

    pub fn push(&mut self, field: OxmField) {
        self.fields.push(field)
    }

    pub fn get(&self, typ: OxmFieldType) -> Option<&OxmField> {
        self.fields.iter().find(|f| f.field_type() == Some(typ))
    }

    /// Value of the `length` field: the match header plus its OXM entries, no padding.
    pub fn oxm_length(&self) -> usize {
        4 + self.fields.iter().map(|f| f.size_of()).sum::<usize>()
    }

    /// Bytes this match occupies on the wire, padding included.
    pub fn size_of(&self) -> usize {
        pad_to_8(self.oxm_length())
    }

    pub fn marshal<W: Write>(&self, bytes: &mut W) -> Result<()> {
        let len = self.oxm_length();
        if len > u16::MAX as usize {
            return Err(Error::invalid(format!("match of {} bytes exceeds 65535", len)));
        }
        bytes.write_u16::<BigEndian>(OFPMT_OXM)?;
        bytes.write_u16::<BigEndian>(len as u16)?;
        for field in &self.fields {
            field.marshal(bytes)?;
        }
        bytes.write_all(&[0; 8][..self.size_of() - len])?;
        Ok(())
    }

    pub fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Match> {
        let typ = bytes.read_u16::<BigEndian>().map_err(truncated("match"))?;
        if typ != OFPMT_OXM {
            return Err(Error::malformed(format!("unsupported match type {}", typ)));
        }
        let len = bytes.read_u16::<BigEndian>().map_err(truncated("match"))? as usize;
        if len < 4 {
            return Err(Error::malformed(format!("match length {} below minimum", len)));
        }
        let mut region = vec![0; len - 4];
        bytes.read_exact(&mut region).map_err(truncated("match"))?;
        let mut pad = [0; 8];
        bytes.read_exact(&mut pad[..pad_to_8(len) - len]).map_err(truncated("match padding"))?;

        let mut fields = vec![];
        let mut oxms = Cursor::new(&region[..]);
        while (oxms.position() as usize) < region.len() {
            fields.push(OxmField::parse(&mut oxms)?);
        }
        Ok(Match { fields })
    }
}
