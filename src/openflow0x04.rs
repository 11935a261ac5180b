use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{bit, pad_to_8, test_bit};
use crate::error::{truncated, Error, Result};
use crate::ofp_header::OfpHeader;
use crate::oxm::{Match, OxmField};

/// OpenFlow 1.3 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Experimenter,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    MultipartReq,
    MultipartResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
    RoleReq,
    RoleResp,
    GetAsyncReq,
    GetAsyncResp,
    SetAsync,
    MeterMod,
}

impl MsgCode {
    const ALL: [MsgCode; 30] = [
        MsgCode::Hello,
        MsgCode::Error,
        MsgCode::EchoReq,
        MsgCode::EchoResp,
        MsgCode::Experimenter,
        MsgCode::FeaturesReq,
        MsgCode::FeaturesResp,
        MsgCode::GetConfigReq,
        MsgCode::GetConfigResp,
        MsgCode::SetConfig,
        MsgCode::PacketIn,
        MsgCode::FlowRemoved,
        MsgCode::PortStatus,
        MsgCode::PacketOut,
        MsgCode::FlowMod,
        MsgCode::GroupMod,
        MsgCode::PortMod,
        MsgCode::TableMod,
        MsgCode::MultipartReq,
        MsgCode::MultipartResp,
        MsgCode::BarrierReq,
        MsgCode::BarrierResp,
        MsgCode::QueueGetConfigReq,
        MsgCode::QueueGetConfigResp,
        MsgCode::RoleReq,
        MsgCode::RoleResp,
        MsgCode::GetAsyncReq,
        MsgCode::GetAsyncResp,
        MsgCode::SetAsync,
        MsgCode::MeterMod,
    ];

    pub fn of_int(code: u8) -> Option<MsgCode> {
        Self::ALL.get(code as usize).copied()
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body, header excluded.
    fn size_of(msg: &Self) -> usize;
    /// Parse a message body.
    fn parse(buf: &[u8]) -> Result<Self>;
    /// Marshal a message body into `bytes`.
    fn marshal<W: Write>(msg: &Self, bytes: &mut W) -> Result<()>;
}

fn ensure_consumed(bytes: &Cursor<&[u8]>, what: &str) -> Result<()> {
    let left = bytes.get_ref().len() as u64 - bytes.position();
    if left != 0 {
        return Err(Error::malformed(format!("{} trailing bytes after {}", left, what)));
    }
    Ok(())
}

fn skip<R: Read>(bytes: &mut R, n: usize, what: &'static str) -> Result<()> {
    let mut pad = [0; 8];
    bytes.read_exact(&mut pad[..n]).map_err(truncated(what))
}

fn write_padding_bytes<W: Write>(bytes: &mut W, n: usize) -> Result<()> {
    bytes.write_all(&[0; 8][..n])?;
    Ok(())
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u32),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller,
    Local,
}

#[repr(u32)]
enum OfpPort {
    OFPPMax = 0xffffff00,
    OFPPInPort = 0xfffffff8,
    OFPPTable = 0xfffffff9,
    OFPPNormal = 0xfffffffa,
    OFPPFlood = 0xfffffffb,
    OFPPAll = 0xfffffffc,
    OFPPController = 0xfffffffd,
    OFPPLocal = 0xfffffffe,
    OFPPAny = 0xffffffff,
}

/// Wildcard value for port and group selectors.
pub const OFPP_ANY: u32 = OfpPort::OFPPAny as u32;
pub const OFPG_ANY: u32 = 0xffffffff;
pub const OFPG_ALL: u32 = 0xfffffffc;
/// Buffer id meaning "no buffered packet".
pub const OFP_NO_BUFFER: u32 = 0xffffffff;
/// Output max length asking the switch to send the whole packet to the controller.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

impl PseudoPort {
    /// `None` for the ANY wildcard.
    fn of_int(p: u32) -> Result<Option<PseudoPort>> {
        if p == OFPP_ANY {
            Ok(None)
        } else {
            PseudoPort::make(p).map(Some)
        }
    }

    fn make(p: u32) -> Result<PseudoPort> {
        let port = match p {
            p if p == (OfpPort::OFPPInPort as u32) => PseudoPort::InPort,
            p if p == (OfpPort::OFPPTable as u32) => PseudoPort::Table,
            p if p == (OfpPort::OFPPNormal as u32) => PseudoPort::Normal,
            p if p == (OfpPort::OFPPFlood as u32) => PseudoPort::Flood,
            p if p == (OfpPort::OFPPAll as u32) => PseudoPort::AllPorts,
            p if p == (OfpPort::OFPPController as u32) => PseudoPort::Controller,
            p if p == (OfpPort::OFPPLocal as u32) => PseudoPort::Local,
            p if p <= (OfpPort::OFPPMax as u32) => PseudoPort::PhysicalPort(p),
            p => return Err(Error::malformed(format!("unsupported port number 0x{:x}", p))),
        };
        Ok(port)
    }

    pub fn to_int(self) -> u32 {
        match self {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u32,
            PseudoPort::Table => OfpPort::OFPPTable as u32,
            PseudoPort::Normal => OfpPort::OFPPNormal as u32,
            PseudoPort::Flood => OfpPort::OFPPFlood as u32,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u32,
            PseudoPort::Controller => OfpPort::OFPPController as u32,
            PseudoPort::Local => OfpPort::OFPPLocal as u32,
        }
    }
}

/// Actions associated with flows and packets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output { port: PseudoPort, max_len: u16 },
    PushVlan(u16),
    PopVlan,
    SetField(OxmField),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
    OFPATPushVlan = 17,
    OFPATPopVlan = 18,
    OFPATSetField = 25,
}

const OUTPUT_ACTION_LEN: usize = 16;
const ACTION_HEADER_LEN: usize = 4;

impl Action {
    /// Output to `port`; packets sent to the controller are not truncated.
    pub fn output(port: PseudoPort) -> Action {
        let max_len = match port {
            PseudoPort::Controller => OFPCML_NO_BUFFER,
            _ => 0,
        };
        Action::Output { port, max_len }
    }

    fn type_code(&self) -> u16 {
        match *self {
            Action::Output { .. } => OfpActionType::OFPATOutput as u16,
            Action::PushVlan(_) => OfpActionType::OFPATPushVlan as u16,
            Action::PopVlan => OfpActionType::OFPATPopVlan as u16,
            Action::SetField(_) => OfpActionType::OFPATSetField as u16,
        }
    }

    pub fn size_of(&self) -> usize {
        match *self {
            Action::Output { .. } => OUTPUT_ACTION_LEN,
            Action::PushVlan(_) | Action::PopVlan => 8,
            Action::SetField(ref oxm) => pad_to_8(ACTION_HEADER_LEN + oxm.size_of()),
        }
    }

    pub fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Action> {
        let action_code = bytes.read_u16::<BigEndian>().map_err(truncated("action"))?;
        let len = bytes.read_u16::<BigEndian>().map_err(truncated("action"))? as usize;
        if len < 8 || len % 8 != 0 {
            return Err(Error::malformed(format!("action length {} is not a multiple of 8", len)));
        }
        let mut body = vec![0; len - ACTION_HEADER_LEN];
        bytes.read_exact(&mut body).map_err(truncated("action"))?;
        let mut body = Cursor::new(&body[..]);
        let action = match action_code {
            t if t == (OfpActionType::OFPATOutput as u16) => {
                if len != OUTPUT_ACTION_LEN {
                    return Err(Error::malformed(format!("output action of length {}", len)));
                }
                let port_code = body.read_u32::<BigEndian>().map_err(truncated("output"))?;
                let max_len = body.read_u16::<BigEndian>().map_err(truncated("output"))?;
                Action::Output {
                    port: PseudoPort::make(port_code)?,
                    max_len,
                }
            }
            t if t == (OfpActionType::OFPATPushVlan as u16) => {
                Action::PushVlan(body.read_u16::<BigEndian>().map_err(truncated("push_vlan"))?)
            }
            t if t == (OfpActionType::OFPATPopVlan as u16) => Action::PopVlan,
            t if t == (OfpActionType::OFPATSetField as u16) => Action::SetField(OxmField::parse(&mut body)?),
            t => return Err(Error::malformed(format!("unsupported action type {}", t))),
        };
        Ok(action)
    }

    pub fn parse_sequence(buf: &[u8]) -> Result<Vec<Action>> {
        let mut bytes = Cursor::new(buf);
        let mut v = vec![];
        while (bytes.position() as usize) < buf.len() {
            v.push(Action::parse(&mut bytes)?);
        }
        Ok(v)
    }

    pub fn marshal<W: Write>(&self, bytes: &mut W) -> Result<()> {
        bytes.write_u16::<BigEndian>(self.type_code())?;
        bytes.write_u16::<BigEndian>(self.size_of() as u16)?;
        match *self {
            Action::Output { port, max_len } => {
                bytes.write_u32::<BigEndian>(port.to_int())?;
                bytes.write_u16::<BigEndian>(max_len)?;
                write_padding_bytes(bytes, 6)?;
            }
            Action::PushVlan(ethertype) => {
                bytes.write_u16::<BigEndian>(ethertype)?;
                write_padding_bytes(bytes, 2)?;
            }
            Action::PopVlan => write_padding_bytes(bytes, 4)?,
            Action::SetField(ref oxm) => {
                oxm.marshal(bytes)?;
                write_padding_bytes(bytes, self.size_of() - ACTION_HEADER_LEN - oxm.size_of())?;
            }
        }
        Ok(())
    }
}

/// Instructions executed when a packet matches a flow entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    GotoTable(u8),
    WriteMetadata { metadata: u64, mask: u64 },
    WriteActions(Vec<Action>),
    ApplyActions(Vec<Action>),
    ClearActions,
    Meter(u32),
}

impl Instruction {
    fn type_code(&self) -> u16 {
        match *self {
            Instruction::GotoTable(_) => 1,
            Instruction::WriteMetadata { .. } => 2,
            Instruction::WriteActions(_) => 3,
            Instruction::ApplyActions(_) => 4,
            Instruction::ClearActions => 5,
            Instruction::Meter(_) => 6,
        }
    }

    pub fn size_of(&self) -> usize {
        match *self {
            Instruction::GotoTable(_) | Instruction::ClearActions | Instruction::Meter(_) => 8,
            Instruction::WriteMetadata { .. } => 24,
            Instruction::WriteActions(ref acts) |
            Instruction::ApplyActions(ref acts) => 8 + Action::size_of_sequence(acts),
        }
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Instruction> {
        let code = bytes.read_u16::<BigEndian>().map_err(truncated("instruction"))?;
        let len = bytes.read_u16::<BigEndian>().map_err(truncated("instruction"))? as usize;
        if len < 8 {
            return Err(Error::malformed(format!("instruction length {} below minimum", len)));
        }
        let mut body = vec![0; len - 4];
        bytes.read_exact(&mut body).map_err(truncated("instruction"))?;
        let mut b = Cursor::new(&body[..]);
        let inst = match code {
            1 => Instruction::GotoTable(b.read_u8().map_err(truncated("goto_table"))?),
            2 => {
                skip(&mut b, 4, "write_metadata")?;
                Instruction::WriteMetadata {
                    metadata: b.read_u64::<BigEndian>().map_err(truncated("write_metadata"))?,
                    mask: b.read_u64::<BigEndian>().map_err(truncated("write_metadata"))?,
                }
            }
            3 => Instruction::WriteActions(Action::parse_sequence(&body[4..])?),
            4 => Instruction::ApplyActions(Action::parse_sequence(&body[4..])?),
            5 => Instruction::ClearActions,
            6 => Instruction::Meter(b.read_u32::<BigEndian>().map_err(truncated("meter"))?),
            t => return Err(Error::malformed(format!("unsupported instruction type {}", t))),
        };
        Ok(inst)
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<Instruction>> {
        let mut bytes = Cursor::new(buf);
        let mut v = vec![];
        while (bytes.position() as usize) < buf.len() {
            v.push(Instruction::parse(&mut bytes)?);
        }
        Ok(v)
    }

    fn marshal<W: Write>(&self, bytes: &mut W) -> Result<()> {
        bytes.write_u16::<BigEndian>(self.type_code())?;
        bytes.write_u16::<BigEndian>(self.size_of() as u16)?;
        match *self {
            Instruction::GotoTable(table) => {
                bytes.write_u8(table)?;
                write_padding_bytes(bytes, 3)?;
            }
            Instruction::WriteMetadata { metadata, mask } => {
                write_padding_bytes(bytes, 4)?;
                bytes.write_u64::<BigEndian>(metadata)?;
                bytes.write_u64::<BigEndian>(mask)?;
            }
            Instruction::WriteActions(ref acts) |
            Instruction::ApplyActions(ref acts) => {
                write_padding_bytes(bytes, 4)?;
                for act in acts {
                    act.marshal(bytes)?;
                }
            }
            Instruction::ClearActions => write_padding_bytes(bytes, 4)?,
            Instruction::Meter(id) => bytes.write_u32::<BigEndian>(id)?,
        }
        Ok(())
    }
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub group_stats: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub port_blocked: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        let d = d as u64;
        Capabilities {
            flow_stats: test_bit(0, d),
            table_stats: test_bit(1, d),
            port_stats: test_bit(2, d),
            group_stats: test_bit(3, d),
            ip_reasm: test_bit(5, d),
            queue_stats: test_bit(6, d),
            port_blocked: test_bit(8, d),
        }
    }

    fn to_int(&self) -> u32 {
        let mut d = 0;
        d = bit(0, d, self.flow_stats);
        d = bit(1, d, self.table_stats);
        d = bit(2, d, self.port_stats);
        d = bit(3, d, self.group_stats);
        d = bit(5, d, self.ip_reasm);
        d = bit(6, d, self.queue_stats);
        d = bit(8, d, self.port_blocked);
        d as u32
    }
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub auxiliary_id: u8,
    pub supported_capabilities: Capabilities,
}

impl MessageType for SwitchFeatures {
    fn size_of(_: &SwitchFeatures) -> usize {
        24
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures> {
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>().map_err(truncated("features"))?;
        let num_buffers = bytes.read_u32::<BigEndian>().map_err(truncated("features"))?;
        let num_tables = bytes.read_u8().map_err(truncated("features"))?;
        let auxiliary_id = bytes.read_u8().map_err(truncated("features"))?;
        skip(&mut bytes, 2, "features")?;
        let supported_capabilities =
            Capabilities::of_int(bytes.read_u32::<BigEndian>().map_err(truncated("features"))?);
        skip(&mut bytes, 4, "features")?;
        ensure_consumed(&bytes, "features reply")?;
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            auxiliary_id,
            supported_capabilities,
        })
    }

    fn marshal<W: Write>(sf: &SwitchFeatures, bytes: &mut W) -> Result<()> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        bytes.write_u8(sf.auxiliary_id)?;
        write_padding_bytes(bytes, 2)?;
        bytes.write_u32::<BigEndian>(sf.supported_capabilities.to_int())?;
        bytes.write_u32::<BigEndian>(0)?;
        Ok(())
    }
}

/// Type of modification to perform on a flow table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(c: u8) -> Result<FlowModCmd> {
        match c {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(Error::malformed(format!("unknown flow_mod command {}", c))),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table: u8,
    pub command: FlowModCmd,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub priority: u16,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub out_group: Option<u32>,
    pub notify_when_removed: bool,
    pub check_overlap: bool,
    pub reset_counts: bool,
    pub no_packet_counts: bool,
    pub no_byte_counts: bool,
    pub pattern: Match,
    pub instructions: Vec<Instruction>,
}

/// Fixed part of a flow_mod body, between the header and the match.
const FLOW_MOD_FIXED_LEN: usize = 40;

impl FlowMod {
    fn flags_to_int(fm: &FlowMod) -> u16 {
        let mut f = 0;
        f = bit(0, f, fm.notify_when_removed);
        f = bit(1, f, fm.check_overlap);
        f = bit(2, f, fm.reset_counts);
        f = bit(3, f, fm.no_packet_counts);
        f = bit(4, f, fm.no_byte_counts);
        f as u16
    }

    /// Actions of the entry's apply-actions instruction, if it has one.
    pub fn apply_actions(&self) -> Option<&[Action]> {
        self.instructions.iter().find_map(|i| match *i {
            Instruction::ApplyActions(ref acts) => Some(&acts[..]),
            _ => None,
        })
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        FLOW_MOD_FIXED_LEN + msg.pattern.size_of() +
        msg.instructions.iter().map(Instruction::size_of).sum::<usize>()
    }

    fn parse(buf: &[u8]) -> Result<FlowMod> {
        let mut bytes = Cursor::new(buf);
        let cookie = bytes.read_u64::<BigEndian>().map_err(truncated("flow_mod"))?;
        let cookie_mask = bytes.read_u64::<BigEndian>().map_err(truncated("flow_mod"))?;
        let table = bytes.read_u8().map_err(truncated("flow_mod"))?;
        let command = FlowModCmd::of_int(bytes.read_u8().map_err(truncated("flow_mod"))?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>().map_err(truncated("flow_mod"))?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>().map_err(truncated("flow_mod"))?);
        let prio = bytes.read_u16::<BigEndian>().map_err(truncated("flow_mod"))?;
        let buffer_id = bytes.read_u32::<BigEndian>().map_err(truncated("flow_mod"))?;
        let out_port = PseudoPort::of_int(bytes.read_u32::<BigEndian>().map_err(truncated("flow_mod"))?)?;
        let out_group = bytes.read_u32::<BigEndian>().map_err(truncated("flow_mod"))?;
        let flags = bytes.read_u16::<BigEndian>().map_err(truncated("flow_mod"))? as u64;
        skip(&mut bytes, 2, "flow_mod")?;
        let pattern = Match::parse(&mut bytes)?;
        let instructions = Instruction::parse_sequence(&buf[bytes.position() as usize..])?;
        Ok(FlowMod {
            cookie,
            cookie_mask,
            table,
            command,
            idle_timeout: idle,
            hard_timeout: hard,
            priority: prio,
            apply_to_packet: match buffer_id {
                OFP_NO_BUFFER => None,
                n => Some(n),
            },
            out_port,
            out_group: match out_group {
                OFPG_ANY => None,
                g => Some(g),
            },
            notify_when_removed: test_bit(0, flags),
            check_overlap: test_bit(1, flags),
            reset_counts: test_bit(2, flags),
            no_packet_counts: test_bit(3, flags),
            no_byte_counts: test_bit(4, flags),
            pattern,
            instructions,
        })
    }

    fn marshal<W: Write>(fm: &FlowMod, bytes: &mut W) -> Result<()> {
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u64::<BigEndian>(fm.cookie_mask)?;
        bytes.write_u8(fm.table)?;
        bytes.write_u8(fm.command as u8)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u32::<BigEndian>(fm.out_port.map_or(OFPP_ANY, PseudoPort::to_int))?;
        bytes.write_u32::<BigEndian>(fm.out_group.unwrap_or(OFPG_ANY))?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(fm))?;
        write_padding_bytes(bytes, 2)?;
        fm.pattern.marshal(bytes)?;
        for inst in &fm.instructions {
            if let Instruction::ApplyActions(ref acts) | Instruction::WriteActions(ref acts) = *inst {
                if acts.iter().any(|a| matches!(*a, Action::Output { port: PseudoPort::Table, .. })) {
                    return Err(Error::invalid("OFPP_TABLE not allowed in installed flow"));
                }
            }
            inst.marshal(bytes)?;
        }
        Ok(())
    }
}

/// Why a flow entry left the table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowRemovedReason {
    IdleTimeout,
    HardTimeout,
    Delete,
    GroupDelete,
}

impl FlowRemovedReason {
    fn of_int(r: u8) -> Result<FlowRemovedReason> {
        match r {
            0 => Ok(FlowRemovedReason::IdleTimeout),
            1 => Ok(FlowRemovedReason::HardTimeout),
            2 => Ok(FlowRemovedReason::Delete),
            3 => Ok(FlowRemovedReason::GroupDelete),
            r => Err(Error::malformed(format!("unknown flow removed reason {}", r))),
        }
    }
}

/// Flow entry removed from a switch table, with its final counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowRemoved {
    pub pattern: Match,
    pub cookie: u64,
    pub priority: u16,
    pub reason: FlowRemovedReason,
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub packet_count: u64,
    pub byte_count: u64,
}

impl FlowRemoved {
    /// Length of a flow_removed message carrying the empty match.
    pub const MINIMUM_LENGTH: usize = 56;
    const PLACEHOLDER_MATCH_LEN: usize = 8;

    /// Full message length, header included.
    pub fn compute_length(&self) -> usize {
        Self::MINIMUM_LENGTH - Self::PLACEHOLDER_MATCH_LEN + self.pattern.size_of()
    }
}

impl MessageType for FlowRemoved {
    fn size_of(f: &FlowRemoved) -> usize {
        f.compute_length() - OfpHeader::size()
    }

    fn parse(buf: &[u8]) -> Result<FlowRemoved> {
        let mut bytes = Cursor::new(buf);
        let pattern = Match::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>().map_err(truncated("flow_removed"))?;
        let priority = bytes.read_u16::<BigEndian>().map_err(truncated("flow_removed"))?;
        let reason = FlowRemovedReason::of_int(bytes.read_u8().map_err(truncated("flow_removed"))?)?;
        let table_id = bytes.read_u8().map_err(truncated("flow_removed"))?;
        let duration_sec = bytes.read_u32::<BigEndian>().map_err(truncated("flow_removed"))?;
        let duration_nsec = bytes.read_u32::<BigEndian>().map_err(truncated("flow_removed"))?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>().map_err(truncated("flow_removed"))?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>().map_err(truncated("flow_removed"))?);
        let packet_count = bytes.read_u64::<BigEndian>().map_err(truncated("flow_removed"))?;
        let byte_count = bytes.read_u64::<BigEndian>().map_err(truncated("flow_removed"))?;
        ensure_consumed(&bytes, "flow_removed")?;
        Ok(FlowRemoved {
            pattern,
            cookie,
            priority,
            reason,
            table_id,
            duration_sec,
            duration_nsec,
            idle_timeout: idle,
            hard_timeout: hard,
            packet_count,
            byte_count,
        })
    }

    fn marshal<W: Write>(f: &FlowRemoved, bytes: &mut W) -> Result<()> {
        f.pattern.marshal(bytes)?;
        bytes.write_u64::<BigEndian>(f.cookie)?;
        bytes.write_u16::<BigEndian>(f.priority)?;
        bytes.write_u8(f.reason as u8)?;
        bytes.write_u8(f.table_id)?;
        bytes.write_u32::<BigEndian>(f.duration_sec)?;
        bytes.write_u32::<BigEndian>(f.duration_nsec)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(f.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(f.hard_timeout))?;
        bytes.write_u64::<BigEndian>(f.packet_count)?;
        bytes.write_u64::<BigEndian>(f.byte_count)?;
        Ok(())
    }
}

/// Packet injected by the controller, either a switch-buffered packet or raw bytes.
///
/// A packet_out never carries both a buffer id and packet data; the setters
/// reject whichever would break that.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    buffer_id: u32,
    pub in_port: PseudoPort,
    pub actions: Vec<Action>,
    packet_data: Vec<u8>,
}

impl PacketOut {
    pub const MINIMUM_LENGTH: usize = 24;

    pub fn new(in_port: PseudoPort, actions: Vec<Action>) -> PacketOut {
        PacketOut {
            buffer_id: OFP_NO_BUFFER,
            in_port,
            actions,
            packet_data: vec![],
        }
    }

    /// `None` when the packet travels inline.
    pub fn buffer_id(&self) -> Option<u32> {
        match self.buffer_id {
            OFP_NO_BUFFER => None,
            id => Some(id),
        }
    }

    pub fn set_buffer_id(&mut self, buffer_id: u32) -> Result<()> {
        if !self.packet_data.is_empty() && buffer_id != OFP_NO_BUFFER {
            return Err(Error::invalid("packet_out should not have both buffer id and packet data set"));
        }
        self.buffer_id = buffer_id;
        Ok(())
    }

    pub fn packet_data(&self) -> &[u8] {
        &self.packet_data
    }

    pub fn set_packet_data(&mut self, data: Vec<u8>) -> Result<()> {
        if !data.is_empty() && self.buffer_id != OFP_NO_BUFFER {
            return Err(Error::invalid("packet_out should not have both buffer id and packet data set"));
        }
        self.packet_data = data;
        Ok(())
    }
}

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        PacketOut::MINIMUM_LENGTH - OfpHeader::size() + Action::size_of_sequence(&po.actions) +
        po.packet_data.len()
    }

    fn parse(buf: &[u8]) -> Result<PacketOut> {
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>().map_err(truncated("packet_out"))?;
        let in_port = PseudoPort::make(bytes.read_u32::<BigEndian>().map_err(truncated("packet_out"))?)?;
        let actions_len = bytes.read_u16::<BigEndian>().map_err(truncated("packet_out"))? as usize;
        skip(&mut bytes, 6, "packet_out")?;
        let mut actions_buf = vec![0; actions_len];
        bytes.read_exact(&mut actions_buf).map_err(truncated("packet_out actions"))?;
        let actions = Action::parse_sequence(&actions_buf)?;
        let packet_data = buf[bytes.position() as usize..].to_vec();
        if buffer_id != OFP_NO_BUFFER && !packet_data.is_empty() {
            return Err(Error::malformed("packet_out carries both a buffer id and packet data"));
        }
        Ok(PacketOut {
            buffer_id,
            in_port,
            actions,
            packet_data,
        })
    }

    fn marshal<W: Write>(po: &PacketOut, bytes: &mut W) -> Result<()> {
        bytes.write_u32::<BigEndian>(po.buffer_id)?;
        bytes.write_u32::<BigEndian>(po.in_port.to_int())?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.actions) as u16)?;
        write_padding_bytes(bytes, 6)?;
        for act in &po.actions {
            act.marshal(bytes)?;
        }
        bytes.write_all(&po.packet_data)?;
        Ok(())
    }
}

/// Error classes a switch reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorType {
    HelloFailed,
    BadRequest,
    BadAction,
    BadInstruction,
    BadMatch,
    FlowModFailed,
    GroupModFailed,
    PortModFailed,
    TableModFailed,
    QueueOpFailed,
    SwitchConfigFailed,
    RoleRequestFailed,
    MeterModFailed,
    TableFeaturesFailed,
    Experimenter,
}

impl ErrorType {
    pub fn of_int(t: u16) -> Option<ErrorType> {
        let typ = match t {
            0 => ErrorType::HelloFailed,
            1 => ErrorType::BadRequest,
            2 => ErrorType::BadAction,
            3 => ErrorType::BadInstruction,
            4 => ErrorType::BadMatch,
            5 => ErrorType::FlowModFailed,
            6 => ErrorType::GroupModFailed,
            7 => ErrorType::PortModFailed,
            8 => ErrorType::TableModFailed,
            9 => ErrorType::QueueOpFailed,
            10 => ErrorType::SwitchConfigFailed,
            11 => ErrorType::RoleRequestFailed,
            12 => ErrorType::MeterModFailed,
            13 => ErrorType::TableFeaturesFailed,
            0xffff => ErrorType::Experimenter,
            _ => return None,
        };
        Some(typ)
    }
}

/// Error reported by a switch. The message's xid is that of the request that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    pub err_type: u16,
    pub code: u16,
    /// Usually the leading bytes of the offending request.
    pub data: Vec<u8>,
}

impl ErrorMsg {
    pub fn error_type(&self) -> Option<ErrorType> {
        ErrorType::of_int(self.err_type)
    }
}

impl MessageType for ErrorMsg {
    fn size_of(err: &ErrorMsg) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg> {
        let mut bytes = Cursor::new(buf);
        let err_type = bytes.read_u16::<BigEndian>().map_err(truncated("error"))?;
        let code = bytes.read_u16::<BigEndian>().map_err(truncated("error"))?;
        Ok(ErrorMsg {
            err_type,
            code,
            data: buf[4..].to_vec(),
        })
    }

    fn marshal<W: Write>(err: &ErrorMsg, bytes: &mut W) -> Result<()> {
        bytes.write_u16::<BigEndian>(err.err_type)?;
        bytes.write_u16::<BigEndian>(err.code)?;
        bytes.write_all(&err.data)?;
        Ok(())
    }
}

/// Kinds of multipart (statistics) requests.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatType {
    Desc = 0,
    Flow = 1,
    Aggregate = 2,
    Table = 3,
    Port = 4,
    Queue = 5,
    Group = 6,
    GroupDesc = 7,
    GroupFeatures = 8,
    Meter = 9,
    MeterConfig = 10,
    MeterFeatures = 11,
    TableFeatures = 12,
    PortDesc = 13,
    Experimenter = 0xffff,
}

impl StatType {
    fn of_int(t: u16) -> Result<StatType> {
        let typ = match t {
            0 => StatType::Desc,
            1 => StatType::Flow,
            2 => StatType::Aggregate,
            3 => StatType::Table,
            4 => StatType::Port,
            5 => StatType::Queue,
            6 => StatType::Group,
            7 => StatType::GroupDesc,
            8 => StatType::GroupFeatures,
            9 => StatType::Meter,
            10 => StatType::MeterConfig,
            11 => StatType::MeterFeatures,
            12 => StatType::TableFeatures,
            13 => StatType::PortDesc,
            0xffff => StatType::Experimenter,
            t => return Err(Error::malformed(format!("unknown multipart type {}", t))),
        };
        Ok(typ)
    }
}

/// More segments of this multipart reply follow.
pub const OFPMPF_REPLY_MORE: u16 = 1;
const OFP_ALL_TABLES: u8 = 0xff;
const OFPQ_ALL: u32 = 0xffffffff;
const OFPM_ALL: u32 = 0xffffffff;

/// Statistics request. The body is opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatsReq {
    pub stat_type: StatType,
    pub flags: u16,
    pub body: Vec<u8>,
}

impl StatsReq {
    /// A request for every entry of `stat_type`: all tables, ports, queues,
    /// groups or meters as the type calls for.
    pub fn all(stat_type: StatType) -> Result<StatsReq> {
        let mut body = vec![];
        match stat_type {
            StatType::Flow | StatType::Aggregate => {
                body.write_u8(OFP_ALL_TABLES)?;
                write_padding_bytes(&mut body, 3)?;
                body.write_u32::<BigEndian>(OFPP_ANY)?;
                body.write_u32::<BigEndian>(OFPG_ANY)?;
                write_padding_bytes(&mut body, 4)?;
                body.write_u64::<BigEndian>(0)?;
                body.write_u64::<BigEndian>(0)?;
                Match::match_all().marshal(&mut body)?;
            }
            StatType::Port => {
                body.write_u32::<BigEndian>(OFPP_ANY)?;
                write_padding_bytes(&mut body, 4)?;
            }
            StatType::Queue => {
                body.write_u32::<BigEndian>(OFPP_ANY)?;
                body.write_u32::<BigEndian>(OFPQ_ALL)?;
            }
            StatType::Group => {
                body.write_u32::<BigEndian>(OFPG_ALL)?;
                write_padding_bytes(&mut body, 4)?;
            }
            StatType::Meter | StatType::MeterConfig => {
                body.write_u32::<BigEndian>(OFPM_ALL)?;
                write_padding_bytes(&mut body, 4)?;
            }
            StatType::Experimenter => {
                return Err(Error::invalid("experimenter statistics need an experimenter body"))
            }
            _ => (),
        }
        Ok(StatsReq {
            stat_type,
            flags: 0,
            body,
        })
    }
}

/// One segment of a statistics reply, counters left raw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatsResp {
    pub stat_type: StatType,
    pub flags: u16,
    pub body: Vec<u8>,
}

impl StatsResp {
    /// Whether further segments with the same xid follow.
    pub fn more(&self) -> bool {
        self.flags & OFPMPF_REPLY_MORE != 0
    }
}

fn parse_multipart(buf: &[u8]) -> Result<(StatType, u16, Vec<u8>)> {
    let mut bytes = Cursor::new(buf);
    let stat_type = StatType::of_int(bytes.read_u16::<BigEndian>().map_err(truncated("multipart"))?)?;
    let flags = bytes.read_u16::<BigEndian>().map_err(truncated("multipart"))?;
    skip(&mut bytes, 4, "multipart")?;
    Ok((stat_type, flags, buf[8..].to_vec()))
}

fn marshal_multipart<W: Write>(stat_type: StatType, flags: u16, body: &[u8], bytes: &mut W) -> Result<()> {
    bytes.write_u16::<BigEndian>(stat_type as u16)?;
    bytes.write_u16::<BigEndian>(flags)?;
    write_padding_bytes(bytes, 4)?;
    bytes.write_all(body)?;
    Ok(())
}

impl MessageType for StatsReq {
    fn size_of(sr: &StatsReq) -> usize {
        8 + sr.body.len()
    }

    fn parse(buf: &[u8]) -> Result<StatsReq> {
        let (stat_type, flags, body) = parse_multipart(buf)?;
        Ok(StatsReq {
            stat_type,
            flags,
            body,
        })
    }

    fn marshal<W: Write>(sr: &StatsReq, bytes: &mut W) -> Result<()> {
        marshal_multipart(sr.stat_type, sr.flags, &sr.body, bytes)
    }
}

impl MessageType for StatsResp {
    fn size_of(sr: &StatsResp) -> usize {
        8 + sr.body.len()
    }

    fn parse(buf: &[u8]) -> Result<StatsResp> {
        let (stat_type, flags, body) = parse_multipart(buf)?;
        Ok(StatsResp {
            stat_type,
            flags,
            body,
        })
    }

    fn marshal<W: Write>(sr: &StatsResp, bytes: &mut W) -> Result<()> {
        marshal_multipart(sr.stat_type, sr.flags, &sr.body, bytes)
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use log::debug;

    use crate::ofp_header::OPENFLOW_0_04_VERSION;
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello(Vec<u8>),
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowRemoved(FlowRemoved),
        PacketOut(PacketOut),
        FlowMod(FlowMod),
        MultipartRequest(StatsReq),
        MultipartReply(StatsResp),
        BarrierRequest,
        BarrierReply,
        /// Any other type code, body kept verbatim.
        Unhandled(u8, Vec<u8>),
    }

    impl Message {
        /// Map `Message` to its raw OpenFlow type code.
        fn type_byte(msg: &Message) -> u8 {
            let code = match *msg {
                Message::Hello(_) => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowRemoved(_) => MsgCode::FlowRemoved,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::MultipartRequest(_) => MsgCode::MultipartReq,
                Message::MultipartReply(_) => MsgCode::MultipartResp,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::Unhandled(t, _) => return t,
            };
            code as u8
        }

        /// The `MsgCode` of this message, if its type is one OpenFlow 1.3 defines.
        pub fn msg_code(&self) -> Option<MsgCode> {
            MsgCode::of_int(Message::type_byte(self))
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body<W: Write>(msg: &Message, bytes: &mut W) -> Result<()> {
            match *msg {
                Message::Hello(ref buf) |
                Message::EchoRequest(ref buf) |
                Message::EchoReply(ref buf) |
                Message::Unhandled(_, ref buf) => bytes.write_all(buf)?,
                Message::Error(ref err) => ErrorMsg::marshal(err, bytes)?,
                Message::FeaturesReq | Message::BarrierRequest | Message::BarrierReply => (),
                Message::FeaturesReply(ref sf) => SwitchFeatures::marshal(sf, bytes)?,
                Message::FlowRemoved(ref fr) => FlowRemoved::marshal(fr, bytes)?,
                Message::PacketOut(ref po) => PacketOut::marshal(po, bytes)?,
                Message::FlowMod(ref fm) => FlowMod::marshal(fm, bytes)?,
                Message::MultipartRequest(ref sr) => StatsReq::marshal(sr, bytes)?,
                Message::MultipartReply(ref sr) => StatsResp::marshal(sr, bytes)?,
            }
            Ok(())
        }

        /// Decode one complete framed message, header included.
        pub fn decode(buf: &[u8]) -> Result<(u32, Message)> {
            let header = OfpHeader::parse(buf)?;
            if header.length() != buf.len() {
                return Err(Error::malformed(format!(
                    "header length {} disagrees with frame of {} bytes",
                    header.length(),
                    buf.len()
                )));
            }
            Self::parse(&header, &buf[OfpHeader::size()..])
        }

        /// Encode `msg` with transaction id `xid`; the length field is computed here.
        pub fn encode(xid: u32, msg: &Message) -> Result<Vec<u8>> {
            <Message as OfpMessage>::marshal(xid, msg)
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            let body = match *msg {
                Message::Hello(ref buf) |
                Message::EchoRequest(ref buf) |
                Message::EchoReply(ref buf) |
                Message::Unhandled(_, ref buf) => buf.len(),
                Message::Error(ref err) => ErrorMsg::size_of(err),
                Message::FeaturesReq | Message::BarrierRequest | Message::BarrierReply => 0,
                Message::FeaturesReply(ref sf) => SwitchFeatures::size_of(sf),
                Message::FlowRemoved(ref fr) => FlowRemoved::size_of(fr),
                Message::PacketOut(ref po) => PacketOut::size_of(po),
                Message::FlowMod(ref fm) => FlowMod::size_of(fm),
                Message::MultipartRequest(ref sr) => StatsReq::size_of(sr),
                Message::MultipartReply(ref sr) => StatsResp::size_of(sr),
            };
            OfpHeader::size() + body
        }

        fn header_of(xid: u32, msg: &Message) -> Result<OfpHeader> {
            let sizeof_buf = Self::size_of(msg);
            if sizeof_buf > u16::MAX as usize {
                return Err(Error::invalid(format!("message of {} bytes exceeds 65535", sizeof_buf)));
            }
            Ok(OfpHeader::new(OPENFLOW_0_04_VERSION,
                              Self::type_byte(msg),
                              sizeof_buf as u16,
                              xid))
        }

        fn marshal(xid: u32, msg: &Message) -> Result<Vec<u8>> {
            let hdr = Self::header_of(xid, msg)?;
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr)?;
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message)> {
            let typ = header.type_code();
            if header.version() != OPENFLOW_0_04_VERSION && typ != Some(MsgCode::Hello) {
                return Err(Error::malformed(format!("unsupported version 0x{:02x}", header.version())));
            }
            let msg = match typ {
                Some(MsgCode::Hello) => {
                    debug!("Message received: Hello");
                    Message::Hello(buf.to_vec())
                }
                Some(MsgCode::Error) => {
                    debug!("Message received: Error");
                    Message::Error(ErrorMsg::parse(buf)?)
                }
                Some(MsgCode::EchoReq) => Message::EchoRequest(buf.to_vec()),
                Some(MsgCode::EchoResp) => Message::EchoReply(buf.to_vec()),
                Some(MsgCode::FeaturesReq) => Message::FeaturesReq,
                Some(MsgCode::FeaturesResp) => {
                    debug!("Message received: FeaturesResp");
                    Message::FeaturesReply(SwitchFeatures::parse(buf)?)
                }
                Some(MsgCode::FlowRemoved) => {
                    debug!("Message received: FlowRemoved");
                    Message::FlowRemoved(FlowRemoved::parse(buf)?)
                }
                Some(MsgCode::PacketOut) => Message::PacketOut(PacketOut::parse(buf)?),
                Some(MsgCode::FlowMod) => Message::FlowMod(FlowMod::parse(buf)?),
                Some(MsgCode::MultipartReq) => Message::MultipartRequest(StatsReq::parse(buf)?),
                Some(MsgCode::MultipartResp) => {
                    debug!("Message received: MultipartResp");
                    Message::MultipartReply(StatsResp::parse(buf)?)
                }
                Some(MsgCode::BarrierReq) => Message::BarrierRequest,
                Some(MsgCode::BarrierResp) => Message::BarrierReply,
                _ => {
                    debug!("Message received: unhandled type {}", header.type_byte());
                    Message::Unhandled(header.type_byte(), buf.to_vec())
                }
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a permanent flow parameterized by the given
    /// `priority`, `pattern`, and `actions`.
    pub fn add_flow(prio: u16, pattern: Match, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            cookie: 0,
            cookie_mask: 0,
            table: 0,
            command: FlowModCmd::AddFlow,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            priority: prio,
            apply_to_packet: None,
            out_port: None,
            out_group: None,
            notify_when_removed: false,
            check_overlap: false,
            reset_counts: false,
            no_packet_counts: false,
            no_byte_counts: false,
            pattern,
            instructions: if actions.is_empty() {
                vec![]
            } else {
                vec![Instruction::ApplyActions(actions)]
            },
        }
    }

    /// Return a `FlowMod` removing exactly the flow with this `priority` and `pattern`.
    pub fn delete_strict_flow(prio: u16, pattern: Match) -> FlowMod {
        FlowMod {
            command: FlowModCmd::DeleteStrictFlow,
            ..add_flow(prio, pattern, vec![])
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::oxm::{OxmFieldType, OxmValue};

        const TEST_XID: u32 = 0x12345678;

        fn in_port_match(port: u32) -> Match {
            let mut m = Match::match_all();
            m.push(OxmField::int(OxmFieldType::InPort, port).unwrap());
            m
        }

        fn round_trip(msg: Message) -> Vec<u8> {
            let data = Message::encode(TEST_XID, &msg).unwrap();
            let header = OfpHeader::parse(&data).unwrap();
            assert_eq!(header.length(), data.len());
            assert_eq!(header.version(), 4);
            let (xid, parsed) = Message::decode(&data).unwrap();
            assert_eq!(xid, TEST_XID);
            assert_eq!(parsed, msg);
            data
        }

        fn sample_flow_removed(pattern: Match) -> FlowRemoved {
            FlowRemoved {
                pattern,
                cookie: 0x0102030405060708,
                priority: 100,
                reason: FlowRemovedReason::Delete,
                table_id: 3,
                duration_sec: 60,
                duration_nsec: 500,
                idle_timeout: Timeout::ExpiresAfter(10),
                hard_timeout: Timeout::Permanent,
                packet_count: 42,
                byte_count: 4200,
            }
        }

        #[test]
        fn test_marshal_barrier_request() {
            let data = Message::encode(TEST_XID, &Message::BarrierRequest).unwrap();
            assert_eq!(data, vec![0x04, 0x14, 0x00, 0x08, 0x12, 0x34, 0x56, 0x78]);
        }

        #[test]
        fn test_parse_barrier_reply() {
            let data = [0x04, 0x15, 0x00, 0x08, 0x00, 0x00, 0x00, 0x09];
            let (xid, msg) = Message::decode(&data).unwrap();
            assert_eq!(xid, 9);
            assert_eq!(msg, Message::BarrierReply);
        }

        #[test]
        fn test_marshal_echo_request() {
            let data = round_trip(Message::EchoRequest(vec![0xab; 4]));
            assert_eq!(data,
                       vec![0x04, 0x02, 0x00, 0x0c, 0x12, 0x34, 0x56, 0x78, 0xab, 0xab, 0xab, 0xab]);
            round_trip(Message::EchoReply(vec![]));
            round_trip(Message::Hello(vec![]));
        }

        #[test]
        fn test_parse_error() {
            let data = [0x04, 0x01, 0x00, 0x10, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x05, 0x00, 0x01,
                        0xde, 0xad, 0xbe, 0xef];
            let (xid, msg) = Message::decode(&data).unwrap();
            assert_eq!(xid, 42);
            match msg {
                Message::Error(ref err) => {
                    assert_eq!(err.error_type(), Some(ErrorType::FlowModFailed));
                    assert_eq!(err.code, 1);
                    assert_eq!(err.data, vec![0xde, 0xad, 0xbe, 0xef]);
                }
                _ => panic!("Should be an Error message"),
            }
            assert_eq!(Message::encode(42, &msg).unwrap(), data.to_vec());
        }

        #[test]
        fn test_marshal_flow_mod() {
            let fm = add_flow(100,
                              in_port_match(3),
                              vec![Action::output(PseudoPort::PhysicalPort(2))]);
            let data = Message::encode(7, &Message::FlowMod(fm.clone())).unwrap();

            let mut expected = vec![0x04, 0x0e, 0x00, 0x58, 0x00, 0x00, 0x00, 0x07];
            expected.extend_from_slice(&[0; 16]); // cookie, cookie mask
            expected.extend_from_slice(&[0x00, 0x00]); // table, command ADD
            expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // idle, hard
            expected.extend_from_slice(&[0x00, 0x64]); // priority
            expected.extend_from_slice(&[0xff; 12]); // buffer id, out port, out group
            expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // flags, pad
            expected.extend_from_slice(&[0x00, 0x01, 0x00, 0x0c, 0x80, 0x00, 0x00, 0x04,
                                         0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00]);
            expected.extend_from_slice(&[0x00, 0x04, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00]);
            expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x02,
                                         0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
            assert_eq!(data, expected);

            round_trip(Message::FlowMod(fm));
        }

        #[test]
        fn test_flow_mod_with_every_instruction() {
            let mut fm = add_flow(7, in_port_match(1), vec![]);
            fm.command = FlowModCmd::ModStrictFlow;
            fm.cookie = 0xfeed;
            fm.cookie_mask = 0xffff;
            fm.table = 2;
            fm.idle_timeout = Timeout::ExpiresAfter(30);
            fm.apply_to_packet = Some(77);
            fm.out_port = Some(PseudoPort::PhysicalPort(9));
            fm.out_group = Some(4);
            fm.notify_when_removed = true;
            fm.no_byte_counts = true;
            let vlan = OxmField::short(OxmFieldType::VlanVid, 0x1000 | 10).unwrap();
            fm.instructions = vec![
                Instruction::ApplyActions(vec![Action::PushVlan(0x8100),
                                               Action::SetField(vlan),
                                               Action::output(PseudoPort::Controller)]),
                Instruction::WriteActions(vec![Action::PopVlan]),
                Instruction::ClearActions,
                Instruction::WriteMetadata { metadata: 1, mask: 0xff },
                Instruction::Meter(5),
                Instruction::GotoTable(3),
            ];
            round_trip(Message::FlowMod(fm));
        }

        #[test]
        fn test_table_output_rejected_in_flow_mod() {
            let fm = add_flow(1, Match::match_all(), vec![Action::output(PseudoPort::Table)]);
            assert!(matches!(Message::encode(1, &Message::FlowMod(fm)),
                             Err(Error::InvalidArgument(_))));
        }

        #[test]
        fn test_delete_strict_targets_any_port() {
            let fm = delete_strict_flow(5, in_port_match(1));
            assert_eq!(fm.command, FlowModCmd::DeleteStrictFlow);
            assert!(fm.instructions.is_empty());
            let data = Message::encode(1, &Message::FlowMod(fm)).unwrap();
            assert_eq!(data[8 + 17], 4);
            assert_eq!(&data[8 + 28..8 + 36], &[0xff; 8]);
        }

        #[test]
        fn test_flow_removed_layout() {
            let fr = sample_flow_removed(Match::match_all());
            assert_eq!(fr.compute_length(), FlowRemoved::MINIMUM_LENGTH);
            let data = round_trip(Message::FlowRemoved(fr));
            assert_eq!(data.len(), 56);
            // match first, then the cookie
            assert_eq!(&data[8..12], &[0x00, 0x01, 0x00, 0x04]);
            assert_eq!(&data[16..24], &[1, 2, 3, 4, 5, 6, 7, 8]);
            assert_eq!(data[26], 2);
            assert_eq!(data[27], 3);

            let fr = sample_flow_removed(in_port_match(4));
            assert_eq!(fr.compute_length(), 56 - 8 + 16);
            let data = round_trip(Message::FlowRemoved(fr));
            assert_eq!(data.len(), 64);
        }

        #[test]
        fn test_flow_removed_bad_reason() {
            let mut data = Message::encode(1, &Message::FlowRemoved(sample_flow_removed(Match::match_all())))
                .unwrap();
            data[26] = 4;
            assert!(matches!(Message::decode(&data), Err(Error::MalformedMessage(_))));
        }

        #[test]
        fn test_packet_out_layout() {
            let mut po = PacketOut::new(PseudoPort::Controller, vec![Action::output(PseudoPort::Flood)]);
            po.set_packet_data(vec![0xaa, 0xbb, 0xcc]).unwrap();
            let data = round_trip(Message::PacketOut(po));
            assert_eq!(data.len(), PacketOut::MINIMUM_LENGTH + 16 + 3);
            assert_eq!(&data[8..12], &[0xff; 4]);
            assert_eq!(&data[12..16], &[0xff, 0xff, 0xff, 0xfd]);
            assert_eq!(&data[16..18], &[0x00, 0x10]);
            assert_eq!(&data[18..24], &[0; 6]);
            assert_eq!(&data[40..], &[0xaa, 0xbb, 0xcc]);

            let mut po = PacketOut::new(PseudoPort::PhysicalPort(1), vec![]);
            po.set_buffer_id(12).unwrap();
            let data = round_trip(Message::PacketOut(po));
            assert_eq!(data.len(), PacketOut::MINIMUM_LENGTH);
        }

        #[test]
        fn test_packet_out_buffer_and_data_exclusive() {
            let mut po = PacketOut::new(PseudoPort::Controller, vec![]);
            po.set_packet_data(vec![1, 2, 3]).unwrap();
            assert!(matches!(po.set_buffer_id(5), Err(Error::InvalidArgument(_))));
            assert!(po.set_buffer_id(OFP_NO_BUFFER).is_ok());

            let mut po = PacketOut::new(PseudoPort::Controller, vec![]);
            po.set_buffer_id(5).unwrap();
            assert!(matches!(po.set_packet_data(vec![1]), Err(Error::InvalidArgument(_))));
            assert!(po.set_packet_data(vec![]).is_ok());
            assert_eq!(po.buffer_id(), Some(5));
        }

        #[test]
        fn test_packet_out_with_buffer_and_data_is_malformed() {
            let mut po = PacketOut::new(PseudoPort::Controller, vec![]);
            po.set_buffer_id(5).unwrap();
            let mut data = Message::encode(1, &Message::PacketOut(po)).unwrap();
            data.push(0xee);
            data[3] += 1;
            assert!(matches!(Message::decode(&data), Err(Error::MalformedMessage(_))));
        }

        #[test]
        fn test_output_action_is_sixteen_bytes() {
            let mut bytes = vec![];
            Action::Output { port: PseudoPort::PhysicalPort(7), max_len: 128 }
                .marshal(&mut bytes)
                .unwrap();
            assert_eq!(bytes,
                       vec![0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x07, 0x00, 0x80, 0, 0, 0,
                            0, 0, 0]);
        }

        #[test]
        fn test_set_field_action_is_padded() {
            let field = OxmField::new(OxmFieldType::EthDst,
                                      OxmValue::Raw(vec![1, 2, 3, 4, 5, 6]))
                .unwrap();
            let act = Action::SetField(field);
            assert_eq!(act.size_of(), 16);
            let mut bytes = vec![];
            act.marshal(&mut bytes).unwrap();
            assert_eq!(bytes.len(), 16);
            assert_eq!(Action::parse_sequence(&bytes).unwrap(), vec![act]);
        }

        #[test]
        fn test_features_reply() {
            let sf = SwitchFeatures {
                datapath_id: 0x0000_0000_0000_00ab,
                num_buffers: 256,
                num_tables: 254,
                auxiliary_id: 0,
                supported_capabilities: Capabilities {
                    flow_stats: true,
                    port_stats: true,
                    port_blocked: true,
                    ..Default::default()
                },
            };
            let data = round_trip(Message::FeaturesReply(sf));
            assert_eq!(data.len(), 32);
        }

        #[test]
        fn test_multipart() {
            let req = StatsReq::all(StatType::Flow).unwrap();
            assert_eq!(req.body.len(), 40);
            round_trip(Message::MultipartRequest(req));
            assert_eq!(StatsReq::all(StatType::Desc).unwrap().body.len(), 0);
            assert!(StatsReq::all(StatType::Experimenter).is_err());

            let resp = StatsResp { stat_type: StatType::Port, flags: OFPMPF_REPLY_MORE, body: vec![9; 112] };
            assert!(resp.more());
            round_trip(Message::MultipartReply(resp));
        }

        #[test]
        fn test_unhandled_round_trips() {
            let msg = Message::Unhandled(MsgCode::PortStatus as u8, vec![1, 2, 3, 4]);
            assert_eq!(msg.msg_code(), Some(MsgCode::PortStatus));
            round_trip(msg);
            round_trip(Message::Unhandled(0xee, vec![]));
        }

        #[test]
        fn test_truncated_flow_mod_is_malformed() {
            let fm = add_flow(1, in_port_match(3), vec![Action::output(PseudoPort::AllPorts)]);
            let data = Message::encode(1, &Message::FlowMod(fm)).unwrap();
            for cut in &[9usize, 30, 50, 60, data.len() - 1] {
                let mut short = data[..*cut].to_vec();
                short[2] = 0;
                short[3] = *cut as u8;
                assert!(matches!(Message::decode(&short), Err(Error::MalformedMessage(_))),
                        "cut at {}",
                        cut);
            }
        }

        #[test]
        fn test_length_mismatch_is_malformed() {
            let mut data = Message::encode(1, &Message::EchoRequest(vec![1, 2])).unwrap();
            data.push(3);
            assert!(matches!(Message::decode(&data), Err(Error::MalformedMessage(_))));
        }

        #[test]
        fn test_wrong_version_is_malformed() {
            let data = [0x01, 0x14, 0x00, 0x08, 0, 0, 0, 1];
            assert!(matches!(Message::decode(&data), Err(Error::MalformedMessage(_))));
            let hello10 = [0x01, 0x00, 0x00, 0x08, 0, 0, 0, 1];
            assert!(Message::decode(&hello10).is_ok());
        }

        #[test]
        fn test_oversized_message_is_rejected() {
            let msg = Message::EchoRequest(vec![0; 70000]);
            assert!(matches!(Message::encode(1, &msg), Err(Error::InvalidArgument(_))));
        }
    }
}
