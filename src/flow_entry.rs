//! Declarative flow-table entries and their translation into FLOW_MOD messages.

use std::net::Ipv4Addr;

use crate::addr::{parse_ipv4_prefix, parse_mac, prefix_mask};
use crate::error::{Error, Result};
use crate::openflow0x04::{Action, FlowMod, FlowModCmd, PseudoPort};
use crate::openflow0x04::message::add_flow;
use crate::oxm::{Match, OxmField, OxmFieldType, OxmValue, OFPVID_PRESENT};

pub const DEFAULT_PRIORITY: u16 = 32767;

const IPPROTO_UDP: u8 = 17;
const IPPROTO_SCTP: u8 = 132;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Remove,
}

/// Optional header criteria. `None` leaves the field wildcarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchCriteria {
    pub ingress_port: Option<u32>,
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    pub vlan_id: Option<u16>,
    pub vlan_priority: Option<u8>,
    pub ether_type: Option<u16>,
    pub tos_bits: Option<u8>,
    pub network_protocol: Option<u8>,
    /// "a.b.c.d" or "a.b.c.d/len".
    pub ip_src: Option<String>,
    pub ip_dst: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

/// A rule to install or remove, as a caller describes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowTableEntry {
    pub operation: Operation,
    /// Only used in log lines.
    pub name: Option<String>,
    pub priority: u16,
    /// Comma-separated action list handed to an `ActionParser`.
    pub actions: Option<String>,
    pub criteria: MatchCriteria,
}

impl FlowTableEntry {
    pub fn new(operation: Operation) -> FlowTableEntry {
        FlowTableEntry {
            operation,
            name: None,
            priority: DEFAULT_PRIORITY,
            actions: None,
            criteria: MatchCriteria::default(),
        }
    }

    pub fn insert() -> FlowTableEntry {
        Self::new(Operation::Insert)
    }

    pub fn remove() -> FlowTableEntry {
        Self::new(Operation::Remove)
    }

    /// Translate into a FLOW_MOD: ADD for inserts, DELETE_STRICT for removals,
    /// permanent, never tied to a buffered packet. The xid is chosen when the
    /// message is sent.
    pub fn build_flow_mod(&self, parser: &dyn ActionParser) -> Result<FlowMod> {
        let pattern = build_match(&self.criteria)?;
        let actions = match self.actions {
            Some(ref s) => parser.parse_actions(s)?,
            None => vec![],
        };
        let mut fm = add_flow(self.priority, pattern, actions);
        fm.command = match self.operation {
            Operation::Insert => FlowModCmd::AddFlow,
            Operation::Remove => FlowModCmd::DeleteStrictFlow,
        };
        Ok(fm)
    }
}

fn ipv4_field(typ: OxmFieldType, text: &str) -> Result<Option<OxmField>> {
    let (addr, len) = parse_ipv4_prefix(text)?;
    let addr = u32::from(addr);
    match len {
        0 => Ok(None),
        32 => OxmField::int(typ, addr).map(Some),
        len => {
            let mask = prefix_mask(len);
            OxmField::masked(typ, OxmValue::Int(addr & mask), OxmValue::Int(mask)).map(Some)
        }
    }
}

fn vlan_vid(vid: u16) -> Result<u16> {
    if vid >= OFPVID_PRESENT {
        return Err(Error::invalid(format!("VLAN id {} out of range", vid)));
    }
    Ok(vid | OFPVID_PRESENT)
}

/// Build the match for `criteria`. Only present criteria are emitted, in a fixed order.
pub fn build_match(criteria: &MatchCriteria) -> Result<Match> {
    let mut m = Match::match_all();
    if let Some(port) = criteria.ingress_port {
        m.push(OxmField::int(OxmFieldType::InPort, port)?);
    }
    if let Some(ref mac) = criteria.src_mac {
        m.push(OxmField::raw(OxmFieldType::EthSrc, &parse_mac(mac)?)?);
    }
    if let Some(ref mac) = criteria.dst_mac {
        m.push(OxmField::raw(OxmFieldType::EthDst, &parse_mac(mac)?)?);
    }
    if let Some(vid) = criteria.vlan_id {
        m.push(OxmField::short(OxmFieldType::VlanVid, vlan_vid(vid)?)?);
    }
    if let Some(pcp) = criteria.vlan_priority {
        m.push(OxmField::byte(OxmFieldType::VlanPcp, pcp)?);
    }
    if let Some(ethertype) = criteria.ether_type {
        m.push(OxmField::short(OxmFieldType::EthType, ethertype)?);
    }
    if let Some(tos) = criteria.tos_bits {
        m.push(OxmField::byte(OxmFieldType::IpDscp, tos >> 2)?);
    }
    if let Some(proto) = criteria.network_protocol {
        m.push(OxmField::byte(OxmFieldType::IpProto, proto)?);
    }
    if let Some(ref ip) = criteria.ip_src {
        m.fields.extend(ipv4_field(OxmFieldType::Ipv4Src, ip)?);
    }
    if let Some(ref ip) = criteria.ip_dst {
        m.fields.extend(ipv4_field(OxmFieldType::Ipv4Dst, ip)?);
    }
    let (src_field, dst_field) = match criteria.network_protocol {
        Some(IPPROTO_UDP) => (OxmFieldType::UdpSrc, OxmFieldType::UdpDst),
        Some(IPPROTO_SCTP) => (OxmFieldType::SctpSrc, OxmFieldType::SctpDst),
        _ => (OxmFieldType::TcpSrc, OxmFieldType::TcpDst),
    };
    if let Some(port) = criteria.src_port {
        m.push(OxmField::short(src_field, port)?);
    }
    if let Some(port) = criteria.dst_port {
        m.push(OxmField::short(dst_field, port)?);
    }
    Ok(m)
}

/// Turns a textual action specification into actions.
pub trait ActionParser: Send + Sync {
    fn parse_actions(&self, actions: &str) -> Result<Vec<Action>>;
}

/// Parser for the static-flow action syntax, e.g. `output=2,set-vlan-id=10`.
#[derive(Copy, Clone, Debug, Default)]
pub struct StaticActionParser;

fn parse_number<T: TryFrom<u64>>(key: &str, s: &str) -> Result<T> {
    let s = s.trim();
    let n = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    n.ok()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| Error::invalid(format!("bad value {:?} for {}", s, key)))
}

fn parse_output_port(s: &str) -> Result<PseudoPort> {
    let port = match s.trim().to_ascii_lowercase().as_str() {
        "all" => PseudoPort::AllPorts,
        "flood" => PseudoPort::Flood,
        "controller" => PseudoPort::Controller,
        "local" => PseudoPort::Local,
        "in_port" | "ingress-port" => PseudoPort::InPort,
        "normal" => PseudoPort::Normal,
        "table" => PseudoPort::Table,
        p => PseudoPort::PhysicalPort(parse_number::<u32>("output", p)?),
    };
    Ok(port)
}

fn ipv4_value(key: &str, s: &str) -> Result<u32> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| Error::invalid(format!("bad IPv4 address {:?} for {}", s, key)))
}

fn need<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str> {
    value.ok_or_else(|| Error::invalid(format!("action {} needs a value", key)))
}

impl StaticActionParser {
    fn parse_one(&self, item: &str) -> Result<Action> {
        let (key, value) = match item.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (item.trim(), None),
        };
        let action = match key {
            "output" => Action::output(parse_output_port(need(key, value)?)?),
            "strip-vlan" => Action::PopVlan,
            "push-vlan" => Action::PushVlan(parse_number(key, need(key, value)?)?),
            "set-vlan-id" => {
                let vid = vlan_vid(parse_number(key, need(key, value)?)?)?;
                Action::SetField(OxmField::short(OxmFieldType::VlanVid, vid)?)
            }
            "set-vlan-priority" => {
                Action::SetField(OxmField::byte(OxmFieldType::VlanPcp, parse_number(key, need(key, value)?)?)?)
            }
            "set-src-mac" => Action::SetField(OxmField::raw(OxmFieldType::EthSrc, &parse_mac(need(key, value)?)?)?),
            "set-dst-mac" => Action::SetField(OxmField::raw(OxmFieldType::EthDst, &parse_mac(need(key, value)?)?)?),
            "set-src-ip" => Action::SetField(OxmField::int(OxmFieldType::Ipv4Src, ipv4_value(key, need(key, value)?)?)?),
            "set-dst-ip" => Action::SetField(OxmField::int(OxmFieldType::Ipv4Dst, ipv4_value(key, need(key, value)?)?)?),
            "set-tos-bits" => {
                let tos: u8 = parse_number(key, need(key, value)?)?;
                Action::SetField(OxmField::byte(OxmFieldType::IpDscp, tos >> 2)?)
            }
            "set-src-port" => Action::SetField(OxmField::short(OxmFieldType::TcpSrc, parse_number(key, need(key, value)?)?)?),
            "set-dst-port" => Action::SetField(OxmField::short(OxmFieldType::TcpDst, parse_number(key, need(key, value)?)?)?),
            k => return Err(Error::invalid(format!("unknown action {:?}", k))),
        };
        Ok(action)
    }
}

impl ActionParser for StaticActionParser {
    fn parse_actions(&self, actions: &str) -> Result<Vec<Action>> {
        actions.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| self.parse_one(item))
            .collect()
    }
}
