//! Request and response messages.
//!
//! Requests are fixed-size: a type code, the rule-name field and a body
//! area wide enough for the largest body, zero-padded. A request shorter
//! than [`REQUEST_SIZE`] is malformed and must be dropped by the receiver.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};
use crate::record::{ensure, get_name, put_name, ConnLog, IpLog, IpRule, NatRecord};

const REQ_GET_ALL_IP_RULES: u32 = 1;
const REQ_ADD_IP_RULE: u32 = 2;
const REQ_DEL_IP_RULE: u32 = 3;
const REQ_SET_ACTION: u32 = 4;
const REQ_GET_ALL_IP_LOGS: u32 = 5;
const REQ_GET_ALL_CONNS: u32 = 6;
const REQ_ADD_NAT_RULE: u32 = 7;
const REQ_DEL_NAT_RULE: u32 = 8;
const REQ_GET_NAT_RULES: u32 = 9;

const RSP_ONLY_HEAD: u32 = 10;
const RSP_MSG: u32 = 11;
const RSP_IP_RULES: u32 = 12;
const RSP_IP_LOGS: u32 = 13;
const RSP_NAT_RULES: u32 = 14;
const RSP_CONN_LOGS: u32 = 15;

const REQUEST_HEADER: usize = 4 + crate::RULE_NAME_FIELD;

/// Fixed size of every request on the wire.
pub const REQUEST_SIZE: usize = REQUEST_HEADER + IpRule::SIZE;

/// Size of the response header preceding every body.
pub const RESPONSE_HEADER_SIZE: usize = 8;

/// An administrator request to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read the ordered filter-rule list.
    GetAllIpRules,
    /// Insert a rule after the named one (empty `after` inserts at head).
    AddIpRule { after: String, rule: IpRule },
    /// Remove every rule with this name.
    DelIpRule { name: String },
    /// Replace the default verdict (`ACTION_*` code).
    SetDefaultAction { action: u32 },
    /// Fetch the latest `count` log entries (0 means all).
    GetAllIpLogs { count: u32 },
    /// Snapshot the connection table.
    GetAllConns,
    /// Append a NAT rule.
    AddNatRule { rule: NatRecord },
    /// Remove the NAT rule at this ordinal.
    DelNatRule { ordinal: u32 },
    /// Read the NAT rule list.
    GetNatRules,
}

impl Request {
    const fn type_code(&self) -> u32 {
        match self {
            Self::GetAllIpRules => REQ_GET_ALL_IP_RULES,
            Self::AddIpRule { .. } => REQ_ADD_IP_RULE,
            Self::DelIpRule { .. } => REQ_DEL_IP_RULE,
            Self::SetDefaultAction { .. } => REQ_SET_ACTION,
            Self::GetAllIpLogs { .. } => REQ_GET_ALL_IP_LOGS,
            Self::GetAllConns => REQ_GET_ALL_CONNS,
            Self::AddNatRule { .. } => REQ_ADD_NAT_RULE,
            Self::DelNatRule { .. } => REQ_DEL_NAT_RULE,
            Self::GetNatRules => REQ_GET_NAT_RULES,
        }
    }

    /// Serializes the request, padded to [`REQUEST_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NameTooLong`] for an oversized rule name.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<()> {
        buf.put_u32_le(self.type_code());
        let body_len = match self {
            Self::GetAllIpRules | Self::GetAllConns | Self::GetNatRules => {
                put_name(buf, "")?;
                0
            }
            Self::AddIpRule { after, rule } => {
                put_name(buf, after)?;
                rule.encode(buf)?;
                IpRule::SIZE
            }
            Self::DelIpRule { name } => {
                put_name(buf, name)?;
                0
            }
            Self::SetDefaultAction { action } => {
                put_name(buf, "")?;
                buf.put_u32_le(*action);
                4
            }
            Self::GetAllIpLogs { count } => {
                put_name(buf, "")?;
                buf.put_u32_le(*count);
                4
            }
            Self::AddNatRule { rule } => {
                put_name(buf, "")?;
                rule.encode(buf);
                NatRecord::SIZE
            }
            Self::DelNatRule { ordinal } => {
                put_name(buf, "")?;
                buf.put_u32_le(*ordinal);
                4
            }
        };
        buf.put_bytes(0, IpRule::SIZE - body_len);
        Ok(())
    }

    /// Parses one fixed-size request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] when fewer than [`REQUEST_SIZE`]
    /// bytes remain and [`ProtocolError::UnknownRequest`] for an
    /// out-of-range type code.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, REQUEST_SIZE)?;
        let tp = buf.get_u32_le();
        let name = get_name(buf)?;
        let (req, body_len) = match tp {
            REQ_GET_ALL_IP_RULES => (Self::GetAllIpRules, 0),
            REQ_ADD_IP_RULE => {
                let rule = IpRule::decode(buf)?;
                (Self::AddIpRule { after: name, rule }, IpRule::SIZE)
            }
            REQ_DEL_IP_RULE => (Self::DelIpRule { name }, 0),
            REQ_SET_ACTION => (
                Self::SetDefaultAction {
                    action: buf.get_u32_le(),
                },
                4,
            ),
            REQ_GET_ALL_IP_LOGS => (
                Self::GetAllIpLogs {
                    count: buf.get_u32_le(),
                },
                4,
            ),
            REQ_GET_ALL_CONNS => (Self::GetAllConns, 0),
            REQ_ADD_NAT_RULE => {
                let rule = NatRecord::decode(buf)?;
                (Self::AddNatRule { rule }, NatRecord::SIZE)
            }
            REQ_DEL_NAT_RULE => (
                Self::DelNatRule {
                    ordinal: buf.get_u32_le(),
                },
                4,
            ),
            REQ_GET_NAT_RULES => (Self::GetNatRules, 0),
            other => return Err(ProtocolError::UnknownRequest(other)),
        };
        buf.advance(IpRule::SIZE - body_len);
        Ok(req)
    }
}

/// The engine's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Header only; `count` reports an operation's cardinality.
    OnlyHead { count: u32 },
    /// A human-readable status line.
    Msg(String),
    /// The filter-rule list.
    IpRules(Vec<IpRule>),
    /// Recent verdict log entries.
    IpLogs(Vec<IpLog>),
    /// The configured NAT rules.
    NatRules(Vec<NatRecord>),
    /// A connection-table snapshot.
    ConnLogs(Vec<ConnLog>),
}

impl Response {
    /// Serializes the response header and body.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Self::OnlyHead { count } => {
                buf.put_u32_le(RSP_ONLY_HEAD);
                buf.put_u32_le(*count);
            }
            Self::Msg(text) => {
                buf.put_u32_le(RSP_MSG);
                buf.put_u32_le(text.len() as u32);
                buf.put_slice(text.as_bytes());
                buf.put_u8(0);
            }
            Self::IpRules(rules) => {
                buf.put_u32_le(RSP_IP_RULES);
                buf.put_u32_le(rules.len() as u32);
                for rule in rules {
                    // Stored names always fit the field.
                    let _ = rule.encode(buf);
                }
            }
            Self::IpLogs(logs) => {
                buf.put_u32_le(RSP_IP_LOGS);
                buf.put_u32_le(logs.len() as u32);
                for log in logs {
                    log.encode(buf);
                }
            }
            Self::NatRules(rules) => {
                buf.put_u32_le(RSP_NAT_RULES);
                buf.put_u32_le(rules.len() as u32);
                for rule in rules {
                    rule.encode(buf);
                }
            }
            Self::ConnLogs(conns) => {
                buf.put_u32_le(RSP_CONN_LOGS);
                buf.put_u32_le(conns.len() as u32);
                for conn in conns {
                    conn.encode(buf);
                }
            }
        }
    }

    /// Parses a response header and its body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] on short input,
    /// [`ProtocolError::UnknownResponse`] for an unknown body type, and
    /// [`ProtocolError::BadText`] for a non-UTF-8 status line.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, RESPONSE_HEADER_SIZE)?;
        let body_tp = buf.get_u32_le();
        let array_len = buf.get_u32_le() as usize;
        match body_tp {
            RSP_ONLY_HEAD => Ok(Self::OnlyHead {
                count: array_len as u32,
            }),
            RSP_MSG => {
                ensure(buf, array_len + 1)?;
                let mut raw = vec![0u8; array_len];
                buf.copy_to_slice(&mut raw);
                buf.advance(1);
                Ok(Self::Msg(
                    String::from_utf8(raw).map_err(|e| ProtocolError::BadText(e.utf8_error()))?,
                ))
            }
            RSP_IP_RULES => {
                let mut rules = Vec::new();
                for _ in 0..array_len {
                    rules.push(IpRule::decode(buf)?);
                }
                Ok(Self::IpRules(rules))
            }
            RSP_IP_LOGS => {
                let mut logs = Vec::new();
                for _ in 0..array_len {
                    logs.push(IpLog::decode(buf)?);
                }
                Ok(Self::IpLogs(logs))
            }
            RSP_NAT_RULES => {
                let mut rules = Vec::new();
                for _ in 0..array_len {
                    rules.push(NatRecord::decode(buf)?);
                }
                Ok(Self::NatRules(rules))
            }
            RSP_CONN_LOGS => {
                let mut conns = Vec::new();
                for _ in 0..array_len {
                    conns.push(ConnLog::decode(buf)?);
                }
                Ok(Self::ConnLogs(conns))
            }
            other => Err(ProtocolError::UnknownResponse(other)),
        }
    }
}
