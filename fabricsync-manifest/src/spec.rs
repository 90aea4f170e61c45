//! Typed per-kind specs.
//!
//! [`ResourceSpec`] is a tagged union keyed by [`ResourceKind`]; each variant
//! is validated against its own schema. Fields the schema does not model are
//! preserved in `extra` so round-tripping never drops content.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fabricsync_core::{ResourceKey, ResourceKind};

type Extra = BTreeMap<String, Value>;

const SWITCH_ROLES: &[&str] = &[
    "spine",
    "server-leaf",
    "border-leaf",
    "mixed-leaf",
    "virtual-edge",
];

const CONNECTION_TYPES: &[&str] = &[
    "unbundled",
    "bundled",
    "mclag",
    "eslag",
    "mclagDomain",
    "fabric",
    "vpcLoopback",
    "external",
    "staticExternal",
];

// ---------------------------------------------------------------------------
// VPC family
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcSubnet {
    pub subnet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcSpec {
    pub subnets: BTreeMap<String, VpcSubnet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_namespace: Option<String>,
    /// Groups of subnet names allowed to talk to each other.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permit: Vec<Vec<String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcAttachmentSpec {
    /// `<vpc>/<subnet>`
    pub subnet: String,
    pub connection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_vlan: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcPeeringSpec {
    /// Each entry maps exactly two VPC names to their peering options.
    pub permit: Vec<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

// ---------------------------------------------------------------------------
// Externals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSpec {
    pub ipv4_namespace: String,
    pub inbound_community: String,
    pub outbound_community: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAttachmentSpec {
    pub external: String,
    pub connection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbor: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeeringSide {
    pub name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringPermit {
    pub vpc: PeeringSide,
    pub external: PeeringSide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringSpec {
    pub permit: ExternalPeeringPermit,
    #[serde(flatten)]
    pub extra: Extra,
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv4NamespaceSpec {
    pub subnets: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanRange {
    pub from: u16,
    pub to: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanNamespaceSpec {
    pub ranges: Vec<VlanRange>,
    #[serde(flatten)]
    pub extra: Extra,
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchSpec {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SwitchGroupSpec {
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A connection carries exactly one link-type block (`unbundled`, `mclag`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConnectionSpec {
    #[serde(flatten)]
    pub links: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    Vpc(VpcSpec),
    VpcAttachment(VpcAttachmentSpec),
    VpcPeering(VpcPeeringSpec),
    External(ExternalSpec),
    ExternalAttachment(ExternalAttachmentSpec),
    ExternalPeering(ExternalPeeringSpec),
    Ipv4Namespace(Ipv4NamespaceSpec),
    VlanNamespace(VlanNamespaceSpec),
    Switch(SwitchSpec),
    SwitchGroup(SwitchGroupSpec),
    Server(ServerSpec),
    Connection(ConnectionSpec),
}

impl ResourceSpec {
    /// Deserialize `value` into the variant for `kind`.
    pub fn from_value(kind: ResourceKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ResourceKind::Vpc => ResourceSpec::Vpc(serde_json::from_value(value)?),
            ResourceKind::VpcAttachment => {
                ResourceSpec::VpcAttachment(serde_json::from_value(value)?)
            }
            ResourceKind::VpcPeering => ResourceSpec::VpcPeering(serde_json::from_value(value)?),
            ResourceKind::External => ResourceSpec::External(serde_json::from_value(value)?),
            ResourceKind::ExternalAttachment => {
                ResourceSpec::ExternalAttachment(serde_json::from_value(value)?)
            }
            ResourceKind::ExternalPeering => {
                ResourceSpec::ExternalPeering(serde_json::from_value(value)?)
            }
            ResourceKind::Ipv4Namespace => {
                ResourceSpec::Ipv4Namespace(serde_json::from_value(value)?)
            }
            ResourceKind::VlanNamespace => {
                ResourceSpec::VlanNamespace(serde_json::from_value(value)?)
            }
            ResourceKind::Switch => ResourceSpec::Switch(serde_json::from_value(value)?),
            ResourceKind::SwitchGroup => ResourceSpec::SwitchGroup(serde_json::from_value(value)?),
            ResourceKind::Server => ResourceSpec::Server(serde_json::from_value(value)?),
            ResourceKind::Connection => ResourceSpec::Connection(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ResourceSpec::Vpc(s) => serde_json::to_value(s),
            ResourceSpec::VpcAttachment(s) => serde_json::to_value(s),
            ResourceSpec::VpcPeering(s) => serde_json::to_value(s),
            ResourceSpec::External(s) => serde_json::to_value(s),
            ResourceSpec::ExternalAttachment(s) => serde_json::to_value(s),
            ResourceSpec::ExternalPeering(s) => serde_json::to_value(s),
            ResourceSpec::Ipv4Namespace(s) => serde_json::to_value(s),
            ResourceSpec::VlanNamespace(s) => serde_json::to_value(s),
            ResourceSpec::Switch(s) => serde_json::to_value(s),
            ResourceSpec::SwitchGroup(s) => serde_json::to_value(s),
            ResourceSpec::Server(s) => serde_json::to_value(s),
            ResourceSpec::Connection(s) => serde_json::to_value(s),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Vpc(_) => ResourceKind::Vpc,
            ResourceSpec::VpcAttachment(_) => ResourceKind::VpcAttachment,
            ResourceSpec::VpcPeering(_) => ResourceKind::VpcPeering,
            ResourceSpec::External(_) => ResourceKind::External,
            ResourceSpec::ExternalAttachment(_) => ResourceKind::ExternalAttachment,
            ResourceSpec::ExternalPeering(_) => ResourceKind::ExternalPeering,
            ResourceSpec::Ipv4Namespace(_) => ResourceKind::Ipv4Namespace,
            ResourceSpec::VlanNamespace(_) => ResourceKind::VlanNamespace,
            ResourceSpec::Switch(_) => ResourceKind::Switch,
            ResourceSpec::SwitchGroup(_) => ResourceKind::SwitchGroup,
            ResourceSpec::Server(_) => ResourceKind::Server,
            ResourceSpec::Connection(_) => ResourceKind::Connection,
        }
    }

    /// Semantic checks beyond the serde schema. Returns a human-readable reason.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ResourceSpec::Vpc(s) => validate_vpc(s),
            ResourceSpec::VpcAttachment(s) => {
                split_pair(&s.subnet).ok_or_else(|| {
                    format!("subnet '{}' must be of the form <vpc>/<subnet>", s.subnet)
                })?;
                non_empty("connection", &s.connection)
            }
            ResourceSpec::VpcPeering(s) => {
                if s.permit.is_empty() {
                    return Err("permit must list at least one VPC pair".into());
                }
                for (i, entry) in s.permit.iter().enumerate() {
                    if entry.len() != 2 {
                        return Err(format!(
                            "permit[{i}] must name exactly two VPCs, found {}",
                            entry.len()
                        ));
                    }
                }
                Ok(())
            }
            ResourceSpec::External(s) => {
                non_empty("ipv4Namespace", &s.ipv4_namespace)?;
                validate_community("inboundCommunity", &s.inbound_community)?;
                validate_community("outboundCommunity", &s.outbound_community)
            }
            ResourceSpec::ExternalAttachment(s) => {
                non_empty("external", &s.external)?;
                non_empty("connection", &s.connection)
            }
            ResourceSpec::ExternalPeering(s) => {
                non_empty("permit.vpc.name", &s.permit.vpc.name)?;
                non_empty("permit.external.name", &s.permit.external.name)
            }
            ResourceSpec::Ipv4Namespace(s) => {
                if s.subnets.is_empty() {
                    return Err("subnets must not be empty".into());
                }
                for subnet in &s.subnets {
                    parse_cidr(subnet)?;
                }
                Ok(())
            }
            ResourceSpec::VlanNamespace(s) => {
                if s.ranges.is_empty() {
                    return Err("ranges must not be empty".into());
                }
                for range in &s.ranges {
                    check_vlan(range.from)?;
                    check_vlan(range.to)?;
                    if range.from > range.to {
                        return Err(format!("range {}..{} is reversed", range.from, range.to));
                    }
                }
                Ok(())
            }
            ResourceSpec::Switch(s) => {
                if SWITCH_ROLES.contains(&s.role.as_str()) {
                    Ok(())
                } else {
                    Err(format!(
                        "unknown role '{}'; expected one of {}",
                        s.role,
                        SWITCH_ROLES.join(", ")
                    ))
                }
            }
            ResourceSpec::SwitchGroup(_) | ResourceSpec::Server(_) => Ok(()),
            ResourceSpec::Connection(s) => {
                let types: Vec<&String> = s
                    .links
                    .keys()
                    .filter(|k| CONNECTION_TYPES.contains(&k.as_str()))
                    .collect();
                match types.len() {
                    1 => Ok(()),
                    0 => Err(format!(
                        "connection needs one of {}",
                        CONNECTION_TYPES.join(", ")
                    )),
                    n => Err(format!("connection declares {n} link types; expected one")),
                }
            }
        }
    }

    /// Resources this spec points at, as `(kind, name)` keys in `namespace`.
    pub fn references(&self, namespace: &str) -> Vec<ResourceKey> {
        let key = |kind, name: &str| ResourceKey::new(kind, namespace, name);
        let mut refs = match self {
            ResourceSpec::Vpc(s) => {
                let mut refs = Vec::new();
                if let Some(ns) = &s.ipv4_namespace {
                    refs.push(key(ResourceKind::Ipv4Namespace, ns));
                }
                if let Some(ns) = &s.vlan_namespace {
                    refs.push(key(ResourceKind::VlanNamespace, ns));
                }
                refs
            }
            ResourceSpec::VpcAttachment(s) => {
                let mut refs = vec![key(ResourceKind::Connection, &s.connection)];
                if let Some((vpc, _)) = split_pair(&s.subnet) {
                    refs.push(key(ResourceKind::Vpc, vpc));
                }
                refs
            }
            ResourceSpec::VpcPeering(s) => s
                .permit
                .iter()
                .flat_map(|entry| entry.keys())
                .map(|vpc| key(ResourceKind::Vpc, vpc))
                .collect(),
            ResourceSpec::External(s) => vec![key(ResourceKind::Ipv4Namespace, &s.ipv4_namespace)],
            ResourceSpec::ExternalAttachment(s) => vec![
                key(ResourceKind::External, &s.external),
                key(ResourceKind::Connection, &s.connection),
            ],
            ResourceSpec::ExternalPeering(s) => vec![
                key(ResourceKind::Vpc, &s.permit.vpc.name),
                key(ResourceKind::External, &s.permit.external.name),
            ],
            ResourceSpec::Ipv4Namespace(_)
            | ResourceSpec::VlanNamespace(_)
            | ResourceSpec::SwitchGroup(_)
            | ResourceSpec::Server(_) => vec![],
            ResourceSpec::Switch(s) => s
                .groups
                .iter()
                .map(|g| key(ResourceKind::SwitchGroup, g))
                .collect(),
            ResourceSpec::Connection(s) => {
                let mut refs = Vec::new();
                for value in s.links.values() {
                    collect_port_devices(value, None, namespace, &mut refs);
                }
                refs
            }
        };
        refs.sort();
        refs.dedup();
        refs
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_vpc(spec: &VpcSpec) -> Result<(), String> {
    if spec.subnets.is_empty() {
        return Err("subnets must not be empty".into());
    }
    for (name, subnet) in &spec.subnets {
        let (network, prefix) = parse_cidr(&subnet.subnet)
            .map_err(|e| format!("subnet '{name}': {e}"))?;
        if let Some(gateway) = &subnet.gateway {
            let gw: Ipv4Addr = gateway
                .parse()
                .map_err(|_| format!("subnet '{name}': gateway '{gateway}' is not an IPv4 address"))?;
            if !cidr_contains(network, prefix, gw) {
                return Err(format!(
                    "subnet '{name}': gateway {gw} is outside {}",
                    subnet.subnet
                ));
            }
        }
        if let Some(vlan) = subnet.vlan {
            check_vlan(vlan).map_err(|e| format!("subnet '{name}': {e}"))?;
        }
    }
    for group in &spec.permit {
        for member in group {
            if !spec.subnets.contains_key(member) {
                return Err(format!("permit references unknown subnet '{member}'"));
            }
        }
    }
    Ok(())
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

fn split_pair(value: &str) -> Option<(&str, &str)> {
    let (left, right) = value.split_once('/')?;
    if left.is_empty() || right.is_empty() || right.contains('/') {
        None
    } else {
        Some((left, right))
    }
}

fn validate_community(field: &str, value: &str) -> Result<(), String> {
    let valid = value
        .split_once(':')
        .map(|(asn, tag)| asn.parse::<u32>().is_ok() && tag.parse::<u32>().is_ok())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(format!("{field} '{value}' must be <asn>:<value>"))
    }
}

fn check_vlan(vlan: u16) -> Result<(), String> {
    if (1..=4094).contains(&vlan) {
        Ok(())
    } else {
        Err(format!("vlan {vlan} outside 1..=4094"))
    }
}

/// Parse `a.b.c.d/len`, requiring host bits to be zero.
pub(crate) fn parse_cidr(value: &str) -> Result<(Ipv4Addr, u8), String> {
    let (addr, len) = value
        .split_once('/')
        .ok_or_else(|| format!("'{value}' is not in CIDR notation"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| format!("'{value}' has an invalid address"))?;
    let len: u8 = len
        .parse()
        .ok()
        .filter(|l| *l <= 32)
        .ok_or_else(|| format!("'{value}' has an invalid prefix length"))?;
    let mask = prefix_mask(len);
    if u32::from(addr) & !mask != 0 {
        return Err(format!("'{value}' has host bits set"));
    }
    Ok((addr, len))
}

fn prefix_mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len))
    }
}

fn cidr_contains(network: Ipv4Addr, len: u8, addr: Ipv4Addr) -> bool {
    let mask = prefix_mask(len);
    u32::from(addr) & mask == u32::from(network) & mask
}

/// Walk a connection link block collecting `<device>/<port>` owners.
fn collect_port_devices(
    value: &Value,
    owner: Option<ResourceKind>,
    namespace: &str,
    out: &mut Vec<ResourceKey>,
) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let next = match k.as_str() {
                    "server" => Some(ResourceKind::Server),
                    "switch" | "leaf" | "spine" => Some(ResourceKind::Switch),
                    "port" => {
                        if let (Some(kind), Some(port)) = (owner, v.as_str()) {
                            if let Some((device, _)) = port.split_once('/') {
                                out.push(ResourceKey::new(kind, namespace, device));
                            }
                        }
                        continue;
                    }
                    _ => owner,
                };
                collect_port_devices(v, next, namespace, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_port_devices(item, owner, namespace, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cidr_parsing() {
        assert!(parse_cidr("10.0.1.0/24").is_ok());
        assert!(parse_cidr("10.0.1.1/24").unwrap_err().contains("host bits"));
        assert!(parse_cidr("10.0.1.0").is_err());
        assert!(parse_cidr("10.0.1.0/33").is_err());
    }

    #[test]
    fn vpc_gateway_must_be_inside_subnet() {
        let spec = ResourceSpec::from_value(
            ResourceKind::Vpc,
            json!({"subnets": {"default": {"subnet": "10.0.1.0/24", "gateway": "10.0.2.1"}}}),
        )
        .unwrap();
        assert!(spec.validate().unwrap_err().contains("outside"));
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let value = json!({
            "subnets": {"default": {"subnet": "10.0.1.0/24", "dhcp": {"enable": true}}},
            "mode": "l2vni"
        });
        let spec = ResourceSpec::from_value(ResourceKind::Vpc, value.clone()).unwrap();
        assert_eq!(spec.to_value().unwrap(), value);
    }

    #[test]
    fn connection_references_devices() {
        let spec = ResourceSpec::from_value(
            ResourceKind::Connection,
            json!({"unbundled": {"link": {
                "server": {"port": "server-01/enp2s1"},
                "switch": {"port": "leaf-01/E1/1"}
            }}}),
        )
        .unwrap();
        assert!(spec.validate().is_ok());
        let refs = spec.references("default");
        assert!(refs.contains(&ResourceKey::new(ResourceKind::Server, "default", "server-01")));
        assert!(refs.contains(&ResourceKey::new(ResourceKind::Switch, "default", "leaf-01")));
    }

    #[test]
    fn connection_requires_exactly_one_link_type() {
        let spec = ResourceSpec::from_value(
            ResourceKind::Connection,
            json!({"unbundled": {}, "mclag": {}}),
        )
        .unwrap();
        assert!(spec.validate().is_err());
    }
}
