//! Canonical string codecs for the typed tables.
//!
//! Decoding accepts only the exact text the codec would write. A node named
//! with an upper-case MAC or a braced UUID would decode to the same typed
//! entry as its canonical twin while living at a different path, which the
//! persistent-entry helpers could never address. Such nodes are reported as
//! codec errors and skipped by scans.

use crate::mac::MacAddr;
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::str::FromStr;
use uuid::Uuid;
use vns_replicated::{EntryCodec, ReplicatedError, Result, SetCodec};

fn parse<T>(field: &'static str, input: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    input.parse().map_err(|e: T::Err| ReplicatedError::Codec {
        field,
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Parse `input` and require it to match `encode` of the parsed value.
fn parse_canonical<T>(field: &'static str, input: &str, encode: impl Fn(&T) -> String) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let value = parse(field, input)?;
    let canonical = encode(&value);
    if canonical != input {
        return Err(ReplicatedError::Codec {
            field,
            input: input.to_string(),
            reason: format!("not in canonical form, expected {:?}", canonical),
        });
    }
    Ok(value)
}

fn mac_text(mac: &MacAddr) -> String {
    mac.to_string()
}

fn uuid_text(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

fn ipv4_text(ip: &Ipv4Addr) -> String {
    ip.to_string()
}

/// MAC address → port id, for bridge MAC learning tables.
#[derive(Clone, Copy, Debug, Default)]
pub struct MacPortCodec;

impl EntryCodec for MacPortCodec {
    type Key = MacAddr;
    type Value = Uuid;

    fn encode_key(&self, key: &MacAddr) -> String {
        mac_text(key)
    }

    fn decode_key(&self, input: &str) -> Result<MacAddr> {
        parse_canonical("key", input, mac_text)
    }

    fn encode_value(&self, value: &Uuid) -> String {
        uuid_text(value)
    }

    fn decode_value(&self, input: &str) -> Result<Uuid> {
        parse_canonical("value", input, uuid_text)
    }
}

/// MAC address → leased IPv4 address.
#[derive(Clone, Copy, Debug, Default)]
pub struct DhcpLeaseCodec;

impl EntryCodec for DhcpLeaseCodec {
    type Key = MacAddr;
    type Value = Ipv4Addr;

    fn encode_key(&self, key: &MacAddr) -> String {
        mac_text(key)
    }

    fn decode_key(&self, input: &str) -> Result<MacAddr> {
        parse_canonical("key", input, mac_text)
    }

    fn encode_value(&self, value: &Ipv4Addr) -> String {
        ipv4_text(value)
    }

    fn decode_value(&self, input: &str) -> Result<Ipv4Addr> {
        parse_canonical("value", input, ipv4_text)
    }
}

/// Dotted-quad IPv4 set members.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ipv4Codec;

impl SetCodec for Ipv4Codec {
    type Element = Ipv4Addr;

    fn encode(&self, element: &Ipv4Addr) -> String {
        ipv4_text(element)
    }

    fn decode(&self, input: &str) -> Result<Ipv4Addr> {
        parse_canonical("element", input, ipv4_text)
    }
}
