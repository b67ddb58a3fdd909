//! Typed codecs binding domain keys and values to canonical strings.
//!
//! The engines are generic over an [`EntryCodec`]; a concrete replicated
//! map is the engine plus a codec instance. Every replica sharing a store
//! path must use codecs that produce byte-identical strings.

use crate::error::{ReplicatedError, Result};
use std::fmt::Debug;
use std::hash::Hash;

/// Bidirectional mapping between typed entries and canonical strings.
pub trait EntryCodec: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + PartialEq + Debug + Send + Sync + 'static;

    fn encode_key(&self, key: &Self::Key) -> String;
    fn decode_key(&self, input: &str) -> Result<Self::Key>;
    fn encode_value(&self, value: &Self::Value) -> String;
    fn decode_value(&self, input: &str) -> Result<Self::Value>;
}

/// Identity codec for string keys and values.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringCodec;

impl EntryCodec for StringCodec {
    type Key = String;
    type Value = String;

    fn encode_key(&self, key: &String) -> String {
        key.clone()
    }

    fn decode_key(&self, input: &str) -> Result<String> {
        Ok(input.to_string())
    }

    fn encode_value(&self, value: &String) -> String {
        value.clone()
    }

    fn decode_value(&self, input: &str) -> Result<String> {
        Ok(input.to_string())
    }
}

/// Codec for the elements of a replicated set.
pub trait SetCodec: Send + Sync + 'static {
    type Element: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn encode(&self, element: &Self::Element) -> String;
    fn decode(&self, input: &str) -> Result<Self::Element>;
}

/// Adapts a [`SetCodec`] to an [`EntryCodec`] with a unit value, encoded as
/// the empty string.
#[derive(Clone, Debug, Default)]
pub struct SetEntries<C>(pub C);

impl<C: SetCodec> EntryCodec for SetEntries<C> {
    type Key = C::Element;
    type Value = ();

    fn encode_key(&self, key: &C::Element) -> String {
        self.0.encode(key)
    }

    fn decode_key(&self, input: &str) -> Result<C::Element> {
        self.0.decode(input)
    }

    fn encode_value(&self, _value: &()) -> String {
        String::new()
    }

    fn decode_value(&self, input: &str) -> Result<()> {
        if input.is_empty() {
            Ok(())
        } else {
            Err(ReplicatedError::Codec {
                field: "value",
                input: input.to_string(),
                reason: "set entries carry no value".to_string(),
            })
        }
    }
}
