//! Identity atoms
//!
//! StripeId: cluster-wide identity of one stripe, assigned once
//! GroupId: numeric group a server belongs to
//! ServerId: a server node inside the stripe
//! ConnectionId: a client connection (jvm + channel)
//! EntityId / EntityDescriptor: addressing of a server-managed entity
//! ConcurrencyKey: ordering partition inside one entity

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};

/// Stripe identifier.
///
/// Generated exactly once, by the first server ever to become active, and
/// persisted by every member of the stripe from then on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StripeId(Uuid);

impl StripeId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse_str(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(InvalidId::Stripe {
                raw: s.to_string(),
                reason: "empty".into(),
            }
            .into());
        }
        Uuid::parse_str(trimmed).map(Self).map_err(|err| {
            InvalidId::Stripe {
                raw: s.to_string(),
                reason: err.to_string(),
            }
            .into()
        })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Name handed to downstream connection bookkeeping.
    pub fn name(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for StripeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StripeId({})", self.0)
    }
}

impl fmt::Display for StripeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StripeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Group number of a stripe. `-1` is the null group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(i32);

impl GroupId {
    pub const NULL: GroupId = GroupId(-1);

    pub fn new(n: i32) -> Self {
        Self(n)
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupID[{}]", self.0)
    }
}

/// Server node identifier - non-empty name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerId(String);

impl ServerId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.trim().is_empty() {
            Err(InvalidId::Server {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerId({:?})", self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ServerId {
    type Error = CoreError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        ServerId::new(s)
    }
}

impl From<ServerId> for String {
    fn from(id: ServerId) -> String {
        id.0
    }
}

/// Channel number allocated to a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    pub const ZERO: ChannelId = ChannelId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> ChannelId {
        ChannelId(self.0.saturating_add(1))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live client connection: the client process identity plus its channel.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    pub jvm_id: String,
    pub channel: ChannelId,
}

impl ConnectionId {
    pub fn new(jvm_id: impl Into<String>, channel: ChannelId) -> Result<Self, CoreError> {
        let jvm_id = jvm_id.into();
        if jvm_id.trim().is_empty() {
            return Err(InvalidId::Connection {
                raw: format!("{jvm_id}/{channel}"),
                reason: "missing jvm id".into(),
            }
            .into());
        }
        Ok(Self { jvm_id, channel })
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionID({}.{})", self.channel, self.jvm_id)
    }
}

/// Client that originated a replicated transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientID[{}]", self.0)
    }
}

/// Client transaction number. `-1` is the null transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(i64);

impl TransactionId {
    pub const NULL: TransactionId = TransactionId(-1);

    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity identity: implementation class plus instance name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    class_name: String,
    name: String,
}

impl EntityId {
    pub fn new(class_name: impl Into<String>, name: impl Into<String>) -> Result<Self, CoreError> {
        let class_name = class_name.into();
        let name = name.into();
        if class_name.trim().is_empty() {
            return Err(InvalidId::Entity {
                raw: format!("{class_name}:{name}"),
                reason: "empty class name".into(),
            }
            .into());
        }
        Ok(Self { class_name, name })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}:{})", self.class_name, self.name)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.name)
    }
}

/// Per-client handle number for an entity. `0` means "no client instance".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientInstanceId(u64);

impl ClientInstanceId {
    pub const NULL: ClientInstanceId = ClientInstanceId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Full addressing of an entity as carried by a replicated operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: EntityId,
    pub client_instance: ClientInstanceId,
    pub version: u64,
}

impl EntityDescriptor {
    pub fn new(id: EntityId, client_instance: ClientInstanceId, version: u64) -> Self {
        Self {
            id,
            client_instance,
            version,
        }
    }
}

/// Ordering partition inside one entity.
///
/// Operations on the same (entity, key) are applied strictly in arrival
/// order; distinct keys carry no ordering relationship.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcurrencyKey(i32);

impl ConcurrencyKey {
    /// Key used for entity lifecycle traffic.
    pub const MANAGEMENT: ConcurrencyKey = ConcurrencyKey(0);
    /// Key that orders against every other key of the entity.
    pub const UNIVERSAL: ConcurrencyKey = ConcurrencyKey(-1);

    pub fn new(key: i32) -> Self {
        Self(key)
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Debug for ConcurrencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConcurrencyKey({})", self.0)
    }
}

impl fmt::Display for ConcurrencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sender-assigned position of a replicated operation in the source stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
