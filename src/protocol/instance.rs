//! # Instance Identity
//!
//! Every endpoint is an instance of a given type and flavor. Servers grant
//! session ids ([`Sid`]) that encode the type and flavor of the peer they were
//! issued to, so any endpoint can tell what kind of peer sent a message from
//! its `from` field alone.
//!
//! ```text
//!  31 30                          9 8        4 3      0
//! +--+-----------------------------+----------+--------+
//! | 0|           random            |  flavor  |  type  |
//! +--+-----------------------------+----------+--------+
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const TYPE_BITS: u32 = 4;
const FLAVOR_BITS: u32 = 5;
const TYPE_MASK: u32 = (1 << TYPE_BITS) - 1;
const FLAVOR_MASK: u32 = (1 << FLAVOR_BITS) - 1;
const RANDOM_SHIFT: u32 = TYPE_BITS + FLAVOR_BITS;
const RANDOM_MASK: u32 = (1 << (31 - RANDOM_SHIFT)) - 1;

/// Kind of endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Server,
    Agent,
    Client,
}

impl InstanceType {
    pub const ALL: [InstanceType; 3] = [
        InstanceType::Server,
        InstanceType::Agent,
        InstanceType::Client,
    ];

    pub fn id(self) -> u32 {
        match self {
            InstanceType::Server => 1,
            InstanceType::Agent => 2,
            InstanceType::Client => 3,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(InstanceType::Server),
            2 => Some(InstanceType::Agent),
            3 => Some(InstanceType::Client),
            _ => None,
        }
    }

    /// Flavors an instance of this type may run as
    pub fn flavors(self) -> &'static [InstanceFlavor] {
        match self {
            InstanceType::Server | InstanceType::Agent => &[InstanceFlavor::Vanilla],
            InstanceType::Client => &[
                InstanceFlavor::Ascetic,
                InstanceFlavor::Lifegem,
                InstanceFlavor::Soapstone,
                InstanceFlavor::Lockstone,
            ],
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceType::Server => "server",
            InstanceType::Agent => "agent",
            InstanceType::Client => "client",
        };
        f.write_str(name)
    }
}

/// Implementation variant of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceFlavor {
    Vanilla,
    Ascetic,
    Lifegem,
    Soapstone,
    Lockstone,
}

impl InstanceFlavor {
    pub fn id(self) -> u32 {
        match self {
            InstanceFlavor::Vanilla => 1,
            InstanceFlavor::Ascetic => 2,
            InstanceFlavor::Lifegem => 3,
            InstanceFlavor::Soapstone => 4,
            InstanceFlavor::Lockstone => 5,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(InstanceFlavor::Vanilla),
            2 => Some(InstanceFlavor::Ascetic),
            3 => Some(InstanceFlavor::Lifegem),
            4 => Some(InstanceFlavor::Soapstone),
            5 => Some(InstanceFlavor::Lockstone),
            _ => None,
        }
    }
}

/// Every valid (type, flavor) combination
pub fn iterate() -> impl Iterator<Item = (InstanceType, InstanceFlavor)> {
    InstanceType::ALL
        .into_iter()
        .flat_map(|instance| instance.flavors().iter().map(move |&flavor| (instance, flavor)))
}

/// Who an endpoint is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub instance: InstanceType,
    pub flavor: InstanceFlavor,
    pub uuid: String,
}

impl InstanceIdentity {
    pub fn new(instance: InstanceType, flavor: InstanceFlavor, uuid: impl Into<String>) -> Self {
        Self {
            instance,
            flavor,
            uuid: uuid.into(),
        }
    }

    /// Identity with a random v4 UUID
    pub fn generate(instance: InstanceType, flavor: InstanceFlavor) -> Self {
        Self::new(instance, flavor, Uuid::new_v4().to_string())
    }

    pub fn is_valid(&self) -> bool {
        !self.uuid.is_empty() && self.instance.flavors().contains(&self.flavor)
    }
}

/// Session id granted by a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sid(u32);

impl Sid {
    /// Draw a new sid for an instance of the given type and flavor
    pub fn generate(instance: InstanceType, flavor: InstanceFlavor) -> Self {
        let random: u32 = rand::rng().random::<u32>() & RANDOM_MASK;
        Self((random << RANDOM_SHIFT) | (flavor.id() << TYPE_BITS) | instance.id())
    }

    /// Wrap a raw value; zero is not a sid
    pub fn from_value(value: u32) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn instance(self) -> Option<InstanceType> {
        InstanceType::from_id(self.0 & TYPE_MASK)
    }

    pub fn flavor(self) -> Option<InstanceFlavor> {
        InstanceFlavor::from_id((self.0 >> TYPE_BITS) & FLAVOR_MASK)
    }
}

impl From<Sid> for u32 {
    fn from(sid: Sid) -> Self {
        sid.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
