use serde_derive::{Deserialize, Serialize};

/// The two kinds of instances a cluster is composed of: gates terminate
/// client connections, nodes run business logic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Gate,
    Node,
}

impl Kind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Gate => "gate",
            Kind::Node => "node",
        }
    }
}

/// Lifecycle state advertised by an instance through the registry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Shut,
    Boot,
    Work,
    Busy,
    Hang,
}

impl State {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            State::Shut => "shut",
            State::Boot => "boot",
            State::Work => "work",
            State::Busy => "busy",
            State::Hang => "hang",
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        match self {
            State::Shut => 0,
            State::Boot => 1,
            State::Work => 2,
            State::Busy => 3,
            State::Hang => 4,
        }
    }

    #[inline]
    pub fn from_u8(value: u8) -> Option<State> {
        match value {
            0 => Some(State::Shut),
            1 => Some(State::Boot),
            2 => Some(State::Work),
            3 => Some(State::Busy),
            4 => Some(State::Hang),
            _ => None,
        }
    }

    /// True when the instance remains dialable for users already bound to it.
    /// A hanging instance keeps serving its bound users but takes no fresh
    /// traffic.
    #[inline]
    pub fn routable(self) -> bool {
        match self {
            State::Work | State::Busy | State::Hang => true,
            State::Shut | State::Boot => false,
        }
    }

    /// True when fresh traffic may be balanced onto the instance.
    #[inline]
    pub fn accepts_new(self) -> bool {
        match self {
            State::Work | State::Busy => true,
            State::Shut | State::Boot | State::Hang => false,
        }
    }
}
