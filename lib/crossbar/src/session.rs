//! Gate-side session index. A gate tracks which client connections are live
//! and which user each authenticated connection belongs to; the wire
//! operations address sessions either by connection id or by user id.

use std::sync::RwLock;

use hashbrown::HashMap;

/// Addressing mode for gate-side session operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Kind {
    Conn,
    User,
}

impl Kind {
    #[inline]
    pub fn to_u8(self) -> u8 {
        match self {
            Kind::Conn => 0,
            Kind::User => 1,
        }
    }

    #[inline]
    pub fn from_u8(value: u8) -> Option<Kind> {
        match value {
            0 => Some(Kind::Conn),
            1 => Some(Kind::User),
            _ => None,
        }
    }
}

/// A client session terminated on this gate.
#[derive(Debug, Clone)]
pub struct Session {
    pub cid: i64,
    pub uid: Option<i64>,
    pub ip: String,
}

#[derive(Default)]
struct Inner {
    by_cid: HashMap<i64, Session>,
    // uid -> cid, maintained alongside by_cid
    by_uid: HashMap<i64, i64>,
    // cid -> outbound payloads awaiting the acceptor
    mailbox: HashMap<i64, Vec<Vec<u8>>>,
}

/// Concurrent index of live sessions, addressable by connection or user id.
pub struct SessionHub {
    inner: RwLock<Inner>,
}

impl SessionHub {
    pub fn new() -> SessionHub {
        SessionHub {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Registers a freshly accepted connection.
    pub fn open(&self, cid: i64, ip: &str) {
        let mut inner = self.inner.write().expect("Poisoned session lock");

        inner.by_cid.insert(
            cid,
            Session {
                cid,
                uid: None,
                ip: ip.to_string(),
            },
        );
    }

    /// Drops a connection along with its user binding and any queued
    /// payloads. Returns false when the connection is unknown.
    pub fn close(&self, cid: i64) -> bool {
        let mut inner = self.inner.write().expect("Poisoned session lock");

        inner.mailbox.remove(&cid);

        match inner.by_cid.remove(&cid) {
            Some(session) => {
                if let Some(uid) = session.uid {
                    inner.by_uid.remove(&uid);
                }
                true
            }
            None => false,
        }
    }

    /// Queues an outbound payload for the connection. The acceptor owning the
    /// client socket drains the queue. Returns false when the connection is
    /// unknown, in which case the payload is dropped.
    pub fn queue_push(&self, cid: i64, payload: Vec<u8>) -> bool {
        let mut guard = self.inner.write().expect("Poisoned session lock");
        let inner = &mut *guard;

        if !inner.by_cid.contains_key(&cid) {
            return false;
        }

        inner.mailbox.entry(cid).or_insert_with(Vec::new).push(payload);

        true
    }

    /// Takes every queued payload for the connection.
    pub fn drain_pushes(&self, cid: i64) -> Vec<Vec<u8>> {
        self.inner
            .write()
            .expect("Poisoned session lock")
            .mailbox
            .remove(&cid)
            .unwrap_or_default()
    }

    /// Binds a user to a connection. A user already bound elsewhere is moved;
    /// returns false when the connection is unknown.
    pub fn bind(&self, cid: i64, uid: i64) -> bool {
        let mut guard = self.inner.write().expect("Poisoned session lock");
        let inner = &mut *guard;

        if !inner.by_cid.contains_key(&cid) {
            return false;
        }

        // Detach the user from any previous connection first.
        if let Some(prev_cid) = inner.by_uid.remove(&uid) {
            if let Some(prev) = inner.by_cid.get_mut(&prev_cid) {
                prev.uid = None;
            }
        }

        let session = inner
            .by_cid
            .get_mut(&cid)
            .expect("Session vanished under write lock");
        let prev_uid = session.uid.replace(uid);

        if let Some(prev_uid) = prev_uid {
            inner.by_uid.remove(&prev_uid);
        }
        inner.by_uid.insert(uid, cid);

        true
    }

    /// Unbinds a user from its connection. Returns false when the user is not
    /// bound.
    pub fn unbind(&self, uid: i64) -> bool {
        let mut inner = self.inner.write().expect("Poisoned session lock");

        match inner.by_uid.remove(&uid) {
            Some(cid) => {
                if let Some(session) = inner.by_cid.get_mut(&cid) {
                    session.uid = None;
                }
                true
            }
            None => false,
        }
    }

    /// Looks up the session for the given target.
    pub fn get(&self, kind: Kind, target: i64) -> Option<Session> {
        let inner = self.inner.read().expect("Poisoned session lock");

        Self::resolve(&inner, kind, target).cloned()
    }

    /// Remote address of the target's connection.
    pub fn ip(&self, kind: Kind, target: i64) -> Option<String> {
        let inner = self.inner.read().expect("Poisoned session lock");

        Self::resolve(&inner, kind, target).map(|session| session.ip.clone())
    }

    pub fn online(&self, kind: Kind, target: i64) -> bool {
        let inner = self.inner.read().expect("Poisoned session lock");

        Self::resolve(&inner, kind, target).is_some()
    }

    /// Number of live sessions (`Conn`) or authenticated sessions (`User`).
    pub fn count(&self, kind: Kind) -> i64 {
        let inner = self.inner.read().expect("Poisoned session lock");

        match kind {
            Kind::Conn => inner.by_cid.len() as i64,
            Kind::User => inner.by_uid.len() as i64,
        }
    }

    /// All live connection ids.
    pub fn all_cids(&self) -> Vec<i64> {
        let inner = self.inner.read().expect("Poisoned session lock");

        inner.by_cid.keys().copied().collect()
    }

    /// All connection ids with a user binding.
    pub fn bound_cids(&self) -> Vec<i64> {
        let inner = self.inner.read().expect("Poisoned session lock");

        inner.by_uid.values().copied().collect()
    }

    fn resolve<'a>(inner: &'a Inner, kind: Kind, target: i64) -> Option<&'a Session> {
        match kind {
            Kind::Conn => inner.by_cid.get(&target),
            Kind::User => inner
                .by_uid
                .get(&target)
                .and_then(|cid| inner.by_cid.get(cid)),
        }
    }
}
