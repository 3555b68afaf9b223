use std::sync::{Arc, Mutex};

use flint::logging;

use crossbar::cluster::State;
use crossbar::codec::Encryptor;
use crossbar::errors::{LinkError, LinkResult};
use crossbar::session::{Kind, SessionHub};
use crossbar::transport::GateProvider;

/// Gate provider backed by the session hub. Outbound payloads are encrypted
/// when a key is configured, then queued on the session for the acceptor that
/// owns the client socket to drain.
pub struct HubProvider {
    hub: Arc<SessionHub>,
    state: Mutex<State>,
    encryptor: Option<Arc<dyn Encryptor>>,
    log: logging::Logger,
}

impl HubProvider {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        hub: Arc<SessionHub>,
        encryptor: Option<Arc<dyn Encryptor>>,
        log: L,
    ) -> HubProvider {
        let provider_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::discard(),
        };

        HubProvider {
            hub,
            state: Mutex::new(State::Work),
            encryptor,
            log: provider_log,
        }
    }

    fn seal(&self, payload: Vec<u8>) -> LinkResult<Vec<u8>> {
        match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&payload),
            None => Ok(payload),
        }
    }

    fn deliver_to(&self, cid: i64, payload: Vec<u8>) -> bool {
        self.hub.queue_push(cid, payload)
    }
}

impl GateProvider for HubProvider {
    fn bind(&self, cid: i64, uid: i64) -> LinkResult<()> {
        if self.hub.bind(cid, uid) {
            logging::debug!(self.log, "session bound"; "cid" => cid, "uid" => uid);
            Ok(())
        } else {
            Err(LinkError::NotFoundSession)
        }
    }

    fn unbind(&self, uid: i64) -> LinkResult<()> {
        if self.hub.unbind(uid) {
            Ok(())
        } else {
            Err(LinkError::NotFoundSession)
        }
    }

    fn get_ip(&self, kind: Kind, target: i64) -> LinkResult<String> {
        self.hub.ip(kind, target).ok_or(LinkError::NotFoundSession)
    }

    fn is_online(&self, kind: Kind, target: i64) -> LinkResult<bool> {
        Ok(self.hub.online(kind, target))
    }

    fn stat(&self, kind: Kind) -> LinkResult<i64> {
        Ok(self.hub.count(kind))
    }

    fn disconnect(&self, kind: Kind, target: i64, force: bool) -> LinkResult<()> {
        let session = self.hub.get(kind, target).ok_or(LinkError::NotFoundSession)?;

        self.hub.close(session.cid);

        logging::debug!(self.log, "session disconnected";
                        "cid" => session.cid, "force" => force);

        Ok(())
    }

    fn push(&self, kind: Kind, target: i64, message: Vec<u8>) -> LinkResult<()> {
        let session = self.hub.get(kind, target).ok_or(LinkError::NotFoundSession)?;
        let payload = self.seal(message)?;

        if !self.deliver_to(session.cid, payload) {
            return Err(LinkError::NotFoundSession);
        }

        Ok(())
    }

    fn multicast(&self, kind: Kind, targets: Vec<i64>, message: Vec<u8>) -> LinkResult<i64> {
        let payload = self.seal(message)?;
        let mut total = 0;

        for target in targets {
            if let Some(session) = self.hub.get(kind, target) {
                if self.deliver_to(session.cid, payload.clone()) {
                    total += 1;
                }
            }
        }

        Ok(total)
    }

    fn broadcast(&self, kind: Kind, message: Vec<u8>) -> LinkResult<i64> {
        let payload = self.seal(message)?;
        let mut total = 0;

        let cids = match kind {
            Kind::User => self.hub.bound_cids(),
            Kind::Conn => self.hub.all_cids(),
        };

        for cid in cids {
            if self.deliver_to(cid, payload.clone()) {
                total += 1;
            }
        }

        Ok(total)
    }

    fn get_state(&self) -> LinkResult<State> {
        Ok(*self.state.lock().expect("Poisoned state lock"))
    }

    fn set_state(&self, state: State) -> LinkResult<()> {
        *self.state.lock().expect("Poisoned state lock") = state;

        logging::info!(self.log, "instance state changed"; "state" => state.as_str());

        Ok(())
    }
}
