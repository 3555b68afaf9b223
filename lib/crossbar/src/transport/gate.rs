//! Typed client and server-side dispatch for gate-bound operations: session
//! binding, lookups, pushes and state management.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flint::logging;

use crate::cluster::State;
use crate::codes::Code;
use crate::context::Context;
use crate::errors::{LinkError, LinkResult};
use crate::session::Kind;
use crate::transport::client::Client;
use crate::transport::protocol::{
    bind, broadcast, disconnect, getip, multicast, online, push, route, stat, state, unbind,
};
use crate::transport::{Dispatch, Handler};

/// Client façade for talking to a gate instance. Owns the monotonic sequence
/// counter of its pooled connection.
pub struct GateClient {
    seq: AtomicU64,
    cli: Arc<Client>,
}

impl From<Arc<Client>> for GateClient {
    fn from(cli: Arc<Client>) -> GateClient {
        GateClient {
            seq: AtomicU64::new(0),
            cli,
        }
    }
}

impl GateClient {
    /// The underlying framed client.
    #[inline]
    pub fn raw(&self) -> &Arc<Client> {
        &self.cli
    }

    /// Binds a user to its gate connection. Returns true when the gate no
    /// longer holds the session.
    pub fn bind(&self, ctx: &Context, cid: i64, uid: i64) -> LinkResult<bool> {
        let seq = self.next_seq();
        let res = self.cli.call(ctx, seq, bind::encode_bind_req(seq, cid, uid))?;

        Self::miss(bind::decode_bind_res(&res)?)
    }

    /// Unbinds a user from its gate connection. Returns true when the gate no
    /// longer holds the session.
    pub fn unbind(&self, ctx: &Context, uid: i64) -> LinkResult<bool> {
        let seq = self.next_seq();
        let res = self
            .cli
            .call(ctx, seq, unbind::encode_unbind_req(seq, uid))?;

        Self::miss(unbind::decode_unbind_res(&res)?)
    }

    /// Fetches the remote address of a session. The boolean is the miss flag.
    pub fn get_ip(&self, ctx: &Context, kind: Kind, target: i64) -> LinkResult<(String, bool)> {
        let seq = self.next_seq();
        let res = self
            .cli
            .call(ctx, seq, getip::encode_get_ip_req(seq, kind, target))?;

        let (code, ip) = getip::decode_get_ip_res(&res)?;
        let miss = Self::miss(code)?;

        Ok((ip, miss))
    }

    /// Counts sessions of the given kind on the gate.
    pub fn stat(&self, ctx: &Context, kind: Kind) -> LinkResult<i64> {
        let seq = self.next_seq();
        let res = self.cli.call(ctx, seq, stat::encode_stat_req(seq, kind))?;

        let (code, total) = stat::decode_stat_res(&res)?;
        code.into_result()?;

        Ok(total)
    }

    /// Checks whether a session is online. Returns `(miss, online)`.
    pub fn is_online(&self, ctx: &Context, kind: Kind, target: i64) -> LinkResult<(bool, bool)> {
        let seq = self.next_seq();
        let res = self
            .cli
            .call(ctx, seq, online::encode_is_online_req(seq, kind, target))?;

        let (code, is_online) = online::decode_is_online_res(&res)?;
        let miss = Self::miss(code)?;

        Ok((miss, is_online))
    }

    /// Disconnects a session. Fire-and-forget; the gate applies it without
    /// acknowledging.
    pub fn disconnect(&self, ctx: &Context, kind: Kind, target: i64, force: bool) -> LinkResult<()> {
        self.cli
            .send(ctx, disconnect::encode_disconnect_req(0, kind, target, force))
    }

    /// Pushes a message toward a single session. Fire-and-forget; the message
    /// is dropped when the session is gone.
    pub fn push(&self, ctx: &Context, kind: Kind, target: i64, message: &[u8]) -> LinkResult<()> {
        self.cli
            .send(ctx, push::encode_push_req(0, kind, target, message))
    }

    /// Pushes a message toward a set of sessions. Fire-and-forget.
    pub fn multicast(
        &self,
        ctx: &Context,
        kind: Kind,
        targets: &[i64],
        message: &[u8],
    ) -> LinkResult<()> {
        self.cli
            .send(ctx, multicast::encode_multicast_req(0, kind, targets, message))
    }

    /// Pushes a message toward every session of the kind. Fire-and-forget.
    pub fn broadcast(&self, ctx: &Context, kind: Kind, message: &[u8]) -> LinkResult<()> {
        self.cli
            .send(ctx, broadcast::encode_broadcast_req(0, kind, message))
    }

    pub fn get_state(&self, ctx: &Context) -> LinkResult<State> {
        let seq = self.next_seq();
        let res = self
            .cli
            .call(ctx, seq, state::encode_get_state_req(seq))?;

        let (code, current) = state::decode_get_state_res(&res)?;
        code.into_result()?;

        Ok(current)
    }

    pub fn set_state(&self, ctx: &Context, target: State) -> LinkResult<()> {
        let seq = self.next_seq();
        let res = self
            .cli
            .call(ctx, seq, state::encode_set_state_req(seq, target))?;

        state::decode_set_state_res(&res)?.into_result()
    }

    /// Next sequence number, skipping the reserved zero.
    fn next_seq(&self) -> u64 {
        loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

            if seq != 0 {
                return seq;
            }
        }
    }

    /// Folds a status code into the miss flag: the gate answers
    /// `NotFoundSession` when the addressed connection or user is gone.
    fn miss(code: Code) -> LinkResult<bool> {
        match code {
            Code::Ok => Ok(false),
            Code::NotFoundSession | Code::NotFoundUser => Ok(true),
            code => Err(LinkError::Remote(code)),
        }
    }
}

/// Gate-side handler interface for incoming transporter requests.
pub trait GateProvider: Send + Sync {
    fn bind(&self, cid: i64, uid: i64) -> LinkResult<()>;
    fn unbind(&self, uid: i64) -> LinkResult<()>;
    fn get_ip(&self, kind: Kind, target: i64) -> LinkResult<String>;
    fn is_online(&self, kind: Kind, target: i64) -> LinkResult<bool>;
    fn stat(&self, kind: Kind) -> LinkResult<i64>;
    fn disconnect(&self, kind: Kind, target: i64, force: bool) -> LinkResult<()>;
    fn push(&self, kind: Kind, target: i64, message: Vec<u8>) -> LinkResult<()>;
    fn multicast(&self, kind: Kind, targets: Vec<i64>, message: Vec<u8>) -> LinkResult<i64>;
    fn broadcast(&self, kind: Kind, message: Vec<u8>) -> LinkResult<i64>;
    fn get_state(&self) -> LinkResult<State>;
    fn set_state(&self, state: State) -> LinkResult<()>;
}

/// Decodes gate requests and dispatches them to a provider.
pub struct GateHandler<P> {
    provider: P,
    log: logging::Logger,
}

impl<P: GateProvider> GateHandler<P> {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(provider: P, log: L) -> GateHandler<P> {
        let handler_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::discard(),
        };

        GateHandler {
            provider,
            log: handler_log,
        }
    }

    fn code_of<T>(result: &LinkResult<T>) -> Code {
        match result {
            Ok(_) => Code::Ok,
            Err(err) => Code::from_error(err),
        }
    }

    /// Wraps a code into a response unless the request was fire-and-forget.
    fn reply(seq: u64, res: Vec<u8>) -> Dispatch {
        if seq == 0 {
            Dispatch::Silent
        } else {
            Dispatch::Reply(res)
        }
    }
}

impl<P: GateProvider> Handler for GateHandler<P> {
    fn handle(&self, frame: &[u8], route_byte: u8, seq: u64) -> Dispatch {
        match route_byte {
            route::BIND => {
                let code = match bind::decode_bind_req(frame) {
                    Ok((_, cid, uid)) => Self::code_of(&self.provider.bind(cid, uid)),
                    Err(_) => Code::InvalidArgument,
                };

                Self::reply(seq, bind::encode_bind_res(seq, code))
            }
            route::UNBIND => {
                let code = match unbind::decode_unbind_req(frame) {
                    Ok((_, uid)) => Self::code_of(&self.provider.unbind(uid)),
                    Err(_) => Code::InvalidArgument,
                };

                Self::reply(seq, unbind::encode_unbind_res(seq, code))
            }
            route::GET_IP => {
                let (code, ip) = match getip::decode_get_ip_req(frame) {
                    Ok((_, kind, target)) => match self.provider.get_ip(kind, target) {
                        Ok(ip) => (Code::Ok, ip),
                        Err(err) => (Code::from_error(&err), String::new()),
                    },
                    Err(_) => (Code::InvalidArgument, String::new()),
                };

                Self::reply(seq, getip::encode_get_ip_res(seq, code, &ip))
            }
            route::STAT => {
                let (code, total) = match stat::decode_stat_req(frame) {
                    Ok((_, kind)) => match self.provider.stat(kind) {
                        Ok(total) => (Code::Ok, total),
                        Err(err) => (Code::from_error(&err), 0),
                    },
                    Err(_) => (Code::InvalidArgument, 0),
                };

                Self::reply(seq, stat::encode_stat_res(seq, code, total))
            }
            route::IS_ONLINE => {
                let (code, is_online) = match online::decode_is_online_req(frame) {
                    Ok((_, kind, target)) => match self.provider.is_online(kind, target) {
                        Ok(is_online) => (Code::Ok, is_online),
                        Err(err) => (Code::from_error(&err), false),
                    },
                    Err(_) => (Code::InvalidArgument, false),
                };

                Self::reply(seq, online::encode_is_online_res(seq, code, is_online))
            }
            route::DISCONNECT => {
                let code = match disconnect::decode_disconnect_req(frame) {
                    Ok((_, kind, target, force)) => {
                        Self::code_of(&self.provider.disconnect(kind, target, force))
                    }
                    Err(_) => Code::InvalidArgument,
                };

                if code != Code::Ok {
                    logging::debug!(self.log, "disconnect failed"; "code" => code.to_u16());
                }

                Self::reply(seq, disconnect::encode_disconnect_res(seq, code))
            }
            route::PUSH => {
                if let Ok((_, kind, target, message)) = push::decode_push_req(frame) {
                    // Undelivered pushes are dropped, not surfaced.
                    if let Err(err) = self.provider.push(kind, target, message) {
                        logging::debug!(self.log, "push dropped"; "target" => target,
                                        "error" => %err);
                    }
                }

                Dispatch::Silent
            }
            route::MULTICAST => {
                if let Ok((_, kind, targets, message)) = multicast::decode_multicast_req(frame) {
                    if let Err(err) = self.provider.multicast(kind, targets, message) {
                        logging::debug!(self.log, "multicast dropped"; "error" => %err);
                    }
                }

                Dispatch::Silent
            }
            route::BROADCAST => {
                if let Ok((_, kind, message)) = broadcast::decode_broadcast_req(frame) {
                    if let Err(err) = self.provider.broadcast(kind, message) {
                        logging::debug!(self.log, "broadcast dropped"; "error" => %err);
                    }
                }

                Dispatch::Silent
            }
            route::GET_STATE => {
                let (code, current) = match self.provider.get_state() {
                    Ok(current) => (Code::Ok, current),
                    Err(err) => (Code::from_error(&err), State::Shut),
                };

                Self::reply(seq, state::encode_get_state_res(seq, code, current))
            }
            route::SET_STATE => {
                let code = match state::decode_set_state_req(frame) {
                    Ok((_, target)) => Self::code_of(&self.provider.set_state(target)),
                    Err(_) => Code::InvalidArgument,
                };

                Self::reply(seq, state::encode_set_state_res(seq, code))
            }
            _ => Dispatch::Unknown,
        }
    }
}
