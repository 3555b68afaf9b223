//! Typed client and server-side dispatch for node-bound operations: message
//! delivery, event triggers and state management.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flint::logging;

use crate::cluster::State;
use crate::codes::Code;
use crate::context::Context;
use crate::errors::{LinkError, LinkResult};
use crate::transport::client::Client;
use crate::transport::protocol::{deliver, route, state, trigger};
use crate::transport::{Dispatch, Handler};

/// Client façade for talking to a node instance. Owns the monotonic sequence
/// counter of its pooled connection.
pub struct NodeClient {
    seq: AtomicU64,
    cli: Arc<Client>,
}

impl From<Arc<Client>> for NodeClient {
    fn from(cli: Arc<Client>) -> NodeClient {
        NodeClient {
            seq: AtomicU64::new(0),
            cli,
        }
    }
}

impl NodeClient {
    /// The underlying framed client.
    #[inline]
    pub fn raw(&self) -> &Arc<Client> {
        &self.cli
    }

    /// Hands a message to the node for processing. Returns true when the node
    /// answers that the user is not hosted on it, which asks the caller to
    /// re-locate and retry.
    pub fn deliver(&self, ctx: &Context, cid: i64, uid: i64, message: &[u8]) -> LinkResult<bool> {
        let seq = self.next_seq();
        let res = self
            .cli
            .call(ctx, seq, deliver::encode_deliver_req(seq, cid, uid, message))?;

        match deliver::decode_deliver_res(&res)? {
            Code::Ok => Ok(false),
            Code::NotFoundSession | Code::NotFoundUser => Ok(true),
            code => Err(LinkError::Remote(code)),
        }
    }

    /// Fires an event on the node and waits for the acknowledgement.
    pub fn trigger(&self, ctx: &Context, event: i32, cid: i64, uid: i64) -> LinkResult<()> {
        let seq = self.next_seq();
        let res = self
            .cli
            .call(ctx, seq, trigger::encode_trigger_req(seq, event, cid, uid))?;

        trigger::decode_trigger_res(&res)?.into_result()
    }

    pub fn get_state(&self, ctx: &Context) -> LinkResult<State> {
        let seq = self.next_seq();
        let res = self.cli.call(ctx, seq, state::encode_get_state_req(seq))?;

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
}

/// Node-side handler interface for incoming transporter requests.
pub trait NodeProvider: Send + Sync {
    /// Processes a delivered message for the user. `NotFoundUserLocation`
    /// signals "not hosted here, re-locate".
    fn deliver(&self, cid: i64, uid: i64, message: Vec<u8>) -> LinkResult<()>;
    fn trigger(&self, event: i32, cid: i64, uid: i64) -> LinkResult<()>;
    fn get_state(&self) -> LinkResult<State>;
    fn set_state(&self, state: State) -> LinkResult<()>;
}

/// Decodes node requests and dispatches them to a provider.
pub struct NodeHandler<P> {
    provider: P,
    log: logging::Logger,
}

impl<P: NodeProvider> NodeHandler<P> {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(provider: P, log: L) -> NodeHandler<P> {
        let handler_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::discard(),
        };

        NodeHandler {
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

    fn reply(seq: u64, res: Vec<u8>) -> Dispatch {
        if seq == 0 {
            Dispatch::Silent
        } else {
            Dispatch::Reply(res)
        }
    }
}

impl<P: NodeProvider> Handler for NodeHandler<P> {
    fn handle(&self, frame: &[u8], route_byte: u8, seq: u64) -> Dispatch {
        match route_byte {
            route::DELIVER => {
                let code = match deliver::decode_deliver_req(frame) {
                    Ok((_, cid, uid, message)) => {
                        Self::code_of(&self.provider.deliver(cid, uid, message))
                    }
                    Err(_) => Code::InvalidArgument,
                };

                if code != Code::Ok {
                    logging::debug!(self.log, "deliver rejected"; "code" => code.to_u16());
                }

                Self::reply(seq, deliver::encode_deliver_res(seq, code))
            }
            route::TRIGGER => {
                let code = match trigger::decode_trigger_req(frame) {
                    Ok((_, event, cid, uid)) => {
                        Self::code_of(&self.provider.trigger(event, cid, uid))
                    }
                    Err(_) => Code::InvalidArgument,
                };

                Self::reply(seq, trigger::encode_trigger_res(seq, code))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Kind;
    use crate::transport::builder::BuilderOptions;
    use crate::transport::server::Server;
    use crate::transport::NodeBuilder;
    use std::sync::Mutex;

    struct RecordingProvider {
        hosted_uid: i64,
        delivered: Mutex<Vec<(i64, i64, Vec<u8>)>>,
        triggered: Mutex<Vec<(i32, i64, i64)>>,
        state: Mutex<State>,
    }

    impl RecordingProvider {
        fn new(hosted_uid: i64) -> RecordingProvider {
            RecordingProvider {
                hosted_uid,
                delivered: Mutex::new(Vec::new()),
                triggered: Mutex::new(Vec::new()),
                state: Mutex::new(State::Work),
            }
        }
    }

    impl NodeProvider for RecordingProvider {
        fn deliver(&self, cid: i64, uid: i64, message: Vec<u8>) -> LinkResult<()> {
            if uid != self.hosted_uid {
                return Err(LinkError::NotFoundUserLocation);
            }

            self.delivered.lock().unwrap().push((cid, uid, message));
            Ok(())
        }

        fn trigger(&self, event: i32, cid: i64, uid: i64) -> LinkResult<()> {
            self.triggered.lock().unwrap().push((event, cid, uid));
            Ok(())
        }

        fn get_state(&self) -> LinkResult<State> {
            Ok(*self.state.lock().unwrap())
        }

        fn set_state(&self, state: State) -> LinkResult<()> {
            *self.state.lock().unwrap() = state;
            Ok(())
        }
    }

    fn start_node(provider: RecordingProvider) -> Server {
        let handler = Arc::new(NodeHandler::new(provider, None));
        let server = Server::bind("127.0.0.1:0", handler, None).unwrap();
        server.start();
        server
    }

    fn node_client(server: &Server) -> Arc<NodeClient> {
        let builder: NodeBuilder =
            NodeBuilder::new(BuilderOptions::new("gate-test", Kind::Gate), None);
        builder.build(&server.listen_addr().to_string())
    }

    #[test]
    fn test_deliver_hosted_user() {
        let server = start_node(RecordingProvider::new(42));
        let client = node_client(&server);
        let ctx = Context::background();

        let retry = client.deliver(&ctx, 7, 42, b"payload").unwrap();

        assert!(!retry);

        server.stop();
    }

    #[test]
    fn test_deliver_foreign_user_asks_for_retry() {
        let server = start_node(RecordingProvider::new(42));
        let client = node_client(&server);
        let ctx = Context::background();

        let retry = client.deliver(&ctx, 7, 99, b"payload").unwrap();

        assert!(retry);

        server.stop();
    }

    #[test]
    fn test_trigger_roundtrip() {
        let server = start_node(RecordingProvider::new(42));
        let client = node_client(&server);
        let ctx = Context::background();

        client.trigger(&ctx, 9, 1, 42).unwrap();

        server.stop();
    }

    #[test]
    fn test_state_roundtrip() {
        let server = start_node(RecordingProvider::new(42));
        let client = node_client(&server);
        let ctx = Context::background();

        client.set_state(&ctx, State::Hang).unwrap();
        assert_eq!(client.get_state(&ctx).unwrap(), State::Hang);

        server.stop();
    }

    #[test]
    fn test_unknown_route_keeps_connection_alive() {
        let server = start_node(RecordingProvider::new(42));
        let client = node_client(&server);
        let ctx = Context::background();

        // A gate-only operation the node handler does not understand; the
        // server drops it without closing the connection.
        let frame = crate::transport::protocol::push::encode_push_req(
            0,
            crate::session::Kind::User,
            42,
            b"stray",
        );
        client.raw().send(&ctx, frame).unwrap();

        // The connection still serves calls afterwards.
        client.trigger(&ctx, 9, 1, 42).unwrap();

        server.stop();
    }
}
