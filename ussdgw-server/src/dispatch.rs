//! Command dispatch.
//!
//! Maps each decoded frame to a handler, enforcing the per-connection state
//! machine. The caller processes frames strictly in arrival order and awaits
//! each dispatch to completion before the next, so a connection's outbound
//! frames always leave in the order the causing frames arrived.
//!
//! Commands that are unknown, or known but illegal in the current state, are
//! logged and ignored; the connection continues. A malformed body closes the
//! connection. Neither outcome ever reaches another connection.

use crate::auth::CredentialValidator;
use crate::error::ServerError;
use crate::gateway::{AppRequest, ApplicationGateway};
use crate::session::{ConnectionState, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use ussdgw_protocol::pdu::{self, BindTransmitter, BindTransmitterResp, CommandId, DeliverSm, SubmitSm};
use ussdgw_protocol::Frame;

/// Turns inbound frames into responses and application calls.
///
/// Shared read-only across connections; all per-connection state lives in
/// the [`Session`] passed into each call.
pub struct Dispatcher {
    credentials: Arc<dyn CredentialValidator>,
    gateway: Arc<dyn ApplicationGateway>,
    server_system_id: String,
}

impl Dispatcher {
    pub fn new(
        credentials: Arc<dyn CredentialValidator>,
        gateway: Arc<dyn ApplicationGateway>,
        server_system_id: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            gateway,
            server_system_id: server_system_id.into(),
        }
    }

    /// Handles one frame, writing at most one outbound frame.
    ///
    /// `peer_closed` is raised by the read side when the socket is gone; a
    /// gateway call that completes after that point must not write.
    pub async fn dispatch<W>(
        &self,
        session: &mut Session,
        frame: Frame,
        writer: &mut W,
        peer_closed: &AtomicBool,
    ) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        session.record_frame();

        match CommandId::from_raw(frame.header.command_id) {
            Some(CommandId::BindTransmitter) => self.handle_bind(session, &frame, writer).await,
            Some(CommandId::SubmitSm) => {
                self.handle_submit(session, &frame, writer, peer_closed).await
            }
            Some(CommandId::UnbindResp) => {
                self.handle_unbind_resp(session);
                Ok(())
            }
            Some(other) => {
                tracing::warn!(
                    "[{}] ignoring {:?} (state {:?})",
                    session.remote_addr,
                    other,
                    session.state()
                );
                Ok(())
            }
            None => {
                tracing::warn!(
                    "[{}] unhandled command_id: {:#010x}",
                    session.remote_addr,
                    frame.header.command_id
                );
                Ok(())
            }
        }
    }

    async fn handle_bind<W>(
        &self,
        session: &mut Session,
        frame: &Frame,
        writer: &mut W,
    ) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if session.state() != ConnectionState::Unbound {
            tracing::warn!(
                "[{}] bind in state {:?} ignored",
                session.remote_addr,
                session.state()
            );
            return Ok(());
        }

        let bind = BindTransmitter::decode(&frame.body)?;
        if self.credentials.validate(&bind.system_id, &bind.password) {
            let resp = BindTransmitterResp {
                system_id: self.server_system_id.clone(),
            };
            writer
                .write_all(&resp.encode(frame.header.sequence_number))
                .await?;
            tracing::info!(
                "[{}] bound successfully with system_id: {}",
                session.remote_addr,
                bind.system_id
            );
            session.bind(bind.system_id);
        } else {
            tracing::warn!(
                "[{}] bind failed: invalid credentials for system_id '{}'",
                session.remote_addr,
                bind.system_id
            );
            session.close();
        }
        Ok(())
    }

    async fn handle_submit<W>(
        &self,
        session: &mut Session,
        frame: &Frame,
        writer: &mut W,
        peer_closed: &AtomicBool,
    ) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if session.state() != ConnectionState::Bound {
            tracing::warn!(
                "[{}] submit in state {:?} ignored",
                session.remote_addr,
                session.state()
            );
            return Ok(());
        }

        let submit = SubmitSm::decode(&frame.body)?;
        tracing::info!(
            "[{}] received from msisdn: {}, input: {}",
            session.remote_addr,
            submit.source_addr,
            submit.short_message
        );

        if !session.has_app_session() {
            let app_session_id = session.app_session_id().to_string();
            tracing::info!(
                "[{}] new application session: {}",
                session.remote_addr,
                app_session_id
            );
        }

        let request = AppRequest {
            msisdn: submit.source_addr,
            input: submit.short_message,
            session_id: session.app_session_id().to_string(),
        };
        let reply = self.gateway.query(&request).await;
        tracing::debug!(
            "[{}] application reply: {:?} (end_session={})",
            session.remote_addr,
            reply.message,
            reply.end_session
        );

        // The peer may have vanished while the call was in flight.
        if peer_closed.load(Ordering::Acquire) {
            session.close();
            return Ok(());
        }

        if reply.end_session {
            writer
                .write_all(&pdu::encode_unbind(frame.header.sequence_number))
                .await?;
            session.set_state(ConnectionState::AwaitingUnbindAck);
            tracing::info!(
                "[{}] application ended session, unbind sent",
                session.remote_addr
            );
        } else {
            let deliver = DeliverSm {
                short_message: reply.message,
            };
            writer
                .write_all(&deliver.encode(frame.header.sequence_number))
                .await?;
        }
        Ok(())
    }

    fn handle_unbind_resp(&self, session: &mut Session) {
        if session.state() == ConnectionState::AwaitingUnbindAck {
            tracing::info!(
                "[{}] received unbind_resp, closing connection",
                session.remote_addr
            );
            session.close();
        } else {
            tracing::warn!(
                "[{}] unbind_resp in state {:?} ignored",
                session.remote_addr,
                session.state()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use crate::gateway::AppReply;
    use async_trait::async_trait;
    use bytes::BytesMut;
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;
    use ussdgw_protocol::frame::{FrameReader, PduHeader};

    /// Gateway returning scripted replies and recording what it saw.
    struct ScriptedGateway {
        replies: Mutex<VecDeque<AppReply>>,
        seen: Mutex<Vec<AppRequest>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<AppReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<AppRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ApplicationGateway for ScriptedGateway {
        async fn query(&self, request: &AppRequest) -> AppReply {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(AppReply::fallback)
        }
    }

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    fn dispatcher(gateway: Arc<ScriptedGateway>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(StaticCredentials::new("test", "test123")),
            gateway,
            "server",
        )
    }

    /// Runs encoded bytes through a FrameReader to get the Frame back.
    fn as_frame(bytes: BytesMut) -> Frame {
        let mut reader = FrameReader::new();
        reader.append(&bytes).unwrap();
        reader.next_frame().unwrap().unwrap()
    }

    fn parse_written(out: &[u8]) -> Vec<Frame> {
        let mut reader = FrameReader::new();
        reader.append(out).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn bind_frame(system_id: &str, password: &str, seq: u32) -> Frame {
        as_frame(
            BindTransmitter {
                system_id: system_id.to_string(),
                password: password.to_string(),
            }
            .encode(seq),
        )
    }

    fn submit_frame(input: &str, seq: u32) -> Frame {
        as_frame(
            SubmitSm {
                source_addr: "233541234567".to_string(),
                destination_addr: "*124#".to_string(),
                short_message: input.to_string(),
            }
            .encode(seq),
        )
    }

    fn reply(message: &str, end_session: bool) -> AppReply {
        AppReply {
            message: message.to_string(),
            end_session,
        }
    }

    #[tokio::test]
    async fn test_bind_with_valid_credentials() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(&mut session, bind_frame("test", "test123", 1), &mut out, &peer_closed)
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Bound);
        assert_eq!(session.bound_system_id(), Some("test"));

        let frames = parse_written(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.command_id, CommandId::BindTransmitterResp.raw());
        assert_eq!(frames[0].header.command_status, 0);
        assert_eq!(frames[0].header.sequence_number, 1);
        let resp = BindTransmitterResp::decode(&frames[0].body).unwrap();
        assert_eq!(resp.system_id, "server");
    }

    #[tokio::test]
    async fn test_bind_with_invalid_credentials() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(&mut session, bind_frame("test", "wrong", 1), &mut out, &peer_closed)
            .await
            .unwrap();

        assert!(session.is_closed());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_bind_while_bound_is_ignored() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        session.bind("test");
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(&mut session, bind_frame("test", "test123", 2), &mut out, &peer_closed)
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Bound);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_submit_yields_deliver() {
        let gateway = Arc::new(ScriptedGateway::new(vec![reply("Hello", false)]));
        let dispatcher = dispatcher(gateway.clone());
        let mut session = Session::new(test_addr());
        session.bind("test");
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(&mut session, submit_frame("1", 7), &mut out, &peer_closed)
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Bound);

        let frames = parse_written(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.command_id, CommandId::DeliverSm.raw());
        assert_eq!(frames[0].header.sequence_number, 7);
        let deliver = DeliverSm::decode(&frames[0].body).unwrap();
        assert_eq!(deliver.short_message, "Hello");

        let seen = gateway.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].msisdn, "233541234567");
        assert_eq!(seen[0].input, "1");
        assert!(!seen[0].session_id.is_empty());
    }

    #[tokio::test]
    async fn test_submit_with_end_session_yields_unbind() {
        let gateway = Arc::new(ScriptedGateway::new(vec![reply("Bye", true)]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        session.bind("test");
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(&mut session, submit_frame("9", 3), &mut out, &peer_closed)
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::AwaitingUnbindAck);

        let frames = parse_written(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.command_id, CommandId::Unbind.raw());
        assert_eq!(frames[0].header.sequence_number, 3);
        assert!(frames[0].body.is_empty());

        // the acknowledgment completes the teardown
        dispatcher
            .dispatch(
                &mut session,
                as_frame(pdu::encode_unbind_resp(3)),
                &mut out,
                &peer_closed,
            )
            .await
            .unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_submit_while_unbound_is_ignored() {
        let gateway = Arc::new(ScriptedGateway::new(vec![reply("Hello", false)]));
        let dispatcher = dispatcher(gateway.clone());
        let mut session = Session::new(test_addr());
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(&mut session, submit_frame("1", 1), &mut out, &peer_closed)
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Unbound);
        assert!(out.is_empty());
        assert!(gateway.seen().is_empty());
    }

    #[tokio::test]
    async fn test_unbind_resp_without_unbind_is_ignored() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        session.bind("test");
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(
                &mut session,
                as_frame(pdu::encode_unbind_resp(4)),
                &mut out,
                &peer_closed,
            )
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Bound);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_id_is_ignored() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        session.bind("test");
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        let mut raw = BytesMut::new();
        PduHeader::for_body(0x0000_0015, 0, 8, 0).encode(&mut raw);
        dispatcher
            .dispatch(&mut session, as_frame(raw), &mut out, &peer_closed)
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Bound);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_bind_body_is_an_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        let mut raw = BytesMut::new();
        PduHeader::for_body(CommandId::BindTransmitter.raw(), 0, 1, 4).encode(&mut raw);
        raw.extend_from_slice(b"test"); // no NUL terminators

        let result = dispatcher
            .dispatch(&mut session, as_frame(raw), &mut out, &peer_closed)
            .await;
        assert!(matches!(result, Err(ServerError::Protocol(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_session_id_stable_across_submits() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            reply("One", false),
            reply("Two", false),
        ]));
        let dispatcher = dispatcher(gateway.clone());
        let mut session = Session::new(test_addr());
        session.bind("test");
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(false);

        dispatcher
            .dispatch(&mut session, submit_frame("1", 1), &mut out, &peer_closed)
            .await
            .unwrap();
        dispatcher
            .dispatch(&mut session, submit_frame("2", 2), &mut out, &peer_closed)
            .await
            .unwrap();

        let seen = gateway.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].session_id, seen[1].session_id);
    }

    #[tokio::test]
    async fn test_session_ids_differ_between_connections() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            reply("One", false),
            reply("Two", false),
        ]));
        let dispatcher = dispatcher(gateway.clone());
        let peer_closed = AtomicBool::new(false);

        let mut first = Session::new(test_addr());
        first.bind("test");
        let mut out = Vec::new();
        dispatcher
            .dispatch(&mut first, submit_frame("1", 1), &mut out, &peer_closed)
            .await
            .unwrap();

        let mut second = Session::new(test_addr());
        second.bind("test");
        dispatcher
            .dispatch(&mut second, submit_frame("1", 1), &mut out, &peer_closed)
            .await
            .unwrap();

        let seen = gateway.seen();
        assert_ne!(seen[0].session_id, seen[1].session_id);
    }

    #[tokio::test]
    async fn test_no_write_after_peer_closed() {
        let gateway = Arc::new(ScriptedGateway::new(vec![reply("Hello", false)]));
        let dispatcher = dispatcher(gateway);
        let mut session = Session::new(test_addr());
        session.bind("test");
        let mut out = Vec::new();
        let peer_closed = AtomicBool::new(true);

        dispatcher
            .dispatch(&mut session, submit_frame("1", 1), &mut out, &peer_closed)
            .await
            .unwrap();

        assert!(session.is_closed());
        assert!(out.is_empty());
    }
}
