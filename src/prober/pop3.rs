//! POP3 login probe: greeting, optional STLS, USER/PASS.

use async_trait::async_trait;

use super::session::{expect_line, Interrupted, LoginSession, SessionConnection};
use super::{Connector, ProbeConnection};
use crate::auth::Credentials;
use crate::config::ProbeConfig;
use crate::errors::RawProbeError;
use crate::protocol::pop3::is_terminator;
use crate::protocol::{Pop3Command, Pop3Response};
use crate::transport::LineTransport;
use crate::types::{ConnectionInfo, Protocol};

/// Opens POP3 login probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pop3Connector;

impl Connector for Pop3Connector {
    fn protocol(&self) -> Protocol {
        Protocol::Pop3
    }

    fn open(
        &self,
        credentials: &Credentials,
        info: &ConnectionInfo,
        config: &ProbeConfig,
    ) -> Box<dyn ProbeConnection> {
        Box::new(SessionConnection::spawn(Pop3Session {
            credentials: credentials.clone(),
            info: info.clone(),
            config: config.clone(),
            transport: None,
        }))
    }
}

struct Pop3Session {
    credentials: Credentials,
    info: ConnectionInfo,
    config: ProbeConfig,
    transport: Option<LineTransport>,
}

async fn read_status(transport: &mut LineTransport) -> Result<Pop3Response, Interrupted> {
    let line = expect_line(transport).await?;
    Ok(Pop3Response::parse(&line)?)
}

async fn send(transport: &mut LineTransport, command: Pop3Command<'_>) -> Result<Pop3Response, Interrupted> {
    tracing::trace!(command = ?command, "POP3 command");
    transport.write_line(&command.to_pop3_string()).await?;
    read_status(transport).await
}

/// Returns true if CAPA lists STLS. Servers without CAPA have no STLS either.
async fn offers_stls(transport: &mut LineTransport) -> Result<bool, Interrupted> {
    if !send(transport, Pop3Command::Capa).await?.ok {
        return Ok(false);
    }
    let mut stls = false;
    loop {
        let line = expect_line(transport).await?;
        if is_terminator(&line) {
            return Ok(stls);
        }
        stls |= line.trim().eq_ignore_ascii_case("STLS");
    }
}

#[async_trait]
impl LoginSession for Pop3Session {
    async fn login(&mut self) -> Result<(), Interrupted> {
        let transport = self
            .transport
            .insert(LineTransport::connect(&self.info, &self.config).await?);

        let greeting = read_status(transport).await?;
        if !greeting.ok {
            return Err(RawProbeError::protocol(format!("server refused session: {}", greeting.text)).into());
        }

        if self.info.wants_starttls() && offers_stls(transport).await? {
            let reply = send(transport, Pop3Command::Stls).await?;
            if !reply.ok {
                return Err(RawProbeError::Tls {
                    message: format!("STLS refused: {}", reply.text),
                }
                .into());
            }
            transport.upgrade_tls().await?;
        }

        tracing::debug!(server = %self.info.hostname, tls = transport.is_tls(), "POP3 logging in");
        let reply = send(transport, Pop3Command::User(&self.credentials)).await?;
        if !reply.ok {
            return Err(reply.to_auth_error().into());
        }

        let reply = send(transport, Pop3Command::Pass(&self.credentials)).await?;
        if reply.ok {
            Ok(())
        } else {
            Err(reply.to_auth_error().into())
        }
    }

    async fn logout(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if transport.write_line(&Pop3Command::Quit.to_pop3_string()).await.is_ok() {
                let _ = transport.read_line().await;
            }
            transport.shutdown().await;
        }
    }
}
