//! IMAP login probe: greeting, capabilities, optional STARTTLS, LOGIN.

use async_trait::async_trait;

use super::session::{expect_line, Interrupted, LoginSession, SessionConnection};
use super::{Connector, ProbeConnection};
use crate::auth::Credentials;
use crate::config::ProbeConfig;
use crate::errors::RawProbeError;
use crate::protocol::imap::login_failure;
use crate::protocol::{ImapCapabilities, ImapCommand, ImapResponse, ImapStatus};
use crate::transport::LineTransport;
use crate::types::{ConnectionInfo, Protocol};

/// Opens IMAP login probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

impl Connector for ImapConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Imap
    }

    fn open(
        &self,
        credentials: &Credentials,
        info: &ConnectionInfo,
        config: &ProbeConfig,
    ) -> Box<dyn ProbeConnection> {
        Box::new(SessionConnection::spawn(ImapSession {
            credentials: credentials.clone(),
            info: info.clone(),
            config: config.clone(),
            transport: None,
            next_tag: 1,
        }))
    }
}

struct ImapSession {
    credentials: Credentials,
    info: ConnectionInfo,
    config: ProbeConfig,
    transport: Option<LineTransport>,
    next_tag: u32,
}

/// Tagged completion plus the untagged lines that preceded it.
struct Completion {
    status: ImapStatus,
    text: String,
    untagged: Vec<String>,
}

fn next_tag(counter: &mut u32) -> String {
    let tag = format!("A{}", counter);
    *counter += 1;
    tag
}

async fn run_command(
    transport: &mut LineTransport,
    tag: &str,
    command: ImapCommand<'_>,
) -> Result<Completion, Interrupted> {
    tracing::trace!(tag, command = ?command, "IMAP command");
    transport.write_line(&command.to_imap_string(tag)).await?;

    let mut untagged = Vec::new();
    loop {
        let line = expect_line(transport).await?;
        match ImapResponse::parse(&line)? {
            ImapResponse::Tagged { tag: t, status, text } if t == tag => {
                return Ok(Completion { status, text, untagged });
            }
            ImapResponse::Untagged {
                status: Some(ImapStatus::Bye),
                text,
            } => {
                return Err(RawProbeError::protocol(format!("server said BYE: {}", text)).into());
            }
            ImapResponse::Untagged { status: None, text } => untagged.push(text),
            _ => {}
        }
    }
}

async fn capabilities(
    transport: &mut LineTransport,
    counter: &mut u32,
) -> Result<ImapCapabilities, Interrupted> {
    let tag = next_tag(counter);
    let done = run_command(transport, &tag, ImapCommand::Capability).await?;
    if done.status != ImapStatus::Ok {
        return Err(RawProbeError::protocol(format!("CAPABILITY failed: {}", done.text)).into());
    }
    Ok(done
        .untagged
        .iter()
        .find_map(|line| ImapCapabilities::parse(line))
        .unwrap_or_default())
}

#[async_trait]
impl LoginSession for ImapSession {
    async fn login(&mut self) -> Result<(), Interrupted> {
        let transport = self
            .transport
            .insert(LineTransport::connect(&self.info, &self.config).await?);

        let greeting = expect_line(transport).await?;
        let mut caps = match ImapResponse::parse(&greeting)? {
            ImapResponse::Untagged {
                status: Some(ImapStatus::Ok),
                text,
            } => ImapCapabilities::parse(&text),
            ImapResponse::Untagged {
                status: Some(ImapStatus::Preauth),
                ..
            } => return Ok(()),
            ImapResponse::Untagged {
                status: Some(ImapStatus::Bye),
                text,
            } => return Err(RawProbeError::protocol(format!("server said BYE: {}", text)).into()),
            _ => return Err(RawProbeError::protocol(format!("unexpected greeting: {}", greeting)).into()),
        };

        if caps.is_none() {
            caps = Some(capabilities(transport, &mut self.next_tag).await?);
        }
        let mut caps = caps.unwrap_or_default();

        if self.info.wants_starttls() && caps.starttls {
            let tag = next_tag(&mut self.next_tag);
            let done = run_command(transport, &tag, ImapCommand::StartTls).await?;
            if done.status != ImapStatus::Ok {
                return Err(RawProbeError::Tls {
                    message: format!("STARTTLS refused: {}", done.text),
                }
                .into());
            }
            transport.upgrade_tls().await?;
            caps = capabilities(transport, &mut self.next_tag).await?;
        }

        if caps.login_disabled {
            return Err(RawProbeError::protocol("server refuses LOGIN on this connection").into());
        }

        tracing::debug!(server = %self.info.hostname, tls = transport.is_tls(), "IMAP logging in");
        let tag = next_tag(&mut self.next_tag);
        let done = run_command(transport, &tag, ImapCommand::Login(&self.credentials)).await?;
        match done.status {
            ImapStatus::Ok => Ok(()),
            status => Err(login_failure(status, &done.text).into()),
        }
    }

    async fn logout(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let tag = next_tag(&mut self.next_tag);
            if transport
                .write_line(&ImapCommand::Logout.to_imap_string(&tag))
                .await
                .is_ok()
            {
                let _ = transport.read_line().await;
            }
            transport.shutdown().await;
        }
    }
}
