//! SMTP login probe: greeting, EHLO, optional STARTTLS, AUTH.

use async_trait::async_trait;

use super::session::{expect_line, Interrupted, LoginSession, SessionConnection};
use super::{Connector, ProbeConnection};
use crate::auth::{AuthMethod, Authenticator, Credentials};
use crate::config::ProbeConfig;
use crate::errors::RawProbeError;
use crate::protocol::smtp::codes;
use crate::protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::LineTransport;
use crate::types::{ConnectionInfo, Protocol};

/// Opens SMTP login probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpConnector;

impl Connector for SmtpConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Smtp
    }

    fn open(
        &self,
        credentials: &Credentials,
        info: &ConnectionInfo,
        config: &ProbeConfig,
    ) -> Box<dyn ProbeConnection> {
        Box::new(SessionConnection::spawn(SmtpSession {
            credentials: credentials.clone(),
            info: info.clone(),
            config: config.clone(),
            transport: None,
        }))
    }
}

struct SmtpSession {
    credentials: Credentials,
    info: ConnectionInfo,
    config: ProbeConfig,
    transport: Option<LineTransport>,
}

/// Reads a complete, possibly multiline, reply.
async fn read_reply(transport: &mut LineTransport) -> Result<SmtpResponse, Interrupted> {
    let mut lines = Vec::new();
    loop {
        let line = expect_line(transport).await?;
        let more = SmtpResponse::is_continuation(&line);
        lines.push(line);
        if !more {
            break;
        }
    }
    let response = SmtpResponse::parse(&lines)?;
    tracing::trace!(code = response.code, message = %response.first_message(), "SMTP reply");
    Ok(response)
}

async fn send(transport: &mut LineTransport, command: &SmtpCommand) -> Result<SmtpResponse, Interrupted> {
    tracing::trace!(command = %command, "SMTP command");
    transport.write_line(&command.to_smtp_string()).await?;
    read_reply(transport).await
}

async fn ehlo(transport: &mut LineTransport, client_id: &str) -> Result<EsmtpCapabilities, Interrupted> {
    let reply = send(transport, &SmtpCommand::Ehlo(client_id.to_string())).await?;
    if !reply.is_success() {
        return Err(RawProbeError::protocol(format!("EHLO rejected: {}", reply)).into());
    }
    Ok(EsmtpCapabilities::from_ehlo_response(&reply))
}

/// Expects a 334 challenge, returning its text.
fn expect_challenge(reply: &SmtpResponse) -> Result<String, Interrupted> {
    if reply.code == codes::AUTH_CONTINUE {
        Ok(reply.first_message().to_string())
    } else {
        Err(reply.to_auth_error().into())
    }
}

async fn authenticate(
    transport: &mut LineTransport,
    method: AuthMethod,
    credentials: &Credentials,
) -> Result<(), Interrupted> {
    let reply = match method {
        AuthMethod::Plain => {
            let initial = Authenticator::plain_initial_response(credentials);
            send(
                transport,
                &SmtpCommand::Auth {
                    mechanism: method,
                    initial_response: Some(initial),
                },
            )
            .await?
        }
        AuthMethod::Login => {
            let reply = send(transport, &SmtpCommand::Auth { mechanism: method, initial_response: None }).await?;
            expect_challenge(&reply)?;
            let reply = send(
                transport,
                &SmtpCommand::AuthContinue(Authenticator::login_username(credentials)),
            )
            .await?;
            expect_challenge(&reply)?;
            send(
                transport,
                &SmtpCommand::AuthContinue(Authenticator::login_password(credentials)),
            )
            .await?
        }
        AuthMethod::CramMd5 => {
            let reply = send(transport, &SmtpCommand::Auth { mechanism: method, initial_response: None }).await?;
            let challenge = expect_challenge(&reply)?;
            let response = Authenticator::cram_md5_response(&challenge, credentials)?;
            send(transport, &SmtpCommand::AuthContinue(response)).await?
        }
    };

    if reply.code == codes::AUTH_SUCCESS {
        Ok(())
    } else {
        Err(reply.to_auth_error().into())
    }
}

#[async_trait]
impl LoginSession for SmtpSession {
    async fn login(&mut self) -> Result<(), Interrupted> {
        let transport = self
            .transport
            .insert(LineTransport::connect(&self.info, &self.config).await?);

        let greeting = read_reply(transport).await?;
        if greeting.code != codes::SERVICE_READY {
            return Err(RawProbeError::protocol(format!("unexpected greeting: {}", greeting)).into());
        }

        let mut caps = ehlo(transport, &self.config.client_id).await?;

        if self.info.wants_starttls() && caps.starttls {
            let reply = send(transport, &SmtpCommand::StartTls).await?;
            if reply.code != codes::SERVICE_READY {
                return Err(RawProbeError::Tls {
                    message: format!("STARTTLS refused: {}", reply),
                }
                .into());
            }
            transport.upgrade_tls().await?;
            caps = ehlo(transport, &self.config.client_id).await?;
        }

        let method = Authenticator::select_best_method(&caps.auth_mechanisms)?;
        tracing::debug!(server = %self.info.hostname, mechanism = %method, tls = transport.is_tls(), "SMTP authenticating");
        authenticate(transport, method, &self.credentials).await
    }

    async fn logout(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if transport.write_line(&SmtpCommand::Quit.to_smtp_string()).await.is_ok() {
                let _ = transport.read_line().await;
            }
            transport.shutdown().await;
        }
    }
}
