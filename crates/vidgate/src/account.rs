//! Interactive login and logout.
//!
//! The client owns the login state machine. vidgate only forwards what the
//! user submits and reports the state the client is in.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use vidgate_protocol::{AuthorizationState, Command, Event, TdlibParameters};

use crate::build_info;
use crate::correlator::{CorrelateError, CorrelationKey, Cursor, Timeout};
use crate::session::{Session, SessionError, SessionRegistry};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Correlate(#[from] CorrelateError),
}

#[derive(Clone)]
pub struct Authenticator {
    api_id: i32,
    api_hash: String,
    state_timeout: Duration,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        api_id: i32,
        api_hash: impl Into<String>,
        state_timeout: Duration,
    ) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            state_timeout,
        }
    }

    /// Configure the client instance for a fresh session.
    pub async fn start(&self, session: &Session) -> Result<(), AuthError> {
        let data_dir = session.data_dir();
        let parameters = TdlibParameters::new(
            self.api_id,
            self.api_hash.clone(),
            data_dir.join("db").display().to_string(),
            data_dir.join("files").display().to_string(),
            build_info::VERSION,
        );

        session.send(Command::GetAuthorizationState).await?;
        session
            .send(Command::SetTdlibParameters(Box::new(parameters)))
            .await?;
        info!(session_id = %session.id(), "Login started");
        Ok(())
    }

    pub async fn submit_phone_number(
        &self,
        session: &Session,
        phone_number: impl Into<String>,
    ) -> Result<(), AuthError> {
        session
            .send(Command::SetAuthenticationPhoneNumber {
                phone_number: phone_number.into(),
            })
            .await?;
        debug!(session_id = %session.id(), "Phone number submitted");
        Ok(())
    }

    pub async fn submit_code(&self, session: &Session, code: impl Into<String>) -> Result<(), AuthError> {
        session
            .send(Command::CheckAuthenticationCode { code: code.into() })
            .await?;
        debug!(session_id = %session.id(), "Login code submitted");
        Ok(())
    }

    pub async fn submit_password(
        &self,
        session: &Session,
        password: impl Into<String>,
    ) -> Result<(), AuthError> {
        session
            .send(Command::CheckAuthenticationPassword {
                password: password.into(),
            })
            .await?;
        debug!(session_id = %session.id(), "Password submitted");
        Ok(())
    }

    /// Current authorization state.
    ///
    /// With `wait_for`, blocks until the client reaches that state. Such waits
    /// depend on a human entering a code and only end on a match or when the
    /// session closes.
    pub async fn state(&self, session: &Session, wait_for: Option<&str>) -> Result<String, AuthError> {
        let mut cursor = Cursor::anchor(session, CorrelationKey::Authorization);
        session.send(Command::GetAuthorizationState).await?;

        let timeout = match wait_for {
            Some(_) => Timeout::Indefinite,
            None => Timeout::After(self.state_timeout),
        };
        let state = cursor
            .wait_for(timeout, |event| match event {
                Event::AuthorizationState(AuthorizationState { state })
                    if wait_for.is_none_or(|wanted| wanted == state.as_str()) =>
                {
                    Some(state.clone())
                }
                _ => None,
            })
            .await?;
        Ok(state)
    }

    /// Log out, release the client, and drop the session with its directory.
    pub async fn logout(&self, sessions: &SessionRegistry, session: &Session) -> Result<(), AuthError> {
        let mut cursor = Cursor::anchor(session, CorrelationKey::Authorization);
        session.send(Command::LogOut).await?;

        let closed = cursor
            .wait_for(Timeout::After(self.state_timeout), |event| match event {
                Event::AuthorizationState(state) if state.is_closed() => Some(()),
                _ => None,
            })
            .await;
        match closed {
            Ok(()) | Err(CorrelateError::SessionClosed(_)) => {}
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = session.send(Command::Close).await {
            debug!(session_id = %session.id(), error = %e, "Close after logout not delivered");
        }
        if !sessions.close(session.id()).await? {
            warn!(session_id = %session.id(), "Logged out session was not registered");
        }
        info!(session_id = %session.id(), "Logged out");
        Ok(())
    }
}
