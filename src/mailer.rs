use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType, transport::smtp::authentication::Credentials,
};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::RequestStatus;

/// Email
///
/// A plain-text transactional message.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mailer
///
/// Outbound email. Handlers build an [`Email`] with one of the template functions below
/// and hand it to the mailer held in `AppState`.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> AppResult<()>;
}

pub type MailerState = Arc<dyn Mailer>;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Local mail catcher, no TLS and no auth.
    Plain,
    /// TLS from the first byte (SMTPS, port 465).
    ImplicitTls,
    /// Plain connect upgraded with STARTTLS (submission, port 587 and the rest).
    StartTls,
}

impl SmtpSecurity {
    pub const SMTPS_PORT: u16 = 465;

    pub fn for_config(config: &AppConfig) -> Self {
        if config.smtp_username.is_empty() {
            SmtpSecurity::Plain
        } else if config.smtp_port == Self::SMTPS_PORT {
            SmtpSecurity::ImplicitTls
        } else {
            SmtpSecurity::StartTls
        }
    }
}

/// SmtpMailer
///
/// `lettre` async SMTP transport. The TLS mode follows the configured port, see
/// [`SmtpSecurity`].
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let tls_error = |e: lettre::transport::smtp::Error| AppError::internal(format!("failed to create SMTP transport: {e}"));
        let creds = || Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let transport = match SmtpSecurity::for_config(config) {
            SmtpSecurity::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                    .port(config.smtp_port)
                    .build()
            }
            SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(tls_error)?
                .credentials(creds())
                .port(config.smtp_port)
                .build(),
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                    .map_err(tls_error)?
                    .credentials(creds())
                    .port(config.smtp_port)
                    .build()
            }
        };
        tracing::debug!(host = %config.smtp_host, port = config.smtp_port, "smtp transport ready");

        Ok(Self {
            transport,
            from: config.mail_from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> AppResult<()> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| AppError::internal(format!("invalid from address: {e}")))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|e| AppError::bad_request(format!("invalid recipient address: {e}")))?)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| AppError::internal(format!("failed to build email: {e}")))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| AppError::Upstream(format!("smtp send failed: {e}")))
    }
}

/// MockMailer
///
/// Records every message instead of sending it.
#[derive(Clone, Default)]
pub struct MockMailer {
    sent: Arc<Mutex<Vec<Email>>>,
    pub should_fail: bool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: Email) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Upstream("mock mailer failure".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email);
        }
        Ok(())
    }
}

/// Sends `email` and logs a failure instead of returning it. For notifications whose
/// delivery must not decide the outcome of the request.
pub async fn send_best_effort(mailer: &MailerState, email: Email) {
    let to = email.to.clone();
    if let Err(e) = mailer.send(email).await {
        tracing::warn!(recipient = %to, error = %e, "email delivery failed");
    }
}

// --- Templates ---

pub fn welcome_email(to: &str, name: &str, client_url: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Welcome to Skill-Up".to_string(),
        body: format!(
            "Hi {name},\n\nYour Skill-Up account is ready. Browse the catalog at {client_url}/courses \
             and start learning today.\n\nThe Skill-Up team"
        ),
    }
}

pub fn password_reset_email(to: &str, name: &str, client_url: &str, token: &str, ttl_minutes: i64) -> Email {
    Email {
        to: to.to_string(),
        subject: "Reset your Skill-Up password".to_string(),
        body: format!(
            "Hi {name},\n\nWe received a request to reset your password. Use the link below \
             within {ttl_minutes} minutes:\n\n{client_url}/reset-password?token={token}\n\n\
             If you did not ask for this, you can ignore this email.\n\nThe Skill-Up team"
        ),
    }
}

pub fn instructor_decision_email(to: &str, name: &str, status: RequestStatus, feedback: Option<&str>) -> Email {
    let (subject, verdict) = match status {
        RequestStatus::Approved => (
            "Your instructor application was approved",
            "Congratulations, your instructor application was approved. You can now create courses.",
        ),
        _ => (
            "Your instructor application was not approved",
            "Unfortunately your instructor application was not approved this time.",
        ),
    };
    let notes = feedback
        .map(|f| format!("\n\nReviewer notes:\n{f}"))
        .unwrap_or_default();
    Email {
        to: to.to_string(),
        subject: subject.to_string(),
        body: format!("Hi {name},\n\n{verdict}{notes}\n\nThe Skill-Up team"),
    }
}

pub fn feedback_reply_email(to: &str, name: &str, subject: &str, reply: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("Re: {subject}"),
        body: format!("Hi {name},\n\n{reply}\n\nThe Skill-Up team"),
    }
}
