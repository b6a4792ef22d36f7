//! Transactional email delivery
//!
//! Sends the signup verification email over SMTP. Delivery failures are
//! logged and contained here; callers of the enclosing operation never see
//! them as faults.

use anyhow::{anyhow, Result};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, error};

use crate::config::SmtpConfig;

pub struct Mailer {
    config: SmtpConfig,
}

impl Mailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Send a verification email. Errors are logged here and swallowed.
    pub async fn send_verification(&self, recipient: &str, display_name: &str, link: &str) {
        if let Err(e) = self.try_send_verification(recipient, display_name, link).await {
            error!(recipient, error = %e, "Failed to send verification email");
        }
    }

    async fn try_send_verification(
        &self,
        recipient: &str,
        display_name: &str,
        link: &str,
    ) -> Result<()> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| anyhow!("Invalid from address: {}", e))?;
        let to: Mailbox = format!("{} <{}>", display_name, recipient)
            .parse()
            .map_err(|e| anyhow!("Invalid recipient address {}: {}", recipient, e))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject("Verify your email address")
            .header(ContentType::TEXT_PLAIN)
            .body(verification_body(display_name, link))
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
                .port(self.config.port);

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            transport_builder = transport_builder
                .credentials(Credentials::new(username.clone(), password.clone()));
        }

        let transport = transport_builder.build();
        transport
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email to {}: {}", recipient, e))?;

        debug!(recipient, "Verification email sent");
        Ok(())
    }
}

fn verification_body(display_name: &str, link: &str) -> String {
    format!(
        r#"Hi {},

Please verify your email address by opening the link below:

{}

If you did not create an account, you can ignore this message.
"#,
        display_name, link
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_body_contains_name_and_link() {
        let body = verification_body("Ada", "https://example.com/verify?t=abc");
        assert!(body.starts_with("Hi Ada,"));
        assert!(body.contains("https://example.com/verify?t=abc"));
    }

    #[tokio::test]
    async fn test_send_failure_is_contained() {
        let mailer = Mailer::new(SmtpConfig {
            host: "smtp.invalid".to_string(),
            port: 1,
            username: None,
            password: None,
            from_address: "noreply@example.com".to_string(),
        });
        // Must not panic or surface the failure
        mailer
            .send_verification("user@example.com", "User", "https://example.com/verify")
            .await;
    }
}
