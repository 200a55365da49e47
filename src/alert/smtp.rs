//! Email alerts over a plain, authenticated SMTP session.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info};

use super::{AlertError, AlertEvent, AlertSink};
use crate::config::AppConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_LINE_LEN: usize = 76;

#[derive(Debug, Clone)]
pub struct EmailSink {
    host: String,
    port: u16,
    username: String,
    password: String,
    from: String,
    to: Vec<String>,
}

impl EmailSink {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.smtp.host.clone(),
            port: config.smtp.port_or_default(),
            username: config.smtp.username.clone(),
            password: config.smtp.password.clone(),
            from: config.mail.from.clone(),
            to: config.mail.recipients(),
        }
    }

    fn check_configured(&self) -> Result<(), AlertError> {
        if self.host.is_empty() {
            return Err(AlertError::NotConfigured("smtp.host is empty".into()));
        }
        if self.from.is_empty() {
            return Err(AlertError::NotConfigured("mail.from is empty".into()));
        }
        if self.to.is_empty() {
            return Err(AlertError::NotConfigured("mail.to is empty".into()));
        }
        Ok(())
    }

    fn connect(&self) -> Result<TcpStream, AlertError> {
        let mut last_err = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(IO_TIMEOUT))?;
                    stream.set_write_timeout(Some(IO_TIMEOUT))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| std::io::Error::other(format!("no address for {}", self.host)))
            .into())
    }
}

impl AlertSink for EmailSink {
    fn name(&self) -> &'static str {
        "email"
    }

    fn dispatch(&self, event: &AlertEvent) -> Result<(), AlertError> {
        self.check_configured()?;
        let stream = self.connect()?;
        let mut session = Session::new(stream)?;

        session.expect_greeting()?;
        session.command("EHLO localhost", "EHLO", Expect::Completion)?;
        if !self.username.is_empty() {
            let token = STANDARD.encode(format!("\0{}\0{}", self.username, self.password));
            session.command(&format!("AUTH PLAIN {}", token), "AUTH PLAIN", Expect::Completion)?;
        }
        session.command(&format!("MAIL FROM:<{}>", self.from), "MAIL FROM", Expect::Completion)?;
        for rcpt in &self.to {
            session.command(&format!("RCPT TO:<{}>", rcpt), "RCPT TO", Expect::Completion)?;
        }
        session.command("DATA", "DATA", Expect::StartInput)?;
        session.send_data(&render_message(&self.from, &self.to, event))?;
        // The message is accepted at this point.
        if let Err(e) = session.command("QUIT", "QUIT", Expect::Completion) {
            debug!("smtp QUIT failed: {}", e);
        }

        info!(host = %self.host, recipients = self.to.len(), "alert mail submitted");
        Ok(())
    }
}

/// MIME message with Base64 subject and HTML body.
pub fn render_message(from: &str, to: &[String], event: &AlertEvent) -> String {
    let headers = [
        ("From", from.to_string()),
        ("To", to.join(", ")),
        ("Subject", format!("=?UTF-8?B?{}?=", STANDARD.encode(&event.subject))),
        ("MIME-Version", "1.0".to_string()),
        ("Content-Type", "text/html; charset=UTF-8".to_string()),
        ("Content-Transfer-Encoding", "base64".to_string()),
    ];

    let mut message = String::new();
    for (name, value) in headers {
        message.push_str(&format!("{}: {}\r\n", name, value));
    }
    message.push_str("\r\n");

    let body = STANDARD.encode(&event.body);
    for chunk in body.as_bytes().chunks(BODY_LINE_LEN) {
        // Base64 output is ASCII, so chunking on bytes keeps valid UTF-8.
        message.push_str(&String::from_utf8_lossy(chunk));
        message.push_str("\r\n");
    }
    message
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Session {
    fn new(stream: TcpStream) -> Result<Self, AlertError> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn expect_greeting(&mut self) -> Result<(), AlertError> {
        let (code, message) = self.read_reply()?;
        check("greeting", Expect::Completion, code, message)
    }

    /// Sends one command line; `label` names it in errors so credentials
    /// never end up in logs.
    fn command(&mut self, line: &str, label: &str, expect: Expect) -> Result<(), AlertError> {
        debug!(command = label, "smtp >");
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;
        let (code, message) = self.read_reply()?;
        check(label, expect, code, message)
    }

    fn send_data(&mut self, message: &str) -> Result<(), AlertError> {
        for line in message.lines() {
            if line.starts_with('.') {
                self.writer.write_all(b".")?;
            }
            self.writer.write_all(line.as_bytes())?;
            self.writer.write_all(b"\r\n")?;
        }
        self.writer.write_all(b".\r\n")?;
        self.writer.flush()?;
        let (code, message) = self.read_reply()?;
        check("message body", Expect::Completion, code, message)
    }

    fn read_reply(&mut self) -> Result<(u16, String), AlertError> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(AlertError::Protocol("connection closed".into()));
            }
            let line = line.trim_end();
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| AlertError::Protocol(line.to_string()))?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());
            if !more {
                return Ok((code, lines.join(" ")));
            }
        }
    }
}

/// Reply a command must get before the session moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Any 2xx.
    Completion,
    /// 354, the go-ahead for the message body after DATA.
    StartInput,
}

fn check(command: &str, expect: Expect, code: u16, message: String) -> Result<(), AlertError> {
    let accepted = match expect {
        Expect::Completion => (200..300).contains(&code),
        Expect::StartInput => code == 354,
    };
    if accepted {
        Ok(())
    } else {
        Err(AlertError::Rejected {
            command: command.to_string(),
            code,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MailConfig, SmtpConfig};
    use std::net::TcpListener;
    use std::thread;

    /// Accepts one connection, answers every command with the reply returned
    /// by `respond` and records what the client sent.
    fn fake_server(
        respond: fn(&str) -> &'static str,
    ) -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut seen = Vec::new();
            let mut in_data = false;
            writer.write_all(b"220 fake ESMTP\r\n").unwrap();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                seen.push(line.clone());
                if in_data {
                    if line == "." {
                        in_data = false;
                        writer.write_all(b"250 queued\r\n").unwrap();
                    }
                    continue;
                }
                let reply = respond(&line);
                writer.write_all(reply.as_bytes()).unwrap();
                if line == "DATA" && reply.starts_with("354") {
                    in_data = true;
                }
                if line == "QUIT" || !reply.starts_with(['2', '3']) {
                    break;
                }
            }
            seen
        });
        (port, handle)
    }

    fn accepting(line: &str) -> &'static str {
        match line.split_whitespace().next().unwrap_or_default() {
            "EHLO" => "250-fake\r\n250 AUTH PLAIN LOGIN\r\n",
            "AUTH" => "235 2.7.0 accepted\r\n",
            "DATA" => "354 go ahead\r\n",
            "QUIT" => "221 bye\r\n",
            _ => "250 ok\r\n",
        }
    }

    fn rejecting_auth(line: &str) -> &'static str {
        if line.starts_with("AUTH") {
            "535 5.7.8 bad credentials\r\n"
        } else {
            accepting(line)
        }
    }

    fn challenging_auth(line: &str) -> &'static str {
        if line.starts_with("AUTH") {
            "334 \r\n"
        } else {
            accepting(line)
        }
    }

    fn config_for(port: u16) -> AppConfig {
        AppConfig {
            smtp: SmtpConfig {
                host: "127.0.0.1".into(),
                port: port.to_string(),
                username: "alerts".into(),
                password: "pw".into(),
            },
            mail: MailConfig {
                from: "alerts@example.com".into(),
                to: "ops@example.com,noc@example.com".into(),
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn message_headers_and_encoded_parts() {
        let event = AlertEvent::network_exception("10.0.0.1");
        let message = render_message("a@example.com", &["b@example.com".to_string()], &event);

        assert!(message.starts_with("From: a@example.com\r\nTo: b@example.com\r\n"));
        let subject = format!("Subject: =?UTF-8?B?{}?=\r\n", STANDARD.encode(&event.subject));
        assert!(message.contains(&subject));
        assert!(message.contains("Content-Type: text/html; charset=UTF-8\r\n"));
        assert!(message.contains("Content-Transfer-Encoding: base64\r\n\r\n"));

        let body_lines: Vec<&str> = message.split("\r\n\r\n").nth(1).unwrap().lines().collect();
        assert!(body_lines.iter().all(|l| l.len() <= BODY_LINE_LEN));
        assert_eq!(STANDARD.decode(body_lines.concat()).unwrap(), event.body.as_bytes());
    }

    #[test]
    fn submits_mail_through_smtp_session() {
        let (port, server) = fake_server(accepting);
        let sink = EmailSink::from_config(&config_for(port));

        sink.dispatch(&AlertEvent::network_exception("10.0.0.1")).unwrap();

        let seen = server.join().unwrap();
        let expected_auth = format!("AUTH PLAIN {}", STANDARD.encode("\0alerts\0pw"));
        assert_eq!(seen[0], "EHLO localhost");
        assert_eq!(seen[1], expected_auth);
        assert_eq!(seen[2], "MAIL FROM:<alerts@example.com>");
        assert_eq!(seen[3], "RCPT TO:<ops@example.com>");
        assert_eq!(seen[4], "RCPT TO:<noc@example.com>");
        assert_eq!(seen[5], "DATA");
        assert!(seen.iter().any(|l| l == "To: ops@example.com, noc@example.com"));
        assert_eq!(seen.last().map(String::as_str), Some("QUIT"));
    }

    #[test]
    fn rejected_auth_is_reported() {
        let (port, server) = fake_server(rejecting_auth);
        let sink = EmailSink::from_config(&config_for(port));

        let err = sink.dispatch(&AlertEvent::network_exception("10.0.0.1")).unwrap_err();
        assert!(
            matches!(&err, AlertError::Rejected { code: 535, command, .. } if command == "AUTH PLAIN"),
            "{err}"
        );
        server.join().unwrap();
    }

    #[test]
    fn auth_challenge_is_not_success() {
        let (port, server) = fake_server(challenging_auth);
        let sink = EmailSink::from_config(&config_for(port));

        let err = sink.dispatch(&AlertEvent::network_exception("10.0.0.1")).unwrap_err();
        assert!(
            matches!(&err, AlertError::Rejected { code: 334, command, .. } if command == "AUTH PLAIN"),
            "{err}"
        );
        let seen = server.join().unwrap();
        assert!(!seen.iter().any(|l| l.starts_with("MAIL FROM")));
    }

    #[test]
    fn reply_expectations() {
        assert!(check("EHLO", Expect::Completion, 250, String::new()).is_ok());
        assert!(check("AUTH PLAIN", Expect::Completion, 334, String::new()).is_err());
        assert!(check("DATA", Expect::StartInput, 354, String::new()).is_ok());
        assert!(check("DATA", Expect::StartInput, 250, String::new()).is_err());
        assert!(check("MAIL FROM", Expect::Completion, 354, String::new()).is_err());
    }

    #[test]
    fn missing_settings_fail_without_network() {
        let sink = EmailSink::from_config(&AppConfig::default());
        let err = sink.dispatch(&AlertEvent::network_exception("10.0.0.1")).unwrap_err();
        assert!(matches!(err, AlertError::NotConfigured(_)));
    }
}
