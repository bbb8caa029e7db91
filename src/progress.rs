//! Progress reporting and operator confirmation
//!
//! Archivers report human-readable status lines and, when automation reaches
//! an ambiguous state, ask a yes/no question. Both travel over one channel
//! to a single consumer, which in the binary is the terminal.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::Service;

#[derive(Debug)]
pub enum ProgressEvent {
    /// Informational, non-blocking
    Status {
        service: Service,
        /// Display name, e.g. the archive.today mirror in use
        title: String,
        message: String,
    },
    /// A yes/no question; the producer waits for the answer
    Confirm(ConfirmationRequest),
}

#[derive(Debug)]
pub struct ConfirmationRequest {
    pub service: Service,
    pub title: String,
    pub message: String,
    pub default: bool,
    responder: Option<oneshot::Sender<bool>>,
}

impl ConfirmationRequest {
    /// Whether a producer is waiting for an answer.
    ///
    /// Unattended runs still emit requests, already resolved to the default.
    pub fn awaits_answer(&self) -> bool {
        self.responder.is_some()
    }

    pub fn answer(mut self, answer: bool) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(answer);
        }
    }
}

/// Producer side shared by all archivers of a run
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: mpsc::UnboundedSender<ProgressEvent>,
    interactive: bool,
}

impl ProgressChannel {
    pub fn new(interactive: bool) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                interactive,
            },
            receiver,
        )
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn reporter(&self, service: Service) -> ProgressReporter {
        ProgressReporter {
            service,
            title: Arc::new(Mutex::new(service.name().to_string())),
            channel: self.clone(),
        }
    }
}

/// Progress handle owned by one archiver
///
/// `confirm` only returns once answered, so an archiver never has more than
/// one question pending.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    service: Service,
    title: Arc<Mutex<String>>,
    channel: ProgressChannel,
}

impl ProgressReporter {
    pub fn service(&self) -> Service {
        self.service
    }

    /// Name shown for this service's events; starts as the service name.
    pub fn title(&self) -> String {
        match self.title.lock() {
            Ok(title) => title.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Show later events under `title`, e.g. once a mirror domain is known.
    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        match self.title.lock() {
            Ok(mut current) => *current = title,
            Err(poisoned) => *poisoned.into_inner() = title,
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        // The terminal consumer prints statuses itself
        debug!(service = %self.service, "{}", message);

        let _ = self.channel.sender.send(ProgressEvent::Status {
            service: self.service,
            title: self.title(),
            message,
        });
    }

    pub async fn confirm(&self, message: impl Into<String>, default: bool) -> bool {
        let message = message.into();

        if !self.channel.interactive {
            debug!(
                service = %self.service,
                "{} (unattended, answering {})",
                message,
                yes_no(default)
            );
            let _ = self.channel.sender.send(ProgressEvent::Confirm(ConfirmationRequest {
                service: self.service,
                title: self.title(),
                message,
                default,
                responder: None,
            }));
            return default;
        }

        let (responder, answer) = oneshot::channel();
        let request = ConfirmationRequest {
            service: self.service,
            title: self.title(),
            message,
            default,
            responder: Some(responder),
        };

        if self.channel.sender.send(ProgressEvent::Confirm(request)).is_err() {
            warn!(service = %self.service, "No progress consumer attached, using default answer");
            return default;
        }

        answer.await.unwrap_or(default)
    }
}

fn yes_no(answer: bool) -> &'static str {
    if answer {
        "yes"
    } else {
        "no"
    }
}

/// Interpret a terminal answer; anything unrecognised keeps the default.
pub fn parse_yes_no(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => true,
        "n" | "no" | "false" => false,
        _ => default,
    }
}

/// Consume progress events on the terminal until every producer is gone.
///
/// Status lines go to stderr. Questions are asked one at a time, reading the
/// answer with a blocking stdin read on the blocking pool.
pub async fn run_terminal(mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Status { title, message, .. } => {
                eprintln!("[{title}] {message}");
            }
            ProgressEvent::Confirm(request) if !request.awaits_answer() => {
                eprintln!(
                    "[{}] {} -> {}",
                    request.title,
                    request.message,
                    yes_no(request.default)
                );
            }
            ProgressEvent::Confirm(request) => {
                let hint = if request.default { "[Y/n]" } else { "[y/N]" };
                eprint!("[{}] {} {} ", request.title, request.message, hint);
                let _ = std::io::stderr().flush();

                let line = tokio::task::spawn_blocking(|| {
                    let mut line = String::new();
                    std::io::stdin().read_line(&mut line).map(|_| line)
                })
                .await;

                let answer = match line {
                    Ok(Ok(line)) => parse_yes_no(&line, request.default),
                    Ok(Err(e)) => {
                        warn!("Could not read answer from terminal: {}", e);
                        request.default
                    }
                    Err(e) => {
                        warn!("Terminal prompt task failed: {}", e);
                        request.default
                    }
                };
                request.answer(answer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_no() {
        assert!(parse_yes_no("y\n", false));
        assert!(parse_yes_no(" YES ", false));
        assert!(!parse_yes_no("n", true));
        assert!(!parse_yes_no("No\r\n", true));
        assert!(parse_yes_no("\n", true));
        assert!(!parse_yes_no("maybe", false));
    }

    #[tokio::test]
    async fn test_status_is_forwarded() {
        let (channel, mut events) = ProgressChannel::new(true);
        let reporter = channel.reporter(Service::ArchiveOrg);
        reporter.status("Submitting URL to archive.org");

        match events.recv().await {
            Some(ProgressEvent::Status {
                service,
                title,
                message,
            }) => {
                assert_eq!(service, Service::ArchiveOrg);
                assert_eq!(title, "archive.org");
                assert_eq!(message, "Submitting URL to archive.org");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_title_follows_set_title() {
        let (channel, mut events) = ProgressChannel::new(false);
        let reporter = channel.reporter(Service::ArchiveToday);
        let clone = reporter.clone();

        reporter.set_title("archive.ph");
        clone.status("Submitting URL to archive.ph");
        clone.confirm("Use the existing copy?", true).await;

        match events.recv().await {
            Some(ProgressEvent::Status { title, .. }) => assert_eq!(title, "archive.ph"),
            other => panic!("unexpected event: {other:?}"),
        }
        match events.recv().await {
            Some(ProgressEvent::Confirm(request)) => assert_eq!(request.title, "archive.ph"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_confirm_waits_for_answer() {
        let (channel, mut events) = ProgressChannel::new(true);
        let reporter = channel.reporter(Service::ArchiveToday);

        let consumer = tokio::spawn(async move {
            match events.recv().await {
                Some(ProgressEvent::Confirm(request)) => {
                    assert!(request.awaits_answer());
                    assert!(request.default);
                    request.answer(false);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        });

        assert!(!reporter.confirm("Use the existing copy?", true).await);
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_unattended_confirm_uses_default_and_is_audited() {
        let (channel, mut events) = ProgressChannel::new(false);
        let reporter = channel.reporter(Service::ArchiveToday);

        assert!(reporter.confirm("Use the existing copy?", true).await);
        assert!(!reporter.confirm("Retry?", false).await);

        match events.recv().await {
            Some(ProgressEvent::Confirm(request)) => {
                assert!(!request.awaits_answer());
                assert_eq!(request.message, "Use the existing copy?");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_request_falls_back_to_default() {
        let (channel, mut events) = ProgressChannel::new(true);
        let reporter = channel.reporter(Service::ArchiveOrg);

        let consumer = tokio::spawn(async move {
            if let Some(ProgressEvent::Confirm(request)) = events.recv().await {
                drop(request);
            }
        });

        assert!(reporter.confirm("Retry?", true).await);
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_falls_back_to_default() {
        let (channel, events) = ProgressChannel::new(true);
        drop(events);
        let reporter = channel.reporter(Service::ArchiveOrg);

        reporter.status("nobody listens");
        assert!(!reporter.confirm("Retry?", false).await);
    }
}
