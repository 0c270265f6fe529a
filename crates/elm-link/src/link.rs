//! Transaction layer: one command in, one prompt-terminated reply out.
//!
//! Every transaction writes `command\r` and then races "read until `>`"
//! against a timer. Callers queue on a fair mutex, so at most one
//! transaction is on the wire and they run in arrival order.
//!
//! A timed-out command may still be running on the adapter. The next
//! transaction first interrupts it with a bare `\r` and throws away
//! everything up to the adapter going quiet, so a late reply is never
//! mistaken for the answer to a newer command.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use elm_protocol::RawResponse;
use elm_protocol::types::{COMMAND_TERMINATOR, PROMPT};

use crate::error::{LinkError, LinkResult};
use crate::transport::{Notification, Transport};

/// Quiet period that ends a resync.
const RESYNC_QUIET: Duration = Duration::from_millis(200);

/// Prompts read at most while resyncing before giving up for this round.
const RESYNC_MAX_PROMPTS: usize = 4;

/// Receiving half of the link, guarded by the transaction mutex.
struct Inbox {
    rx: mpsc::Receiver<Notification>,
    /// Set when a transaction timed out and its reply has not been seen.
    desynced: bool,
}

/// Request/response pairing over a [`Transport`].
pub struct AdapterLink {
    transport: Arc<dyn Transport>,
    /// Held for the whole transaction; tokio's mutex is FIFO.
    inbox: Mutex<Inbox>,
}

impl AdapterLink {
    pub fn new(transport: Arc<dyn Transport>, notifications: mpsc::Receiver<Notification>) -> Self {
        Self {
            transport,
            inbox: Mutex::new(Inbox {
                rx: notifications,
                desynced: false,
            }),
        }
    }

    /// Send `command` and wait up to `timeout` for the prompt.
    ///
    /// Bytes left over from an earlier transaction are discarded before
    /// writing. After a timeout the adapter is interrupted and drained
    /// first. Transport errors are returned as they came and never
    /// retried here.
    pub async fn send_command(&self, command: &str, timeout: Duration) -> LinkResult<RawResponse> {
        validate(command, timeout)?;

        let mut inbox = self.inbox.lock().await;
        if drain_stale(&mut inbox.rx)? {
            inbox.desynced = false;
        }
        if inbox.desynced {
            self.resync(&mut inbox).await?;
        }

        let started = Instant::now();
        self.transport
            .write(format!("{command}{COMMAND_TERMINATOR}").as_bytes())
            .await?;

        let reply = match tokio::time::timeout(timeout, read_until_prompt(&mut inbox.rx)).await {
            Ok(reply) => reply?,
            Err(_) => {
                inbox.desynced = true;
                tracing::debug!(command = %command, timeout_ms = timeout.as_millis() as u64, "no prompt");
                return Err(LinkError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let response = RawResponse::from_reply(command, &reply).with_elapsed(started.elapsed());
        tracing::debug!(
            command = %command,
            elapsed_ms = response.elapsed.as_millis() as u64,
            reply = %response.text(),
            "transaction complete"
        );
        Ok(response)
    }

    /// Interrupt whatever the adapter is still doing and discard its
    /// output. A busy ELM327 aborts on any received byte and answers
    /// `STOPPED`; an idle one repeats its last command. Either way the
    /// output ends with a prompt, so reading stops once prompts stop
    /// coming. Without any prompt the link stays desynced and the next
    /// transaction tries again.
    async fn resync(&self, inbox: &mut Inbox) -> LinkResult<()> {
        self.transport.write(COMMAND_TERMINATOR.as_bytes()).await?;

        let mut prompts = 0;
        while prompts < RESYNC_MAX_PROMPTS {
            match tokio::time::timeout(RESYNC_QUIET, read_until_prompt(&mut inbox.rx)).await {
                Ok(reply) => {
                    let reply = reply?;
                    tracing::debug!(data = %reply.trim(), "discarded while resyncing");
                    prompts += 1;
                }
                Err(_) => break,
            }
        }

        inbox.desynced = prompts == 0;
        if inbox.desynced {
            tracing::warn!("adapter did not answer the resync interrupt");
        } else {
            tracing::debug!(prompts, "adapter resynced");
        }
        Ok(())
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> LinkResult<()> {
        // Wait for the transaction in flight, if any.
        let _inbox = self.inbox.lock().await;
        self.transport.close().await
    }
}

fn validate(command: &str, timeout: Duration) -> LinkResult<()> {
    if command.is_empty() {
        return Err(LinkError::InvalidCommand("empty command".into()));
    }
    if !command.is_ascii() {
        return Err(LinkError::InvalidCommand(format!("{command:?} is not ASCII")));
    }
    if command.contains(['\r', '\n', char::from(PROMPT)]) {
        return Err(LinkError::InvalidCommand(format!(
            "{command:?} contains a terminator or prompt"
        )));
    }
    if timeout.is_zero() {
        return Err(LinkError::InvalidCommand("timeout must be positive".into()));
    }
    Ok(())
}

/// Throw away whatever arrived since the last transaction finished.
/// Returns whether a prompt was among it, meaning the adapter is idle.
fn drain_stale(rx: &mut mpsc::Receiver<Notification>) -> LinkResult<bool> {
    let mut prompt = false;
    loop {
        match rx.try_recv() {
            Ok(Ok(bytes)) => {
                prompt |= bytes.contains(&PROMPT);
                tracing::debug!(
                    bytes = bytes.len(),
                    data = %String::from_utf8_lossy(&bytes),
                    "discarding late reply"
                );
            }
            Ok(Err(e)) => return Err(e),
            Err(mpsc::error::TryRecvError::Empty) => return Ok(prompt),
            Err(mpsc::error::TryRecvError::Disconnected) => return Err(LinkError::Closed),
        }
    }
}

/// Collect chunks until the prompt. Anything after the prompt in the same
/// chunk belongs to nobody and is dropped.
async fn read_until_prompt(rx: &mut mpsc::Receiver<Notification>) -> LinkResult<String> {
    let mut buf = Vec::new();
    loop {
        let chunk = rx.recv().await.ok_or(LinkError::Closed)??;
        buf.extend_from_slice(&chunk);
        if let Some(end) = buf.iter().position(|b| *b == PROMPT) {
            buf.truncate(end + 1);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdapter, Reply};

    const TIMEOUT: Duration = Duration::from_millis(1000);

    fn link_to(mock: &Arc<MockAdapter>, rx: mpsc::Receiver<Notification>) -> AdapterLink {
        AdapterLink::new(mock.clone(), rx)
    }

    #[tokio::test]
    async fn reply_lines_without_echo_or_prompt() {
        let (mock, rx) = MockAdapter::new();
        mock.reply("010C", "41 0C 1A F8");
        let link = link_to(&mock, rx);

        let raw = link.send_command("010C", TIMEOUT).await.unwrap();
        assert_eq!(raw.command, "010C");
        assert_eq!(raw.lines, vec!["41 0C 1A F8"]);
        assert_eq!(mock.sent(), vec!["010C"]);
    }

    #[tokio::test]
    async fn reply_split_across_chunks() {
        let (mock, rx) = MockAdapter::new();
        mock.silent("ATRV");
        let link = link_to(&mock, rx);

        let pending = link.send_command("ATRV", TIMEOUT);
        let feed = async {
            mock.inject(Ok(b"12.".to_vec())).await;
            mock.inject(Ok(b"4V\r".to_vec())).await;
            mock.inject(Ok(b"\r>".to_vec())).await;
        };
        let (raw, ()) = tokio::join!(pending, feed);
        assert_eq!(raw.unwrap().lines, vec!["12.4V"]);
    }

    #[tokio::test]
    async fn invalid_commands_are_rejected_before_writing() {
        let (mock, rx) = MockAdapter::new();
        let link = link_to(&mock, rx);

        for bad in ["", "01 0C\r", "AT>", "ATZ\n", "01é"] {
            assert!(
                matches!(
                    link.send_command(bad, TIMEOUT).await,
                    Err(LinkError::InvalidCommand(_))
                ),
                "{bad:?} accepted"
            );
        }
        assert!(matches!(
            link.send_command("ATZ", Duration::ZERO).await,
            Err(LinkError::InvalidCommand(_))
        ));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_adapter_times_out() {
        let (mock, rx) = MockAdapter::new();
        mock.silent("0100");
        let link = link_to(&mock, rx);

        let started = Instant::now();
        let err = link.send_command("0100", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { timeout_ms: 1000 }));
        assert!(started.elapsed() >= TIMEOUT);
        assert!(started.elapsed() < TIMEOUT + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_never_reaches_the_next_caller() {
        let (mock, rx) = MockAdapter::new();
        mock.script("0100", Reply::delayed(Duration::from_millis(3000), "41 00 BE 1F A8 13"));
        mock.reply("010D", "41 0D 3C");
        mock.reply("0105", "41 05 7B");
        let link = link_to(&mock, rx);

        let err = link.send_command("0100", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }));

        let speed = link.send_command("010D", TIMEOUT).await.unwrap();
        assert_eq!(speed.lines, vec!["41 0D 3C"]);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        let coolant = link.send_command("0105", TIMEOUT).await.unwrap();
        assert_eq!(coolant.lines, vec!["41 05 7B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_landing_after_next_write_is_not_taken() {
        let (mock, rx) = MockAdapter::new();
        mock.script("ATRV", Reply::delayed(Duration::from_millis(2500), "12.6V"));
        mock.script("ATI", Reply::delayed(Duration::from_millis(1000), "ELM327 v1.5"));
        let link = link_to(&mock, rx);

        let err = link
            .send_command("ATRV", Duration::from_millis(2000))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Timeout { timeout_ms: 2000 }));

        let identity = link
            .send_command("ATI", Duration::from_millis(2000))
            .await
            .unwrap();
        assert_eq!(identity.lines, vec!["ELM327 v1.5"]);
        assert_eq!(mock.interrupts(), 1);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        mock.reply("010D", "41 0D 3C");
        let speed = link.send_command("010D", TIMEOUT).await.unwrap();
        assert_eq!(speed.lines, vec!["41 0D 3C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stray_prompt_during_resync_is_discarded() {
        let (mock, rx) = MockAdapter::new();
        mock.silent("0100");
        mock.reply("010D", "41 0D 3C");
        let link = link_to(&mock, rx);

        assert!(link.send_command("0100", TIMEOUT).await.is_err());

        let next = link.send_command("010D", TIMEOUT);
        let late = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            mock.inject(Ok(b"41 00 BE 1F A8 13\r\r>".to_vec())).await;
        };
        let (speed, ()) = tokio::join!(next, late);
        assert_eq!(speed.unwrap().lines, vec!["41 0D 3C"]);
        assert_eq!(mock.sent(), vec!["0100", "010D"]);
    }

    #[tokio::test]
    async fn no_resync_without_a_timeout() {
        let (mock, rx) = MockAdapter::new();
        mock.reply("010D", "41 0D 3C");
        let link = link_to(&mock, rx);

        for _ in 0..3 {
            link.send_command("010D", TIMEOUT).await.unwrap();
        }
        assert_eq!(mock.interrupts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transactions_are_serialized_in_order() {
        let (mock, rx) = MockAdapter::new();
        mock.script("0105", Reply::delayed(Duration::from_millis(200), "41 05 7B"));
        mock.reply("010D", "41 0D 3C");
        let link = Arc::new(link_to(&mock, rx));

        let first = {
            let link = link.clone();
            tokio::spawn(async move { link.send_command("0105", TIMEOUT).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let link = link.clone();
            tokio::spawn(async move { link.send_command("010D", TIMEOUT).await })
        };

        assert_eq!(first.await.unwrap().unwrap().lines, vec!["41 05 7B"]);
        assert_eq!(second.await.unwrap().unwrap().lines, vec!["41 0D 3C"]);
        assert_eq!(mock.sent(), vec!["0105", "010D"]);
    }

    #[tokio::test]
    async fn transport_errors_propagate_without_retry() {
        let (mock, rx) = MockAdapter::new();
        mock.fail_next_write("socket reset");
        let link = link_to(&mock, rx);

        let err = link.send_command("ATZ", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, LinkError::Transport(m) if m == "socket reset"));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn closed_stream_is_reported() {
        let (mock, rx) = MockAdapter::new();
        let link = link_to(&mock, rx);

        mock.inject(Err(LinkError::Closed)).await;
        assert!(matches!(
            link.send_command("ATZ", TIMEOUT).await,
            Err(LinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_returned_as_is() {
        let (mock, rx) = MockAdapter::new();
        mock.reply("010C", "41 0C Z!");
        let link = link_to(&mock, rx);
        assert_eq!(link.send_command("010C", TIMEOUT).await.unwrap().lines, vec!["41 0C Z!"]);
    }
}
