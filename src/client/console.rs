use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Callback;
use super::Client;
use super::ReplyWait;
use crate::constants::CONSOLE_PROMPT_SUFFIX;
use crate::Error;
use crate::Message;
use crate::Request;
use crate::Result;

#[derive(Debug, Default)]
struct ConsoleState {
    lines: Vec<String>,
    last_print: String,
}

/// Accumulates console output between prompts.
///
/// The server streams everything it prints on the console channel. A chunk
/// ending in the prompt closes the current print; whatever accumulated
/// before it becomes the last console print.
#[derive(Debug, Default)]
pub(crate) struct ConsoleCapture {
    state: parking_lot::Mutex<ConsoleState>,
}

impl ConsoleCapture {
    pub(crate) fn callback(self: &Arc<Self>) -> Callback {
        let capture = self.clone();
        Callback::inline(move |msg: Message| capture.on_output(&msg))
    }

    pub(crate) fn on_output(
        &self,
        msg: &Message,
    ) {
        let chunk = String::from_utf8_lossy(&msg.body).trim_end_matches('\0').to_string();
        let mut state = self.state.lock();
        if chunk.ends_with(CONSOLE_PROMPT_SUFFIX) {
            state.last_print = state.lines.concat();
            state.lines.clear();
        } else {
            state.lines.push(chunk);
        }
    }

    pub(crate) fn last_print(&self) -> String {
        self.state.lock().last_print.clone()
    }
}

impl Client {
    /// Runs `command` on the server console and waits for it to finish.
    ///
    /// Returns the reply together with the console output the command
    /// produced. Only [`Client::shutdown`] or a lost connection ends the
    /// wait early.
    pub async fn run(
        &self,
        command: &str,
    ) -> Result<(Message, String)> {
        self.run_cancellable(command, self.inner.shutdown.clone()).await
    }

    /// Like [`Client::run`], but gives up with [`Error::Cancelled`] once
    /// `cancel` fires. The command keeps running on the server; see
    /// [`Client::abort`].
    pub async fn run_cancellable(
        &self,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<(Message, String)> {
        debug!(%command, "run");
        let reply = self
            .request(Request::console(command, true), None, ReplyWait::Indefinite(cancel))
            .await?
            .ok_or(Error::Cancelled)?;
        Ok((reply, self.inner.console.last_print()))
    }

    /// Runs `command` without waiting. `callback` is invoked with the reply
    /// and the console output once the command finishes.
    pub async fn run_with_callback(
        &self,
        command: &str,
        callback: impl Fn(Message, String) + Send + Sync + 'static,
    ) -> Result<()> {
        let console = self.inner.console.clone();
        let on_reply = Callback::new(move |msg: Message| callback(msg, console.last_print()));
        self.request(Request::console(command, true), Some(on_reply), ReplyWait::NoWait)
            .await?;
        Ok(())
    }

    /// Runs `command` with no reply expected.
    pub async fn run_detached(
        &self,
        command: &str,
    ) -> Result<()> {
        self.request(Request::console(command, false), None, ReplyWait::NoWait)
            .await?;
        Ok(())
    }

    /// Aborts whatever the server console is executing.
    pub async fn abort(&self) -> Result<()> {
        self.request(Request::new(crate::Command::Abort), None, ReplyWait::NoWait)
            .await?;
        Ok(())
    }

    /// Output of the last completed console print.
    pub fn last_console_print(&self) -> String {
        self.inner.console.last_print()
    }
}
