//! Terminal dialog over stdin/stdout.

use agent_core::dialog::{Dialog, DialogSource, InboundMessage};
use agent_core::error::Result;
use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};

const PROMPT: &str = "> ";
const EXIT_COMMANDS: &[&str] = &["/exit", "/quit"];

/// One local user typing lines
pub struct CliDialog<R, W> {
    reader: R,
    writer: W,
    /// Reply text already printed while streaming
    streamed: String,
}

impl CliDialog<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> CliDialog<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            streamed: String::new(),
        }
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> Dialog for CliDialog<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        loop {
            self.write(PROMPT).await?;

            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if EXIT_COMMANDS.contains(&text) {
                return Ok(None);
            }
            return Ok(Some(InboundMessage::new(DialogSource::Cli, "local", text)));
        }
    }

    async fn deliver(&mut self, _to: &InboundMessage, text: &str) -> Result<()> {
        let shown = std::mem::take(&mut self.streamed);
        let text = text.trim_end();
        if shown.is_empty() {
            self.write(&format!("{}\n\n", text)).await
        } else if shown.trim_end().ends_with(text) {
            self.write("\n\n").await
        } else {
            self.write(&format!("\n{}\n\n", text)).await
        }
    }

    async fn deliver_partial(&mut self, _to: &InboundMessage, text: &str) -> Result<()> {
        self.streamed.push_str(text);
        self.write(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_lines_until_exit() {
        let input: &[u8] = b"hello\n\n  second  \n/exit\nignored\n";
        let mut dialog = CliDialog::new(input, Vec::new());

        let first = dialog.next_message().await.unwrap().unwrap();
        assert_eq!(first.text, "hello");
        assert_eq!(first.source, DialogSource::Cli);

        let second = dialog.next_message().await.unwrap().unwrap();
        assert_eq!(second.text, "second");

        assert!(dialog.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_closes_and_deliver_writes() {
        let input: &[u8] = b"";
        let mut dialog = CliDialog::new(input, Vec::new());
        assert!(dialog.next_message().await.unwrap().is_none());

        let to = InboundMessage::new(DialogSource::Cli, "local", "x");
        dialog.deliver(&to, "Hi\n").await.unwrap();
        assert_eq!(String::from_utf8(dialog.writer).unwrap(), "> Hi\n\n");
    }

    #[tokio::test]
    async fn test_streamed_reply_is_not_printed_twice() {
        let input: &[u8] = b"";
        let mut dialog = CliDialog::new(input, Vec::new());
        let to = InboundMessage::new(DialogSource::Cli, "local", "x");

        dialog.deliver_partial(&to, "Hel").await.unwrap();
        dialog.deliver_partial(&to, "lo").await.unwrap();
        dialog.deliver(&to, "Hello").await.unwrap();

        dialog.deliver_partial(&to, "Checking.").await.unwrap();
        dialog.deliver(&to, "[stopped]").await.unwrap();

        dialog.deliver(&to, "plain").await.unwrap();
        assert_eq!(
            String::from_utf8(dialog.writer).unwrap(),
            "Hello\n\nChecking.\n[stopped]\n\nplain\n\n"
        );
    }
}
