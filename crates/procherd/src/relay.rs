//! Line-tagging relay from a child's stdout/stderr to a shared sink.
//!
//! Each line is written as `[<tags>,process_name=<name>] <line>`. A relay
//! signals completion once its source reaches EOF or fails, so owners can
//! wait for the final drain of a process generation.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};

/// Longest line emitted in one piece. Longer lines are split at this bound.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Shared destination for relayed output. Cloning shares the destination.
#[derive(Clone)]
pub struct Sink {
	target: Arc<Mutex<SinkTarget>>,
}

enum SinkTarget {
	Stdout(tokio::io::Stdout),
	Stderr(tokio::io::Stderr),
	Memory(Vec<u8>),
}

impl Sink {
	pub fn stdout() -> Self {
		Self::from_target(SinkTarget::Stdout(tokio::io::stdout()))
	}

	pub fn stderr() -> Self {
		Self::from_target(SinkTarget::Stderr(tokio::io::stderr()))
	}

	/// In-memory sink, readable with [`contents`](Self::contents).
	pub fn memory() -> Self {
		Self::from_target(SinkTarget::Memory(Vec::new()))
	}

	fn from_target(target: SinkTarget) -> Self {
		Self {
			target: Arc::new(Mutex::new(target)),
		}
	}

	/// Writes one tagged line. The whole line goes out under one lock so
	/// relays sharing a sink never interleave within a line.
	pub async fn write_line(&self, prefix: &str, line: &[u8]) -> io::Result<()> {
		let mut buf = Vec::with_capacity(prefix.len() + line.len() + 4);
		buf.push(b'[');
		buf.extend_from_slice(prefix.as_bytes());
		buf.extend_from_slice(b"] ");
		buf.extend_from_slice(line);
		buf.push(b'\n');

		let mut target = self.target.lock().await;
		match &mut *target {
			SinkTarget::Stdout(out) => {
				out.write_all(&buf).await?;
				out.flush().await
			}
			SinkTarget::Stderr(err) => {
				err.write_all(&buf).await?;
				err.flush().await
			}
			SinkTarget::Memory(mem) => {
				mem.extend_from_slice(&buf);
				Ok(())
			}
		}
	}

	/// Bytes captured by a memory sink. Empty for stdout/stderr sinks.
	pub async fn contents(&self) -> Vec<u8> {
		match &*self.target.lock().await {
			SinkTarget::Memory(mem) => mem.clone(),
			_ => Vec::new(),
		}
	}
}

impl std::fmt::Debug for Sink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("Sink")
	}
}

/// Ordered `key=value` metadata prepended to every relayed line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayTags {
	pairs: Vec<(String, String)>,
}

impl RelayTags {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.pairs.push((key.into(), value.into()));
		self
	}

	/// Resolves each `(key, env_var)` from the environment; unset variables
	/// become empty values.
	pub fn from_env<K: AsRef<str>, V: AsRef<str>>(mapping: &[(K, V)]) -> Self {
		let pairs = mapping
			.iter()
			.map(|(key, var)| {
				let value = std::env::var(var.as_ref()).unwrap_or_default();
				(key.as_ref().to_string(), value)
			})
			.collect();
		Self { pairs }
	}

	pub fn prefix(&self, process: &str) -> String {
		let mut prefix = String::new();
		for (key, value) in &self.pairs {
			prefix.push_str(key);
			prefix.push('=');
			prefix.push_str(value);
			prefix.push(',');
		}
		prefix.push_str("process_name=");
		prefix.push_str(process);
		prefix
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Stdout,
	Stderr,
}

/// A running relay for one stream of one process generation.
#[derive(Debug)]
pub struct OutputRelay {
	stream: Stream,
	done: watch::Receiver<bool>,
}

impl OutputRelay {
	pub fn spawn<R>(source: R, sink: Sink, prefix: String, stream: Stream) -> Self
	where
		R: AsyncRead + Send + Unpin + 'static,
	{
		let (done_tx, done) = watch::channel(false);
		tokio::spawn(async move {
			relay_lines(source, &sink, &prefix).await;
			let _ = done_tx.send(true);
		});
		Self { stream, done }
	}

	pub fn stream(&self) -> Stream {
		self.stream
	}

	pub fn is_done(&self) -> bool {
		*self.done.borrow()
	}

	/// Resolves once the source is exhausted and every line has been written.
	pub async fn wait(&self) {
		let mut done = self.done.clone();
		let _ = done.wait_for(|d| *d).await;
	}
}

async fn relay_lines<R>(source: R, sink: &Sink, prefix: &str)
where
	R: AsyncRead + Unpin,
{
	let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, source);
	let mut line = Vec::with_capacity(READ_BUFFER_SIZE);
	let mut sink_failed = false;

	loop {
		line.clear();
		let read = (&mut reader)
			.take(MAX_LINE_BYTES as u64)
			.read_until(b'\n', &mut line)
			.await;

		match read {
			Ok(0) => break,
			Ok(_) => {
				if sink_failed {
					// keep draining so the child never blocks on a full pipe
					continue;
				}
				if let Err(e) = sink.write_line(prefix, trim_line_end(&line)).await {
					tracing::warn!(prefix, error = %e, "output sink write failed, discarding further output");
					sink_failed = true;
				}
			}
			Err(e) => {
				tracing::warn!(prefix, error = %e, "output relay read failed");
				break;
			}
		}
	}
}

fn trim_line_end(line: &[u8]) -> &[u8] {
	let line = line.strip_suffix(b"\n").unwrap_or(line);
	line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prefix_format() {
		let tags = RelayTags::new().with("playground_id", "p1").with("docker_id", "d9");
		assert_eq!(tags.prefix("vnc"), "playground_id=p1,docker_id=d9,process_name=vnc");
		assert_eq!(RelayTags::new().prefix("vnc"), "process_name=vnc");
	}

	#[test]
	fn tags_from_env_fill_missing_with_empty() {
		let tags = RelayTags::from_env(&[("missing", "PROCHERD_SURELY_UNSET_VAR")]);
		assert_eq!(tags.prefix("x"), "missing=,process_name=x");
	}

	#[tokio::test]
	async fn relays_tagged_lines_and_signals_done() {
		let sink = Sink::memory();
		let source: &'static [u8] = b"one\r\ntwo\n\nlast-without-newline";
		let relay = OutputRelay::spawn(source, sink.clone(), "process_name=web".into(), Stream::Stdout);
		relay.wait().await;
		assert!(relay.is_done());
		assert_eq!(relay.stream(), Stream::Stdout);

		let text = String::from_utf8(sink.contents().await).unwrap();
		assert_eq!(
			text,
			"[process_name=web] one\n[process_name=web] two\n[process_name=web] \n[process_name=web] last-without-newline\n"
		);
	}

	#[tokio::test]
	async fn long_lines_are_split_not_dropped() {
		let sink = Sink::memory();
		let mut data = vec![b'x'; MAX_LINE_BYTES + 10];
		data.push(b'\n');
		let relay = OutputRelay::spawn(std::io::Cursor::new(data), sink.clone(), "p".into(), Stream::Stderr);
		relay.wait().await;

		let out = sink.contents().await;
		let lines: Vec<&[u8]> = out.split(|b| *b == b'\n').filter(|l| !l.is_empty()).collect();
		assert_eq!(lines.len(), 2);
		assert_eq!(lines[0].len(), "[p] ".len() + MAX_LINE_BYTES);
		assert_eq!(lines[1].len(), "[p] ".len() + 10);
	}

	#[tokio::test]
	async fn stdio_sinks_report_no_contents() {
		assert!(Sink::stdout().contents().await.is_empty());
	}
}
