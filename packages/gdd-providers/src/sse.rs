//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks can end anywhere, including inside a UTF-8 sequence, so bytes are buffered and
//! only complete lines are decoded.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
	pub event: Option<String>,
	pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
	buffer: Vec<u8>,
	event: Option<String>,
	data: Vec<String>,
}

impl SseDecoder {
	pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
		self.buffer.extend_from_slice(bytes);

		let mut events = Vec::new();

		while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
			let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();

			line.pop();

			if line.last() == Some(&b'\r') {
				line.pop();
			}

			let line = String::from_utf8_lossy(&line).into_owned();

			if let Some(event) = self.process_line(&line) {
				events.push(event);
			}
		}

		events
	}

	/// Flushes a trailing event when the stream ends without a blank line.
	pub fn finish(&mut self) -> Option<SseEvent> {
		if !self.buffer.is_empty() {
			let rest = std::mem::take(&mut self.buffer);
			let line = String::from_utf8_lossy(&rest).into_owned();
			let line = line.trim_end_matches('\r');

			if let Some(event) = self.process_line(line) {
				return Some(event);
			}
		}

		self.dispatch()
	}

	fn process_line(&mut self, line: &str) -> Option<SseEvent> {
		if line.is_empty() {
			return self.dispatch();
		}
		if line.starts_with(':') {
			return None;
		}

		let (field, value) = match line.split_once(':') {
			Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
			None => (line, ""),
		};

		match field {
			"event" => self.event = Some(value.to_string()),
			"data" => self.data.push(value.to_string()),
			_ => {},
		}

		None
	}

	fn dispatch(&mut self) -> Option<SseEvent> {
		if self.data.is_empty() {
			self.event = None;

			return None;
		}

		let data = self.data.join("\n");

		self.data.clear();

		Some(SseEvent { event: self.event.take(), data })
	}
}
