use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
pub struct Sse {
    buf: String,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Read more data from the stream first.
            let mut has_more_data = false;
            if let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            {
                let Ok(s) = str::from_utf8(&bytes) else {
                    return Err(Error::InvalidPayload);
                };
                self.buf.push_str(s);
                has_more_data = true;
            }

            // There are data in the buffer, try to parse an event. If the data
            // is not enough to parse an event, we need to read more.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            // Abort if no more data available.
            if !has_more_data {
                return Ok(None);
            }
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        if self.buf.contains('\r') {
            self.buf = self.buf.replace("\r\n", "\n");
        }

        // Only `data` fields are collected, multiple of them joined by line
        // feeds. Comments and other fields are skipped.
        //
        // event         = *( comment / field ) end-of-line
        // comment       = colon *any-char end-of-line
        // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
        while let Some(eol_idx) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(0..eol_idx + 2).collect();
            let mut data = vec![];
            for line in block.lines().filter(|l| !l.is_empty()) {
                let Some((name, value)) = line.split_once(':') else {
                    return Err(Error::InvalidPayload);
                };
                if name == "data" {
                    data.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            if !data.is_empty() {
                return Ok(Some(data.join("\n")));
            }
        }
        Ok(None)
    }
}
