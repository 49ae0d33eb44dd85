use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::io;

/// A finite, single-use byte stream carrying a database dump.
///
/// Not `Clone`: the producer hands it to exactly one consumer,
/// which takes the inner stream with [`DumpStream::into_inner`].
pub struct DumpStream {
    inner: BoxStream<'static, io::Result<Bytes>>,
    content_length: Option<u64>,
}

impl DumpStream {
    pub fn new<S>(stream: S, content_length: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            content_length,
        }
    }

    /// Single-chunk stream, mostly useful for tests and small in-memory dumps.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self::new(stream::once(async move { Ok(data) }), Some(len))
    }

    /// Length advertised by the producer, if it knew one up front.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn into_inner(self) -> BoxStream<'static, io::Result<Bytes>> {
        self.inner
    }
}

impl fmt::Debug for DumpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let chunks = vec![Ok(Bytes::from_static(b"CREATE ")), Ok(Bytes::from_static(b"TABLE"))];
        let dump = DumpStream::new(stream::iter(chunks), None);
        assert_eq!(dump.content_length(), None);

        let collected: Vec<Bytes> = dump
            .into_inner()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(collected.concat(), b"CREATE TABLE");
    }

    #[tokio::test]
    async fn test_from_bytes_reports_length() {
        let dump = DumpStream::from_bytes("abc");
        assert_eq!(dump.content_length(), Some(3));
        let mut inner = dump.into_inner();
        assert_eq!(inner.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(inner.next().await.is_none());
    }
}
