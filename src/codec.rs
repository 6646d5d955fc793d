//! Length-delimited framing for self-describing records: one record per
//! frame. Built on `asynchronous-codec` + `unsigned-varint`, the same
//! combination libp2p itself uses for its own wire protocols.

use {
  asynchronous_codec::{Decoder, Encoder},
  bytes::BytesMut,
  serde::{de::DeserializeOwned, Serialize},
  std::{io, marker::PhantomData},
  unsigned_varint::codec::UviBytes,
};

/// Codec that frames MessagePack-encoded values of `T` behind an
/// unsigned-varint length prefix.
pub struct MessagePackCodec<T> {
  inner: UviBytes<Vec<u8>>,
  _marker: PhantomData<T>,
}

impl<T> Default for MessagePackCodec<T> {
  fn default() -> Self {
    let mut inner = UviBytes::default();
    inner.set_max_len(64 * 1024);
    Self { inner, _marker: PhantomData }
  }
}

impl<T: Serialize> Encoder for MessagePackCodec<T> {
  type Item = T;
  type Error = io::Error;

  fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
    let bytes = rmp_serde::to_vec(&item)
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    self.inner.encode(bytes, dst)
  }
}

impl<T: DeserializeOwned> Decoder for MessagePackCodec<T> {
  type Item = T;
  type Error = io::Error;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, Self::Error> {
    let Some(frame) = self.inner.decode(src)? else {
      return Ok(None);
    };

    if frame.is_empty() {
      // The joiner's zero-length rendezvous tickle: not a decodable record,
      // swallow it silently and wait for the next frame.
      return self.decode(src);
    }

    let value = rmp_serde::from_slice(&frame)
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
  }
}
