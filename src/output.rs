//! The real-time send path: SysEx chunking with user-controlled pacing,
//! segmentation of UMP word streams, and the pre-allocated packet ring the
//! software backends deliver through.

use crate::config::ChunkingParameters;
use crate::errors::{Error, ErrorKind, Result};
use crate::ump::words_for_type;

/// Sends one MIDI 1.0 message, chunking an oversize SysEx.
///
/// Chunks carry at most `chunking.size` bytes; the leading `F0` stays in
/// the first chunk and the trailing `F7` only in the last. No continuation
/// framing is inserted; the backend accepts fragmented raw bytes. Between
/// chunks the `wait` callback receives the configured interval and the
/// running byte count; returning `false` aborts the send with `Aborted`.
/// Messages within the size limit (and everything that is not a SysEx) go
/// out as one unbounded write.
pub(crate) fn send_chunked<W>(
    bytes: &[u8],
    chunking: Option<&mut ChunkingParameters>,
    mut write: W,
) -> Result<()>
where
    W: FnMut(&[u8]) -> Result<()>,
{
    let chunking = match chunking {
        Some(c) if bytes.first() == Some(&0xF0) && bytes.len() > c.size && c.size > 0 => c,
        _ => return write(bytes),
    };

    let mut written = 0;
    for chunk in bytes.chunks(chunking.size) {
        if written > 0 && !(chunking.wait)(chunking.interval, written) {
            return Err(Error::core(ErrorKind::Aborted));
        }
        write(chunk)?;
        written += chunk.len();
    }
    Ok(())
}

/// Segments a UMP word stream into packets for backends that accept one
/// packet at a time.
///
/// Zero words are NOOP padding and are skipped. Each packet's length comes
/// from its type nibble. When a write fails with `NoBufferSpace` the
/// backend's buffer-grow hook runs and the write is retried once; any
/// further failure surfaces.
pub(crate) fn segment_ump_stream<W, G>(words: &[u32], mut write: W, mut grow: G) -> Result<()>
where
    W: FnMut(&[u32]) -> Result<()>,
    G: FnMut() -> Result<()>,
{
    let mut rest = words;
    loop {
        while rest.first() == Some(&0) {
            rest = &rest[1..];
        }
        let Some(&first) = rest.first() else {
            return Ok(());
        };
        let len = words_for_type((first >> 28) as u8);
        if rest.len() < len {
            return Err(Error::core(ErrorKind::Truncated));
        }
        let packet = &rest[..len];
        match write(packet) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NoBufferSpace => {
                grow()?;
                write(packet)?;
            }
            Err(err) => return Err(err),
        }
        rest = &rest[len..];
    }
}

/// A pre-allocated byte ring carrying length-prefixed packets.
///
/// Sized once at port-open time; the write path does not allocate. Writers
/// get `NoBufferSpace` when a packet does not fit, at which point the
/// owner may `grow` (outside any real-time path) and retry.
pub(crate) struct RingBuffer {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
    /// Bytes currently stored; disambiguates full from empty.
    used: usize,
}

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

impl RingBuffer {
    pub fn new(capacity: usize) -> RingBuffer {
        RingBuffer {
            buf: vec![0; capacity.max(LEN_PREFIX * 2)].into_boxed_slice(),
            read: 0,
            write: 0,
            used: 0,
        }
    }

    fn free(&self) -> usize {
        self.buf.len() - self.used
    }

    /// Appends one packet. Fails with `NoBufferSpace` if prefix + payload
    /// exceed the free space.
    pub fn push(&mut self, packet: &[u8]) -> Result<()> {
        self.push_parts(&[packet])
    }

    /// Appends one packet given as scattered parts, without gathering them
    /// first.
    pub fn push_parts(&mut self, parts: &[&[u8]]) -> Result<()> {
        let payload: usize = parts.iter().map(|p| p.len()).sum();
        if LEN_PREFIX + payload > self.free() {
            return Err(Error::core(ErrorKind::NoBufferSpace));
        }
        let len = (payload as u32).to_ne_bytes();
        self.write_bytes(&len);
        for part in parts {
            self.write_bytes(part);
        }
        Ok(())
    }

    /// Pops the oldest packet into `out`, returning the packet length.
    pub fn pop(&mut self, out: &mut Vec<u8>) -> Option<usize> {
        if self.used < LEN_PREFIX {
            return None;
        }
        let mut len = [0u8; LEN_PREFIX];
        self.read_bytes(&mut len);
        let len = u32::from_ne_bytes(len) as usize;
        let start = out.len();
        out.resize(start + len, 0);
        self.read_bytes(&mut out[start..]);
        Some(len)
    }

    /// Doubles the capacity, preserving content. Not for use on a
    /// real-time thread.
    pub fn grow(&mut self) {
        let mut bigger = RingBuffer::new(self.buf.len() * 2);
        let mut scratch = Vec::new();
        loop {
            scratch.clear();
            if self.pop(&mut scratch).is_none() {
                break;
            }
            bigger.push(&scratch).expect("doubled ring holds the old content");
        }
        *self = bigger;
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.buf[self.write] = b;
            self.write = (self.write + 1) % self.buf.len();
        }
        self.used += bytes.len();
    }

    fn read_bytes(&mut self, out: &mut [u8]) {
        for b in out.iter_mut() {
            *b = self.buf[self.read];
            self.read = (self.read + 1) % self.buf.len();
        }
        self.used -= out.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn small_messages_are_a_single_write() {
        let mut chunking = ChunkingParameters::new(Duration::from_millis(100), 4096);
        let mut writes = Vec::new();
        send_chunked(&[0x90, 60, 127], Some(&mut chunking), |b| {
            writes.push(b.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(writes, vec![vec![0x90, 60, 127]]);
    }

    #[test]
    fn oversize_sysex_is_chunked_with_wait_between_chunks() {
        let mut sysex = vec![0xF0];
        sysex.extend(std::iter::repeat(0x42u8).take(16382));
        sysex.push(0xF7);
        assert_eq!(sysex.len(), 16384);

        let waited = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let waited2 = waited.clone();
        let mut chunking = ChunkingParameters {
            interval: Duration::from_millis(100),
            size: 4096,
            wait: Box::new(move |interval, written| {
                assert_eq!(interval, Duration::from_millis(100));
                waited2.lock().push(written);
                true
            }),
        };

        let mut wire = Vec::new();
        send_chunked(&sysex, Some(&mut chunking), |b| {
            wire.extend_from_slice(b);
            Ok(())
        })
        .unwrap();

        assert_eq!(*waited.lock(), vec![4096, 8192, 12288]);
        // every submitted byte appears exactly once, in order
        assert_eq!(wire, sysex);
    }

    #[test]
    fn aborting_wait_stops_the_send() {
        let mut sysex = vec![0xF0];
        sysex.extend(std::iter::repeat(0u8).take(9000));
        sysex.push(0xF7);

        let mut chunking = ChunkingParameters {
            interval: Duration::ZERO,
            size: 4096,
            wait: Box::new(|_, _| false),
        };
        let mut writes = 0;
        let err = send_chunked(&sysex, Some(&mut chunking), |_| {
            writes += 1;
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(writes, 1);
    }

    #[test]
    fn segmentation_skips_noops_and_splits_packets() {
        let words = [
            0x0000_0000, // NOOP padding
            0x2090_3C7F,
            0x0000_0000,
            0x4091_3C00,
            0xFFFF_0000,
        ];
        let mut packets = Vec::new();
        segment_ump_stream(&words, |p| {
            packets.push(p.to_vec());
            Ok(())
        }, || Ok(()))
        .unwrap();
        assert_eq!(
            packets,
            vec![vec![0x2090_3C7F], vec![0x4091_3C00, 0xFFFF_0000]]
        );
    }

    #[test]
    fn segmentation_grows_and_retries_once() {
        let words = [0x2090_3C7F];
        let mut grown = false;
        let mut attempts = 0;
        segment_ump_stream(
            &words,
            |_| {
                attempts += 1;
                if attempts == 1 {
                    Err(Error::core(ErrorKind::NoBufferSpace))
                } else {
                    Ok(())
                }
            },
            || {
                grown = true;
                Ok(())
            },
        )
        .unwrap();
        assert!(grown);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn segmentation_surfaces_repeated_failure() {
        let words = [0x2090_3C7F];
        let err = segment_ump_stream(
            &words,
            |_| Err(Error::core(ErrorKind::NoBufferSpace)),
            || Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoBufferSpace);
    }

    #[test]
    fn segmentation_rejects_truncated_streams() {
        let err = segment_ump_stream(&[0x4091_3C00], |_| Ok(()), || Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn ring_buffer_is_fifo_and_reports_overflow() {
        let mut ring = RingBuffer::new(32);
        ring.push(&[1, 2, 3]).unwrap();
        ring.push(&[4]).unwrap();
        let err = ring.push(&[0; 64]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoBufferSpace);

        let mut out = Vec::new();
        assert_eq!(ring.pop(&mut out), Some(3));
        assert_eq!(out, vec![1, 2, 3]);
        out.clear();
        assert_eq!(ring.pop(&mut out), Some(1));
        assert_eq!(out, vec![4]);
        assert!(ring.pop(&mut out).is_none());
    }

    #[test]
    fn ring_buffer_wraps_and_grows() {
        let mut ring = RingBuffer::new(16);
        let mut out = Vec::new();
        for round in 0..10u8 {
            ring.push(&[round; 8]).unwrap();
            out.clear();
            assert_eq!(ring.pop(&mut out), Some(8));
            assert_eq!(out, vec![round; 8]);
        }

        ring.push(&[7; 8]).unwrap();
        assert!(ring.push(&[8; 8]).is_err());
        ring.grow();
        ring.push(&[8; 8]).unwrap();
        out.clear();
        assert_eq!(ring.pop(&mut out), Some(8));
        assert_eq!(out, vec![7; 8]);
    }
}
