// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::codec::{DecodeStatus, FrameCodec};
use crate::errors::ReadError;
use crate::protocol::{Frame, FrameHeader, HeaderFlags, OpCode, OpCodeParseErr};
use bytes::BytesMut;
use futures::StreamExt;
use std::io;
use std::iter::FromIterator;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{duplex, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;

fn decode(codec: &FrameCodec, bytes: &mut BytesMut) -> Frame {
    let mut frame = Frame::default();
    let status = codec
        .decode_into(bytes, &mut frame)
        .expect("Decoding failed.");
    assert_eq!(status, DecodeStatus::Complete);
    frame
}

#[test]
fn frame_text() {
    let mut bytes = BytesMut::from_iter(&[
        129, 143, 0, 0, 0, 0, 66, 111, 110, 115, 111, 105, 114, 44, 32, 69, 108, 108, 105, 111, 116,
    ]);

    let frame = decode(&FrameCodec::default(), &mut bytes);
    assert_eq!(frame.opcode(), OpCode::Text);
    assert!(frame.is_fin());
    assert_eq!(frame.header.mask, Some(0));
    assert_eq!(frame.payload.as_ref(), b"Bonsoir, Elliot");
    assert!(bytes.is_empty());
}

#[test]
fn ping() {
    let mut bytes = BytesMut::from_iter(&[137, 4, 1, 2, 3, 4]);
    let frame = decode(&FrameCodec::default(), &mut bytes);
    assert!(frame.is_ping());
    assert!(!frame.is_masked());
    assert_eq!(frame.payload.as_ref(), &[1, 2, 3, 4]);
}

#[test]
fn close_with_status() {
    let mut bytes = BytesMut::from_iter(&[136, 2, 0x03, 0xE8]);
    let frame = decode(&FrameCodec::default(), &mut bytes);
    assert!(frame.is_close());
    assert_eq!(frame.close_code(), Some(1000));
}

#[test]
fn round_trip() {
    let codec = FrameCodec::default();

    for len in [0, 1, 125, 126, 65535, 65536] {
        for mask in [None, Some(0x37fa213d)] {
            for opcode in [OpCode::Text, OpCode::Binary, OpCode::Continuation] {
                let payload = (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>();
                let mut frame = Frame::new(opcode, &payload);
                frame.header.mask = mask;

                let mut bytes = BytesMut::new();
                codec.encode(&frame, &mut bytes);

                let decoded = decode(&codec, &mut bytes);
                assert_eq!(decoded, frame);
                assert_eq!(decoded.payload_len(), len as u64);
                assert!(bytes.is_empty());
            }
        }
    }
}

#[test]
fn length_field_selection() {
    let codec = FrameCodec::default();
    let cases = [
        (0, 0, 2),
        (125, 125, 2),
        (126, 126, 4),
        (65535, 126, 4),
        (65536, 127, 10),
    ];

    for (len, base, header_len) in cases {
        let frame = Frame::binary(&vec![0; len]);
        let mut bytes = BytesMut::new();
        codec.encode(&frame, &mut bytes);

        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], base);
        assert_eq!(bytes.len(), header_len + len);
    }

    let mut bytes = BytesMut::new();
    codec.encode(&Frame::binary(&[0; 65535]), &mut bytes);
    assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);

    bytes.clear();
    codec.encode(&Frame::binary(&[0; 65536]), &mut bytes);
    assert_eq!(&bytes[2..10], &[0, 0, 0, 0, 0, 1, 0, 0]);
}

#[test]
fn mask_flag_and_key() {
    let mut frame = Frame::text(b"abc");
    frame.header.mask = Some(0x01020304);

    let mut bytes = BytesMut::new();
    FrameCodec::default().encode(&frame, &mut bytes);

    assert_eq!(bytes[1], 0x80 | 3);
    assert_eq!(&bytes[2..6], &[1, 2, 3, 4]);
    assert_eq!(&bytes[6..], &[b'a' ^ 1, b'b' ^ 2, b'c' ^ 3]);
}

#[test]
fn reserved_bits_pass_through() {
    let frame = Frame {
        header: FrameHeader::new(
            OpCode::Ping,
            HeaderFlags::RSV1 | HeaderFlags::RSV3,
            None,
        ),
        payload: BytesMut::from(&[1u8; 200][..]),
    };

    let codec = FrameCodec::default();
    let mut bytes = BytesMut::new();
    codec.encode(&frame, &mut bytes);

    assert_eq!(decode(&codec, &mut bytes), frame);
}

#[test]
fn incomplete() {
    let codec = FrameCodec::default();
    let mut frame = Frame::default();

    let mut bytes = BytesMut::from_iter(&[0x81]);
    assert_eq!(
        codec.decode_into(&mut bytes, &mut frame).unwrap(),
        DecodeStatus::Incomplete { needed: 1 }
    );

    let mut bytes = BytesMut::from_iter(&[0x82, 126, 0x01]);
    assert_eq!(
        codec.decode_into(&mut bytes, &mut frame).unwrap(),
        DecodeStatus::Incomplete { needed: 1 }
    );

    let mut bytes = BytesMut::from_iter(&[0x82, 0x85, 1, 2]);
    assert_eq!(
        codec.decode_into(&mut bytes, &mut frame).unwrap(),
        DecodeStatus::Incomplete { needed: 2 }
    );

    let mut bytes = BytesMut::from_iter(&[0x81, 5, b'H', b'e']);
    assert_eq!(
        codec.decode_into(&mut bytes, &mut frame).unwrap(),
        DecodeStatus::Incomplete { needed: 3 }
    );

    assert_eq!(bytes.len(), 4);
    assert_eq!(frame, Frame::default());
}

#[test]
fn invalid_opcode() {
    let mut bytes = BytesMut::from_iter(&[0x83, 0]);
    let result = FrameCodec::default().decode_into(&mut bytes, &mut Frame::default());
    assert!(matches!(
        result,
        Err(ReadError::InvalidOpCode(OpCodeParseErr(3)))
    ));
}

#[test]
fn overflow() {
    let codec = FrameCodec::new(100);

    let mut bytes = BytesMut::from_iter(&[0x82, 126, 0x01, 0x00]);
    let result = codec.decode_into(&mut bytes, &mut Frame::default());
    assert!(matches!(
        result,
        Err(ReadError::Overflow { len: 256, max: 100 })
    ));

    let mut bytes = BytesMut::from_iter(&[0x82, 127, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    let result = FrameCodec::default().decode_into(&mut bytes, &mut Frame::default());
    assert!(matches!(result, Err(ReadError::Overflow { .. })));
}

#[test]
fn decoder_retains_trailing_bytes() {
    let codec = FrameCodec::default();
    let mut bytes = BytesMut::new();
    codec.encode(&Frame::text(b"first"), &mut bytes);
    codec.encode(&Frame::binary(b"second"), &mut bytes);
    bytes.extend_from_slice(&[0x81]);

    assert_eq!(decode(&codec, &mut bytes), Frame::text(b"first"));
    assert_eq!(decode(&codec, &mut bytes), Frame::binary(b"second"));
    assert_eq!(bytes.as_ref(), &[0x81]);
}

#[tokio::test]
async fn read_frames() {
    let (mut tx, mut rx) = duplex(16);
    let codec = FrameCodec::default();

    let write = async move {
        let mut buffer = BytesMut::new();
        for frame in [Frame::text(&[1; 100]), Frame::ping(b"ping")] {
            codec
                .write_frame(&mut tx, &mut buffer, &frame)
                .await
                .expect("Write failed.");
        }
    };

    let read = async move {
        let mut buffer = BytesMut::new();
        let mut frame = Frame::default();

        codec
            .read_frame(&mut rx, &mut buffer, &mut frame)
            .await
            .expect("Read failed.");
        assert_eq!(frame, Frame::text(&[1; 100]));

        codec
            .read_frame(&mut rx, &mut buffer, &mut frame)
            .await
            .expect("Read failed.");
        assert_eq!(frame, Frame::ping(b"ping"));

        let result = codec.read_frame(&mut rx, &mut buffer, &mut frame).await;
        match result {
            Err(err) => assert!(err.is_clean_close()),
            Ok(_) => panic!("Expected the stream to end."),
        }
    };

    futures::future::join(write, read).await;
}

#[tokio::test]
async fn truncated_frame() {
    let (mut tx, mut rx) = duplex(64);
    tx.write_all(&[0x81, 0x05, b'H', b'e', b'l'])
        .await
        .expect("Write failed.");
    drop(tx);

    let mut buffer = BytesMut::new();
    let mut frame = Frame::default();
    let result = FrameCodec::default()
        .read_frame(&mut rx, &mut buffer, &mut frame)
        .await;

    match result {
        Err(err @ ReadError::Truncated { bytes_read: 5 }) => assert!(!err.is_clean_close()),
        ow => panic!("Unexpected result: {:?}", ow),
    }
}

#[tokio::test]
async fn framed_read() {
    let codec = FrameCodec::default();
    let mut bytes = BytesMut::new();
    codec.encode(&Frame::text(b"hello world"), &mut bytes);
    bytes.extend_from_slice(&[0x81, 0x05, b'H']);

    let mut framed = FramedRead::new(bytes.as_ref(), codec);

    let frame = framed
        .next()
        .await
        .expect("Stream ended early.")
        .expect("Decoding failed.");
    assert_eq!(frame, Frame::text(b"hello world"));

    assert!(matches!(
        framed.next().await,
        Some(Err(ReadError::Truncated { bytes_read: 3 }))
    ));
}

/// A writer that accepts `limit` bytes, a few at a time, and then fails.
struct FailingWriter {
    limit: usize,
    written: usize,
}

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.get_mut();
        let remaining = this.limit - this.written;
        if remaining == 0 {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        } else {
            let n = buf.len().min(remaining).min(3);
            this.written += n;
            Poll::Ready(Ok(n))
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn partial_write() {
    let mut writer = FailingWriter {
        limit: 7,
        written: 0,
    };
    let mut buffer = BytesMut::new();

    let err = FrameCodec::default()
        .write_frame(&mut writer, &mut buffer, &Frame::text(b"hello world"))
        .await
        .expect_err("Write should have failed.");

    assert_eq!(err.written, 7);
    assert_eq!(err.source.kind(), io::ErrorKind::BrokenPipe);
}

#[tokio::test]
async fn complete_write() {
    let mut writer = FailingWriter {
        limit: 100,
        written: 0,
    };
    let mut buffer = BytesMut::new();

    let written = FrameCodec::default()
        .write_frame(&mut writer, &mut buffer, &Frame::text(b"hello world"))
        .await
        .expect("Write failed.");

    assert_eq!(written, 13);
    assert_eq!(writer.written, 13);
}
