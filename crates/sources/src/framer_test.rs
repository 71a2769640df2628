//! Framer tests

use std::io::Cursor;

use tokio::io::BufReader;

use crate::framer::{read_frame, FrameMode, FramerError};

async fn frames(input: &[u8], mode: FrameMode, max: usize) -> Vec<Vec<u8>> {
    let mut reader = BufReader::new(Cursor::new(input.to_vec()));
    let mut out = Vec::new();
    let mut buf = Vec::new();
    while read_frame(&mut reader, mode, max, &mut buf).await.unwrap() {
        out.push(buf.clone());
    }
    out
}

#[tokio::test]
async fn newline_frames() {
    let got = frames(b"<14>one\n<14>two\n", FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![b"<14>one".to_vec(), b"<14>two".to_vec()]);
}

#[tokio::test]
async fn octet_counted_frames() {
    let got = frames(b"6 <14>ab7 <14>abc", FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![b"<14>ab".to_vec(), b"<14>abc".to_vec()]);
}

#[tokio::test]
async fn mixed_counting_and_lines() {
    let got = frames(b"7 <14>ab\n<14>line\n", FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![b"<14>ab".to_vec(), b"<14>line".to_vec()]);
}

#[tokio::test]
async fn non_numeric_token_falls_back_to_lf() {
    let got = frames(b"hello world\n", FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![b"hello world".to_vec()]);
}

#[tokio::test]
async fn counted_frame_with_zero_length_is_empty() {
    // DATALEN = 0 yields an empty frame; the next frame still parses
    let got = frames(b"0 <14>x\n", FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![b"".to_vec(), b"<14>x".to_vec()]);
}

#[tokio::test]
async fn leading_padding_is_skipped() {
    let got = frames(b"  \r\n<14>padded\n", FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![b"<14>padded".to_vec()]);
}

#[tokio::test]
async fn partial_frame_at_eof_is_dropped() {
    let got = frames(b"<14>complete\n<14>partial", FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![b"<14>complete".to_vec()]);
}

#[tokio::test]
async fn boundary_sizes() {
    // exactly max is accepted
    let line = vec![b'a'; 1024];
    let mut input = line.clone();
    input.push(b'\n');
    let got = frames(&input, FrameMode::Syslog, 1024).await;
    assert_eq!(got, vec![line]);

    // max + 1 is refused
    let mut reader = BufReader::new(Cursor::new(vec![b'b'; 1025]));
    let mut buf = Vec::new();
    let err = read_frame(&mut reader, FrameMode::Syslog, 1024, &mut buf)
        .await
        .unwrap_err();
    assert!(matches!(err, FramerError::Oversize { limit: 1024, .. }));
}

#[tokio::test]
async fn oversized_line_with_newline_is_refused() {
    let mut input = vec![b'c'; 2048];
    input.push(b'\n');
    let mut reader = BufReader::new(Cursor::new(input));
    let mut buf = Vec::new();
    let err = read_frame(&mut reader, FrameMode::Syslog, 1024, &mut buf)
        .await
        .unwrap_err();
    assert!(matches!(err, FramerError::Oversize { limit: 1024, .. }));
}

#[tokio::test]
async fn oversized_count_is_refused_before_reading() {
    let mut reader = BufReader::new(Cursor::new(b"99999 x".to_vec()));
    let mut buf = Vec::new();
    let err = read_frame(&mut reader, FrameMode::Syslog, 1024, &mut buf)
        .await
        .unwrap_err();
    assert!(matches!(err, FramerError::Oversize { size: 99999, .. }));
}

#[tokio::test]
async fn custom_delimiter() {
    let got = frames(b"one|two|three|", FrameMode::Line(b'|'), 1024).await;
    assert_eq!(
        got,
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}
