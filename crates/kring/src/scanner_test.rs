//! Frame scanner tests

use crate::{
    Frame, FrameCodec, FrameReader, FrameWriter, Keyring, KringError,
    MAX_CONSECUTIVE_BAD_FRAMES,
};

#[tokio::test]
async fn writer_reader_roundtrip() {
    let ring = Keyring::create();
    let (client, server) = tokio::io::duplex(4096);

    let mut writer = FrameWriter::new(client, FrameCodec::Sign(ring.signing_key()));
    let mut reader = FrameReader::new(server, FrameCodec::Verify(ring.verifying_key()));

    writer.write(&Frame::new("setconf", b"abc".to_vec())).await.unwrap();
    writer.write(&Frame::bare("start")).await.unwrap();
    drop(writer);

    assert_eq!(
        reader.next().await.unwrap().unwrap(),
        Frame::new("setconf", b"abc".to_vec())
    );
    assert_eq!(reader.next().await.unwrap().unwrap(), Frame::bare("start"));
    assert!(reader.next().await.unwrap().is_none());
}

#[tokio::test]
async fn bad_frame_is_dropped_scanning_continues() {
    let ring = Keyring::create();
    let (mut client, server) = tokio::io::duplex(4096);
    let mut reader = FrameReader::new(server, FrameCodec::Verify(ring.verifying_key()));

    // one garbage frame, then a valid one
    let garbage = vec![0u8; 80];
    let sign = FrameCodec::Sign(ring.signing_key());
    let good = sign.encode(&Frame::bare("start")).unwrap();

    use tokio::io::AsyncWriteExt;
    client.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
    client.write_all(&garbage).await.unwrap();
    client.write_all(&(good.len() as u32).to_be_bytes()).await.unwrap();
    client.write_all(&good).await.unwrap();
    drop(client);

    assert_eq!(reader.next().await.unwrap().unwrap(), Frame::bare("start"));
}

#[tokio::test]
async fn repeated_bad_frames_kill_the_channel() {
    let ring = Keyring::create();
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let mut reader = FrameReader::new(server, FrameCodec::Verify(ring.verifying_key()));

    use tokio::io::AsyncWriteExt;
    let garbage = vec![0u8; 80];
    for _ in 0..MAX_CONSECUTIVE_BAD_FRAMES {
        client.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        client.write_all(&garbage).await.unwrap();
    }
    drop(client);

    assert!(matches!(
        reader.next().await,
        Err(KringError::TooManyBadFrames)
    ));
}

#[tokio::test]
async fn oversized_length_prefix_is_fatal() {
    let ring = Keyring::create();
    let (mut client, server) = tokio::io::duplex(4096);
    let mut reader = FrameReader::new(server, FrameCodec::Open(ring.box_cipher()));

    use tokio::io::AsyncWriteExt;
    client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    drop(client);

    assert!(matches!(reader.next().await, Err(KringError::Oversized(_))));
}
