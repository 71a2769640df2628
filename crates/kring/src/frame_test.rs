//! Frame codec tests

use crate::{open_blob, seal_blob, Frame, FrameCodec, Keyring, KringError};

#[test]
fn signed_roundtrip() {
    let ring = Keyring::create();
    let sign = FrameCodec::Sign(ring.signing_key());
    let verify = FrameCodec::Verify(ring.verifying_key());

    let frame = Frame::new("setconf", b"payload bytes".to_vec());
    let body = sign.encode(&frame).unwrap();
    let decoded = verify.decode(&body).unwrap();
    assert_eq!(decoded, frame);
}

#[test]
fn sealed_roundtrip() {
    let ring = Keyring::create();
    let seal = FrameCodec::Seal(ring.box_cipher());
    let open = FrameCodec::Open(ring.box_cipher());

    let frame = Frame::new("started", Vec::new());
    let body = seal.encode(&frame).unwrap();
    let decoded = open.decode(&body).unwrap();
    assert_eq!(decoded, frame);
}

#[test]
fn tampered_signature_is_rejected() {
    let ring = Keyring::create();
    let sign = FrameCodec::Sign(ring.signing_key());
    let verify = FrameCodec::Verify(ring.verifying_key());

    let mut body = sign.encode(&Frame::bare("start")).unwrap();
    let last = body.len() - 1;
    body[last] ^= 0xff;
    assert!(matches!(
        verify.decode(&body),
        Err(KringError::BadSignature)
    ));
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let ring = Keyring::create();
    let seal = FrameCodec::Seal(ring.box_cipher());
    let open = FrameCodec::Open(ring.box_cipher());

    let mut body = seal.encode(&Frame::new("stash", vec![1, 2, 3])).unwrap();
    body[30] ^= 0x01;
    assert!(matches!(open.decode(&body), Err(KringError::BadSeal)));
}

#[test]
fn wrong_session_cannot_open() {
    let a = Keyring::create();
    let b = Keyring::create();
    let sealed = seal_blob(&a.box_cipher(), b"secret payload").unwrap();
    assert!(matches!(
        open_blob(&b.box_cipher(), &sealed),
        Err(KringError::BadSeal)
    ));
}

#[test]
fn blob_roundtrip() {
    let ring = Keyring::create();
    let cipher = ring.box_cipher();
    let sealed = seal_blob(&cipher, b"the payload").unwrap();
    assert_ne!(&sealed, b"the payload");
    assert_eq!(open_blob(&cipher, &sealed).unwrap(), b"the payload");
}

#[test]
fn oversized_header_is_rejected() {
    let ring = Keyring::create();
    let sign = FrameCodec::Sign(ring.signing_key());
    let frame = Frame::bare("x".repeat(300));
    assert!(matches!(sign.encode(&frame), Err(KringError::Malformed)));
}

#[test]
fn empty_payload_keeps_separator() {
    let ring = Keyring::create();
    let sign = FrameCodec::Sign(ring.signing_key());
    let verify = FrameCodec::Verify(ring.verifying_key());
    let decoded = verify
        .decode(&sign.encode(&Frame::bare("stop")).unwrap())
        .unwrap();
    assert_eq!(decoded.command, "stop");
    assert!(decoded.payload.is_empty());
}
